use crate::errors::domain::{
    classify_io_error, classify_message_by_patterns, DomainError, ErrorCode, IoErrorHint,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorCode {
    NotFound,
    PermissionDenied,
    EncodeFailed,
    DecodeFailed,
    PlaceholderRejected,
    IoFailed,
    UnknownError,
}

impl ErrorCode for CacheErrorCode {
    fn as_code_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::EncodeFailed => "encode_failed",
            Self::DecodeFailed => "decode_failed",
            Self::PlaceholderRejected => "placeholder_rejected",
            Self::IoFailed => "io_failed",
            Self::UnknownError => "unknown_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheError {
    code: CacheErrorCode,
    message: String,
}

impl CacheError {
    pub fn new(code: CacheErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> CacheErrorCode {
        self.code
    }

    pub fn from_external_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = classify_message_by_patterns(
            &message,
            CACHE_CLASSIFICATION_RULES,
            CacheErrorCode::UnknownError,
        );
        Self::new(code, message)
    }

    /// Maps an io failure to a code, keeping `context` as the message prefix.
    pub fn from_io(context: &str, error: &std::io::Error) -> Self {
        let code = match classify_io_error(error) {
            IoErrorHint::NotFound => CacheErrorCode::NotFound,
            IoErrorHint::PermissionDenied => CacheErrorCode::PermissionDenied,
            IoErrorHint::Other => CacheErrorCode::IoFailed,
        };
        Self::new(code, format!("{context}: {error}"))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CacheError {}

impl DomainError for CacheError {
    fn code_str(&self) -> &'static str {
        self.code.as_code_str()
    }

    fn message(&self) -> &str {
        &self.message
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

const CACHE_CLASSIFICATION_RULES: &[(CacheErrorCode, &[&str])] = &[
    (CacheErrorCode::EncodeFailed, &["encode", "jpeg write"]),
    (
        CacheErrorCode::DecodeFailed,
        &["decode", "guess format", "unsupported"],
    ),
    (CacheErrorCode::PlaceholderRejected, &["placeholder"]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_kind() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let mapped = CacheError::from_io("Write cache entry failed", &err);
        assert_eq!(mapped.code(), CacheErrorCode::PermissionDenied);
        assert_eq!(mapped.code_str(), "permission_denied");
        assert!(mapped.message().starts_with("Write cache entry failed"));
    }

    #[test]
    fn external_messages_are_classified() {
        let err = CacheError::from_external_message("Decode cached entry failed: eof");
        assert_eq!(err.code(), CacheErrorCode::DecodeFailed);
        let err = CacheError::from_external_message("something odd");
        assert_eq!(err.code(), CacheErrorCode::UnknownError);
    }
}
