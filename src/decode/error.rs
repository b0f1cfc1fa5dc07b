use crate::errors::domain::{
    classify_io_error, classify_message_by_patterns, DomainError, ErrorCode, IoErrorHint,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorCode {
    Unavailable,
    UnsupportedFormat,
    OpenFailed,
    DecodeFailed,
    TooLarge,
    Degenerate,
    PlatformFailed,
    UnknownError,
}

impl ErrorCode for DecodeErrorCode {
    fn as_code_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::UnsupportedFormat => "unsupported_format",
            Self::OpenFailed => "open_failed",
            Self::DecodeFailed => "decode_failed",
            Self::TooLarge => "too_large",
            Self::Degenerate => "degenerate",
            Self::PlatformFailed => "platform_failed",
            Self::UnknownError => "unknown_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodeError {
    code: DecodeErrorCode,
    message: String,
}

impl DecodeError {
    pub fn new(code: DecodeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> DecodeErrorCode {
        self.code
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorCode::Unavailable, message)
    }

    pub fn degenerate() -> Self {
        Self::new(DecodeErrorCode::Degenerate, "Decoded image has zero size")
    }

    pub fn from_external_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = classify_message_by_patterns(
            &message,
            DECODE_CLASSIFICATION_RULES,
            DecodeErrorCode::UnknownError,
        );
        Self::new(code, message)
    }

    pub fn from_io(context: &str, error: &std::io::Error) -> Self {
        let code = match classify_io_error(error) {
            IoErrorHint::NotFound | IoErrorHint::PermissionDenied => DecodeErrorCode::OpenFailed,
            IoErrorHint::Other => DecodeErrorCode::DecodeFailed,
        };
        Self::new(code, format!("{context}: {error}"))
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DecodeError {}

impl DomainError for DecodeError {
    fn code_str(&self) -> &'static str {
        self.code.as_code_str()
    }

    fn message(&self) -> &str {
        &self.message
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;

const DECODE_CLASSIFICATION_RULES: &[(DecodeErrorCode, &[&str])] = &[
    (
        DecodeErrorCode::UnsupportedFormat,
        &["unsupported", "guess format", "unknown format"],
    ),
    (
        DecodeErrorCode::TooLarge,
        &["too large", "limits", "memory limit"],
    ),
    (DecodeErrorCode::OpenFailed, &["open failed"]),
    (
        DecodeErrorCode::PlatformFailed,
        &["shell", "com ", "getdibits", "hbitmap"],
    ),
    (DecodeErrorCode::DecodeFailed, &["decode", "format error"]),
];
