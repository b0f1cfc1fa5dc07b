//! Service settings as read from the application's JSON settings document.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::cache::DEFAULT_MEM_CAPACITY;

pub const MEM_CACHE_SETTING: &str = "thumbnail_mem_cache";
pub const DISK_CACHE_DIR_SETTING: &str = "thumbnail_disk_cache_dir";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub mem_cache_capacity: usize,
    pub disk_cache_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mem_cache_capacity: DEFAULT_MEM_CAPACITY,
            disk_cache_dir: default_disk_cache_dir(),
        }
    }
}

impl ServiceConfig {
    /// Unknown or malformed values fall back to defaults; settings never
    /// make construction fail.
    pub fn from_settings(settings: &Value) -> Self {
        let mem_cache_capacity = parse_mem_capacity(settings.get(MEM_CACHE_SETTING));
        let disk_cache_dir = settings
            .get(DISK_CACHE_DIR_SETTING)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| PathBuf::from(expand_env_vars(s)))
            .unwrap_or_else(default_disk_cache_dir);
        Self {
            mem_cache_capacity,
            disk_cache_dir,
        }
    }
}

fn parse_mem_capacity(value: Option<&Value>) -> usize {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        None | Some(0) => DEFAULT_MEM_CAPACITY,
        Some(n) if n < 0 => 1,
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    }
}

pub fn default_disk_cache_dir() -> PathBuf {
    app_data_root().join("thumbs")
}

pub fn default_log_dir() -> PathBuf {
    app_data_root().join("logs")
}

fn app_data_root() -> PathBuf {
    let base = dirs_next::data_local_dir()
        .or_else(|| dirs_next::home_dir().map(|home| home.join("AppData").join("Local")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("PhotoManager")
}

/// Expands `$VAR`, `${VAR}` and `%VAR%`. References to unset variables are
/// left as written.
pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(['$', '%']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (name, consumed) = match reference_at(tail) {
            Some(found) => found,
            None => {
                let sigil_len = tail.chars().next().map_or(1, char::len_utf8);
                out.push_str(&tail[..sigil_len]);
                rest = &tail[sigil_len..];
                continue;
            }
        };
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&tail[..consumed]),
        }
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

/// Returns the variable name and the byte length of the reference at the
/// start of `s`, if `s` starts with a well-formed one.
fn reference_at(s: &str) -> Option<(&str, usize)> {
    let is_name_char = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if let Some(body) = s.strip_prefix("${") {
        let end = body.find('}')?;
        let name = &body[..end];
        return (!name.is_empty() && name.chars().all(is_name_char)).then_some((name, end + 3));
    }
    if let Some(body) = s.strip_prefix('$') {
        let len = body.find(|c: char| !is_name_char(c)).unwrap_or(body.len());
        return (len > 0).then_some((&body[..len], len + 1));
    }
    if let Some(body) = s.strip_prefix('%') {
        let end = body.find('%')?;
        let name = &body[..end];
        return (!name.is_empty() && name.chars().all(|c| is_name_char(c) || c == '(' || c == ')'))
            .then_some((name, end + 2));
    }
    None
}

/// Reads a settings document from disk.
pub fn load_settings_file(path: &Path) -> Result<Value, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings {}: {e}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse settings {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fake_env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ana".into()),
            "LOCALAPPDATA" => Some("C:\\Users\\ana\\AppData\\Local".into()),
            _ => None,
        }
    }

    #[test]
    fn mem_capacity_defaults_and_clamps() {
        let cases = [
            (json!({}), DEFAULT_MEM_CAPACITY),
            (json!({ "thumbnail_mem_cache": 0 }), DEFAULT_MEM_CAPACITY),
            (json!({ "thumbnail_mem_cache": "lots" }), DEFAULT_MEM_CAPACITY),
            (json!({ "thumbnail_mem_cache": null }), DEFAULT_MEM_CAPACITY),
            (json!({ "thumbnail_mem_cache": -4 }), 1),
            (json!({ "thumbnail_mem_cache": 64 }), 64),
            (json!({ "thumbnail_mem_cache": " 128 " }), 128),
            (json!({ "thumbnail_mem_cache": 32.9 }), 32),
        ];
        for (settings, expected) in cases {
            assert_eq!(
                ServiceConfig::from_settings(&settings).mem_cache_capacity,
                expected,
                "{settings}"
            );
        }
    }

    #[test]
    fn disk_dir_uses_setting_or_default() {
        let cfg = ServiceConfig::from_settings(&json!({ "thumbnail_disk_cache_dir": "/srv/thumbs" }));
        assert_eq!(cfg.disk_cache_dir, PathBuf::from("/srv/thumbs"));

        let cfg = ServiceConfig::from_settings(&json!({ "thumbnail_disk_cache_dir": 7 }));
        assert_eq!(cfg.disk_cache_dir, default_disk_cache_dir());
        assert!(cfg.disk_cache_dir.ends_with(Path::new("PhotoManager").join("thumbs")));
    }

    #[test]
    fn expands_all_reference_styles() {
        assert_eq!(expand_with("$HOME/thumbs", fake_env), "/home/ana/thumbs");
        assert_eq!(expand_with("${HOME}x", fake_env), "/home/anax");
        assert_eq!(
            expand_with("%LOCALAPPDATA%\\PhotoManager", fake_env),
            "C:\\Users\\ana\\AppData\\Local\\PhotoManager"
        );
    }

    #[test]
    fn unknown_and_malformed_references_stay_verbatim() {
        assert_eq!(expand_with("$NOPE/a", fake_env), "$NOPE/a");
        assert_eq!(expand_with("%NOPE%/a", fake_env), "%NOPE%/a");
        assert_eq!(expand_with("${HOME", fake_env), "${HOME");
        assert_eq!(expand_with("100% sure $", fake_env), "100% sure $");
        assert_eq!(expand_with("ünï$HOME", fake_env), "ünï/home/ana");
    }

    #[test]
    fn settings_file_round_trips_through_serde() {
        let path = std::env::temp_dir().join(format!(
            "photothumb-settings-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "thumbnail_mem_cache": 9 }"#).unwrap();
        let cfg = ServiceConfig::from_settings(&load_settings_file(&path).unwrap());
        assert_eq!(cfg.mem_cache_capacity, 9);
        std::fs::write(&path, "not json").unwrap();
        assert!(load_settings_file(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
