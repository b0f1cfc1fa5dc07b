use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use blake3::Hasher;
use tracing::debug;

use crate::raster::RequestedSide;

/// Content signature of a `(path, mtime, size, side)` tuple.
///
/// Any change to the file's modification time, its size or the requested
/// side yields a different key; this is the only staleness check the cache
/// performs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; blake3::OUT_LEN]);

impl CacheKey {
    /// Stats `path` and hashes the signature. When the stat fails the key
    /// degrades to `(path, 0, 0, side)` instead of failing the request.
    pub fn derive(path: &Path, side: RequestedSide) -> Self {
        let path = absolute_path(path);
        match fs::metadata(&path) {
            Ok(meta) => Self::from_parts(&path, modified_ns(&meta), meta.len(), side),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "stat failed; using degraded cache key");
                Self::from_parts(&path, 0, 0, side)
            }
        }
    }

    pub fn from_parts(path: &Path, mtime_ns: i128, size_bytes: u64, side: RequestedSide) -> Self {
        let path_bytes = path.as_os_str().as_encoded_bytes();
        let mut hasher = Hasher::new();
        hasher.update(&(path_bytes.len() as u64).to_le_bytes());
        hasher.update(path_bytes);
        hasher.update(&mtime_ns.to_le_bytes());
        hasher.update(&size_bytes.to_le_bytes());
        hasher.update(&side.as_px().to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Lowercase hex digest, used as the disk-cache file stem.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn modified_ns(meta: &fs::Metadata) -> i128 {
    meta.modified().map(system_time_ns).unwrap_or(0)
}

fn system_time_ns(ts: SystemTime) -> i128 {
    match ts.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn uniq_path(label: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        std::env::temp_dir().join(format!("photothumb-key-test-{label}-{ts}"))
    }

    #[test]
    fn key_is_deterministic_and_hex_is_long_enough() {
        let a = CacheKey::from_parts(Path::new("/p/a.jpg"), 10, 20, RequestedSide::Bounded(256));
        let b = CacheKey::from_parts(Path::new("/p/a.jpg"), 10, 20, RequestedSide::Bounded(256));
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert!(a.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn every_component_changes_the_key() {
        let base = CacheKey::from_parts(Path::new("/p/a.jpg"), 10, 20, RequestedSide::Bounded(256));
        let variants = [
            CacheKey::from_parts(Path::new("/p/b.jpg"), 10, 20, RequestedSide::Bounded(256)),
            CacheKey::from_parts(Path::new("/p/a.jpg"), 11, 20, RequestedSide::Bounded(256)),
            CacheKey::from_parts(Path::new("/p/a.jpg"), 10, 21, RequestedSide::Bounded(256)),
            CacheKey::from_parts(Path::new("/p/a.jpg"), 10, 20, RequestedSide::Bounded(512)),
            CacheKey::from_parts(Path::new("/p/a.jpg"), 10, 20, RequestedSide::Native),
        ];
        for v in variants {
            assert_ne!(base, v);
        }
    }

    #[test]
    fn missing_file_degrades_instead_of_failing() {
        let path = uniq_path("missing").join("nope.jpg");
        let key = CacheKey::derive(&path, RequestedSide::Bounded(128));
        let expected = CacheKey::from_parts(
            &absolute_path(&path),
            0,
            0,
            RequestedSide::Bounded(128),
        );
        assert_eq!(key, expected);
    }

    #[test]
    fn growing_the_file_changes_the_key() {
        let dir = uniq_path("grow");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.bin");
        fs::write(&path, b"abc").unwrap();
        let before = CacheKey::derive(&path, RequestedSide::Bounded(64));
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"def").unwrap();
        drop(file);
        let after = CacheKey::derive(&path, RequestedSide::Bounded(64));
        assert_ne!(before, after);
        let _ = fs::remove_dir_all(&dir);
    }
}
