//! Filesystem helpers shared by the stores.
//!
//! All persistent state (manifest, resume files, query config, local
//! collections) is written with the same temp-file-then-rename discipline
//! so a crash never leaves a half-written file behind.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{IndexError, Result};

/// Writes `content` to `path` atomically.
///
/// Stages the bytes in a temporary file in the target's directory, then
/// renames over the destination. Readers see either the old file or the
/// new one, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialises `value` as pretty JSON and writes it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write(path, &bytes).map_err(|e| IndexError::io(path, e))
}

/// Reads a JSON file, returning `None` when it does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::io(path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_creates_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_read_json_opt_absent() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<serde_json::Value> =
            read_json_opt(&dir.path().join("missing.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        let back: Option<serde_json::Value> = read_json_opt(&path).unwrap();
        assert_eq!(back.unwrap()["a"], 1);
    }
}
