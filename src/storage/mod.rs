//! Filesystem abstraction for persistent state.
//!
//! Every persistent artifact of the core (configuration registry,
//! transaction slots, meter side files, charging profiles, reservations,
//! the local authorization list) is a small flat JSON file addressed by
//! name. The host decides where those names land: a directory on a real
//! filesystem, or memory for tests.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub mod memory;
pub mod std_fs;

pub use memory::MemoryFilesystem;
pub use std_fs::StdFilesystem;

/// Shared handle to the mounted filesystem.
pub type SharedFilesystem = Arc<dyn FilesystemAdapter>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failure on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Mount failed: {0}")]
    Mount(String),

    #[error("Serialization failure on {name}: {source}")]
    Serde {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Mount options, consumed once at init.
#[derive(Debug, Clone)]
pub struct FilesystemOpt {
    /// Directory (or name prefix) prepended to every file name.
    pub path_prefix: std::path::PathBuf,
    /// Recreate the backing directory from scratch if mounting fails.
    pub format_on_fail: bool,
}

impl FilesystemOpt {
    pub fn new(path_prefix: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            format_on_fail: false,
        }
    }

    pub fn format_on_fail(mut self, yes: bool) -> Self {
        self.format_on_fail = yes;
        self
    }
}

/// Flat key/value file store.
///
/// Names never contain path separators; implementations map them under
/// their configured prefix. `write` must replace atomically: a crash mid
/// write leaves either the old content or the new, never a torn file.
pub trait FilesystemAdapter: Send + Sync {
    /// Size in bytes, or `None` if the file does not exist.
    fn stat(&self, name: &str) -> Option<u64>;

    fn read(&self, name: &str) -> StorageResult<Vec<u8>>;

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Returns `Ok(true)` if a file was removed, `Ok(false)` if it did not
    /// exist.
    fn remove(&self, name: &str) -> StorageResult<bool>;

    /// Visit every stored file name starting with `prefix`.
    fn visit(&self, prefix: &str, visitor: &mut dyn FnMut(&str)) -> StorageResult<()>;
}

/// Load and deserialize a JSON file; `Ok(None)` if absent.
pub fn load_json<T: DeserializeOwned>(
    fs: &dyn FilesystemAdapter,
    name: &str,
) -> StorageResult<Option<T>> {
    if fs.stat(name).is_none() {
        return Ok(None);
    }
    let bytes = fs.read(name)?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(source) => Err(StorageError::Serde {
            name: name.to_string(),
            source,
        }),
    }
}

/// Serialize and store a JSON file atomically.
pub fn store_json<T: Serialize>(
    fs: &dyn FilesystemAdapter,
    name: &str,
    value: &T,
) -> StorageResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Serde {
        name: name.to_string(),
        source,
    })?;
    fs.write(name, &bytes)
}

/// Best-effort removal used on cleanup paths where a failure is only worth
/// a log line.
pub fn remove_silent(fs: &dyn FilesystemAdapter, name: &str) {
    if let Err(e) = fs.remove(name) {
        warn!(name, error = %e, "could not remove file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Probe {
        n: i32,
        s: String,
    }

    #[test]
    fn json_helpers_roundtrip() {
        let fs = MemoryFilesystem::new();
        assert_eq!(load_json::<Probe>(&fs, "probe.json").unwrap(), None);

        let v = Probe {
            n: 7,
            s: "x".into(),
        };
        store_json(&fs, "probe.json", &v).unwrap();
        assert_eq!(load_json::<Probe>(&fs, "probe.json").unwrap(), Some(v));
    }

    #[test]
    fn corrupt_json_is_an_error_not_a_panic() {
        let fs = MemoryFilesystem::new();
        fs.write("bad.json", b"{not json").unwrap();
        assert!(load_json::<Probe>(&fs, "bad.json").is_err());
    }
}
