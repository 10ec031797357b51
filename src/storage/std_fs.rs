//! Filesystem adapter over `std::fs` with atomic replace semantics.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{FilesystemAdapter, FilesystemOpt, StorageError, StorageResult};

/// Stores each name as a file directly under the configured directory.
pub struct StdFilesystem {
    root: PathBuf,
}

impl StdFilesystem {
    /// Mount the backing directory, creating it if needed. With
    /// `format_on_fail`, a directory that exists but cannot be used is
    /// wiped and recreated once.
    pub fn mount(opt: FilesystemOpt) -> StorageResult<Self> {
        match fs::create_dir_all(&opt.path_prefix) {
            Ok(()) => {}
            Err(e) if opt.format_on_fail => {
                warn!(path = %opt.path_prefix.display(), error = %e, "mount failed, formatting");
                let _ = fs::remove_dir_all(&opt.path_prefix);
                fs::create_dir_all(&opt.path_prefix)
                    .map_err(|e| StorageError::Mount(e.to_string()))?;
            }
            Err(e) => return Err(StorageError::Mount(e.to_string())),
        }
        info!(path = %opt.path_prefix.display(), "filesystem mounted");
        Ok(Self {
            root: opt.path_prefix,
        })
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn io_err(name: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            name: name.to_string(),
            source,
        }
    }
}

impl FilesystemAdapter for StdFilesystem {
    fn stat(&self, name: &str) -> Option<u64> {
        fs::metadata(self.path_of(name))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    fn read(&self, name: &str) -> StorageResult<Vec<u8>> {
        fs::read(self.path_of(name)).map_err(|e| Self::io_err(name, e))
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        // Write-then-rename so a crash never leaves a torn file behind.
        let tmp = self.path_of(&format!("{name}.tmp"));
        let target = self.path_of(name);
        let mut f = fs::File::create(&tmp).map_err(|e| Self::io_err(name, e))?;
        f.write_all(data).map_err(|e| Self::io_err(name, e))?;
        f.sync_all().map_err(|e| Self::io_err(name, e))?;
        drop(f);
        fs::rename(&tmp, &target).map_err(|e| Self::io_err(name, e))
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err(name, e)),
        }
    }

    fn visit(&self, prefix: &str, visitor: &mut dyn FnMut(&str)) -> StorageResult<()> {
        let entries = fs::read_dir(&self.root).map_err(|e| Self::io_err(prefix, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(prefix) && !name.ends_with(".tmp"))
            .collect();
        names.sort();
        for name in names {
            visitor(&name);
        }
        Ok(())
    }
}

impl std::fmt::Debug for StdFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdFilesystem")
            .field("root", &self.root)
            .finish()
    }
}
