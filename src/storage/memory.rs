//! In-memory filesystem for tests and volatile operation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{FilesystemAdapter, StorageResult};

/// Filesystem that lives entirely in a map. Cheap to clone state out of,
/// and the natural backing for the crash/reboot simulations in the
/// integration tests: keep the `MemoryFilesystem`, drop the charge point,
/// build a new one on top of it.
#[derive(Default)]
pub struct MemoryFilesystem {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names currently stored, in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FilesystemAdapter for MemoryFilesystem {
    fn stat(&self, name: &str) -> Option<u64> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .map(|data| data.len() as u64)
    }

    fn read(&self, name: &str) -> StorageResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| super::StorageError::Io {
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        Ok(self.files.lock().unwrap().remove(name).is_some())
    }

    fn visit(&self, prefix: &str, visitor: &mut dyn FnMut(&str)) -> StorageResult<()> {
        let names: Vec<String> = self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for name in names {
            visitor(&name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_read_write_remove() {
        let fs = MemoryFilesystem::new();
        assert_eq!(fs.stat("a.json"), None);

        fs.write("a.json", b"abc").unwrap();
        assert_eq!(fs.stat("a.json"), Some(3));
        assert_eq!(fs.read("a.json").unwrap(), b"abc");

        assert!(fs.remove("a.json").unwrap());
        assert!(!fs.remove("a.json").unwrap());
        assert!(fs.read("a.json").is_err());
    }

    #[test]
    fn visit_filters_by_prefix() {
        let fs = MemoryFilesystem::new();
        fs.write("tx-1-0.json", b"{}").unwrap();
        fs.write("tx-1-1.json", b"{}").unwrap();
        fs.write("sc-cm-0.json", b"{}").unwrap();

        let mut seen = Vec::new();
        fs.visit("tx-1-", &mut |name| seen.push(name.to_string()))
            .unwrap();
        assert_eq!(seen, vec!["tx-1-0.json", "tx-1-1.json"]);
    }
}
