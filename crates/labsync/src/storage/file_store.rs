//! File-based slot storage.
//!
//! # Directory Structure
//!
//! ```text
//! data/
//! ├── offlineQueue.json      # one file per slot
//! └── offlineQueue.json.tmp  # transient, only during a write
//! ```
//!
//! Writes go to a temporary sibling first and are then renamed over the slot file,
//! so a crash mid-write leaves either the old or the new contents, never a torn file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{SlotStorage, StorageError, StorageResult};

const SLOT_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// File-based implementation of `SlotStorage`
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Base directory for slot files
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the file holding `key`
    pub fn slot_path(&self, key: &str) -> StorageResult<PathBuf> {
        let stem = Self::file_stem(key)?;
        Ok(self.base_path.join(format!("{stem}.{SLOT_EXTENSION}")))
    }

    fn file_stem(key: &str) -> StorageResult<String> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(key.to_string())
    }
}

impl SlotStorage for FileStorage {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.slot_path(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.slot_path(key)?;
        let tmp = path.with_extension(TEMP_EXTENSION);

        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.slot_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (FileStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("slots")).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_creates_base_directory() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.base_path().is_dir());
    }

    #[test]
    fn test_read_missing_slot() {
        let (storage, _temp) = create_test_storage();
        assert_eq!(storage.read("offlineQueue").unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let (storage, _temp) = create_test_storage();
        storage.write("offlineQueue", "[]").unwrap();

        assert_eq!(storage.read("offlineQueue").unwrap().as_deref(), Some("[]"));
        let path = storage.slot_path("offlineQueue").unwrap();
        assert!(path.ends_with("offlineQueue.json"));
        assert!(!path.with_extension(TEMP_EXTENSION).exists());
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::new(temp_dir.path()).unwrap();
            storage.write("queue", "[1,2,3]").unwrap();
        }

        let storage = FileStorage::new(temp_dir.path()).unwrap();
        assert_eq!(storage.read("queue").unwrap().as_deref(), Some("[1,2,3]"));
    }

    #[test]
    fn test_remove() {
        let (storage, _temp) = create_test_storage();
        storage.write("queue", "[]").unwrap();
        storage.remove("queue").unwrap();

        assert_eq!(storage.read("queue").unwrap(), None);
        // Second remove is a no-op
        assert!(storage.remove("queue").is_ok());
    }

    #[test]
    fn test_rejects_path_traversal_keys() {
        let (storage, _temp) = create_test_storage();

        for key in ["", "../escape", "a/b", ".hidden"] {
            let result = storage.write(key, "x");
            assert!(
                matches!(result, Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }
}
