//! In-memory slot storage.
//!
//! Intended for tests and for embedding where persistence across restarts is not
//! required. An optional byte quota reproduces the "quota exceeded" failure mode of
//! browser storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{SlotStorage, StorageError, StorageResult};

/// In-memory implementation of `SlotStorage`
///
/// Thread-safe; share across threads with `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: RwLock<HashMap<String, String>>,
    /// Maximum total bytes across all slots (keys and values)
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    /// Create an unbounded in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that rejects writes once total size would exceed `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of slots currently held
    pub fn slot_count(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total bytes held (keys plus values)
    pub fn used_bytes(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl SlotStorage for MemoryStorage {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(quota) = self.quota_bytes {
            let others: usize = slots
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }

        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_slot_reads_none() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.read("offlineQueue").unwrap(), None);
    }

    #[test]
    fn test_write_overwrites() {
        let storage = MemoryStorage::new();
        storage.write("k", "first").unwrap();
        storage.write("k", "second").unwrap();

        assert_eq!(storage.read("k").unwrap().as_deref(), Some("second"));
        assert_eq!(storage.slot_count(), 1);
    }

    #[test]
    fn test_quota_exceeded() {
        let storage = MemoryStorage::with_quota(10);
        storage.write("k", "12345").unwrap();
        assert_eq!(storage.used_bytes(), 6);

        let result = storage.write("other", "123456");
        assert!(matches!(result, Err(StorageError::QuotaExceeded)));

        // Existing slot unchanged after a rejected write
        assert_eq!(storage.read("k").unwrap().as_deref(), Some("12345"));
    }

    #[test]
    fn test_quota_counts_replacement_not_sum() {
        let storage = MemoryStorage::with_quota(10);
        storage.write("k", "123456789").unwrap();
        // Replacing the same slot frees the old value first
        storage.write("k", "987654321").unwrap();
        assert_eq!(storage.read("k").unwrap().as_deref(), Some("987654321"));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let storage = MemoryStorage::new();
        assert!(storage.remove("nothing").is_ok());
    }
}
