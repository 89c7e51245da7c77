//! In-memory storage backend.
//!
//! Serves two purposes: the `Cache` tier of a production store bundle, and
//! a deterministic backend for unit and integration tests. The fault
//! injection switches exist for tests exercising degraded-mode behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::{LedgerError, LedgerResult};

use super::{BackendTier, StorageBackend};

/// Thread-safe in-memory backend backed by a `HashMap`.
pub struct MemoryBackend {
    name: String,
    tier: BackendTier,
    entries: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    /// Creates a new empty backend with the given name and tier.
    #[must_use]
    pub fn new<S: Into<String>>(name: S, tier: BackendTier) -> Self {
        Self {
            name: name.into(),
            tier,
            entries: RwLock::new(HashMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Clears all stored entries.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Reads a raw value, bypassing the failure switches.
    ///
    /// Intended for tests that tamper with stored payloads directly.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Writes a raw value, bypassing the failure switches.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    /// Makes every subsequent `read` fail until switched back.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `write` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> BackendTier {
        self.tier
    }

    fn read(&self, key: &str) -> LedgerResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::storage(format!(
                "backend '{}' read unavailable",
                self.name
            )));
        }
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> LedgerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::storage(format!(
                "backend '{}' write unavailable",
                self.name
            )));
        }
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> LedgerResult<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }
}
