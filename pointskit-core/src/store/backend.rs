//! Storage backend trait for the multi-tier store.
//!
//! Each backend is one independent persistence location (secure enclave
//! preference store, app-private file, plain cache). The multi-tier store
//! replicates every payload across all configured backends and reconciles
//! on read; a single backend is never trusted on its own.

use crate::error::LedgerResult;

/// Relative trust/durability ranking of a backend.
///
/// Ordering matters: `Secure` outranks `Durable` outranks `Cache`. The
/// device identifier is persisted in the highest-ranked backend available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendTier {
    /// Hardware-backed or OS-protected storage (Keychain, Keystore).
    Secure,
    /// App-private durable storage (internal files, preferences).
    Durable,
    /// Best-effort cache storage; may be wiped by the OS.
    Cache,
}

/// One independent persistence backend.
///
/// Values are opaque strings: every payload has already passed through the
/// obfuscation codec (or is an intentionally plain scalar) before it
/// reaches a backend.
///
/// # Implementation Notes
///
/// Writes MUST be atomic: a reader observes either the complete old value
/// or the complete new value, never a partial write. File-based backends
/// use the write-to-temp-then-rename pattern.
pub trait StorageBackend: Send + Sync {
    /// A short human-readable backend name, used in log lines.
    fn name(&self) -> &str;

    /// The backend's trust/durability tier.
    fn tier(&self) -> BackendTier;

    /// Reads a value by key.
    ///
    /// Returns `Ok(None)` when the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read(&self, key: &str) -> LedgerResult<Option<String>>;

    /// Atomically writes a value, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&self, key: &str, value: &str) -> LedgerResult<()>;

    /// Deletes a value.
    ///
    /// Returns `Ok(())` even if the key does not exist; only actual
    /// failures of the underlying store are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying delete fails.
    fn delete(&self, key: &str) -> LedgerResult<()>;
}
