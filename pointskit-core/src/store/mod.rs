//! Redundant multi-backend persistence.
//!
//! The engine never trusts a single persistence location. Every payload is
//! replicated across all configured backends and reconciled on read: the
//! most recently updated valid candidate wins and is re-propagated to any
//! backend that was missing, stale, or invalid.

mod backend;
mod file;
pub mod memory;
mod multi;

pub use backend::{BackendTier, StorageBackend};
pub use file::FileBackend;
pub use multi::MultiTierStore;
