//! Offline, tamper-evident points ledger for embedding in mobile apps.
//!
//! The engine keeps a virtual-currency balance entirely on-device: no
//! server, no network. It defends against casual tampering (file edits,
//! backup restores, clock changes) with an obfuscation codec, redundant
//! multi-backend storage, content hashes, a bounded hash-linked
//! transaction log, and rate-limited reward grants. It is tamper-*evident*
//! rather than tamper-proof: a motivated attacker with a debugger wins,
//! and the design accepts that.
//!
//! The host app provides [`store::StorageBackend`] implementations for its
//! platform storage locations and drives everything through [`Ledger`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use pointskit_core::{Ledger, LedgerConfig};
//! use pointskit_core::store::{BackendTier, StorageBackend};
//! use pointskit_core::store::memory::MemoryBackend;
//!
//! # async fn demo() -> Result<(), pointskit_core::LedgerError> {
//! let backends: Vec<Arc<dyn StorageBackend>> = vec![
//!     Arc::new(MemoryBackend::new("secure", BackendTier::Secure)),
//!     Arc::new(MemoryBackend::new("cache", BackendTier::Cache)),
//! ];
//! let ledger = Ledger::open(backends, LedgerConfig::default()).await?;
//! let _balance = ledger.earn(50, Some("ad watched".to_string())).await?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod chain;
pub mod codec;
pub mod defaults;
pub mod device;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod logger;
pub mod ratelimit;
pub mod retry;
pub mod store;
pub mod types;

pub use backup::{BackupPayload, BackupSyncAgent, MergeOutcome};
pub use chain::TransactionChain;
pub use codec::ObfuscationCodec;
pub use device::DeviceIdentity;
pub use error::{LedgerError, LedgerResult};
pub use integrity::{DeviceIdPolicy, IntegrityGuard};
pub use ledger::{
    GrantOutcome, Ledger, LedgerConfig, LedgerEvent, NotificationSink, SubscriptionId,
};
pub use logger::{set_logger, LogLevel, Logger};
pub use ratelimit::{RateLimiter, RewardPolicy, RewardQuota};
pub use retry::RetryPolicy;
pub use types::{
    BackupSnapshot, ChainVerification, DeviceId, LedgerRecord, TransactionId, TransactionKind,
    TransactionRecord,
};
