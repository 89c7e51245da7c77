//! Core type definitions for the points ledger.
//!
//! These are the persisted shapes: the canonical ledger record, the
//! hash-chained transaction log entries, the reward window state, and the
//! portable backup snapshot. All of them cross into storage as JSON through
//! the obfuscation codec.

use std::fmt;

use serde::{Deserialize, Serialize};

// Identifiers

/// A stable, opaque per-installation device identifier.
///
/// Generated once per install and persisted in the most secure backend
/// available. The device secret that feeds the obfuscation codec is derived
/// from this value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps an existing identifier string.
    #[must_use]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Generates a new random device identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Generates a session-scoped fallback identifier, used when the secure
    /// backend cannot persist a stable one.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self(format!("ephemeral-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is a session-scoped fallback id.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with("ephemeral-")
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<[u8]> for DeviceId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// A unique transaction identifier.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generates a new random transaction id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Ledger record

/// The canonical aggregate balance record.
///
/// Invariants:
/// - `balance == total_earned - total_spent` within one rounding unit
/// - `0 <= balance <= max_points`
/// - `integrity_hash` recomputes deterministically from the other fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Current spendable balance.
    pub balance: u64,
    /// Lifetime points earned.
    pub total_earned: u64,
    /// Lifetime points spent.
    pub total_spent: u64,
    /// Lifetime count of rate-limited reward events.
    pub reward_events_total: u64,
    /// Reward events recorded in the current window.
    pub reward_events_in_window: u32,
    /// Timestamp of the last reward event, in unix milliseconds.
    pub last_event_at_ms: u64,
    /// Device the record was last written by.
    pub device_id: DeviceId,
    /// Creation timestamp, unix milliseconds.
    pub created_at_ms: u64,
    /// Last mutation timestamp, unix milliseconds.
    pub updated_at_ms: u64,
    /// Content hash binding all fields above.
    pub integrity_hash: String,
}

impl LedgerRecord {
    /// Checks the accounting identity `balance == total_earned - total_spent`
    /// within one rounding unit.
    #[must_use]
    pub fn accounting_holds(&self) -> bool {
        let expected = i128::from(self.total_earned) - i128::from(self.total_spent);
        (i128::from(self.balance) - expected).abs() <= 1
    }
}

// Transactions

/// The kind of a balance mutation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionKind {
    /// Points credited by an ordinary earn action.
    Earn,
    /// Points debited.
    Spend,
    /// Points credited by a rate-limited reward event.
    Grant,
    /// Initial seeding on first run.
    Init,
    /// Seeding from a backup snapshot or transfer merge.
    Restore,
}

/// Sentinel `prev_hash` value for the first entry of a chain.
pub const GENESIS_HASH: &str = "genesis";

/// One entry of the hash-linked transaction log.
///
/// `chain[i].prev_hash == chain[i - 1].hash`; the first retained entry of a
/// fresh chain carries [`GENESIS_HASH`]. Each entry's `hash` recomputes
/// deterministically from its own fields, so any edit is detectable even
/// after the head of the chain has been trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique transaction id.
    pub id: TransactionId,
    /// Mutation kind.
    pub kind: TransactionKind,
    /// Magnitude of the balance delta.
    pub amount: u64,
    /// Balance immediately after this mutation.
    pub balance_after: u64,
    /// Timestamp, unix milliseconds.
    pub timestamp_ms: u64,
    /// Hash of the previous entry, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// Content hash of this entry.
    pub hash: String,
    /// Device that recorded the entry.
    pub device_id: DeviceId,
    /// Free-form caller-supplied context (e.g. the earn reason).
    pub metadata: Option<String>,
}

/// Result of walking a transaction chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVerification {
    /// `true` when every link and hash checks out.
    pub valid: bool,
    /// Index of the first broken entry, when invalid.
    pub first_invalid: Option<usize>,
}

impl ChainVerification {
    /// A verification result for an intact chain.
    pub const VALID: Self = Self {
        valid: true,
        first_invalid: None,
    };

    /// A verification result pointing at the first broken entry.
    #[must_use]
    pub const fn broken_at(index: usize) -> Self {
        Self {
            valid: false,
            first_invalid: Some(index),
        }
    }
}

// Reward window

/// Persisted state of the reward rate-limit window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardWindowState {
    /// Grants recorded in the current window.
    pub count: u32,
    /// When the window rolls over, unix milliseconds.
    pub window_reset_at_ms: u64,
    /// Timestamp of the last grant, unix milliseconds.
    pub last_event_at_ms: u64,
}

impl RewardWindowState {
    /// A fresh window starting at `now_ms` with the given nominal length.
    #[must_use]
    pub const fn fresh(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_reset_at_ms: now_ms + window_ms,
            last_event_at_ms: 0,
        }
    }
}

// Backup

/// A portable, single-use encoded copy of the ledger aggregates.
///
/// Used both for reinstall restore and user-initiated cross-device transfer.
/// Redemption merges by taking the maximum of local and snapshot balances
/// and never decreases the local balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Short single-use transfer code.
    pub code: String,
    /// Serialized aggregate payload.
    pub encoded_payload: String,
    /// SHA-256 checksum of the payload.
    pub checksum: String,
    /// Expiry horizon, unix milliseconds.
    pub expires_at_ms: u64,
}
