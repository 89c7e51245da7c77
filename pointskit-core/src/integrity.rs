//! Content hashing and record validation.
//!
//! Hashes are SHA-256 over a canonical `|`-joined field concatenation with
//! a fixed domain-separation label, so a record hash can never collide with
//! a transaction hash of the same field values.

use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{DeviceId, LedgerRecord, TransactionRecord};

/// Domain-separation label for ledger record hashes.
const RECORD_DOMAIN: &str = "pointskit:ledger-record:v1";
/// Domain-separation label for transaction hashes.
const TXN_DOMAIN: &str = "pointskit:transaction:v1";

/// How to treat a record written by a different device.
///
/// A mismatch is expected during legitimate restore-to-new-device flows, so
/// the default tolerates it as a logged anomaly. `Reject` is available for
/// deployments that prefer fraud-resistance over restore convenience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceIdPolicy {
    /// Log the mismatch and continue validating.
    #[default]
    FlagAndContinue,
    /// Treat the mismatch as an integrity failure.
    Reject,
}

/// Computes the canonical content hash of a ledger record.
///
/// Every field except `integrity_hash` itself participates.
#[must_use]
pub fn record_hash(record: &LedgerRecord) -> String {
    let canonical = format!(
        "{RECORD_DOMAIN}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        record.balance,
        record.total_earned,
        record.total_spent,
        record.reward_events_total,
        record.reward_events_in_window,
        record.last_event_at_ms,
        record.device_id,
        record.created_at_ms,
        record.updated_at_ms,
    );
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Computes the canonical content hash of a transaction record.
///
/// Every field except `hash` itself participates; `prev_hash` is included,
/// which is what links the chain.
#[must_use]
pub fn transaction_hash(txn: &TransactionRecord) -> String {
    let canonical = format!(
        "{TXN_DOMAIN}|{}|{}|{}|{}|{}|{}|{}|{}",
        txn.id,
        txn.kind,
        txn.amount,
        txn.balance_after,
        txn.timestamp_ms,
        txn.prev_hash,
        txn.device_id,
        txn.metadata.as_deref().unwrap_or(""),
    );
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Validates ledger records against bounds, the accounting identity, the
/// content hash, and the expected device identity.
pub struct IntegrityGuard {
    device_id: DeviceId,
    policy: DeviceIdPolicy,
    max_points: u64,
}

impl IntegrityGuard {
    /// Creates a guard bound to this install's device id.
    #[must_use]
    pub const fn new(device_id: DeviceId, policy: DeviceIdPolicy, max_points: u64) -> Self {
        Self {
            device_id,
            policy,
            max_points,
        }
    }

    /// Validates one candidate record.
    ///
    /// A device-id mismatch is a soft anomaly under
    /// [`DeviceIdPolicy::FlagAndContinue`] (logged, not rejected), so that
    /// records restored onto a new device remain usable.
    ///
    /// # Errors
    ///
    /// Returns an integrity error for out-of-range fields, a broken
    /// accounting identity, or a hash mismatch.
    pub fn validate(&self, record: &LedgerRecord) -> LedgerResult<()> {
        if record.balance > self.max_points {
            return Err(LedgerError::integrity(format!(
                "balance {} exceeds ceiling {}",
                record.balance, self.max_points
            )));
        }
        if record.total_spent > record.total_earned {
            return Err(LedgerError::integrity(format!(
                "total_spent {} exceeds total_earned {}",
                record.total_spent, record.total_earned
            )));
        }
        if !record.accounting_holds() {
            return Err(LedgerError::integrity(format!(
                "accounting identity broken: balance {} vs earned {} - spent {}",
                record.balance, record.total_earned, record.total_spent
            )));
        }
        if record.created_at_ms == 0 || record.updated_at_ms < record.created_at_ms {
            return Err(LedgerError::integrity("implausible record timestamps"));
        }

        let expected = record_hash(record);
        if record.integrity_hash != expected {
            return Err(LedgerError::integrity("record hash mismatch"));
        }

        if record.device_id != self.device_id {
            match self.policy {
                DeviceIdPolicy::FlagAndContinue => {
                    log::warn!(
                        "ledger record written by device '{}' but running on '{}'; \
                         tolerating (restore flow?)",
                        record.device_id,
                        self.device_id
                    );
                }
                DeviceIdPolicy::Reject => {
                    return Err(LedgerError::integrity(format!(
                        "record belongs to device '{}'",
                        record.device_id
                    )));
                }
            }
        }

        Ok(())
    }

    /// The device id this guard validates against.
    #[must_use]
    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}
