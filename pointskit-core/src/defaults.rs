//! Product defaults and storage key names.

use std::time::{SystemTime, UNIX_EPOCH};

/// Hard ceiling on the ledger balance.
pub const MAX_POINTS: u64 = 1_000_000;

/// Balance seeded on first run.
pub const INITIAL_BALANCE: u64 = 2_500;

/// Points credited per rate-limited reward event.
pub const REWARD_EVENT_POINTS: u64 = 50;

/// Retained length of the transaction chain. Older entries are trimmed from
/// the head and are no longer independently auditable.
pub const CHAIN_CAP: usize = 50;

/// Minimum spacing between reward grants.
pub const MIN_EVENT_SPACING_MS: u64 = 30_000;

/// Nominal reward window length.
pub const REWARD_WINDOW_MS: u64 = 3_600_000;

/// Maximum grants per reward window.
pub const REWARD_WINDOW_CAP: u32 = 20;

/// Single earns at or above this are flagged for audit (not blocked).
pub const LARGE_EARN_AUDIT_THRESHOLD: u64 = 1_000;

/// Validity horizon of a cross-device transfer code.
pub const TRANSFER_CODE_TTL_MS: u64 = 15 * 60 * 1_000;

/// Iterated-hash rounds when deriving the codec keystream seed.
pub const KEYSTREAM_ROUNDS: u32 = 64;

/// Largest payload the obfuscation codec will accept.
pub const MAX_CODEC_PAYLOAD_BYTES: usize = 32 * 1024;

// Storage keys. Every backend sees the same key namespace.

/// Key of the canonical ledger record.
pub const KEY_LEDGER: &str = "pointskit.ledger";
/// Primary key of the transaction chain.
pub const KEY_CHAIN: &str = "pointskit.chain";
/// Mirror key of the transaction chain.
pub const KEY_CHAIN_MIRROR: &str = "pointskit.chain.mirror";
/// Key of the reward window state.
pub const KEY_WINDOW: &str = "pointskit.reward-window";
/// Key of the periodic backup slot.
pub const KEY_BACKUP: &str = "pointskit.backup";
/// Key of the stable device identifier.
pub const KEY_DEVICE_ID: &str = "pointskit.device-id";
/// Key of the plain last-known-balance scalar for degraded reads.
pub const KEY_LAST_BALANCE: &str = "pointskit.last-balance";

/// Storage key of a transfer snapshot bound to `code`.
#[must_use]
pub fn transfer_key(code: &str) -> String {
    format!("pointskit.transfer.{code}")
}

/// Current unix time in milliseconds.
///
/// Clamps to zero if the system clock reads before the epoch rather than
/// panicking inside the engine.
#[must_use]
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_time_ms_is_sane() {
        // Well past 2020-01-01 in milliseconds.
        assert!(unix_time_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_transfer_key_namespacing() {
        assert_eq!(transfer_key("AB12CD34"), "pointskit.transfer.AB12CD34");
    }
}
