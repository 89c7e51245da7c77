//! Backup snapshots, reinstall restore, and cross-device transfer codes.
//!
//! The agent periodically serializes the ledger aggregates (never the full
//! chain) into a backup slot, seeds a fresh install from that slot, and
//! supports a user-initiated transfer path: a short single-use code bound
//! to an encoded snapshot, expiring after a fixed horizon. Redemption
//! merges by taking the **maximum** of the local and snapshot balances,
//! never the sum, and the pre-merge local balance never decreases.

use std::sync::Arc;

use rand::Rng;
use secrecy::SecretBox;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::ObfuscationCodec;
use crate::defaults::{transfer_key, KEY_BACKUP, TRANSFER_CODE_TTL_MS};
use crate::error::{LedgerError, LedgerResult};
use crate::store::MultiTierStore;
use crate::types::{BackupSnapshot, DeviceId, LedgerRecord};

/// Format version of the backup payload.
const BACKUP_VERSION: u32 = 1;

/// Transfer-code character set; excludes look-alike characters.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Transfer-code length.
const CODE_LEN: usize = 8;

/// Aggregate ledger fields carried by a backup or transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPayload {
    /// Payload format version.
    pub version: u32,
    /// Balance at capture time.
    pub balance: u64,
    /// Lifetime earned at capture time.
    pub total_earned: u64,
    /// Lifetime spent at capture time.
    pub total_spent: u64,
    /// Device that captured the payload.
    pub device_id: DeviceId,
    /// Capture timestamp, unix milliseconds.
    pub captured_at_ms: u64,
}

/// Result of redeeming a transfer code against the local balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Balance after the max-merge.
    pub merged_balance: u64,
    /// Points credited on top of the local balance (zero when the local
    /// balance already won the merge).
    pub credited: u64,
}

/// Periodic snapshotting, reinstall restore, and one-time transfer codes.
pub struct BackupSyncAgent {
    store: Arc<MultiTierStore>,
    max_points: u64,
}

impl BackupSyncAgent {
    /// Creates an agent over the shared store.
    #[must_use]
    pub const fn new(store: Arc<MultiTierStore>, max_points: u64) -> Self {
        Self { store, max_points }
    }

    /// Serializes the record's aggregate fields into the backup slot.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the quorum write fails.
    pub async fn snapshot(&self, record: &LedgerRecord, now_ms: u64) -> LedgerResult<()> {
        let payload = Self::payload_from(record, now_ms);
        let json = serde_json::to_string(&payload)?;
        self.store.write_blob(KEY_BACKUP, &json).await?;
        log::debug!("backup snapshot captured at balance {}", record.balance);
        Ok(())
    }

    /// Reads the backup slot for seeding a fresh install.
    ///
    /// Returns `Ok(None)` when no usable backup exists; an out-of-bounds
    /// payload is discarded with a log line rather than surfaced.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the slot read.
    pub async fn restore(&self) -> LedgerResult<Option<BackupPayload>> {
        let Some(raw) = self.store.read_blob(KEY_BACKUP).await? else {
            return Ok(None);
        };
        let payload: BackupPayload = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("backup slot holds malformed payload: {err}");
                return Ok(None);
            }
        };
        if let Err(err) = self.sanity_check(&payload) {
            log::warn!("backup payload failed sanity checks: {err}");
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Generates a single-use transfer code bound to an encoded snapshot.
    ///
    /// The snapshot payload is obfuscated under a secret derived from the
    /// code itself, so it stays portable across devices while remaining
    /// opaque at rest.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error if the snapshot cannot be stored.
    pub async fn create_transfer_code(
        &self,
        record: &LedgerRecord,
        now_ms: u64,
    ) -> LedgerResult<BackupSnapshot> {
        let code = Self::generate_code();
        let payload = Self::payload_from(record, now_ms);
        let json = serde_json::to_string(&payload)?;

        let codec = ObfuscationCodec::new(Self::transfer_secret(&code));
        let snapshot = BackupSnapshot {
            code: code.clone(),
            encoded_payload: codec.encode(&json)?,
            checksum: hex::encode(Sha256::digest(json.as_bytes())),
            expires_at_ms: now_ms + TRANSFER_CODE_TTL_MS,
        };

        self.store
            .write_blob(&transfer_key(&code), &serde_json::to_string(&snapshot)?)
            .await?;
        log::info!("transfer code issued, expires at {}", snapshot.expires_at_ms);
        Ok(snapshot)
    }

    /// Redeems a transfer code against the local balance.
    ///
    /// Merge policy is max-of-both: the outcome's balance is
    /// `max(local_balance, snapshot balance)` and never decreases the
    /// local one. The slot is deleted before returning, so a second
    /// redemption of the same code fails instead of double-crediting.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transfer error for unknown, expired, or
    /// checksum-failing codes.
    pub async fn redeem_transfer_code(
        &self,
        code: &str,
        local_balance: u64,
        now_ms: u64,
    ) -> LedgerResult<MergeOutcome> {
        let key = transfer_key(code);
        let Some(raw) = self.store.read_blob(&key).await? else {
            return Err(LedgerError::transfer("unknown or already redeemed code"));
        };
        let snapshot: BackupSnapshot = serde_json::from_str(&raw)?;

        if now_ms > snapshot.expires_at_ms {
            self.store.delete_blob(&key);
            return Err(LedgerError::transfer("code has expired"));
        }

        let codec = ObfuscationCodec::new(Self::transfer_secret(code));
        let json = codec
            .decode(&snapshot.encoded_payload)
            .map_err(|_| LedgerError::transfer("snapshot payload is unreadable"))?;

        if hex::encode(Sha256::digest(json.as_bytes())) != snapshot.checksum {
            return Err(LedgerError::transfer("snapshot checksum mismatch"));
        }

        let payload: BackupPayload = serde_json::from_str(&json)?;
        self.sanity_check(&payload)?;

        // Single-use: consume the slot before reporting success.
        self.store.delete_blob(&key);

        let merged_balance = local_balance.max(payload.balance);
        Ok(MergeOutcome {
            merged_balance,
            credited: merged_balance - local_balance,
        })
    }

    fn payload_from(record: &LedgerRecord, now_ms: u64) -> BackupPayload {
        BackupPayload {
            version: BACKUP_VERSION,
            balance: record.balance,
            total_earned: record.total_earned,
            total_spent: record.total_spent,
            device_id: record.device_id.clone(),
            captured_at_ms: now_ms,
        }
    }

    fn sanity_check(&self, payload: &BackupPayload) -> LedgerResult<()> {
        if payload.version > BACKUP_VERSION {
            return Err(LedgerError::transfer(format!(
                "unsupported payload version {}",
                payload.version
            )));
        }
        if payload.balance > self.max_points {
            return Err(LedgerError::transfer(format!(
                "payload balance {} exceeds ceiling {}",
                payload.balance, self.max_points
            )));
        }
        Ok(())
    }

    fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..CODE_ALPHABET.len());
                char::from(CODE_ALPHABET[idx])
            })
            .collect()
    }

    /// Derives the portable obfuscation secret from a transfer code.
    fn transfer_secret(code: &str) -> SecretBox<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(b"pointskit:transfer-secret:v1");
        hasher.update(code.as_bytes());
        let digest = hasher.finalize();
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&digest);
        SecretBox::new(Box::new(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::integrity::{record_hash, DeviceIdPolicy, IntegrityGuard};
    use crate::retry::RetryPolicy;
    use crate::store::memory::MemoryBackend;
    use crate::store::{BackendTier, StorageBackend};

    fn agent_fixture() -> (BackupSyncAgent, Arc<MultiTierStore>, DeviceId) {
        let device_id = DeviceId::new("device-test");
        let secret = DeviceIdentity::device_secret(&device_id);
        let backends: Vec<Arc<dyn StorageBackend>> = vec![
            Arc::new(MemoryBackend::new("a", BackendTier::Durable)),
            Arc::new(MemoryBackend::new("b", BackendTier::Cache)),
        ];
        let guard = Arc::new(IntegrityGuard::new(
            device_id.clone(),
            DeviceIdPolicy::FlagAndContinue,
            1_000_000,
        ));
        let store = Arc::new(MultiTierStore::new(
            backends,
            ObfuscationCodec::new(secret),
            guard,
            RetryPolicy::no_retries(),
        ));
        (
            BackupSyncAgent::new(Arc::clone(&store), 1_000_000),
            store,
            device_id,
        )
    }

    fn sample_record(device_id: &DeviceId, balance: u64) -> LedgerRecord {
        let mut record = LedgerRecord {
            balance,
            total_earned: balance,
            total_spent: 0,
            reward_events_total: 0,
            reward_events_in_window: 0,
            last_event_at_ms: 0,
            device_id: device_id.clone(),
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
            integrity_hash: String::new(),
        };
        record.integrity_hash = record_hash(&record);
        record
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let (agent, _store, device_id) = agent_fixture();
        let record = sample_record(&device_id, 2_750);

        agent.snapshot(&record, 5_000).await.unwrap();
        let payload = agent.restore().await.unwrap().unwrap();

        assert_eq!(payload.balance, 2_750);
        assert_eq!(payload.total_earned, 2_750);
        assert_eq!(payload.device_id, device_id);
        assert_eq!(payload.captured_at_ms, 5_000);
    }

    #[tokio::test]
    async fn test_restore_without_backup_is_none() {
        let (agent, _store, _device_id) = agent_fixture();
        assert!(agent.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_rejects_out_of_bounds_payload() {
        let (agent, store, device_id) = agent_fixture();
        let payload = BackupPayload {
            version: BACKUP_VERSION,
            balance: 2_000_000, // above ceiling
            total_earned: 2_000_000,
            total_spent: 0,
            device_id,
            captured_at_ms: 1_000,
        };
        store
            .write_blob(KEY_BACKUP, &serde_json::to_string(&payload).unwrap())
            .await
            .unwrap();

        assert!(agent.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transfer_roundtrip_max_merge() {
        let (agent, _store, device_id) = agent_fixture();
        let record = sample_record(&device_id, 3_000);

        let snapshot = agent.create_transfer_code(&record, 1_000).await.unwrap();
        assert_eq!(snapshot.code.len(), CODE_LEN);

        // Local balance lower than the snapshot: credit the difference.
        let outcome = agent
            .redeem_transfer_code(&snapshot.code, 2_500, 2_000)
            .await
            .unwrap();
        assert_eq!(outcome.merged_balance, 3_000);
        assert_eq!(outcome.credited, 500);
    }

    #[tokio::test]
    async fn test_merge_never_decreases_local_balance() {
        let (agent, _store, device_id) = agent_fixture();
        let record = sample_record(&device_id, 1_000);

        let snapshot = agent.create_transfer_code(&record, 1_000).await.unwrap();
        let outcome = agent
            .redeem_transfer_code(&snapshot.code, 5_000, 2_000)
            .await
            .unwrap();

        assert_eq!(outcome.merged_balance, 5_000);
        assert_eq!(outcome.credited, 0);
    }

    #[tokio::test]
    async fn test_double_redeem_never_double_credits() {
        let (agent, _store, device_id) = agent_fixture();
        let record = sample_record(&device_id, 3_000);

        let snapshot = agent.create_transfer_code(&record, 1_000).await.unwrap();
        agent
            .redeem_transfer_code(&snapshot.code, 2_500, 2_000)
            .await
            .unwrap();

        assert!(matches!(
            agent.redeem_transfer_code(&snapshot.code, 3_000, 2_100).await,
            Err(LedgerError::InvalidTransfer { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let (agent, _store, device_id) = agent_fixture();
        let record = sample_record(&device_id, 3_000);

        let snapshot = agent.create_transfer_code(&record, 1_000).await.unwrap();
        let late = snapshot.expires_at_ms + 1;

        assert!(matches!(
            agent.redeem_transfer_code(&snapshot.code, 2_500, late).await,
            Err(LedgerError::InvalidTransfer { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_code_rejected() {
        let (agent, _store, _device_id) = agent_fixture();
        assert!(matches!(
            agent.redeem_transfer_code("NOSUCHCD", 100, 1_000).await,
            Err(LedgerError::InvalidTransfer { .. })
        ));
    }

    #[tokio::test]
    async fn test_tampered_snapshot_checksum_rejected() {
        let (agent, store, device_id) = agent_fixture();
        let record = sample_record(&device_id, 3_000);

        let mut snapshot = agent.create_transfer_code(&record, 1_000).await.unwrap();
        // Swap in a payload claiming a larger balance, keeping the old checksum.
        let forged = BackupPayload {
            version: BACKUP_VERSION,
            balance: 999_999,
            total_earned: 999_999,
            total_spent: 0,
            device_id,
            captured_at_ms: 1_000,
        };
        let forged_json = serde_json::to_string(&forged).unwrap();
        let codec = ObfuscationCodec::new(BackupSyncAgent::transfer_secret(&snapshot.code));
        snapshot.encoded_payload = codec.encode(&forged_json).unwrap();
        store
            .write_blob(
                &transfer_key(&snapshot.code),
                &serde_json::to_string(&snapshot).unwrap(),
            )
            .await
            .unwrap();

        assert!(matches!(
            agent.redeem_transfer_code(&snapshot.code, 2_500, 2_000).await,
            Err(LedgerError::InvalidTransfer { .. })
        ));
    }

    #[test]
    fn test_code_alphabet() {
        let code = BackupSyncAgent::generate_code();
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }
}
