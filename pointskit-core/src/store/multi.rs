//! The multi-tier store: quorum writes, validated reads, self-healing.

use std::sync::Arc;

use backon::Retryable;

use crate::codec::ObfuscationCodec;
use crate::defaults::{KEY_LAST_BALANCE, KEY_LEDGER};
use crate::error::{LedgerError, LedgerResult};
use crate::integrity::IntegrityGuard;
use crate::retry::RetryPolicy;
use crate::types::LedgerRecord;

use super::StorageBackend;

/// Outcome of probing one backend during a reconciling read.
enum Candidate<T> {
    Valid(T),
    Missing,
    Invalid,
}

/// Replicates encoded payloads across N independent backends.
///
/// Writes succeed once at least two backends accept the payload (all of
/// them, when fewer than two are configured). Reads reconcile across every
/// backend and heal the ones that fell behind.
pub struct MultiTierStore {
    backends: Vec<Arc<dyn StorageBackend>>,
    codec: ObfuscationCodec,
    guard: Arc<IntegrityGuard>,
    retry: RetryPolicy,
}

impl MultiTierStore {
    /// Creates a store over the given backends.
    ///
    /// # Panics
    ///
    /// Panics if `backends` is empty; the engine cannot run without at
    /// least one persistence location.
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn StorageBackend>>,
        codec: ObfuscationCodec,
        guard: Arc<IntegrityGuard>,
        retry: RetryPolicy,
    ) -> Self {
        assert!(!backends.is_empty(), "at least one storage backend required");
        Self {
            backends,
            codec,
            guard,
            retry,
        }
    }

    /// Number of backends that must accept a write.
    fn quorum(&self) -> usize {
        self.backends.len().min(2)
    }

    async fn write_one(
        &self,
        backend: &Arc<dyn StorageBackend>,
        key: &str,
        value: &str,
    ) -> LedgerResult<()> {
        (|| async { backend.write(key, value) })
            .retry(self.retry.backoff())
            .await
    }

    /// Writes an already-encoded value to every backend, requiring quorum.
    async fn replicate(&self, key: &str, encoded: &str) -> LedgerResult<()> {
        let mut accepted = 0usize;
        for backend in &self.backends {
            match self.write_one(backend, key, encoded).await {
                Ok(()) => accepted += 1,
                Err(err) => {
                    log::warn!(
                        "backend '{}' rejected write of '{key}' after retries: {err}",
                        backend.name()
                    );
                }
            }
        }

        if accepted < self.quorum() {
            return Err(LedgerError::storage(format!(
                "only {accepted} of {} backends accepted '{key}' (quorum {})",
                self.backends.len(),
                self.quorum()
            )));
        }
        Ok(())
    }

    /// Persists the canonical ledger record to all backends.
    ///
    /// Also refreshes the plain last-known-balance scalar used for
    /// degraded-mode reads; that side channel is best-effort only.
    ///
    /// # Errors
    ///
    /// Returns a storage error if fewer than the quorum of backends accept
    /// the write. The caller's in-memory state must not advance in that
    /// case (all-or-nothing mutation).
    pub async fn write_record(&self, record: &LedgerRecord) -> LedgerResult<()> {
        let json = serde_json::to_string(record)?;
        let encoded = self.codec.encode(&json)?;
        self.replicate(KEY_LEDGER, &encoded).await?;

        let balance = record.balance.to_string();
        for backend in &self.backends {
            if let Err(err) = backend.write(KEY_LAST_BALANCE, &balance) {
                log::debug!(
                    "backend '{}' failed last-balance refresh: {err}",
                    backend.name()
                );
            }
        }
        Ok(())
    }

    /// Reads and reconciles the ledger record across all backends.
    ///
    /// Every candidate is decoded and validated through the integrity
    /// guard; the most recently updated valid candidate wins and is
    /// re-propagated to backends that were missing, stale, or invalid.
    /// Returns `Ok(None)` only when zero backends yield a valid candidate.
    ///
    /// # Errors
    ///
    /// Returns a storage error only for serialization failures while
    /// healing; unreadable backends are tolerated and logged.
    pub async fn read_record(&self) -> LedgerResult<Option<LedgerRecord>> {
        let mut candidates: Vec<Candidate<LedgerRecord>> =
            Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let candidate = match backend.read(KEY_LEDGER) {
                Ok(Some(raw)) => match self.decode_record(&raw) {
                    Ok(record) => Candidate::Valid(record),
                    Err(err) => {
                        log::warn!(
                            "backend '{}' holds an invalid ledger record: {err}",
                            backend.name()
                        );
                        Candidate::Invalid
                    }
                },
                Ok(None) => Candidate::Missing,
                Err(err) => {
                    log::warn!("backend '{}' unreadable: {err}", backend.name());
                    Candidate::Invalid
                }
            };
            candidates.push(candidate);
        }

        let winner = candidates
            .iter()
            .filter_map(|c| match c {
                Candidate::Valid(record) => Some(record),
                _ => None,
            })
            .max_by_key(|record| record.updated_at_ms)
            .cloned();

        let Some(winner) = winner else {
            return Ok(None);
        };

        // Self-heal: push the winner back to every backend that lacks it.
        let json = serde_json::to_string(&winner)?;
        let encoded = self.codec.encode(&json)?;
        for (backend, candidate) in self.backends.iter().zip(&candidates) {
            let needs_heal = match candidate {
                Candidate::Valid(record) => record.updated_at_ms < winner.updated_at_ms,
                Candidate::Missing | Candidate::Invalid => true,
            };
            if needs_heal {
                if let Err(err) = backend.write(KEY_LEDGER, &encoded) {
                    log::warn!("failed to heal backend '{}': {err}", backend.name());
                } else {
                    log::info!("healed ledger record on backend '{}'", backend.name());
                }
            }
        }

        Ok(Some(winner))
    }

    fn decode_record(&self, raw: &str) -> LedgerResult<LedgerRecord> {
        let json = self.codec.decode(raw)?;
        let record: LedgerRecord = serde_json::from_str(&json)?;
        self.guard.validate(&record)?;
        Ok(record)
    }

    /// Encodes and replicates an arbitrary payload under `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if fewer than the quorum of backends accept
    /// the write, or a codec error for oversized payloads.
    pub async fn write_blob(&self, key: &str, plaintext: &str) -> LedgerResult<()> {
        let encoded = self.codec.encode(plaintext)?;
        self.replicate(key, &encoded).await
    }

    /// Reads a payload under `key`, healing backends that lack it.
    ///
    /// Returns the first candidate that decodes cleanly; backends holding
    /// nothing or garbage are re-seeded with it.
    ///
    /// # Errors
    ///
    /// Never fails for unreadable backends; those are logged and skipped.
    pub async fn read_blob(&self, key: &str) -> LedgerResult<Option<String>> {
        let mut candidates: Vec<Candidate<String>> = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let candidate = match backend.read(key) {
                Ok(Some(raw)) => match self.codec.decode(&raw) {
                    Ok(plaintext) => Candidate::Valid(plaintext),
                    Err(err) => {
                        log::warn!(
                            "backend '{}' holds undecodable '{key}': {err}",
                            backend.name()
                        );
                        Candidate::Invalid
                    }
                },
                Ok(None) => Candidate::Missing,
                Err(err) => {
                    log::warn!("backend '{}' unreadable: {err}", backend.name());
                    Candidate::Invalid
                }
            };
            candidates.push(candidate);
        }

        let winner = candidates.iter().find_map(|c| match c {
            Candidate::Valid(plaintext) => Some(plaintext.clone()),
            _ => None,
        });

        let Some(winner) = winner else {
            return Ok(None);
        };

        let encoded = self.codec.encode(&winner)?;
        for (backend, candidate) in self.backends.iter().zip(&candidates) {
            if matches!(candidate, Candidate::Missing | Candidate::Invalid) {
                if let Err(err) = backend.write(key, &encoded) {
                    log::warn!(
                        "failed to heal '{key}' on backend '{}': {err}",
                        backend.name()
                    );
                }
            }
        }

        Ok(Some(winner))
    }

    /// Deletes `key` from every backend, best-effort.
    pub fn delete_blob(&self, key: &str) {
        for backend in &self.backends {
            if let Err(err) = backend.delete(key) {
                log::warn!(
                    "failed to delete '{key}' from backend '{}': {err}",
                    backend.name()
                );
            }
        }
    }

    /// Degraded-mode accessor: the plain last-known-balance scalar.
    ///
    /// Used when no backend yields a decodable record; the value is
    /// display-only and never feeds a mutation.
    #[must_use]
    pub fn last_known_balance(&self) -> Option<u64> {
        for backend in &self.backends {
            if let Ok(Some(raw)) = backend.read(KEY_LAST_BALANCE) {
                if let Ok(balance) = raw.trim().parse::<u64>() {
                    return Some(balance);
                }
            }
        }
        None
    }
}
