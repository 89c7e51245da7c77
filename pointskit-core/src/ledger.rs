//! The public ledger facade.
//!
//! One `Ledger` instance owns the whole engine: the multi-tier store, the
//! transaction chain, the rate limiter, and the backup agent. Every
//! balance mutation runs inside a single async mutex, so admitted
//! mutations are fully linearized; contention is reported immediately as
//! [`LedgerError::Busy`] rather than queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::backup::BackupSyncAgent;
use crate::chain::TransactionChain;
use crate::codec::ObfuscationCodec;
use crate::defaults::{unix_time_ms, CHAIN_CAP, INITIAL_BALANCE, MAX_POINTS};
use crate::device::DeviceIdentity;
use crate::error::{LedgerError, LedgerResult};
use crate::integrity::{record_hash, DeviceIdPolicy, IntegrityGuard};
use crate::ratelimit::{RateLimiter, RewardPolicy, RewardQuota};
use crate::retry::RetryPolicy;
use crate::store::{MultiTierStore, StorageBackend};
use crate::types::{
    BackupSnapshot, ChainVerification, DeviceId, LedgerRecord, TransactionKind, TransactionRecord,
};

/// Tunable engine configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Hard ceiling on the balance.
    pub max_points: u64,
    /// Balance seeded on first run.
    pub initial_balance: u64,
    /// Retained length of the transaction chain.
    pub chain_cap: usize,
    /// Reward-grant rate limiting policy.
    pub reward_policy: RewardPolicy,
    /// How to treat records written by a different device.
    pub device_id_policy: DeviceIdPolicy,
    /// Backoff policy for storage writes.
    pub retry: RetryPolicy,
    /// Balances at which a threshold notification fires when crossed.
    pub notify_thresholds: Vec<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_points: MAX_POINTS,
            initial_balance: INITIAL_BALANCE,
            chain_cap: CHAIN_CAP,
            reward_policy: RewardPolicy::default(),
            device_id_policy: DeviceIdPolicy::default(),
            retry: RetryPolicy::default(),
            notify_thresholds: Vec::new(),
        }
    }
}

/// Result of a reward-event grant attempt.
///
/// A rate-limited attempt is an ordinary outcome with `granted == false`,
/// not an error: the caller shows `message` and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOutcome {
    /// Whether the points were credited.
    pub granted: bool,
    /// Human-readable outcome description.
    pub message: String,
    /// Balance after the attempt (unchanged when not granted).
    pub new_balance: u64,
}

/// A balance-change event delivered to subscribers.
///
/// Events are advisory: consumers re-read storage for authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Kind of the mutation that produced the event.
    pub kind: TransactionKind,
    /// Magnitude of the balance delta.
    pub amount: u64,
    /// Balance after the mutation.
    pub new_balance: u64,
}

/// Handle returned by [`Ledger::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type EventCallback = Arc<dyn Fn(&LedgerEvent) + Send + Sync>;

/// Host-app hook for user-facing balance notifications.
///
/// Invoked outside the ledger lock when the balance crosses one of the
/// configured thresholds. Implementations must not call back into the
/// ledger's mutating operations.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification to the user.
    fn notify(&self, title: &str, message: &str);
}

/// The points ledger engine.
pub struct Ledger {
    store: Arc<MultiTierStore>,
    chain: TransactionChain,
    limiter: RateLimiter,
    backup: BackupSyncAgent,
    device_id: DeviceId,
    config: LedgerConfig,
    write_lock: Mutex<()>,
    subscribers: std::sync::Mutex<HashMap<u64, EventCallback>>,
    next_subscription: AtomicU64,
    sink: std::sync::Mutex<Option<Arc<dyn NotificationSink>>>,
    untrusted: AtomicBool,
}

impl Ledger {
    /// Opens the ledger over the given storage backends, seeding it on
    /// first run.
    ///
    /// The device identifier is read from (or created in) the
    /// highest-ranked backend. A fresh install seeds `initial_balance`
    /// with an `init` transaction; a fresh install that finds a backup
    /// slot seeds from the snapshot with a `restore` transaction instead.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when `backends` is empty, or a
    /// storage error when the initial record cannot be persisted.
    pub async fn open(
        backends: Vec<Arc<dyn StorageBackend>>,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        let Some(secure) = backends.iter().min_by_key(|b| b.tier()).cloned() else {
            return Err(LedgerError::invalid_input(
                "backends",
                "at least one storage backend is required",
            ));
        };

        let device_id = DeviceIdentity::new(secure).get_or_create();
        let secret = DeviceIdentity::device_secret(&device_id);
        let guard = Arc::new(IntegrityGuard::new(
            device_id.clone(),
            config.device_id_policy,
            config.max_points,
        ));
        let store = Arc::new(MultiTierStore::new(
            backends,
            ObfuscationCodec::new(secret),
            guard,
            config.retry,
        ));

        let ledger = Self {
            chain: TransactionChain::new(Arc::clone(&store), device_id.clone(), config.chain_cap),
            limiter: RateLimiter::new(Arc::clone(&store), config.reward_policy),
            backup: BackupSyncAgent::new(Arc::clone(&store), config.max_points),
            store,
            device_id,
            config,
            write_lock: Mutex::new(()),
            subscribers: std::sync::Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            sink: std::sync::Mutex::new(None),
            untrusted: AtomicBool::new(false),
        };

        ledger.ensure_seeded(unix_time_ms()).await?;
        Ok(ledger)
    }

    /// Installs the host-app notification hook.
    pub fn set_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
    }

    /// The stable device identifier of this installation.
    #[must_use]
    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    async fn ensure_seeded(&self, now_ms: u64) -> LedgerResult<()> {
        if self.store.read_record().await?.is_some() {
            return Ok(());
        }

        if let Some(payload) = self.backup.restore().await? {
            let mut total_earned = payload.total_earned;
            let mut total_spent = payload.total_spent;
            let drift = i128::from(payload.balance)
                - (i128::from(total_earned) - i128::from(total_spent));
            if total_spent > total_earned || drift.abs() > 1 {
                // Inconsistent lifetime totals in an old backup; keep the
                // balance and restart the totals from it.
                total_earned = payload.balance;
                total_spent = 0;
            }
            let record = self.build_record(payload.balance, total_earned, total_spent, 0, now_ms);
            self.store.write_record(&record).await?;
            self.chain
                .append(
                    TransactionKind::Restore,
                    payload.balance,
                    payload.balance,
                    Some("restored-from-backup".to_string()),
                    now_ms,
                )
                .await?;
            log::info!(
                "seeded ledger from backup snapshot at balance {}",
                payload.balance
            );
            return Ok(());
        }

        let record = self.build_record(
            self.config.initial_balance,
            self.config.initial_balance,
            0,
            0,
            now_ms,
        );
        self.store.write_record(&record).await?;
        self.chain
            .append(
                TransactionKind::Init,
                self.config.initial_balance,
                self.config.initial_balance,
                None,
                now_ms,
            )
            .await?;
        log::info!(
            "seeded fresh ledger at balance {}",
            self.config.initial_balance
        );
        Ok(())
    }

    fn build_record(
        &self,
        balance: u64,
        total_earned: u64,
        total_spent: u64,
        reward_events_total: u64,
        now_ms: u64,
    ) -> LedgerRecord {
        let mut record = LedgerRecord {
            balance,
            total_earned,
            total_spent,
            reward_events_total,
            reward_events_in_window: 0,
            last_event_at_ms: 0,
            device_id: self.device_id.clone(),
            created_at_ms: now_ms.max(1),
            updated_at_ms: now_ms.max(1),
            integrity_hash: String::new(),
        };
        record.integrity_hash = record_hash(&record);
        record
    }

    async fn current_record(&self) -> LedgerResult<LedgerRecord> {
        self.store.read_record().await?.ok_or(LedgerError::NotFound)
    }

    /// Persists the mutated record and appends the matching chain entry.
    async fn commit(
        &self,
        mut record: LedgerRecord,
        kind: TransactionKind,
        amount: u64,
        metadata: Option<String>,
        now_ms: u64,
    ) -> LedgerResult<u64> {
        record.updated_at_ms = now_ms.max(record.updated_at_ms);
        record.integrity_hash = record_hash(&record);

        self.store.write_record(&record).await?;
        self.chain
            .append(kind, amount, record.balance, metadata, now_ms)
            .await?;

        self.emit(LedgerEvent {
            kind,
            amount,
            new_balance: record.balance,
        });
        Ok(record.balance)
    }

    /// Credits `amount` points.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Busy`] when another mutation holds the lock,
    /// an invalid-input error for a zero amount or one that would push the
    /// balance past the ceiling, and storage errors on persistence failure.
    pub async fn earn(&self, amount: u64, reason: Option<String>) -> LedgerResult<u64> {
        let _guard = self.write_lock.try_lock().map_err(|_| LedgerError::Busy)?;
        self.earn_locked(amount, reason, unix_time_ms()).await
    }

    async fn earn_locked(
        &self,
        amount: u64,
        reason: Option<String>,
        now_ms: u64,
    ) -> LedgerResult<u64> {
        if amount == 0 {
            return Err(LedgerError::invalid_input("amount", "must be positive"));
        }
        self.limiter.flag_large_earn(amount);

        let mut record = self.current_record().await?;
        let old_balance = record.balance;
        let new_balance = record.balance.saturating_add(amount);
        if new_balance > self.config.max_points {
            return Err(LedgerError::invalid_input(
                "amount",
                format!(
                    "crediting {amount} would exceed the ceiling of {} points",
                    self.config.max_points
                ),
            ));
        }

        record.balance = new_balance;
        record.total_earned = record.total_earned.saturating_add(amount);
        let balance = self
            .commit(record, TransactionKind::Earn, amount, reason, now_ms)
            .await?;
        self.check_thresholds(old_balance, balance);
        Ok(balance)
    }

    /// Debits `amount` points.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Busy`] under contention,
    /// [`LedgerError::InsufficientFunds`] when the balance does not cover
    /// the amount, and an invalid-input error for a zero amount.
    pub async fn spend(&self, amount: u64, reason: Option<String>) -> LedgerResult<u64> {
        let _guard = self.write_lock.try_lock().map_err(|_| LedgerError::Busy)?;
        self.spend_locked(amount, reason, unix_time_ms()).await
    }

    async fn spend_locked(
        &self,
        amount: u64,
        reason: Option<String>,
        now_ms: u64,
    ) -> LedgerResult<u64> {
        if amount == 0 {
            return Err(LedgerError::invalid_input("amount", "must be positive"));
        }

        let mut record = self.current_record().await?;
        if record.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: record.balance,
                requested: amount,
            });
        }
        let old_balance = record.balance;

        record.balance -= amount;
        record.total_spent = record.total_spent.saturating_add(amount);
        let balance = self
            .commit(record, TransactionKind::Spend, amount, reason, now_ms)
            .await?;
        self.check_thresholds(old_balance, balance);
        Ok(balance)
    }

    /// Attempts a rate-limited reward grant at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Busy`] under contention; a rate-limited
    /// attempt is *not* an error, it comes back as an outcome with
    /// `granted == false`.
    pub async fn grant_for_reward_event(&self) -> LedgerResult<GrantOutcome> {
        self.grant_for_reward_event_at(unix_time_ms()).await
    }

    /// Attempts a rate-limited reward grant at an explicit timestamp.
    ///
    /// Exposed for host apps (and tests) that carry their own clock.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::grant_for_reward_event`].
    pub async fn grant_for_reward_event_at(&self, now_ms: u64) -> LedgerResult<GrantOutcome> {
        let _guard = self.write_lock.try_lock().map_err(|_| LedgerError::Busy)?;

        let mut record = self.current_record().await?;
        let old_balance = record.balance;

        if let Err(err) = self.limiter.check(now_ms).await {
            return match err {
                LedgerError::RateLimited { retry_in_ms, reason } => Ok(GrantOutcome {
                    granted: false,
                    message: format!("{reason}; retry in {retry_in_ms} ms"),
                    new_balance: old_balance,
                }),
                other => Err(other),
            };
        }

        let points = self.limiter.policy().grant_points;
        if old_balance.saturating_add(points) > self.config.max_points {
            return Ok(GrantOutcome {
                granted: false,
                message: "balance ceiling reached".to_string(),
                new_balance: old_balance,
            });
        }

        // Consume the window slot first: a crash between here and the
        // commit costs the user one slot, never mints an extra grant.
        let window = self.limiter.record_grant(now_ms).await?;

        record.balance += points;
        record.total_earned = record.total_earned.saturating_add(points);
        record.reward_events_total += 1;
        record.reward_events_in_window = window.count;
        record.last_event_at_ms = now_ms;
        let balance = self
            .commit(record, TransactionKind::Grant, points, None, now_ms)
            .await?;
        self.check_thresholds(old_balance, balance);

        Ok(GrantOutcome {
            granted: true,
            message: format!("granted {points} points"),
            new_balance: balance,
        })
    }

    /// The current balance.
    ///
    /// Falls back to the plain last-known-balance scalar when no backend
    /// yields a decodable record; that degraded value is display-only and
    /// marks the ledger untrusted.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] when neither a record nor a
    /// last-known balance exists.
    pub async fn balance(&self) -> LedgerResult<u64> {
        if let Some(record) = self.store.read_record().await? {
            return Ok(record.balance);
        }
        if let Some(balance) = self.store.last_known_balance() {
            log::warn!("no decodable ledger record; serving last known balance {balance}");
            self.untrusted.store(true, Ordering::SeqCst);
            return Ok(balance);
        }
        Err(LedgerError::NotFound)
    }

    /// The most recent `limit` transactions, in chronological order.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the chain load.
    pub async fn history(&self, limit: usize) -> LedgerResult<Vec<TransactionRecord>> {
        let chain = self.chain.load().await?;
        let skip = chain.len().saturating_sub(limit);
        Ok(chain.into_iter().skip(skip).collect())
    }

    /// Remaining reward-grant quota at the current time.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the window-state load.
    pub async fn remaining_reward_quota(&self) -> LedgerResult<RewardQuota> {
        self.limiter.remaining_quota(unix_time_ms()).await
    }

    /// `false` once a self-check found unrecoverable corruption.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        !self.untrusted.load(Ordering::SeqCst)
    }

    /// Registers a balance-change subscriber.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LedgerEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, Arc::new(callback));
        }
        SubscriptionId(id)
    }

    /// Removes a subscriber. Safe to call repeatedly with the same id.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id.0);
        }
    }

    fn emit(&self, event: LedgerEvent) {
        let callbacks: Vec<EventCallback> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers.values().cloned().collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(&event);
        }
    }

    fn check_thresholds(&self, old_balance: u64, new_balance: u64) {
        let sink = match self.sink.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(sink) = sink else { return };

        for &threshold in &self.config.notify_thresholds {
            if old_balance < threshold && new_balance >= threshold {
                sink.notify(
                    "Points milestone",
                    &format!("Your balance reached {threshold} points"),
                );
            } else if old_balance >= threshold && new_balance < threshold {
                sink.notify(
                    "Points balance low",
                    &format!("Your balance dropped below {threshold} points"),
                );
            }
        }
    }

    /// Runs the full integrity self-check.
    ///
    /// Validates the reconciled record (the read itself re-validates and
    /// heals every backend) and walks the transaction chain. A chain break
    /// that survives the slot reconciliation marks the ledger untrusted;
    /// read-only operation continues, mutations are not blocked.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; a detected break is reported in the
    /// returned verification, not as an error.
    pub async fn verify_integrity(&self) -> LedgerResult<ChainVerification> {
        let record_ok = self.store.read_record().await?.is_some();

        let chain = self.chain.load().await?;
        let verification = TransactionChain::verify(&chain);

        if record_ok && verification.valid {
            self.untrusted.store(false, Ordering::SeqCst);
        } else {
            if let Some(index) = verification.first_invalid {
                log::error!("transaction chain broken at index {index}; marking untrusted");
            }
            if !record_ok {
                log::error!("no backend yields a valid ledger record; marking untrusted");
            }
            self.untrusted.store(true, Ordering::SeqCst);
        }
        Ok(verification)
    }

    /// Periodic maintenance loop: integrity self-check plus a backup
    /// snapshot every `period`. Runs until the owning task is dropped.
    /// Snapshot ticks that lose the lock race to a foreground mutation are
    /// skipped, not queued.
    pub async fn run_maintenance(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so opening the ledger
        // does not race its own seed write.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(err) = self.verify_integrity().await {
                log::warn!("maintenance self-check failed: {err}");
            }

            let Ok(_guard) = self.write_lock.try_lock() else {
                continue;
            };
            match self.store.read_record().await {
                Ok(Some(record)) => {
                    if let Err(err) = self.backup.snapshot(&record, unix_time_ms()).await {
                        log::warn!("maintenance snapshot failed: {err}");
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("maintenance record read failed: {err}"),
            }
        }
    }

    /// Issues a single-use transfer code for the current balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Busy`] under contention, or storage errors
    /// from the snapshot write.
    pub async fn create_transfer_code(&self) -> LedgerResult<BackupSnapshot> {
        let _guard = self.write_lock.try_lock().map_err(|_| LedgerError::Busy)?;
        let record = self.current_record().await?;
        self.backup
            .create_transfer_code(&record, unix_time_ms())
            .await
    }

    /// Redeems a transfer code at the current time.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::redeem_transfer_code_at`].
    pub async fn redeem_transfer_code(&self, code: &str) -> LedgerResult<u64> {
        self.redeem_transfer_code_at(code, unix_time_ms()).await
    }

    /// Redeems a transfer code, merging by max-of-both balances.
    ///
    /// A merge that credits nothing still consumes the code. Returns the
    /// balance after the merge.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Busy`] under contention, or an
    /// invalid-transfer error for unknown, expired, or tampered codes.
    pub async fn redeem_transfer_code_at(&self, code: &str, now_ms: u64) -> LedgerResult<u64> {
        let _guard = self.write_lock.try_lock().map_err(|_| LedgerError::Busy)?;

        let mut record = self.current_record().await?;
        let old_balance = record.balance;
        let outcome = self
            .backup
            .redeem_transfer_code(code, record.balance, now_ms)
            .await?;

        if outcome.credited == 0 {
            return Ok(old_balance);
        }

        record.balance = outcome.merged_balance;
        record.total_earned = record.total_earned.saturating_add(outcome.credited);
        let balance = self
            .commit(
                record,
                TransactionKind::Restore,
                outcome.credited,
                Some("transfer-merge".to_string()),
                now_ms,
            )
            .await?;
        self.check_thresholds(old_balance, balance);
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::REWARD_EVENT_POINTS;
    use crate::store::memory::MemoryBackend;
    use crate::store::BackendTier;

    fn backends() -> Vec<Arc<dyn StorageBackend>> {
        vec![
            Arc::new(MemoryBackend::new("secure", BackendTier::Secure)),
            Arc::new(MemoryBackend::new("durable", BackendTier::Durable)),
            Arc::new(MemoryBackend::new("cache", BackendTier::Cache)),
        ]
    }

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            retry: RetryPolicy::no_retries(),
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_seeds_initial_balance() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();
        assert_eq!(ledger.balance().await.unwrap(), INITIAL_BALANCE);

        let history = ledger.history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Init);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let shared = backends();
        let first = Ledger::open(shared.clone(), test_config()).await.unwrap();
        first.earn(100, None).await.unwrap();
        drop(first);

        // Reopening over the same backends must not reseed.
        let second = Ledger::open(shared, test_config()).await.unwrap();
        assert_eq!(second.balance().await.unwrap(), INITIAL_BALANCE + 100);
    }

    #[tokio::test]
    async fn test_earn_and_spend() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();

        let balance = ledger.earn(50, Some("ad watched".to_string())).await.unwrap();
        assert_eq!(balance, INITIAL_BALANCE + 50);

        let balance = ledger.spend(30, Some("sticker".to_string())).await.unwrap();
        assert_eq!(balance, INITIAL_BALANCE + 20);

        let history = ledger.history(10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].kind, TransactionKind::Spend);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();
        assert!(matches!(
            ledger.earn(0, None).await,
            Err(LedgerError::InvalidInput { .. })
        ));
        assert!(matches!(
            ledger.spend(0, None).await,
            Err(LedgerError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_overspend_rejected_without_mutation() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();
        match ledger.spend(INITIAL_BALANCE + 1, None).await {
            Err(LedgerError::InsufficientFunds { balance, requested }) => {
                assert_eq!(balance, INITIAL_BALANCE);
                assert_eq!(requested, INITIAL_BALANCE + 1);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        assert_eq!(ledger.balance().await.unwrap(), INITIAL_BALANCE);
        assert_eq!(ledger.history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_earn_past_ceiling_rejected() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();
        assert!(matches!(
            ledger.earn(MAX_POINTS, None).await,
            Err(LedgerError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_grant_respects_spacing() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();

        let first = ledger.grant_for_reward_event_at(1_000_000).await.unwrap();
        assert!(first.granted);
        assert_eq!(first.new_balance, INITIAL_BALANCE + REWARD_EVENT_POINTS);

        // Within the cooldown: an ordinary non-granted outcome, not an error.
        let second = ledger.grant_for_reward_event_at(1_000_100).await.unwrap();
        assert!(!second.granted);
        assert_eq!(second.new_balance, first.new_balance);
    }

    #[tokio::test]
    async fn test_subscribers_observe_mutations() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = ledger.subscribe(move |event| {
            if let Ok(mut events) = sink.lock() {
                events.push(*event);
            }
        });

        ledger.earn(10, None).await.unwrap();
        ledger.spend(5, None).await.unwrap();

        {
            let events = seen.lock().unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].kind, TransactionKind::Earn);
            assert_eq!(events[1].new_balance, INITIAL_BALANCE + 5);
        }

        ledger.unsubscribe(id);
        ledger.unsubscribe(id); // idempotent
        ledger.earn(10, None).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_notifications_fire_on_crossing() {
        struct Recorder(std::sync::Mutex<Vec<String>>);
        impl NotificationSink for Recorder {
            fn notify(&self, title: &str, _message: &str) {
                if let Ok(mut titles) = self.0.lock() {
                    titles.push(title.to_string());
                }
            }
        }

        let config = LedgerConfig {
            notify_thresholds: vec![3_000],
            ..test_config()
        };
        let ledger = Ledger::open(backends(), config).await.unwrap();
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        ledger.set_notification_sink(Arc::clone(&recorder) as Arc<dyn NotificationSink>);

        ledger.earn(400, None).await.unwrap(); // 2_900, below
        ledger.earn(200, None).await.unwrap(); // 3_100, crosses up
        ledger.spend(200, None).await.unwrap(); // 2_900, crosses down
        ledger.earn(50, None).await.unwrap(); // no crossing

        let titles = recorder.0.lock().unwrap();
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0], "Points milestone");
        assert_eq!(titles[1], "Points balance low");
    }

    #[tokio::test]
    async fn test_verify_integrity_clean() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();
        ledger.earn(10, None).await.unwrap();

        let verification = ledger.verify_integrity().await.unwrap();
        assert!(verification.valid);
        assert!(ledger.is_trusted());
    }

    #[tokio::test]
    async fn test_transfer_code_roundtrip() {
        let ledger = Ledger::open(backends(), test_config()).await.unwrap();
        ledger.earn(500, None).await.unwrap();

        let snapshot = ledger.create_transfer_code().await.unwrap();
        ledger.spend(1_000, None).await.unwrap();

        // Local balance is lower than the snapshot; merge restores the max.
        let merged = ledger.redeem_transfer_code(&snapshot.code).await.unwrap();
        assert_eq!(merged, INITIAL_BALANCE + 500);

        // Redeeming again fails: the code is single-use.
        assert!(matches!(
            ledger.redeem_transfer_code(&snapshot.code).await,
            Err(LedgerError::InvalidTransfer { .. })
        ));
    }
}
