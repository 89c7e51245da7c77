//! Rate limiting for reward-granting events.
//!
//! Enforces a minimum spacing between grants and a capped count per
//! window. The window state is persisted and re-validated on every load so
//! a corrupted or hand-edited file cannot mint unlimited rewards: counters
//! clamp to the cap and future-dated reset timestamps clamp to at most
//! twice the nominal window.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    KEY_WINDOW, LARGE_EARN_AUDIT_THRESHOLD, MIN_EVENT_SPACING_MS, REWARD_EVENT_POINTS,
    REWARD_WINDOW_CAP, REWARD_WINDOW_MS,
};
use crate::error::{LedgerError, LedgerResult};
use crate::store::MultiTierStore;
use crate::types::RewardWindowState;

/// Tunable policy for reward grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Minimum spacing between two grants.
    pub min_spacing_ms: u64,
    /// Nominal window length.
    pub window_ms: u64,
    /// Maximum grants per window.
    pub window_cap: u32,
    /// Points credited per grant.
    pub grant_points: u64,
    /// Single earns at or above this are flagged for audit.
    pub large_earn_audit_threshold: u64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            min_spacing_ms: MIN_EVENT_SPACING_MS,
            window_ms: REWARD_WINDOW_MS,
            window_cap: REWARD_WINDOW_CAP,
            grant_points: REWARD_EVENT_POINTS,
            large_earn_audit_threshold: LARGE_EARN_AUDIT_THRESHOLD,
        }
    }
}

/// Remaining reward quota, for read-only UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardQuota {
    /// Grants still available in the current window.
    pub remaining: u32,
    /// Milliseconds until the window rolls over.
    pub window_resets_in_ms: u64,
    /// Milliseconds of minimum-spacing cooldown still pending.
    pub cooldown_remaining_ms: u64,
}

/// Enforces spacing and windowed caps on reward grants.
pub struct RateLimiter {
    store: Arc<MultiTierStore>,
    policy: RewardPolicy,
}

impl RateLimiter {
    /// Creates a limiter over the shared store.
    #[must_use]
    pub const fn new(store: Arc<MultiTierStore>, policy: RewardPolicy) -> Self {
        Self { store, policy }
    }

    /// The policy this limiter enforces.
    #[must_use]
    pub const fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    /// Loads the persisted window state, clamping anything implausible.
    ///
    /// # Errors
    ///
    /// Never fails on corrupted state; an unreadable or malformed state is
    /// replaced with a fresh, conservative window.
    pub async fn load_state(&self, now_ms: u64) -> LedgerResult<RewardWindowState> {
        let raw = self.store.read_blob(KEY_WINDOW).await.unwrap_or_else(|err| {
            log::warn!("reward window state unreadable: {err}");
            None
        });

        let Some(raw) = raw else {
            return Ok(RewardWindowState::fresh(now_ms, self.policy.window_ms));
        };

        let state: RewardWindowState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("reward window state malformed ({err}); resetting conservatively");
                // A tampered state never grants more: start a full window at cap.
                let mut fresh = RewardWindowState::fresh(now_ms, self.policy.window_ms);
                fresh.count = self.policy.window_cap;
                return Ok(fresh);
            }
        };

        Ok(self.clamp(state, now_ms))
    }

    /// Applies the anti-tamper clamps and the window rollover.
    fn clamp(&self, mut state: RewardWindowState, now_ms: u64) -> RewardWindowState {
        // A counter above the cap is out of range; clamp rather than trust it.
        if state.count > self.policy.window_cap {
            log::warn!(
                "reward window counter {} exceeds cap {}; clamping",
                state.count,
                self.policy.window_cap
            );
            state.count = self.policy.window_cap;
        }

        // Future-dating the reset blocks grants forever; cap it at 2x nominal.
        let max_reset = now_ms.saturating_add(2 * self.policy.window_ms);
        if state.window_reset_at_ms > max_reset {
            log::warn!(
                "reward window reset timestamp {} is future-dated; clamping",
                state.window_reset_at_ms
            );
            state.window_reset_at_ms = now_ms + self.policy.window_ms;
        }

        if state.last_event_at_ms > now_ms {
            state.last_event_at_ms = now_ms;
        }

        // Window rollover.
        if now_ms >= state.window_reset_at_ms {
            state.count = 0;
            state.window_reset_at_ms = now_ms + self.policy.window_ms;
        }

        state
    }

    async fn store_state(&self, state: &RewardWindowState) -> LedgerResult<()> {
        let json = serde_json::to_string(state)?;
        self.store.write_blob(KEY_WINDOW, &json).await
    }

    /// Checks whether a grant may proceed at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::RateLimited`] with the remaining cooldown
    /// when under minimum spacing or at the window cap.
    pub async fn check(&self, now_ms: u64) -> LedgerResult<()> {
        let state = self.load_state(now_ms).await?;

        if state.last_event_at_ms > 0 {
            let elapsed = now_ms.saturating_sub(state.last_event_at_ms);
            if elapsed < self.policy.min_spacing_ms {
                return Err(LedgerError::RateLimited {
                    retry_in_ms: self.policy.min_spacing_ms - elapsed,
                    reason: "minimum spacing between reward events".to_string(),
                });
            }
        }

        if state.count >= self.policy.window_cap {
            return Err(LedgerError::RateLimited {
                retry_in_ms: state.window_reset_at_ms.saturating_sub(now_ms),
                reason: "reward window cap reached".to_string(),
            });
        }

        Ok(())
    }

    /// Records a successful grant and persists the rolled state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the state cannot be persisted; the grant
    /// itself must be rolled back by the caller in that case.
    pub async fn record_grant(&self, now_ms: u64) -> LedgerResult<RewardWindowState> {
        let mut state = self.load_state(now_ms).await?;
        state.count += 1;
        state.last_event_at_ms = now_ms;
        self.store_state(&state).await?;
        Ok(state)
    }

    /// Remaining quota for read-only display.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the state load.
    pub async fn remaining_quota(&self, now_ms: u64) -> LedgerResult<RewardQuota> {
        let state = self.load_state(now_ms).await?;
        let cooldown = if state.last_event_at_ms == 0 {
            0
        } else {
            self.policy
                .min_spacing_ms
                .saturating_sub(now_ms.saturating_sub(state.last_event_at_ms))
        };
        Ok(RewardQuota {
            remaining: self.policy.window_cap.saturating_sub(state.count),
            window_resets_in_ms: state.window_reset_at_ms.saturating_sub(now_ms),
            cooldown_remaining_ms: cooldown,
        })
    }

    /// Flags an unusually large single earn for audit. Policy choice: the
    /// earn is logged, not blocked.
    pub fn flag_large_earn(&self, amount: u64) {
        if amount >= self.policy.large_earn_audit_threshold {
            log::warn!(
                "unusually large single earn of {amount} points (audit threshold {})",
                self.policy.large_earn_audit_threshold
            );
        }
    }
}
