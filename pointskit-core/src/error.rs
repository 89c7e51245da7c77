//! Error types for the ledger engine.
//!
//! Validation and rate-limit failures are ordinary results with a
//! human-readable reason. Integrity failures trigger a store re-scan before
//! they surface. Contention (`Busy`) is never auto-retried.

use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or out-of-range input.
    #[error("invalid input '{parameter}': {reason}")]
    InvalidInput {
        /// Name of the offending parameter.
        parameter: String,
        /// Description of the issue.
        reason: String,
    },

    /// A spend was requested that exceeds the current balance.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Current balance.
        balance: u64,
        /// Requested spend amount.
        requested: u64,
    },

    /// Integrity hash mismatch or a record failing validation.
    #[error("integrity failure: {context}")]
    Integrity {
        /// Context describing what failed validation.
        context: String,
    },

    /// The transaction chain is broken at a specific index.
    #[error("transaction chain broken at index {index}")]
    ChainBroken {
        /// Index of the first invalid entry.
        index: usize,
    },

    /// Too few storage backends accepted a write, or a read failed entirely.
    #[error("storage failure: {context}")]
    Storage {
        /// Context describing the operation.
        context: String,
    },

    /// Another mutating operation holds the ledger lock.
    ///
    /// Callers must not retry automatically; surface this to the user.
    #[error("ledger is busy with another operation")]
    Busy,

    /// A reward grant was rejected by the rate limiter.
    #[error("rate limited: {reason} (retry in {retry_in_ms} ms)")]
    RateLimited {
        /// Milliseconds until the grant could succeed.
        retry_in_ms: u64,
        /// Human-readable reason.
        reason: String,
    },

    /// No ledger record exists yet.
    #[error("ledger record not found")]
    NotFound,

    /// The obfuscation codec rejected or failed to process a payload.
    #[error("codec failure: {context}")]
    Codec {
        /// Context describing what failed.
        context: String,
    },

    /// A payload exceeded the codec size bound.
    #[error("payload of {size} bytes exceeds codec limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },

    /// A transfer code was unknown, expired, or failed its checksum.
    #[error("invalid transfer: {reason}")]
    InvalidTransfer {
        /// Description of what's wrong.
        reason: String,
    },

    /// Serialization or deserialization of a persisted shape failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl LedgerError {
    /// Creates an invalid input error.
    pub fn invalid_input<P: Into<String>, R: Into<String>>(parameter: P, reason: R) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity<S: Into<String>>(context: S) -> Self {
        Self::Integrity {
            context: context.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage<S: Into<String>>(context: S) -> Self {
        Self::Storage {
            context: context.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec<S: Into<String>>(context: S) -> Self {
        Self::Codec {
            context: context.into(),
        }
    }

    /// Creates an invalid transfer error.
    pub fn transfer<S: Into<String>>(reason: S) -> Self {
        Self::InvalidTransfer {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` for failures a caller may present as an ordinary
    /// rejected result rather than an exceptional condition.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::InsufficientFunds { .. }
                | Self::RateLimited { .. }
                | Self::Busy
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
