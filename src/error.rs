//! Error types for the quota and entitlement engine.

use crate::store::StoreError;

/// Unified error type for engine operations.
///
/// Validation and quota errors are expected, user-facing outcomes. Store
/// errors are operational failures the caller should log and retry; they are
/// never mapped to "granted" or "denied" (the engine fails closed).
#[derive(Debug, thiserror::Error)]
pub enum QuotaGateError {
    /// A required identity field was missing or empty. Rejected before any
    /// store access, so it never has side effects.
    #[error("missing required field: {field}")]
    Validation {
        /// Name of the missing field.
        field: &'static str,
    },

    /// Free downloads are exhausted and no entitlement applies.
    #[error("free quota exhausted ({used}/{limit} downloads used)")]
    QuotaExceeded {
        /// Reconciled downloads-used at the time of the check.
        used: u32,
        /// The free-quota ceiling.
        limit: u32,
    },

    /// A grant was found but its expiry has passed. The resolver converts
    /// this to "no entitlement" before it reaches callers; it exists so
    /// store-level tooling can report the condition directly.
    #[error("entitlement expired at unix-millis {expired_at_millis}")]
    EntitlementExpired {
        /// Expiry instant of the stale grant.
        expired_at_millis: u64,
    },

    /// The underlying store collaborator was unreachable or timed out.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl QuotaGateError {
    /// Check if this error is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error is due to quota exhaustion.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Check if this error reports a grant found past its expiry.
    pub fn is_entitlement_expired(&self) -> bool {
        matches!(self, Self::EntitlementExpired { .. })
    }

    /// Check if this error is a retryable store failure.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Access quota exhaustion info as (used, limit).
    pub fn quota_usage(&self) -> Option<(u32, u32)> {
        match self {
            Self::QuotaExceeded { used, limit } => Some((*used, *limit)),
            _ => None,
        }
    }
}
