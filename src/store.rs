//! Abstract storage interfaces for quota records and entitlement grants.
//!
//! Both traits assume pure key/value semantics with no business logic, so a
//! remote KV service can stand in for the in-memory backends. All operations
//! are async and fallible: a caller must treat a store error as "unknown",
//! never as "quota exceeded" or "entitlement granted".

use async_trait::async_trait;

use crate::entitlement::{EntitlementGrant, GrantKey};
use crate::identity::QuotaKey;
use crate::quota::QuotaRecord;

pub mod memory;

/// Errors from storage collaborators. Both variants are retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store was unreachable.
    #[error("unavailable: {detail}")]
    Unavailable {
        /// Backend-specific detail for logs.
        detail: String,
    },
    /// The store did not answer within the caller's deadline.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: std::time::Duration,
    },
}

/// Storage for per-(dimension, epoch) quota records.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Fetch the record for a key, if one exists.
    async fn get(&self, key: &QuotaKey) -> Result<Option<QuotaRecord>, StoreError>;

    /// Write (create or overwrite) the record for a key.
    async fn put(&self, key: &QuotaKey, record: QuotaRecord) -> Result<(), StoreError>;

    /// Remove the record for a key. Removing a missing key is not an error.
    async fn delete(&self, key: &QuotaKey) -> Result<(), StoreError>;

    /// Snapshot every record. Used only by the eviction sweeper.
    async fn scan(&self) -> Result<Vec<(QuotaKey, QuotaRecord)>, StoreError>;
}

/// Storage for entitlement grants.
///
/// A grant is one logical record reachable through up to four index keys
/// (account, device, payment, activation code). Implementations must apply a
/// grant write and all of its index updates atomically; a partial write would
/// leave stale index entries pointing at a superseded grant.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Store a grant under all of its index keys, replacing any prior grant
    /// for the same account (including that grant's index entries).
    async fn insert(&self, grant: EntitlementGrant) -> Result<(), StoreError>;

    /// Look up a grant through one index key.
    async fn find(&self, key: &GrantKey) -> Result<Option<EntitlementGrant>, StoreError>;

    /// Re-persist a mutated grant by its grant id. The index is untouched;
    /// every key that pointed at the grant sees the new state.
    async fn update(&self, grant: EntitlementGrant) -> Result<(), StoreError>;

    /// Remove a grant and all index entries pointing at it.
    async fn remove(&self, grant_id: &str) -> Result<(), StoreError>;

    /// Snapshot every grant. Used only by the eviction sweeper.
    async fn scan(&self) -> Result<Vec<EntitlementGrant>, StoreError>;
}
