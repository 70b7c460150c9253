//! In-memory store backends.
//!
//! The default backends for a single-process deployment, and the reference
//! semantics for any distributed implementation. Each store keeps its state
//! under one `Mutex`, so a grant plus its index entries are never observed
//! half-written.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{EntitlementStore, QuotaStore, StoreError};
use crate::entitlement::{EntitlementGrant, GrantKey};
use crate::identity::QuotaKey;
use crate::quota::QuotaRecord;

/// Simple in-memory quota store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryQuotaStore {
    data: Arc<Mutex<HashMap<QuotaKey, QuotaRecord>>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get(&self, key: &QuotaKey) -> Result<Option<QuotaRecord>, StoreError> {
        let guard = self.data.lock().expect("quota store poisoned");
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &QuotaKey, record: QuotaRecord) -> Result<(), StoreError> {
        let mut guard = self.data.lock().expect("quota store poisoned");
        guard.insert(key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &QuotaKey) -> Result<(), StoreError> {
        let mut guard = self.data.lock().expect("quota store poisoned");
        guard.remove(key);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(QuotaKey, QuotaRecord)>, StoreError> {
        let guard = self.data.lock().expect("quota store poisoned");
        Ok(guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[derive(Debug, Default)]
struct EntitlementInner {
    /// grant id → grant document.
    grants: HashMap<String, EntitlementGrant>,
    /// index key → grant id.
    index: HashMap<GrantKey, String>,
}

/// In-memory entitlement store with a grant map plus index map under one lock.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEntitlementStore {
    inner: Arc<Mutex<EntitlementInner>>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_grant(inner: &mut EntitlementInner, grant_id: &str) {
        if inner.grants.remove(grant_id).is_some() {
            inner.index.retain(|_, id| id != grant_id);
        }
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn insert(&self, grant: EntitlementGrant) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("entitlement store poisoned");

        // Exactly one current grant per account: drop any grant the account
        // key currently points at before indexing the new one.
        let account_key = GrantKey::Account(grant.account_id.clone());
        if let Some(prior_id) = inner.index.get(&account_key).cloned() {
            Self::drop_grant(&mut inner, &prior_id);
        }

        for key in grant.index_keys() {
            inner.index.insert(key, grant.grant_id.clone());
        }
        inner.grants.insert(grant.grant_id.clone(), grant);
        Ok(())
    }

    async fn find(&self, key: &GrantKey) -> Result<Option<EntitlementGrant>, StoreError> {
        let inner = self.inner.lock().expect("entitlement store poisoned");
        Ok(inner.index.get(key).and_then(|id| inner.grants.get(id)).cloned())
    }

    async fn update(&self, grant: EntitlementGrant) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("entitlement store poisoned");
        inner.grants.insert(grant.grant_id.clone(), grant);
        Ok(())
    }

    async fn remove(&self, grant_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("entitlement store poisoned");
        Self::drop_grant(&mut inner, grant_id);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<EntitlementGrant>, StoreError> {
        let inner = self.inner.lock().expect("entitlement store poisoned");
        Ok(inner.grants.values().cloned().collect())
    }
}
