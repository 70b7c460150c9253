//! Download registrar: the authoritative enforcement path.
//!
//! Request flow: entitlement check first (fast path for paying users), then
//! quota reconciliation and enforcement, then the write-back. The advisory
//! allowance check and the register call are deliberately separate operations
//! in the external interface, so the registrar re-checks usage at registration
//! time inside a per-account lock; two concurrent requests can both be told
//! "allowed" by the check, but only the lock-protected register decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::clock::Clock;
use crate::entitlement::{EntitlementGrant, EntitlementService};
use crate::error::QuotaGateError;
use crate::identity::{epoch_for, Identity};
use crate::quota::{DownloadEvent, QuotaLedger};

/// Registry handing out one async mutex per account id.
///
/// The account dimension is the lock key: every register call for an account
/// serializes through its mutex, which makes the read-check-increment
/// sequence atomic without a global lock across accounts.
#[derive(Default)]
pub struct AccountLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for an account.
    ///
    /// Entries whose `Arc` only the registry still holds belong to accounts
    /// with no register call in flight; they are pruned on every lookup so
    /// the map does not grow with every account ever seen.
    pub fn lock_for(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("account lock registry poisoned");
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(account_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().expect("account lock registry poisoned").len()
    }
}

/// Outcome of the advisory allowance check. Never mutates state.
#[derive(Debug, Clone)]
pub enum Allowance {
    /// A valid grant covers the identity; downloads are unlimited.
    Unlimited { grant: EntitlementGrant },
    /// Free quota still has room.
    Within { used: u32, remaining: u32 },
    /// Free quota is exhausted and no grant applies.
    Exhausted { used: u32 },
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    /// Recorded against an entitlement grant; free quota untouched.
    Unlimited { grant: EntitlementGrant },
    /// Charged against the free quota.
    Counted { used: u32, remaining: u32 },
}

/// The sole writer of quota records and grant download counters.
#[derive(Clone)]
pub struct DownloadRegistrar {
    ledger: QuotaLedger,
    entitlements: EntitlementService,
    locks: Arc<AccountLocks>,
    clock: Arc<dyn Clock>,
    free_quota: u32,
}

impl DownloadRegistrar {
    pub fn new(
        ledger: QuotaLedger,
        entitlements: EntitlementService,
        clock: Arc<dyn Clock>,
        free_quota: u32,
    ) -> Self {
        Self {
            ledger,
            entitlements,
            locks: Arc::new(AccountLocks::new()),
            clock,
            free_quota,
        }
    }

    /// Advisory pre-flight check. Lock-free and read-only; a client must
    /// never rely on it to prevent overshoot.
    pub async fn check(
        &self,
        identity: &Identity,
        activation_code: Option<&str>,
    ) -> Result<Allowance, QuotaGateError> {
        if let Some(grant) = self
            .entitlements
            .resolve(identity.account_id(), identity.device_id(), activation_code)
            .await?
        {
            return Ok(Allowance::Unlimited { grant });
        }

        let epoch = epoch_for(self.clock.now_millis());
        let used = self.ledger.usage(&identity.quota_keys(epoch)).await?;
        if used >= self.free_quota {
            Ok(Allowance::Exhausted { used })
        } else {
            Ok(Allowance::Within { used, remaining: self.free_quota - used })
        }
    }

    /// Authoritative registration. Serializes per account; re-checks the
    /// entitlement and the reconciled usage under the lock before writing.
    pub async fn register(
        &self,
        identity: &Identity,
        image_reference: &str,
        image_title: &str,
    ) -> Result<DownloadOutcome, QuotaGateError> {
        let lock = self.locks.lock_for(identity.account_id());
        let _guard = lock.lock().await;

        let now = self.clock.now_millis();
        let event = DownloadEvent::new(
            image_reference,
            image_title,
            identity.network_address(),
            now,
        );

        if let Some(mut grant) = self
            .entitlements
            .resolve(identity.account_id(), identity.device_id(), None)
            .await?
        {
            self.entitlements.record_download(&mut grant, event).await?;
            debug!(
                target: "quotagate::registrar",
                account = %identity.account_id(),
                downloads = grant.downloads_count,
                "unlimited download recorded"
            );
            return Ok(DownloadOutcome::Unlimited { grant });
        }

        let keys = identity.quota_keys(epoch_for(now));
        let used = self.ledger.usage(&keys).await?;
        if used >= self.free_quota {
            debug!(
                target: "quotagate::registrar",
                account = %identity.account_id(),
                used,
                limit = self.free_quota,
                "download denied, free quota exhausted"
            );
            return Err(QuotaGateError::QuotaExceeded { used, limit: self.free_quota });
        }

        let new_usage = self.ledger.append(&keys, &event).await?;
        Ok(DownloadOutcome::Counted {
            used: new_usage,
            remaining: self.free_quota.saturating_sub(new_usage),
        })
    }
}
