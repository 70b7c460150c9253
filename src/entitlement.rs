//! Entitlement grants: creation, resolution, and unlimited-download tracking.
//!
//! A grant is created by the payment collaborator after a confirmed payment
//! and makes downloads unlimited for its account until it expires. Grants are
//! reachable through four independent keys so a client that only remembers
//! its activation code (e.g. after clearing cookies) can still recover
//! unlimited status.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::QuotaGateError;
use crate::quota::DownloadEvent;
use crate::store::EntitlementStore;

/// Index key a grant can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantKey {
    Account(String),
    Device(String),
    Payment(String),
    Code(String),
}

/// A time-bounded unlimited-access grant, one per successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGrant {
    /// Stable internal id the index entries point at.
    pub grant_id: String,
    pub account_id: String,
    pub device_id: Option<String>,
    /// Payment/activation id from the payment collaborator.
    pub payment_id: String,
    /// Payment method tag (e.g. "card", "paypal"); opaque to the engine.
    pub payment_method: String,
    /// Generated, globally unique lookup token handed to the client.
    pub activation_code: String,
    pub issued_at_millis: u64,
    pub expires_at_millis: u64,
    /// Opaque capability tags echoed back to the caller.
    pub features: Vec<String>,
    /// Unlimited downloads performed under this grant.
    pub downloads_count: u64,
    pub last_download_millis: Option<u64>,
    /// Log of unlimited downloads. Never touches free-quota records.
    pub events: Vec<DownloadEvent>,
}

impl EntitlementGrant {
    /// Build a fresh grant with generated grant id and activation code.
    ///
    /// Invariant: `expires_at > issued_at`; a zero validity is clamped to one
    /// millisecond rather than producing a born-expired grant.
    pub fn issue(
        account_id: String,
        device_id: Option<String>,
        payment_id: String,
        payment_method: String,
        features: Vec<String>,
        now_millis: u64,
        validity: Duration,
    ) -> Self {
        let validity_millis = (validity.as_millis() as u64).max(1);
        Self {
            grant_id: Uuid::new_v4().to_string(),
            account_id,
            device_id,
            payment_id,
            payment_method,
            activation_code: Uuid::new_v4().to_string(),
            issued_at_millis: now_millis,
            expires_at_millis: now_millis + validity_millis,
            features,
            downloads_count: 0,
            last_download_millis: None,
            events: Vec::new(),
        }
    }

    /// Whether the grant is past its expiry at `now`.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at_millis <= now_millis
    }

    /// Every index key this grant is reachable through.
    pub fn index_keys(&self) -> Vec<GrantKey> {
        let mut keys = vec![
            GrantKey::Account(self.account_id.clone()),
            GrantKey::Payment(self.payment_id.clone()),
            GrantKey::Code(self.activation_code.clone()),
        ];
        if let Some(device) = &self.device_id {
            keys.push(GrantKey::Device(device.clone()));
        }
        keys
    }

    /// Record one unlimited download on the grant.
    pub fn record(&mut self, event: DownloadEvent) {
        self.downloads_count += 1;
        self.last_download_millis = Some(event.timestamp_millis);
        self.events.push(event);
    }

    #[cfg(test)]
    pub(crate) fn with_activation_code(mut self, code: &str) -> Self {
        self.activation_code = code.to_string();
        self
    }
}

/// Grant lifecycle operations over an [`EntitlementStore`].
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Look up a valid grant, trying keys in priority order: activation code,
    /// then account id, then device id. An expired hit is deleted in place
    /// and treated as absent.
    pub async fn resolve(
        &self,
        account_id: &str,
        device_id: Option<&str>,
        activation_code: Option<&str>,
    ) -> Result<Option<EntitlementGrant>, QuotaGateError> {
        let now = self.clock.now_millis();
        let mut candidates = Vec::with_capacity(3);
        if let Some(code) = activation_code {
            candidates.push(GrantKey::Code(code.to_string()));
        }
        candidates.push(GrantKey::Account(account_id.to_string()));
        if let Some(device) = device_id {
            candidates.push(GrantKey::Device(device.to_string()));
        }

        for key in candidates {
            let Some(grant) = self.store.find(&key).await? else { continue };
            if grant.is_expired(now) {
                debug!(
                    target: "quotagate::entitlement",
                    account = %grant.account_id,
                    expired_at = grant.expires_at_millis,
                    "expired grant dropped during resolution"
                );
                self.store.remove(&grant.grant_id).await?;
                continue;
            }
            return Ok(Some(grant));
        }
        Ok(None)
    }

    /// Create a grant for a confirmed payment, replacing any prior grant for
    /// the account. Repeated activation replaces rather than stacks, so the
    /// call is idempotent in effect.
    pub async fn activate(
        &self,
        account_id: &str,
        device_id: Option<&str>,
        payment_id: &str,
        payment_method: &str,
        features: Vec<String>,
        validity: Duration,
    ) -> Result<EntitlementGrant, QuotaGateError> {
        if account_id.trim().is_empty() {
            return Err(QuotaGateError::Validation { field: "account_id" });
        }

        let prior = self.store.find(&GrantKey::Account(account_id.to_string())).await?;
        if let Some(prior) = &prior {
            debug!(
                target: "quotagate::entitlement",
                account = %account_id,
                prior_expiry = prior.expires_at_millis,
                "re-activation replaces existing grant"
            );
        }

        let grant = EntitlementGrant::issue(
            account_id.to_string(),
            device_id.map(str::to_string),
            payment_id.to_string(),
            payment_method.to_string(),
            features,
            self.clock.now_millis(),
            validity,
        );
        self.store.insert(grant.clone()).await?;
        debug!(
            target: "quotagate::entitlement",
            account = %account_id,
            expires_at = grant.expires_at_millis,
            "entitlement activated"
        );
        Ok(grant)
    }

    /// Record one unlimited download and re-persist the grant.
    ///
    /// Must be called inside the registrar's per-account lock so concurrent
    /// unlimited downloads never lose counter increments.
    pub async fn record_download(
        &self,
        grant: &mut EntitlementGrant,
        event: DownloadEvent,
    ) -> Result<(), QuotaGateError> {
        grant.record(event);
        self.store.update(grant.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::InMemoryEntitlementStore;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    const DAY_MILLIS: u64 = 86_400_000;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn service(clock: &ManualClock) -> EntitlementService {
        EntitlementService::new(
            Arc::new(InMemoryEntitlementStore::new()),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn grant_round_trips_through_every_key() {
        let clock = ManualClock::at(1_000);
        let service = service(&clock);
        let grant = service
            .activate("u1", Some("d1"), "pay_1", "card", vec!["unlimited".into()], Duration::from_secs(365 * 86_400))
            .await
            .unwrap();

        assert_eq!(grant.issued_at_millis, 1_000);
        assert_eq!(grant.expires_at_millis, 1_000 + 365 * DAY_MILLIS);

        let by_account = service.resolve("u1", None, None).await.unwrap().unwrap();
        assert_eq!(by_account.grant_id, grant.grant_id);

        let by_device = service.resolve("other", Some("d1"), None).await.unwrap().unwrap();
        assert_eq!(by_device.grant_id, grant.grant_id);

        let by_code =
            service.resolve("other", None, Some(&grant.activation_code)).await.unwrap().unwrap();
        assert_eq!(by_code.grant_id, grant.grant_id);
    }

    #[tokio::test]
    async fn double_activation_replaces_not_stacks() {
        let clock = ManualClock::at(0);
        let service = service(&clock);
        let first = service
            .activate("u1", None, "pay_1", "card", vec![], Duration::from_secs(86_400))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        let second = service
            .activate("u1", None, "pay_2", "card", vec![], Duration::from_secs(2 * 86_400))
            .await
            .unwrap();

        let resolved = service.resolve("u1", None, None).await.unwrap().unwrap();
        assert_eq!(resolved.grant_id, second.grant_id);
        assert_eq!(resolved.expires_at_millis, second.expires_at_millis);

        // The superseded activation code must no longer grant access.
        let stale = service.resolve("u1", None, Some(&first.activation_code)).await.unwrap();
        assert_eq!(stale.unwrap().grant_id, second.grant_id);
    }

    #[tokio::test]
    async fn expired_grant_is_absent_and_deleted() {
        let clock = ManualClock::at(0);
        let store = Arc::new(InMemoryEntitlementStore::new());
        let service = EntitlementService::new(store.clone(), Arc::new(clock.clone()));

        service
            .activate("u1", None, "pay_1", "card", vec![], Duration::from_secs(3600))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(3601));
        assert!(service.resolve("u1", None, None).await.unwrap().is_none());

        // Resolution also dropped the stale record from the store.
        assert!(store.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reactivation_logs_the_replacement() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let clock = ManualClock::at(0);
        let service = service(&clock);
        service
            .activate("u1", None, "pay_1", "card", vec![], Duration::from_secs(86_400))
            .await
            .unwrap();
        service
            .activate("u1", None, "pay_2", "card", vec![], Duration::from_secs(86_400))
            .await
            .unwrap();

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("re-activation replaces existing grant"),
            "replacement should be logged on the second activation"
        );
    }

    #[tokio::test]
    async fn activation_requires_account_id() {
        let clock = ManualClock::at(0);
        let service = service(&clock);
        let err = service
            .activate("", None, "pay_1", "card", vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn record_download_bumps_counter_and_log() {
        let clock = ManualClock::at(0);
        let store = Arc::new(InMemoryEntitlementStore::new());
        let service = EntitlementService::new(store.clone(), Arc::new(clock.clone()));
        let mut grant = service
            .activate("u1", None, "pay_1", "card", vec![], Duration::from_secs(86_400))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(5));
        let event = DownloadEvent::new("img-1", "Sunset", "203.0.113.9", clock.now_millis());
        service.record_download(&mut grant, event).await.unwrap();

        let stored = service.resolve("u1", None, None).await.unwrap().unwrap();
        assert_eq!(stored.downloads_count, 1);
        assert_eq!(stored.last_download_millis, Some(5_000));
        assert_eq!(stored.events.len(), 1);
    }
}
