//! The `QuotaGate` facade: builder-composed entry point for all operations.
//!
//! Stores and the clock are injected at construction and owned here for the
//! process lifetime; there are no module-level singletons. The two external
//! collaborators call in through narrow surfaces: the client-facing API uses
//! [`QuotaGate::check_allowance`] / [`QuotaGate::register_download`], the
//! payment collaborator uses [`QuotaGate::activate_entitlement`] after a
//! confirmed payment and never touches quota state.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{
    ActivateRequest, ActivationReceipt, AllowanceResponse, CheckAllowanceRequest,
    DownloadReceipt, HistoryResponse, RegisterDownloadRequest, Remaining, VerifyRequest,
    VerifyResponse,
};
use crate::clock::{Clock, SystemClock};
use crate::entitlement::EntitlementService;
use crate::error::QuotaGateError;
use crate::identity::{epoch_for, Dimension, Identity, QuotaKey};
use crate::quota::{QuotaLedger, FREE_QUOTA};
use crate::registrar::{Allowance, DownloadOutcome, DownloadRegistrar};
use crate::store::memory::{InMemoryEntitlementStore, InMemoryQuotaStore};
use crate::store::{EntitlementStore, QuotaStore};
use crate::sweeper::{EvictionSweeper, SweeperConfig};

/// Entitlement and quota tracking engine.
#[derive(Clone)]
pub struct QuotaGate {
    registrar: DownloadRegistrar,
    entitlements: EntitlementService,
    quota_store: Arc<dyn QuotaStore>,
    entitlement_store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
    free_quota: u32,
}

impl QuotaGate {
    /// Start building an engine. Defaults: in-memory stores, system clock,
    /// free quota of [`FREE_QUOTA`].
    pub fn builder() -> QuotaGateBuilder {
        QuotaGateBuilder::default()
    }

    /// Advisory pre-flight check for client UX. Read-only: the authoritative
    /// enforcement happens only inside [`QuotaGate::register_download`].
    pub async fn check_allowance(
        &self,
        request: CheckAllowanceRequest,
    ) -> Result<AllowanceResponse, QuotaGateError> {
        let identity =
            Identity::new(request.account_id, request.device_id, request.network_address)?;
        let allowance =
            self.registrar.check(&identity, request.activation_code.as_deref()).await?;
        Ok(match allowance {
            Allowance::Unlimited { .. } => AllowanceResponse {
                can_download: true,
                remaining_downloads: Remaining::Unlimited,
                unlimited_access: true,
            },
            Allowance::Within { remaining, .. } => AllowanceResponse {
                can_download: true,
                remaining_downloads: Remaining::Limited(remaining),
                unlimited_access: false,
            },
            Allowance::Exhausted { .. } => AllowanceResponse {
                can_download: false,
                remaining_downloads: Remaining::Limited(0),
                unlimited_access: false,
            },
        })
    }

    /// Record a download, enforcing the free quota when no grant applies.
    ///
    /// Fails with [`QuotaGateError::QuotaExceeded`] when the reconciled usage
    /// has reached the limit; the caller maps that to its 403-equivalent.
    pub async fn register_download(
        &self,
        request: RegisterDownloadRequest,
    ) -> Result<DownloadReceipt, QuotaGateError> {
        if request.image_reference.trim().is_empty() {
            return Err(QuotaGateError::Validation { field: "image_reference" });
        }
        let identity =
            Identity::new(request.account_id, request.device_id, request.network_address)?;
        let outcome = self
            .registrar
            .register(&identity, &request.image_reference, &request.image_title)
            .await?;
        Ok(match outcome {
            DownloadOutcome::Unlimited { grant } => DownloadReceipt {
                success: true,
                remaining_downloads: Remaining::Unlimited,
                downloads_used: grant.downloads_count,
                low_quota_warning: false,
            },
            DownloadOutcome::Counted { used, remaining } => DownloadReceipt {
                success: true,
                remaining_downloads: Remaining::Limited(remaining),
                downloads_used: u64::from(used),
                low_quota_warning: remaining <= 1,
            },
        })
    }

    /// Create (or replace) an unlimited-access grant after a confirmed
    /// payment. Called by the payment collaborator only.
    pub async fn activate_entitlement(
        &self,
        request: ActivateRequest,
    ) -> Result<ActivationReceipt, QuotaGateError> {
        let grant = self
            .entitlements
            .activate(
                &request.account_id,
                request.device_id.as_deref(),
                &request.payment_id,
                &request.payment_method,
                request.features,
                Duration::from_secs(request.validity_secs),
            )
            .await?;
        Ok(ActivationReceipt {
            activation_code: grant.activation_code,
            issued_at_millis: grant.issued_at_millis,
            expires_at_millis: grant.expires_at_millis,
            features: grant.features,
        })
    }

    /// Report whether an identity currently holds a valid grant. An absent
    /// grant is a normal answer, not an error; store outages still surface.
    pub async fn verify_entitlement(
        &self,
        request: VerifyRequest,
    ) -> Result<VerifyResponse, QuotaGateError> {
        if request.account_id.trim().is_empty() {
            return Err(QuotaGateError::Validation { field: "account_id" });
        }
        let grant = self
            .entitlements
            .resolve(
                &request.account_id,
                request.device_id.as_deref(),
                request.activation_code.as_deref(),
            )
            .await?;
        Ok(match grant {
            Some(grant) => VerifyResponse {
                has_unlimited: true,
                expires_at_millis: Some(grant.expires_at_millis),
                downloads_count: Some(grant.downloads_count),
            },
            None => VerifyResponse {
                has_unlimited: false,
                expires_at_millis: None,
                downloads_count: None,
            },
        })
    }

    /// Download history and current standing for an account. An unknown
    /// account returns zeroed defaults.
    pub async fn history(&self, account_id: &str) -> Result<HistoryResponse, QuotaGateError> {
        if account_id.trim().is_empty() {
            return Err(QuotaGateError::Validation { field: "account_id" });
        }
        let now = self.clock.now_millis();
        let key = QuotaKey::new(Dimension::Account, account_id, epoch_for(now));
        let record = self.quota_store.get(&key).await?;
        let grant = self.entitlements.resolve(account_id, None, None).await?;

        let downloads_used = record.as_ref().map(|r| r.downloads_used).unwrap_or(0);
        let mut download_history =
            record.map(|r| r.events).unwrap_or_default();
        let remaining_downloads = match &grant {
            Some(_) => Remaining::Unlimited,
            None => Remaining::Limited(self.free_quota.saturating_sub(downloads_used)),
        };
        if let Some(grant) = &grant {
            download_history.extend(grant.events.iter().cloned());
        }
        Ok(HistoryResponse {
            downloads_used,
            remaining_downloads,
            unlimited_access: grant.is_some(),
            download_history,
        })
    }

    /// Build an eviction sweeper sharing this engine's stores and clock.
    pub fn sweeper(&self, config: SweeperConfig) -> EvictionSweeper {
        EvictionSweeper::new(
            self.quota_store.clone(),
            self.entitlement_store.clone(),
            self.clock.clone(),
            config,
        )
    }
}

/// Builder for [`QuotaGate`].
#[derive(Default)]
pub struct QuotaGateBuilder {
    quota_store: Option<Arc<dyn QuotaStore>>,
    entitlement_store: Option<Arc<dyn EntitlementStore>>,
    clock: Option<Arc<dyn Clock>>,
    free_quota: Option<u32>,
}

impl QuotaGateBuilder {
    /// Inject a quota store backend.
    pub fn quota_store(mut self, store: impl QuotaStore + 'static) -> Self {
        self.quota_store = Some(Arc::new(store));
        self
    }

    /// Inject an entitlement store backend.
    pub fn entitlement_store(mut self, store: impl EntitlementStore + 'static) -> Self {
        self.entitlement_store = Some(Arc::new(store));
        self
    }

    /// Inject a clock (tests use [`crate::ManualClock`]).
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Override the free-download ceiling.
    pub fn free_quota(mut self, free_quota: u32) -> Self {
        self.free_quota = Some(free_quota);
        self
    }

    pub fn build(self) -> QuotaGate {
        let quota_store =
            self.quota_store.unwrap_or_else(|| Arc::new(InMemoryQuotaStore::new()));
        let entitlement_store = self
            .entitlement_store
            .unwrap_or_else(|| Arc::new(InMemoryEntitlementStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let free_quota = self.free_quota.unwrap_or(FREE_QUOTA);

        let ledger = QuotaLedger::new(quota_store.clone());
        let entitlements = EntitlementService::new(entitlement_store.clone(), clock.clone());
        let registrar =
            DownloadRegistrar::new(ledger, entitlements.clone(), clock.clone(), free_quota);

        QuotaGate {
            registrar,
            entitlements,
            quota_store,
            entitlement_store,
            clock,
            free_quota,
        }
    }
}
