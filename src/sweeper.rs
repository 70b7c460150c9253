//! Periodic eviction of stale quota records and expired grants.
//!
//! Runs as an independent scheduled task with its own failure isolation: a
//! failed sweep is logged and retried next period, never surfaced to the
//! request-serving path. Once per day is sufficient given the retention
//! windows; the period is configurable mainly so tests can tighten it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::identity::Dimension;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{EntitlementStore, QuotaStore, StoreError};

const DAY: Duration = Duration::from_secs(86_400);

/// Sweep cadence and per-dimension retention windows.
///
/// Network records are kept for a shorter window: addresses churn fast and
/// carry the weakest identity signal.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Delay between sweep runs.
    pub period: Duration,
    pub account_retention: Duration,
    pub device_retention: Duration,
    pub network_retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            period: DAY,
            account_retention: 30 * DAY,
            device_retention: 30 * DAY,
            network_retention: 7 * DAY,
        }
    }
}

impl SweeperConfig {
    fn retention_for(&self, dimension: Dimension) -> Duration {
        match dimension {
            Dimension::Account => self.account_retention,
            Dimension::Device => self.device_retention,
            Dimension::Network => self.network_retention,
        }
    }
}

/// What one sweep run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub quota_records_evicted: usize,
    pub grants_evicted: usize,
}

/// Background garbage collector for both stores.
pub struct EvictionSweeper {
    quota_store: Arc<dyn QuotaStore>,
    entitlement_store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl EvictionSweeper {
    pub fn new(
        quota_store: Arc<dyn QuotaStore>,
        entitlement_store: Arc<dyn EntitlementStore>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            quota_store,
            entitlement_store,
            clock,
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Swap the sleeper implementation (tests).
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// One full sweep over both stores.
    ///
    /// Quota records are evicted once their last-seen timestamp is older than
    /// the dimension's retention window; grants once their expiry has passed.
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now_millis();
        let mut report = SweepReport::default();

        for (key, record) in self.quota_store.scan().await? {
            let retention = self.config.retention_for(key.dimension).as_millis() as u64;
            if now.saturating_sub(record.last_seen_millis) > retention {
                self.quota_store.delete(&key).await?;
                report.quota_records_evicted += 1;
            }
        }

        for grant in self.entitlement_store.scan().await? {
            if grant.is_expired(now) {
                self.entitlement_store.remove(&grant.grant_id).await?;
                report.grants_evicted += 1;
            }
        }

        debug!(
            target: "quotagate::sweeper",
            quota_evicted = report.quota_records_evicted,
            grants_evicted = report.grants_evicted,
            "sweep completed"
        );
        Ok(report)
    }

    /// Spawn the periodic sweep loop. The returned handle stops it cleanly;
    /// dropping the handle without calling shutdown leaves the loop running.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.sleeper.sleep(self.config.period) => {
                        if let Err(e) = self.run_once().await {
                            warn!(
                                target: "quotagate::sweeper",
                                error = %e,
                                "sweep failed; retrying next period"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        SweeperHandle { shutdown_tx, handle }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}
