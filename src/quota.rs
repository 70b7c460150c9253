//! Quota records and cross-dimension reconciliation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::QuotaGateError;
use crate::identity::{Dimension, QuotaKey};
use crate::store::QuotaStore;

/// Free downloads granted per identity per calendar-year epoch.
pub const FREE_QUOTA: u32 = 3;

/// One recorded download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEvent {
    /// Reference to the downloaded image (e.g. an asset id or path).
    pub image_reference: String,
    /// Human-readable title, echoed back in history listings.
    pub image_title: String,
    /// Network address the request originated from.
    pub network_address: String,
    /// When the download was recorded (unix millis).
    pub timestamp_millis: u64,
}

impl DownloadEvent {
    pub fn new(
        image_reference: impl Into<String>,
        image_title: impl Into<String>,
        network_address: impl Into<String>,
        timestamp_millis: u64,
    ) -> Self {
        Self {
            image_reference: image_reference.into(),
            image_title: image_title.into(),
            network_address: network_address.into(),
            timestamp_millis,
        }
    }
}

/// Download counter and history for one (dimension, epoch) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Count of free downloads charged against this dimension.
    pub downloads_used: u32,
    /// Ordered log of the downloads behind the counter.
    pub events: Vec<DownloadEvent>,
    /// When this record was created (unix millis).
    pub first_seen_millis: u64,
    /// Last mutation instant; drives sweeper retention.
    pub last_seen_millis: u64,
}

impl QuotaRecord {
    /// Fresh record for a key seen for the first time at `now`.
    pub fn new(now_millis: u64) -> Self {
        Self {
            downloads_used: 0,
            events: Vec::new(),
            first_seen_millis: now_millis,
            last_seen_millis: now_millis,
        }
    }

    /// Charge one download against this record.
    pub fn record(&mut self, event: DownloadEvent) {
        self.downloads_used += 1;
        self.last_seen_millis = event.timestamp_millis;
        self.events.push(event);
    }
}

/// Effective downloads-used across a request's available dimensions.
///
/// The maximum, not the sum: one legitimate download is recorded under every
/// present dimension, so summing would double-count it, while the minimum
/// would let a client reset its count by discarding one dimension (clearing a
/// cookie, rotating its network address). Pure function, no storage access.
pub fn effective_usage(records: &[Option<&QuotaRecord>]) -> u32 {
    records.iter().flatten().map(|r| r.downloads_used).max().unwrap_or(0)
}

/// Read/write helper over a [`QuotaStore`] for a request's key set.
///
/// The ledger itself performs plain reads and writes; the atomicity the
/// check-then-increment sequence needs is provided by the registrar, which
/// calls both methods inside one per-account lock scope.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Reconciled downloads-used for the given keys (0 when none exist).
    pub async fn usage(&self, keys: &[QuotaKey]) -> Result<u32, QuotaGateError> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            records.push(self.store.get(key).await?);
        }
        let options: Vec<Option<&QuotaRecord>> =
            records.iter().map(|r| r.as_ref()).collect();
        Ok(effective_usage(&options))
    }

    /// Append one download to every given key, creating records that do not
    /// yet exist, and return the new reconciled usage.
    ///
    /// Writes are sequential, not transactional: a store failure mid-sequence
    /// leaves the keys already written charged, and a caller retry charges
    /// them again. The account key is written last so a partial write never
    /// touches the account count; under max-reconciliation the worst case is
    /// one extra used download on a secondary dimension, never an uncharged
    /// one.
    pub async fn append(
        &self,
        keys: &[QuotaKey],
        event: &DownloadEvent,
    ) -> Result<u32, QuotaGateError> {
        let mut ordered: Vec<&QuotaKey> = keys.iter().collect();
        ordered.sort_by_key(|key| key.dimension == Dimension::Account);

        let mut new_usage = 0;
        for key in ordered {
            let mut record = self
                .store
                .get(key)
                .await?
                .unwrap_or_else(|| QuotaRecord::new(event.timestamp_millis));
            record.record(event.clone());
            new_usage = new_usage.max(record.downloads_used);
            self.store.put(key, record).await?;
        }
        debug!(
            target: "quotagate::quota",
            image = %event.image_reference,
            dimensions = keys.len(),
            new_usage,
            "download charged against free quota"
        );
        Ok(new_usage)
    }
}
