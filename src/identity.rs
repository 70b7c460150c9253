//! Identity dimensions and quota key derivation.
//!
//! A request can present up to three identity dimensions: the account id
//! (required), a device id (optional, e.g. a cookie-backed token), and the
//! network address the transport layer observed. Each present dimension maps
//! to one quota key per calendar-year epoch. Key derivation is side-effect
//! free; enforcement happens in the registrar.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::QuotaGateError;

/// One of the identity dimensions a quota record can be keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Stable account identifier supplied by the caller.
    Account,
    /// Device/browser identifier; weaker, clients can discard it.
    Device,
    /// Network address; weakest signal, churns fastest.
    Network,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Account => write!(f, "account"),
            Dimension::Device => write!(f, "device"),
            Dimension::Network => write!(f, "network"),
        }
    }
}

/// Lookup key for one quota record: `{dimension}:{identifier}:{epoch}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaKey {
    pub dimension: Dimension,
    pub identifier: String,
    /// Calendar year that buckets free-download counts.
    pub epoch: i32,
}

impl QuotaKey {
    pub fn new(dimension: Dimension, identifier: impl Into<String>, epoch: i32) -> Self {
        Self { dimension, identifier: identifier.into(), epoch }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.dimension, self.identifier, self.epoch)
    }
}

/// The identity dimensions presented by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    account_id: String,
    device_id: Option<String>,
    network_address: String,
}

impl Identity {
    /// Build an identity, rejecting a missing/empty account id.
    ///
    /// The device id is optional; an empty string is normalized to `None` so
    /// clients that send blank form fields don't create a phantom dimension.
    pub fn new(
        account_id: impl Into<String>,
        device_id: Option<String>,
        network_address: impl Into<String>,
    ) -> Result<Self, QuotaGateError> {
        let account_id = account_id.into();
        if account_id.trim().is_empty() {
            return Err(QuotaGateError::Validation { field: "account_id" });
        }
        let network_address = network_address.into();
        if network_address.trim().is_empty() {
            return Err(QuotaGateError::Validation { field: "network_address" });
        }
        let device_id = device_id.filter(|d| !d.trim().is_empty());
        Ok(Self { account_id, device_id, network_address })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn network_address(&self) -> &str {
        &self.network_address
    }

    /// Derive the quota keys for every present dimension in this epoch.
    ///
    /// Always yields the account and network keys; the device key only when a
    /// device id was presented.
    pub fn quota_keys(&self, epoch: i32) -> Vec<QuotaKey> {
        let mut keys = Vec::with_capacity(3);
        keys.push(QuotaKey::new(Dimension::Account, self.account_id.clone(), epoch));
        if let Some(device) = &self.device_id {
            keys.push(QuotaKey::new(Dimension::Device, device.clone(), epoch));
        }
        keys.push(QuotaKey::new(Dimension::Network, self.network_address.clone(), epoch));
        keys
    }
}

/// Calendar year (UTC) for a unix-epoch millisecond reading.
///
/// Free-download counts reset when the year rolls over; a request racing the
/// rollover lands in whichever epoch its clock reading falls into.
pub fn epoch_for(now_millis: u64) -> i32 {
    DateTime::<Utc>::from_timestamp_millis(now_millis as i64)
        .map(|dt| dt.year())
        .unwrap_or(1970)
}
