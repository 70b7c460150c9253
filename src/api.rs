//! Request/response contracts for the engine's external operations.
//!
//! Transport-agnostic shapes: any RPC mechanism that round-trips these types
//! (they all serialize with serde) satisfies the interface. HTTP routing and
//! status mapping live in the embedding service, not here.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::quota::DownloadEvent;

/// Downloads remaining for an identity: a count, or unlimited for grant
/// holders. Serializes as a bare integer or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Limited(u32),
    Unlimited,
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Remaining::Limited(count) => serializer.serialize_u32(*count),
            Remaining::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Remaining {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Tag(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Count(count) => Ok(Remaining::Limited(count)),
            Raw::Tag(tag) if tag == "unlimited" => Ok(Remaining::Unlimited),
            Raw::Tag(other) => Err(D::Error::custom(format!("invalid remaining value: {other}"))),
        }
    }
}

/// Input for the advisory allowance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAllowanceRequest {
    pub account_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub activation_code: Option<String>,
    /// Supplied by the transport layer, never by the client.
    pub network_address: String,
}

/// Result of the advisory allowance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceResponse {
    pub can_download: bool,
    pub remaining_downloads: Remaining,
    pub unlimited_access: bool,
}

/// Input for the authoritative download registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDownloadRequest {
    pub account_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Supplied by the transport layer, never by the client.
    pub network_address: String,
    pub image_reference: String,
    pub image_title: String,
}

/// Receipt for a registered download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReceipt {
    pub success: bool,
    pub remaining_downloads: Remaining,
    pub downloads_used: u64,
    /// Set when 0 or 1 free downloads remain, for UI messaging.
    pub low_quota_warning: bool,
}

/// Input from the payment collaborator after a confirmed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub account_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub payment_id: String,
    pub payment_method: String,
    /// Opaque capability tags carried onto the grant.
    #[serde(default)]
    pub features: Vec<String>,
    /// How long unlimited access lasts, in seconds.
    pub validity_secs: u64,
}

/// Receipt for a created (or replaced) entitlement grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationReceipt {
    pub activation_code: String,
    pub issued_at_millis: u64,
    pub expires_at_millis: u64,
    pub features: Vec<String>,
}

/// Input for entitlement verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub account_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub activation_code: Option<String>,
}

/// Result of entitlement verification. Absent grant is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub has_unlimited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_millis: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_count: Option<u64>,
}

/// Download history and current standing for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub downloads_used: u32,
    pub remaining_downloads: Remaining,
    pub unlimited_access: bool,
    pub download_history: Vec<DownloadEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_serializes_as_int_or_tag() {
        assert_eq!(serde_json::to_string(&Remaining::Limited(2)).unwrap(), "2");
        assert_eq!(serde_json::to_string(&Remaining::Unlimited).unwrap(), "\"unlimited\"");
    }

    #[test]
    fn remaining_round_trips() {
        let limited: Remaining = serde_json::from_str("2").unwrap();
        assert_eq!(limited, Remaining::Limited(2));

        let unlimited: Remaining = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(unlimited, Remaining::Unlimited);

        assert!(serde_json::from_str::<Remaining>("\"lots\"").is_err());
    }

    #[test]
    fn optional_request_fields_default() {
        let req: CheckAllowanceRequest = serde_json::from_str(
            r#"{"account_id":"u1","network_address":"203.0.113.9"}"#,
        )
        .unwrap();
        assert_eq!(req.device_id, None);
        assert_eq!(req.activation_code, None);
    }

    #[test]
    fn verify_response_omits_absent_fields() {
        let absent = VerifyResponse {
            has_unlimited: false,
            expires_at_millis: None,
            downloads_count: None,
        };
        assert_eq!(serde_json::to_string(&absent).unwrap(), r#"{"has_unlimited":false}"#);
    }
}
