#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotagate
//!
//! Entitlement and quota tracking engine: a limited number of free downloads
//! per end-user identity per calendar year, with paid upgrades to unlimited
//! access for a bounded period.
//!
//! ## Features
//!
//! - **Free-quota enforcement** across three identity dimensions (account,
//!   device, network address), reconciled by maximum so discarding one
//!   dimension never resets the count
//! - **Entitlement grants** reachable by account id, device id, payment id,
//!   or activation code, with expiry
//! - **Atomic registration**: per-account locking makes the check-then-record
//!   sequence race-free even under concurrent requests
//! - **Pluggable storage** behind async store traits, with in-memory backends
//!   included
//! - **Background eviction** of stale quota records and expired grants
//!
//! ## Quick Start
//!
//! ```rust
//! use quotagate::{QuotaGate, RegisterDownloadRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let gate = QuotaGate::builder().build();
//!
//!     let receipt = gate
//!         .register_download(RegisterDownloadRequest {
//!             account_id: "u1".into(),
//!             device_id: None,
//!             network_address: "203.0.113.9".into(),
//!             image_reference: "img-1".into(),
//!             image_title: "Sunset".into(),
//!         })
//!         .await
//!         .expect("first download is within the free quota");
//!     assert!(receipt.success);
//! }
//! ```

pub mod api;
pub mod clock;
pub mod engine;
pub mod entitlement;
pub mod error;
pub mod identity;
pub mod quota;
pub mod registrar;
pub mod sleeper;
pub mod store;
pub mod sweeper;

// Re-exports
pub use api::{
    ActivateRequest, ActivationReceipt, AllowanceResponse, CheckAllowanceRequest,
    DownloadReceipt, HistoryResponse, RegisterDownloadRequest, Remaining, VerifyRequest,
    VerifyResponse,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{QuotaGate, QuotaGateBuilder};
pub use entitlement::{EntitlementGrant, EntitlementService, GrantKey};
pub use error::QuotaGateError;
pub use identity::{Dimension, Identity, QuotaKey};
pub use quota::{DownloadEvent, QuotaRecord, FREE_QUOTA};
pub use registrar::{Allowance, DownloadOutcome, DownloadRegistrar};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
pub use store::memory::{InMemoryEntitlementStore, InMemoryQuotaStore};
pub use store::{EntitlementStore, QuotaStore, StoreError};
pub use sweeper::{EvictionSweeper, SweepReport, SweeperConfig, SweeperHandle};
