//! Eviction sweeps through the engine surface.

use quotagate::{
    ActivateRequest, ManualClock, QuotaGate, RegisterDownloadRequest, SweeperConfig,
};
use std::time::Duration;

// 2026-01-10T00:00:00Z — early in the year so a 31-day advance stays in epoch 2026.
const NOW_MILLIS: u64 = 1_768_003_200_000;
const DAY: Duration = Duration::from_secs(86_400);

fn register(account: &str) -> RegisterDownloadRequest {
    RegisterDownloadRequest {
        account_id: account.to_string(),
        device_id: None,
        network_address: "203.0.113.9".to_string(),
        image_reference: "img-1".to_string(),
        image_title: "Sunset".to_string(),
    }
}

#[tokio::test]
async fn sweep_respects_the_retention_window() {
    let clock = ManualClock::at(NOW_MILLIS);
    let gate = QuotaGate::builder().clock(clock.clone()).build();

    gate.register_download(register("old")).await.unwrap();
    clock.advance(2 * DAY);
    gate.register_download(register("recent")).await.unwrap();

    // 31 days after "old" was touched, 29 days after "recent" was.
    clock.advance(29 * DAY);
    let report = gate.sweeper(SweeperConfig::default()).run_once().await.unwrap();

    // "old" lost its account record; its network record (7d window) and
    // "recent"'s network record are gone too.
    assert!(report.quota_records_evicted >= 1);
    let old = gate.history("old").await.unwrap();
    assert_eq!(old.downloads_used, 0);
    let recent = gate.history("recent").await.unwrap();
    assert_eq!(recent.downloads_used, 1);
}

#[tokio::test]
async fn sweep_removes_expired_grants_only() {
    let clock = ManualClock::at(NOW_MILLIS);
    let gate = QuotaGate::builder().clock(clock.clone()).build();

    gate.activate_entitlement(ActivateRequest {
        account_id: "short".to_string(),
        device_id: None,
        payment_id: "pay_s".to_string(),
        payment_method: "card".to_string(),
        features: vec![],
        validity_secs: 86_400,
    })
    .await
    .unwrap();
    gate.activate_entitlement(ActivateRequest {
        account_id: "long".to_string(),
        device_id: None,
        payment_id: "pay_l".to_string(),
        payment_method: "card".to_string(),
        features: vec![],
        validity_secs: 30 * 86_400,
    })
    .await
    .unwrap();

    clock.advance(2 * DAY);
    let report = gate.sweeper(SweeperConfig::default()).run_once().await.unwrap();
    assert_eq!(report.grants_evicted, 1);

    assert!(gate.history("long").await.unwrap().unlimited_access);
    assert!(!gate.history("short").await.unwrap().unlimited_access);
}

#[tokio::test]
async fn spawned_sweeper_stops_on_shutdown() {
    let gate = QuotaGate::builder().clock(ManualClock::at(NOW_MILLIS)).build();
    let handle = gate
        .sweeper(SweeperConfig { period: Duration::from_secs(3_600), ..Default::default() })
        .spawn();

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("sweeper shutdown should not wait out the period");
}
