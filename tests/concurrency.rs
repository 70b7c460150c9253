//! Race-freedom of the registration path under concurrent requests.

use quotagate::{
    ActivateRequest, ManualClock, QuotaGate, RegisterDownloadRequest, VerifyRequest,
};

// 2026-08-29T00:00:00Z
const NOW_MILLIS: u64 = 1_787_961_600_000;

fn register(account: &str, network: &str, image: &str) -> RegisterDownloadRequest {
    RegisterDownloadRequest {
        account_id: account.to_string(),
        device_id: Some(format!("device-{account}")),
        network_address: network.to_string(),
        image_reference: image.to_string(),
        image_title: image.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_registers_never_exceed_the_quota() {
    let gate = QuotaGate::builder().clock(ManualClock::at(NOW_MILLIS)).build();

    let mut handles = Vec::new();
    for i in 0..32 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.register_download(register("u1", "203.0.113.9", &format!("img-{i}"))).await
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert!(receipt.success);
                allowed += 1;
            }
            Err(e) => assert!(e.is_quota_exceeded(), "unexpected error: {e}"),
        }
    }
    // Exactly 3 winners regardless of interleaving; two tabs both told
    // "allowed" by a pre-flight check still can't both land a 4th download.
    assert_eq!(allowed, 3);

    let history = gate.history("u1").await.unwrap();
    assert_eq!(history.downloads_used, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn accounts_do_not_serialize_against_each_other() {
    let gate = QuotaGate::builder().clock(ManualClock::at(NOW_MILLIS)).build();

    let mut handles = Vec::new();
    for account in 0..8 {
        for i in 0..3 {
            let gate = gate.clone();
            // Distinct network per account: a shared address is itself a
            // quota dimension and would legitimately deny the later accounts.
            let network = format!("198.51.100.{account}");
            let account = format!("acct-{account}");
            handles.push(tokio::spawn(async move {
                gate.register_download(register(&account, &network, &format!("img-{i}"))).await
            }));
        }
    }

    for handle in handles {
        handle.await.unwrap().expect("each account has quota for 3 downloads");
    }

    for account in 0..8 {
        let history = gate.history(&format!("acct-{account}")).await.unwrap();
        assert_eq!(history.downloads_used, 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn unlimited_download_counter_loses_no_increments() {
    let gate = QuotaGate::builder().clock(ManualClock::at(NOW_MILLIS)).build();
    gate.activate_entitlement(ActivateRequest {
        account_id: "u1".to_string(),
        device_id: None,
        payment_id: "pay_1".to_string(),
        payment_method: "card".to_string(),
        features: vec![],
        validity_secs: 365 * 86_400,
    })
    .await
    .unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.register_download(register("u1", "203.0.113.9", &format!("img-{i}"))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("unlimited downloads never fail on quota");
    }

    let verified = gate
        .verify_entitlement(VerifyRequest {
            account_id: "u1".to_string(),
            device_id: None,
            activation_code: None,
        })
        .await
        .unwrap();
    assert_eq!(verified.downloads_count, Some(50));
}
