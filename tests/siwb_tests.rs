//! Sign-In With Bitcoin bridge and drift watcher.
//! 1. exactly one signature per manual connect, none on passive observation
//! 2. failure edges reset to Idle
//! 3. address / network drift forces a silent disconnect within one cycle
//! 4. the manual flag is bounded by its TTL
//! 5. overlapping connects are Busy

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use beeconnect::core::keys;
use beeconnect::drift::DriftReason;
use beeconnect::session::{ForcedReason, SessionEvent};
use beeconnect::watcher::SessionWatcher;
use beeconnect::{BridgePhase, BtcNetwork, BtcProviderKind, Chain, ConnectError, Provider};
use common::*;

fn watcher(h: &Harness) -> SessionWatcher {
    SessionWatcher::new(h.hub.manager().clone(), h.hub.bridge().clone(), Duration::from_secs(30))
}

/// Test: manual connect signs once and reaches Authenticated with P
#[tokio::test]
async fn manual_connect_signs_exactly_once() {
    let h = Harness::new();
    let bridge = h.hub.bridge();

    let principal = bridge.connect(BtcProviderKind::Unisat).await.expect("connect");
    assert_eq!(principal, siwb_principal(ADDR_1));
    assert_eq!(bridge.phase(), BridgePhase::Authenticated);
    assert_eq!(h.doubles.unisat.signs(), 1);
    assert!(!bridge.manual_pending());

    // Passive, address-unchanged observations never re-sign.
    for _ in 0..3 {
        assert_eq!(bridge.observe().await.expect("observe"), Some(principal.clone()));
    }
    assert_eq!(watcher(&h).poll().await.bitcoin, None);
    assert_eq!(h.doubles.unisat.signs(), 1);
    assert_eq!(h.doubles.siwb.prepares.load(Ordering::SeqCst), 1);

    assert_eq!(h.hub.store().principal(Chain::Bitcoin), Some(principal.clone()));
    assert_eq!(h.storage.get(keys::bitcoin::ADDRESS).unwrap().as_deref(), Some(ADDR_1));
    assert_eq!(h.storage.get(keys::bitcoin::PRINCIPAL).unwrap(), Some(principal.to_text()));
    assert_eq!(h.storage.get(keys::bitcoin::PROVIDER).unwrap().as_deref(), Some("unisat"));
}

/// Test: a wallet that is connected but was never manually asked does not sign
#[tokio::test]
async fn passive_observation_never_signs() {
    let h = Harness::new();
    h.doubles.unisat.authorize();
    let bridge = h.hub.bridge();

    bridge.facade().reconnect(BtcProviderKind::Unisat).await.expect("reconnect");
    assert_eq!(bridge.observe().await.expect("observe"), None);
    assert_eq!(bridge.phase(), BridgePhase::ChallengePrepared);
    assert_eq!(h.doubles.unisat.signs(), 0);

    // Challenge is cached per address.
    bridge.observe().await.expect("observe");
    assert_eq!(h.doubles.siwb.prepares.load(Ordering::SeqCst), 1);
    assert!(!h.hub.store().is_connected(Chain::Bitcoin));
}

/// Test: a manual connect waits for the challenge an observation already has in flight
#[tokio::test(start_paused = true)]
async fn manual_connect_waits_for_inflight_challenge() {
    let h = Harness::new();
    h.doubles.unisat.authorize();
    h.doubles.siwb.set_prepare_delay(Duration::from_secs(1));
    let bridge = h.hub.bridge();
    bridge.facade().reconnect(BtcProviderKind::Unisat).await.expect("reconnect");

    let (passive, manual) = tokio::join!(bridge.observe(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        bridge.connect(BtcProviderKind::Unisat).await
    });

    assert_eq!(manual.expect("connect"), siwb_principal(ADDR_1));
    assert_eq!(passive.expect("observe"), None, "the pending connect signs, not the observer");
    assert_eq!(h.doubles.unisat.signs(), 1);
    assert_eq!(h.doubles.siwb.prepares.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.phase(), BridgePhase::Authenticated);
    assert!(!bridge.is_busy());
}

/// Test: a manual connect whose caller went away is finished by the next observation
#[tokio::test(start_paused = true)]
async fn abandoned_manual_connect_completes_on_observation() {
    let h = Harness::new();
    h.doubles.siwb.set_prepare_delay(Duration::from_secs(1));
    let bridge = h.hub.bridge();

    let dropped = tokio::time::timeout(Duration::from_millis(10), bridge.connect(BtcProviderKind::Unisat)).await;
    assert!(dropped.is_err());
    assert!(bridge.manual_pending());
    assert!(!bridge.is_busy());

    assert_eq!(bridge.observe().await.expect("observe"), Some(siwb_principal(ADDR_1)));
    assert_eq!(h.doubles.unisat.signs(), 1);
    assert_eq!(h.doubles.siwb.prepares.load(Ordering::SeqCst), 2);
}

/// Test: a second connect while the first is pending is Busy and never prompts twice
#[tokio::test(start_paused = true)]
async fn concurrent_bitcoin_connect_is_busy() {
    let h = Harness::new();
    h.doubles.siwb.set_prepare_delay(Duration::from_secs(1));
    let bridge = h.hub.bridge();

    let (first, second) = tokio::join!(bridge.connect(BtcProviderKind::Unisat), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(bridge.is_busy());
        bridge.connect(BtcProviderKind::Unisat).await
    });

    assert_eq!(first.expect("first connect"), siwb_principal(ADDR_1));
    assert!(matches!(second, Err(ConnectError::Busy(Chain::Bitcoin))));
    assert!(!bridge.is_busy());
    assert_eq!(h.doubles.unisat.signs(), 1);

    // Once authenticated, connect is a no-op returning the principal.
    assert_eq!(bridge.connect(BtcProviderKind::Unisat).await.expect("again"), siwb_principal(ADDR_1));
}

/// Test: an expired manual flag is dropped instead of prompting later
#[tokio::test(start_paused = true)]
async fn stale_manual_flag_does_not_sign() {
    let h = Harness::with_config(config().with_manual_connect_ttl(Duration::from_secs(60)));
    h.doubles.siwb.set_prepare_delay(Duration::from_secs(120));
    let bridge = h.hub.bridge();

    let result = bridge.connect(BtcProviderKind::Unisat).await;
    assert!(matches!(result, Err(ConnectError::NotConnected)));
    assert_eq!(h.doubles.unisat.signs(), 0);
    assert!(!bridge.manual_pending());

    bridge.observe().await.expect("observe");
    assert_eq!(h.doubles.unisat.signs(), 0);
}

/// Test: provider not installed → remediation with install link, phase Idle
#[tokio::test]
async fn missing_provider_has_install_link() {
    let h = Harness::new();
    let bridge = h.hub.bridge();

    let err = bridge.connect(BtcProviderKind::Xverse).await.expect_err("not installed");
    assert!(matches!(err, ConnectError::ProviderUnavailable { .. }));
    assert!(err.user_message().contains("https://www.xverse.app/download"));
    assert_eq!(bridge.phase(), BridgePhase::Idle);
    assert!(!bridge.manual_pending());
}

/// Test: a rejected signature resets to Idle and the provider session is dropped
#[tokio::test]
async fn rejected_signature_resets() {
    let h = Harness::new();
    h.doubles.unisat.reject_sign.store(true, Ordering::SeqCst);
    let bridge = h.hub.bridge();

    let result = bridge.connect(BtcProviderKind::Unisat).await;
    assert!(matches!(result, Err(ConnectError::ConsentRejected)));
    assert_eq!(bridge.phase(), BridgePhase::Idle);
    assert!(!bridge.manual_pending());
    assert_eq!(bridge.facade().active_kind(), None);
    assert!(!h.hub.store().is_connected(Chain::Bitcoin));

    // User retries by connecting again.
    h.doubles.unisat.reject_sign.store(false, Ordering::SeqCst);
    let principal = bridge.connect(BtcProviderKind::Unisat).await.expect("retry");
    assert_eq!(principal, siwb_principal(ADDR_1));
}

/// Test: exchange failure surfaces and leaves nothing half-authenticated
#[tokio::test]
async fn exchange_failure_resets() {
    let h = Harness::new();
    h.doubles.siwb.fail_login.store(true, Ordering::SeqCst);
    let bridge = h.hub.bridge();

    let result = bridge.connect(BtcProviderKind::Unisat).await;
    assert!(matches!(result, Err(ConnectError::Exchange(_))));
    assert_eq!(bridge.principal(), None);
    assert!(matches!(
        bridge.create_actor(&canister(), ledger_service()),
        Err(ConnectError::NotConnected)
    ));
}

/// Test: bc1..1 authenticated, wallet silently switches to bc1..2 → next tick clears P1
#[tokio::test]
async fn address_drift_forces_disconnect() {
    let h = Harness::new();
    let mut events = h.hub.store().events();
    let p1 = h.hub.bridge().connect(BtcProviderKind::Unisat).await.expect("connect");
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Connected { chain: Chain::Bitcoin, principal: p1 });

    h.doubles.unisat.switch_address(ADDR_2);
    let observation = watcher(&h).poll().await;

    assert_eq!(observation.bitcoin, Some(ForcedReason::Drift(DriftReason::AddressChanged)));
    assert!(!h.hub.store().is_connected(Chain::Bitcoin));
    assert_eq!(h.hub.bridge().principal(), None);
    assert_eq!(h.storage.get(keys::bitcoin::PRINCIPAL).unwrap(), None);
    assert_eq!(h.storage.get(keys::bitcoin::IDENTITY).unwrap(), None);
    assert_eq!(h.doubles.unisat.signs(), 1, "drift never re-prompts");
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected { chain: Chain::Bitcoin });
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ForcedDisconnect {
            chain: Chain::Bitcoin,
            reason: ForcedReason::Drift(DriftReason::AddressChanged)
        }
    );
}

/// Test: a network switch disconnects within one observation cycle
#[tokio::test]
async fn network_drift_forces_disconnect() {
    let h = Harness::new();
    h.hub.connect(Provider::Bitcoin(BtcProviderKind::Unisat)).await.expect("connect");

    h.doubles.unisat.switch_network(BtcNetwork::Testnet);
    let observation = watcher(&h).poll().await;

    assert_eq!(observation.bitcoin, Some(ForcedReason::Drift(DriftReason::NetworkChanged)));
    assert!(!h.hub.is_connected(Chain::Bitcoin).await.connected);
}

/// Test: a locked wallet reads as provider-disconnected drift
#[tokio::test]
async fn locked_wallet_forces_disconnect() {
    let h = Harness::new();
    h.hub.bridge().connect(BtcProviderKind::Unisat).await.expect("connect");

    h.doubles.unisat.lock();
    let observation = watcher(&h).poll().await;
    assert_eq!(observation.bitcoin, Some(ForcedReason::Drift(DriftReason::ProviderDisconnected)));
    assert_eq!(h.hub.bridge().phase(), BridgePhase::Idle);
}

/// Test: the bitcoin-chain actor is bound to the SIWB principal
#[tokio::test]
async fn bitcoin_actor_uses_delegated_identity() {
    let h = Harness::new();
    h.hub.connect(Provider::Bitcoin(BtcProviderKind::Unisat)).await.expect("connect");

    let actor = h
        .hub
        .create_actor(Chain::Bitcoin, &canister(), ledger_service())
        .await
        .expect("actor");
    assert_eq!(actor.principal(), siwb_principal(ADDR_1));
    actor.call("balance", serde_json::json!({})).await.expect("call");
    assert_eq!(h.doubles.rpc.calls.lock().unwrap()[0].signature.delegations.len(), 1);

    h.hub.disconnect(Chain::Bitcoin).await;
    assert!(h.hub.create_actor(Chain::Bitcoin, &canister(), ledger_service()).await.is_err());
}

/// Test: a spawned watcher reacts to a pushed provider change without polling
#[tokio::test]
async fn spawned_watcher_reacts_to_provider_events() {
    let h = Harness::new();
    h.hub.bridge().connect(BtcProviderKind::Unisat).await.expect("connect");
    let shutdown = beeconnect::Shutdown::new();
    let task = h.hub.spawn_watcher(&shutdown);
    let mut session = h.hub.store().subscribe(Chain::Bitcoin);

    h.doubles.unisat.switch_network(BtcNetwork::Signet);
    h.hub.bridge().facade().refresh().await.expect("refresh");

    tokio::time::timeout(Duration::from_secs(5), session.wait_for(|s| !s.is_connected()))
        .await
        .expect("drift observed")
        .expect("store alive");

    shutdown.trigger().await;
    task.await.expect("watcher stopped");
}

/// Test: a wallet on the wrong network is refused before any signature
#[tokio::test]
async fn wrong_network_is_refused() {
    let h = Harness::new();
    h.doubles.unisat.switch_network(BtcNetwork::Testnet);

    let result = h.hub.bridge().connect(BtcProviderKind::Unisat).await;
    assert!(matches!(result, Err(ConnectError::InvalidAddress(_))));
    assert_eq!(h.doubles.unisat.signs(), 0);
    assert_eq!(h.hub.bridge().phase(), BridgePhase::Idle);
    assert_eq!(h.storage.get(keys::bitcoin::PROVIDER).unwrap(), None);
}

/// Test: the spawned watcher re-reads the wallet on its interval without any pushed event
#[tokio::test]
async fn spawned_watcher_polls_on_interval() {
    let h = Harness::with_config(config().with_watch_interval(Duration::from_millis(50)));
    h.hub.bridge().connect(BtcProviderKind::Unisat).await.expect("connect");
    let shutdown = beeconnect::Shutdown::new();
    let task = h.hub.spawn_watcher(&shutdown);
    let mut session = h.hub.store().subscribe(Chain::Bitcoin);

    // Wallet-side switch only; nothing refreshes the facade but the watcher.
    h.doubles.unisat.switch_address(ADDR_2);

    tokio::time::timeout(Duration::from_secs(5), session.wait_for(|s| !s.is_connected()))
        .await
        .expect("drift observed")
        .expect("store alive");
    assert_eq!(h.doubles.unisat.signs(), 1);

    shutdown.trigger().await;
    task.await.expect("watcher stopped");
}
