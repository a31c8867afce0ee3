#![allow(clippy::unwrap_used)]
// Integration tests for the usage ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_test::{assert_pending, assert_ready, task};
use tokio_util::sync::CancellationToken;

use netlease_core::{
    CallerIntent, HighBandwidthRequest, LeaseMediator, LedgerConfig, MediaRequestKind,
    MediatorConfig, NetworkKind, NetworkObserver, NetworkStatus, NetworkType, PeriodWindow,
    RequestType, RulesEngine, SimulatedRequester, Status, UsageLedger, WaitPolicy,
};

fn hourly() -> LedgerConfig {
    LedgerConfig {
        window: PeriodWindow::Rolling(Duration::from_secs(3600)),
        tick_interval: None,
    }
}

#[test]
fn test_records_sum_into_period() {
    let ledger = UsageLedger::new(hourly()).unwrap();
    let wifi = NetworkStatus::new("wlan0", NetworkType::bare(NetworkKind::Wifi), Status::Available);

    for _ in 0..5 {
        ledger.record_for(&wifi, RequestType::Sync, 1_000, Utc::now());
    }

    let period = ledger.current_period_usage();
    assert_eq!(period.bytes_for(NetworkKind::Wifi), 5_000);
    assert_eq!(period.records, 5);
}

#[test]
fn test_kind_survives_network_purge() {
    let observer = NetworkObserver::default();
    observer.apply_added(NetworkStatus::new(
        "rmnet0",
        NetworkType::bare(NetworkKind::Cellular),
        Status::Available,
    ));
    let ledger = UsageLedger::new(hourly())
        .unwrap()
        .with_networks(observer.subscribe());

    ledger.record("rmnet0", RequestType::Api, 200, Utc::now());
    observer.apply_removed(&"rmnet0".into());
    let late = ledger.record("rmnet0", RequestType::Api, 300, Utc::now());

    assert_eq!(late.network_kind, NetworkKind::Cellular);
    assert_eq!(ledger.current_period_usage().bytes_for(NetworkKind::Cellular), 500);
}

#[test]
fn test_subscribers_see_each_write() {
    let ledger = UsageLedger::new(hourly()).unwrap();
    let mut periods = ledger.subscribe();

    let mut changed = task::spawn(periods.changed());
    assert_pending!(changed.poll());

    ledger.record("wlan0", RequestType::Image, 42, Utc::now());

    assert!(changed.is_woken());
    let period = assert_ready!(changed.poll()).unwrap();
    assert_eq!(period.total(), 42);
}

#[tokio::test(start_paused = true)]
async fn test_ticker_stops_on_cancel() {
    let ledger = Arc::new(
        UsageLedger::new(LedgerConfig {
            window: PeriodWindow::Rolling(Duration::from_secs(3600)),
            tick_interval: Some(Duration::from_secs(1)),
        })
        .unwrap(),
    );
    let mut periods = ledger.subscribe();
    let cancel = CancellationToken::new();
    let ticker = ledger.spawn_ticker(cancel.clone()).unwrap();

    // The first tick fires immediately and republishes the period.
    assert!(periods.changed().await.is_some());

    cancel.cancel();
    ticker.await.unwrap();
}

#[test]
fn test_ticker_absent_without_interval() {
    let ledger = Arc::new(UsageLedger::new(hourly()).unwrap());
    assert!(ledger.spawn_ticker(CancellationToken::new()).is_none());
}

#[tokio::test]
async fn test_full_request_flow() {
    let observer = NetworkObserver::default();
    observer.apply_added(NetworkStatus::new(
        "bt0",
        NetworkType::bare(NetworkKind::Bluetooth),
        Status::Available,
    ));
    let engine = RulesEngine::default();
    let platform = SimulatedRequester::new();
    let mediator = LeaseMediator::new(MediatorConfig::default(), Arc::new(platform.clone()));
    mediator.watch_networks(observer.subscribe()).await;
    let ledger = UsageLedger::new(hourly())
        .unwrap()
        .with_networks(observer.subscribe());

    let download = RequestType::Media(MediaRequestKind::Download);
    assert!(engine.is_high_bandwidth(download));
    let request: HighBandwidthRequest = engine.high_bandwidth_request(
        download,
        &observer.snapshot(),
        &CallerIntent::default(),
        WaitPolicy::FailFast,
    );

    let lease = mediator.request_high_bandwidth_network(&request).await.unwrap();
    assert_eq!(lease.granted_type(), NetworkKind::Wifi);

    // The platform brings the radio up and the observer reports it.
    observer.apply_added(NetworkStatus::new(
        "wlan0",
        NetworkType::bare(NetworkKind::Wifi),
        Status::Available,
    ));
    ledger.record("wlan0", download, 8 * 1024 * 1024, Utc::now());
    lease.close();

    assert_eq!(
        ledger.current_period_usage().bytes_for(NetworkKind::Wifi),
        8 * 1024 * 1024
    );
    assert_eq!(platform.clear_count(NetworkKind::Wifi), 1);
    mediator.shutdown().await;
}
