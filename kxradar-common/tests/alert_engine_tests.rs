//! End-to-end alert engine runs against the in-process host

use std::sync::Arc;
use std::time::Duration;

use kxradar_common::alert::{run_alert_engine, AlertBus, AlertEvent, AlertKind, SuppressReason};
use kxradar_common::error::StreamError;
use kxradar_common::host::{LoopbackHost, RideState, StreamState, RADAR_DATA_TYPE};
use kxradar_common::settings::{encode_current, Configuration, SchemaVersion};
use kxradar_common::store::{BlobStore, MemoryStore};
use kxradar_common::tones::Tone;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    store: MemoryStore,
    host: Arc<LoopbackHost>,
    events: broadcast::Receiver<AlertEvent>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn start(store: MemoryStore) -> Harness {
    let host = Arc::new(LoopbackHost::new());
    let bus = AlertBus::new(64);
    let events = bus.subscribe();
    let (stop, stopped) = oneshot::channel::<()>();

    let engine_store: Arc<dyn BlobStore> = Arc::new(store.clone());
    let engine_host = Arc::clone(&host);
    let task = tokio::spawn(async move {
        run_alert_engine(engine_store, engine_host, bus, 16, async {
            let _ = stopped.await;
        })
        .await
        .expect("engine should start");
    });

    timeout(WAIT, async {
        while host.consumer_count() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("engine should register its listeners");

    Harness {
        store,
        host,
        events,
        stop,
        task,
    }
}

async fn next_matching<F>(events: &mut broadcast::Receiver<AlertEvent>, mut pred: F) -> AlertEvent
where
    F: FnMut(&AlertEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("bus should stay open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

#[tokio::test]
async fn test_threat_plays_and_listeners_released() {
    let mut harness = start(MemoryStore::new()).await;

    harness
        .host
        .push_data(RADAR_DATA_TYPE, StreamState::radar_threat_level(2));
    let event = next_matching(&mut harness.events, |e| {
        matches!(e, AlertEvent::AlertPlayed { .. })
    })
    .await;
    match event {
        AlertEvent::AlertPlayed {
            alert, segments, ..
        } => {
            assert_eq!(alert, AlertKind::Threat { level: 2 });
            assert_eq!(segments, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        harness.host.dispatched()[0].tones(),
        &[Tone::audible(200, 100), Tone::silence(300)]
    );

    harness.stop.send(()).unwrap();
    harness.task.await.unwrap();
    assert_eq!(harness.host.consumer_count(), 0);
    assert_eq!(harness.host.registration_count(), 2);
    assert_eq!(harness.host.removal_count(), 2);
}

#[tokio::test]
async fn test_disabled_settings_suppress() {
    let store = MemoryStore::new();
    let mut config = Configuration::default();
    config.enabled = false;
    store
        .write(SchemaVersion::CURRENT.storage_key(), &encode_current(&config))
        .unwrap();

    let mut harness = start(store).await;
    harness
        .host
        .push_data(RADAR_DATA_TYPE, StreamState::radar_threat_level(1));

    let event = next_matching(&mut harness.events, |e| {
        matches!(e, AlertEvent::AlertSuppressed { .. })
    })
    .await;
    assert!(matches!(
        event,
        AlertEvent::AlertSuppressed {
            reason: SuppressReason::Disabled,
            ..
        }
    ));
    assert!(harness.host.dispatched().is_empty());

    harness.stop.send(()).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_ride_gate_follows_live_updates() {
    let mut harness = start(MemoryStore::new()).await;

    let mut config = Configuration::default();
    config.in_ride_only = true;
    harness
        .store
        .write(SchemaVersion::CURRENT.storage_key(), &encode_current(&config))
        .unwrap();
    next_matching(&mut harness.events, |e| {
        matches!(e, AlertEvent::SettingsApplied { in_ride_only: true, .. })
    })
    .await;

    harness.host.push_ride_state(RideState::Recording);
    next_matching(&mut harness.events, |e| {
        matches!(
            e,
            AlertEvent::RideStateChanged {
                state: RideState::Recording,
                ..
            }
        )
    })
    .await;

    harness
        .host
        .push_data(RADAR_DATA_TYPE, StreamState::radar_threat_level(1));
    next_matching(&mut harness.events, |e| {
        matches!(e, AlertEvent::AlertPlayed { .. })
    })
    .await;
    assert_eq!(harness.host.dispatched().len(), 1);

    harness.stop.send(()).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_partial_subscription_failure_releases_listeners() {
    let host = Arc::new(LoopbackHost::new());
    // Ride listener registers, radar listener is rejected
    host.set_registration_limit(1);
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());

    let result = run_alert_engine(store, Arc::clone(&host), AlertBus::new(8), 16, async {}).await;

    assert!(matches!(result, Err(StreamError::Registration { .. })));
    assert_eq!(host.registration_count(), 1);
    assert_eq!(host.removal_count(), 1);
    assert_eq!(host.consumer_count(), 0);
}
