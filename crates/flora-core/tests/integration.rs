//! End-to-end tests for flora-core against the scripted radio.
//!
//! Every test runs on a paused clock, so timeouts, cool-downs and deadlines
//! elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use flora_core::{
    BackgroundFetcher, BackgroundOptions, CharacteristicRole, CircuitState, ConnectionPool, Error,
    HistoryLoadingProgress, LoadingState, LoopDetectionConfig, MemoryProgressStore,
    MemoryReadingSink, MockRadio, MockSensor, PeripheralId, PoolConfig, ProgressStore, RadioEvent,
    SessionEvent, SessionState, TimeoutScope, TransferOptions,
};
use tokio::time::sleep;

const SENSOR: &str = "C4:7C:8D:6A:3E:11";
const OTHER: &str = "C4:7C:8D:6A:3E:22";

async fn start(
    sensors: impl IntoIterator<Item = MockSensor>,
    config: PoolConfig,
) -> (Arc<MockRadio>, Arc<ConnectionPool>) {
    let radio = Arc::new(MockRadio::with_sensors(sensors));
    let pool = ConnectionPool::start(radio.clone(), config).await.unwrap();
    (radio, pool)
}

fn fast_transfer() -> TransferOptions {
    TransferOptions::default()
        .entry_spacing(Duration::ZERO)
        .retry_delay(Duration::from_millis(10))
}

fn drain(events: &mut flora_core::EventReceiver) -> Vec<SessionEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn warnings(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Warning { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Connection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_and_read_live() {
    let (_radio, pool) = start([MockSensor::new(SENSOR).battery(87)], PoolConfig::default()).await;

    let session = pool.connect(SENSOR).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    let info = session.device_info().unwrap();
    assert_eq!(info.battery, 87);
    assert_eq!(info.firmware, "3.2.1");

    let reading = session.read_live().await.unwrap();
    assert_eq!(reading.temperature, 21.5);
    assert_eq!(reading.moisture, 38);
    assert_eq!(reading.conductivity, 410);
    assert_eq!(session.last_reading(), Some(reading));
}

#[tokio::test(start_paused = true)]
async fn test_session_identity_is_stable() {
    let (radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;

    let a = pool.get_or_create_session(SENSOR);
    let b = pool.get_or_create_session(SENSOR);
    assert!(Arc::ptr_eq(&a, &b));

    let first = pool.connect(SENSOR).await.unwrap();
    let second = pool.connect(SENSOR).await.unwrap();
    assert!(Arc::ptr_eq(&first, &a));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(radio.stats().connects, 1);
    assert_eq!(pool.session_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_known_identifier_skips_scan() {
    let (radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;

    pool.connect(SENSOR).await.unwrap();
    assert_eq!(radio.stats().scans_started, 1);
    assert!(!pool.is_scanning());

    pool.disconnect(SENSOR).await.unwrap();
    assert_eq!(pool.session(SENSOR).unwrap().state(), SessionState::Disconnected);

    pool.connect(SENSOR).await.unwrap();
    assert_eq!(radio.stats().scans_started, 1);
    assert_eq!(radio.stats().connects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_remembered_identifier_used_directly() {
    let (radio, pool) = start([MockSensor::new(SENSOR).hidden()], PoolConfig::default()).await;

    pool.remember(SENSOR, PeripheralId::new(SENSOR));
    pool.connect(SENSOR).await.unwrap();
    assert_eq!(radio.stats().scans_started, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unseen_device_times_out() {
    let config = PoolConfig::default().scan_timeout(Duration::from_secs(2));
    let (_radio, pool) = start([MockSensor::new(SENSOR).hidden()], config).await;

    let result = pool.connect(SENSOR).await;
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    assert!(!pool.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_scan_sorted_by_signal() {
    let (_radio, pool) = start(
        [
            MockSensor::new(SENSOR).rssi(-75),
            MockSensor::new(OTHER).rssi(-40),
        ],
        PoolConfig::default(),
    )
    .await;

    let found = pool.scan(Duration::from_secs(1)).await.unwrap();
    let ids: Vec<_> = found.iter().map(|s| s.identifier.as_str()).collect();
    assert_eq!(ids, vec![OTHER, SENSOR]);
    assert!(!pool.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_slot_ceiling_queues_connects() {
    let config = PoolConfig::default().max_sessions(1);
    let (_radio, pool) = start([MockSensor::new(SENSOR), MockSensor::new(OTHER)], config).await;

    pool.connect(SENSOR).await.unwrap();
    assert_eq!(pool.available_slots(), 0);

    let waiting = pool.connect(OTHER);
    let release = async {
        sleep(Duration::from_secs(1)).await;
        assert_eq!(pool.session(OTHER).unwrap().state(), SessionState::Disconnected);
        pool.disconnect(SENSOR).await.unwrap();
    };
    let (connected, ()) = tokio::join!(waiting, release);

    assert_eq!(connected.unwrap().state(), SessionState::Authenticated);
    assert_eq!(pool.connected_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_garbled_handshake_retried() {
    let (radio, pool) = start([MockSensor::new(SENSOR).auth_failures(2)], PoolConfig::default()).await;

    let session = pool.connect(SENSOR).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.device_info().unwrap().battery, 95);
    assert_eq!(radio.stats().connects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_handshake_fails_authentication() {
    // one more garbled answer than the handshake retries allow
    let (_radio, pool) = start([MockSensor::new(SENSOR).auth_failures(3)], PoolConfig::default()).await;

    let result = pool.connect(SENSOR).await;
    assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    let session = pool.session(SENSOR).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    // the sensor answers properly on the next attempt
    pool.connect(SENSOR).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic_rejected() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).missing(CharacteristicRole::DeviceTime)],
        PoolConfig::default(),
    )
    .await;

    let result = pool.connect(SENSOR).await;
    assert!(matches!(
        result,
        Err(Error::CharacteristicNotFound {
            role: CharacteristicRole::DeviceTime,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_device_times_out() {
    let config = PoolConfig::default().connection(
        flora_core::ConnectionConfig::default().connection_timeout(Duration::from_secs(3)),
    );
    let (_radio, pool) = start([MockSensor::new(SENSOR).unresponsive()], config).await;

    let result = pool.connect(SENSOR).await;
    assert!(matches!(
        result,
        Err(Error::Timeout {
            scope: TimeoutScope::Device,
            ..
        })
    ));
    assert_eq!(pool.session(SENSOR).unwrap().state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_read_requires_authentication() {
    let (_radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;

    let session = pool.get_or_create_session(SENSOR);
    assert!(matches!(
        session.read_live().await,
        Err(Error::InvalidState { .. })
    ));
}

// =============================================================================
// Loop detection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_repeated_failures() {
    let config = PoolConfig::default().loop_detection(
        LoopDetectionConfig::default()
            .connection_limit(100, Duration::from_secs(300))
            .breaker(5, Duration::from_secs(30)),
    );
    let (radio, pool) = start([MockSensor::new(SENSOR).connect_failures(10)], config).await;

    for _ in 0..5 {
        let result = pool.connect(SENSOR).await;
        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    }
    let session = pool.session(SENSOR).unwrap();
    assert_eq!(session.circuit_state(), CircuitState::Open);

    let connects = radio.stats().connects;
    assert!(matches!(
        pool.connect(SENSOR).await,
        Err(Error::CircuitOpen { .. })
    ));
    assert_eq!(radio.stats().connects, connects);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(session.circuit_state(), CircuitState::HalfOpen);

    // the half-open trial fails and the breaker reopens
    assert!(matches!(
        pool.connect(SENSOR).await,
        Err(Error::ConnectionFailed { .. })
    ));
    assert_eq!(session.circuit_state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loop_stops_reconnecting() {
    let config = PoolConfig::default().loop_detection(
        LoopDetectionConfig::default().connection_limit(3, Duration::from_secs(300)),
    );
    let (_radio, pool) = start([MockSensor::new(SENSOR)], config).await;
    let session = pool.get_or_create_session(SENSOR);
    let mut events = session.subscribe();

    for _ in 0..3 {
        pool.connect(SENSOR).await.unwrap();
        pool.disconnect(SENSOR).await.unwrap();
    }

    let result = pool.connect(SENSOR).await;
    assert!(matches!(
        result,
        Err(Error::ConnectionLoop { attempts: 4, .. })
    ));
    let warnings = warnings(&drain(&mut events));
    assert!(warnings.iter().any(|w| w.contains("Connection loop")));
}

// =============================================================================
// Radio events
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_peripheral_events_dropped() {
    let (radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();

    radio.inject(RadioEvent::ValueUpdated {
        peripheral: PeripheralId::new("FF:FF:FF:FF:FF:FF"),
        characteristic: CharacteristicRole::LiveData.uuid(),
        value: vec![0; 16],
    });
    radio.inject(RadioEvent::Disconnected {
        peripheral: PeripheralId::new("FF:FF:FF:FF:FF:FF"),
        reason: Some("gone".to_string()),
    });
    sleep(Duration::from_millis(100)).await;

    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(drain(&mut events).is_empty());
    session.read_live().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_reported() {
    let (radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();
    let mut state = session.watch_state();

    radio.drop_link(SENSOR);
    state
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();

    let collected = drain(&mut events);
    assert!(collected.iter().any(|e| matches!(
        e,
        SessionEvent::StateChanged {
            state: SessionState::Error(_),
            ..
        }
    )));
    assert!(warnings(&collected).iter().any(|w| w.starts_with("Link lost")));
    assert_eq!(pool.available_slots(), pool.config().max_sessions);
}

#[tokio::test(start_paused = true)]
async fn test_power_off_drops_every_link() {
    let (radio, pool) = start(
        [MockSensor::new(SENSOR), MockSensor::new(OTHER)],
        PoolConfig::default(),
    )
    .await;
    let first = pool.connect(SENSOR).await.unwrap();
    let second = pool.connect(OTHER).await.unwrap();
    let mut first_state = first.watch_state();
    let mut second_state = second.watch_state();

    radio.set_powered(false);
    first_state
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();
    second_state
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();

    assert!(!pool.is_powered());
    assert_eq!(pool.connected_count(), 0);
    assert!(matches!(
        pool.connect(SENSOR).await,
        Err(Error::RadioUnavailable(_))
    ));
}

// =============================================================================
// History
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_history_sync() {
    let (_radio, pool) = start([MockSensor::new(SENSOR).history_len(10)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();
    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();

    let outcome = session
        .sync_history(&progress, &sink, &fast_transfer())
        .await
        .unwrap();

    assert_eq!(outcome.total, 10);
    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(outcome.retrieved, 10);
    assert!(outcome.is_complete());
    assert_eq!(sink.history_indices(SENSOR), (0..10).collect::<Vec<_>>());
    assert!(progress.is_empty());
    assert_eq!(session.transfer_position(), (10, 10));

    // entries are spaced an hour apart on the device clock
    let readings = sink.readings();
    let step = readings[1].reading.timestamp - readings[0].reading.timestamp;
    assert_eq!(step, time::Duration::hours(1));
    let boot = session.boot_epoch().unwrap();
    assert_eq!(readings[0].reading.timestamp, boot);

    let collected = drain(&mut events);
    let last_progress = collected.iter().rev().find_map(|e| match e {
        SessionEvent::Progress { current, total, .. } => Some((*current, *total)),
        _ => None,
    });
    assert_eq!(last_progress, Some((10, 10)));
    assert!(matches!(
        collected.last(),
        Some(SessionEvent::Loading {
            state: LoadingState::Completed {
                retrieved: 10,
                skipped: 0
            },
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_empty_log_clears_progress() {
    let (_radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let progress = MemoryProgressStore::new();
    progress.insert_raw(HistoryLoadingProgress::new(SENSOR, 5, 20, None));
    let sink = MemoryReadingSink::new();

    let outcome = session
        .sync_history(&progress, &sink, &fast_transfer())
        .await
        .unwrap();

    assert_eq!(outcome.total, 0);
    assert_eq!(outcome.retrieved, 0);
    assert!(progress.is_empty());
    assert!(sink.readings().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_count_treated_as_empty() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).history_len(5).raw_entry_count(vec![0x05])],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();

    let outcome = session
        .sync_history(&MemoryProgressStore::new(), &MemoryReadingSink::new(), &fast_transfer())
        .await
        .unwrap();

    assert_eq!(outcome.total, 0);
    assert!(warnings(&drain(&mut events)).iter().any(|w| w.contains("entry count")));
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_link_loss() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).history_len(100).disconnect_after(40)],
        PoolConfig::default(),
    )
    .await;
    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();

    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();
    let result = session.sync_history(&progress, &sink, &fast_transfer()).await;
    assert!(matches!(result, Err(Error::Disconnected(_))));
    assert_eq!(session.state(), SessionState::Disconnected);

    let partial = session.last_transfer().unwrap();
    assert_eq!(partial.retrieved, 40);
    assert!(partial.skipped.is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::Loading {
            state: LoadingState::Error {
                retrieved: 40,
                skipped: 0,
                ..
            },
            ..
        }
    )));

    let saved = progress.load(SENSOR).unwrap().unwrap();
    assert_eq!(saved.current_index, 40);
    assert_eq!(saved.total_entries, 100);
    assert!(saved.device_boot_time.is_some());

    let session = pool.connect(SENSOR).await.unwrap();
    let outcome = session
        .sync_history(&progress, &sink, &fast_transfer())
        .await
        .unwrap();
    assert_eq!(outcome.resumed_from, 40);
    assert_eq!(outcome.retrieved, 60);
    assert_eq!(sink.history_indices(SENSOR), (0..100).collect::<Vec<_>>());
    assert!(progress.is_empty());
    assert_eq!(session.last_transfer(), Some(outcome));
}

#[tokio::test(start_paused = true)]
async fn test_skipped_entry_survives_resume() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR)
            .history_len(10)
            .corrupt_entry(3, 1000)
            .disconnect_after(6)],
        PoolConfig::default(),
    )
    .await;
    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();

    let session = pool.connect(SENSOR).await.unwrap();
    let result = session.sync_history(&progress, &sink, &fast_transfer()).await;
    assert!(matches!(result, Err(Error::Disconnected(_))));
    let saved = progress.load(SENSOR).unwrap().unwrap();
    assert_eq!(saved.current_index, 7);
    assert_eq!(saved.skipped, vec![3]);

    let session = pool.connect(SENSOR).await.unwrap();
    let outcome = session
        .sync_history(&progress, &sink, &fast_transfer())
        .await
        .unwrap();
    assert_eq!(outcome.resumed_from, 7);
    assert_eq!(outcome.retrieved, 3);
    assert_eq!(outcome.skipped, vec![3]);
    assert!(!outcome.is_complete());
    assert!(!sink.history_indices(SENSOR).contains(&3));
}

#[tokio::test(start_paused = true)]
async fn test_skipped_entry_recovered_after_resume() {
    // fails through the first run's main pass, answers on the resumed sweep
    let failures = LoopDetectionConfig::default().max_entry_attempts + 1;
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR)
            .history_len(10)
            .corrupt_entry(3, failures)
            .disconnect_after(6)],
        PoolConfig::default(),
    )
    .await;
    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();

    let session = pool.connect(SENSOR).await.unwrap();
    assert!(session.sync_history(&progress, &sink, &fast_transfer()).await.is_err());

    let session = pool.connect(SENSOR).await.unwrap();
    let outcome = session
        .sync_history(&progress, &sink, &fast_transfer())
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.retrieved, 4);
    assert_eq!(sink.history_indices(SENSOR), vec![0, 1, 2, 4, 5, 6, 7, 8, 9, 3]);
    assert!(progress.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_progress_restarts() {
    let (_radio, pool) = start([MockSensor::new(SENSOR).history_len(60)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();
    let progress = MemoryProgressStore::new();
    progress.insert_raw(HistoryLoadingProgress::new(SENSOR, 40, 100, None));
    let sink = MemoryReadingSink::new();

    let outcome = session
        .sync_history(&progress, &sink, &fast_transfer())
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(outcome.retrieved, 60);
    assert!(warnings(&drain(&mut events)).iter().any(|w| w.contains("restarting from 0")));
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_progress_discarded() {
    let (_radio, pool) = start([MockSensor::new(SENSOR).history_len(8)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let progress = MemoryProgressStore::new();
    let mut record = HistoryLoadingProgress::new(SENSOR, 0, 8, None);
    record.current_index = -3;
    progress.insert_raw(record);

    let outcome = session
        .sync_history(&progress, &MemoryReadingSink::new(), &fast_transfer())
        .await
        .unwrap();
    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(outcome.retrieved, 8);
}

#[tokio::test(start_paused = true)]
async fn test_restart_ignores_saved_progress() {
    let (_radio, pool) = start([MockSensor::new(SENSOR).history_len(10)], PoolConfig::default()).await;
    let session = pool.connect(SENSOR).await.unwrap();
    let progress = MemoryProgressStore::new();
    progress.insert_raw(HistoryLoadingProgress::new(SENSOR, 6, 10, None));

    let outcome = session
        .sync_history(&progress, &MemoryReadingSink::new(), &fast_transfer().restart(true))
        .await
        .unwrap();
    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(outcome.retrieved, 10);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_entry_retried() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).history_len(10).corrupt_entry(3, 2)],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();
    let sink = MemoryReadingSink::new();

    let outcome = session
        .sync_history(&MemoryProgressStore::new(), &sink, &fast_transfer())
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.retrieved, 10);
    assert_eq!(sink.history_indices(SENSOR), (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_persistently_corrupt_entry_skipped() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).history_len(10).corrupt_entry(3, 1000)],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();
    let sink = MemoryReadingSink::new();

    let outcome = session
        .sync_history(&MemoryProgressStore::new(), &sink, &fast_transfer())
        .await
        .unwrap();
    assert_eq!(outcome.retrieved, 9);
    assert_eq!(outcome.skipped, vec![3]);
    assert!(!sink.history_indices(SENSOR).contains(&3));
    assert!(warnings(&drain(&mut events)).iter().any(|w| w.contains("Skipping entry 3")));
}

#[tokio::test(start_paused = true)]
async fn test_skipped_entry_recovered_by_sweep() {
    // fails through the main pass, answers on the sweep
    let failures = LoopDetectionConfig::default().max_entry_attempts + 1;
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).history_len(6).corrupt_entry(2, failures)],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();
    let sink = MemoryReadingSink::new();

    let outcome = session
        .sync_history(&MemoryProgressStore::new(), &sink, &fast_transfer())
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.retrieved, 6);
    assert_eq!(sink.history_indices(SENSOR), vec![0, 1, 3, 4, 5, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_entry_times_out_and_retries() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR).history_len(5).silent_entry(1, 1)],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();

    let outcome = session
        .sync_history(
            &MemoryProgressStore::new(),
            &MemoryReadingSink::new(),
            &fast_transfer().entry_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.retrieved, 5);
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_progress() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR)
            .history_len(50)
            .response_delay(Duration::from_millis(100))],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();
    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();
    let mut events = session.subscribe();

    let options = fast_transfer();
    let transfer = session.sync_history(&progress, &sink, &options);
    let cancel = async {
        sleep(Duration::from_secs(1)).await;
        session.cancel();
    };
    let (result, ()) = tokio::join!(transfer, cancel);

    assert!(matches!(result, Err(Error::Cancelled)));
    let saved = progress.load(SENSOR).unwrap().unwrap();
    assert!(saved.current_index > 0 && saved.current_index < 50);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::Loading {
            state: LoadingState::Cancelled,
            ..
        }
    )));

    // the next operation gets a fresh token
    session.read_live().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_global_timeout_disconnects() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR)
            .history_len(100)
            .response_delay(Duration::from_millis(200))],
        PoolConfig::default(),
    )
    .await;
    let session = pool.connect(SENSOR).await.unwrap();
    let mut events = session.subscribe();
    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();

    let result = session
        .sync_history(
            &progress,
            &sink,
            &fast_transfer()
                .entry_timeout(Duration::from_secs(1))
                .global_timeout(Duration::from_secs(3)),
        )
        .await;

    assert!(matches!(
        result,
        Err(Error::Timeout {
            scope: TimeoutScope::Global,
            ..
        })
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    let saved = progress.load(SENSOR).unwrap().unwrap();

    // the counts survive the deadline
    let partial = session.last_transfer().unwrap();
    let stored = sink.history_indices(SENSOR).len() as u32;
    assert!(partial.retrieved > 0 && partial.retrieved < 100);
    assert_eq!(partial.retrieved, stored);
    assert_eq!(saved.current_index, i64::from(stored));
    let failed = drain(&mut events).into_iter().find_map(|e| match e {
        SessionEvent::Loading {
            state: LoadingState::Error {
                message,
                retrieved,
                skipped,
            },
            ..
        } => Some((message, retrieved, skipped)),
        _ => None,
    });
    let (message, retrieved, skipped) = failed.unwrap();
    assert!(message.contains("history transfer"));
    assert_eq!(retrieved, stored);
    assert_eq!(skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_history_requires_authentication() {
    let (_radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let session = pool.get_or_create_session(SENSOR);

    let result = session
        .sync_history(&MemoryProgressStore::new(), &MemoryReadingSink::new(), &fast_transfer())
        .await;
    assert!(matches!(result, Err(Error::InvalidState { .. })));
}

// =============================================================================
// Background fetch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_background_fetch_under_deadline() {
    let (_radio, pool) = start(
        [MockSensor::new(SENSOR), MockSensor::new(OTHER).unresponsive()],
        PoolConfig::default(),
    )
    .await;
    let sink = Arc::new(MemoryReadingSink::new());
    let options = BackgroundOptions::default()
        .deadline(Duration::from_secs(3))
        .per_device_timeout(Duration::from_secs(3))
        .disconnect_grace(Duration::from_secs(1));
    let fetcher = BackgroundFetcher::new(pool.clone(), options).with_sink(sink.clone());

    let result = fetcher
        .fetch(&[SENSOR.to_string(), OTHER.to_string()])
        .await
        .unwrap();

    assert!(result.successful.contains(SENSOR));
    assert!(result.failed.contains(OTHER));
    assert_eq!(result.total_data_points, 1);
    assert!(result.duration <= Duration::from_secs(5));
    assert_eq!(sink.live_count(SENSOR), 1);
    assert_eq!(sink.device_info(SENSOR).unwrap().battery, 95);

    assert_eq!(pool.connected_count(), 0);
    assert!(!pool.is_scanning());
    assert!(!fetcher.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_background_fetch_single_flight() {
    let (_radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let fetcher = BackgroundFetcher::new(pool, BackgroundOptions::default());
    let ids = [SENSOR.to_string()];

    let (first, second) = tokio::join!(fetcher.fetch(&ids), fetcher.fetch(&ids));
    let results = [first, second];
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyRunning)))
            .count(),
        1
    );
    assert!(results.iter().any(|r| r.as_ref().is_ok_and(|r| r.is_complete())));
    assert!(!fetcher.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_background_single_flight_spans_fetchers() {
    let (_radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let first = BackgroundFetcher::new(pool.clone(), BackgroundOptions::default());
    let second = BackgroundFetcher::new(pool.clone(), BackgroundOptions::default());
    let ids = [SENSOR.to_string()];

    let (a, b) = tokio::join!(first.fetch(&ids), second.fetch(&ids));
    let results = [a, b];
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyRunning)))
            .count(),
        1
    );
    assert!(results.iter().any(|r| r.as_ref().is_ok_and(|r| r.is_complete())));
    assert!(!first.is_running());
    assert!(!second.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_background_claim_released_on_drop() {
    let (_radio, pool) = start([MockSensor::new(SENSOR)], PoolConfig::default()).await;
    let fetcher = BackgroundFetcher::new(pool.clone(), BackgroundOptions::default());

    let claim = pool.try_begin_background().unwrap();
    assert!(pool.try_begin_background().is_none());
    assert!(fetcher.is_running());
    assert!(matches!(
        fetcher.fetch(&[SENSOR.to_string()]).await,
        Err(Error::AlreadyRunning)
    ));

    drop(claim);
    assert!(!pool.is_background_running());
    assert!(fetcher.fetch(&[SENSOR.to_string()]).await.unwrap().is_complete());
}
