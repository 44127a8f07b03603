//! Hardware integration tests for flora-core
//!
//! These tests require a Bluetooth adapter and a sensor in range, and should
//! be run with:
//! ```
//! cargo test --package flora-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `FLORA_DEVICE` to the sensor's identifier (address on Linux and
//! Windows, CoreBluetooth UUID on macOS):
//! ```
//! FLORA_DEVICE="C4:7C:8D:6A:3E:11" cargo test --package flora-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use flora_core::{
    BtleplugRadio, ConnectionPool, MemoryProgressStore, MemoryReadingSink, PoolConfig,
    SessionState, TransferOptions,
};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Extended timeout for history operations
const HISTORY_TIMEOUT: Duration = Duration::from_secs(600);

fn get_device() -> Option<String> {
    env::var("FLORA_DEVICE").ok().filter(|s| !s.is_empty())
}

async fn start_pool() -> Arc<ConnectionPool> {
    // RUST_LOG=flora_core=debug shows the session trace
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let radio = BtleplugRadio::new().await.expect("no Bluetooth adapter");
    ConnectionPool::start(Arc::new(radio), PoolConfig::default())
        .await
        .expect("failed to start pool")
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_discovers_sensors() {
    let pool = start_pool().await;

    let result = timeout(BLE_TIMEOUT, pool.scan(Duration::from_secs(10))).await;
    match result {
        Ok(Ok(sensors)) => {
            println!("Scan discovered {} sensors:", sensors.len());
            for sensor in &sensors {
                println!(
                    "  - {} ({}, rssi {:?})",
                    sensor.name.as_deref().unwrap_or("Unknown"),
                    sensor.identifier,
                    sensor.rssi
                );
            }
        }
        Ok(Err(e)) => panic!("Scan failed: {}", e),
        Err(_) => panic!("Scan timed out"),
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_read_live() {
    let Some(device) = get_device() else {
        println!("FLORA_DEVICE not set, skipping");
        return;
    };
    let pool = start_pool().await;

    let session = timeout(BLE_TIMEOUT, pool.connect(&device))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    assert_eq!(session.state(), SessionState::Authenticated);
    println!("Device info: {:?}", session.device_info());

    let reading = session.read_live().await.expect("live read failed");
    println!(
        "Temperature {:.1} °C, moisture {}%, light {} lux, conductivity {} µS/cm",
        reading.temperature, reading.moisture, reading.brightness, reading.conductivity
    );
    assert!(reading.moisture <= 100);

    pool.disconnect(&device).await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_history_sync() {
    let Some(device) = get_device() else {
        println!("FLORA_DEVICE not set, skipping");
        return;
    };
    let pool = start_pool().await;
    let session = pool.connect(&device).await.expect("connect failed");

    let progress = MemoryProgressStore::new();
    let sink = MemoryReadingSink::new();
    let outcome = timeout(
        HISTORY_TIMEOUT,
        session.sync_history(&progress, &sink, &TransferOptions::default()),
    )
    .await
    .expect("history sync timed out")
    .expect("history sync failed");

    println!(
        "Downloaded {} of {} entries, skipped {:?}",
        outcome.retrieved, outcome.total, outcome.skipped
    );
    assert_eq!(sink.history_indices(&device).len(), outcome.retrieved as usize);
    assert!(progress.is_empty());

    pool.disconnect(&device).await.expect("disconnect failed");
}
