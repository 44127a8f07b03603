//! Session layer for wireless soil sensors.
//!
//! This crate manages Bluetooth Low Energy sessions with soil sensors
//! (moisture, temperature, light, conductivity): connecting, the
//! firmware/battery handshake, live readings, and resumable download of
//! the on-device history log.
//!
//! # Features
//!
//! - **Connection pool**: one owner of the radio, a bounded number of
//!   concurrent sessions, foreground requests served before background ones
//! - **Resumable history sync**: progress is persisted after every entry, so
//!   an interrupted transfer picks up where it stopped
//! - **Loop detection**: stalled transfers, entries that keep failing and
//!   connection storms are detected; a per-device circuit breaker stops
//!   hammering a sensor that keeps failing
//! - **Background fetch**: a single-flight batch read under a hard deadline
//! - **Radio abstraction**: [`BtleplugRadio`] for real hardware,
//!   [`MockRadio`] for tests
//!
//! # Platform Differences
//!
//! On Linux and Windows sensors are identified by their Bluetooth address
//! (`C4:7C:8D:6A:3E:11`). On macOS CoreBluetooth assigns a per-host UUID
//! instead, which is not the device address. Store the identifier the pool
//! reports and reconnect with it.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flora_core::{BtleplugRadio, ConnectionPool, MemoryProgressStore, MemoryReadingSink,
//!     PoolConfig, TransferOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = Arc::new(BtleplugRadio::new().await?);
//!     let pool = ConnectionPool::start(radio, PoolConfig::default()).await?;
//!
//!     let session = pool.connect("C4:7C:8D:6A:3E:11").await?;
//!     let reading = session.read_live().await?;
//!     println!("Moisture: {}%", reading.moisture);
//!
//!     let progress = MemoryProgressStore::new();
//!     let sink = MemoryReadingSink::new();
//!     let outcome = session
//!         .sync_history(&progress, &sink, &TransferOptions::default())
//!         .await?;
//!     println!("Downloaded {} of {} entries", outcome.retrieved, outcome.total);
//!
//!     pool.disconnect_all().await;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod btle;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod history;
pub mod mock;
pub mod pool;
pub mod radio;
pub mod retry;
pub mod session;
pub mod slots;
pub mod traits;

pub use flora_types::{codec, progress, types};

pub use background::{BackgroundFetchResult, BackgroundFetcher};
pub use btle::BtleplugRadio;
pub use config::{
    BackgroundOptions, ConnectionConfig, LoopDetectionConfig, PoolConfig, TransferOptions,
};
pub use detector::{CircuitState, LoopDetector, RecoveryAction};
pub use error::{Error, Result, TimeoutScope};
pub use events::{EventDispatcher, EventReceiver, EventSender, LoadingState, SessionEvent};
pub use history::HistoryOutcome;
pub use mock::{MockRadio, MockSensor, MockStats};
pub use pool::{BackgroundGuard, ConnectionPool, DiscoveredSensor};
pub use radio::{PeripheralId, Radio, RadioEvent};
pub use retry::{RetryConfig, with_retry, with_retry_if};
pub use session::{DeviceSession, SessionState};
pub use slots::Priority;
pub use traits::{
    MemoryProgressStore, MemoryReadingSink, ProgressStore, ReadingSink, StoredReading,
};

pub use flora_types::uuid as uuids;
pub use flora_types::{
    CharacteristicRole, DeviceInfo, HistoricalReading, HistoryLoadingProgress, ParseError,
    ProgressRejection, Reading,
};
