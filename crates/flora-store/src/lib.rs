//! Local persistence for soil sensor readings.
//!
//! This crate provides SQLite-based storage for readings collected from
//! soil sensors, together with the position of interrupted history
//! transfers so a later session can resume where the last one stopped.
//!
//! # Features
//!
//! - Store live readings and downloaded history entries
//! - Deduplicate readings by device and capture time
//! - Persist per-device history transfer progress
//! - Query by device, origin and time range, with pagination
//!
//! # Example
//!
//! ```no_run
//! use flora_store::{ReadingQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! let query = ReadingQuery::new()
//!     .device("C4:7C:8D:6A:3E:11")
//!     .limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), flora_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{ReadingKind, StoredDevice, StoredReading};
pub use queries::ReadingQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/flora/data.db`
/// - macOS: `~/Library/Application Support/flora/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\flora\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("flora")
        .join("data.db")
}
