//! Store errors.

use std::path::PathBuf;

/// Result alias used throughout the store.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong opening or querying the database.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// SQLite rejected a statement or the file is unreadable.
    #[error("SQLite: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cannot create {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No row for the requested device.
    #[error("Unknown device {0}")]
    DeviceNotFound(String),

    /// The file carries a layout version this build does not know.
    #[error("Database layout version {found} is not supported (expected {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },
}
