//! Command implementations for the CLI.
//!
//! Every command returns the text to print so `main` owns stdout.

mod fetch;
mod progress;
mod read;
mod readings;
mod scan;
mod sync;

pub use fetch::cmd_fetch;
pub use progress::{cmd_progress_clear, cmd_progress_show};
pub use read::cmd_read;
pub use readings::cmd_readings;
pub use scan::cmd_scan;
pub use sync::{SyncArgs, cmd_sync};
