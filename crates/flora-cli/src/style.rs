//! Visual styling utilities for the CLI.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

// ============================================================================
// Progress Indicators
// ============================================================================

/// Braille dots animation
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

const SPINNER_TICK_MS: u64 = 80;

const PROGRESS_CHARS: &str = "##-";

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

fn transfer_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(PROGRESS_CHARS)
}

/// Create a spinner with `message`.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Create a progress bar for a history transfer.
///
/// The length is unknown until the device reports its entry count.
pub fn transfer_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(transfer_style());
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

// ============================================================================
// Values
// ============================================================================

/// Render signal strength as a 10-step bar followed by the dBm value.
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let Some(rssi) = rssi else {
        return "N/A".to_string();
    };

    // -30 dBm is a full bar, -100 dBm is empty
    let filled = (((rssi + 100).clamp(0, 70) as f32 / 7.0).round() as usize).min(10);
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled));

    if no_color {
        format!("{} {:>3}", bar, rssi)
    } else if filled >= 7 {
        format!("{} {:>3}", bar.green(), rssi)
    } else if filled >= 4 {
        format!("{} {:>3}", bar.yellow(), rssi)
    } else {
        format!("{} {:>3}", bar.red(), rssi)
    }
}

/// Battery percentage, red when low.
pub fn format_battery(battery: u8, no_color: bool) -> String {
    let text = format!("{}%", battery);
    if no_color {
        text
    } else if battery < 20 {
        format!("{}", text.red().bold())
    } else {
        format!("{}", text.green())
    }
}

/// Apply the table style used by every listing.
pub fn apply_table_style(table: &mut tabled::Table) {
    table.with(tabled::settings::Style::rounded());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_bar_bounds() {
        assert_eq!(format_signal_bar(None, true), "N/A");
        assert_eq!(format_signal_bar(Some(-20), true), format!("{} -20", "█".repeat(10)));
        assert_eq!(format_signal_bar(Some(-110), true), format!("{} -110", "░".repeat(10)));
    }

    #[test]
    fn test_signal_bar_midrange() {
        let bar = format_signal_bar(Some(-65), true);
        assert!(bar.starts_with("█████░░░░░"));
    }

    #[test]
    fn test_battery_no_color() {
        assert_eq!(format_battery(15, true), "15%");
        assert!(format_battery(15, false).contains("15%"));
    }
}
