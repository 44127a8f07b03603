//! Read command implementation.

use anyhow::{Context, Result};
use flora_core::{ConnectionPool, ReadingSink};
use tracing::debug;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_reading_json, format_reading_text};
use crate::sink::StoreHandle;
use crate::style;

/// Connect, read the live values once, store them and disconnect.
pub async fn cmd_read(
    pool: &ConnectionPool,
    store: &StoreHandle,
    device_id: &str,
    format: OutputFormat,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<String> {
    let spinner = (!quiet && format == OutputFormat::Text)
        .then(|| style::spinner(format!("Connecting to {}...", device_id)));

    let result = async {
        let session = pool
            .connect(device_id)
            .await
            .with_context(|| format!("Failed to connect to {}", device_id))?;
        let reading = session
            .read_live()
            .await
            .context("Failed to read sensor values")?;
        Ok::<_, anyhow::Error>((reading, session.device_info()))
    }
    .await;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    if let Err(e) = pool.disconnect(device_id).await {
        debug!(device_id, "Disconnect failed: {}", e);
    }
    let (reading, info) = result?;

    store
        .upsert_device(device_id, None, info.as_ref())
        .context("Failed to record device")?;
    store
        .append_live(device_id, &reading)
        .context("Failed to store reading")?;

    match format {
        OutputFormat::Json => format_reading_json(device_id, &reading, info.as_ref(), opts),
        OutputFormat::Text => Ok(format_reading_text(device_id, &reading, info.as_ref(), opts)),
    }
}

#[cfg(test)]
mod tests {
    use flora_core::mock::MockSensor;
    use flora_store::ReadingKind;

    use super::*;
    use crate::commands::testing::{SENSOR, memory_store, pool_with};

    #[tokio::test(start_paused = true)]
    async fn test_read_stores_reading() {
        let (radio, pool) = pool_with(vec![MockSensor::new(SENSOR).battery(42)]).await;
        let store = memory_store();

        let output = cmd_read(
            &pool,
            &store,
            SENSOR,
            OutputFormat::Text,
            true,
            &FormatOptions::new(true, false),
        )
        .await
        .unwrap();

        assert!(output.contains("Battery: 42%"));
        assert!(output.contains("Moisture:     38%"));
        assert!(!radio.is_connected(SENSOR));

        let store = store.lock();
        assert_eq!(
            store.count_readings(Some(SENSOR), Some(ReadingKind::Live)).unwrap(),
            1
        );
        assert_eq!(store.get_device(SENSOR).unwrap().unwrap().battery, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_unknown_device_fails() {
        let (_radio, pool) = pool_with(vec![]).await;
        let store = memory_store();

        let err = cmd_read(
            &pool,
            &store,
            "missing",
            OutputFormat::Json,
            true,
            &FormatOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to connect to missing"));
        assert_eq!(store.lock().count_readings(None, None).unwrap(), 0);
    }
}
