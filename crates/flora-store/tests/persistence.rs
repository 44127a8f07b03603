//! On-disk persistence tests for flora-store.

use flora_store::{Error, ReadingKind, ReadingQuery, Store};
use flora_types::{HistoryLoadingProgress, Reading};
use time::macros::datetime;

fn reading(moisture: u8) -> Reading {
    Reading {
        temperature: 22.0,
        brightness: 1800,
        moisture,
        conductivity: 420,
        timestamp: datetime!(2026-06-01 09:30 UTC),
    }
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("data.db");

    {
        let store = Store::open(&path).unwrap();
        store.upsert_device("flora-1", Some("Flower care")).unwrap();
        store.insert_history("flora-1", 7, &reading(33)).unwrap();

        let mut progress = HistoryLoadingProgress::new("flora-1", 8, 120, None);
        progress.last_update = datetime!(2026-06-01 09:31 UTC);
        store.save_progress(&progress).unwrap();
    }

    assert!(path.exists());

    let store = Store::open(&path).unwrap();
    let device = store.get_device("flora-1").unwrap().unwrap();
    assert_eq!(device.name.as_deref(), Some("Flower care"));

    let readings = store
        .query_readings(&ReadingQuery::new().kind(ReadingKind::History))
        .unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].history_index, Some(7));
    assert_eq!(readings[0].moisture, 33);

    let progress = store.load_progress("flora-1").unwrap().unwrap();
    assert_eq!(progress.current_index, 8);
    assert_eq!(progress.total_entries, 120);
    assert_eq!(progress.validate(120), Ok(8));
}

#[test]
fn test_parent_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let result = Store::open(blocker.join("sub").join("data.db"));
    assert!(matches!(result, Err(Error::CreateDirectory { .. })));
}
