//! Resumable history transfer progress.
//!
//! A [`HistoryLoadingProgress`] record is written after every processed
//! history entry, stored or skipped, and consulted when a later transfer
//! starts. The
//! record is never trusted blindly: [`HistoryLoadingProgress::validate`]
//! checks it against the entry count the device reports right now.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Saved position of an interrupted history transfer.
///
/// Indices are signed so that corrupt records read back from storage
/// (negative cursor, cursor past the end) can be represented and rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryLoadingProgress {
    /// Device this record belongs to.
    pub device_id: String,
    /// Next entry index to fetch.
    pub current_index: i64,
    /// Entry count the device reported when the transfer started.
    pub total_entries: i64,
    /// When the record was last written.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub last_update: OffsetDateTime,
    /// Boot epoch estimate used for the entries fetched so far.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub device_boot_time: Option<OffsetDateTime>,
    /// Entries before the cursor that were given up on and still need
    /// fetching.
    #[cfg_attr(feature = "serde", serde(default))]
    pub skipped: Vec<u16>,
}

/// Why a saved progress record cannot be resumed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProgressRejection {
    /// Cursor outside `0..=total`.
    #[error("corrupt progress record")]
    Corrupt,
    /// The device's log changed size since the record was written.
    #[error("stale progress: saved total {saved}, device reports {fresh}")]
    Stale {
        /// Total stored in the record.
        saved: i64,
        /// Total the device reports now.
        fresh: u16,
    },
}

impl HistoryLoadingProgress {
    /// Create a record for `device_id` positioned at `current_index`.
    pub fn new(
        device_id: impl Into<String>,
        current_index: u16,
        total_entries: u16,
        device_boot_time: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            current_index: i64::from(current_index),
            total_entries: i64::from(total_entries),
            last_update: OffsetDateTime::now_utc(),
            device_boot_time,
            skipped: Vec::new(),
        }
    }

    /// Attach the entries skipped so far.
    #[must_use]
    pub fn with_skipped(mut self, skipped: &[u16]) -> Self {
        self.skipped = skipped.to_vec();
        self
    }

    /// Skipped entries that lie before `resume_at`, sorted and without
    /// duplicates. Anything at or past the cursor is fetched by the main
    /// pass anyway.
    #[must_use]
    pub fn skipped_before(&self, resume_at: u16) -> Vec<u16> {
        let mut skipped: Vec<u16> = self
            .skipped
            .iter()
            .copied()
            .filter(|&index| index < resume_at)
            .collect();
        skipped.sort_unstable();
        skipped.dedup();
        skipped
    }

    /// Whether `0 <= current_index <= total_entries` and the total fits the
    /// 16-bit entry count of the protocol.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.current_index >= 0
            && self.current_index <= self.total_entries
            && self.total_entries <= i64::from(u16::MAX)
    }

    /// Validate the record against the total the device reports now and
    /// return the index to resume from.
    ///
    /// ```
    /// use flora_types::{HistoryLoadingProgress, ProgressRejection};
    ///
    /// let saved = HistoryLoadingProgress::new("flora-1", 40, 100, None);
    /// assert_eq!(saved.validate(100), Ok(40));
    /// assert_eq!(
    ///     saved.validate(60),
    ///     Err(ProgressRejection::Stale { saved: 100, fresh: 60 })
    /// );
    /// ```
    pub fn validate(&self, fresh_total: u16) -> Result<u16, ProgressRejection> {
        if !self.is_consistent() {
            return Err(ProgressRejection::Corrupt);
        }
        if self.total_entries != i64::from(fresh_total) {
            return Err(ProgressRejection::Stale {
                saved: self.total_entries,
                fresh: fresh_total,
            });
        }
        u16::try_from(self.current_index).map_err(|_| ProgressRejection::Corrupt)
    }

    /// Return a copy safe to display or persist: an inconsistent cursor is
    /// reset to 0 and clamped totals are kept non-negative.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut record = self.clone();
        if !record.is_consistent() {
            record.current_index = 0;
            record.skipped.clear();
            record.total_entries = record.total_entries.clamp(0, i64::from(u16::MAX));
        }
        record
    }

    /// Fraction of the log already fetched, in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if !self.is_consistent() || self.total_entries == 0 {
            return 0.0;
        }
        self.current_index as f64 / self.total_entries as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(current_index: i64, total_entries: i64) -> HistoryLoadingProgress {
        HistoryLoadingProgress {
            device_id: "C4:7C:8D:6A:3E:11".to_string(),
            current_index,
            total_entries,
            last_update: OffsetDateTime::UNIX_EPOCH,
            device_boot_time: None,
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_resume_when_total_matches() {
        assert_eq!(record(40, 100).validate(100), Ok(40));
        assert_eq!(record(0, 100).validate(100), Ok(0));
        assert_eq!(record(100, 100).validate(100), Ok(100));
    }

    #[test]
    fn test_stale_when_total_changes() {
        assert_eq!(
            record(40, 100).validate(60),
            Err(ProgressRejection::Stale {
                saved: 100,
                fresh: 60
            })
        );
    }

    #[test]
    fn test_corrupt_records_rejected() {
        assert_eq!(record(-1, 100).validate(100), Err(ProgressRejection::Corrupt));
        assert_eq!(record(101, 100).validate(100), Err(ProgressRejection::Corrupt));
        assert_eq!(record(0, -5).validate(0), Err(ProgressRejection::Corrupt));
    }

    #[test]
    fn test_sanitized_resets_cursor() {
        let fixed = record(-1, 100).sanitized();
        assert_eq!(fixed.current_index, 0);
        assert_eq!(fixed.total_entries, 100);
        assert!(fixed.is_consistent());

        let fixed = record(250, 100).sanitized();
        assert_eq!(fixed.current_index, 0);

        let untouched = record(40, 100).sanitized();
        assert_eq!(untouched, record(40, 100));
    }

    #[test]
    fn test_skipped_before_cursor() {
        let saved =
            HistoryLoadingProgress::new("flora-1", 40, 100, None).with_skipped(&[17, 3, 17, 55]);
        assert_eq!(saved.skipped_before(40), vec![3, 17]);
        assert!(saved.skipped_before(0).is_empty());
    }

    #[test]
    fn test_sanitized_drops_skipped_of_corrupt_record() {
        let corrupt = HistoryLoadingProgress {
            skipped: vec![2, 9],
            ..record(-1, 10)
        };
        assert!(corrupt.sanitized().skipped.is_empty());
    }

    #[test]
    fn test_fraction() {
        assert!((record(25, 100).fraction() - 0.25).abs() < f64::EPSILON);
        assert_eq!(record(0, 0).fraction(), 0.0);
        assert_eq!(record(-3, 10).fraction(), 0.0);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let original = HistoryLoadingProgress {
            device_boot_time: Some(OffsetDateTime::UNIX_EPOCH),
            skipped: vec![4, 7],
            ..record(12, 30)
        };
        let json = serde_json::to_string(&original).unwrap();
        let back: HistoryLoadingProgress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_records_without_skipped_list_still_load() {
        let json = r#"{"device_id":"flora-1","current_index":3,"total_entries":9,"last_update":"2026-05-01T12:00:00Z","device_boot_time":null}"#;
        let record: HistoryLoadingProgress = serde_json::from_str(json).unwrap();
        assert!(record.skipped.is_empty());
    }

    proptest! {
        #[test]
        fn prop_validated_cursor_within_bounds(index in -10i64..200, total in -10i64..200, fresh in 0u16..200) {
            if let Ok(start) = record(index, total).validate(fresh) {
                prop_assert!(start <= fresh);
                prop_assert_eq!(i64::from(start), index);
            }
        }

        #[test]
        fn prop_sanitized_is_consistent(index in any::<i64>(), total in 0i64..=65535) {
            prop_assert!(record(index, total).sanitized().is_consistent());
        }
    }
}
