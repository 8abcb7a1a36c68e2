//! Daily sequencing
//!
//! Groups snapshots into one bucket per calendar day across the full recorded
//! range, then projects each bucket onto a single representative snapshot.

use chrono::{FixedOffset, NaiveDate};

use crate::config::DayReduction;
use crate::types::{DailyBucket, MoodDimension, MoodLevels, MoodSnapshot};

/// Sort snapshots by (timestamp, id) without touching the input
pub fn sort_snapshots(snapshots: &[MoodSnapshot]) -> Vec<MoodSnapshot> {
    let mut sorted = snapshots.to_vec();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    sorted
}

/// First and last calendar day covered by the snapshots
pub fn day_range(
    snapshots: &[MoodSnapshot],
    offset: FixedOffset,
) -> Option<(NaiveDate, NaiveDate)> {
    let first = snapshots.iter().map(|s| s.timestamp).min()?;
    let last = snapshots.iter().map(|s| s.timestamp).max()?;
    Some((
        crate::types::local_day(first, offset),
        crate::types::local_day(last, offset),
    ))
}

/// Build a contiguous, gap-free sequence of daily buckets.
///
/// There is one bucket per calendar day from the first snapshot's day to the
/// last snapshot's day inclusive. Empty input yields no buckets.
pub fn sequence(snapshots: &[MoodSnapshot], offset: FixedOffset) -> Vec<DailyBucket> {
    let Some((first, last)) = day_range(snapshots, offset) else {
        return Vec::new();
    };

    let mut buckets: Vec<DailyBucket> = first
        .iter_days()
        .take_while(|date| *date <= last)
        .map(|date| DailyBucket {
            date,
            snapshots: Vec::new(),
        })
        .collect();

    for snapshot in sort_snapshots(snapshots) {
        let index = (snapshot.local_day(offset) - first).num_days() as usize;
        buckets[index].snapshots.push(snapshot);
    }

    buckets
}

/// Project each bucket onto one representative snapshot, or `None` for days
/// without a mood-bearing entry.
pub fn flatten(sequence: &[DailyBucket], reduction: DayReduction) -> Vec<Option<MoodSnapshot>> {
    sequence
        .iter()
        .map(|bucket| representative(bucket, reduction))
        .collect()
}

fn representative(bucket: &DailyBucket, reduction: DayReduction) -> Option<MoodSnapshot> {
    let moods: Vec<&MoodSnapshot> = bucket
        .snapshots
        .iter()
        .filter(|s| s.is_mood_bearing())
        .collect();
    let latest = *moods.last()?;

    match reduction {
        DayReduction::Latest => Some(latest.clone()),
        DayReduction::Average | DayReduction::Maximum => {
            let mut levels = MoodLevels::default();
            for dimension in MoodDimension::ALL {
                let values: Vec<f64> =
                    moods.iter().filter_map(|s| s.levels.get(dimension)).collect();
                if values.is_empty() {
                    continue;
                }
                let reduced = if reduction == DayReduction::Average {
                    values.iter().sum::<f64>() / values.len() as f64
                } else {
                    values.iter().copied().fold(f64::MIN, f64::max)
                };
                levels.set(dimension, Some(reduced));
            }
            Some(MoodSnapshot {
                levels,
                ..latest.clone()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapType;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn mood_at(d: u32, hour: u32, elevation: f64) -> MoodSnapshot {
        let mut levels = MoodLevels::default();
        levels.elevation = Some(elevation);
        MoodSnapshot::mood(Utc.with_ymd_and_hms(2024, 3, d, hour, 0, 0).unwrap(), levels)
    }

    #[test]
    fn test_empty_input_yields_no_buckets() {
        assert!(sequence(&[], utc()).is_empty());
        assert!(flatten(&[], DayReduction::Latest).is_empty());
    }

    #[test]
    fn test_sequence_is_contiguous() {
        let snaps = vec![mood_at(10, 9, 1.0), mood_at(3, 9, 2.0), mood_at(5, 20, 3.0)];
        let buckets = sequence(&snaps, utc());

        assert_eq!(buckets.len(), 8);
        assert_eq!(buckets.first().unwrap().date, day(3));
        assert_eq!(buckets.last().unwrap().date, day(10));
        for pair in buckets.windows(2) {
            assert_eq!(pair[0].date.succ_opt().unwrap(), pair[1].date);
        }
        assert_eq!(buckets[2].snapshots.len(), 1);
        assert!(buckets[1].snapshots.is_empty());
    }

    #[test]
    fn test_sequence_does_not_mutate_input_order() {
        let snaps = vec![mood_at(4, 9, 1.0), mood_at(3, 9, 2.0)];
        let before = snaps.clone();
        let _ = sequence(&snaps, utc());
        assert_eq!(snaps, before);
    }

    #[test]
    fn test_bucket_contents_sorted_by_time() {
        let snaps = vec![mood_at(3, 18, 3.0), mood_at(3, 8, 1.0)];
        let buckets = sequence(&snaps, utc());
        let levels: Vec<Option<f64>> = buckets[0]
            .snapshots
            .iter()
            .map(|s| s.levels.elevation)
            .collect();
        assert_eq!(levels, vec![Some(1.0), Some(3.0)]);
    }

    #[test]
    fn test_flatten_latest_skips_non_mood_entries() {
        let mut note = MoodSnapshot::new(Utc.with_ymd_and_hms(2024, 3, 3, 22, 0, 0).unwrap());
        note.snap_type = SnapType::Note;
        let snaps = vec![mood_at(3, 8, 1.0), mood_at(3, 12, 2.0), note, mood_at(5, 9, 4.0)];

        let flat = flatten(&sequence(&snaps, utc()), DayReduction::Latest);
        let elevation: Vec<Option<f64>> = flat
            .iter()
            .map(|s| s.as_ref().and_then(|s| s.levels.elevation))
            .collect();
        assert_eq!(elevation, vec![Some(2.0), None, Some(4.0)]);
    }

    #[test]
    fn test_flatten_average_and_maximum() {
        let snaps = vec![mood_at(3, 8, 1.0), mood_at(3, 12, 2.0)];
        let buckets = sequence(&snaps, utc());

        let avg = flatten(&buckets, DayReduction::Average);
        assert_eq!(avg[0].as_ref().unwrap().levels.elevation, Some(1.5));
        assert_eq!(avg[0].as_ref().unwrap().levels.anxiety, None);

        let max = flatten(&buckets, DayReduction::Maximum);
        assert_eq!(max[0].as_ref().unwrap().levels.elevation, Some(2.0));
    }

    #[test]
    fn test_offset_moves_late_entries_to_next_day() {
        let snaps = vec![mood_at(3, 9, 1.0), mood_at(3, 23, 2.0)];
        let east = FixedOffset::east_opt(2 * 3600).unwrap();
        let buckets = sequence(&snaps, east);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[1].date, day(4));
    }
}
