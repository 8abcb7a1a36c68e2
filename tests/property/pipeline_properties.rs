use chrono::{Days, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use moodsnap_core::butterfly::{average_transient, DailyLevelIndex};
use moodsnap_core::config::{AnalyticsConfig, DayReduction};
use moodsnap_core::history::{sliding_average, sliding_volatility};
use moodsnap_core::pipeline::process_snapshot;
use moodsnap_core::sequencer::{flatten, sequence};
use moodsnap_core::store::SnapshotStore;
use moodsnap_core::types::{MoodLevels, MoodSnapshot, MOOD_LEVEL_MAX, MOOD_LEVEL_MIN};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

const EPSILON: f64 = 1e-9;

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Snapshots at (day offset, minute of day) with a level per entry
fn snapshots_at(entries: &[(u32, u32, Option<u8>)]) -> Vec<MoodSnapshot> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    entries
        .iter()
        .map(|(day, minute, level)| {
            let ts =
                start + Duration::days(i64::from(*day)) + Duration::minutes(i64::from(*minute));
            let levels = MoodLevels {
                elevation: level.map(f64::from),
                depression: level.map(|v| f64::from(4 - v)),
                ..Default::default()
            };
            MoodSnapshot::mood(ts, levels)
        })
        .collect()
}

/// (day offset below `days`, minute of day, optional level) entries
fn entries_strategy(
    days: u32,
    len: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<(u32, u32, Option<u8>)>> {
    prop::collection::vec((0u32..days, 0u32..1440, prop::option::of(0u8..=4)), len)
}

fn level_strategy() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(0u8..=4).prop_map(|v| v.map(f64::from))
}

proptest! {
    #[test]
    fn sequence_is_contiguous(entries in entries_strategy(90, 1..40)) {
        let snaps = snapshots_at(&entries);
        let buckets = sequence(&snaps, FixedOffset::east_opt(0).unwrap());

        let first = entries.iter().map(|e| e.0).min().unwrap();
        let last = entries.iter().map(|e| e.0).max().unwrap();
        prop_assert_eq!(buckets.len() as u32, last - first + 1);
        prop_assert_eq!(buckets[0].date, base_day() + Days::new(u64::from(first)));

        for pair in buckets.windows(2) {
            prop_assert_eq!(pair[0].date.succ_opt(), Some(pair[1].date));
        }
        let assigned: usize = buckets.iter().map(|b| b.snapshots.len()).sum();
        prop_assert_eq!(assigned, snaps.len());
    }

    #[test]
    fn flatten_is_dense(entries in entries_strategy(30, 1..30)) {
        let snaps = snapshots_at(&entries);
        let buckets = sequence(&snaps, FixedOffset::east_opt(0).unwrap());
        for reduction in [DayReduction::Latest, DayReduction::Average, DayReduction::Maximum] {
            prop_assert_eq!(flatten(&buckets, reduction).len(), buckets.len());
        }
    }

    #[test]
    fn average_and_volatility_follow_presence(
        levels in prop::collection::vec(level_strategy(), 0..60),
        window in 1usize..20,
    ) {
        let averages = sliding_average(&levels, window);
        let volatility = sliding_volatility(&levels, window);
        prop_assert_eq!(averages.len(), levels.len());
        prop_assert_eq!(volatility.len(), levels.len());

        for i in 0..levels.len() {
            let start = (i + 1).saturating_sub(window);
            let present: Vec<f64> = levels[start..=i].iter().flatten().copied().collect();

            if present.is_empty() {
                prop_assert!(averages[i].is_none());
                prop_assert!(volatility[i].is_none());
            } else {
                let lo = present.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let avg = averages[i].unwrap();
                let vol = volatility[i].unwrap();
                prop_assert!(avg >= lo - EPSILON && avg <= hi + EPSILON);
                prop_assert!(vol >= -EPSILON && vol <= (hi - lo) + EPSILON);
                prop_assert!(avg >= MOOD_LEVEL_MIN - EPSILON && avg <= MOOD_LEVEL_MAX + EPSILON);
            }
        }
    }

    #[test]
    fn butterfly_is_order_independent(
        entries in entries_strategy(40, 1..40),
        refs in prop::collection::vec(0u64..45, 0..12),
        window in 0usize..6,
    ) {
        let snaps = snapshots_at(&entries);
        let buckets = sequence(&snaps, FixedOffset::east_opt(0).unwrap());
        let flat = flatten(&buckets, DayReduction::Latest);
        let index = DailyLevelIndex::new(&buckets, &flat);
        let cancel = CancellationToken::new();

        let dates: Vec<NaiveDate> = refs.iter().map(|d| base_day() + Days::new(*d)).collect();
        let mut reversed = dates.clone();
        reversed.reverse();
        let mut sorted = dates.clone();
        sorted.sort();

        let forward = average_transient(&dates, &index, window, &cancel).unwrap();
        prop_assert_eq!(forward.elevation.len(), 2 * window + 1);
        prop_assert_eq!(&forward, &average_transient(&reversed, &index, window, &cancel).unwrap());
        prop_assert_eq!(&forward, &average_transient(&sorted, &index, window, &cancel).unwrap());
    }

    #[test]
    fn processing_is_deterministic(entries in entries_strategy(20, 0..25)) {
        let mut store = SnapshotStore::new();
        for snap in snapshots_at(&entries) {
            store.insert(snap).unwrap();
        }
        let frozen = store.freeze();
        let config = AnalyticsConfig::default();

        let first = serde_json::to_string(&process_snapshot(&frozen, &config).unwrap()).unwrap();
        let second = serde_json::to_string(&process_snapshot(&frozen, &config).unwrap()).unwrap();
        prop_assert_eq!(first, second);
    }
}
