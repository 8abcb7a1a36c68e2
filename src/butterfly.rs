//! Co-occurrence ("butterfly") aggregation
//!
//! For a set of reference dates this module averages the daily mood levels
//! found at each day offset in `-window..=window` around those dates. The
//! result shows how mood typically moves before and after a hashtag, tagged
//! activity, symptom, social entry or life event.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;

use crate::error::AnalyticsError;
use crate::types::{
    ButterflyEntry, DailyBucket, EventMarker, MoodDimension, MoodLevels, MoodSnapshot,
};

/// Daily representative levels keyed by calendar day
#[derive(Debug, Clone, Default)]
pub struct DailyLevelIndex {
    first: Option<NaiveDate>,
    levels: Vec<Option<MoodLevels>>,
}

impl DailyLevelIndex {
    /// Build the index from the sequencer's buckets and their flattened projection
    pub fn new(sequence: &[DailyBucket], flattened: &[Option<MoodSnapshot>]) -> Self {
        Self {
            first: sequence.first().map(|b| b.date),
            levels: flattened
                .iter()
                .map(|day| day.as_ref().map(|s| s.levels))
                .collect(),
        }
    }

    /// Levels recorded on `date`; `None` outside the recorded range or on empty days
    pub fn level_at(&self, date: NaiveDate) -> Option<&MoodLevels> {
        let first = self.first?;
        let index = (date - first).num_days();
        if index < 0 {
            return None;
        }
        self.levels.get(index as usize)?.as_ref()
    }
}

/// Average the mood levels around every distinct reference date.
///
/// Duplicate dates count once and input order does not matter. Zero
/// reference dates yield an all-absent entry with zero occurrences.
pub fn average_transient(
    reference_dates: &[NaiveDate],
    index: &DailyLevelIndex,
    window: usize,
    cancel: &CancellationToken,
) -> Result<ButterflyEntry, AnalyticsError> {
    let dates: BTreeSet<NaiveDate> = reference_dates.iter().copied().collect();
    let span = ButterflyEntry::span(window)?;
    let mut entry = ButterflyEntry::empty(String::new(), window)?;
    entry.occurrences = dates.len();

    let mut sums: BTreeMap<MoodDimension, Vec<(f64, usize)>> = MoodDimension::ALL
        .iter()
        .map(|d| (*d, vec![(0.0, 0); span]))
        .collect();

    for date in &dates {
        if cancel.is_cancelled() {
            return Err(AnalyticsError::Cancelled);
        }
        for slot in 0..span {
            let offset = slot as i64 - window as i64;
            let Some(day) = date.checked_add_signed(Duration::days(offset)) else {
                continue;
            };
            let Some(levels) = index.level_at(day) else {
                continue;
            };
            for (dimension, acc) in sums.iter_mut() {
                if let Some(value) = levels.get(*dimension) {
                    acc[slot].0 += value;
                    acc[slot].1 += 1;
                }
            }
        }
    }

    for (dimension, acc) in sums {
        let series = entry.series_mut(dimension);
        for (slot, (sum, count)) in acc.into_iter().enumerate() {
            series[slot] = (count > 0).then(|| sum / count as f64);
        }
    }

    Ok(entry)
}

/// Tagged item categories carried on each snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagCategory {
    Activity,
    Symptom,
    Social,
}

impl TagCategory {
    pub fn tags<'a>(&self, snapshot: &'a MoodSnapshot) -> &'a BTreeSet<String> {
        match self {
            TagCategory::Activity => &snapshot.activities,
            TagCategory::Symptom => &snapshot.symptoms,
            TagCategory::Social => &snapshot.social,
        }
    }
}

/// Group snapshot days by label, sorted by label
fn dates_by_label<F>(
    snapshots: &[MoodSnapshot],
    offset: FixedOffset,
    labels: F,
) -> BTreeMap<String, Vec<NaiveDate>>
where
    F: Fn(&MoodSnapshot) -> BTreeSet<String>,
{
    let mut grouped: BTreeMap<String, BTreeSet<NaiveDate>> = BTreeMap::new();
    for snapshot in snapshots {
        let day = snapshot.local_day(offset);
        for label in labels(snapshot) {
            grouped.entry(label).or_default().insert(day);
        }
    }
    grouped
        .into_iter()
        .map(|(label, dates)| (label, dates.into_iter().collect()))
        .collect()
}

/// Distinct days on which `hashtag` appears
pub fn dates_for_hashtag(
    hashtag: &str,
    snapshots: &[MoodSnapshot],
    offset: FixedOffset,
) -> Vec<NaiveDate> {
    let dates: BTreeSet<NaiveDate> = snapshots
        .iter()
        .filter(|s| s.all_hashtags().contains(hashtag))
        .map(|s| s.local_day(offset))
        .collect();
    dates.into_iter().collect()
}

/// Distinct days on which a snapshot carries `tag` in `category`
pub fn dates_for_tag(
    category: TagCategory,
    tag: &str,
    snapshots: &[MoodSnapshot],
    offset: FixedOffset,
) -> Vec<NaiveDate> {
    let dates: BTreeSet<NaiveDate> = snapshots
        .iter()
        .filter(|s| category.tags(s).contains(tag))
        .map(|s| s.local_day(offset))
        .collect();
    dates.into_iter().collect()
}

/// Every life event occurrence in chronological order
pub fn events_list(snapshots: &[MoodSnapshot]) -> Vec<EventMarker> {
    let mut events: Vec<(DateTime<Utc>, uuid::Uuid, String)> = snapshots
        .iter()
        .filter(|s| s.snap_type == crate::types::SnapType::Event)
        .filter(|s| !s.event.trim().is_empty())
        .map(|s| (s.timestamp, s.id, s.event.trim().to_string()))
        .collect();
    events.sort();
    events
        .into_iter()
        .map(|(timestamp, _, label)| EventMarker { label, timestamp })
        .collect()
}

/// Butterfly entries for every hashtag, with the sorted hashtag list
pub fn hashtag_butterflies(
    snapshots: &[MoodSnapshot],
    index: &DailyLevelIndex,
    offset: FixedOffset,
    window: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<String>, Vec<ButterflyEntry>), AnalyticsError> {
    let grouped = dates_by_label(snapshots, offset, MoodSnapshot::all_hashtags);
    let list: Vec<String> = grouped.keys().cloned().collect();
    let entries = labelled_entries(grouped, index, window, cancel)?;
    Ok((list, entries))
}

/// Butterfly entries for every tag of one category
pub fn tag_butterflies(
    category: TagCategory,
    snapshots: &[MoodSnapshot],
    index: &DailyLevelIndex,
    offset: FixedOffset,
    window: usize,
    cancel: &CancellationToken,
) -> Result<Vec<ButterflyEntry>, AnalyticsError> {
    let grouped = dates_by_label(snapshots, offset, |s| category.tags(s).clone());
    labelled_entries(grouped, index, window, cancel)
}

/// Butterfly entries for life events, pooled by exact label.
///
/// Each entry carries the earliest occurrence as its timestamp and entries
/// are ordered by that timestamp. The returned marker list keeps every
/// occurrence.
pub fn event_butterflies(
    snapshots: &[MoodSnapshot],
    index: &DailyLevelIndex,
    offset: FixedOffset,
    window: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<EventMarker>, Vec<ButterflyEntry>), AnalyticsError> {
    let markers = events_list(snapshots);

    let mut grouped: BTreeMap<&str, (DateTime<Utc>, Vec<NaiveDate>)> = BTreeMap::new();
    for marker in &markers {
        let day = crate::types::local_day(marker.timestamp, offset);
        grouped
            .entry(marker.label.as_str())
            .or_insert_with(|| (marker.timestamp, Vec::new()))
            .1
            .push(day);
    }

    let mut entries = Vec::with_capacity(grouped.len());
    for (label, (first_seen, dates)) in grouped {
        let mut entry = average_transient(&dates, index, window, cancel)?;
        entry.label = label.to_string();
        entry.timestamp = Some(first_seen);
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.label.cmp(&b.label)));

    Ok((markers, entries))
}

/// Total occurrences across a category's entries
pub fn count_all_occurrences(entries: &[ButterflyEntry]) -> usize {
    entries.iter().map(|e| e.occurrences).sum()
}

fn labelled_entries(
    grouped: BTreeMap<String, Vec<NaiveDate>>,
    index: &DailyLevelIndex,
    window: usize,
    cancel: &CancellationToken,
) -> Result<Vec<ButterflyEntry>, AnalyticsError> {
    grouped
        .into_iter()
        .map(|(label, dates)| {
            let mut entry = average_transient(&dates, index, window, cancel)?;
            entry.label = label;
            Ok(entry)
        })
        .collect()
}
