//! Pipeline stages
//!
//! This module turns a frozen store snapshot into a `ProcessedData` record.
//!
//! Pipeline stages:
//! 1. PreparedInput - sort snapshots, sequence into days, flatten, index levels
//! 2. Aggregate - independent read-only computations over the prepared input
//! 3. ProcessedDataBuilder - assemble outputs in any completion order
//!
//! The orchestrator runs stage 2 concurrently; `process_snapshot` runs the
//! same stages sequentially and produces identical results.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use crate::butterfly::{
    count_all_occurrences, event_butterflies, hashtag_butterflies, tag_butterflies,
    DailyLevelIndex, TagCategory,
};
use crate::config::AnalyticsConfig;
use crate::error::AnalyticsError;
use crate::health::{health_by_day, health_series};
use crate::history::generate_history;
use crate::menstrual::{cycle_butterfly, filter_menstrual_dates};
use crate::persistence::StoreRecord;
use crate::sequencer::{flatten, sequence, sort_snapshots};
use crate::store::StoreSnapshot;
use crate::types::{
    ButterflyEntry, DailyBucket, EventMarker, HealthSeries, HealthSnapshot, MoodHistory,
    MoodSnapshot, ProcessedData,
};

/// Sequenced view of a store snapshot shared by every aggregate
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub config: AnalyticsConfig,
    /// Mood snapshots sorted by (timestamp, id)
    pub snapshots: Vec<MoodSnapshot>,
    pub health: BTreeMap<NaiveDate, HealthSnapshot>,
    pub sequence: Vec<DailyBucket>,
    pub flattened: Vec<Option<MoodSnapshot>>,
    pub dates: Vec<NaiveDate>,
    pub index: DailyLevelIndex,
}

impl PreparedInput {
    /// Run the sequencer once over a frozen snapshot
    pub fn new(snapshot: &StoreSnapshot, config: &AnalyticsConfig) -> Self {
        let offset = config.offset();
        let snapshots = sort_snapshots(&snapshot.mood_snapshots);
        let sequence = sequence(&snapshots, offset);
        let flattened = flatten(&sequence, config.day_reduction);
        let dates = sequence.iter().map(|b| b.date).collect();
        let index = DailyLevelIndex::new(&sequence, &flattened);

        Self {
            config: config.clone(),
            snapshots,
            health: health_by_day(&snapshot.health_snapshots),
            sequence,
            flattened,
            dates,
            index,
        }
    }
}

/// Independent aggregate computations of one processing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    History,
    Hashtags,
    Activities,
    Symptoms,
    Social,
    Events,
    Health,
}

impl Aggregate {
    pub const ALL: [Aggregate; 7] = [
        Aggregate::History,
        Aggregate::Hashtags,
        Aggregate::Activities,
        Aggregate::Symptoms,
        Aggregate::Social,
        Aggregate::Events,
        Aggregate::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::History => "history",
            Aggregate::Hashtags => "hashtags",
            Aggregate::Activities => "activities",
            Aggregate::Symptoms => "symptoms",
            Aggregate::Social => "social",
            Aggregate::Events => "events",
            Aggregate::Health => "health",
        }
    }

    /// Tag category of the activity, symptom and social aggregates
    pub fn tag_category(&self) -> Option<TagCategory> {
        match self {
            Aggregate::Activities => Some(TagCategory::Activity),
            Aggregate::Symptoms => Some(TagCategory::Symptom),
            Aggregate::Social => Some(TagCategory::Social),
            Aggregate::History
            | Aggregate::Hashtags
            | Aggregate::Events
            | Aggregate::Health => None,
        }
    }

    /// Compute this aggregate. Returns `Cancelled` once `cancel` fires.
    pub fn run(
        self,
        input: &PreparedInput,
        cancel: &CancellationToken,
    ) -> Result<AggregateOutput, AnalyticsError> {
        if cancel.is_cancelled() {
            return Err(AnalyticsError::Cancelled);
        }

        let config = &input.config;
        let offset = config.offset();

        match self {
            Aggregate::History => {
                let history =
                    generate_history(&input.flattened, config.sliding_average_window, cancel)?;
                Ok(AggregateOutput::History(history))
            }
            Aggregate::Hashtags => {
                let (list, entries) = hashtag_butterflies(
                    &input.snapshots,
                    &input.index,
                    offset,
                    config.short_window,
                    cancel,
                )?;
                Ok(AggregateOutput::Hashtags { list, entries })
            }
            Aggregate::Activities | Aggregate::Symptoms | Aggregate::Social => {
                let category = self.tag_category().ok_or_else(|| {
                    AnalyticsError::TaskFailed(format!("{} has no tag category", self.as_str()))
                })?;
                let entries = tag_butterflies(
                    category,
                    &input.snapshots,
                    &input.index,
                    offset,
                    config.short_window,
                    cancel,
                )?;
                Ok(AggregateOutput::Tags { category, entries })
            }
            Aggregate::Events => {
                let (markers, entries) = event_butterflies(
                    &input.snapshots,
                    &input.index,
                    offset,
                    config.long_window,
                    cancel,
                )?;
                Ok(AggregateOutput::Events { markers, entries })
            }
            Aggregate::Health => {
                let series = health_series(&input.dates, &input.health);
                let cycle_starts = match (input.dates.first(), input.dates.last()) {
                    (Some(first), Some(last)) => {
                        filter_menstrual_dates(&input.health, *first, *last, config.min_cycle_gap)
                    }
                    _ => Vec::new(),
                };
                let butterfly =
                    cycle_butterfly(&cycle_starts, &input.index, config.menstrual_window, cancel)?;
                Ok(AggregateOutput::Health {
                    series,
                    cycle_starts,
                    butterfly,
                })
            }
        }
    }
}

/// Result of one aggregate
#[derive(Debug, Clone)]
pub enum AggregateOutput {
    History(MoodHistory),
    Hashtags {
        list: Vec<String>,
        entries: Vec<ButterflyEntry>,
    },
    Tags {
        category: TagCategory,
        entries: Vec<ButterflyEntry>,
    },
    Events {
        markers: Vec<EventMarker>,
        entries: Vec<ButterflyEntry>,
    },
    Health {
        series: HealthSeries,
        cycle_starts: Vec<NaiveDate>,
        butterfly: ButterflyEntry,
    },
}

/// Assembles aggregate outputs into one `ProcessedData`
#[derive(Debug, Default)]
pub struct ProcessedDataBuilder {
    data: ProcessedData,
}

impl ProcessedDataBuilder {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            data: ProcessedData {
                dates,
                ..Default::default()
            },
        }
    }

    pub fn apply(&mut self, output: AggregateOutput) {
        let data = &mut self.data;
        match output {
            AggregateOutput::History(history) => data.history = history,
            AggregateOutput::Hashtags { list, entries } => {
                data.counts.hashtags = count_all_occurrences(&entries);
                data.hashtag_list = list;
                data.hashtag_butterfly = entries;
            }
            AggregateOutput::Tags { category, entries } => {
                let count = count_all_occurrences(&entries);
                match category {
                    TagCategory::Activity => {
                        data.counts.activities = count;
                        data.activity_butterfly = entries;
                    }
                    TagCategory::Symptom => {
                        data.counts.symptoms = count;
                        data.symptom_butterfly = entries;
                    }
                    TagCategory::Social => {
                        data.counts.social = count;
                        data.social_butterfly = entries;
                    }
                }
            }
            AggregateOutput::Events { markers, entries } => {
                data.counts.events = count_all_occurrences(&entries);
                data.events_list = markers;
                data.event_butterfly = entries;
            }
            AggregateOutput::Health {
                series,
                cycle_starts,
                butterfly,
            } => {
                data.counts.menstrual_cycles = cycle_starts.len();
                data.health = series;
                data.cycle_starts = cycle_starts;
                data.menstrual_butterfly = butterfly;
            }
        }
    }

    pub fn build(self) -> ProcessedData {
        self.data
    }
}

/// Run every stage sequentially over a frozen snapshot
pub fn process_snapshot(
    snapshot: &StoreSnapshot,
    config: &AnalyticsConfig,
) -> Result<ProcessedData, AnalyticsError> {
    config.validate()?;
    let cancel = CancellationToken::new();
    let input = PreparedInput::new(snapshot, config);
    let mut builder = ProcessedDataBuilder::new(input.dates.clone());

    for aggregate in Aggregate::ALL {
        builder.apply(aggregate.run(&input, &cancel)?);
    }

    Ok(builder.build())
}

/// Process a store record
pub fn process_record(
    record: &StoreRecord,
    config: &AnalyticsConfig,
) -> Result<ProcessedData, AnalyticsError> {
    process_snapshot(&StoreSnapshot::from_record(record), config)
}

/// Convert a store record JSON into ProcessedData JSON.
///
/// # Example
/// ```ignore
/// let record_json = std::fs::read_to_string("data.json")?;
/// let processed_json = process_record_json(&record_json, &AnalyticsConfig::default())?;
/// ```
pub fn process_record_json(
    record_json: &str,
    config: &AnalyticsConfig,
) -> Result<String, AnalyticsError> {
    let record = StoreRecord::from_json(record_json)?;
    let processed = process_record(&record, config)?;
    Ok(serde_json::to_string(&processed)?)
}
