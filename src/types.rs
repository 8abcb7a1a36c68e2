//! Core types for the MoodSnap analytics pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw mood and health snapshots, daily buckets, butterfly entries and
//! the processed result record published to display layers.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use uuid::Uuid;

use crate::error::AnalyticsError;

/// Lowest score a mood dimension can take
pub const MOOD_LEVEL_MIN: f64 = 0.0;

/// Highest score a mood dimension can take
pub const MOOD_LEVEL_MAX: f64 = 4.0;

/// One of the four tracked affect axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodDimension {
    Elevation,
    Depression,
    Anxiety,
    Irritability,
}

impl MoodDimension {
    /// All dimensions in display order
    pub const ALL: [MoodDimension; 4] = [
        MoodDimension::Elevation,
        MoodDimension::Depression,
        MoodDimension::Anxiety,
        MoodDimension::Irritability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodDimension::Elevation => "elevation",
            MoodDimension::Depression => "depression",
            MoodDimension::Anxiety => "anxiety",
            MoodDimension::Irritability => "irritability",
        }
    }
}

/// Per-dimension mood scores; `None` means the dimension was not recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodLevels {
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub depression: Option<f64>,
    #[serde(default)]
    pub anxiety: Option<f64>,
    #[serde(default)]
    pub irritability: Option<f64>,
}

impl MoodLevels {
    /// Levels with every dimension present
    pub fn new(elevation: f64, depression: f64, anxiety: f64, irritability: f64) -> Self {
        Self {
            elevation: Some(elevation),
            depression: Some(depression),
            anxiety: Some(anxiety),
            irritability: Some(irritability),
        }
    }

    pub fn get(&self, dimension: MoodDimension) -> Option<f64> {
        match dimension {
            MoodDimension::Elevation => self.elevation,
            MoodDimension::Depression => self.depression,
            MoodDimension::Anxiety => self.anxiety,
            MoodDimension::Irritability => self.irritability,
        }
    }

    pub fn set(&mut self, dimension: MoodDimension, value: Option<f64>) {
        match dimension {
            MoodDimension::Elevation => self.elevation = value,
            MoodDimension::Depression => self.depression = value,
            MoodDimension::Anxiety => self.anxiety = value,
            MoodDimension::Irritability => self.irritability = value,
        }
    }

    /// True when no dimension carries a value
    pub fn is_empty(&self) -> bool {
        MoodDimension::ALL.iter().all(|d| self.get(*d).is_none())
    }
}

/// Kind of user-entered snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    #[default]
    Mood,
    Event,
    Note,
    Media,
    Custom,
}

/// One user-entered record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodSnapshot {
    /// Unique identifier within the store
    pub id: Uuid,
    /// When the snapshot was taken (UTC)
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub snap_type: SnapType,
    #[serde(default)]
    pub levels: MoodLevels,
    /// Free-text note; `#word` tokens count as hashtags
    #[serde(default)]
    pub notes: String,
    /// Free-text life event label
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub hashtags: BTreeSet<String>,
    #[serde(default)]
    pub activities: BTreeSet<String>,
    #[serde(default)]
    pub symptoms: BTreeSet<String>,
    #[serde(default)]
    pub social: BTreeSet<String>,
    /// Opaque media reference for photo snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

impl MoodSnapshot {
    /// Create an empty mood snapshot with a fresh identifier
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            snap_type: SnapType::Mood,
            levels: MoodLevels::default(),
            notes: String::new(),
            event: String::new(),
            hashtags: BTreeSet::new(),
            activities: BTreeSet::new(),
            symptoms: BTreeSet::new(),
            social: BTreeSet::new(),
            media: None,
        }
    }

    /// Create a mood entry with the given levels
    pub fn mood(timestamp: DateTime<Utc>, levels: MoodLevels) -> Self {
        Self {
            levels,
            ..Self::new(timestamp)
        }
    }

    /// Create a life event entry
    pub fn event(timestamp: DateTime<Utc>, label: impl Into<String>) -> Self {
        Self {
            snap_type: SnapType::Event,
            event: label.into(),
            ..Self::new(timestamp)
        }
    }

    /// Calendar day of this snapshot at the given UTC offset
    pub fn local_day(&self, offset: FixedOffset) -> NaiveDate {
        local_day(self.timestamp, offset)
    }

    /// Mood entries with at least one recorded level feed the daily signal
    pub fn is_mood_bearing(&self) -> bool {
        self.snap_type == SnapType::Mood && !self.levels.is_empty()
    }

    /// Explicit hashtags plus any `#word` tokens in the notes
    pub fn all_hashtags(&self) -> BTreeSet<String> {
        let mut tags = self.hashtags.clone();
        tags.extend(extract_hashtags(&self.notes));
        tags
    }

    /// Check that every recorded level is finite and on the mood scale
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        for dimension in MoodDimension::ALL {
            if let Some(value) = self.levels.get(dimension) {
                if !value.is_finite() || !(MOOD_LEVEL_MIN..=MOOD_LEVEL_MAX).contains(&value) {
                    return Err(AnalyticsError::InvalidSnapshot {
                        id: self.id,
                        reason: format!(
                            "{} level {} outside {}..={}",
                            dimension.as_str(),
                            value,
                            MOOD_LEVEL_MIN,
                            MOOD_LEVEL_MAX
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Calendar day of a timestamp at the given UTC offset
pub fn local_day(timestamp: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    timestamp.with_timezone(&offset).date_naive()
}

/// Pull `#word` tokens out of free text, keeping the leading `#`
pub fn extract_hashtags(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|word| word.starts_with('#'))
        .map(|word| word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|tag| tag.len() > 1)
        .map(str::to_string)
        .collect()
}

/// Menstrual flow category, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenstrualFlow {
    None,
    Unspecified,
    Light,
    Medium,
    Heavy,
}

impl MenstrualFlow {
    /// Any recorded flow other than `none`
    pub fn is_active(&self) -> bool {
        *self != MenstrualFlow::None
    }
}

/// One externally-sourced daily health record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Day this record describes
    pub date: NaiveDate,
    /// Body mass (kg)
    #[serde(default)]
    pub weight_kg: Option<f64>,
    /// Walking + running distance (km)
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub menstrual: Option<MenstrualFlow>,
}

impl HealthSnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            weight_kg: None,
            distance_km: None,
            menstrual: None,
        }
    }

    pub fn has_active_flow(&self) -> bool {
        self.menstrual.is_some_and(|flow| flow.is_active())
    }

    /// Fold another record for the same day into this one.
    ///
    /// Weight keeps the maximum, distance is summed and flow keeps the most
    /// severe category.
    pub fn merge(&mut self, other: &HealthSnapshot) {
        self.weight_kg = match (self.weight_kg, other.weight_kg) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.distance_km = match (self.distance_km, other.distance_km) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        self.menstrual = self.menstrual.max(other.menstrual);
    }
}

/// One calendar day of snapshots, produced by the sequencer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    /// Snapshots of that day ordered by (timestamp, id); may be empty
    pub snapshots: Vec<MoodSnapshot>,
}

/// Averaged mood profile around a set of reference dates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButterflyEntry {
    /// Tag, activity or event name
    pub label: String,
    /// Set for life events: the earliest occurrence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub elevation: Vec<Option<f64>>,
    pub depression: Vec<Option<f64>>,
    pub anxiety: Vec<Option<f64>>,
    pub irritability: Vec<Option<f64>>,
    /// Distinct reference dates that contributed
    pub occurrences: usize,
}

impl ButterflyEntry {
    /// Length of the arrays for a half-window, `2 * window + 1`
    pub fn span(window: usize) -> Result<usize, AnalyticsError> {
        window
            .checked_mul(2)
            .and_then(|w| w.checked_add(1))
            .ok_or_else(|| AnalyticsError::InvalidConfig(format!("window {window} too large")))
    }

    /// Entry with all-absent arrays of length `2 * window + 1`
    pub fn empty(label: impl Into<String>, window: usize) -> Result<Self, AnalyticsError> {
        let len = Self::span(window)?;
        Ok(Self {
            label: label.into(),
            timestamp: None,
            elevation: vec![None; len],
            depression: vec![None; len],
            anxiety: vec![None; len],
            irritability: vec![None; len],
            occurrences: 0,
        })
    }

    /// Half-width of the offset range
    pub fn window(&self) -> usize {
        self.elevation.len().saturating_sub(1) / 2
    }

    /// Day offsets covered by the arrays, `-window..=window`
    pub fn offsets(&self) -> RangeInclusive<i64> {
        let w = self.window() as i64;
        -w..=w
    }

    pub fn series(&self, dimension: MoodDimension) -> &[Option<f64>] {
        match dimension {
            MoodDimension::Elevation => &self.elevation,
            MoodDimension::Depression => &self.depression,
            MoodDimension::Anxiety => &self.anxiety,
            MoodDimension::Irritability => &self.irritability,
        }
    }

    pub fn series_mut(&mut self, dimension: MoodDimension) -> &mut Vec<Option<f64>> {
        match dimension {
            MoodDimension::Elevation => &mut self.elevation,
            MoodDimension::Depression => &mut self.depression,
            MoodDimension::Anxiety => &mut self.anxiety,
            MoodDimension::Irritability => &mut self.irritability,
        }
    }

    /// Whether consumers should chart this entry rather than show "insufficient data"
    pub fn is_sufficient(&self, min_occurrences: usize) -> bool {
        self.occurrences >= min_occurrences.max(1)
            && MoodDimension::ALL
                .iter()
                .any(|d| self.series(*d).iter().any(Option::is_some))
    }
}

/// Dense per-day values for each mood dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodSeries {
    pub elevation: Vec<Option<f64>>,
    pub depression: Vec<Option<f64>>,
    pub anxiety: Vec<Option<f64>>,
    pub irritability: Vec<Option<f64>>,
}

impl MoodSeries {
    pub fn get(&self, dimension: MoodDimension) -> &[Option<f64>] {
        match dimension {
            MoodDimension::Elevation => &self.elevation,
            MoodDimension::Depression => &self.depression,
            MoodDimension::Anxiety => &self.anxiety,
            MoodDimension::Irritability => &self.irritability,
        }
    }

    pub fn set(&mut self, dimension: MoodDimension, values: Vec<Option<f64>>) {
        match dimension {
            MoodDimension::Elevation => self.elevation = values,
            MoodDimension::Depression => self.depression = values,
            MoodDimension::Anxiety => self.anxiety = values,
            MoodDimension::Irritability => self.irritability = values,
        }
    }
}

/// Level, sliding average and volatility series for all dimensions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodHistory {
    pub level: MoodSeries,
    pub average: MoodSeries,
    pub volatility: MoodSeries,
}

/// A single life event occurrence, as listed to display layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMarker {
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

/// Dense health metrics aligned with the daily sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSeries {
    pub weight_kg: Vec<Option<f64>>,
    pub distance_km: Vec<Option<f64>>,
    pub menstrual: Vec<Option<MenstrualFlow>>,
}

/// Summed occurrence counts per butterfly category.
///
/// Each count sums distinct (label, day) reference dates, so an event logged
/// twice on one day counts once even though `events_list` holds both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceCounts {
    pub hashtags: usize,
    pub activities: usize,
    pub symptoms: usize,
    pub social: usize,
    pub events: usize,
    pub menstrual_cycles: usize,
}

/// Aggregate result record, replaced as a whole by each completed run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedData {
    /// Calendar axis shared by every dense series
    #[serde(default)]
    pub dates: Vec<NaiveDate>,
    #[serde(default)]
    pub history: MoodHistory,
    #[serde(default)]
    pub hashtag_butterfly: Vec<ButterflyEntry>,
    #[serde(default)]
    pub activity_butterfly: Vec<ButterflyEntry>,
    #[serde(default)]
    pub symptom_butterfly: Vec<ButterflyEntry>,
    #[serde(default)]
    pub social_butterfly: Vec<ButterflyEntry>,
    #[serde(default)]
    pub event_butterfly: Vec<ButterflyEntry>,
    #[serde(default)]
    pub menstrual_butterfly: ButterflyEntry,
    #[serde(default)]
    pub cycle_starts: Vec<NaiveDate>,
    #[serde(default)]
    pub health: HealthSeries,
    #[serde(default)]
    pub hashtag_list: Vec<String>,
    #[serde(default)]
    pub events_list: Vec<EventMarker>,
    #[serde(default)]
    pub counts: OccurrenceCounts,
}

impl ProcessedData {
    /// True before the first completed run or for an empty store
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}
