//! Analytics configuration
//!
//! Window sizes and thresholds used by the aggregators. Every field has a
//! default so partial JSON files are accepted.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::AnalyticsError;

/// Default butterfly half-window for hashtags, activities, symptoms and social entries
pub const DEFAULT_SHORT_WINDOW: usize = 7;

/// Default butterfly half-window for life events
pub const DEFAULT_LONG_WINDOW: usize = 28;

/// Default butterfly half-window around a menstrual cycle start
pub const DEFAULT_MENSTRUAL_WINDOW: usize = 14;

/// Default trailing window for sliding averages and volatility
pub const DEFAULT_SLIDING_AVERAGE_WINDOW: usize = 14;

/// Default number of days skipped after a detected cycle start
pub const DEFAULT_MIN_CYCLE_GAP: usize = 14;

/// Default minimum number of reference dates for a chartable butterfly
pub const DEFAULT_MIN_OCCURRENCES: usize = 2;

/// Upper bound for every window and the cycle gap, in days
pub const MAX_WINDOW_DAYS: usize = 3650;

const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// How several mood entries on the same day collapse into one daily value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayReduction {
    /// Last mood-bearing entry of the day
    #[default]
    Latest,
    /// Per-dimension mean of the day's entries
    Average,
    /// Per-dimension maximum of the day's entries
    Maximum,
}

/// Configuration passed into every aggregator call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub short_window: usize,
    pub long_window: usize,
    pub menstrual_window: usize,
    pub sliding_average_window: usize,
    pub min_cycle_gap: usize,
    pub min_occurrences: usize,
    pub day_reduction: DayReduction,
    /// Offset from UTC used to derive the local calendar day
    pub utc_offset_minutes: i32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            short_window: DEFAULT_SHORT_WINDOW,
            long_window: DEFAULT_LONG_WINDOW,
            menstrual_window: DEFAULT_MENSTRUAL_WINDOW,
            sliding_average_window: DEFAULT_SLIDING_AVERAGE_WINDOW,
            min_cycle_gap: DEFAULT_MIN_CYCLE_GAP,
            min_occurrences: DEFAULT_MIN_OCCURRENCES,
            day_reduction: DayReduction::Latest,
            utc_offset_minutes: 0,
        }
    }
}

impl AnalyticsConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, AnalyticsError> {
        let config: AnalyticsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_path(path: &Path) -> Result<Self, AnalyticsError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, AnalyticsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        for (name, days) in [
            ("short_window", self.short_window),
            ("long_window", self.long_window),
            ("menstrual_window", self.menstrual_window),
            ("sliding_average_window", self.sliding_average_window),
            ("min_cycle_gap", self.min_cycle_gap),
        ] {
            if days == 0 {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
            if days > MAX_WINDOW_DAYS {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "{name} {days} exceeds {MAX_WINDOW_DAYS} days"
                )));
            }
        }
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(AnalyticsError::InvalidConfig(format!(
                "utc_offset_minutes {} outside ±{}",
                self.utc_offset_minutes, MAX_UTC_OFFSET_MINUTES
            )));
        }
        Ok(())
    }

    /// Offset used for calendar-day bucketing; falls back to UTC when out of range
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}
