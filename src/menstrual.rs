//! Menstrual cycle correlation
//!
//! Detects cycle starts from daily health records and builds the mood
//! butterfly centred on them.

use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use crate::butterfly::{average_transient, DailyLevelIndex};
use crate::error::AnalyticsError;
use crate::types::{ButterflyEntry, HealthSnapshot};

/// Label given to the cycle butterfly
pub const CYCLE_LABEL: &str = "menstrual_cycle";

/// Cycle start dates between `first` and `last` inclusive.
///
/// Walks day by day; on a day with active flow the date is recorded and the
/// walk jumps `min_cycle_gap` days ahead so that consecutive flow days of one
/// cycle count once.
pub fn filter_menstrual_dates(
    by_day: &BTreeMap<NaiveDate, HealthSnapshot>,
    first: NaiveDate,
    last: NaiveDate,
    min_cycle_gap: usize,
) -> Vec<NaiveDate> {
    let jump = Days::new(min_cycle_gap.max(1) as u64);
    let mut dates = Vec::new();
    let mut date = first;

    while date <= last {
        let active = by_day.get(&date).is_some_and(HealthSnapshot::has_active_flow);
        let next = if active {
            dates.push(date);
            date.checked_add_days(jump)
        } else {
            date.succ_opt()
        };
        match next {
            Some(next) => date = next,
            None => break,
        }
    }

    dates
}

/// Mood butterfly around each cycle start
pub fn cycle_butterfly(
    cycle_starts: &[NaiveDate],
    index: &DailyLevelIndex,
    window: usize,
    cancel: &CancellationToken,
) -> Result<ButterflyEntry, AnalyticsError> {
    let mut entry = average_transient(cycle_starts, index, window, cancel)?;
    entry.label = CYCLE_LABEL.to_string();
    Ok(entry)
}
