//! Health data provider
//!
//! The platform health service is an external collaborator. This module
//! defines the provider seam, reduces raw samples to one authoritative record
//! per day and lays health metrics out along the daily sequence.

use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::error::AnalyticsError;
use crate::types::{HealthSeries, HealthSnapshot, MenstrualFlow};

/// Trait for health data providers
pub trait HealthProvider: Send + Sync {
    /// Fetch daily health records for the given day range
    fn fetch_health_snapshots(
        &self,
        range: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<HealthSnapshot>, AnalyticsError>;
}

/// Fetch from a provider, treating any failure (denied permission, query
/// error) as "no data".
pub fn fetch_or_empty(
    provider: &dyn HealthProvider,
    range: RangeInclusive<NaiveDate>,
) -> Vec<HealthSnapshot> {
    match provider.fetch_health_snapshots(range) {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!("health provider failed, continuing without health data: {e}");
            Vec::new()
        }
    }
}

/// Raw sample kinds as reported by the platform health service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthSampleKind {
    Weight { kg: f64 },
    Distance { km: f64 },
    Menstrual { flow: MenstrualFlow },
}

/// One raw health sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: HealthSampleKind,
}

/// Reduce raw samples to one record per day, sorted by date.
///
/// Weight keeps the daily maximum, distance is summed and menstrual flow
/// keeps the most severe category.
pub fn reduce_daily(samples: &[HealthSample]) -> Vec<HealthSnapshot> {
    let records = samples.iter().map(|sample| {
        let mut record = HealthSnapshot::new(sample.date);
        match sample.kind {
            HealthSampleKind::Weight { kg } => record.weight_kg = Some(kg),
            HealthSampleKind::Distance { km } => record.distance_km = Some(km),
            HealthSampleKind::Menstrual { flow } => record.menstrual = Some(flow),
        }
        record
    });
    by_day(records).into_values().collect()
}

/// Authoritative record per day for snapshots that may hold several records
/// for the same day.
pub fn health_by_day(snapshots: &[HealthSnapshot]) -> BTreeMap<NaiveDate, HealthSnapshot> {
    by_day(snapshots.iter().cloned())
}

fn by_day<I>(records: I) -> BTreeMap<NaiveDate, HealthSnapshot>
where
    I: IntoIterator<Item = HealthSnapshot>,
{
    let mut days: BTreeMap<NaiveDate, HealthSnapshot> = BTreeMap::new();
    for record in records {
        match days.get_mut(&record.date) {
            Some(existing) => existing.merge(&record),
            None => {
                days.insert(record.date, record);
            }
        }
    }
    days
}

/// Dense health metrics aligned with `dates`
pub fn health_series(
    dates: &[NaiveDate],
    by_day: &BTreeMap<NaiveDate, HealthSnapshot>,
) -> HealthSeries {
    let mut series = HealthSeries {
        weight_kg: Vec::with_capacity(dates.len()),
        distance_km: Vec::with_capacity(dates.len()),
        menstrual: Vec::with_capacity(dates.len()),
    };
    for date in dates {
        let record = by_day.get(date);
        series.weight_kg.push(record.and_then(|r| r.weight_kg));
        series.distance_km.push(record.and_then(|r| r.distance_km));
        series.menstrual.push(record.and_then(|r| r.menstrual));
    }
    series
}

/// Provider backed by a fixed list of samples
#[derive(Debug, Clone, Default)]
pub struct InMemoryHealthProvider {
    samples: Vec<HealthSample>,
}

impl InMemoryHealthProvider {
    pub fn new(samples: Vec<HealthSample>) -> Self {
        Self { samples }
    }

    /// Load samples from a JSON array
    pub fn from_json(json: &str) -> Result<Self, AnalyticsError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

impl HealthProvider for InMemoryHealthProvider {
    fn fetch_health_snapshots(
        &self,
        range: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<HealthSnapshot>, AnalyticsError> {
        let in_range: Vec<HealthSample> = self
            .samples
            .iter()
            .filter(|s| range.contains(&s.date))
            .copied()
            .collect();
        Ok(reduce_daily(&in_range))
    }
}
