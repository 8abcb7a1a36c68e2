//! Mood history
//!
//! This module computes the per-day level, trailing sliding average and
//! volatility series for each mood dimension over the dense daily sequence.
//! Absent days stay absent; they are never interpolated or read as zero.

use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

use crate::error::AnalyticsError;
use crate::types::{MoodDimension, MoodHistory, MoodSeries, MoodSnapshot};

/// Per-day level of one dimension, aligned 1:1 with the flattened sequence
pub fn level_series(
    flattened: &[Option<MoodSnapshot>],
    dimension: MoodDimension,
) -> Vec<Option<f64>> {
    flattened
        .iter()
        .map(|day| day.as_ref().and_then(|s| s.levels.get(dimension)))
        .collect()
}

/// Trailing mean over the present days of the last `window` days.
///
/// Windows at the start of the sequence use the available prefix; a window
/// with no present day yields `None`.
pub fn sliding_average(levels: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(levels, window, |values| Some(mean(values)))
}

/// Trailing mean absolute deviation, same window and presence rule as the average
pub fn sliding_volatility(levels: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(levels, window, |values| {
        let centre = mean(values);
        Some(values.iter().map(|v| (v - centre).abs()).sum::<f64>() / values.len() as f64)
    })
}

/// Compute level, average and volatility for all four dimensions
pub fn generate_history(
    flattened: &[Option<MoodSnapshot>],
    window: usize,
    cancel: &CancellationToken,
) -> Result<MoodHistory, AnalyticsError> {
    let mut history = MoodHistory {
        level: MoodSeries::default(),
        average: MoodSeries::default(),
        volatility: MoodSeries::default(),
    };

    for dimension in MoodDimension::ALL {
        if cancel.is_cancelled() {
            return Err(AnalyticsError::Cancelled);
        }
        let levels = level_series(flattened, dimension);
        history.average.set(dimension, sliding_average(&levels, window));
        history.volatility.set(dimension, sliding_volatility(&levels, window));
        history.level.set(dimension, levels);
    }

    Ok(history)
}

fn rolling<F>(levels: &[Option<f64>], window: usize, reduce: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let window = window.max(1);
    let mut trailing: VecDeque<Option<f64>> = VecDeque::with_capacity(window.min(levels.len()));
    let mut out = Vec::with_capacity(levels.len());

    for level in levels {
        trailing.push_back(*level);
        while trailing.len() > window {
            trailing.pop_front();
        }
        let present: Vec<f64> = trailing.iter().flatten().copied().collect();
        out.push(if present.is_empty() { None } else { reduce(&present) });
    }

    out
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MoodLevels;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_sample() {
        let snap = MoodSnapshot::mood(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            MoodLevels {
                elevation: Some(3.0),
                ..Default::default()
            },
        );
        let history = generate_history(&[Some(snap)], 7, &CancellationToken::new()).unwrap();

        assert_eq!(history.level.elevation, vec![Some(3.0)]);
        assert_eq!(history.average.elevation, vec![Some(3.0)]);
        assert_eq!(history.volatility.elevation, vec![Some(0.0)]);
        assert_eq!(history.level.depression, vec![None]);
        assert_eq!(history.average.depression, vec![None]);
        for dimension in [MoodDimension::Anxiety, MoodDimension::Irritability] {
            assert_eq!(history.volatility.get(dimension), &[None]);
        }
    }

    #[test]
    fn test_sliding_average_prefix_and_window() {
        let levels = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let avg = sliding_average(&levels, 2);
        assert_eq!(avg, vec![Some(1.0), Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn test_window_longer_than_sequence() {
        let levels = vec![Some(1.0), Some(3.0)];
        assert_eq!(sliding_average(&levels, usize::MAX), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_absent_days_are_skipped_not_zero() {
        let levels = vec![Some(2.0), None, Some(4.0), None, None, None];
        let avg = sliding_average(&levels, 3);
        assert_eq!(avg, vec![Some(2.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0), None]);
    }

    #[test]
    fn test_zero_is_a_real_score() {
        let levels = vec![Some(0.0), Some(0.0)];
        assert_eq!(sliding_average(&levels, 3), vec![Some(0.0), Some(0.0)]);
        assert_eq!(sliding_volatility(&levels, 3), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_volatility_mean_absolute_deviation() {
        let levels = vec![Some(1.0), Some(3.0), None, Some(2.0)];
        let vol = sliding_volatility(&levels, 4);
        // Window [1, 3]: mean 2, deviations 1 + 1
        assert_eq!(vol[1], Some(1.0));
        // Window [1, 3, 2]: mean 2, deviations 1 + 1 + 0
        assert!((vol[3].unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cancelled_history() {
        let token = CancellationToken::new();
        token.cancel();
        let result = generate_history(&[None, None], 7, &token);
        assert!(matches!(result, Err(AnalyticsError::Cancelled)));
    }
}
