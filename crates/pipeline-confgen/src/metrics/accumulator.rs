// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-series state for the cumulative/delta conversions.
//!
//! Both accumulators live as long as one evaluator, mirroring one continuous run of the
//! collector. Nothing here is persisted.

use std::collections::BTreeMap;

use super::model::{Labels, Number, NumberPoint};

/// Identity of an output series.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub metric: String,
    pub labels: Labels,
}

impl SeriesKey {
    #[must_use]
    pub fn new(metric: &str, labels: &Labels) -> Self {
        Self {
            metric: metric.to_string(),
            labels: labels.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Baseline {
    time: u64,
    value: f64,
}

/// Converts cumulative points to deltas.
///
/// The first point seen for a series is emitted whole, so it becomes the baseline the
/// downstream running total starts from. A value lower than the previous one is a
/// counter reset and is emitted whole as well.
#[derive(Clone, Debug, Default)]
pub struct CumulativeToDelta {
    last: BTreeMap<SeriesKey, Baseline>,
}

impl CumulativeToDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&mut self, key: SeriesKey, point: &NumberPoint) -> NumberPoint {
        let value = point.value.as_f64();
        let (start_time, delta) = match self.last.get(&key) {
            Some(previous) if value >= previous.value => (previous.time, value - previous.value),
            _ => (point.start_time, value),
        };
        self.last.insert(
            key,
            Baseline {
                time: point.time,
                value,
            },
        );
        NumberPoint {
            labels: point.labels.clone(),
            start_time,
            time: point.time,
            value: point.value.with_value(delta),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Total {
    start_time: u64,
    value: f64,
}

/// Turns deltas back into a monotonic running total per series.
///
/// A window with no point for a series adds nothing and keeps the total. Late points
/// are added like any other.
#[derive(Clone, Debug, Default)]
pub struct DeltaToCumulative {
    totals: BTreeMap<SeriesKey, Total>,
}

impl DeltaToCumulative {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, key: SeriesKey, point: &NumberPoint) -> NumberPoint {
        let total = self.totals.entry(key).or_insert(Total {
            start_time: point.start_time,
            value: 0.0,
        });
        total.value += point.value.as_f64();
        NumberPoint {
            labels: point.labels.clone(),
            start_time: total.start_time,
            time: point.time,
            value: point.value.with_value(total.value),
        }
    }

    /// Current running total of `key`, if the series has been seen.
    #[must_use]
    pub fn total(&self, key: &SeriesKey) -> Option<Number> {
        self.totals.get(key).map(|t| Number::Double(t.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::model::{labels, point};

    fn key() -> SeriesKey {
        SeriesKey::new("m", &labels(&[("a", "1")]))
    }

    #[test]
    fn test_first_point_is_the_baseline() {
        let mut c2d = CumulativeToDelta::new();
        let first = c2d.convert(key(), &point(labels(&[("a", "1")]), 5, 10, Number::Int(100)));
        assert_eq!(first.value, Number::Int(100));
        assert_eq!(first.start_time, 5);

        let second = c2d.convert(key(), &point(labels(&[("a", "1")]), 5, 20, Number::Int(130)));
        assert_eq!(second.value, Number::Int(30));
        assert_eq!(second.start_time, 10);
        assert_eq!(c2d.len(), 1);
    }

    #[test]
    fn test_counter_reset() {
        let mut c2d = CumulativeToDelta::new();
        c2d.convert(key(), &point(Labels::new(), 0, 10, Number::Double(50.0)));
        let reset = c2d.convert(key(), &point(Labels::new(), 15, 20, Number::Double(7.0)));
        assert_eq!(reset.value, Number::Double(7.0));
        assert_eq!(reset.start_time, 15);
    }

    #[test]
    fn test_missing_window_keeps_total() {
        let mut d2c = DeltaToCumulative::new();
        d2c.accumulate(key(), &point(Labels::new(), 0, 60, Number::Int(4)));
        // Nothing arrives for the next window.
        let later = d2c.accumulate(key(), &point(Labels::new(), 120, 180, Number::Int(0)));
        assert_eq!(later.value, Number::Int(4));
        assert_eq!(later.start_time, 0);
    }

    #[test]
    fn test_late_points_are_added() {
        let mut d2c = DeltaToCumulative::new();
        d2c.accumulate(key(), &point(Labels::new(), 60, 120, Number::Int(3)));
        let late = d2c.accumulate(key(), &point(Labels::new(), 0, 60, Number::Int(2)));
        assert_eq!(late.value, Number::Int(5));
        assert_eq!(d2c.total(&key()), Some(Number::Double(5.0)));
    }
}
