// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory metric batches consumed by the reference evaluator.
//!
//! Timestamps are nanoseconds since the Unix epoch.

use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Double(f64),
}

impl Number {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Double(d) => d,
        }
    }

    /// `value` in the same representation as `self`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_value(self, value: f64) -> Number {
        match self {
            Number::Int(_) => Number::Int(value.round() as i64),
            Number::Double(_) => Number::Double(value),
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn toggled(self) -> Number {
        match self {
            Number::Int(i) => Number::Double(Number::Int(i).as_f64()),
            Number::Double(d) => Number::Int(d.round() as i64),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Temporality {
    Cumulative,
    Delta,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NumberPoint {
    pub labels: Labels,
    pub start_time: u64,
    pub time: u64,
    pub value: Number,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramPoint {
    pub labels: Labels,
    pub start_time: u64,
    pub time: u64,
    pub count: u64,
    pub sum: f64,
    pub bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricData {
    Gauge(Vec<NumberPoint>),
    Sum {
        temporality: Temporality,
        monotonic: bool,
        points: Vec<NumberPoint>,
    },
    Histogram {
        temporality: Temporality,
        points: Vec<HistogramPoint>,
    },
}

impl MetricData {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            MetricData::Gauge(_) => "gauge",
            MetricData::Sum { .. } => "sum",
            MetricData::Histogram { .. } => "histogram",
        }
    }

    /// Applies `f` to the labels of every point, dropping points for which it returns false.
    pub fn retain_labels(&mut self, mut f: impl FnMut(&mut Labels) -> bool) {
        match self {
            MetricData::Gauge(points) | MetricData::Sum { points, .. } => {
                points.retain_mut(|p| f(&mut p.labels));
            }
            MetricData::Histogram { points, .. } => points.retain_mut(|p| f(&mut p.labels)),
        }
    }

    /// Applies `f` to the value of every number point.
    pub fn map_numbers(&mut self, f: impl Fn(Number) -> Number) {
        match self {
            MetricData::Gauge(points) | MetricData::Sum { points, .. } => {
                for point in points {
                    point.value = f(point.value);
                }
            }
            MetricData::Histogram { .. } => {}
        }
    }

    /// Sets `(start_time, time)` on every point.
    pub fn set_times(&mut self, start_time: u64, time: u64) {
        match self {
            MetricData::Gauge(points) | MetricData::Sum { points, .. } => {
                for point in points {
                    point.start_time = start_time;
                    point.time = time;
                }
            }
            MetricData::Histogram { points, .. } => {
                for point in points {
                    point.start_time = start_time;
                    point.time = time;
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            MetricData::Gauge(points) | MetricData::Sum { points, .. } => points.len(),
            MetricData::Histogram { points, .. } => points.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub data: MetricData,
}

impl Metric {
    #[must_use]
    pub fn new(name: impl Into<String>, unit: impl Into<String>, data: MetricData) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            data,
        }
    }

    /// Monotonic cumulative sum, the shape of most counters.
    #[must_use]
    pub fn counter(name: impl Into<String>, points: Vec<NumberPoint>) -> Self {
        Self::new(
            name,
            "1",
            MetricData::Sum {
                temporality: Temporality::Cumulative,
                monotonic: true,
                points,
            },
        )
    }

    /// Number points, empty for histograms.
    #[must_use]
    pub fn number_points(&self) -> &[NumberPoint] {
        match &self.data {
            MetricData::Gauge(points) | MetricData::Sum { points, .. } => points,
            MetricData::Histogram { .. } => &[],
        }
    }
}

#[must_use]
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[must_use]
pub fn point(labels: Labels, start_time: u64, time: u64, value: Number) -> NumberPoint {
    NumberPoint {
        labels,
        start_time,
        time,
        value,
    }
}

/// `time` rounded down to a multiple of `window_nanos`.
#[must_use]
pub fn truncate(time: u64, window_nanos: u64) -> u64 {
    if window_nanos == 0 {
        time
    } else {
        time - time % window_nanos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_conversions() {
        assert_eq!(Number::Int(3).toggled(), Number::Double(3.0));
        assert_eq!(Number::Double(2.6).toggled(), Number::Int(3));
        assert_eq!(Number::Int(1).with_value(4.0), Number::Int(4));
        assert!((Number::Double(1.5).as_f64() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_truncate() {
        let minute = 60 * NANOS_PER_SECOND;
        assert_eq!(truncate(minute * 3 + 17, minute), minute * 3);
        assert_eq!(truncate(minute, minute), minute);
        assert_eq!(truncate(5, 0), 5);
    }

    #[test]
    fn test_retain_labels() {
        let mut data = MetricData::Gauge(vec![
            point(labels(&[("a", "1")]), 0, 1, Number::Int(1)),
            point(labels(&[("a", "2")]), 0, 1, Number::Int(2)),
        ]);
        data.retain_labels(|l| l.get("a").map(String::as_str) != Some("2"));
        assert_eq!(data.len(), 1);
    }
}
