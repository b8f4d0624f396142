// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reference evaluator for [`TransformStep`] lists.
//!
//! The collector executes the generated processors; this module executes the same steps
//! over in-memory batches so the derived semantics can be checked directly. Each
//! [`PipelineEvaluator`] owns the accumulator state of its conversion steps and stands
//! for one continuous collector run.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;

use super::accumulator::{CumulativeToDelta, DeltaToCumulative, SeriesKey};
use super::model::{
    truncate, HistogramPoint, Labels, Metric, MetricData, Number, NumberPoint, Temporality,
};
use super::steps::{
    Action, Aggregation, MatchType, MetricTransform, Operation, Polarity, TransformStep,
};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("Cannot combine metrics into \"{metric}\": mismatched units {first:?} and {second:?}")]
    UnitMismatch {
        metric: String,
        first: String,
        second: String,
    },

    #[error("Cannot combine metrics into \"{metric}\": incompatible data {first} and {second}")]
    IncompatibleData {
        metric: String,
        first: String,
        second: String,
    },

    #[error("Cannot aggregate histogram \"{metric}\": bucket bounds differ")]
    HistogramBounds { metric: String },

    #[error("Invalid metric selector {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },
}

#[derive(Clone, Debug)]
enum StepState {
    Stateless,
    CumulativeToDelta(CumulativeToDelta),
    DeltaToCumulative(DeltaToCumulative),
}

#[derive(Clone, Debug)]
pub struct PipelineEvaluator {
    steps: Vec<TransformStep>,
    state: Vec<StepState>,
}

impl PipelineEvaluator {
    #[must_use]
    pub fn new(steps: Vec<TransformStep>) -> Self {
        let state = steps
            .iter()
            .map(|step| match step {
                TransformStep::CumulativeToDelta { .. } => {
                    StepState::CumulativeToDelta(CumulativeToDelta::new())
                }
                TransformStep::DeltaToCumulative => {
                    StepState::DeltaToCumulative(DeltaToCumulative::new())
                }
                _ => StepState::Stateless,
            })
            .collect();
        Self { steps, state }
    }

    #[must_use]
    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// Runs one batch received at `now` (nanoseconds) through every step in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a step cannot be applied to the batch, such as combining
    /// metrics with different units.
    pub fn consume(&mut self, batch: Vec<Metric>, now: u64) -> Result<Vec<Metric>, EvalError> {
        let mut metrics = batch;
        for (step, state) in self.steps.iter().zip(self.state.iter_mut()) {
            metrics = match (step, state) {
                (TransformStep::ExtractCount { metrics: names }, _) => {
                    extract_count(metrics, names)
                }
                (
                    TransformStep::Filter {
                        polarity,
                        match_type,
                        names,
                    },
                    _,
                ) => filter(metrics, *polarity, *match_type, names)?,
                (TransformStep::Transform(transforms), _) => {
                    let mut metrics = metrics;
                    for transform in transforms {
                        metrics = apply_transform(metrics, transform)?;
                    }
                    metrics
                }
                (
                    TransformStep::CumulativeToDelta { metrics: names },
                    StepState::CumulativeToDelta(acc),
                ) => cumulative_to_delta(metrics, names, acc),
                (TransformStep::Interval(window), _) => interval(metrics, *window)?,
                (TransformStep::AlignTimestamps(window), _) => align(metrics, *window, now),
                (TransformStep::DeltaToCumulative, StepState::DeltaToCumulative(acc)) => {
                    delta_to_cumulative(metrics, acc)
                }
                (TransformStep::SetUnit { metric, unit }, _) => {
                    let mut metrics = metrics;
                    for m in metrics.iter_mut().filter(|m| &m.name == metric) {
                        m.unit.clone_from(unit);
                    }
                    metrics
                }
                _ => metrics,
            };
        }
        Ok(metrics)
    }
}

enum Selector {
    Strict(String),
    Regexp(Regex),
}

impl Selector {
    fn new(pattern: &str, match_type: MatchType) -> Result<Self, EvalError> {
        match match_type {
            MatchType::Strict => Ok(Selector::Strict(pattern.to_string())),
            MatchType::Regexp => Regex::new(pattern)
                .map(Selector::Regexp)
                .map_err(|e| EvalError::InvalidRegex {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Selector::Strict(s) => s == name,
            Selector::Regexp(r) => r.is_match(name),
        }
    }

    fn rename(&self, name: &str, new_name: &str) -> String {
        match self {
            Selector::Strict(_) => new_name.to_string(),
            Selector::Regexp(r) => r.replace(name, new_name).into_owned(),
        }
    }
}

fn extract_count(metrics: Vec<Metric>, names: &[String]) -> Vec<Metric> {
    let mut out = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let count = match &metric.data {
            MetricData::Histogram {
                temporality,
                points,
            } if names.contains(&metric.name) => Some(Metric::new(
                format!("{}_count", metric.name),
                "1",
                MetricData::Sum {
                    temporality: *temporality,
                    monotonic: true,
                    points: points
                        .iter()
                        .map(|p| NumberPoint {
                            labels: p.labels.clone(),
                            start_time: p.start_time,
                            time: p.time,
                            value: Number::Int(i64::try_from(p.count).unwrap_or(i64::MAX)),
                        })
                        .collect(),
                },
            )),
            _ => None,
        };
        out.push(metric);
        out.extend(count);
    }
    out
}

fn filter(
    metrics: Vec<Metric>,
    polarity: Polarity,
    match_type: MatchType,
    names: &[String],
) -> Result<Vec<Metric>, EvalError> {
    let selectors = names
        .iter()
        .map(|n| Selector::new(n, match_type))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(metrics
        .into_iter()
        .filter(|m| {
            let matched = selectors.iter().any(|s| s.matches(&m.name));
            match polarity {
                Polarity::Include => matched,
                Polarity::Exclude => !matched,
            }
        })
        .collect())
}

fn apply_transform(
    metrics: Vec<Metric>,
    transform: &MetricTransform,
) -> Result<Vec<Metric>, EvalError> {
    let selector = Selector::new(&transform.include, transform.match_type)?;
    match transform.action {
        Action::Update => metrics
            .into_iter()
            .map(|mut m| {
                if selector.matches(&m.name) {
                    if let Some(new_name) = &transform.new_name {
                        m.name = selector.rename(&m.name, new_name);
                    }
                    apply_operations(&mut m, &transform.operations)?;
                }
                Ok(m)
            })
            .collect(),
        Action::Insert => {
            let mut copies = Vec::new();
            for m in metrics.iter().filter(|m| selector.matches(&m.name)) {
                let mut copy = m.clone();
                if let Some(new_name) = &transform.new_name {
                    copy.name = selector.rename(&m.name, new_name);
                }
                apply_operations(&mut copy, &transform.operations)?;
                copies.push(copy);
            }
            let mut metrics = metrics;
            metrics.extend(copies);
            Ok(metrics)
        }
        Action::Combine => combine(metrics, &selector, transform),
    }
}

fn compatible(metric: &str, a: &MetricData, b: &MetricData) -> Result<(), EvalError> {
    let same = match (a, b) {
        (MetricData::Gauge(_), MetricData::Gauge(_)) => true,
        (
            MetricData::Sum {
                temporality: ta,
                monotonic: ma,
                ..
            },
            MetricData::Sum {
                temporality: tb,
                monotonic: mb,
                ..
            },
        ) => ta == tb && ma == mb,
        (
            MetricData::Histogram { temporality: ta, .. },
            MetricData::Histogram { temporality: tb, .. },
        ) => ta == tb,
        _ => false,
    };
    if same {
        Ok(())
    } else {
        Err(EvalError::IncompatibleData {
            metric: metric.to_string(),
            first: a.kind().to_string(),
            second: b.kind().to_string(),
        })
    }
}

fn combine(
    metrics: Vec<Metric>,
    selector: &Selector,
    transform: &MetricTransform,
) -> Result<Vec<Metric>, EvalError> {
    let new_name = transform.new_name.clone().unwrap_or_default();
    let mut out = Vec::with_capacity(metrics.len());
    let mut position = None;
    let mut combined: Option<Metric> = None;

    for metric in metrics {
        if !selector.matches(&metric.name) {
            out.push(metric);
            continue;
        }
        match &mut combined {
            None => {
                position = Some(out.len());
                combined = Some(Metric {
                    name: new_name.clone(),
                    ..metric
                });
            }
            Some(target) => {
                if target.unit != metric.unit {
                    return Err(EvalError::UnitMismatch {
                        metric: new_name,
                        first: target.unit.clone(),
                        second: metric.unit,
                    });
                }
                compatible(&new_name, &target.data, &metric.data)?;
                match (&mut target.data, metric.data) {
                    (MetricData::Gauge(a), MetricData::Gauge(b))
                    | (MetricData::Sum { points: a, .. }, MetricData::Sum { points: b, .. }) => {
                        a.extend(b);
                    }
                    (
                        MetricData::Histogram { points: a, .. },
                        MetricData::Histogram { points: b, .. },
                    ) => a.extend(b),
                    _ => {}
                }
            }
        }
    }

    if let (Some(position), Some(mut metric)) = (position, combined) {
        apply_operations(&mut metric, &transform.operations)?;
        out.insert(position, metric);
    }
    Ok(out)
}

fn apply_operations(metric: &mut Metric, operations: &[Operation]) -> Result<(), EvalError> {
    for operation in operations {
        match operation {
            Operation::AddLabel { key, value } => metric.data.retain_labels(|l| {
                l.insert(key.clone(), value.clone());
                true
            }),
            Operation::RenameLabel { old, new } => metric.data.retain_labels(|l| {
                if let Some(v) = l.remove(old) {
                    l.insert(new.clone(), v);
                }
                true
            }),
            Operation::RenameLabelValues { label, values } => metric.data.retain_labels(|l| {
                if let Some(v) = l.get_mut(label) {
                    if let Some(new) = values.get(v.as_str()) {
                        v.clone_from(new);
                    }
                }
                true
            }),
            Operation::AggregateLabels {
                aggregation,
                labels,
            } => {
                metric.data.retain_labels(|l| {
                    l.retain(|k, _| labels.contains(k));
                    true
                });
                aggregate(metric, *aggregation)?;
            }
            Operation::AggregateLabelValues {
                aggregation,
                label,
                new_value,
                old_values,
            } => {
                metric.data.retain_labels(|l| {
                    if let Some(v) = l.get_mut(label) {
                        if old_values.contains(v) {
                            v.clone_from(new_value);
                        }
                    }
                    true
                });
                aggregate(metric, *aggregation)?;
            }
            Operation::ToggleScalarDataType => metric.data.map_numbers(Number::toggled),
            Operation::DeleteLabelValue { label, value } => metric
                .data
                .retain_labels(|l| l.get(label) != Some(value)),
            Operation::Scale(factor) => metric
                .data
                .map_numbers(|n| n.with_value(n.as_f64() * factor)),
        }
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn aggregate_values(aggregation: Aggregation, values: &[f64]) -> f64 {
    match aggregation {
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Mean => values.iter().sum::<f64>() / values.len().max(1) as f64,
        Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
    }
}

/// Groups points by `key`, keeping first-seen order.
fn group_by<T, K: Ord>(points: Vec<T>, key: impl Fn(&T) -> K) -> Vec<Vec<T>> {
    let mut index: BTreeMap<K, usize> = BTreeMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();
    for point in points {
        let k = key(&point);
        if let Some(&i) = index.get(&k) {
            groups[i].push(point);
        } else {
            index.insert(k, groups.len());
            groups.push(vec![point]);
        }
    }
    groups
}

fn merge_numbers(group: Vec<NumberPoint>, aggregation: Aggregation) -> Option<NumberPoint> {
    let values: Vec<f64> = group.iter().map(|p| p.value.as_f64()).collect();
    let start_time = group.iter().map(|p| p.start_time).min()?;
    let first = group.into_iter().next()?;
    Some(NumberPoint {
        start_time,
        value: first.value.with_value(aggregate_values(aggregation, &values)),
        ..first
    })
}

/// Histograms always merge by summing counts and buckets.
fn merge_histograms(
    metric: &str,
    group: Vec<HistogramPoint>,
) -> Result<Option<HistogramPoint>, EvalError> {
    let mut iter = group.into_iter();
    let Some(mut merged) = iter.next() else {
        return Ok(None);
    };
    for point in iter {
        if point.bounds != merged.bounds
            || point.bucket_counts.len() != merged.bucket_counts.len()
        {
            return Err(EvalError::HistogramBounds {
                metric: metric.to_string(),
            });
        }
        merged.start_time = merged.start_time.min(point.start_time);
        merged.count += point.count;
        merged.sum += point.sum;
        for (total, count) in merged.bucket_counts.iter_mut().zip(point.bucket_counts) {
            *total += count;
        }
    }
    Ok(Some(merged))
}

/// Merges points that share labels and timestamp.
fn aggregate(metric: &mut Metric, aggregation: Aggregation) -> Result<(), EvalError> {
    match &mut metric.data {
        MetricData::Gauge(points) | MetricData::Sum { points, .. } => {
            let groups = group_by(std::mem::take(points), |p| (p.labels.clone(), p.time));
            *points = groups
                .into_iter()
                .filter_map(|g| merge_numbers(g, aggregation))
                .collect();
        }
        MetricData::Histogram { points, .. } => {
            let groups = group_by(std::mem::take(points), |p| (p.labels.clone(), p.time));
            let mut merged = Vec::with_capacity(groups.len());
            for group in groups {
                merged.extend(merge_histograms(&metric.name, group)?);
            }
            *points = merged;
        }
    }
    Ok(())
}

fn cumulative_to_delta(
    metrics: Vec<Metric>,
    names: &[String],
    acc: &mut CumulativeToDelta,
) -> Vec<Metric> {
    metrics
        .into_iter()
        .map(|mut metric| {
            let selected = names.is_empty() || names.contains(&metric.name);
            if let MetricData::Sum {
                temporality,
                points,
                ..
            } = &mut metric.data
            {
                if selected && *temporality == Temporality::Cumulative {
                    *points = points
                        .iter()
                        .map(|p| acc.convert(SeriesKey::new(&metric.name, &p.labels), p))
                        .collect();
                    *temporality = Temporality::Delta;
                }
            }
            metric
        })
        .collect()
}

fn window_nanos(window: Duration) -> u64 {
    u64::try_from(window.as_nanos()).unwrap_or(u64::MAX)
}

/// One point per series and window: deltas are summed, anything else keeps its latest
/// point.
fn interval(metrics: Vec<Metric>, window: Duration) -> Result<Vec<Metric>, EvalError> {
    let w = window_nanos(window);
    let key = |labels: &Labels, time: u64| (labels.clone(), truncate(time, w));
    metrics
        .into_iter()
        .map(|mut metric| {
            match &mut metric.data {
                MetricData::Sum {
                    temporality: Temporality::Delta,
                    points,
                    ..
                } => {
                    let groups = group_by(std::mem::take(points), |p| key(&p.labels, p.time));
                    *points = groups
                        .into_iter()
                        .filter_map(|g| {
                            let time = g.iter().map(|p| p.time).max()?;
                            merge_numbers(g, Aggregation::Sum).map(|p| NumberPoint { time, ..p })
                        })
                        .collect();
                }
                MetricData::Gauge(points) | MetricData::Sum { points, .. } => {
                    let groups = group_by(std::mem::take(points), |p| key(&p.labels, p.time));
                    *points = groups
                        .into_iter()
                        .filter_map(|g| g.into_iter().max_by_key(|p| p.time))
                        .collect();
                }
                MetricData::Histogram {
                    temporality,
                    points,
                } => {
                    let groups = group_by(std::mem::take(points), |p| key(&p.labels, p.time));
                    let mut merged = Vec::with_capacity(groups.len());
                    for group in groups {
                        if *temporality == Temporality::Delta {
                            let time = group.iter().map(|p| p.time).max().unwrap_or_default();
                            merged.extend(
                                merge_histograms(&metric.name, group)?
                                    .map(|p| HistogramPoint { time, ..p }),
                            );
                        } else {
                            merged.extend(group.into_iter().max_by_key(|p| p.time));
                        }
                    }
                    *points = merged;
                }
            }
            Ok(metric)
        })
        .collect()
}

fn align(metrics: Vec<Metric>, window: Duration, now: u64) -> Vec<Metric> {
    let w = window_nanos(window);
    let time = truncate(now, w);
    let start_time = time.saturating_sub(w);
    metrics
        .into_iter()
        .map(|mut metric| {
            metric.data.set_times(start_time, time);
            metric
        })
        .collect()
}

fn delta_to_cumulative(metrics: Vec<Metric>, acc: &mut DeltaToCumulative) -> Vec<Metric> {
    metrics
        .into_iter()
        .map(|mut metric| {
            if let MetricData::Sum {
                temporality,
                points,
                ..
            } = &mut metric.data
            {
                if *temporality == Temporality::Delta {
                    *points = points
                        .iter()
                        .map(|p| acc.accumulate(SeriesKey::new(&metric.name, &p.labels), p))
                        .collect();
                    *temporality = Temporality::Cumulative;
                }
            }
            metric
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::model::{labels, point, NANOS_PER_SECOND};

    const MINUTE: u64 = 60 * NANOS_PER_SECOND;

    fn gauge(name: &str, points: Vec<NumberPoint>) -> Metric {
        Metric::new(name, "1", MetricData::Gauge(points))
    }

    fn values(metric: &Metric) -> Vec<f64> {
        metric.number_points().iter().map(|p| p.value.as_f64()).collect()
    }

    #[test]
    fn test_strict_filter_is_exact() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::include_strict(&["a.b"])]);
        let out = eval
            .consume(vec![gauge("a.b", vec![]), gauge("a.bc", vec![]), gauge("aXb", vec![])], 0)
            .expect("filters");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a.b");
    }

    #[test]
    fn test_regexp_exclude() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Filter {
            polarity: Polarity::Exclude,
            match_type: MatchType::Regexp,
            names: vec!["^cpu/.*$".to_string()],
        }]);
        let out = eval
            .consume(vec![gauge("cpu/load_1m", vec![]), gauge("memory/bytes_used", vec![])], 0)
            .expect("filters");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "memory/bytes_used");
    }

    #[test]
    fn test_invalid_regex() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Filter {
            polarity: Polarity::Include,
            match_type: MatchType::Regexp,
            names: vec!["(".to_string()],
        }]);
        assert!(matches!(
            eval.consume(vec![], 0),
            Err(EvalError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_rename_with_label_edits() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::rename(
                "system.network.io",
                "interface/traffic",
                vec![
                    Operation::rename_label("interface", "device"),
                    Operation::rename_label_values(
                        "direction",
                        &[("receive", "rx"), ("transmit", "tx")],
                    ),
                    Operation::add_label("port", "all"),
                ],
            ),
        ])]);
        let out = eval
            .consume(
                vec![gauge(
                    "system.network.io",
                    vec![point(
                        labels(&[("interface", "eth0"), ("direction", "receive")]),
                        0,
                        1,
                        Number::Int(7),
                    )],
                )],
                0,
            )
            .expect("renames");
        assert_eq!(out[0].name, "interface/traffic");
        assert_eq!(
            out[0].number_points()[0].labels,
            labels(&[("device", "eth0"), ("direction", "rx"), ("port", "all")])
        );
    }

    #[test]
    fn test_aggregate_labels_sums_collapsed_points() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::update(
                "m",
                vec![Operation::aggregate_labels(Aggregation::Sum, &["state"])],
            ),
        ])]);
        let out = eval
            .consume(
                vec![gauge(
                    "m",
                    vec![
                        point(labels(&[("state", "used"), ("cpu", "0")]), 0, 1, Number::Int(2)),
                        point(labels(&[("state", "used"), ("cpu", "1")]), 0, 1, Number::Int(3)),
                        point(labels(&[("state", "free"), ("cpu", "0")]), 0, 1, Number::Int(5)),
                    ],
                )],
                0,
            )
            .expect("aggregates");
        assert_eq!(values(&out[0]), [5.0, 5.0]);
        assert_eq!(out[0].number_points()[0].labels, labels(&[("state", "used")]));
    }

    #[test]
    fn test_aggregate_mean_max_min() {
        let points = || {
            vec![
                point(labels(&[("cpu", "0")]), 0, 1, Number::Double(1.0)),
                point(labels(&[("cpu", "1")]), 0, 1, Number::Double(3.0)),
            ]
        };
        for (aggregation, expected) in [
            (Aggregation::Mean, 2.0),
            (Aggregation::Max, 3.0),
            (Aggregation::Min, 1.0),
        ] {
            let mut metric = gauge("m", points());
            apply_operations(&mut metric, &[Operation::aggregate_labels(aggregation, &[])])
                .expect("aggregates");
            assert_eq!(values(&metric), [expected]);
        }
    }

    #[test]
    fn test_add_prefix_after_renames() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::rename("system.cpu.load_average.1m", "cpu/load_1m", vec![]),
            MetricTransform::add_prefix("agent.googleapis.com"),
        ])]);
        let out = eval
            .consume(vec![gauge("system.cpu.load_average.1m", vec![])], 0)
            .expect("renames");
        assert_eq!(out[0].name, "agent.googleapis.com/cpu/load_1m");
    }

    #[test]
    fn test_duplicate_keeps_original() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::duplicate("swap/percent_used", "pagefile/percent_used", vec![]),
        ])]);
        let out = eval
            .consume(vec![gauge("swap/percent_used", vec![])], 0)
            .expect("duplicates");
        let names: Vec<&str> = out.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["swap/percent_used", "pagefile/percent_used"]);
    }

    #[test]
    fn test_combine_rejects_mismatched_units() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::combine("^(a|b)$", "c", vec![]),
        ])]);
        let b = Metric::new("b", "By", MetricData::Gauge(vec![]));
        let err = eval.consume(vec![gauge("a", vec![]), b], 0).unwrap_err();
        assert_eq!(
            err,
            EvalError::UnitMismatch {
                metric: "c".to_string(),
                first: "1".to_string(),
                second: "By".to_string(),
            }
        );
    }

    #[test]
    fn test_combine_rejects_mixed_data() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Transform(vec![
            MetricTransform::combine("^(a|b)$", "c", vec![]),
        ])]);
        let err = eval
            .consume(vec![gauge("a", vec![]), Metric::counter("b", vec![])], 0)
            .unwrap_err();
        assert!(matches!(err, EvalError::IncompatibleData { .. }));
    }

    #[test]
    fn test_extract_count() {
        let histogram = Metric::new(
            "h",
            "ms",
            MetricData::Histogram {
                temporality: Temporality::Cumulative,
                points: vec![HistogramPoint {
                    labels: Labels::new(),
                    start_time: 0,
                    time: 1,
                    count: 12,
                    sum: 40.0,
                    bounds: vec![10.0],
                    bucket_counts: vec![10, 2],
                }],
            },
        );
        let mut eval = PipelineEvaluator::new(vec![TransformStep::ExtractCount {
            metrics: vec!["h".to_string()],
        }]);
        let out = eval.consume(vec![histogram], 0).expect("extracts");
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "h_count");
        assert_eq!(out[1].number_points()[0].value, Number::Int(12));
    }

    #[test]
    fn test_align_and_interval() {
        let now = 10 * MINUTE + 17 * NANOS_PER_SECOND;
        let mut eval = PipelineEvaluator::new(vec![
            TransformStep::CumulativeToDelta { metrics: vec![] },
            TransformStep::Interval(Duration::from_secs(60)),
            TransformStep::AlignTimestamps(Duration::from_secs(60)),
        ]);
        let series = labels(&[("a", "1")]);
        let out = eval
            .consume(
                vec![Metric::counter(
                    "m",
                    vec![
                        point(series.clone(), 0, 9 * MINUTE + 5, Number::Int(3)),
                        point(series.clone(), 0, 9 * MINUTE + 50, Number::Int(8)),
                    ],
                )],
                now,
            )
            .expect("windows");
        let points = out[0].number_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, Number::Int(8));
        assert_eq!(points[0].time, 10 * MINUTE);
        assert_eq!(points[0].start_time, 9 * MINUTE);
    }

    #[test]
    fn test_expression_passes_through() {
        let mut eval = PipelineEvaluator::new(vec![TransformStep::Expression {
            context: "datapoint".to_string(),
            statements: vec!["set(attributes[\"x\"], \"y\")".to_string()],
        }]);
        let batch = vec![gauge("m", vec![point(Labels::new(), 0, 1, Number::Int(1))])];
        assert_eq!(eval.consume(batch.clone(), 0).expect("passes"), batch);
    }
}
