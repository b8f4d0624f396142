// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric transform steps.
//!
//! A step is both a collector processor (see [`TransformStep::component`]) and an
//! operation the reference evaluator in [`super::eval`] can execute. Order matters:
//! units are set before combination, and combination happens between the
//! cumulative-to-delta and delta-to-cumulative conversions.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::duration;
use crate::otel::Component;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Include,
    Exclude,
}

impl Polarity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Polarity::Include => "include",
            Polarity::Exclude => "exclude",
        }
    }
}

/// How a metric name selector is matched. `Strict` is exact name equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    Strict,
    Regexp,
}

impl MatchType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Strict => "strict",
            MatchType::Regexp => "regexp",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    Max,
    Min,
}

impl Aggregation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        }
    }
}

/// What a [`MetricTransform`] does with the metrics it selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Edit in place, renaming when `new_name` is set.
    Update,
    /// Duplicate under `new_name` and edit the copy.
    Insert,
    /// Merge every selected metric into one named `new_name`.
    Combine,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Update => "update",
            Action::Insert => "insert",
            Action::Combine => "combine",
        }
    }
}

/// Per-metric label and value edit.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    AddLabel {
        key: String,
        value: String,
    },
    RenameLabel {
        old: String,
        new: String,
    },
    /// Literal value remapping; values without an entry are kept.
    RenameLabelValues {
        label: String,
        values: BTreeMap<String, String>,
    },
    /// Drops every label not in `labels`, merging the points that collapse together.
    AggregateLabels {
        aggregation: Aggregation,
        labels: Vec<String>,
    },
    /// Replaces each of `old_values` of `label` with `new_value`, merging collapsed points.
    AggregateLabelValues {
        aggregation: Aggregation,
        label: String,
        new_value: String,
        old_values: Vec<String>,
    },
    ToggleScalarDataType,
    /// Drops points whose `label` equals `value`.
    DeleteLabelValue {
        label: String,
        value: String,
    },
    Scale(f64),
}

impl Operation {
    #[must_use]
    pub fn add_label(key: &str, value: &str) -> Self {
        Operation::AddLabel {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[must_use]
    pub fn rename_label(old: &str, new: &str) -> Self {
        Operation::RenameLabel {
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    #[must_use]
    pub fn rename_label_values(label: &str, values: &[(&str, &str)]) -> Self {
        Operation::RenameLabelValues {
            label: label.to_string(),
            values: values
                .iter()
                .map(|(old, new)| ((*old).to_string(), (*new).to_string()))
                .collect(),
        }
    }

    #[must_use]
    pub fn aggregate_labels(aggregation: Aggregation, labels: &[&str]) -> Self {
        Operation::AggregateLabels {
            aggregation,
            labels: labels.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn aggregate_label_values(
        aggregation: Aggregation,
        label: &str,
        new_value: &str,
        old_values: &[&str],
    ) -> Self {
        Operation::AggregateLabelValues {
            aggregation,
            label: label.to_string(),
            new_value: new_value.to_string(),
            old_values: old_values.iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn delete_label_value(label: &str, value: &str) -> Self {
        Operation::DeleteLabelValue {
            label: label.to_string(),
            value: value.to_string(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Operation::AddLabel { key, value } => json!({
                "action": "add_label",
                "new_label": key,
                "new_value": value,
            }),
            Operation::RenameLabel { old, new } => json!({
                "action": "update_label",
                "label": old,
                "new_label": new,
            }),
            Operation::RenameLabelValues { label, values } => {
                let actions: Vec<Value> = values
                    .iter()
                    .map(|(old, new)| json!({ "value": old, "new_value": new }))
                    .collect();
                json!({
                    "action": "update_label",
                    "label": label,
                    "value_actions": actions,
                })
            }
            Operation::AggregateLabels {
                aggregation,
                labels,
            } => json!({
                "action": "aggregate_labels",
                "label_set": labels,
                "aggregation_type": aggregation.as_str(),
            }),
            Operation::AggregateLabelValues {
                aggregation,
                label,
                new_value,
                old_values,
            } => json!({
                "action": "aggregate_label_values",
                "aggregation_type": aggregation.as_str(),
                "label": label,
                "new_value": new_value,
                "aggregated_values": old_values,
            }),
            Operation::ToggleScalarDataType => json!({ "action": "toggle_scalar_data_type" }),
            Operation::DeleteLabelValue { label, value } => json!({
                "action": "delete_label_value",
                "label": label,
                "label_value": value,
            }),
            Operation::Scale(factor) => json!({
                "action": "experimental_scale_value",
                "experimental_scale": factor,
            }),
        }
    }
}

/// One entry of a `metricstransform` processor.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricTransform {
    /// Metric name, or a regex when `match_type` is [`MatchType::Regexp`].
    pub include: String,
    pub match_type: MatchType,
    pub action: Action,
    /// For regexp updates, may reference capture groups as `${1}`.
    pub new_name: Option<String>,
    pub operations: Vec<Operation>,
}

impl MetricTransform {
    /// Renames `old` to `new`.
    #[must_use]
    pub fn rename(old: &str, new: &str, operations: Vec<Operation>) -> Self {
        Self {
            include: old.to_string(),
            match_type: MatchType::Strict,
            action: Action::Update,
            new_name: Some(new.to_string()),
            operations,
        }
    }

    /// Edits `metric` in place.
    #[must_use]
    pub fn update(metric: &str, operations: Vec<Operation>) -> Self {
        Self {
            include: metric.to_string(),
            match_type: MatchType::Strict,
            action: Action::Update,
            new_name: None,
            operations,
        }
    }

    /// Copies `old` to `new` and edits the copy.
    #[must_use]
    pub fn duplicate(old: &str, new: &str, operations: Vec<Operation>) -> Self {
        Self {
            include: old.to_string(),
            match_type: MatchType::Strict,
            action: Action::Insert,
            new_name: Some(new.to_string()),
            operations,
        }
    }

    /// Renames every metric matching `regex` to `rename`.
    #[must_use]
    pub fn regexp_rename(regex: &str, rename: &str, operations: Vec<Operation>) -> Self {
        Self {
            include: regex.to_string(),
            match_type: MatchType::Regexp,
            action: Action::Update,
            new_name: Some(rename.to_string()),
            operations,
        }
    }

    /// Prepends `prefix/` to every metric name.
    #[must_use]
    pub fn add_prefix(prefix: &str) -> Self {
        Self::regexp_rename("^(.*)$", &format!("{prefix}/${{1}}"), Vec::new())
    }

    /// Merges every metric matching `regex` into `new_name`.
    #[must_use]
    pub fn combine(regex: &str, new_name: &str, operations: Vec<Operation>) -> Self {
        Self {
            include: regex.to_string(),
            match_type: MatchType::Regexp,
            action: Action::Combine,
            new_name: Some(new_name.to_string()),
            operations,
        }
    }

    fn to_value(&self) -> Value {
        // Regexp renames expand `$` in both fields, so literal dollars are doubled.
        let escape = |s: &str| {
            if self.match_type == MatchType::Regexp && self.action == Action::Update {
                s.replace('$', "$$")
            } else {
                s.to_string()
            }
        };
        let mut out = json!({
            "include": escape(&self.include),
            "action": self.action.as_str(),
        });
        if self.match_type == MatchType::Regexp {
            out["match_type"] = json!("regexp");
        }
        if let Some(new_name) = &self.new_name {
            out["new_name"] = json!(escape(new_name));
        }
        if self.action == Action::Combine {
            out["submatch_case"] = json!("lower");
        }
        if !self.operations.is_empty() {
            out["operations"] = self
                .operations
                .iter()
                .map(Operation::to_value)
                .collect::<Vec<_>>()
                .into();
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformStep {
    /// For each listed histogram, adds a monotonic sum `{name}_count` holding the
    /// observation count of every point.
    ExtractCount { metrics: Vec<String> },
    Filter {
        polarity: Polarity,
        match_type: MatchType,
        names: Vec<String>,
    },
    Transform(Vec<MetricTransform>),
    /// Cumulative sums to deltas. The first point of a series is kept whole, so it acts
    /// as the baseline. An empty list converts every cumulative sum.
    CumulativeToDelta { metrics: Vec<String> },
    /// Collapses each series to one point per window.
    Interval(Duration),
    /// Moves every point onto the window grid: `time = truncate(now)` and
    /// `start_time = time - window`.
    AlignTimestamps(Duration),
    /// Delta sums back to cumulative sums with a running total per series.
    DeltaToCumulative,
    SetUnit { metric: String, unit: String },
    /// Raw transform statements; the evaluator passes these through.
    Expression {
        context: String,
        statements: Vec<String>,
    },
}

fn transform_statements(context: &str, statements: Vec<String>) -> Component {
    Component::new(
        "transform",
        json!({
            "error_mode": "ignore",
            "metric_statements": [{
                "context": context,
                "statements": statements,
            }],
        }),
    )
}

impl TransformStep {
    #[must_use]
    pub fn include_strict(names: &[&str]) -> Self {
        TransformStep::Filter {
            polarity: Polarity::Include,
            match_type: MatchType::Strict,
            names: names.iter().map(ToString::to_string).collect(),
        }
    }

    /// Collector processor implementing this step.
    #[must_use]
    pub fn component(&self) -> Component {
        match self {
            TransformStep::ExtractCount { metrics } => transform_statements(
                "metric",
                metrics
                    .iter()
                    .map(|m| format!("extract_count_metric(true) where name == \"{m}\""))
                    .collect(),
            ),
            TransformStep::Filter {
                polarity,
                match_type,
                names,
            } => Component::new(
                "filter",
                json!({
                    "metrics": {
                        polarity.as_str(): {
                            "match_type": match_type.as_str(),
                            "metric_names": names,
                        }
                    }
                }),
            ),
            TransformStep::Transform(transforms) => Component::new(
                "metricstransform",
                json!({
                    "transforms": transforms.iter().map(MetricTransform::to_value).collect::<Vec<_>>(),
                }),
            ),
            TransformStep::CumulativeToDelta { metrics } => {
                let mut config = json!({ "initial_value": "keep" });
                if !metrics.is_empty() {
                    config["include"] = json!({ "metrics": metrics, "match_type": "strict" });
                }
                Component::new("cumulativetodelta", config)
            }
            TransformStep::Interval(window) => Component::new(
                "interval",
                json!({ "interval": duration::format(*window) }),
            ),
            TransformStep::AlignTimestamps(window) => {
                let window = duration::format(*window);
                transform_statements(
                    "datapoint",
                    vec![
                        format!("set(time, TruncateTime(Now(), Duration(\"{window}\")))"),
                        format!(
                            "set(start_time, TruncateTime(Now(), Duration(\"{window}\")) - Duration(\"{window}\"))"
                        ),
                    ],
                )
            }
            TransformStep::DeltaToCumulative => Component::new("deltatocumulative", json!({})),
            TransformStep::SetUnit { metric, unit } => transform_statements(
                "metric",
                vec![format!("set(unit, \"{unit}\") where name == \"{metric}\"")],
            ),
            TransformStep::Expression {
                context,
                statements,
            } => transform_statements(context, statements.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_component() {
        let c = TransformStep::include_strict(&["a", "b"]).component();
        assert_eq!(c.type_, "filter");
        assert_eq!(
            c.config,
            json!({ "metrics": { "include": { "match_type": "strict", "metric_names": ["a", "b"] } } })
        );
    }

    #[test]
    fn test_add_prefix_escapes_dollars() {
        let c = TransformStep::Transform(vec![MetricTransform::add_prefix("agent.googleapis.com")])
            .component();
        assert_eq!(c.type_, "metricstransform");
        assert_eq!(
            c.config["transforms"][0],
            json!({
                "include": "^(.*)$$",
                "match_type": "regexp",
                "action": "update",
                "new_name": "agent.googleapis.com/$${1}",
            })
        );
    }

    #[test]
    fn test_combine_is_not_escaped() {
        let t = MetricTransform::combine(
            "^(a|b)$",
            "agent/api_request_count",
            vec![Operation::aggregate_labels(Aggregation::Sum, &["response_code"])],
        );
        let v = t.to_value();
        assert_eq!(v["include"], "^(a|b)$");
        assert_eq!(v["action"], "combine");
        assert_eq!(v["operations"][0]["label_set"], json!(["response_code"]));
        assert_eq!(v["operations"][0]["aggregation_type"], "sum");
    }

    #[test]
    fn test_rename_label_values_sorted() {
        let op =
            Operation::rename_label_values("direction", &[("transmit", "tx"), ("receive", "rx")]);
        assert_eq!(
            op.to_value()["value_actions"],
            json!([
                { "value": "receive", "new_value": "rx" },
                { "value": "transmit", "new_value": "tx" }
            ])
        );
    }

    #[test]
    fn test_windowing_components() {
        let c2d = TransformStep::CumulativeToDelta {
            metrics: vec!["m".to_string()],
        }
        .component();
        assert_eq!(c2d.config["initial_value"], "keep");
        assert_eq!(c2d.config["include"]["metrics"], json!(["m"]));

        let interval = TransformStep::Interval(Duration::from_secs(60)).component();
        assert_eq!(interval.config, json!({ "interval": "1m" }));

        let align = TransformStep::AlignTimestamps(Duration::from_secs(60)).component();
        assert_eq!(align.type_, "transform");
        assert_eq!(
            align.config["metric_statements"][0]["statements"][0],
            "set(time, TruncateTime(Now(), Duration(\"1m\")))"
        );
    }

    #[test]
    fn test_set_unit_and_extract_count() {
        let unit = TransformStep::SetUnit {
            metric: "m".to_string(),
            unit: "1".to_string(),
        }
        .component();
        assert_eq!(
            unit.config["metric_statements"][0]["statements"],
            json!(["set(unit, \"1\") where name == \"m\""])
        );
        let count = TransformStep::ExtractCount {
            metrics: vec!["h".to_string()],
        }
        .component();
        assert_eq!(
            count.config["metric_statements"][0]["statements"],
            json!(["extract_count_metric(true) where name == \"h\""])
        );
    }
}
