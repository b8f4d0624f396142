// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent self-metrics.
//!
//! One prometheus receiver scrapes both the collector and the log shipper. Two pipelines
//! consume it: one renames uptime, memory and volume metrics, the other merges the
//! request counts of both subagents into `agent/api_request_count`.
//!
//! The two request counters disagree on both shape and labels. The collector reports a
//! cumulative histogram labelled with gRPC status names, the log shipper a cumulative
//! counter labelled with HTTP codes. They are converted to deltas, aligned on a one
//! minute grid, summed and turned back into a single cumulative series.

use std::time::Duration;

use serde_json::json;

use crate::config::metrics::AGENT_METRIC_PREFIX;
use crate::fluentbit::components::SELF_METRICS_PORT;
use crate::otel::{Component, ReceiverPipeline, METRICS_PORT};

use super::steps::{Aggregation, MetricTransform, Operation, TransformStep};

/// Receiver pipeline key shared by the self-metrics pipelines.
pub const RECEIVER_PIPELINE: &str = "agent_prometheus";
pub const METRICS_PIPELINE: &str = "agent_metrics";
pub const API_REQUESTS_PIPELINE: &str = "agent_api_request_count";

pub const API_REQUEST_COUNT: &str = "agent/api_request_count";
const RESPONSE_CODE: &str = "response_code";
const COLLECTOR_REQUESTS: &str = "grpc.client.attempt.duration";
const COLLECTOR_REQUEST_COUNT: &str = "grpc.client.attempt.duration_count";
const LOGGING_REQUESTS: &str = "fluentbit_stackdriver_requests_total";

const WINDOW: Duration = Duration::from_secs(60);

/// gRPC status names to the HTTP status codes the log shipper reports.
pub const GRPC_TO_HTTP: &[(&str, &str)] = &[
    ("OK", "200"),
    ("CANCELLED", "499"),
    ("UNKNOWN", "500"),
    ("INVALID_ARGUMENT", "400"),
    ("DEADLINE_EXCEEDED", "504"),
    ("NOT_FOUND", "404"),
    ("ALREADY_EXISTS", "409"),
    ("PERMISSION_DENIED", "403"),
    ("RESOURCE_EXHAUSTED", "429"),
    ("FAILED_PRECONDITION", "400"),
    ("ABORTED", "409"),
    ("OUT_OF_RANGE", "400"),
    ("UNIMPLEMENTED", "501"),
    ("INTERNAL", "500"),
    ("UNAVAILABLE", "503"),
    ("DATA_LOSS", "500"),
    ("UNAUTHENTICATED", "401"),
];

#[must_use]
pub fn receiver_pipeline() -> ReceiverPipeline {
    let job = |name: &str, port: u16| {
        json!({
            "job_name": name,
            "scrape_interval": "1m",
            "metrics_path": "/metrics",
            "static_configs": [{ "targets": [format!("0.0.0.0:{port}")] }],
        })
    };
    ReceiverPipeline {
        receiver: Component::new(
            "prometheus",
            json!({
                "config": {
                    "scrape_configs": [
                        job("otel-collector", METRICS_PORT),
                        job("logging-collector", SELF_METRICS_PORT),
                    ]
                }
            }),
        ),
        processors: Vec::new(),
    }
}

/// Uptime, memory usage, exported point counts and log entry counts.
#[must_use]
pub fn metrics_steps(version: &str) -> Vec<TransformStep> {
    vec![
        TransformStep::include_strict(&[
            "otelcol_process_uptime",
            "otelcol_process_memory_rss",
            "otelcol_exporter_sent_metric_points",
            "fluentbit_uptime",
            "fluentbit_stackdriver_proc_records_total",
        ]),
        TransformStep::Transform(vec![
            MetricTransform::rename(
                "otelcol_process_uptime",
                "agent/uptime",
                vec![
                    Operation::ToggleScalarDataType,
                    Operation::add_label(
                        "version",
                        &format!("google-cloud-ops-agent-metrics/{version}"),
                    ),
                    Operation::aggregate_labels(Aggregation::Sum, &["version"]),
                ],
            ),
            MetricTransform::rename("otelcol_process_memory_rss", "agent/memory_usage", vec![]),
            MetricTransform::rename(
                "otelcol_exporter_sent_metric_points",
                "agent/monitoring/point_count",
                vec![
                    Operation::ToggleScalarDataType,
                    Operation::aggregate_labels(Aggregation::Sum, &[]),
                ],
            ),
            MetricTransform::rename(
                "fluentbit_uptime",
                "agent/uptime",
                vec![
                    Operation::ToggleScalarDataType,
                    Operation::add_label(
                        "version",
                        &format!("google-cloud-ops-agent-logging/{version}"),
                    ),
                    Operation::aggregate_labels(Aggregation::Sum, &["version"]),
                ],
            ),
            MetricTransform::rename(
                "fluentbit_stackdriver_proc_records_total",
                "agent/log_entry_count",
                vec![
                    Operation::ToggleScalarDataType,
                    Operation::rename_label("status", RESPONSE_CODE),
                    Operation::aggregate_labels(Aggregation::Sum, &[RESPONSE_CODE]),
                ],
            ),
            MetricTransform::add_prefix(AGENT_METRIC_PREFIX),
        ]),
    ]
}

/// Request counts of both subagents merged into one cumulative series per response code.
#[must_use]
pub fn api_request_steps() -> Vec<TransformStep> {
    let sources = [COLLECTOR_REQUEST_COUNT, LOGGING_REQUESTS];
    vec![
        TransformStep::include_strict(&[COLLECTOR_REQUESTS, LOGGING_REQUESTS]),
        TransformStep::ExtractCount {
            metrics: vec![COLLECTOR_REQUESTS.to_string()],
        },
        TransformStep::include_strict(&sources),
        TransformStep::Transform(vec![
            MetricTransform::update(
                COLLECTOR_REQUEST_COUNT,
                vec![
                    Operation::rename_label("grpc.status", RESPONSE_CODE),
                    Operation::rename_label_values(RESPONSE_CODE, GRPC_TO_HTTP),
                    Operation::aggregate_labels(Aggregation::Sum, &[RESPONSE_CODE]),
                ],
            ),
            MetricTransform::update(
                LOGGING_REQUESTS,
                vec![
                    Operation::ToggleScalarDataType,
                    Operation::rename_label("status", RESPONSE_CODE),
                    Operation::aggregate_labels(Aggregation::Sum, &[RESPONSE_CODE]),
                ],
            ),
        ]),
        TransformStep::SetUnit {
            metric: COLLECTOR_REQUEST_COUNT.to_string(),
            unit: "1".to_string(),
        },
        TransformStep::SetUnit {
            metric: LOGGING_REQUESTS.to_string(),
            unit: "1".to_string(),
        },
        TransformStep::CumulativeToDelta {
            metrics: sources.iter().map(ToString::to_string).collect(),
        },
        TransformStep::Interval(WINDOW),
        TransformStep::AlignTimestamps(WINDOW),
        TransformStep::Transform(vec![MetricTransform::combine(
            &format!(
                "^({}|{})$",
                regex::escape(COLLECTOR_REQUEST_COUNT),
                regex::escape(LOGGING_REQUESTS)
            ),
            API_REQUEST_COUNT,
            vec![Operation::aggregate_labels(Aggregation::Sum, &[RESPONSE_CODE])],
        )]),
        TransformStep::DeltaToCumulative,
        TransformStep::Transform(vec![MetricTransform::add_prefix(AGENT_METRIC_PREFIX)]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::eval::PipelineEvaluator;
    use crate::metrics::model::{
        labels, point, HistogramPoint, Metric, MetricData, Number, Temporality, NANOS_PER_SECOND,
    };

    const MINUTE: u64 = 60 * NANOS_PER_SECOND;

    fn collector(count: u64, status: &str, time: u64) -> Metric {
        Metric::new(
            COLLECTOR_REQUESTS,
            "ms",
            MetricData::Histogram {
                temporality: Temporality::Cumulative,
                points: vec![HistogramPoint {
                    labels: labels(&[("grpc.status", status), ("grpc.method", "CreateTimeSeries")]),
                    start_time: 0,
                    time,
                    count,
                    sum: 0.0,
                    bounds: vec![],
                    bucket_counts: vec![count],
                }],
            },
        )
    }

    fn logging(total: f64, status: &str, time: u64) -> Metric {
        Metric::counter(
            LOGGING_REQUESTS,
            vec![point(
                labels(&[("status", status), ("name", "out")]),
                0,
                time,
                Number::Double(total),
            )],
        )
    }

    #[test]
    fn test_grpc_table() {
        let table: std::collections::BTreeMap<_, _> = GRPC_TO_HTTP.iter().copied().collect();
        assert_eq!(table.len(), 17);
        assert_eq!(table["OK"], "200");
        assert_eq!(table["DEADLINE_EXCEEDED"], "504");
        assert_eq!(table["RESOURCE_EXHAUSTED"], "429");
    }

    #[test]
    fn test_api_request_count_round_trip() {
        let mut eval = PipelineEvaluator::new(api_request_steps());

        let first = eval
            .consume(
                vec![collector(4, "OK", MINUTE + 5), logging(6.0, "200", MINUTE + 9)],
                2 * MINUTE + 1,
            )
            .expect("first batch");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "agent.googleapis.com/agent/api_request_count");
        let points = first[0].number_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].labels, labels(&[("response_code", "200")]));
        assert_eq!(points[0].value, Number::Int(10));
        assert_eq!(points[0].time, 2 * MINUTE);

        let second = eval
            .consume(
                vec![collector(7, "OK", 2 * MINUTE + 5), logging(6.0, "200", 2 * MINUTE + 9)],
                3 * MINUTE + 1,
            )
            .expect("second batch");
        let points = second[0].number_points();
        assert_eq!(points[0].value, Number::Int(13));
        assert_eq!(points[0].start_time, MINUTE);
    }

    #[test]
    fn test_error_codes_are_separate_series() {
        let mut eval = PipelineEvaluator::new(api_request_steps());
        let out = eval
            .consume(
                vec![
                    collector(2, "UNAVAILABLE", MINUTE),
                    logging(1.0, "503", MINUTE),
                    logging(3.0, "200", MINUTE),
                ],
                2 * MINUTE,
            )
            .expect("batch");
        let mut by_code: Vec<(String, f64)> = out[0]
            .number_points()
            .iter()
            .map(|p| (p.labels["response_code"].clone(), p.value.as_f64()))
            .collect();
        by_code.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(by_code, [("200".to_string(), 3.0), ("503".to_string(), 3.0)]);
    }

    #[test]
    fn test_uptime_versions() {
        let mut eval = PipelineEvaluator::new(metrics_steps("2.46.0"));
        let out = eval
            .consume(
                vec![
                    Metric::new(
                        "otelcol_process_uptime",
                        "s",
                        MetricData::Gauge(vec![point(
                            labels(&[("service.instance.id", "x")]),
                            0,
                            1,
                            Number::Double(30.0),
                        )]),
                    ),
                    Metric::new("otelcol_unrelated", "1", MetricData::Gauge(vec![])),
                ],
                0,
            )
            .expect("batch");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "agent.googleapis.com/agent/uptime");
        let point = &out[0].number_points()[0];
        assert_eq!(point.value, Number::Int(30));
        assert_eq!(
            point.labels,
            labels(&[("version", "google-cloud-ops-agent-metrics/2.46.0")])
        );
    }

    #[test]
    fn test_receiver_scrapes_both_subagents() {
        let pipeline = receiver_pipeline();
        let targets: Vec<&str> = pipeline.receiver.config["config"]["scrape_configs"]
            .as_array()
            .expect("scrape configs")
            .iter()
            .filter_map(|job| job["static_configs"][0]["targets"][0].as_str())
            .collect();
        assert_eq!(targets, ["0.0.0.0:20201", "0.0.0.0:20202"]);
    }
}
