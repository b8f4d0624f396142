// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics pipeline assembler.
//!
//! Each user receiver becomes one receiver pipeline. Each `(pipeline, receiver)` pair
//! becomes one collector pipeline named `{pipeline}_{receiver}` that applies the
//! pipeline's processors and then the agent metric prefix, so exclusion patterns match
//! the unprefixed names. The agent self-metrics pipelines are always added.

pub mod accumulator;
pub mod agent;
pub mod eval;
pub mod model;
pub mod steps;

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use crate::config::duration;
use crate::config::metrics::{
    pipeline_key, GoogleCloudMonitoringExporter, HostmetricsReceiver, MetricsExporter,
    MetricsProcessor, MetricsReceiver, AGENT_METRIC_PREFIX,
};
use crate::config::UnifiedConfig;
use crate::environment::Environment;
use crate::error::GenerateError;
use crate::otel::{Component, ModularConfig, Pipeline, ReceiverPipeline};

use self::steps::{
    Action, Aggregation, MatchType, MetricTransform, Operation, Polarity, TransformStep,
};

/// Subagent name reported in the metrics user agent.
pub const SUBAGENT: &str = "Metrics";

/// Exporter key shared by every pipeline; rendered as the bare `googlecloud` type.
const GOOGLE_CLOUD_EXPORTER: &str = "";

const HOSTMETRICS_SCRAPERS: &[&str] = &[
    "cpu",
    "disk",
    "filesystem",
    "load",
    "memory",
    "network",
    "paging",
    "processes",
];

fn rx_tx() -> Operation {
    Operation::rename_label_values("direction", &[("receive", "rx"), ("transmit", "tx")])
}

fn slab() -> Operation {
    Operation::aggregate_label_values(
        Aggregation::Sum,
        "state",
        "slab",
        &["slab_reclaimable", "slab_unreclaimable"],
    )
}

/// Renames and label edits mapping host metrics onto the agent metric names.
#[must_use]
pub fn hostmetrics_steps() -> Vec<TransformStep> {
    let transforms = vec![
        MetricTransform::rename(
            "system.cpu.time",
            "cpu/usage_time",
            vec![
                Operation::ToggleScalarDataType,
                Operation::rename_label("cpu", "cpu_number"),
                Operation::rename_label("state", "cpu_state"),
            ],
        ),
        MetricTransform::rename(
            "system.cpu.utilization",
            "cpu/utilization",
            vec![
                Operation::Scale(100.0),
                Operation::aggregate_labels(Aggregation::Mean, &["state"]),
                Operation::rename_label("state", "cpu_state"),
            ],
        ),
        MetricTransform::rename("system.cpu.load_average.1m", "cpu/load_1m", vec![]),
        MetricTransform::rename("system.cpu.load_average.5m", "cpu/load_5m", vec![]),
        MetricTransform::rename("system.cpu.load_average.15m", "cpu/load_15m", vec![]),
        MetricTransform::rename("system.disk.io", "disk/bytes_count", vec![]),
        MetricTransform::rename("system.disk.operations", "disk/operation_count", vec![]),
        MetricTransform::rename(
            "system.disk.io_time",
            "disk/io_time",
            vec![Operation::Scale(1000.0), Operation::ToggleScalarDataType],
        ),
        MetricTransform::rename(
            "system.filesystem.usage",
            "disk/bytes_used",
            vec![
                Operation::ToggleScalarDataType,
                Operation::aggregate_labels(Aggregation::Sum, &["device", "state"]),
            ],
        ),
        MetricTransform::rename(
            "system.filesystem.utilization",
            "disk/percent_used",
            vec![
                Operation::Scale(100.0),
                Operation::aggregate_labels(Aggregation::Sum, &["device", "state"]),
            ],
        ),
        MetricTransform::rename(
            "system.memory.usage",
            "memory/bytes_used",
            vec![Operation::ToggleScalarDataType, slab()],
        ),
        MetricTransform::rename(
            "system.memory.utilization",
            "memory/percent_used",
            vec![Operation::Scale(100.0), slab()],
        ),
        MetricTransform::rename(
            "system.network.io",
            "interface/traffic",
            vec![Operation::rename_label("interface", "device"), rx_tx()],
        ),
        MetricTransform::rename(
            "system.network.errors",
            "interface/errors",
            vec![Operation::rename_label("interface", "device"), rx_tx()],
        ),
        MetricTransform::rename(
            "system.network.packets",
            "interface/packets",
            vec![Operation::rename_label("interface", "device"), rx_tx()],
        ),
        MetricTransform::rename(
            "system.network.connections",
            "network/tcp_connections",
            vec![
                Operation::ToggleScalarDataType,
                Operation::delete_label_value("protocol", "udp"),
                Operation::rename_label("state", "tcp_state"),
                Operation::aggregate_labels(Aggregation::Sum, &["tcp_state"]),
                Operation::add_label("port", "all"),
            ],
        ),
        MetricTransform::rename("system.processes.created", "processes/fork_count", vec![]),
        MetricTransform::rename(
            "system.paging.usage",
            "swap/bytes_used",
            vec![Operation::ToggleScalarDataType],
        ),
        MetricTransform::rename(
            "system.paging.utilization",
            "swap/percent_used",
            vec![Operation::Scale(100.0)],
        ),
        MetricTransform::duplicate(
            "swap/percent_used",
            "pagefile/percent_used",
            vec![Operation::aggregate_labels(Aggregation::Sum, &["state"])],
        ),
        MetricTransform::rename(
            "system.paging.operations",
            "swap/io",
            vec![
                Operation::aggregate_labels(Aggregation::Sum, &["direction"]),
                Operation::rename_label_values(
                    "direction",
                    &[("page_in", "in"), ("page_out", "out")],
                ),
            ],
        ),
    ];
    let sources: Vec<&str> = transforms
        .iter()
        .filter(|t| t.action != Action::Insert)
        .map(|t| t.include.as_str())
        .collect();
    vec![
        TransformStep::include_strict(&sources),
        TransformStep::Transform(transforms),
    ]
}

fn hostmetrics_receiver(receiver: &HostmetricsReceiver) -> ReceiverPipeline {
    let scrapers: serde_json::Map<String, serde_json::Value> = HOSTMETRICS_SCRAPERS
        .iter()
        .map(|s| ((*s).to_string(), json!({})))
        .collect();
    ReceiverPipeline {
        receiver: Component::new(
            "hostmetrics",
            json!({
                "collection_interval": duration::format(receiver.collection_interval()),
                "scrapers": scrapers,
            }),
        ),
        processors: hostmetrics_steps().iter().map(TransformStep::component).collect(),
    }
}

fn receiver_pipeline(receiver: &MetricsReceiver) -> ReceiverPipeline {
    match receiver {
        MetricsReceiver::Hostmetrics(r) => hostmetrics_receiver(r),
    }
}

/// Steps a user processor compiles to.
#[must_use]
pub fn processor_steps(processor: &MetricsProcessor) -> Vec<TransformStep> {
    match processor {
        MetricsProcessor::ExcludeMetrics(p) if p.metrics_pattern.is_empty() => Vec::new(),
        MetricsProcessor::ExcludeMetrics(p) => vec![TransformStep::Filter {
            polarity: Polarity::Exclude,
            match_type: MatchType::Regexp,
            names: p.regexes(),
        }],
    }
}

fn exporter_component(exporter: &MetricsExporter, env: &Environment) -> Component {
    match exporter {
        MetricsExporter::GoogleCloudMonitoring(_) => Component::new(
            "googlecloud",
            json!({
                "user_agent": env.user_agent(SUBAGENT),
                "metric": {
                    "prefix": "",
                    "skip_create_descriptor": true,
                },
            }),
        ),
    }
}

fn insert_pipeline(
    pipelines: &mut BTreeMap<String, Pipeline>,
    key: String,
    pipeline: Pipeline,
) -> Result<(), GenerateError> {
    if pipelines.contains_key(&key) {
        return Err(GenerateError::Internal(format!(
            "collector pipeline \"{key}\" is generated twice"
        )));
    }
    pipelines.insert(key, pipeline);
    Ok(())
}

/// Builds the complete collector configuration for `config`.
///
/// # Errors
///
/// Returns [`GenerateError::Internal`] if two pipelines end up with the same key or a user
/// receiver takes the self-metrics receiver id. [`UnifiedConfig::parse`] rejects both, so
/// either means the configuration was not built by the parser.
pub fn assemble(
    config: &UnifiedConfig,
    env: &Environment,
) -> Result<ModularConfig, GenerateError> {
    let metrics = &config.metrics;
    let mut receiver_pipelines = BTreeMap::new();
    let mut pipelines = BTreeMap::new();
    let mut exporters = BTreeMap::new();

    for pipeline in &metrics.pipelines {
        for exporter in &pipeline.exporters {
            exporters.insert(
                GOOGLE_CLOUD_EXPORTER.to_string(),
                exporter_component(&exporter.component, env),
            );
        }
        let mut steps: Vec<TransformStep> = pipeline
            .processors
            .iter()
            .flat_map(|p| processor_steps(&p.component))
            .collect();
        steps.push(TransformStep::Transform(vec![MetricTransform::add_prefix(
            AGENT_METRIC_PREFIX,
        )]));
        let processors: Vec<Component> = steps.iter().map(TransformStep::component).collect();

        for receiver in &pipeline.receivers {
            receiver_pipelines
                .entry(receiver.id.clone())
                .or_insert_with(|| receiver_pipeline(&receiver.component));
            insert_pipeline(
                &mut pipelines,
                pipeline_key(&pipeline.id, &receiver.id),
                Pipeline {
                    receiver_pipeline: receiver.id.clone(),
                    processors: processors.clone(),
                    exporter: GOOGLE_CLOUD_EXPORTER.to_string(),
                },
            )?;
        }
    }

    if receiver_pipelines.contains_key(agent::RECEIVER_PIPELINE) {
        return Err(GenerateError::Internal(format!(
            "receiver id \"{}\" collides with the self-metrics receiver",
            agent::RECEIVER_PIPELINE
        )));
    }
    receiver_pipelines.insert(agent::RECEIVER_PIPELINE.to_string(), agent::receiver_pipeline());
    exporters
        .entry(GOOGLE_CLOUD_EXPORTER.to_string())
        .or_insert_with(|| {
            exporter_component(
                &MetricsExporter::GoogleCloudMonitoring(GoogleCloudMonitoringExporter {}),
                env,
            )
        });
    for (key, steps) in [
        (agent::METRICS_PIPELINE, agent::metrics_steps(&env.agent_version)),
        (agent::API_REQUESTS_PIPELINE, agent::api_request_steps()),
    ] {
        insert_pipeline(
            &mut pipelines,
            key.to_string(),
            Pipeline {
                receiver_pipeline: agent::RECEIVER_PIPELINE.to_string(),
                processors: steps.iter().map(TransformStep::component).collect(),
                exporter: GOOGLE_CLOUD_EXPORTER.to_string(),
            },
        )?;
    }

    debug!(
        "Assembled metrics configuration: {} receivers, {} pipelines",
        receiver_pipelines.len(),
        pipelines.len()
    );
    Ok(ModularConfig {
        log_level: metrics.log_level.clone(),
        receiver_pipelines,
        pipelines,
        exporters,
        resource_override: env.resource_override.clone(),
    })
}
