// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! OpenTelemetry collector configuration model and rendering.
//!
//! A [`ReceiverPipeline`] is a receiver plus the processors bound to it. A [`Pipeline`]
//! consumes one receiver pipeline, adds its own processors and ends in one exporter.
//! Several pipelines may share a receiver pipeline; the receiver is then rendered once
//! and fans out to each of them.
//!
//! ```yaml
//! service:
//!   pipelines:
//!     metrics/default_hostmetrics:
//!       receivers: [hostmetrics/hostmetrics]
//!       processors:
//!         [filter/hostmetrics_0, metricstransform/hostmetrics_1, resourcedetection/_global_0]
//!       exporters: [googlecloud]
//! ```

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::environment::ResourceOverride;

/// Port of the collector's own prometheus endpoint.
pub const METRICS_PORT: u16 = 20201;

const GLOBAL_SUFFIX: &str = "_global_0";

/// One collector component: its type plus an arbitrary nested configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub type_: String,
    pub config: Value,
}

impl Component {
    #[must_use]
    pub fn new(type_: impl Into<String>, config: Value) -> Self {
        Self {
            type_: type_.into(),
            config,
        }
    }

    /// `type/suffix`, or the bare type for an empty suffix.
    #[must_use]
    pub fn name(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.type_.clone()
        } else {
            format!("{}/{suffix}", self.type_)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReceiverPipeline {
    pub receiver: Component,
    pub processors: Vec<Component>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    /// Key of the [`ReceiverPipeline`] this pipeline consumes.
    pub receiver_pipeline: String,
    pub processors: Vec<Component>,
    /// Key of the exporter in [`ModularConfig::exporters`].
    pub exporter: String,
}

/// Resource attached to every exported point.
fn resource_processor(resource_override: Option<&ResourceOverride>) -> Component {
    match resource_override {
        None => Component::new("resourcedetection", json!({ "detectors": ["gcp"] })),
        Some(resource) => {
            let mut attributes = vec![json!({
                "key": "gcp.resource_type",
                "value": resource.resource_type,
                "action": "upsert",
            })];
            attributes.extend(resource.labels.iter().map(|(key, value)| {
                json!({ "key": key, "value": value, "action": "upsert" })
            }));
            Component::new("resource", json!({ "attributes": attributes }))
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModularConfig {
    pub log_level: String,
    pub receiver_pipelines: BTreeMap<String, ReceiverPipeline>,
    pub pipelines: BTreeMap<String, Pipeline>,
    /// Exporters by name suffix; an empty suffix renders as the bare type.
    pub exporters: BTreeMap<String, Component>,
    pub resource_override: Option<ResourceOverride>,
}

impl ModularConfig {
    /// The collector document as a JSON value, keys sorted.
    ///
    /// Pipelines are rendered as `metrics/{key}`. Receiver processors are named
    /// `{type}/{receiver_pipeline}_{i}` and pipeline processors `{type}/{pipeline}_{i}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut receivers = Map::new();
        let mut processors = Map::new();
        let mut exporters = Map::new();
        let mut pipelines = Map::new();

        let resource = resource_processor(self.resource_override.as_ref());
        let resource_name = resource.name(GLOBAL_SUFFIX);

        for (key, pipeline) in &self.pipelines {
            let Some(receiver_pipeline) = self.receiver_pipelines.get(&pipeline.receiver_pipeline)
            else {
                continue;
            };
            let receiver_name = receiver_pipeline.receiver.name(&pipeline.receiver_pipeline);
            receivers.insert(receiver_name.clone(), receiver_pipeline.receiver.config.clone());

            let mut names = Vec::new();
            for (i, processor) in receiver_pipeline.processors.iter().enumerate() {
                let name = processor.name(&format!("{}_{i}", pipeline.receiver_pipeline));
                processors.insert(name.clone(), processor.config.clone());
                names.push(name);
            }
            for (i, processor) in pipeline.processors.iter().enumerate() {
                let name = processor.name(&format!("{key}_{i}"));
                processors.insert(name.clone(), processor.config.clone());
                names.push(name);
            }
            processors.insert(resource_name.clone(), resource.config.clone());
            names.push(resource_name.clone());

            let mut pipeline_exporters = Vec::new();
            if let Some(exporter) = self.exporters.get(&pipeline.exporter) {
                let name = exporter.name(&pipeline.exporter);
                exporters.insert(name.clone(), exporter.config.clone());
                pipeline_exporters.push(name);
            }

            pipelines.insert(
                format!("metrics/{key}"),
                json!({
                    "receivers": [receiver_name],
                    "processors": names,
                    "exporters": pipeline_exporters,
                }),
            );
        }

        let mut telemetry = Map::new();
        telemetry.insert(
            "metrics".to_string(),
            json!({
                "readers": [{
                    "pull": {
                        "exporter": {
                            "prometheus": {
                                "host": "0.0.0.0",
                                "port": METRICS_PORT,
                                "without_scope_info": true,
                                "without_units": true,
                                "without_type_suffix": true,
                            }
                        }
                    }
                }]
            }),
        );
        if self.log_level != "info" {
            telemetry.insert("logs".to_string(), json!({ "level": self.log_level }));
        }

        json!({
            "receivers": receivers,
            "processors": processors,
            "exporters": exporters,
            "service": {
                "pipelines": pipelines,
                "telemetry": telemetry,
            },
        })
    }

    /// Renders the collector YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if a component configuration cannot be represented in YAML.
    pub fn generate(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.to_value())
    }
}
