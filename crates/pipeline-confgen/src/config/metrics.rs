// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics receivers, processors and exporters.

use std::time::Duration;

use serde::Deserialize;

use crate::config::{duration, Validate};
use crate::error::FieldError;
use crate::registry::{Registration, RegistryError, TypeRegistry};

pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_COLLECTION_INTERVAL: Duration = Duration::from_secs(10);

/// Prefix every agent-owned metric type starts with.
pub const AGENT_METRIC_PREFIX: &str = "agent.googleapis.com";

/// Key of the collector pipeline a receiver feeds into a pipeline.
#[must_use]
pub fn pipeline_key(pipeline: &str, receiver: &str) -> String {
    format!("{pipeline}_{receiver}")
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricsReceiver {
    Hostmetrics(HostmetricsReceiver),
}

impl MetricsReceiver {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricsReceiver::Hostmetrics(_) => "hostmetrics",
        }
    }
}

impl Validate for MetricsReceiver {
    fn validate(&self) -> Vec<FieldError> {
        match self {
            MetricsReceiver::Hostmetrics(r) => r.validate(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostmetricsReceiver {
    #[serde(default, deserialize_with = "duration::deserialize_optional")]
    pub collection_interval: Option<Duration>,
}

impl HostmetricsReceiver {
    #[must_use]
    pub fn collection_interval(&self) -> Duration {
        self.collection_interval
            .unwrap_or(DEFAULT_COLLECTION_INTERVAL)
    }
}

impl Validate for HostmetricsReceiver {
    fn validate(&self) -> Vec<FieldError> {
        match self.collection_interval {
            Some(interval) if interval < MIN_COLLECTION_INTERVAL => vec![FieldError::new(
                "collection_interval",
                duration::format(interval),
                format!(
                    "must be at least {}",
                    duration::format(MIN_COLLECTION_INTERVAL)
                ),
            )],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricsProcessor {
    ExcludeMetrics(ExcludeMetricsProcessor),
}

impl MetricsProcessor {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricsProcessor::ExcludeMetrics(_) => "exclude_metrics",
        }
    }
}

impl Validate for MetricsProcessor {
    fn validate(&self) -> Vec<FieldError> {
        match self {
            MetricsProcessor::ExcludeMetrics(p) => p.validate(),
        }
    }
}

/// Drops metrics whose type matches one of the glob patterns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcludeMetricsProcessor {
    #[serde(default)]
    pub metrics_pattern: Vec<String>,
}

impl ExcludeMetricsProcessor {
    /// Patterns as anchored regular expressions over the unprefixed metric name.
    #[must_use]
    pub fn regexes(&self) -> Vec<String> {
        self.metrics_pattern
            .iter()
            .map(|glob| {
                let glob = glob
                    .strip_prefix(&format!("{AGENT_METRIC_PREFIX}/"))
                    .unwrap_or(glob);
                let literals: Vec<String> = glob.split('*').map(regex::escape).collect();
                format!("^{}$", literals.join(".*"))
            })
            .collect()
    }
}

impl Validate for ExcludeMetricsProcessor {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for pattern in &self.metrics_pattern {
            if !pattern.ends_with("/*") {
                errors.push(FieldError::new(
                    "metrics_pattern",
                    pattern,
                    "must end with \"/*\"",
                ));
            }
            if !pattern.starts_with(&format!("{AGENT_METRIC_PREFIX}/")) {
                errors.push(FieldError::new(
                    "metrics_pattern",
                    pattern,
                    format!("must start with \"{AGENT_METRIC_PREFIX}/\""),
                ));
            }
        }
        errors
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricsExporter {
    GoogleCloudMonitoring(GoogleCloudMonitoringExporter),
}

impl MetricsExporter {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricsExporter::GoogleCloudMonitoring(_) => "google_cloud_monitoring",
        }
    }
}

impl Validate for MetricsExporter {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleCloudMonitoringExporter {}

/// Registers every metrics receiver type.
///
/// # Errors
///
/// Returns an error if a discriminator is already registered.
pub fn register_receivers(
    registry: &mut TypeRegistry<MetricsReceiver>,
) -> Result<(), RegistryError> {
    registry.register(Registration::new("hostmetrics", |v| {
        serde_yaml::from_value(v).map(MetricsReceiver::Hostmetrics)
    }))
}

/// Registers every metrics processor type.
///
/// # Errors
///
/// Returns an error if a discriminator is already registered.
pub fn register_processors(
    registry: &mut TypeRegistry<MetricsProcessor>,
) -> Result<(), RegistryError> {
    registry.register(Registration::new("exclude_metrics", |v| {
        serde_yaml::from_value(v).map(MetricsProcessor::ExcludeMetrics)
    }))
}

/// Registers every metrics exporter type.
///
/// # Errors
///
/// Returns an error if a discriminator is already registered.
pub fn register_exporters(
    registry: &mut TypeRegistry<MetricsExporter>,
) -> Result<(), RegistryError> {
    registry.register(Registration::new("google_cloud_monitoring", |v| {
        serde_yaml::from_value(v).map(MetricsExporter::GoogleCloudMonitoring)
    }))
}
