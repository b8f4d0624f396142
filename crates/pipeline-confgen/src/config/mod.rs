// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unified configuration document.
//!
//! The document has three top-level sections:
//!
//! ```yaml
//! logging:
//!   receivers:  { <id>: { type: files, ... } }
//!   processors: { <id>: { type: parse_json, ... } }
//!   service:
//!     log_level: info
//!     compress: gzip
//!     storage_limit_size: 2G
//!     pipelines: { <id>: { receivers: [...], processors: [...] } }
//! metrics:
//!   receivers:  { <id>: { type: hostmetrics, ... } }
//!   processors: { <id>: { type: exclude_metrics, ... } }
//!   exporters:  { <id>: { type: google_cloud_monitoring } }
//!   service:
//!     log_level: info
//!     pipelines: { <id>: { receivers: [...], processors: [...], exporters: [...] } }
//! global:
//!   default_self_log_file_rotation:
//!     { enabled: true, max_file_size_megabytes: 400, backup_count: 1 }
//!   self_log_collection: true
//! ```
//!
//! Parsing reads the section structure first and then decodes every component entry and
//! every pipeline on its own, so a broken entry never hides the errors of its siblings.
//! References to entries that already failed are not reported a second time.

pub mod duration;
pub mod logging;
pub mod metrics;

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::environment::Platform;
use crate::error::{
    ComponentKind, ConfigError, ConfigErrors, FieldError, GenerateError, Location, Subagent,
};
use crate::fluentbit::components::SELF_METRICS_TAG;
use crate::logging::self_logs::{FLUENT_BIT_SELF_LOG_TAG, HEALTH_TAG};
use crate::metrics::agent;
use crate::registry::{self, Registries, TypeRegistry};

use self::logging::{
    builtin_processor, stream_tag, LoggingProcessor, LoggingReceiver, BUILTIN_PREFIX,
};
use self::metrics::{
    pipeline_key, GoogleCloudMonitoringExporter, MetricsExporter, MetricsProcessor,
    MetricsReceiver,
};

/// Validation every decoded component runs after structural decoding.
pub trait Validate {
    fn validate(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const LOGGING_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
pub const METRICS_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug"];
pub const DEFAULT_STORAGE_LIMIT_SIZE: &str = "2G";

/// Id of the exporter added to metrics pipelines that declare none.
pub const DEFAULT_EXPORTER_ID: &str = "google";

/// A component together with the id it was declared under.
#[derive(Clone, Debug, PartialEq)]
pub struct Named<T> {
    pub id: String,
    pub component: T,
}

impl<T> Named<T> {
    #[must_use]
    pub fn new(id: impl Into<String>, component: T) -> Self {
        Self {
            id: id.into(),
            component,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Compression {
    Gzip,
}

impl Compression {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
        }
    }
}

/// Logging pipeline with every reference resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggingPipeline {
    pub id: String,
    pub receivers: Vec<Named<LoggingReceiver>>,
    pub processors: Vec<Named<LoggingProcessor>>,
}

/// Metrics pipeline with every reference resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsPipeline {
    pub id: String,
    pub receivers: Vec<Named<MetricsReceiver>>,
    pub processors: Vec<Named<MetricsProcessor>>,
    pub exporters: Vec<Named<MetricsExporter>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub receivers: BTreeMap<String, LoggingReceiver>,
    pub processors: BTreeMap<String, LoggingProcessor>,
    pub log_level: String,
    pub compress: Option<Compression>,
    pub storage_limit_size: String,
    pub pipelines: Vec<LoggingPipeline>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            receivers: BTreeMap::new(),
            processors: BTreeMap::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            compress: None,
            storage_limit_size: DEFAULT_STORAGE_LIMIT_SIZE.to_string(),
            pipelines: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricsConfig {
    pub receivers: BTreeMap<String, MetricsReceiver>,
    pub processors: BTreeMap<String, MetricsProcessor>,
    pub exporters: BTreeMap<String, MetricsExporter>,
    pub log_level: String,
    pub pipelines: Vec<MetricsPipeline>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            receivers: BTreeMap::new(),
            processors: BTreeMap::new(),
            exporters: BTreeMap::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            pipelines: Vec::new(),
        }
    }
}

/// Rotation policy for the agent's own log files, carried to the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelfLogRotation {
    pub enabled: bool,
    pub max_file_size_megabytes: u32,
    pub backup_count: u32,
}

impl Default for SelfLogRotation {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size_megabytes: 400,
            backup_count: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalConfig {
    pub self_log_rotation: SelfLogRotation,
    /// Collect the agent's own log files. The health heartbeat is emitted regardless.
    pub self_log_collection: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            self_log_rotation: SelfLogRotation::default(),
            self_log_collection: true,
        }
    }
}

/// The validated, immutable configuration model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnifiedConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub global: GlobalConfig,
}

type RawEntries = Option<BTreeMap<String, serde_yaml::Value>>;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    logging: Option<RawLogging>,
    metrics: Option<RawMetrics>,
    global: Option<RawGlobal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogging {
    receivers: RawEntries,
    processors: RawEntries,
    exporters: Option<serde_yaml::Value>,
    service: Option<RawLoggingService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLoggingService {
    log_level: Option<String>,
    compress: Option<String>,
    storage_limit_size: Option<String>,
    pipelines: RawEntries,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMetrics {
    receivers: RawEntries,
    processors: RawEntries,
    exporters: RawEntries,
    service: Option<RawMetricsService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMetricsService {
    log_level: Option<String>,
    pipelines: RawEntries,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPipeline {
    #[serde(default)]
    receivers: Vec<String>,
    #[serde(default)]
    processors: Vec<String>,
    #[serde(default)]
    exporters: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGlobal {
    default_self_log_file_rotation: Option<RawRotation>,
    self_log_collection: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRotation {
    enabled: Option<bool>,
    max_file_size_megabytes: Option<i64>,
    backup_count: Option<i64>,
}

/// Decoded entries of one namespace plus the ids that failed to decode or validate.
struct Entries<T> {
    decoded: BTreeMap<String, T>,
    failed: BTreeSet<String>,
}

impl<T: Clone> Entries<T> {
    fn decode(
        registry: &TypeRegistry<T>,
        entries: RawEntries,
        platform: Platform,
        errors: &mut ConfigErrors,
    ) -> Self
    where
        T: Validate,
    {
        let namespace = registry.namespace();
        let mut decoded = BTreeMap::new();
        let mut failed = BTreeSet::new();

        for (id, entry) in entries.unwrap_or_default() {
            let at = Location::new(namespace.subagent(), namespace.kind(), &id);
            if let Some(error) = reserved_id(&at) {
                errors.push(error);
                failed.insert(id);
                continue;
            }
            match registry.decode(&at, entry, platform) {
                Ok(component) => {
                    let field_errors = component.validate();
                    if field_errors.is_empty() {
                        decoded.insert(id, component);
                    } else {
                        for error in field_errors {
                            errors.push(ConfigError::validation(at.clone(), error));
                        }
                        failed.insert(id);
                    }
                }
                Err(error) => {
                    errors.push(error);
                    failed.insert(id);
                }
            }
        }
        Self { decoded, failed }
    }

    fn resolve(
        &self,
        at: &Location,
        kind: ComponentKind,
        id: &str,
        errors: &mut ConfigErrors,
    ) -> Option<Named<T>> {
        if let Some(component) = self.decoded.get(id) {
            return Some(Named::new(id, component.clone()));
        }
        if !self.failed.contains(id) {
            errors.push(ConfigError::UndefinedReference {
                at: at.clone(),
                kind,
                id: id.to_string(),
            });
        }
        None
    }
}

/// Ids taken by the pipelines the compiler always generates.
const RESERVED_IDS: &[(Subagent, ComponentKind, &str)] = &[
    (Subagent::Logging, ComponentKind::Receiver, FLUENT_BIT_SELF_LOG_TAG),
    (Subagent::Logging, ComponentKind::Receiver, HEALTH_TAG),
    (Subagent::Logging, ComponentKind::Receiver, SELF_METRICS_TAG),
    (Subagent::Metrics, ComponentKind::Receiver, agent::RECEIVER_PIPELINE),
];

/// Collector pipeline keys of the agent self-metrics.
const RESERVED_PIPELINE_KEYS: &[&str] =
    &[agent::METRICS_PIPELINE, agent::API_REQUESTS_PIPELINE];

fn reserved_id(at: &Location) -> Option<ConfigError> {
    let reason = if at.id.starts_with(BUILTIN_PREFIX) {
        format!("ids starting with \"{BUILTIN_PREFIX}\" are reserved")
    } else if RESERVED_IDS.iter().any(|(subagent, kind, id)| {
        at.subagent == *subagent && at.kind == *kind && at.id == *id
    }) {
        "the id is reserved for the agent's own pipelines".to_string()
    } else {
        return None;
    };
    Some(ConfigError::validation(at.clone(), FieldError::new("id", &at.id, reason)))
}

fn decode_pipelines(
    subagent: Subagent,
    entries: RawEntries,
    errors: &mut ConfigErrors,
) -> Vec<(Location, RawPipeline)> {
    let mut pipelines = Vec::new();
    for (id, entry) in entries.unwrap_or_default() {
        let at = Location::new(subagent, ComponentKind::Pipeline, id);
        if let Some(error) = reserved_id(&at) {
            errors.push(error);
            continue;
        }
        let entry = if entry.is_null() {
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
        } else {
            entry
        };
        match serde_yaml::from_value::<RawPipeline>(entry) {
            Ok(raw) if raw.receivers.is_empty() => errors.push(ConfigError::validation(
                at,
                FieldError::new("receivers", "[]", "at least one receiver is required"),
            )),
            Ok(raw) => pipelines.push((at, raw)),
            Err(e) => errors.push(ConfigError::Decode {
                at,
                message: e.to_string(),
            }),
        }
    }
    pipelines
}

fn log_level(
    subagent: Subagent,
    value: Option<String>,
    allowed: &[&str],
    errors: &mut ConfigErrors,
) -> String {
    match value {
        Some(level) if !allowed.contains(&level.as_str()) => {
            errors.push(ConfigError::validation(
                Location::new(subagent, ComponentKind::Setting, "service"),
                FieldError::new(
                    "log_level",
                    level,
                    format!("must be one of [{}]", allowed.join(", ")),
                ),
            ));
            DEFAULT_LOG_LEVEL.to_string()
        }
        Some(level) => level,
        None => DEFAULT_LOG_LEVEL.to_string(),
    }
}

/// Accepts sizes like `2G`, `500M` or `1.5G`.
fn is_storage_size(value: &str) -> bool {
    let digits = value.strip_suffix(&['K', 'M', 'G', 'T'][..]).unwrap_or(value);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.parse::<f64>().is_ok_and(|v| v > 0.0)
}

fn bounded(
    at: &Location,
    field: &str,
    value: Option<i64>,
    min: i64,
    default: u32,
    errors: &mut ConfigErrors,
) -> u32 {
    let Some(value) = value else {
        return default;
    };
    match u32::try_from(value) {
        Ok(v) if value >= min => v,
        _ => {
            errors.push(ConfigError::validation(
                at.clone(),
                FieldError::new(field, value.to_string(), format!("must be at least {min}")),
            ));
            default
        }
    }
}

impl UnifiedConfig {
    /// Parses and validates a unified document against the built-in registries.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError::Config`] with every problem found in the document, or
    /// [`GenerateError::Internal`] if the built-in registries could not be assembled.
    pub fn parse(text: &str, platform: Platform) -> Result<Self, GenerateError> {
        let registries = registry::registries()?;
        Ok(Self::parse_with(text, platform, registries)?)
    }

    /// Parses and validates a unified document against `registries`.
    ///
    /// # Errors
    ///
    /// Returns every decode, validation and reference error found, in document order.
    pub fn parse_with(
        text: &str,
        platform: Platform,
        registries: &Registries,
    ) -> Result<Self, ConfigErrors> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Document(e.to_string()))?;
        let raw: RawDocument = if value.is_null() {
            RawDocument::default()
        } else {
            serde_yaml::from_value(value).map_err(|e| ConfigError::Document(e.to_string()))?
        };

        let mut errors = ConfigErrors::new();
        let logging = parse_logging(
            raw.logging.unwrap_or_default(),
            platform,
            registries,
            &mut errors,
        );
        let metrics = parse_metrics(
            raw.metrics.unwrap_or_default(),
            platform,
            registries,
            &mut errors,
        );
        let global = parse_global(raw.global.unwrap_or_default(), &mut errors);

        debug!(
            "Parsed {} logging and {} metrics pipelines with {} errors",
            logging.pipelines.len(),
            metrics.pipelines.len(),
            errors.len()
        );
        errors.into_result(UnifiedConfig {
            logging,
            metrics,
            global,
        })
    }
}

fn parse_logging(
    raw: RawLogging,
    platform: Platform,
    registries: &Registries,
    errors: &mut ConfigErrors,
) -> LoggingConfig {
    if raw.exporters.is_some() {
        warn!("logging.exporters is deprecated and ignored");
    }

    let receivers = Entries::decode(&registries.logging_receivers, raw.receivers, platform, errors);
    let processors = Entries::decode(
        &registries.logging_processors,
        raw.processors,
        platform,
        errors,
    );
    let service = raw.service.unwrap_or_default();

    let mut pipelines = Vec::new();
    for (at, raw) in decode_pipelines(Subagent::Logging, service.pipelines, errors) {
        if !raw.exporters.is_empty() {
            warn!("{at}: exporters are deprecated and ignored");
        }
        let pipeline_receivers = raw
            .receivers
            .iter()
            .filter_map(|id| receivers.resolve(&at, ComponentKind::Receiver, id, errors))
            .collect();
        let pipeline_processors = raw
            .processors
            .iter()
            .filter_map(|id| match builtin_processor(id) {
                Some(processor) => Some(Named::new(id, processor)),
                None => processors.resolve(&at, ComponentKind::Processor, id, errors),
            })
            .collect();
        pipelines.push(LoggingPipeline {
            id: at.id,
            receivers: pipeline_receivers,
            processors: pipeline_processors,
        });
    }

    check_network_receivers(&receivers.decoded, &pipelines, errors);
    check_stream_tags(&pipelines, errors);

    let log_level = log_level(
        Subagent::Logging,
        service.log_level,
        LOGGING_LOG_LEVELS,
        errors,
    );
    let settings = Location::new(Subagent::Logging, ComponentKind::Setting, "service");
    let compress = match service.compress.as_deref() {
        None => None,
        Some("gzip") => Some(Compression::Gzip),
        Some(other) => {
            errors.push(ConfigError::validation(
                settings.clone(),
                FieldError::new("compress", other, "must be one of [gzip]"),
            ));
            None
        }
    };
    let storage_limit_size = match service.storage_limit_size {
        Some(size) if !is_storage_size(&size) => {
            errors.push(ConfigError::validation(
                settings,
                FieldError::new(
                    "storage_limit_size",
                    size,
                    "must be a size such as 500M or 2G",
                ),
            ));
            DEFAULT_STORAGE_LIMIT_SIZE.to_string()
        }
        Some(size) => size,
        None => DEFAULT_STORAGE_LIMIT_SIZE.to_string(),
    };

    LoggingConfig {
        receivers: receivers.decoded,
        processors: processors.decoded,
        log_level,
        compress,
        storage_limit_size,
        pipelines,
    }
}

/// Two receivers may not listen on one port, and a network receiver may feed one pipeline.
fn check_network_receivers(
    receivers: &BTreeMap<String, LoggingReceiver>,
    pipelines: &[LoggingPipeline],
    errors: &mut ConfigErrors,
) {
    let mut ports: BTreeMap<u16, &str> = BTreeMap::new();
    for (id, receiver) in receivers {
        let Some(port) = receiver.listen_port() else {
            continue;
        };
        if let Some(other) = ports.get(&port) {
            errors.push(ConfigError::Conflict {
                at: Location::new(Subagent::Logging, ComponentKind::Receiver, id),
                reason: format!("listen_port {port} is already used by receiver \"{other}\""),
            });
        } else {
            ports.insert(port, id);
        }
    }

    let mut users: BTreeMap<&str, &str> = BTreeMap::new();
    for pipeline in pipelines {
        for receiver in &pipeline.receivers {
            if receiver.component.listen_port().is_none() {
                continue;
            }
            if let Some(other) = users.get(receiver.id.as_str()) {
                if *other != pipeline.id {
                    errors.push(ConfigError::Conflict {
                        at: Location::new(
                            Subagent::Logging,
                            ComponentKind::Pipeline,
                            &pipeline.id,
                        ),
                        reason: format!(
                            "network receiver \"{}\" is already used by pipeline \"{other}\"",
                            receiver.id
                        ),
                    });
                }
            } else {
                users.insert(&receiver.id, &pipeline.id);
            }
        }
    }
}

/// Every `(pipeline, receiver)` stream needs a tag of its own, and records re-tagged to a
/// log name must not re-enter another stream.
fn check_stream_tags(pipelines: &[LoggingPipeline], errors: &mut ConfigErrors) {
    let mut owners: BTreeMap<String, (&str, &str)> = BTreeMap::new();
    for pipeline in pipelines {
        for receiver in &pipeline.receivers {
            let owner = (pipeline.id.as_str(), receiver.id.as_str());
            let tag = stream_tag(owner.0, owner.1);
            match owners.get(&tag) {
                None => {
                    owners.insert(tag, owner);
                }
                Some(other) if *other != owner => errors.push(ConfigError::Conflict {
                    at: Location::new(Subagent::Logging, ComponentKind::Pipeline, owner.0),
                    reason: format!(
                        "tag \"{tag}\" of receiver \"{}\" is also the tag of {}",
                        owner.1,
                        describe_pair(*other)
                    ),
                }),
                Some(_) => {}
            }
        }
    }

    let log_names: BTreeSet<&str> = pipelines
        .iter()
        .flat_map(|p| p.receivers.iter().map(|r| r.id.as_str()))
        .collect();
    for name in log_names {
        if let Some(owner) = owners.get(name) {
            errors.push(ConfigError::Conflict {
                at: Location::new(Subagent::Logging, ComponentKind::Receiver, name),
                reason: format!("log name \"{name}\" is the tag of {}", describe_pair(*owner)),
            });
        }
    }
}

fn describe_pair((pipeline, receiver): (&str, &str)) -> String {
    format!("pipeline \"{pipeline}\" with receiver \"{receiver}\"")
}

fn parse_metrics(
    raw: RawMetrics,
    platform: Platform,
    registries: &Registries,
    errors: &mut ConfigErrors,
) -> MetricsConfig {
    let receivers = Entries::decode(&registries.metrics_receivers, raw.receivers, platform, errors);
    let processors = Entries::decode(
        &registries.metrics_processors,
        raw.processors,
        platform,
        errors,
    );
    let exporters = Entries::decode(&registries.metrics_exporters, raw.exporters, platform, errors);
    let service = raw.service.unwrap_or_default();

    let mut pipelines = Vec::new();
    for (at, raw) in decode_pipelines(Subagent::Metrics, service.pipelines, errors) {
        let pipeline_receivers: Vec<_> = raw
            .receivers
            .iter()
            .filter_map(|id| receivers.resolve(&at, ComponentKind::Receiver, id, errors))
            .collect();
        let pipeline_processors = raw
            .processors
            .iter()
            .filter_map(|id| processors.resolve(&at, ComponentKind::Processor, id, errors))
            .collect();
        let mut pipeline_exporters: Vec<_> = raw
            .exporters
            .iter()
            .filter_map(|id| exporters.resolve(&at, ComponentKind::Exporter, id, errors))
            .collect();
        if raw.exporters.is_empty() {
            pipeline_exporters.push(Named::new(
                DEFAULT_EXPORTER_ID,
                MetricsExporter::GoogleCloudMonitoring(GoogleCloudMonitoringExporter {}),
            ));
        }

        limit_types(
            &at,
            pipeline_receivers.iter().map(|r| r.component.type_name()),
            "receiver",
            errors,
        );
        limit_types(
            &at,
            pipeline_exporters.iter().map(|e| e.component.type_name()),
            "exporter",
            errors,
        );

        pipelines.push(MetricsPipeline {
            id: at.id,
            receivers: pipeline_receivers,
            processors: pipeline_processors,
            exporters: pipeline_exporters,
        });
    }

    check_pipeline_keys(&pipelines, errors);

    let log_level = log_level(
        Subagent::Metrics,
        service.log_level,
        METRICS_LOG_LEVELS,
        errors,
    );

    MetricsConfig {
        receivers: receivers.decoded,
        processors: processors.decoded,
        exporters: exporters.decoded,
        log_level,
        pipelines,
    }
}

/// Every `(pipeline, receiver)` pair needs a collector pipeline key of its own, outside the
/// keys of the self-metrics pipelines.
fn check_pipeline_keys(pipelines: &[MetricsPipeline], errors: &mut ConfigErrors) {
    let mut owners: BTreeMap<String, Option<(&str, &str)>> = RESERVED_PIPELINE_KEYS
        .iter()
        .map(|key| ((*key).to_string(), None))
        .collect();
    for pipeline in pipelines {
        for receiver in &pipeline.receivers {
            let owner = (pipeline.id.as_str(), receiver.id.as_str());
            let key = pipeline_key(owner.0, owner.1);
            let used_by = match owners.get(&key) {
                None => {
                    owners.insert(key, Some(owner));
                    continue;
                }
                Some(Some(other)) if *other == owner => continue,
                Some(Some(other)) => describe_pair(*other),
                Some(None) => "the agent self-metrics".to_string(),
            };
            errors.push(ConfigError::Conflict {
                at: Location::new(Subagent::Metrics, ComponentKind::Pipeline, owner.0),
                reason: format!(
                    "collector pipeline \"{key}\" of receiver \"{}\" is already used by {used_by}",
                    owner.1
                ),
            });
        }
    }
}

/// Every metrics receiver and exporter type may appear at most once per pipeline.
fn limit_types<'a>(
    at: &Location,
    type_names: impl Iterator<Item = &'a str>,
    kind: &str,
    errors: &mut ConfigErrors,
) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for type_name in type_names {
        *counts.entry(type_name).or_default() += 1;
    }
    for (type_name, count) in counts {
        if count > 1 {
            errors.push(ConfigError::Conflict {
                at: at.clone(),
                reason: format!(
                    "at most one {type_name} {kind} is allowed per pipeline, found {count}"
                ),
            });
        }
    }
}

fn parse_global(raw: RawGlobal, errors: &mut ConfigErrors) -> GlobalConfig {
    let defaults = SelfLogRotation::default();
    let self_log_rotation = match raw.default_self_log_file_rotation {
        None => defaults,
        Some(rotation) => {
            let at = Location::new(
                Subagent::Global,
                ComponentKind::Setting,
                "default_self_log_file_rotation",
            );
            SelfLogRotation {
                enabled: rotation.enabled.unwrap_or(defaults.enabled),
                max_file_size_megabytes: bounded(
                    &at,
                    "max_file_size_megabytes",
                    rotation.max_file_size_megabytes,
                    1,
                    defaults.max_file_size_megabytes,
                    errors,
                ),
                backup_count: bounded(
                    &at,
                    "backup_count",
                    rotation.backup_count,
                    0,
                    defaults.backup_count,
                    errors,
                ),
            }
        }
    };
    GlobalConfig {
        self_log_rotation,
        self_log_collection: raw.self_log_collection.unwrap_or(true),
    }
}
