// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-diagnostics pipeline.
//!
//! Two streams are always generated, whatever the user configures:
//!
//! - `ops-agent-fluent-bit`: the log shipper's own log file, with its severities mapped
//!   onto [`Severity`]. Lines matching a known failure signature get a `code` and are
//!   copied into the health stream.
//! - `ops-agent-health`: the health-check log file, the copied failure lines, and a
//!   synthetic heartbeat every ten minutes. Every record gets a fixed message, a
//!   severity and the agent identity labels.
//!
//! Turning `self_log_collection` off drops the file inputs and the sampling, but keeps
//! the heartbeat and the health stream it feeds.

use std::time::Duration;

use crate::config::logging::{FieldType, LoggingProcessor, ParseJson, ParseRegex, ParserShared};
use crate::environment::{Environment, Platform, AGENT_KIND};
use crate::fluentbit::components::{translation_components, Tail};
use crate::fluentbit::Stage;

use super::components::{parse_regex, processor_components};
use super::severity::{fluent_bit_translations, Severity, SEVERITY_KEY};

pub const FLUENT_BIT_SELF_LOG_TAG: &str = "ops-agent-fluent-bit";
pub const HEALTH_TAG: &str = "ops-agent-health";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(600);
pub const HEARTBEAT_CODE: &str = "LogPingOpsAgent";
pub const SCHEMA_VERSION: &str = "v1";

const CODE_KEY: &str = "code";
const LABELS_KEY: &str = "logging.googleapis.com/labels";
const HEALTH_LABEL_PREFIX: &str = "agent.googleapis.com/health";
const DOCUMENTATION_URL: &str =
    "https://cloud.google.com/logging/docs/agent/ops-agent/troubleshoot-find-info";

/// A machine-readable health code and the log lines that raise it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthCode {
    pub code: &'static str,
    pub message: &'static str,
    pub severity: Severity,
    /// Substrings of a self-log line that raise this code.
    pub signatures: &'static [&'static str],
}

pub const HEALTH_CODES: &[HealthCode] = &[
    HealthCode {
        code: "LogPipelineErr",
        message: "Ops Agent logging pipeline failed",
        severity: Severity::Error,
        signatures: &["backend failed"],
    },
    HealthCode {
        code: "LogParseErr",
        message: "Ops Agent failed to parse logs",
        severity: Severity::Error,
        signatures: &[
            "cannot parse",
            "parsers returned an error",
            "error parsing log message",
        ],
    },
    HealthCode {
        code: "LogPathNotFound",
        message: "Ops Agent could not find a configured log file path",
        severity: Severity::Error,
        signatures: &["no such file or directory"],
    },
    HealthCode {
        code: HEARTBEAT_CODE,
        message: "Ops Agent logging pipeline is alive",
        severity: Severity::Debug,
        signatures: &[],
    },
];

impl HealthCode {
    /// Message written on the record, ending with the code and the documentation link.
    #[must_use]
    pub fn full_message(&self) -> String {
        format!(
            "{}, Code: {}, Documentation: {DOCUMENTATION_URL}",
            self.message, self.code
        )
    }
}

/// Generated self-diagnostics stages plus the log names they deliver to the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelfLogs {
    pub stages: Vec<Stage>,
    pub log_names: Vec<&'static str>,
}

fn log_path(env: &Environment, parts: &[&str]) -> String {
    let separator = match env.platform {
        Platform::Linux => "/",
        Platform::Windows => "\\",
    };
    let mut path = "${logs_dir}".to_string();
    for part in parts {
        path.push_str(separator);
        path.push_str(part);
    }
    path
}

/// Self-diagnostic stages for `env`; file collection only when `collect_files` is set.
#[must_use]
pub fn self_log_components(env: &Environment, collect_files: bool) -> SelfLogs {
    let mut stages = Vec::new();
    let mut log_names = Vec::new();

    if collect_files {
        stages.extend(file_inputs(env));
        stages.extend(health_file_parser());
        stages.extend(self_log_severity());
        stages.extend(failure_sampling());
        log_names.push(FLUENT_BIT_SELF_LOG_TAG);
    }

    stages.push(heartbeat());
    stages.extend(health_stamps(env));
    log_names.push(HEALTH_TAG);

    SelfLogs { stages, log_names }
}

fn file_inputs(env: &Environment) -> Vec<Stage> {
    [
        (FLUENT_BIT_SELF_LOG_TAG, log_path(env, &["subagents", "logging-module.log"])),
        (HEALTH_TAG, log_path(env, &["health-checks.log"])),
    ]
    .into_iter()
    .map(|(tag, path)| {
        Tail {
            tag: tag.to_string(),
            include_paths: vec![path],
            buffer_in_memory: true,
            ..Tail::default()
        }
        .component()
    })
    .collect()
}

fn health_file_parser() -> Vec<Stage> {
    let parser = LoggingProcessor::ParseJson(ParseJson {
        shared: ParserShared {
            time_key: Some("time".to_string()),
            time_format: Some("%Y-%m-%dT%H:%M:%S%z".to_string()),
            ..ParserShared::default()
        },
    });
    processor_components(&parser, HEALTH_TAG, "health-logs")
}

fn self_log_severity() -> Vec<Stage> {
    let parser = ParseRegex {
        regex: r"(?<message>\[[ ]*(?<time>\d+\/\d+\/\d+ \d+:\d+:\d+)] \[[ ]*(?<severity>[a-z]+)\].*)"
            .to_string(),
        preserve_key: true,
        shared: ParserShared {
            time_key: Some("time".to_string()),
            time_format: Some("%Y/%m/%d %H:%M:%S".to_string()),
            types: [("severity".to_string(), FieldType::String)]
                .into_iter()
                .collect(),
            ..ParserShared::default()
        },
    };
    let mut stages = parse_regex(&parser, FLUENT_BIT_SELF_LOG_TAG, "self-logs-severity");
    stages.extend(translation_components(
        FLUENT_BIT_SELF_LOG_TAG,
        "severity",
        SEVERITY_KEY,
        true,
        &fluent_bit_translations(),
    ));
    stages
}

/// Tags known failure lines with a code and copies them into the health stream.
fn failure_sampling() -> Vec<Stage> {
    let mut stages: Vec<Stage> = HEALTH_CODES
        .iter()
        .flat_map(|health| {
            health.signatures.iter().map(|signature| {
                Stage::filter()
                    .with("Name", "modify")
                    .with("Match", FLUENT_BIT_SELF_LOG_TAG)
                    .with("Condition", format!("Key_value_matches message .*{signature}.*"))
                    .with("Add", format!("{CODE_KEY} {}", health.code))
            })
        })
        .collect();

    stages.push(
        Stage::filter()
            .with("Name", "rewrite_tag")
            .with("Match", FLUENT_BIT_SELF_LOG_TAG)
            .with("Rule", format!("${CODE_KEY} ^.+$ {HEALTH_TAG} true"))
            .with("Emitter_Mem_Buf_Limit", "10M")
            .with("Emitter_Storage.type", "memory"),
    );
    stages.push(
        Stage::filter()
            .with("Name", "modify")
            .with("Match", FLUENT_BIT_SELF_LOG_TAG)
            .with("Remove", CODE_KEY),
    );
    stages
}

/// Synthetic liveness record on the health stream.
#[must_use]
pub fn heartbeat() -> Stage {
    Stage::input()
        .with("Name", "dummy")
        .with("Tag", HEALTH_TAG)
        .with("Dummy", format!("{{\"{CODE_KEY}\": \"{HEARTBEAT_CODE}\"}}"))
        .with("Interval_Sec", HEARTBEAT_INTERVAL.as_secs().to_string())
}

fn health_stamps(env: &Environment) -> Vec<Stage> {
    let mut stages: Vec<Stage> = HEALTH_CODES
        .iter()
        .map(|health| {
            Stage::filter()
                .with("Name", "modify")
                .with("Match", HEALTH_TAG)
                .with("Condition", format!("Key_Value_Equals {CODE_KEY} {}", health.code))
                .with_ordered("Set", format!("message {}", health.full_message()))
                .with_ordered("Set", format!("{SEVERITY_KEY} {}", health.severity))
        })
        .collect();

    stages.push(
        Stage::filter()
            .with("Name", "modify")
            .with("Match", HEALTH_TAG)
            .with_ordered("Add", format!("{HEALTH_LABEL_PREFIX}/agentKind {AGENT_KIND}"))
            .with_ordered(
                "Add",
                format!("{HEALTH_LABEL_PREFIX}/agentVersion {}", env.agent_version),
            )
            .with_ordered(
                "Add",
                format!("{HEALTH_LABEL_PREFIX}/schemaVersion {SCHEMA_VERSION}"),
            ),
    );
    stages.push(
        Stage::filter()
            .with("Name", "nest")
            .with("Match", HEALTH_TAG)
            .with("Operation", "nest")
            .with("Wildcard", format!("{HEALTH_LABEL_PREFIX}/*"))
            .with("Nest_under", LABELS_KEY),
    );
    stages
}
