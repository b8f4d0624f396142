// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logging pipeline assembler.
//!
//! Every `(pipeline, receiver)` pair becomes one stream tagged `{pipeline}.{receiver}`:
//!
//! ```text
//! receiver stages -> processor stages -> set logName -> rewrite_tag
//!   -> ... -> remove logName -> OUTPUT
//! ```
//!
//! The rewrite re-emits each record under its logical log name (the receiver id), so
//! outputs match log names rather than pipeline tags. Streams that share the same sink
//! settings are delivered by one `stackdriver` output.

pub mod components;
pub mod self_logs;
pub mod severity;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::logging::stream_tag;
use crate::config::{Compression, UnifiedConfig};
use crate::environment::{Environment, Platform, ResourceOverride};
use crate::error::GenerateError;
use crate::fluentbit::components::{
    metrics_input, prometheus_exporter, remove_log_name, rewrite_tag_by_log_name, service,
    set_log_name, SELF_METRICS_PORT,
};
use crate::fluentbit::{ModularConfig, Stage, StageKind};

use self::components::{processor_components, receiver_components};
use self::self_logs::{self_log_components, HEALTH_TAG, HEARTBEAT_INTERVAL};

/// Subagent name reported in the logging user agent.
pub const SUBAGENT: &str = "Logging";

const HTTP_REQUEST_KEY: &str = "logging.googleapis.com/httpRequest";

/// Everything that decides which sink configuration a log name is delivered by.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutputKey {
    pub user_agent: String,
    pub resource_override: Option<ResourceOverride>,
    pub storage_limit_size: Option<String>,
    pub compress: Option<Compression>,
}

/// `stackdriver` output delivering every record whose tag is one of `log_names`.
#[must_use]
pub fn stackdriver_output<'a>(
    key: &OutputKey,
    log_names: impl IntoIterator<Item = &'a str>,
) -> Stage {
    let names: Vec<String> = log_names
        .into_iter()
        .map(regex::escape)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut stage = Stage::output()
        .with("Name", "stackdriver")
        .with("Match_Regex", format!("^({})$", names.join("|")))
        .with("stackdriver_agent", &key.user_agent)
        .with("http_request_key", HTTP_REQUEST_KEY)
        .with("Retry_Limit", "3")
        .with("tls", "On")
        .with("tls.verify", "Off")
        .with("workers", "8")
        .with("net.connect_timeout_log_error", "False");
    match &key.resource_override {
        Some(resource) => {
            stage.set("resource", &resource.resource_type);
            if !resource.labels.is_empty() {
                stage.set("resource_labels", resource.labels_string());
            }
        }
        None => stage.set("resource", "gce_instance"),
    }
    if let Some(limit) = &key.storage_limit_size {
        stage.set("storage.total_limit_size", limit);
    }
    if let Some(compress) = key.compress {
        stage.set("compress", compress.as_str());
    }
    stage
}

fn variables(env: &Environment) -> BTreeMap<String, String> {
    let buffers_dir = match env.platform {
        Platform::Linux => format!("{}/fluent-bit/buffers", env.state_dir),
        Platform::Windows => format!(r"{}\fluent-bit\buffers", env.state_dir),
    };
    BTreeMap::from([
        ("buffers_dir".to_string(), buffers_dir),
        ("logs_dir".to_string(), env.logs_dir.clone()),
    ])
}

/// Builds the complete fluent-bit configuration for `config`.
///
/// # Errors
///
/// Returns [`GenerateError::Internal`] if the self-diagnostics pipeline did not come out
/// with exactly one heartbeat delivered to an output.
pub fn assemble(config: &UnifiedConfig, env: &Environment) -> Result<ModularConfig, GenerateError> {
    let logging = &config.logging;
    let mut stages = vec![service(&logging.log_level)];
    let mut log_names: Vec<&str> = Vec::new();

    for pipeline in &logging.pipelines {
        for receiver in &pipeline.receivers {
            let tag = stream_tag(&pipeline.id, &receiver.id);
            stages.extend(receiver_components(&receiver.component, &tag, env));
            for (i, processor) in pipeline.processors.iter().enumerate() {
                stages.extend(processor_components(
                    &processor.component,
                    &tag,
                    &i.to_string(),
                ));
            }
            stages.push(set_log_name(&tag, &receiver.id));
            stages.push(rewrite_tag_by_log_name(&tag));
            if !log_names.contains(&receiver.id.as_str()) {
                log_names.push(&receiver.id);
            }
        }
    }
    stages.extend(log_names.iter().map(|name| remove_log_name(name)));

    let user_agent = env.user_agent(SUBAGENT);
    let mut outputs: BTreeMap<OutputKey, BTreeSet<&str>> = BTreeMap::new();
    if !log_names.is_empty() {
        let key = OutputKey {
            user_agent: user_agent.clone(),
            resource_override: env.resource_override.clone(),
            storage_limit_size: Some(logging.storage_limit_size.clone()),
            compress: logging.compress,
        };
        outputs.entry(key).or_default().extend(log_names.iter().copied());
    }

    let self_logs = self_log_components(env, config.global.self_log_collection);
    stages.extend(self_logs.stages);
    let self_key = OutputKey {
        user_agent,
        resource_override: env.resource_override.clone(),
        storage_limit_size: None,
        compress: None,
    };
    outputs.entry(self_key).or_default().extend(self_logs.log_names);

    stages.push(metrics_input());
    stages.push(prometheus_exporter(SELF_METRICS_PORT));
    stages.extend(
        outputs
            .iter()
            .map(|(key, names)| stackdriver_output(key, names.iter().copied())),
    );

    check_heartbeat(&stages, &outputs)?;

    debug!(
        "Assembled logging configuration: {} stages, {} log names, {} outputs",
        stages.len(),
        log_names.len(),
        outputs.len()
    );
    Ok(ModularConfig {
        variables: variables(env),
        stages,
    })
}

fn check_heartbeat(
    stages: &[Stage],
    outputs: &BTreeMap<OutputKey, BTreeSet<&str>>,
) -> Result<(), GenerateError> {
    let interval = HEARTBEAT_INTERVAL.as_secs().to_string();
    let heartbeats = stages
        .iter()
        .filter(|s| {
            s.kind == StageKind::Input
                && s.plugin() == Some("dummy")
                && s.get("Tag") == Some(HEALTH_TAG)
                && s.get("Interval_Sec") == Some(interval.as_str())
        })
        .count();
    if heartbeats != 1 {
        return Err(GenerateError::Internal(format!(
            "expected exactly one heartbeat input, found {heartbeats}"
        )));
    }
    if !outputs.values().any(|names| names.contains(HEALTH_TAG)) {
        return Err(GenerateError::Internal(
            "health stream is not delivered by any output".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::fluentbit::components::LOG_NAME_KEY;
    use crate::nfs::tests::FakeProbe;

    fn env() -> Environment {
        Environment {
            agent_version: "1.0.0".to_string(),
            fs_probe: Arc::new(FakeProbe {
                mount: PathBuf::from("/mnt/nfs"),
            }),
            ..Environment::for_platform(Platform::Linux)
        }
    }

    fn assemble_yaml(yaml: &str) -> ModularConfig {
        let config = UnifiedConfig::parse(yaml, Platform::Linux).expect("valid config");
        assemble(&config, &env()).expect("assembles")
    }

    fn outputs(config: &ModularConfig) -> Vec<&Stage> {
        config
            .stages_of(StageKind::Output)
            .filter(|s| s.plugin() == Some("stackdriver"))
            .collect()
    }

    const TWO_PIPELINES: &str = r"
logging:
  receivers:
    app:
      type: files
      include_paths: [/var/log/app.log]
    web:
      type: files
      include_paths: [/mnt/nfs/web/*.log]
  processors:
    json:
      type: parse_json
  service:
    compress: gzip
    pipelines:
      p1:
        receivers: [app]
        processors: [json]
      p2:
        receivers: [web]
";

    #[test]
    fn test_empty_config_has_self_diagnostics_only() {
        let config = assemble_yaml("");
        let outputs = outputs(&config);
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs[0].get("Match_Regex"),
            Some("^(ops\\-agent\\-fluent\\-bit|ops\\-agent\\-health)$")
        );
        assert_eq!(outputs[0].get("storage.total_limit_size"), None);
        assert!(config
            .stages_of(StageKind::Filter)
            .all(|s| s.get("Add").map_or(true, |a| !a.starts_with(LOG_NAME_KEY))));
    }

    #[test]
    fn test_pipelines_share_one_output() {
        let config = assemble_yaml(TWO_PIPELINES);
        let outputs = outputs(&config);
        assert_eq!(outputs.len(), 2);
        let user = outputs
            .iter()
            .find(|s| s.get("compress") == Some("gzip"))
            .expect("user output");
        assert_eq!(user.get("Match_Regex"), Some("^(app|web)$"));
        assert_eq!(user.get("storage.total_limit_size"), Some("2G"));
        assert_eq!(user.get("resource"), Some("gce_instance"));
        assert_eq!(
            user.get("stackdriver_agent"),
            Some("Google-Cloud-Ops-Agent-Logging/1.0.0 (Platform=linux)")
        );
    }

    #[test]
    fn test_set_route_clean_order() {
        let config = assemble_yaml(TWO_PIPELINES);
        let filters: Vec<&Stage> = config.stages_of(StageKind::Filter).collect();
        let position = |pred: &dyn Fn(&Stage) -> bool| {
            let found: Vec<usize> = filters
                .iter()
                .enumerate()
                .filter(|(_, s)| pred(s))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(found.len(), 1, "expected exactly one matching filter");
            found[0]
        };
        let tagged = |s: &Stage| s.get("Match") == Some("p1.app");
        let parse = position(&|s| tagged(s) && s.plugin() == Some("parser"));
        let set = position(&|s| tagged(s) && s.get("Add") == Some("logName app"));
        let route = position(&|s| tagged(s) && s.plugin() == Some("rewrite_tag"));
        let clean =
            position(&|s| s.get("Match") == Some("app") && s.get("Remove") == Some("logName"));
        assert!(parse < set && set < route && route < clean);
    }

    #[test]
    fn test_processor_uids_follow_pipeline_order() {
        let config = assemble_yaml(TWO_PIPELINES);
        let parsers: Vec<&str> = config
            .stages_of(StageKind::Parser)
            .filter_map(|s| s.get("Name"))
            .filter(|name| name.starts_with("p1."))
            .collect();
        assert_eq!(parsers, ["p1.app.0"]);
    }

    #[test]
    fn test_nfs_receiver_buffers_in_memory() {
        let config = assemble_yaml(TWO_PIPELINES);
        let tail = |tag: &str| {
            config
                .stages_of(StageKind::Input)
                .find(|s| s.get("Tag") == Some(tag))
                .and_then(|s| s.get("storage.type"))
        };
        assert_eq!(tail("p1.app"), Some("filesystem"));
        assert_eq!(tail("p2.web"), Some("memory"));
    }

    #[test]
    fn test_shared_receiver_is_cleaned_once() {
        let config = assemble_yaml(
            r"
logging:
  receivers:
    app:
      type: files
      include_paths: [/var/log/app.log]
  service:
    pipelines:
      p1:
        receivers: [app]
      p2:
        receivers: [app]
",
        );
        let cleans = config
            .stages_of(StageKind::Filter)
            .filter(|s| s.get("Remove") == Some("logName"))
            .count();
        assert_eq!(cleans, 1);
        let routes = config
            .stages_of(StageKind::Filter)
            .filter(|s| s.get("Rule") == Some("$logName .* $logName false"))
            .count();
        assert_eq!(routes, 2);
    }

    #[test]
    fn test_resource_override() {
        let mut env = env();
        env.resource_override = Some(ResourceOverride {
            resource_type: "generic_node".to_string(),
            labels: BTreeMap::from([("node_id".to_string(), "n1".to_string())]),
        });
        let config = assemble(&UnifiedConfig::default(), &env).expect("assembles");
        let output = config
            .stages_of(StageKind::Output)
            .find(|s| s.plugin() == Some("stackdriver"))
            .expect("output");
        assert_eq!(output.get("resource"), Some("generic_node"));
        assert_eq!(output.get("resource_labels"), Some("node_id=n1"));
    }

    #[test]
    fn test_self_metrics_and_variables() {
        let config = assemble_yaml("");
        assert!(config
            .stages_of(StageKind::Output)
            .any(|s| s.plugin() == Some("prometheus_exporter") && s.get("port") == Some("20202")));
        assert_eq!(
            config.variables.get("buffers_dir").map(String::as_str),
            Some("/var/lib/pipeline-confgen/fluent-bit/buffers")
        );
    }

    #[test]
    fn test_self_log_collection_disabled() {
        let config = assemble_yaml("global:\n  self_log_collection: false\n");
        let outputs = outputs(&config);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].get("Match_Regex"), Some("^(ops\\-agent\\-health)$"));
        assert!(config.stages_of(StageKind::Input).all(|s| s.plugin() != Some("tail")));
    }

    #[test]
    fn test_missing_heartbeat_is_internal() {
        let outputs = BTreeMap::new();
        let err = check_heartbeat(&[], &outputs).unwrap_err();
        assert!(matches!(err, GenerateError::Internal(_)));
    }
}
