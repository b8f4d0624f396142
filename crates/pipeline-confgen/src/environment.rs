// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-only description of the host the generated configuration is meant for.
//!
//! The assemblers never look at the running process directly; everything that depends
//! on the host (platform, directories, resource labels, filesystem probing) is threaded
//! through an [`Environment`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::nfs::{FilesystemProbe, StatfsProbe};

pub const AGENT_KIND: &str = "ops-agent";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub const ALL: &'static [Platform] = &[Platform::Linux, Platform::Windows];

    /// Platform this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        })
    }
}

/// Monitored resource reported instead of the detected instance resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ResourceOverride {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResourceOverride {
    /// Labels rendered as sorted `key=value` pairs joined by commas.
    #[must_use]
    pub fn labels_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Clone, Debug)]
pub struct Environment {
    pub platform: Platform,
    pub agent_version: String,
    pub resource_override: Option<ResourceOverride>,
    /// Directory the agent writes its own logs to.
    pub logs_dir: String,
    /// Directory holding buffers and checkpoints.
    pub state_dir: String,
    pub fs_probe: Arc<dyn FilesystemProbe>,
}

impl Environment {
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        let (logs_dir, state_dir) = match platform {
            Platform::Linux => ("/var/log/pipeline-confgen", "/var/lib/pipeline-confgen"),
            Platform::Windows => (
                r"C:\ProgramData\PipelineConfgen\log",
                r"C:\ProgramData\PipelineConfgen\run",
            ),
        };
        Self {
            platform,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            resource_override: None,
            logs_dir: logs_dir.to_string(),
            state_dir: state_dir.to_string(),
            fs_probe: Arc::new(StatfsProbe),
        }
    }

    /// User agent reported by a subagent, e.g.
    /// `Google-Cloud-Ops-Agent-Logging/1.0.0 (Platform=linux)`.
    #[must_use]
    pub fn user_agent(&self, subagent: &str) -> String {
        format!(
            "Google-Cloud-Ops-Agent-{subagent}/{} (Platform={})",
            self.agent_version, self.platform
        )
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::for_platform(Platform::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_labels_are_sorted() {
        let resource = ResourceOverride {
            resource_type: "generic_node".to_string(),
            labels: BTreeMap::from([
                ("node_id".to_string(), "n1".to_string()),
                ("location".to_string(), "us-east1".to_string()),
            ]),
        };
        assert_eq!(resource.labels_string(), "location=us-east1,node_id=n1");
    }

    #[test]
    fn test_user_agent() {
        let mut env = Environment::for_platform(Platform::Linux);
        env.agent_version = "2.3.4".to_string();
        assert_eq!(
            env.user_agent("Logging"),
            "Google-Cloud-Ops-Agent-Logging/2.3.4 (Platform=linux)"
        );
    }

    #[test]
    fn test_platform_deserialize() {
        let platform: Platform = serde_yaml::from_str("windows").expect("valid platform");
        assert_eq!(platform, Platform::Windows);
    }
}
