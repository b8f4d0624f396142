// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compiler settings.
//!
//! Settings describe the host the artifacts are generated for, not the user's pipelines.
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. **Defaults** for the current platform
//! 2. **YAML file** given on the command line (optional, missing files are ignored)
//! 3. **Environment variables** prefixed with `PIPELINE_CONFGEN_`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;
use tracing::debug;

use crate::environment::{Environment, Platform, ResourceOverride};
use crate::nfs::StatfsProbe;

pub const ENV_PREFIX: &str = "PIPELINE_CONFGEN_";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to parse settings from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub platform: Platform,
    /// Directory holding the agent's own logs. Defaults per platform.
    pub logs_dir: Option<String>,
    /// Directory holding buffers and checkpoints. Defaults per platform.
    pub state_dir: Option<String>,
    pub agent_version: String,
    /// Log level of the compiler itself.
    pub log_level: String,
    pub resource_override: Option<ResourceOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            logs_dir: None,
            state_dir: None,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            resource_override: None,
        }
    }
}

impl Settings {
    /// Read-only environment threaded through the assemblers.
    #[must_use]
    pub fn environment(&self) -> Environment {
        let defaults = Environment::for_platform(self.platform);
        Environment {
            platform: self.platform,
            agent_version: self.agent_version.clone(),
            resource_override: self.resource_override.clone(),
            logs_dir: self.logs_dir.clone().unwrap_or(defaults.logs_dir),
            state_dir: self.state_dir.clone().unwrap_or(defaults.state_dir),
            fs_probe: Arc::new(StatfsProbe),
        }
    }
}

/// Every field optional, so a source only overrides what it sets.
#[derive(Debug, Default, Deserialize)]
struct PartialSettings {
    platform: Option<Platform>,
    logs_dir: Option<String>,
    state_dir: Option<String>,
    agent_version: Option<String>,
    log_level: Option<String>,
    resource_override: Option<ResourceOverride>,
}

fn merge_settings(settings: &mut Settings, partial: PartialSettings) {
    if let Some(platform) = partial.platform {
        settings.platform = platform;
    }
    if partial.logs_dir.is_some() {
        settings.logs_dir = partial.logs_dir;
    }
    if partial.state_dir.is_some() {
        settings.state_dir = partial.state_dir;
    }
    if let Some(version) = partial.agent_version {
        settings.agent_version = version;
    }
    if let Some(level) = partial.log_level {
        settings.log_level = level;
    }
    if partial.resource_override.is_some() {
        settings.resource_override = partial.resource_override;
    }
}

#[allow(clippy::module_name_repetitions)]
pub trait SettingsSource {
    /// Applies this source on top of `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source exists but cannot be parsed.
    fn load(&self, settings: &mut Settings) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlSettingsSource {
    pub path: PathBuf,
}

impl SettingsSource for YamlSettingsSource {
    fn load(&self, settings: &mut Settings) -> Result<(), SettingsError> {
        let figment = Figment::new().merge(Yaml::file(&self.path));
        let partial = figment
            .extract::<PartialSettings>()
            .map_err(|e| SettingsError::Parse {
                source_name: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        merge_settings(settings, partial);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvSettingsSource;

impl SettingsSource for EnvSettingsSource {
    fn load(&self, settings: &mut Settings) -> Result<(), SettingsError> {
        let figment = Figment::new().merge(Env::prefixed(ENV_PREFIX));
        let partial = figment
            .extract::<PartialSettings>()
            .map_err(|e| SettingsError::Parse {
                source_name: "environment".to_string(),
                message: e.to_string(),
            })?;
        merge_settings(settings, partial);
        Ok(())
    }
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct SettingsBuilder {
    sources: Vec<Box<dyn SettingsSource>>,
    settings: Settings,
}

impl SettingsBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn SettingsSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Applies every source in order.
    ///
    /// # Errors
    ///
    /// Returns the first source that fails to parse.
    pub fn build(self) -> Result<Settings, SettingsError> {
        let mut settings = self.settings;
        for source in &self.sources {
            source.load(&mut settings)?;
        }
        debug!("Loaded settings: {settings:?}");
        Ok(settings)
    }
}

/// Defaults, then the optional YAML file, then the environment.
///
/// # Errors
///
/// Returns an error if the file or the environment holds invalid values.
pub fn get_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut builder = SettingsBuilder::default();
    if let Some(path) = path {
        builder = builder.add_source(Box::new(YamlSettingsSource {
            path: path.to_path_buf(),
        }));
    }
    builder.add_source(Box::new(EnvSettingsSource)).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let settings = get_settings(None).expect("default settings");
            assert_eq!(settings, Settings::default());

            let env = settings.environment();
            assert_eq!(
                env.logs_dir,
                Environment::for_platform(settings.platform).logs_dir
            );
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "settings.yaml",
                r#"
platform: windows
logs_dir: 'C:\logs'
agent_version: "2.46.0"
resource_override:
  type: generic_node
  labels:
    node_id: n1
"#,
            )?;
            let settings = get_settings(Some(Path::new("settings.yaml"))).expect("valid file");
            assert_eq!(settings.platform, Platform::Windows);
            assert_eq!(settings.logs_dir.as_deref(), Some(r"C:\logs"));
            assert_eq!(settings.agent_version, "2.46.0");
            let resource = settings.resource_override.expect("override is set");
            assert_eq!(resource.resource_type, "generic_node");
            assert_eq!(resource.labels_string(), "node_id=n1");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("settings.yaml", "log_level: warn\nstate_dir: /srv/state\n")?;
            jail.set_env("PIPELINE_CONFGEN_LOG_LEVEL", "debug");
            jail.set_env("PIPELINE_CONFGEN_PLATFORM", "linux");

            let settings = get_settings(Some(Path::new("settings.yaml"))).expect("valid settings");
            assert_eq!(settings.log_level, "debug");
            assert_eq!(settings.platform, Platform::Linux);
            assert_eq!(settings.environment().state_dir, "/srv/state");
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_ignored() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let settings =
                get_settings(Some(Path::new("does-not-exist.yaml"))).expect("missing file");
            assert_eq!(settings.log_level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_platform() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("PIPELINE_CONFGEN_PLATFORM", "solaris");
            let err = get_settings(None).unwrap_err();
            assert!(matches!(err, SettingsError::Parse { ref source_name, .. } if source_name == "environment"));
            Ok(())
        });
    }
}
