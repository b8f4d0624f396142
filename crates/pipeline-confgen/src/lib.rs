// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # pipeline-confgen
//!
//! Compiles one unified agent configuration into the configuration of two runtimes: a
//! fluent-bit log shipper and an OpenTelemetry metrics collector.
//!
//! ## Architecture
//!
//! - [`registry`]: per-namespace component types keyed by their `type` discriminator
//! - [`config`]: the validated configuration model and the document parser
//! - [`logging`]: logging pipeline assembly, tag routing and self diagnostics
//! - [`fluentbit`]: fluent-bit stages and their rendering
//! - [`metrics`]: metrics pipeline assembly, transform steps and the reference evaluator
//! - [`otel`]: collector configuration model and rendering
//! - [`nfs`]: remote filesystem detection for file-watch paths
//! - [`settings`]: compiler settings layered from defaults, a file and the environment
//!
//! A compile either produces every artifact or reports every configuration error found.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod environment;
pub mod error;
pub mod fluentbit;
pub mod logging;
pub mod metrics;
pub mod nfs;
pub mod otel;
pub mod registry;
pub mod settings;

use tracing::info;

pub use config::{SelfLogRotation, UnifiedConfig};
pub use environment::{Environment, Platform, ResourceOverride};
pub use error::{ConfigError, ConfigErrors, GenerateError};

/// File name of the collector configuration.
pub const OTEL_CONFIG_FILE_NAME: &str = "otel.yaml";

/// Everything one compile produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifacts {
    pub fluent_bit_main: String,
    pub fluent_bit_parser: String,
    pub otel: String,
    /// Rotation policy for the agent's own log files, applied by the supervisor.
    pub self_log_rotation: SelfLogRotation,
}

impl Artifacts {
    /// `(file name, contents)` of every rendered file.
    #[must_use]
    pub fn files(&self) -> [(&'static str, &str); 3] {
        [
            (fluentbit::MAIN_CONFIG_FILE_NAME, &self.fluent_bit_main),
            (fluentbit::PARSER_CONFIG_FILE_NAME, &self.fluent_bit_parser),
            (OTEL_CONFIG_FILE_NAME, &self.otel),
        ]
    }
}

/// Parses `text` and renders both runtimes' configuration for `env`.
///
/// # Errors
///
/// Returns [`GenerateError::Config`] listing every problem in the document, or
/// [`GenerateError::Internal`] if an internal pipeline could not be assembled.
pub fn generate(text: &str, env: &Environment) -> Result<Artifacts, GenerateError> {
    let config = UnifiedConfig::parse(text, env.platform)?;

    let logging = logging::assemble(&config, env)?.generate();
    let otel = metrics::assemble(&config, env)?
        .generate()
        .map_err(|e| GenerateError::Internal(format!("Failed to render collector config: {e}")))?;

    info!(
        "Generated configuration for {} logging and {} metrics pipelines",
        config.logging.pipelines.len(),
        config.metrics.pipelines.len()
    );
    Ok(Artifacts {
        fluent_bit_main: logging.main,
        fluent_bit_parser: logging.parser,
        otel,
        self_log_rotation: config.global.self_log_rotation,
    })
}
