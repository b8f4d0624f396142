// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `pipeline-confgen <config.yaml> [output-dir]`
//!
//! Compiles a unified agent configuration and writes the fluent-bit and collector files
//! into `output-dir`, or prints them when no directory is given. Compiler settings come
//! from the file named by `PIPELINE_CONFGEN_SETTINGS_FILE` and `PIPELINE_CONFGEN_*`
//! environment variables.
//!
//! Exit codes: `0` success, `1` usage or I/O failure, `2` invalid configuration,
//! `3` internal compiler error.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use pipeline_confgen::settings::{get_settings, Settings};
use pipeline_confgen::{generate, Artifacts, GenerateError};

const SETTINGS_FILE_VAR: &str = "PIPELINE_CONFGEN_SETTINGS_FILE";

const EXIT_USAGE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to install the log subscriber");
    }
    debug!("Logging subsystem enabled");
}

fn write_artifacts(artifacts: &Artifacts, out_dir: Option<&Path>) -> anyhow::Result<()> {
    let Some(out_dir) = out_dir else {
        for (name, contents) in artifacts.files() {
            println!("# {name}\n{contents}");
        }
        return Ok(());
    };
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for (name, contents) in artifacts.files() {
        let path = out_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}

fn run(settings: &Settings, input: &Path, out_dir: Option<&Path>) -> anyhow::Result<()> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let artifacts = generate(&text, &settings.environment())?;
    let rotation = artifacts.self_log_rotation;
    info!(
        "Self log rotation: enabled={}, max_file_size_megabytes={}, backup_count={}",
        rotation.enabled, rotation.max_file_size_megabytes, rotation.backup_count
    );
    write_artifacts(&artifacts, out_dir)
}

fn main() -> ExitCode {
    let settings_path = env::var_os(SETTINGS_FILE_VAR).map(PathBuf::from);
    let settings = get_settings(settings_path.as_deref());
    init_logging(settings.as_ref().map_or("info", |s| s.log_level.as_str()));

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let args: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    let (input, out_dir) = match args.as_slice() {
        [input] => (input, None),
        [input, out_dir] => (input, Some(out_dir.as_path())),
        _ => {
            error!("Usage: pipeline-confgen <config.yaml> [output-dir]");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match run(&settings, input, out_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<GenerateError>() {
            Some(GenerateError::Config(errors)) => {
                for line in errors.to_string().lines() {
                    error!("{line}");
                }
                ExitCode::from(EXIT_CONFIG)
            }
            Some(GenerateError::Internal(message)) => {
                error!("Internal error, this is a bug in the compiler: {message}");
                ExitCode::from(EXIT_INTERNAL)
            }
            None => {
                error!("{e:#}");
                ExitCode::from(EXIT_USAGE)
            }
        },
    }
}
