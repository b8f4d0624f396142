// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! fluent-bit configuration model and rendering.
//!
//! The logging assembler produces a flat list of [`Stage`]s. Rendering groups them into
//! two files: the main file (`@SET` variables, `[SERVICE]`, `[INPUT]`, `[FILTER]`,
//! `[OUTPUT]`) and the parser file (`[PARSER]`, `[MULTILINE_PARSER]`). Within each kind
//! stages keep the order they were produced in, which is the order fluent-bit applies
//! filters.

pub mod components;

use std::collections::BTreeMap;
use std::fmt;

pub const MAIN_CONFIG_FILE_NAME: &str = "fluent_bit_main.conf";
pub const PARSER_CONFIG_FILE_NAME: &str = "fluent_bit_parser.conf";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Service,
    Input,
    Filter,
    Parser,
    MultilineParser,
    Output,
}

impl StageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Service => "SERVICE",
            StageKind::Input => "INPUT",
            StageKind::Filter => "FILTER",
            StageKind::Parser => "PARSER",
            StageKind::MultilineParser => "MULTILINE_PARSER",
            StageKind::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One section of fluent-bit configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    /// Keys that appear once; rendered sorted.
    pub config: BTreeMap<String, String>,
    /// Keys that repeat or whose order matters (`rule`, `Parser`, multiple `Add`);
    /// rendered after `config` in insertion order.
    pub ordered_config: Vec<(String, String)>,
}

impl Stage {
    #[must_use]
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            config: BTreeMap::new(),
            ordered_config: Vec::new(),
        }
    }

    #[must_use]
    pub fn input() -> Self {
        Self::new(StageKind::Input)
    }

    #[must_use]
    pub fn filter() -> Self {
        Self::new(StageKind::Filter)
    }

    #[must_use]
    pub fn output() -> Self {
        Self::new(StageKind::Output)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn with_ordered(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ordered_config.push((key.into(), value.into()));
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Values of every ordered entry named `key`.
    pub fn ordered_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.ordered_config
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `Name` of the fluent-bit plugin this stage configures.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.get("Name")
    }

    #[must_use]
    pub fn render(&self) -> String {
        let width = self
            .config
            .keys()
            .chain(self.ordered_config.iter().map(|(k, _)| k))
            .map(String::len)
            .max()
            .unwrap_or(0);

        let lines: Vec<String> = self
            .config
            .iter()
            .chain(self.ordered_config.iter().map(|(k, v)| (k, v)))
            .map(|(k, v)| format!("    {k:<width$} {v}"))
            .collect();

        format!("[{}]\n{}\n", self.kind, lines.join("\n"))
    }
}

/// Rendered fluent-bit files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFiles {
    pub main: String,
    pub parser: String,
}

/// Stages plus the `@SET` variables they reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModularConfig {
    pub variables: BTreeMap<String, String>,
    pub stages: Vec<Stage>,
}

impl ModularConfig {
    /// Stages of `kind`, in production order.
    pub fn stages_of(&self, kind: StageKind) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |s| s.kind == kind)
    }

    #[must_use]
    pub fn generate(&self) -> ConfigFiles {
        let mut main: Vec<String> = self
            .variables
            .iter()
            .map(|(k, v)| format!("@SET {k}={v}"))
            .collect();
        main.push(String::new());

        for kind in [
            StageKind::Service,
            StageKind::Input,
            StageKind::Filter,
            StageKind::Output,
        ] {
            main.extend(self.stages_of(kind).map(Stage::render));
        }

        let parser: Vec<String> = [StageKind::Parser, StageKind::MultilineParser]
            .into_iter()
            .flat_map(|kind| self.stages_of(kind).map(Stage::render))
            .collect();

        ConfigFiles {
            main: main.join("\n"),
            parser: parser.join("\n"),
        }
    }
}
