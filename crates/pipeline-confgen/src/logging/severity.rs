// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Record field the log sink reads the entry severity from.
pub const SEVERITY_KEY: &str = "logging.googleapis.com/severity";

/// Canonical log entry severities, most severe first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    pub const ALL: [Severity; 8] = [
        Severity::Emergency,
        Severity::Alert,
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }

    /// Maps a fluent-bit log level as it appears in the agent's own log lines.
    #[must_use]
    pub fn from_fluent_bit(level: &str) -> Option<Self> {
        match level {
            "debug" | "trace" => Some(Severity::Debug),
            "info" => Some(Severity::Info),
            "warn" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation table for the levels fluent-bit writes, in the order the filters apply.
#[must_use]
pub fn fluent_bit_translations() -> Vec<(&'static str, &'static str)> {
    ["debug", "error", "info", "warn"]
        .into_iter()
        .filter_map(|level| Severity::from_fluent_bit(level).map(|s| (level, s.as_str())))
        .collect()
}
