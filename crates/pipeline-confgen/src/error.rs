// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the configuration model and the pipeline assemblers.
//!
//! User mistakes are reported as [`ConfigError`] values collected into a single
//! [`ConfigErrors`] so that one compile reports every broken entry at once. Defects in
//! the compiler itself surface as [`GenerateError::Internal`] and are never mixed with
//! user errors.

use std::fmt;

/// Top-level section of the unified document an error points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subagent {
    Logging,
    Metrics,
    Global,
}

impl fmt::Display for Subagent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subagent::Logging => "logging",
            Subagent::Metrics => "metrics",
            Subagent::Global => "global",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    Receiver,
    Processor,
    Exporter,
    Pipeline,
    Setting,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentKind::Receiver => "receiver",
            ComponentKind::Processor => "processor",
            ComponentKind::Exporter => "exporter",
            ComponentKind::Pipeline => "pipeline",
            ComponentKind::Setting => "setting",
        })
    }
}

/// Identity of a document entry: `(subagent, kind, id)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub subagent: Subagent,
    pub kind: ComponentKind,
    pub id: String,
}

impl Location {
    #[must_use]
    pub fn new(subagent: Subagent, kind: ComponentKind, id: impl Into<String>) -> Self {
        Self {
            subagent,
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} \"{}\"", self.subagent, self.kind, self.id)
    }
}

/// A field-level validation failure, before it is attached to a [`Location`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl FieldError {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A single user-facing configuration error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration document: {0}")]
    Document(String),

    #[error("{at}: unsupported type \"{type_name}\", supported types are [{}]", .supported.join(", "))]
    UnsupportedType {
        at: Location,
        type_name: String,
        supported: Vec<String>,
    },

    #[error("{at}: {message}")]
    Decode { at: Location, message: String },

    #[error("{at}: invalid value {value:?} for field \"{field}\": {reason}")]
    Validation {
        at: Location,
        field: String,
        value: String,
        reason: String,
    },

    #[error("{at} references undefined {kind} \"{id}\"")]
    UndefinedReference {
        at: Location,
        kind: ComponentKind,
        id: String,
    },

    #[error("{at}: {reason}")]
    Conflict { at: Location, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn validation(at: Location, error: FieldError) -> Self {
        ConfigError::Validation {
            at,
            field: error.field,
            value: error.value,
            reason: error.reason,
        }
    }

    /// Entry the error is attached to, if any.
    #[must_use]
    pub fn location(&self) -> Option<&Location> {
        match self {
            ConfigError::Document(_) => None,
            ConfigError::UnsupportedType { at, .. }
            | ConfigError::Decode { at, .. }
            | ConfigError::Validation { at, .. }
            | ConfigError::UndefinedReference { at, .. }
            | ConfigError::Conflict { at, .. } => Some(at),
        }
    }
}

/// Every configuration error found during one compile, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ConfigError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: ConfigErrors) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigError> {
        self.0.iter()
    }

    /// Returns `value` when no error was collected.
    ///
    /// # Errors
    ///
    /// Returns `self` if at least one error was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, ConfigErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<ConfigError> for ConfigErrors {
    fn from(error: ConfigError) -> Self {
        ConfigErrors(vec![error])
    }
}

impl IntoIterator for ConfigErrors {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConfigErrors {
    type Item = &'a ConfigError;
    type IntoIter = std::slice::Iter<'a, ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Result of a whole compile.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("{0}")]
    Config(#[from] ConfigErrors),

    /// An internal pipeline failed to assemble. This is a compiler defect, not a user error.
    #[error("Internal error: {0}")]
    Internal(String),
}
