// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Component type registry.
//!
//! Every component namespace (logging receivers, logging processors, metrics receivers,
//! metrics processors, metrics exporters) maps a discriminator string, the entry's
//! `type` field, to a decoder producing one variant of the namespace's closed enum.
//!
//! # Lifecycle
//!
//! The built-in [`Registries`] are assembled once, on first use, and are read-only from
//! then on. Registering the same discriminator twice in one namespace is an error rather
//! than a silent overwrite.
//!
//! ```rust,ignore
//! let registries = registry::registries()?;
//! let receiver = registries.logging_receivers.decode(&at, entry, Platform::Linux)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use tracing::debug;

use crate::config::logging::{self, LoggingProcessor, LoggingReceiver};
use crate::config::metrics::{self, MetricsExporter, MetricsProcessor, MetricsReceiver};
use crate::environment::Platform;
use crate::error::{ComponentKind, ConfigError, GenerateError, Location, Subagent};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    LoggingReceiver,
    LoggingProcessor,
    MetricsReceiver,
    MetricsProcessor,
    MetricsExporter,
}

impl Namespace {
    #[must_use]
    pub fn subagent(self) -> Subagent {
        match self {
            Namespace::LoggingReceiver | Namespace::LoggingProcessor => Subagent::Logging,
            Namespace::MetricsReceiver
            | Namespace::MetricsProcessor
            | Namespace::MetricsExporter => Subagent::Metrics,
        }
    }

    #[must_use]
    pub fn kind(self) -> ComponentKind {
        match self {
            Namespace::LoggingReceiver | Namespace::MetricsReceiver => ComponentKind::Receiver,
            Namespace::LoggingProcessor | Namespace::MetricsProcessor => ComponentKind::Processor,
            Namespace::MetricsExporter => ComponentKind::Exporter,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.subagent(), self.kind())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate {namespace} type \"{type_name}\"")]
    DuplicateType {
        namespace: Namespace,
        type_name: &'static str,
    },
}

/// Decodes the fields of an entry (everything but `type`) into a namespace variant.
pub type DecodeFn<T> = fn(serde_yaml::Value) -> Result<T, serde_yaml::Error>;

pub struct Registration<T> {
    pub type_name: &'static str,
    pub platforms: &'static [Platform],
    pub decode: DecodeFn<T>,
}

impl<T> Registration<T> {
    #[must_use]
    pub fn new(type_name: &'static str, decode: DecodeFn<T>) -> Self {
        Self {
            type_name,
            platforms: Platform::ALL,
            decode,
        }
    }

    /// Restricts the type to `platforms`.
    #[must_use]
    pub fn only_on(mut self, platforms: &'static [Platform]) -> Self {
        self.platforms = platforms;
        self
    }

    #[must_use]
    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }
}

impl<T> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("type_name", &self.type_name)
            .field("platforms", &self.platforms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct TypeRegistry<T> {
    namespace: Namespace,
    entries: BTreeMap<&'static str, Registration<T>>,
}

impl<T> TypeRegistry<T> {
    #[must_use]
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Adds a discriminator to the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateType`] if the discriminator is already taken.
    pub fn register(&mut self, registration: Registration<T>) -> Result<(), RegistryError> {
        if self.entries.contains_key(registration.type_name) {
            return Err(RegistryError::DuplicateType {
                namespace: self.namespace,
                type_name: registration.type_name,
            });
        }
        debug!("Registered {} type {}", self.namespace, registration.type_name);
        self.entries.insert(registration.type_name, registration);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&Registration<T>> {
        self.entries.get(type_name)
    }

    /// Discriminators available on `platform`, sorted.
    #[must_use]
    pub fn type_names(&self, platform: Platform) -> Vec<&'static str> {
        self.entries
            .values()
            .filter(|r| r.supports(platform))
            .map(|r| r.type_name)
            .collect()
    }

    /// Decodes one document entry, a mapping with a `type` discriminator.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming `at` if the entry is not a mapping, has no
    /// `type`, names a type unknown on `platform`, or fails to decode.
    pub fn decode(
        &self,
        at: &Location,
        entry: serde_yaml::Value,
        platform: Platform,
    ) -> Result<T, ConfigError> {
        let mut mapping = match entry {
            serde_yaml::Value::Mapping(mapping) => mapping,
            other => {
                return Err(ConfigError::Decode {
                    at: at.clone(),
                    message: format!("expected a mapping, got {}", describe(&other)),
                })
            }
        };

        let type_name = match mapping.remove("type") {
            Some(serde_yaml::Value::String(type_name)) => type_name,
            Some(other) => {
                return Err(ConfigError::Decode {
                    at: at.clone(),
                    message: format!("field \"type\" must be a string, got {}", describe(&other)),
                })
            }
            None => {
                return Err(ConfigError::Decode {
                    at: at.clone(),
                    message: "missing required field \"type\"".to_string(),
                })
            }
        };

        let registration = self
            .get(&type_name)
            .filter(|r| r.supports(platform))
            .ok_or_else(|| ConfigError::UnsupportedType {
                at: at.clone(),
                type_name: type_name.clone(),
                supported: self
                    .type_names(platform)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })?;

        (registration.decode)(serde_yaml::Value::Mapping(mapping)).map_err(|e| {
            ConfigError::Decode {
                at: at.clone(),
                message: e.to_string(),
            }
        })
    }
}

fn describe(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// One registry per component namespace.
#[derive(Debug)]
pub struct Registries {
    pub logging_receivers: TypeRegistry<LoggingReceiver>,
    pub logging_processors: TypeRegistry<LoggingProcessor>,
    pub metrics_receivers: TypeRegistry<MetricsReceiver>,
    pub metrics_processors: TypeRegistry<MetricsProcessor>,
    pub metrics_exporters: TypeRegistry<MetricsExporter>,
}

impl Registries {
    /// Registries holding every built-in component type.
    ///
    /// # Errors
    ///
    /// Returns an error if two built-in types share a discriminator.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registries = Registries {
            logging_receivers: TypeRegistry::new(Namespace::LoggingReceiver),
            logging_processors: TypeRegistry::new(Namespace::LoggingProcessor),
            metrics_receivers: TypeRegistry::new(Namespace::MetricsReceiver),
            metrics_processors: TypeRegistry::new(Namespace::MetricsProcessor),
            metrics_exporters: TypeRegistry::new(Namespace::MetricsExporter),
        };
        logging::register_receivers(&mut registries.logging_receivers)?;
        logging::register_processors(&mut registries.logging_processors)?;
        metrics::register_receivers(&mut registries.metrics_receivers)?;
        metrics::register_processors(&mut registries.metrics_processors)?;
        metrics::register_exporters(&mut registries.metrics_exporters)?;
        Ok(registries)
    }
}

static REGISTRIES: OnceLock<Result<Registries, RegistryError>> = OnceLock::new();

/// Process-wide built-in registries, assembled on first call.
///
/// # Errors
///
/// Returns [`GenerateError::Internal`] if the built-in registration failed.
pub fn registries() -> Result<&'static Registries, GenerateError> {
    REGISTRIES
        .get_or_init(Registries::builtin)
        .as_ref()
        .map_err(|e| GenerateError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Shape {
        Circle(Circle),
        Square(Square),
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Circle {
        radius: u32,
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Square {
        side: u32,
    }

    fn shapes() -> TypeRegistry<Shape> {
        let mut registry = TypeRegistry::new(Namespace::LoggingReceiver);
        registry
            .register(Registration::new("circle", |v| {
                serde_yaml::from_value(v).map(Shape::Circle)
            }))
            .expect("first registration");
        registry
            .register(
                Registration::new("square", |v| serde_yaml::from_value(v).map(Shape::Square))
                    .only_on(&[Platform::Windows]),
            )
            .expect("first registration");
        registry
    }

    fn at() -> Location {
        Location::new(Subagent::Logging, ComponentKind::Receiver, "shape")
    }

    fn entry(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = shapes();
        let err = registry
            .register(Registration::new("circle", |v| {
                serde_yaml::from_value(v).map(Shape::Circle)
            }))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateType {
                namespace: Namespace::LoggingReceiver,
                type_name: "circle",
            }
        );
        assert_eq!(err.to_string(), "Duplicate logging receiver type \"circle\"");
    }

    #[test]
    fn test_decode() {
        let shape = shapes()
            .decode(&at(), entry("{type: circle, radius: 3}"), Platform::Linux)
            .expect("valid entry");
        assert_eq!(shape, Shape::Circle(Circle { radius: 3 }));
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = shapes()
            .decode(&at(), entry("{type: hexagon}"), Platform::Linux)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsupportedType {
                at: at(),
                type_name: "hexagon".to_string(),
                supported: vec!["circle".to_string()],
            }
        );
    }

    #[test]
    fn test_decode_respects_platform() {
        let registry = shapes();
        assert!(registry
            .decode(&at(), entry("{type: square, side: 1}"), Platform::Linux)
            .is_err());
        assert!(registry
            .decode(&at(), entry("{type: square, side: 1}"), Platform::Windows)
            .is_ok());
    }

    #[test]
    fn test_decode_errors_carry_location() {
        let registry = shapes();
        for yaml in [
            "{radius: 3}",
            "{type: 7}",
            "{type: circle}",
            "{type: circle, radius: 3, color: red}",
            "[circle]",
        ] {
            let err = registry
                .decode(&at(), entry(yaml), Platform::Linux)
                .unwrap_err();
            assert!(
                matches!(&err, ConfigError::Decode { at: a, .. } if *a == at()),
                "{yaml}: {err}"
            );
        }
    }

    #[test]
    fn test_builtin_registries() {
        let registries = registries().expect("built-in registration succeeds");
        assert_eq!(
            registries.logging_receivers.type_names(Platform::Linux),
            ["files", "fluent_forward", "syslog", "tcp"]
        );
        assert!(registries
            .logging_receivers
            .type_names(Platform::Windows)
            .contains(&"windows_event_log"));
        assert_eq!(
            registries.logging_processors.type_names(Platform::Linux),
            ["parse_json", "parse_multiline", "parse_regex"]
        );
        assert_eq!(
            registries.metrics_receivers.type_names(Platform::Linux),
            ["hostmetrics"]
        );
        assert_eq!(
            registries.metrics_processors.type_names(Platform::Linux),
            ["exclude_metrics"]
        );
        assert_eq!(
            registries.metrics_exporters.type_names(Platform::Linux),
            ["google_cloud_monitoring"]
        );
    }

    #[test]
    fn test_registering_builtin_twice_fails() {
        let mut registry = TypeRegistry::new(Namespace::LoggingReceiver);
        logging::register_receivers(&mut registry).expect("first registration");
        assert!(logging::register_receivers(&mut registry).is_err());
    }
}
