// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logging receivers and processors.
//!
//! Each namespace is a closed enum; every variant registers a discriminator in
//! [`register_receivers`] / [`register_processors`] and decodes its own fields with
//! `deny_unknown_fields`.
//!
//! # Receivers
//!
//! | type                | fluent-bit input | network |
//! |---------------------|------------------|---------|
//! | `files`             | `tail`           | no      |
//! | `syslog`            | `syslog`         | yes     |
//! | `tcp`               | `tcp`            | yes     |
//! | `fluent_forward`    | `forward`        | yes     |
//! | `windows_event_log` | `winlog`         | no      |
//!
//! # Processors
//!
//! `parse_json`, `parse_regex` and `parse_multiline`. The parser processors share
//! [`ParserShared`] options (`field`, `time_key`, `time_format`, `types`), which are
//! written flat next to the processor's own fields in the document.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::config::{duration, Validate};
use crate::environment::Platform;
use crate::error::FieldError;
use crate::registry::{Registration, RegistryError, TypeRegistry};

/// Prefix of processor ids that name built-in processors.
pub const BUILTIN_PREFIX: &str = "lib:";

/// Routing tag of the stream a receiver feeds into a pipeline.
#[must_use]
pub fn stream_tag(pipeline: &str, receiver: &str) -> String {
    format!("{pipeline}.{receiver}")
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoggingReceiver {
    Files(FilesReceiver),
    Syslog(SyslogReceiver),
    Tcp(TcpReceiver),
    FluentForward(FluentForwardReceiver),
    WindowsEventLog(WindowsEventLogReceiver),
}

impl LoggingReceiver {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            LoggingReceiver::Files(_) => "files",
            LoggingReceiver::Syslog(_) => "syslog",
            LoggingReceiver::Tcp(_) => "tcp",
            LoggingReceiver::FluentForward(_) => "fluent_forward",
            LoggingReceiver::WindowsEventLog(_) => "windows_event_log",
        }
    }

    /// Port the receiver listens on, for network receivers.
    #[must_use]
    pub fn listen_port(&self) -> Option<u16> {
        match self {
            LoggingReceiver::Syslog(r) => Some(r.listen_port),
            LoggingReceiver::Tcp(r) => Some(r.port()),
            LoggingReceiver::FluentForward(r) => Some(r.port()),
            LoggingReceiver::Files(_) | LoggingReceiver::WindowsEventLog(_) => None,
        }
    }
}

impl Validate for LoggingReceiver {
    fn validate(&self) -> Vec<FieldError> {
        match self {
            LoggingReceiver::Files(r) => r.validate(),
            LoggingReceiver::Syslog(r) => r.validate(),
            LoggingReceiver::Tcp(r) => r.validate(),
            LoggingReceiver::FluentForward(r) => r.validate(),
            LoggingReceiver::WindowsEventLog(r) => r.validate(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesReceiver {
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default, deserialize_with = "duration::deserialize_optional")]
    pub wildcard_refresh_interval: Option<Duration>,
    #[serde(default)]
    pub record_log_file_path: bool,
}

impl Validate for FilesReceiver {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.include_paths.is_empty() {
            errors.push(FieldError::new(
                "include_paths",
                "[]",
                "at least one path is required",
            ));
        }
        if let Some(interval) = self.wildcard_refresh_interval {
            if interval < Duration::from_secs(1) {
                errors.push(FieldError::new(
                    "wildcard_refresh_interval",
                    duration::format(interval),
                    "must be at least 1s",
                ));
            } else if interval.subsec_nanos() != 0 {
                errors.push(FieldError::new(
                    "wildcard_refresh_interval",
                    duration::format(interval),
                    "must be a multiple of 1s",
                ));
            }
        }
        errors
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Udp => "udp",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyslogReceiver {
    pub transport_protocol: TransportProtocol,
    pub listen_host: IpAddr,
    pub listen_port: u16,
}

impl Validate for SyslogReceiver {
    fn validate(&self) -> Vec<FieldError> {
        if self.listen_port == 0 {
            vec![FieldError::new("listen_port", "0", "must be greater than 0")]
        } else {
            Vec::new()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpFormat {
    Json,
}

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_TCP_PORT: u16 = 5170;
pub const DEFAULT_FORWARD_PORT: u16 = 24224;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpReceiver {
    pub format: TcpFormat,
    #[serde(default)]
    pub listen_host: Option<IpAddr>,
    #[serde(default)]
    pub listen_port: Option<u16>,
}

impl TcpReceiver {
    #[must_use]
    pub fn host(&self) -> String {
        self.listen_host
            .map_or_else(|| DEFAULT_LISTEN_HOST.to_string(), |h| h.to_string())
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.listen_port.filter(|p| *p != 0).unwrap_or(DEFAULT_TCP_PORT)
    }
}

impl Validate for TcpReceiver {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FluentForwardReceiver {
    #[serde(default)]
    pub listen_host: Option<IpAddr>,
    #[serde(default)]
    pub listen_port: Option<u16>,
}

impl FluentForwardReceiver {
    #[must_use]
    pub fn host(&self) -> String {
        self.listen_host
            .map_or_else(|| DEFAULT_LISTEN_HOST.to_string(), |h| h.to_string())
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.listen_port
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_FORWARD_PORT)
    }
}

impl Validate for FluentForwardReceiver {}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowsEventLogReceiver {
    pub channels: Vec<String>,
}

impl Validate for WindowsEventLogReceiver {
    fn validate(&self) -> Vec<FieldError> {
        if self.channels.is_empty() {
            vec![FieldError::new(
                "channels",
                "[]",
                "at least one channel is required",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Options shared by every parser processor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParserShared {
    /// Field to parse; defaults to `message`.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub time_key: Option<String>,
    #[serde(default)]
    pub time_format: Option<String>,
    #[serde(default)]
    pub types: BTreeMap<String, FieldType>,
}

impl ParserShared {
    #[must_use]
    pub fn key(&self) -> &str {
        self.field.as_deref().unwrap_or("message")
    }

    fn validate(&self) -> Vec<FieldError> {
        if self.time_format.is_some() && self.time_key.is_none() {
            vec![FieldError::new(
                "time_format",
                self.time_format.clone().unwrap_or_default(),
                "time_format requires time_key",
            )]
        } else {
            Vec::new()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Bool,
    Float,
    Hex,
}

impl FieldType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Bool => "bool",
            FieldType::Float => "float",
            FieldType::Hex => "hex",
        }
    }
}

/// Splits the keys in `own` out of a flat mapping so that the processor's own fields and
/// the shared parser options can each be decoded strictly.
fn split_shared<'de, D, T>(deserializer: D, own: &[&str]) -> Result<(T, ParserShared), D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => serde_yaml::Mapping::new(),
        other => {
            return Err(D::Error::custom(format!(
                "expected a mapping, got {other:?}"
            )))
        }
    };
    let (own_fields, shared_fields): (serde_yaml::Mapping, serde_yaml::Mapping) = mapping
        .into_iter()
        .partition(|(k, _)| k.as_str().is_some_and(|k| own.contains(&k)));

    let own_value = serde_yaml::from_value(serde_yaml::Value::Mapping(own_fields))
        .map_err(D::Error::custom)?;
    let shared = serde_yaml::from_value(serde_yaml::Value::Mapping(shared_fields))
        .map_err(D::Error::custom)?;
    Ok((own_value, shared))
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoggingProcessor {
    ParseJson(ParseJson),
    ParseRegex(ParseRegex),
    ParseMultiline(ParseMultiline),
}

impl LoggingProcessor {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            LoggingProcessor::ParseJson(_) => "parse_json",
            LoggingProcessor::ParseRegex(_) => "parse_regex",
            LoggingProcessor::ParseMultiline(_) => "parse_multiline",
        }
    }
}

impl Validate for LoggingProcessor {
    fn validate(&self) -> Vec<FieldError> {
        match self {
            LoggingProcessor::ParseJson(p) => p.shared.validate(),
            LoggingProcessor::ParseRegex(p) => p.validate(),
            LoggingProcessor::ParseMultiline(p) => p.validate(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseJson {
    pub shared: ParserShared,
}

impl<'de> Deserialize<'de> for ParseJson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Own {}

        let (Own {}, shared) = split_shared(deserializer, &[])?;
        Ok(ParseJson { shared })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseRegex {
    pub regex: String,
    /// Keep the parsed field in the record. Only the self-log parsers set it; user and
    /// `lib:` parsers drop the field.
    pub preserve_key: bool,
    pub shared: ParserShared,
}

impl ParseRegex {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = self.shared.validate();
        if self.regex.is_empty() {
            errors.push(FieldError::new("regex", "", "a regular expression is required"));
        }
        errors
    }
}

impl<'de> Deserialize<'de> for ParseRegex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Own {
            regex: String,
        }

        let (own, shared): (Own, _) = split_shared(deserializer, &["regex"])?;
        Ok(ParseRegex {
            regex: own.regex,
            preserve_key: false,
            shared,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultilineMatchType {
    LanguageExceptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
    Go,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultilineMatch {
    #[serde(rename = "type")]
    pub match_type: MultilineMatchType,
    pub language: Language,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParseMultiline {
    pub match_any: Vec<MultilineMatch>,
}

impl ParseMultiline {
    fn validate(&self) -> Vec<FieldError> {
        if self.match_any.is_empty() {
            vec![FieldError::new("match_any", "[]", "at least one rule is required")]
        } else {
            Vec::new()
        }
    }
}

/// Processors that can be referenced by a `lib:` name without being declared.
#[must_use]
pub fn builtin_processor(name: &str) -> Option<LoggingProcessor> {
    let (regex, time_key, time_format) = match name {
        "lib:default_message_parser" => (r"^(?<message>.*)$", None, None),
        "lib:apache" => (
            r#"^(?<host>[^ ]*) [^ ]* (?<user>[^ ]*) \[(?<time>[^\]]*)\] "(?<method>\S+)(?: +(?<path>[^\"]*?)(?: +\S*)?)?" (?<code>[^ ]*) (?<size>[^ ]*)(?: "(?<referer>[^\"]*)" "(?<agent>[^\"]*)")?$"#,
            Some("time"),
            Some("%d/%b/%Y:%H:%M:%S %z"),
        ),
        "lib:nginx" => (
            r#"^(?<remote>[^ ]*) (?<host>[^ ]*) (?<user>[^ ]*) \[(?<time>[^\]]*)\] "(?<method>\S+)(?: +(?<path>[^\"]*?)(?: +\S*)?)?" (?<code>[^ ]*) (?<size>[^ ]*)(?: "(?<referer>[^\"]*)" "(?<agent>[^\"]*)")"#,
            Some("time"),
            Some("%d/%b/%Y:%H:%M:%S %z"),
        ),
        "lib:syslog-rfc5424" => (
            r"^\<(?<pri>[0-9]{1,5})\>1 (?<time>[^ ]+) (?<host>[^ ]+) (?<ident>[^ ]+) (?<pid>[-0-9]+) (?<msgid>[^ ]+) (?<extradata>(\[(.*?)\]|-)) (?<message>.+)$",
            Some("time"),
            Some("%Y-%m-%dT%H:%M:%S.%L%Z"),
        ),
        "lib:syslog-rfc3164" => (
            r"^\<(?<pri>[0-9]+)\>(?<time>[^ ]* {1,2}[^ ]* [^ ]*) (?<host>[^ ]*) (?<ident>[a-zA-Z0-9_\/\.\-]*)(?:\[(?<pid>[0-9]+)\])?(?:[^\:]*\:)? *(?<message>.*)$",
            Some("time"),
            Some("%b %d %H:%M:%S"),
        ),
        _ => return None,
    };
    Some(LoggingProcessor::ParseRegex(ParseRegex {
        regex: regex.to_string(),
        preserve_key: false,
        shared: ParserShared {
            time_key: time_key.map(str::to_string),
            time_format: time_format.map(str::to_string),
            ..ParserShared::default()
        },
    }))
}

/// Registers every logging receiver type.
///
/// # Errors
///
/// Returns an error if a discriminator is already registered.
pub fn register_receivers(
    registry: &mut TypeRegistry<LoggingReceiver>,
) -> Result<(), RegistryError> {
    registry.register(Registration::new("files", |v| {
        serde_yaml::from_value(v).map(LoggingReceiver::Files)
    }))?;
    registry.register(Registration::new("syslog", |v| {
        serde_yaml::from_value(v).map(LoggingReceiver::Syslog)
    }))?;
    registry.register(Registration::new("tcp", |v| {
        serde_yaml::from_value(v).map(LoggingReceiver::Tcp)
    }))?;
    registry.register(Registration::new("fluent_forward", |v| {
        serde_yaml::from_value(v).map(LoggingReceiver::FluentForward)
    }))?;
    registry.register(
        Registration::new("windows_event_log", |v| {
            serde_yaml::from_value(v).map(LoggingReceiver::WindowsEventLog)
        })
        .only_on(&[Platform::Windows]),
    )?;
    Ok(())
}

/// Registers every logging processor type.
///
/// # Errors
///
/// Returns an error if a discriminator is already registered.
pub fn register_processors(
    registry: &mut TypeRegistry<LoggingProcessor>,
) -> Result<(), RegistryError> {
    registry.register(Registration::new("parse_json", |v| {
        serde_yaml::from_value(v).map(LoggingProcessor::ParseJson)
    }))?;
    registry.register(Registration::new("parse_regex", |v| {
        serde_yaml::from_value(v).map(LoggingProcessor::ParseRegex)
    }))?;
    registry.register(Registration::new("parse_multiline", |v| {
        serde_yaml::from_value(v).map(LoggingProcessor::ParseMultiline)
    }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<T: serde::de::DeserializeOwned>(yaml: &str) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn test_files_receiver() {
        let r: FilesReceiver = decode(
            "include_paths: [/var/log/*.log]\nwildcard_refresh_interval: 30s\nrecord_log_file_path: true",
        )
        .expect("valid receiver");
        assert_eq!(r.include_paths, vec!["/var/log/*.log"]);
        assert_eq!(r.wildcard_refresh_interval, Some(Duration::from_secs(30)));
        assert!(r.record_log_file_path);
        assert!(r.validate().is_empty());
    }

    #[test]
    fn test_files_receiver_requires_paths() {
        let err = decode::<FilesReceiver>("exclude_paths: [/tmp]").unwrap_err();
        assert!(err.to_string().contains("include_paths"));
    }

    #[test]
    fn test_files_receiver_refresh_interval_bounds() {
        let r: FilesReceiver =
            decode("include_paths: [/a]\nwildcard_refresh_interval: 500ms").expect("decodes");
        let errors = r.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "wildcard_refresh_interval");
        assert_eq!(errors[0].value, "500ms");

        let r: FilesReceiver =
            decode("include_paths: [/a]\nwildcard_refresh_interval: 1500ms").expect("decodes");
        assert_eq!(r.validate()[0].reason, "must be a multiple of 1s");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = decode::<FilesReceiver>("include_paths: [/a]\nbogus: 1").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_syslog_receiver() {
        let r: SyslogReceiver =
            decode("transport_protocol: udp\nlisten_host: 0.0.0.0\nlisten_port: 5140")
                .expect("valid receiver");
        assert_eq!(r.transport_protocol, TransportProtocol::Udp);
        assert!(decode::<SyslogReceiver>(
            "transport_protocol: udp\nlisten_host: not-an-ip\nlisten_port: 5140"
        )
        .is_err());
        assert!(decode::<SyslogReceiver>(
            "transport_protocol: sctp\nlisten_host: 0.0.0.0\nlisten_port: 5140"
        )
        .is_err());
    }

    #[test]
    fn test_network_defaults() {
        let tcp: TcpReceiver = decode("format: json").expect("valid receiver");
        assert_eq!(tcp.host(), "127.0.0.1");
        assert_eq!(tcp.port(), 5170);
        let forward: FluentForwardReceiver = decode("{}").expect("valid receiver");
        assert_eq!(forward.port(), 24224);
        assert_eq!(
            LoggingReceiver::FluentForward(forward).listen_port(),
            Some(24224)
        );
    }

    #[test]
    fn test_parse_regex_flat_shared_fields() {
        let p: ParseRegex = decode(
            "regex: ^(?<a>.*)$\nfield: log\ntime_key: t\ntime_format: '%s'\ntypes: {a: integer}",
        )
        .expect("valid processor");
        assert_eq!(p.regex, "^(?<a>.*)$");
        assert_eq!(p.shared.key(), "log");
        assert_eq!(p.shared.types.get("a"), Some(&FieldType::Integer));
    }

    #[test]
    fn test_parse_regex_rejects_unknown_fields() {
        let err = decode::<ParseRegex>("regex: x\nnot_a_field: y").unwrap_err();
        assert!(err.to_string().contains("not_a_field"));
        assert!(decode::<ParseRegex>("field: message").is_err());
    }

    #[test]
    fn test_parse_json_defaults() {
        let p: ParseJson = decode("{}").expect("valid processor");
        assert_eq!(p.shared.key(), "message");
        assert!(decode::<ParseJson>("regex: x").is_err());
    }

    #[test]
    fn test_time_format_requires_time_key() {
        let p: ParseJson = decode("time_format: '%s'").expect("decodes");
        let errors = LoggingProcessor::ParseJson(p).validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "time_format");
    }

    #[test]
    fn test_parse_multiline() {
        let p: ParseMultiline = decode(
            "match_any:\n- type: language_exceptions\n  language: java\n- type: language_exceptions\n  language: python",
        )
        .expect("valid processor");
        assert_eq!(p.match_any[1].language, Language::Python);
        assert!(decode::<ParseMultiline>(
            "match_any:\n- type: language_exceptions\n  language: cobol"
        )
        .is_err());
    }

    #[test]
    fn test_builtin_processors() {
        assert!(matches!(
            builtin_processor("lib:apache"),
            Some(LoggingProcessor::ParseRegex(ParseRegex { ref shared, .. })) if shared.time_key.as_deref() == Some("time")
        ));
        assert!(builtin_processor("lib:unknown").is_none());
        assert!(builtin_processor("parse_json").is_none());
    }

    #[test]
    fn test_builtin_and_user_parsers_drop_key() {
        for name in [
            "lib:default_message_parser",
            "lib:apache",
            "lib:nginx",
            "lib:syslog-rfc3164",
            "lib:syslog-rfc5424",
        ] {
            assert!(
                matches!(
                    builtin_processor(name),
                    Some(LoggingProcessor::ParseRegex(ParseRegex { preserve_key: false, .. }))
                ),
                "{name}"
            );
        }
        let user: ParseRegex = decode("regex: ^(?<message>.*)$").expect("valid processor");
        assert!(!user.preserve_key);
    }
}
