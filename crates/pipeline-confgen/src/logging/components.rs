// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stages generated for user-declared logging receivers and processors.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::config::logging::{
    FilesReceiver, FluentForwardReceiver, Language, LoggingProcessor, LoggingReceiver,
    ParseMultiline, ParseRegex, ParserShared, SyslogReceiver, TcpReceiver,
    WindowsEventLogReceiver,
};
use crate::environment::Environment;
use crate::fluentbit::components::{
    db_path, multiline_filter, multiline_parser, parser_base, parser_filter, Tail,
};
use crate::fluentbit::{Stage, StageKind};
use crate::nfs;

/// Field that receives the source file path when `record_log_file_path` is set.
pub const LOG_FILE_PATH_KEY: &str = "agent.googleapis.com/log_file_path";

/// Stages for one receiver emitting records under `tag`.
#[must_use]
pub fn receiver_components(receiver: &LoggingReceiver, tag: &str, env: &Environment) -> Vec<Stage> {
    match receiver {
        LoggingReceiver::Files(r) => files(r, tag, env),
        LoggingReceiver::Syslog(r) => syslog(r, tag),
        LoggingReceiver::Tcp(r) => tcp(r, tag),
        LoggingReceiver::FluentForward(r) => fluent_forward(r, tag),
        LoggingReceiver::WindowsEventLog(r) => windows_event_log(r, tag),
    }
}

fn files(receiver: &FilesReceiver, tag: &str, env: &Environment) -> Vec<Stage> {
    let remote = nfs::any_remote(&receiver.include_paths, &*env.fs_probe);
    if remote {
        info!(
            "Tag {tag} reads from a remote filesystem, buffering in memory and polling for changes"
        );
    }
    vec![Tail {
        tag: tag.to_string(),
        include_paths: receiver.include_paths.clone(),
        exclude_paths: receiver.exclude_paths.clone(),
        refresh_interval: receiver.wildcard_refresh_interval,
        path_key: receiver
            .record_log_file_path
            .then(|| LOG_FILE_PATH_KEY.to_string()),
        buffer_in_memory: remote,
        disable_inotify: remote,
    }
    .component()]
}

/// Listening input buffered on disk, with at most 10M held in memory.
fn network_input(name: &str, tag: &str, host: &str, port: u16) -> Stage {
    Stage::input()
        .with("Name", name)
        .with("Tag", tag)
        .with("Listen", host)
        .with("Port", port.to_string())
        .with("storage.type", "filesystem")
        .with("Mem_Buf_Limit", "10M")
}

fn syslog(receiver: &SyslogReceiver, tag: &str) -> Vec<Stage> {
    vec![
        network_input(
            "syslog",
            tag,
            &receiver.listen_host.to_string(),
            receiver.listen_port,
        )
        .with("Mode", receiver.transport_protocol.as_str())
        .with("Parser", tag),
        Stage::new(StageKind::Parser)
            .with("Name", tag)
            .with("Format", "regex")
            .with("Regex", r"^(?<message>.*)$"),
    ]
}

fn tcp(receiver: &TcpReceiver, tag: &str) -> Vec<Stage> {
    vec![
        network_input("tcp", tag, &receiver.host(), receiver.port()).with("Format", "json"),
    ]
}

fn fluent_forward(receiver: &FluentForwardReceiver, tag: &str) -> Vec<Stage> {
    vec![network_input(
        "forward",
        tag,
        &receiver.host(),
        receiver.port(),
    )]
}

fn windows_event_log(receiver: &WindowsEventLogReceiver, tag: &str) -> Vec<Stage> {
    vec![Stage::input()
        .with("Name", "winlog")
        .with("Tag", tag)
        .with("Channels", receiver.channels.join(","))
        .with("Interval_Sec", "1")
        .with("DB", db_path(tag))]
}

/// Stages for one processor applied to records tagged `tag`. `uid` keeps generated
/// parser names unique within the tag.
#[must_use]
pub fn processor_components(processor: &LoggingProcessor, tag: &str, uid: &str) -> Vec<Stage> {
    match processor {
        LoggingProcessor::ParseJson(p) => {
            let (parser, name) = shared_parser(&p.shared, tag, uid);
            vec![
                parser.with("Format", "json"),
                parser_filter(tag, p.shared.key(), &[name], false),
            ]
        }
        LoggingProcessor::ParseRegex(p) => parse_regex(p, tag, uid),
        LoggingProcessor::ParseMultiline(p) => parse_multiline(p, tag, uid),
    }
}

fn shared_parser(shared: &ParserShared, tag: &str, uid: &str) -> (Stage, String) {
    let types: BTreeMap<String, String> = shared
        .types
        .iter()
        .map(|(field, ty)| (field.clone(), ty.as_str().to_string()))
        .collect();
    parser_base(
        tag,
        uid,
        shared.time_key.as_deref(),
        shared.time_format.as_deref(),
        &types,
    )
}

/// `PARSER` plus the `parser` filter applying it.
#[must_use]
pub fn parse_regex(processor: &ParseRegex, tag: &str, uid: &str) -> Vec<Stage> {
    let (parser, name) = shared_parser(&processor.shared, tag, uid);
    vec![
        parser
            .with("Format", "regex")
            .with("Regex", &processor.regex),
        parser_filter(
            tag,
            processor.shared.key(),
            &[name],
            processor.preserve_key,
        ),
    ]
}

fn parse_multiline(processor: &ParseMultiline, tag: &str, uid: &str) -> Vec<Stage> {
    let languages: BTreeSet<Language> = processor.match_any.iter().map(|m| m.language).collect();
    let rules: Vec<String> = languages
        .into_iter()
        .flat_map(|language| language_rules(language).iter().map(MultilineRule::render))
        .collect();
    let (parser, name) = multiline_parser(tag, uid, &rules);
    vec![parser, multiline_filter(tag, "message", &name)]
}

/// One transition of a fluent-bit regex multiline parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultilineRule {
    pub state: &'static str,
    pub regex: &'static str,
    pub next: &'static str,
}

impl MultilineRule {
    const fn new(state: &'static str, regex: &'static str, next: &'static str) -> Self {
        Self { state, regex, next }
    }

    #[must_use]
    pub fn render(&self) -> String {
        format!("\"{}\"    \"/{}/\"    \"{}\"", self.state, self.regex, self.next)
    }
}

const JAVA_RULES: &[MultilineRule] = &[
    MultilineRule::new(
        "start_state",
        r"(?:Exception|Error|Throwable|V8 errors stack trace)[:\r\n]",
        "java_after_exception",
    ),
    MultilineRule::new(
        "java_after_exception",
        r"^[\t ]*nested exception is:[\t ]*",
        "java_after_exception",
    ),
    MultilineRule::new("java_after_exception", r"^[\r\n]*$", "java_after_exception"),
    MultilineRule::new("java_after_exception", r"^[\t ]+(?:eval )?at ", "java"),
    MultilineRule::new(
        "java_after_exception",
        r"^[\t ]*(?:Caused by|Suppressed):",
        "java_after_exception",
    ),
    MultilineRule::new(
        "java_after_exception",
        r"^[\t ]*... \d+ (?:more|common frames omitted)",
        "java",
    ),
    MultilineRule::new("java", r"^[\t ]+(?:eval )?at ", "java"),
    MultilineRule::new("java", r"^[\t ]*(?:Caused by|Suppressed):", "java_after_exception"),
    MultilineRule::new("java", r"^[\t ]*... \d+ (?:more|common frames omitted)", "java"),
];

const PYTHON_RULES: &[MultilineRule] = &[
    MultilineRule::new("start_state", r"^Traceback \(most recent call last\):$", "python"),
    MultilineRule::new("python", r"^[\t ]*File ", "python_code"),
    MultilineRule::new("python_code", r"[^\t ]", "python"),
    MultilineRule::new("python", r"^(?:[^\s.():]+\.)*[^\s.():]+:", "python"),
];

const GO_RULES: &[MultilineRule] = &[
    MultilineRule::new("start_state", r"\bpanic: ", "go_after_panic"),
    MultilineRule::new("go_after_panic", r"^$", "go_goroutine"),
    MultilineRule::new("go_after_panic", r"^\[signal ", "go_after_signal"),
    MultilineRule::new("go_after_signal", r"^$", "go_goroutine"),
    MultilineRule::new("go_goroutine", r"^goroutine \d+ \[[^\]]+\]:$", "go_frame_1"),
    MultilineRule::new(
        "go_frame_1",
        r"^(?:[^\s.:]+\.)*[^\s.():]+\(|^created by ",
        "go_frame_2",
    ),
    MultilineRule::new("go_frame_2", r"^\s", "go_frames"),
    MultilineRule::new(
        "go_frames",
        r"^(?:[^\s.:]+\.)*[^\s.():]+\(|^created by ",
        "go_frame_2",
    ),
    MultilineRule::new("go_frames", r"^$", "go_goroutine"),
];

/// Exception stack trace transitions for `language`.
#[must_use]
pub fn language_rules(language: Language) -> &'static [MultilineRule] {
    match language {
        Language::Java => JAVA_RULES,
        Language::Python => PYTHON_RULES,
        Language::Go => GO_RULES,
    }
}
