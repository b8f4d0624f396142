// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reusable fluent-bit stage builders.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{Stage, StageKind};

/// Record field carrying the logical log name while a record is being re-tagged.
pub const LOG_NAME_KEY: &str = "logName";

/// Tag of the fluent-bit self-metrics input.
pub const SELF_METRICS_TAG: &str = "ops-agent-fluent-bit-metrics";

/// Port of fluent-bit's built-in HTTP server.
pub const HTTP_SERVER_PORT: u16 = 2020;

/// Port the self-metrics `prometheus_exporter` output listens on.
pub const SELF_METRICS_PORT: u16 = 20202;

/// Checkpoint database path for `tag`.
#[must_use]
pub fn db_path(tag: &str) -> String {
    format!("${{buffers_dir}}/{}", tag.replace(['.', '/'], "_"))
}

/// `tail` input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tail {
    pub tag: String,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub refresh_interval: Option<Duration>,
    /// Field that receives the path of the file a record was read from.
    pub path_key: Option<String>,
    /// Buffer in memory instead of on disk.
    pub buffer_in_memory: bool,
    /// Disable inotify and fall back to stat polling.
    pub disable_inotify: bool,
}

impl Tail {
    #[must_use]
    pub fn component(&self) -> Stage {
        let mut stage = Stage::input()
            .with("Name", "tail")
            .with("Tag", &self.tag)
            .with("Path", self.include_paths.join(","))
            .with("DB", db_path(&self.tag))
            .with("DB.locking", "true")
            .with("Read_from_Head", "True")
            .with("Buffer_Chunk_Size", "512k")
            .with("Buffer_Max_Size", "2M")
            .with("Key", "message")
            .with("Rotate_Wait", "30")
            .with("Skip_Long_Lines", "On")
            .with("Mem_Buf_Limit", "10M")
            .with(
                "storage.type",
                if self.buffer_in_memory {
                    "memory"
                } else {
                    "filesystem"
                },
            );
        if !self.exclude_paths.is_empty() {
            stage.set("Exclude_Path", self.exclude_paths.join(","));
        }
        if let Some(interval) = self.refresh_interval {
            stage.set("Refresh_Interval", interval.as_secs().to_string());
        }
        if let Some(key) = &self.path_key {
            stage.set("Path_Key", key);
        }
        if self.disable_inotify {
            stage.set("Inotify_Watcher", "false");
        }
        stage
    }
}

/// Incomplete `PARSER` named `{tag}.{uid}`; the caller sets at least `Format`.
#[must_use]
pub fn parser_base(
    tag: &str,
    uid: &str,
    time_key: Option<&str>,
    time_format: Option<&str>,
    types: &BTreeMap<String, String>,
) -> (Stage, String) {
    let name = format!("{tag}.{uid}");
    let mut parser = Stage::new(StageKind::Parser).with("Name", &name);
    if let Some(format) = time_format {
        parser.set("Time_Format", format);
    }
    if let Some(key) = time_key {
        parser.set("Time_Key", key);
    }
    if !types.is_empty() {
        let types: Vec<String> = types.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        parser.set("Types", types.join(" "));
    }
    (parser, name)
}

/// `parser` filter applying `parsers` in order to `key`.
#[must_use]
pub fn parser_filter(tag: &str, key: &str, parsers: &[String], preserve_key: bool) -> Stage {
    let mut filter = Stage::filter()
        .with("Name", "parser")
        .with("Match", tag)
        .with("Key_Name", key)
        .with("Reserve_Data", "True");
    if preserve_key {
        filter.set("Preserve_Key", "True");
    }
    for parser in parsers {
        filter = filter.with_ordered("Parser", parser);
    }
    filter
}

/// `MULTILINE_PARSER` named `multiline.{tag}.{uid}` with `rules` in order.
#[must_use]
pub fn multiline_parser(tag: &str, uid: &str, rules: &[String]) -> (Stage, String) {
    let name = format!("multiline.{tag}.{uid}");
    let mut parser = Stage::new(StageKind::MultilineParser)
        .with("name", &name)
        .with("type", "regex")
        .with("flush_timeout", "1000");
    for rule in rules {
        parser = parser.with_ordered("rule", rule);
    }
    (parser, name)
}

#[must_use]
pub fn multiline_filter(tag: &str, key: &str, parser: &str) -> Stage {
    Stage::filter()
        .with("Name", "multiline")
        .with("Match", tag)
        .with("multiline.key_content", key)
        .with("multiline.parser", parser)
}

/// Set step of the re-tagging contract: stamp the logical log name on every record.
#[must_use]
pub fn set_log_name(tag: &str, log_name: &str) -> Stage {
    Stage::filter()
        .with("Name", "modify")
        .with("Match", tag)
        .with("Add", format!("{LOG_NAME_KEY} {log_name}"))
}

/// Route step: re-emit every record under the tag held in its log name field.
#[must_use]
pub fn rewrite_tag_by_log_name(tag: &str) -> Stage {
    Stage::filter()
        .with("Name", "rewrite_tag")
        .with("Match", tag)
        .with("Rule", format!("${LOG_NAME_KEY} .* ${LOG_NAME_KEY} false"))
        .with("Emitter_Mem_Buf_Limit", "10M")
        .with("Emitter_Storage.type", "filesystem")
}

/// Clean step: drop the transient log name field before export.
#[must_use]
pub fn remove_log_name(log_name: &str) -> Stage {
    Stage::filter()
        .with("Name", "modify")
        .with("Match", log_name)
        .with("Remove", LOG_NAME_KEY)
}

/// One `modify` filter per translation, copying `src` values to `dest` as translated.
#[must_use]
pub fn translation_components(
    tag: &str,
    src: &str,
    dest: &str,
    remove_src: bool,
    translations: &[(&str, &str)],
) -> Vec<Stage> {
    translations
        .iter()
        .map(|(from, to)| {
            let mut stage = Stage::filter()
                .with("Name", "modify")
                .with("Match", tag)
                .with("Condition", format!("Key_Value_Equals {src} {from}"))
                .with("Add", format!("{dest} {to}"));
            if remove_src {
                stage.set("Remove", src);
            }
            stage
        })
        .collect()
}

/// `[SERVICE]` section.
#[must_use]
pub fn service(log_level: &str) -> Stage {
    Stage::new(StageKind::Service)
        .with("Flush", "1")
        .with("Grace", "5")
        .with("Daemon", "off")
        .with("HTTP_Server", "On")
        .with("HTTP_Listen", "0.0.0.0")
        .with("HTTP_PORT", HTTP_SERVER_PORT.to_string())
        .with("Log_Level", log_level)
        .with("dns.resolver", "legacy")
        .with("storage.path", "${buffers_dir}")
        .with("storage.sync", "normal")
        .with("storage.checksum", "on")
        .with("storage.backlog.mem_limit", "50M")
        .with("storage.metrics", "on")
        .with("storage.max_chunks_up", "128")
}

/// Internal metrics input scraped by the self-metrics exporter.
#[must_use]
pub fn metrics_input() -> Stage {
    Stage::input()
        .with("Name", "fluentbit_metrics")
        .with("Tag", SELF_METRICS_TAG)
        .with("Scrape_On_Start", "True")
        .with("Scrape_Interval", "60")
}

/// Prometheus endpoint exposing the internal metrics.
#[must_use]
pub fn prometheus_exporter(port: u16) -> Stage {
    Stage::output()
        .with("Name", "prometheus_exporter")
        .with("Match", SELF_METRICS_TAG)
        .with("host", "0.0.0.0")
        .with("port", port.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path() {
        assert_eq!(db_path("pipe.files/a"), "${buffers_dir}/pipe_files_a");
    }

    #[test]
    fn test_tail_defaults() {
        let tail = Tail {
            tag: "p.r".to_string(),
            include_paths: vec!["/var/log/a.log".to_string(), "/var/log/b.log".to_string()],
            ..Tail::default()
        }
        .component();
        assert_eq!(tail.get("Path"), Some("/var/log/a.log,/var/log/b.log"));
        assert_eq!(tail.get("DB"), Some("${buffers_dir}/p_r"));
        assert_eq!(tail.get("storage.type"), Some("filesystem"));
        assert_eq!(tail.get("Inotify_Watcher"), None);
        assert_eq!(tail.get("Exclude_Path"), None);
    }

    #[test]
    fn test_tail_memory_buffering() {
        let tail = Tail {
            tag: "p.r".to_string(),
            include_paths: vec!["/mnt/nfs/*.log".to_string()],
            refresh_interval: Some(Duration::from_secs(30)),
            buffer_in_memory: true,
            disable_inotify: true,
            ..Tail::default()
        }
        .component();
        assert_eq!(tail.get("storage.type"), Some("memory"));
        assert_eq!(tail.get("Inotify_Watcher"), Some("false"));
        assert_eq!(tail.get("Refresh_Interval"), Some("30"));
    }

    #[test]
    fn test_parser_base_types_are_sorted() {
        let types = BTreeMap::from([
            ("size".to_string(), "integer".to_string()),
            ("code".to_string(), "string".to_string()),
        ]);
        let (parser, name) = parser_base("p.r", "0", Some("time"), None, &types);
        assert_eq!(name, "p.r.0");
        assert_eq!(parser.get("Types"), Some("code:string size:integer"));
        assert_eq!(parser.get("Time_Key"), Some("time"));
        assert_eq!(parser.get("Time_Format"), None);
    }

    #[test]
    fn test_retag_contract_stages() {
        assert_eq!(set_log_name("p.r", "r").get("Add"), Some("logName r"));
        assert_eq!(
            rewrite_tag_by_log_name("p.r").get("Rule"),
            Some("$logName .* $logName false")
        );
        let clean = remove_log_name("r");
        assert_eq!(clean.get("Match"), Some("r"));
        assert_eq!(clean.get("Remove"), Some("logName"));
    }

    #[test]
    fn test_translation_components() {
        let stages = translation_components("t", "severity", "sev", true, &[("warn", "WARNING")]);
        assert_eq!(stages.len(), 1);
        assert_eq!(
            stages[0].get("Condition"),
            Some("Key_Value_Equals severity warn")
        );
        assert_eq!(stages[0].get("Add"), Some("sev WARNING"));
        assert_eq!(stages[0].get("Remove"), Some("severity"));
    }
}
