// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline_confgen::nfs::FilesystemProbe;
use pipeline_confgen::{Environment, Platform};

pub const NFS_MAGIC: u64 = 0x6969;
pub const EXT4_MAGIC: u64 = 0xEF53;

/// Reports NFS for everything under `mount` and ext4 elsewhere.
#[derive(Debug)]
pub struct MountProbe {
    pub mount: PathBuf,
}

impl FilesystemProbe for MountProbe {
    fn filesystem_type(&self, path: &Path) -> io::Result<u64> {
        if path.starts_with(&self.mount) {
            Ok(NFS_MAGIC)
        } else {
            Ok(EXT4_MAGIC)
        }
    }
}

/// Linux environment with NFS mounted at `/mnt/nfs`.
pub fn linux_env() -> Environment {
    Environment {
        agent_version: "2.46.0".to_string(),
        fs_probe: Arc::new(MountProbe {
            mount: PathBuf::from("/mnt/nfs"),
        }),
        ..Environment::for_platform(Platform::Linux)
    }
}

/// One rendered fluent-bit section.
#[derive(Debug, Clone)]
pub struct Section {
    pub kind: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Splits a rendered fluent-bit file into its sections, in file order.
pub fn sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(kind) = trimmed.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push(Section {
                kind: kind.to_string(),
                entries: Vec::new(),
            });
        } else if let (Some(section), Some((key, value))) =
            (sections.last_mut(), trimmed.split_once(' '))
        {
            section
                .entries
                .push((key.to_string(), value.trim_start().to_string()));
        }
    }
    sections
}
