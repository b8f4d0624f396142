// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote filesystem detection for file-watch paths.
//!
//! Tailing files over NFS or SMB with inotify and filesystem-backed buffers is unreliable,
//! so the `files` receiver switches to memory buffering when any of its include paths
//! lives on a network filesystem.
//!
//! # Detection
//!
//! Paths may contain wildcards, so the probe runs against the longest concrete ancestor
//! directory: every segment from the first wildcard onward is dropped, and the final
//! segment is always dropped because it names a file. A wildcard high up in the path
//! leaves a shallow ancestor which usually sits on the local root filesystem; such a path
//! is reported as local even if the files it eventually matches are remote.
//!
//! # Platform Support
//!
//! - **Linux**: `statfs` via `nix::sys::statfs`
//! - **Other platforms**: the probe returns an error, which is treated as "not remote"

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

/// Filesystem type codes (`statfs.f_type`) of network filesystems.
pub const REMOTE_FILESYSTEMS: &[(u64, &str)] = &[
    (0x6969, "nfs"),
    (0x517B, "smb"),
    (0xFF53_4D42, "cifs"),
    (0xFE53_4D42, "smb2"),
    (0x5346_414F, "afs"),
];

/// Answers which filesystem a directory lives on.
pub trait FilesystemProbe: fmt::Debug + Send + Sync {
    /// Returns the filesystem type code of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    fn filesystem_type(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by the `statfs` system call.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatfsProbe;

impl FilesystemProbe for StatfsProbe {
    #[cfg(target_os = "linux")]
    fn filesystem_type(&self, path: &Path) -> io::Result<u64> {
        let stat = nix::sys::statfs::statfs(path).map_err(io::Error::from)?;
        // Magic numbers fit in 32 bits; upper bits differ between libc flavours.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let magic = stat.filesystem_type().0 as u32;
        Ok(u64::from(magic))
    }

    #[cfg(not(target_os = "linux"))]
    fn filesystem_type(&self, _path: &Path) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "filesystem type detection is only supported on Linux",
        ))
    }
}

fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// Longest concrete directory that contains every file `pattern` can match.
///
/// Returns `None` when nothing concrete is left (e.g. `*.log`).
#[must_use]
pub fn concrete_ancestor(pattern: &str) -> Option<PathBuf> {
    let path = Path::new(pattern);
    let components: Vec<Component<'_>> = path.components().collect();
    // The last segment is the file name.
    let directories = components.split_last().map_or(&[][..], |(_, dirs)| dirs);

    let mut ancestor = PathBuf::new();
    for component in directories {
        if let Component::Normal(segment) = component {
            if has_wildcard(&segment.to_string_lossy()) {
                break;
            }
        }
        ancestor.push(component.as_os_str());
    }

    if ancestor.as_os_str().is_empty() {
        None
    } else {
        Some(ancestor)
    }
}

/// Returns the name of the network filesystem `pattern` lives on, if any.
#[must_use]
pub fn remote_filesystem(pattern: &str, probe: &dyn FilesystemProbe) -> Option<&'static str> {
    let ancestor = concrete_ancestor(pattern)?;
    match probe.filesystem_type(&ancestor) {
        Ok(magic) => {
            let remote = REMOTE_FILESYSTEMS
                .iter()
                .find(|(code, _)| *code == magic)
                .map(|(_, name)| *name);
            debug!(
                "Path {} has filesystem type {magic:#x} (remote: {remote:?})",
                ancestor.display()
            );
            remote
        }
        Err(e) => {
            debug!(
                "Unable to determine filesystem type of {}: {e}, assuming local",
                ancestor.display()
            );
            None
        }
    }
}

#[must_use]
pub fn is_remote(pattern: &str, probe: &dyn FilesystemProbe) -> bool {
    remote_filesystem(pattern, probe).is_some()
}

/// True if any of `patterns` lives on a network filesystem.
#[must_use]
pub fn any_remote<S: AsRef<str>>(patterns: &[S], probe: &dyn FilesystemProbe) -> bool {
    patterns.iter().any(|p| is_remote(p.as_ref(), probe))
}
