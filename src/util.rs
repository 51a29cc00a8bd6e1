// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

pub const ZEROS: [u8; 4096] = [0u8; 4096];

/// Classification of an input file by its name. The update loaders on the
/// devices only care about a handful of suffixes, all matched
/// case-insensitively (except uImage, which is a literal basename suffix).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Script,
    Shell,
    Sig,
    Bin,
    Stgz,
    Tgz,
    Tarball,
    Dat,
    Uimage,
    Other,
}

impl FileKind {
    pub fn from_name(name: &str) -> Self {
        fn has_suffix(name: &str, suffix: &str) -> bool {
            name.len() >= suffix.len()
                && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
        }

        if has_suffix(name, ".ffs") {
            Self::Script
        } else if has_suffix(name, ".sh") {
            Self::Shell
        } else if has_suffix(name, ".sig") {
            Self::Sig
        } else if has_suffix(name, ".bin") {
            Self::Bin
        } else if has_suffix(name, ".stgz") {
            Self::Stgz
        } else if has_suffix(name, ".tgz") {
            Self::Tgz
        } else if has_suffix(name, ".tar.gz") {
            Self::Tarball
        } else if has_suffix(name, ".dat") {
            Self::Dat
        } else if name.ends_with("uImage") {
            Self::Uimage
        } else {
            Self::Other
        }
    }

    /// Whether a file of this kind is itself a gzipped tar that can serve as
    /// a bundle payload without repacking its contents.
    pub fn is_archive(self) -> bool {
        matches!(self, Self::Stgz | Self::Tgz | Self::Tarball)
    }

    /// Whether the file should be marked executable inside the payload.
    pub fn is_script(self) -> bool {
        matches!(self, Self::Script | Self::Shell)
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}
