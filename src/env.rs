// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{env, path::PathBuf};

/// Run environment resolved once at command entry and passed down explicitly.
/// Nothing in the library layer reads process environment variables itself.
#[derive(Clone, Debug)]
pub struct Env {
    /// Directory for scratch files (payload staging, output staging).
    pub temp_dir: PathBuf,
    /// Accept device codes that are not in the known device table.
    pub unknown_devcodes: bool,
    /// Optional sidecar file receiving a description of a converted package.
    pub metadata_dump: Option<PathBuf>,
}

impl Env {
    pub fn from_system() -> Self {
        let unknown_devcodes = env::var("KT_WITH_UNKNOWN_DEVCODES").is_ok_and(|v| v == "1");
        let metadata_dump = env::var_os("KT_PKG_METADATA_DUMP").map(PathBuf::from);

        Self {
            temp_dir: env::temp_dir(),
            unknown_devcodes,
            metadata_dump,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self {
            temp_dir: env::temp_dir(),
            unknown_devcodes: false,
            metadata_dump: None,
        }
    }
}
