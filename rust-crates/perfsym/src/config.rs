// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Symbolizer configuration.

use crate::locator::BuildId;
use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable overriding the build-ID cache root, as in `perf`.
pub const BUILD_ID_DIR_ENV: &str = "PERF_BUILDID_DIR";

/// Settings shared by all lookups of a [`Symbolizer`](crate::Symbolizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of perf's build-ID cache. Defaults to `~/.debug`.
    pub build_id_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let build_id_dir = match dirs::home_dir() {
            Some(home) => home.join(".debug"),
            None => PathBuf::from(".debug"),
        };

        Self { build_id_dir }
    }
}

impl Config {
    /// Default configuration, honoring the `PERF_BUILDID_DIR` environment
    /// variable.
    pub fn from_env() -> Self {
        Self::with_override(std::env::var_os(BUILD_ID_DIR_ENV))
    }

    fn with_override(build_id_dir: Option<OsString>) -> Self {
        match build_id_dir.filter(|x| !x.is_empty()) {
            Some(dir) => Self {
                build_id_dir: dir.into(),
            },
            None => Self::default(),
        }
    }

    /// Path of the build-ID cache entry for the given ID.
    ///
    /// The layout is `<build_id_dir>/.build-id/<first 2 hex digits>/<rest>`.
    /// Returns [`None`] for empty build IDs.
    pub fn build_id_path(&self, build_id: &BuildId) -> Option<PathBuf> {
        let hex = build_id.to_string();
        if hex.len() < 2 {
            return None;
        }

        let (dir, file) = hex.split_at(2);
        Some(self.build_id_dir.join(".build-id").join(dir).join(file))
    }
}
