// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared test helpers.
//!
//! Instead of checking binaries into the repository, tests generate the
//! ELF images and DWARF data they need on the fly.


use std::path::{Path, PathBuf};

/// Temporary directory holding generated test files.
pub struct TempDir(tempfile::TempDir);

impl TempDir {
    pub fn new() -> Self {
        init_logging();
        Self(tempfile::tempdir().unwrap())
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }

    /// Writes `data` to `name` (relative to the directory), creating parent
    /// directories as needed.
    pub fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.0.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }
}

/// Routes `log` output through the test harness' captured stderr.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
