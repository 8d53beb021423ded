// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Finds and loads the on-disk image backing a mapped file.
//!
//! Images are looked up in perf's build-ID cache first (see
//! [`Config::build_id_path`]) and then at the path recorded in the mapping.

use crate::image::{self, ImageTable};
use crate::Config;
use std::fmt;
use std::path::Path;

/// Name of the kernel pseudo-file in perf's build-ID records.
pub const KERNEL_NAME: &str = "[kernel.kallsyms]";

/// GNU build ID of an image.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BuildId(Vec<u8>);

impl BuildId {
    /// Wraps raw build ID bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parses a build ID from its hex representation.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 || !hex.bytes().all(|x| x.is_ascii_hexdigit()) {
            return None;
        }

        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// Raw build ID bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildId({self})")
    }
}

/// Associates a recorded filename with the build ID it had when profiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdRecord {
    /// Filename as recorded by perf (e.g. `/usr/lib/libc.so.6`).
    pub filename: String,
    /// Build ID of the file at recording time.
    pub build_id: BuildId,
}

/// Normalizes a mapping filename for lookup.
///
/// The kernel mapping is named e.g. `[kernel.kallsyms]_text` while its
/// build-ID record uses plain `[kernel.kallsyms]`. Returns the normalized
/// name and whether it refers to the kernel.
pub fn normalize_filename(filename: &str) -> (&str, bool) {
    if filename.starts_with(KERNEL_NAME) {
        (KERNEL_NAME, true)
    } else {
        (filename, false)
    }
}

/// Loads image tables from a path.
///
/// This is the seam between lookup policy and file access.
pub trait ImageLoader: Send + Sync {
    /// Loads the function and line tables of an ELF image.
    fn load_image(&self, path: &Path) -> image::Result<ImageTable>;

    /// Loads a kernel symbol table in kallsyms format.
    fn load_kallsyms(&self, path: &Path) -> image::Result<ImageTable>;
}

/// [`ImageLoader`] reading from the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl ImageLoader for FsLoader {
    fn load_image(&self, path: &Path) -> image::Result<ImageTable> {
        ImageTable::load(path)
    }

    fn load_kallsyms(&self, path: &Path) -> image::Result<ImageTable> {
        ImageTable::from_kallsyms(path)
    }
}

/// Resolves filenames to loaded image tables.
pub struct Locator {
    config: Config,
    build_ids: Vec<BuildIdRecord>,
    loader: Box<dyn ImageLoader>,
}

impl Locator {
    /// Creates a locator searching the given build-ID records.
    pub fn new(config: Config, build_ids: Vec<BuildIdRecord>) -> Self {
        Self {
            config,
            build_ids,
            loader: Box::new(FsLoader),
        }
    }

    /// Replaces the loader used to read images.
    pub fn set_loader(&mut self, loader: Box<dyn ImageLoader>) {
        self.loader = loader;
    }

    /// Finds and loads the image for `filename`.
    ///
    /// Tries every build-ID cache entry recorded for the file, then the
    /// filename itself. Returns [`None`] if nothing could be loaded.
    pub fn locate(&self, filename: &str) -> Option<ImageTable> {
        let (name, is_kernel) = normalize_filename(filename);

        for record in self.build_ids.iter().filter(|x| x.filename == name) {
            let Some(mut path) = self.config.build_id_path(&record.build_id) else {
                log::debug!("{name}: ignoring empty build ID record");
                continue;
            };

            // Newer perf versions store a directory per build ID.
            if path.is_dir() {
                path.push(if is_kernel { "kallsyms" } else { "elf" });
            }

            let result = if is_kernel {
                self.loader.load_kallsyms(&path)
            } else {
                self.loader
                    .load_image(&path)
                    .and_then(|table| verify_build_id(table, &record.build_id))
            };

            match result {
                Ok(table) => {
                    log::trace!("{name}: loaded from build-ID cache {}", path.display());
                    return Some(table);
                }
                Err(e) => log::debug!("{name}: build-ID cache miss at {}: {e}", path.display()),
            }
        }

        match self.loader.load_image(Path::new(name)) {
            Ok(table) => Some(table),
            Err(e) => {
                log::warn!("{name}: no usable image found: {e}");
                None
            }
        }
    }
}

/// Rejects images whose build ID doesn't match the recorded one.
///
/// Images without a build ID note are accepted.
fn verify_build_id(table: ImageTable, expected: &BuildId) -> image::Result<ImageTable> {
    match &table.build_id {
        Some(found) if found != expected => Err(image::Error::BuildIdMismatch {
            expected: expected.clone(),
            found: found.clone(),
        }),
        _ => Ok(table),
    }
}
