// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Resolution of sampled instruction pointers to functions and lines.

use crate::cache::ImageCache;
use crate::demangle::{Demangle, Demangler};
use crate::linetab::LineEntry;
use crate::locator::{BuildIdRecord, ImageLoader, Locator};
use crate::{Config, VirtAddr};

/// Memory mapping of a file into a profiled process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Path of the mapped file as recorded by perf.
    pub filename: String,
    /// Virtual address the mapping starts at.
    pub addr: VirtAddr,
    /// Offset in the file corresponding to [`Self::addr`].
    pub file_offset: u64,
}

/// Symbolic location of an instruction pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbolic {
    /// Demangled function name. Empty if no function matched.
    pub func_name: String,
    /// Source line. [`LineEntry::default`] if no line matched.
    pub line: LineEntry,
}

impl Symbolic {
    /// The function name, if a function matched.
    pub fn function(&self) -> Option<&str> {
        Some(self.func_name.as_str()).filter(|x| !x.is_empty())
    }

    /// The source line, if a line matched.
    pub fn line(&self) -> Option<&LineEntry> {
        Some(&self.line).filter(|x| **x != LineEntry::default())
    }
}

/// Symbolizes samples of one profiling session.
///
/// Images are loaded on first use and kept for the lifetime of the
/// symbolizer.
pub struct Symbolizer {
    cache: ImageCache,
    demangler: Box<dyn Demangle>,
}

impl Symbolizer {
    /// Creates a symbolizer for a session with the given build-ID records.
    pub fn new(config: Config, build_ids: Vec<BuildIdRecord>) -> Self {
        Self {
            cache: ImageCache::new(Locator::new(config, build_ids)),
            demangler: Box::new(Demangler),
        }
    }

    /// Replaces the loader used to read images.
    pub fn with_loader(mut self, loader: impl ImageLoader + 'static) -> Self {
        self.cache.locator_mut().set_loader(Box::new(loader));
        self
    }

    /// Replaces the demangler applied to function names.
    pub fn with_demangler(mut self, demangler: impl Demangle + 'static) -> Self {
        self.demangler = Box::new(demangler);
        self
    }

    /// The cache of loaded images.
    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Resolves `ip`, sampled within `mapping`.
    ///
    /// Returns [`None`] if no image could be found for the mapping. If the
    /// image was found but doesn't cover `ip`, the result has an empty
    /// function name and a default line.
    pub fn symbolize(&self, mapping: &Mapping, ip: VirtAddr) -> Option<Symbolic> {
        let table = self.cache.get(&mapping.filename)?;

        // Function ranges of position-independent images are file offsets.
        let func_ip = if table.is_file_offset {
            ip.wrapping_sub(mapping.addr)
                .wrapping_add(mapping.file_offset)
        } else {
            ip
        };

        let func_name = table
            .functab
            .lookup(func_ip)
            .map(|func| func.name(&*self.demangler).to_owned())
            .unwrap_or_default();

        let line = table.linetab.lookup(ip).cloned().unwrap_or_default();

        Some(Symbolic { func_name, line })
    }
}
