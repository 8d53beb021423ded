// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Extraction of function and line tables from executable images.
//!
//! [`ImageTable::load`] picks the best available symbol source of an ELF
//! image: DWARF for position-dependent executables with debug info and the
//! ELF symbol tables otherwise. Kernel images are handled separately via
//! [`ImageTable::from_kallsyms`].

use crate::dwarf;
use crate::functab::{FuncRange, FuncTable};
use crate::kallsyms;
use crate::linetab::{LineEntry, LineTable};
use crate::locator::BuildId;
use crate::objfile::{self, ObjectKind, SymbolSource};
use fallible_iterator::FallibleIterator;
use std::io;
use std::path::Path;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur while loading an image.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("objfile error: {0}")]
    Objfile(#[from] objfile::Error),

    #[error("DWARF error: {0}")]
    Dwarf(#[from] dwarf::Error),

    #[error("failed to read kernel symbols: {0}")]
    Kallsyms(#[source] io::Error),

    #[error("build ID mismatch: expected {expected}, found {found}")]
    BuildIdMismatch { expected: BuildId, found: BuildId },
}

/// Counters collected while loading an image.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Number of DWARF units that were decoded.
    pub units: usize,
    /// Number of DWARF units that couldn't be read (fully or partially).
    pub failed_units: usize,
    /// Number of function ranges in the final table.
    pub funcs: usize,
    /// Number of subprograms skipped due to missing name or code range.
    pub skipped_funcs: usize,
    /// Number of rows in the final line table.
    pub line_rows: usize,
    /// Whether line table decoding stopped early due to an error.
    pub line_table_truncated: bool,
}

/// Symbol tables of one image.
#[derive(Debug, Default)]
pub struct ImageTable {
    /// Function ranges.
    ///
    /// Addresses are file offsets if [`Self::is_file_offset`] is set and
    /// virtual addresses otherwise.
    pub functab: FuncTable,

    /// Source line rows. Always addressed by virtual address.
    pub linetab: LineTable,

    /// Whether [`Self::functab`] is addressed by file offset.
    pub is_file_offset: bool,

    /// GNU build ID of the image, if it has one.
    pub build_id: Option<BuildId>,
}

impl ImageTable {
    /// Loads the tables of the ELF image at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_stats(path).map(|(table, _)| table)
    }

    /// Like [`Self::load`], but also reports loading statistics.
    pub fn load_with_stats(path: &Path) -> Result<(Self, Stats)> {
        let file = objfile::File::load(path)?;
        let obj = file.parse()?;
        let mut stats = Stats::default();

        let build_id = match obj.build_id() {
            Ok(id) => id.map(BuildId::new),
            Err(e) => {
                log::debug!("{}: unreadable build ID note: {e}", path.display());
                None
            }
        };

        let (functab, linetab, is_file_offset) = match obj.kind() {
            ObjectKind::Executable if obj.has_debug_info() => {
                let (functab, linetab) = load_dwarf(&obj, &mut stats)?;
                (functab, linetab, false)
            }
            ObjectKind::Executable => (load_symbols(&obj, false), LineTable::default(), false),
            ObjectKind::Dynamic => (load_symbols(&obj, true), LineTable::default(), true),
            ObjectKind::Relocatable | ObjectKind::Other => {
                log::debug!("{}: unsupported object kind", path.display());
                Default::default()
            }
        };

        stats.funcs = functab.len();
        stats.line_rows = linetab.len();
        log::trace!("{}: loaded {stats:?}", path.display());

        let table = ImageTable {
            functab,
            linetab,
            is_file_offset,
            build_id,
        };

        Ok((table, stats))
    }

    /// Loads a kernel symbol table in kallsyms format.
    pub fn from_kallsyms(path: &Path) -> Result<Self> {
        Ok(Self {
            functab: kallsyms::load(path).map_err(Error::Kallsyms)?,
            ..Self::default()
        })
    }
}

/// Builds function and line tables from DWARF.
///
/// Failing units are skipped. A failure while decoding line rows ends line
/// table construction, keeping the rows of all fully decoded units.
fn load_dwarf(obj: &objfile::Reader<'_>, stats: &mut Stats) -> Result<(FuncTable, LineTable)> {
    let sections = dwarf::Sections::load(obj)?;
    let units = sections.units()?;

    let mut funcs = Vec::new();
    let mut lines = Vec::new();

    let mut unit_iter = units.iter();
    loop {
        let unit = match unit_iter.next() {
            Ok(Some(unit)) => unit,
            Ok(None) => break,
            Err(e) => {
                log::debug!("Skipping unreadable unit: {e}");
                stats.failed_units += 1;
                continue;
            }
        };

        stats.units += 1;

        if let Err(e) = collect_funcs(&unit, &mut funcs, stats) {
            log::debug!("{unit:?}: failed to read subprograms: {e}");
            stats.failed_units += 1;
        }

        if !stats.line_table_truncated {
            match collect_lines(&unit) {
                Ok(rows) => lines.extend(rows),
                Err(e) => {
                    log::debug!("{unit:?}: failed to read line table: {e}");
                    stats.line_table_truncated = true;
                }
            }
        }
    }

    Ok((FuncTable::new(funcs), LineTable::new(lines)))
}

fn collect_funcs(
    unit: &dwarf::Unit<'_, '_>,
    out: &mut Vec<FuncRange>,
    stats: &mut Stats,
) -> dwarf::Result {
    let mut iter = unit.subprograms();
    while let Some(sp) = iter.next()? {
        match sp.and_then(|sp| push_subprogram(unit, sp, out)) {
            Ok(true) => (),
            Ok(false) => stats.skipped_funcs += 1,
            Err(e) => {
                log::debug!("{unit:?}: skipping unreadable subprogram: {e}");
                stats.skipped_funcs += 1;
            }
        }
    }

    Ok(())
}

/// Appends the ranges of a subprogram, returning whether any were usable.
fn push_subprogram(
    unit: &dwarf::Unit<'_, '_>,
    mut sp: dwarf::SubprogramInfo<'_, '_>,
    out: &mut Vec<FuncRange>,
) -> dwarf::Result<bool> {
    // Linkage names are usually mangled, plain names never are.
    let (name, mangled) = match sp.linkage_name()? {
        Some(name) => (name, true),
        None => match sp.name()? {
            Some(name) => (name, false),
            None => return Ok(false),
        },
    };

    let Some(mut ranges) = sp.take_ranges() else {
        return Ok(false);
    };

    let num_funcs = out.len();
    loop {
        let rng = match ranges.next() {
            Ok(Some(rng)) => rng,
            Ok(None) => break,
            Err(e) => {
                log::debug!("{unit:?}: bad ranges for `{name}`: {e}");
                break;
            }
        };

        // Code removed by the linker keeps its debug info at address 0.
        if rng.start == 0 || rng.end < rng.start {
            continue;
        }

        out.push(if mangled {
            FuncRange::mangled(&*name, rng.start, rng.end)
        } else {
            FuncRange::plain(&*name, rng.start, rng.end)
        });
    }

    Ok(out.len() > num_funcs)
}

fn collect_lines(unit: &dwarf::Unit<'_, '_>) -> dwarf::Result<Vec<LineEntry>> {
    let Some(mut rows) = unit.line_rows() else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(LineEntry {
            address: row.address,
            file: row.file,
            line: row.line.map_or(0, |x| x.get()),
            column: row.column,
            is_stmt: row.is_stmt,
            end_sequence: row.end_sequence,
        });
    }

    Ok(out)
}

/// Builds the function table from the ELF symbol tables.
///
/// Falls back to the dynamic symbols if the regular symbol table doesn't
/// contain any functions, e.g. for stripped shared libraries. With
/// `file_offsets`, symbol values are translated into file offsets.
fn load_symbols(obj: &objfile::Reader<'_>, file_offsets: bool) -> FuncTable {
    let mut ranges = collect_symbols(obj, SymbolSource::Debug, file_offsets);
    if ranges.is_empty() {
        ranges = collect_symbols(obj, SymbolSource::Dynamic, file_offsets);
    }

    FuncTable::new(ranges)
}

fn collect_symbols(
    obj: &objfile::Reader<'_>,
    source: SymbolSource,
    file_offsets: bool,
) -> Vec<FuncRange> {
    obj.function_symbols(source)
        .filter_map(|sym| {
            let mut low = sym.virt_addr;
            if file_offsets {
                // Symbols in sections without file data can't be mapped.
                let placement = obj.section_placement(sym.section?)?;
                low = placement.file_offset_of(low);
            }

            Some(FuncRange::mangled(
                sym.name,
                low,
                low.saturating_add(sym.length),
            ))
        })
        .collect()
}
