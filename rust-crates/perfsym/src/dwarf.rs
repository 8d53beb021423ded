// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Abstraction for extracting function ranges and line rows from DWARF.
//!
//! The main type here is [`Sections`], created via [`Sections::load`].

// Compiler complains about using the gimli constants in match patterns.
#![allow(non_upper_case_globals)]

use crate::{objfile, AnyError, VirtAddr};
use fallible_iterator::FallibleIterator;
use gimli::{constants::*, AttributeValue as AV};
use lru::LruCache;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::num::{NonZeroU64, NonZeroUsize};
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;
use std::{fmt, mem, slice};

/// Shorthand for the [`gimli`] reader type that we use everywhere.
///
/// Until BE binaries come back into favor we simply hard-code LE at
/// compile time, getting rid of a ton of unnecessary branching.
type R<'dwarf> = gimli::EndianSlice<'dwarf, gimli::LittleEndian>;

/// Maximum number of compilation units to process per object file.
const MAX_COMP_UNITS: usize = 256 * 1024;

/// Maximum size of the LRU cache for decoded units.
const UNIT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(x) => x,
    None => unreachable!(),
};

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during DWARF parsing.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reader currently doesn't support big endian binaries")]
    BigEndian,

    #[error("Reference points to non-existing unit")]
    BadUnitRef,

    #[error("Reference points to invalid offset within a unit")]
    BadUnitOffset,

    #[error("Reference attribute has unexpected type")]
    BadRefAttrType,

    #[error("DIE reference chain too long")]
    DieReferenceChainTooLong,

    #[error("The input file has too many translation units")]
    UnitLimitExceeded,

    #[error("objfile error")]
    Objfile(#[from] objfile::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`gimli`] errors into ours.
///
/// We erase the type here to prevent leaking [`gimli`] library types into our
/// public interface. If code needs to special-case based on particular gimli
/// errors, we should instead lift them into custom error variants.
impl From<gimli::Error> for Error {
    fn from(e: gimli::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Collection of DWARF sections of an object file.
///
/// Sections are loaded (and decompressed, if necessary) eagerly, but all
/// DWARF decoding happens lazily via [`Units`].
pub struct Sections<'obj> {
    main: gimli::DwarfSections<Option<objfile::Section<'obj>>>,
}

impl<'obj> Sections<'obj> {
    /// Reads the DWARF sections from the given object file.
    pub fn load(obj: &objfile::Reader<'obj>) -> Result<Self> {
        if !obj.is_little_endian() {
            return Err(Error::BigEndian);
        }

        Ok(Self {
            main: gimli::DwarfSections::load(|id| obj.load_section(id.name().as_bytes()))?,
        })
    }

    /// Collect a list of all translation units in the DWARF sections.
    pub fn units(&self) -> Result<Units<'_>> {
        // Create a borrowing DWARF instance from our owned one.
        fn borrow<'a>(section: &'a Option<objfile::Section<'a>>) -> R<'a> {
            let data = match section {
                Some(x) => x,
                None => &[][..],
            };

            R::new(data, gimli::LittleEndian)
        }

        let dwarf = self.main.borrow(borrow);

        // Collect all units now. We later need this to quickly seek to
        // different units when we encounter cross-unit references.
        let headers = collect_unit_headers(&dwarf)?;

        Ok(Units {
            dwarf,
            headers,
            unit_cache: RefCell::new(LruCache::new(UNIT_CACHE_SIZE)),
        })
    }
}

/// List of all translation units in a DWARF file.
///
/// Units can contain references to each other and this object serves as an
/// index that permits efficient lookups of other units for these cases.
pub struct Units<'dwarf> {
    /// Borrowed view into the DWARF sections held in the [`Sections`] object.
    dwarf: gimli::Dwarf<R<'dwarf>>,

    /// Headers of all units, ordered by their `.debug_info` offset.
    headers: Vec<gimli::UnitHeader<R<'dwarf>>>,

    /// Cache of decoded units.
    ///
    /// This significantly reduces the need to constantly re-decode units
    /// when resolving cross-unit references.
    unit_cache: RefCell<LruCache<gimli::DebugInfoOffset, Rc<gimli::Unit<R<'dwarf>>>>>,
}

impl<'dwarf> Units<'dwarf> {
    /// Iterate over all units.
    pub fn iter<'units>(&'units self) -> UnitIter<'dwarf, 'units> {
        UnitIter {
            all: self,
            iter: self.headers.iter(),
        }
    }

    /// Number of units in the file.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether the file contains no units at all.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Locates the unit that contains the given offset into the `.debug_info` section.
    fn unit_for_offset<'units>(
        &'units self,
        offset: gimli::DebugInfoOffset,
    ) -> Result<Option<Unit<'dwarf, 'units>>> {
        let headers = &self.headers;

        let header = match headers.binary_search_by_key(&Some(offset), unit_start) {
            Ok(idx) => Some(&headers[idx]),
            Err(0) => None,
            Err(idx) => {
                let matched = &headers[idx - 1];
                unit_range(matched)
                    .filter(|rng| rng.contains(&offset))
                    .map(|_| matched)
            }
        };

        match header {
            Some(header) => self.unit_for_header(header).map(Some),
            None => Ok(None),
        }
    }

    /// Creates a new `Unit` object for the given unit header.
    fn unit_for_header<'units>(
        &'units self,
        header: &'units gimli::UnitHeader<R<'dwarf>>,
    ) -> Result<Unit<'dwarf, 'units>> {
        let mut cache = self.unit_cache.borrow_mut();
        let cache_key = unit_start(header).unwrap_or(gimli::DebugInfoOffset(usize::MAX));

        // Fast path: if we have the decoded unit cached, just return it.
        if let Some(cached) = cache.get(&cache_key) {
            return Ok(Unit {
                all: self,
                unit: cached.clone(),
            });
        }

        // Slow path: decode the unit now and cache it for the next time.
        let unit = Rc::new(self.dwarf.unit(*header)?);
        cache.put(cache_key, unit.clone());

        Ok(Unit { all: self, unit })
    }
}

/// Iterator over the translation units in a DWARF file.
///
/// Created using [`Units::iter`]. Continuing iteration on errors is well-
/// defined and guaranteed not to run into infinite loops: units with bad
/// headers will simply be skipped.
#[derive(Clone)]
pub struct UnitIter<'dwarf, 'units> {
    all: &'units Units<'dwarf>,
    iter: slice::Iter<'units, gimli::UnitHeader<R<'dwarf>>>,
}

impl<'dwarf, 'units> FallibleIterator for UnitIter<'dwarf, 'units> {
    type Item = Unit<'dwarf, 'units>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        match self.iter.next() {
            Some(header) => self.all.unit_for_header(header).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// References a translation unit in a DWARF section.
#[derive(Clone)]
pub struct Unit<'dwarf, 'units> {
    all: &'units Units<'dwarf>,
    unit: Rc<gimli::Unit<R<'dwarf>>>,
}

impl fmt::Debug for Unit<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let offs = unit_start(&self.unit.header).map_or(0, |x| x.0);
        let name = self.name().unwrap_or(Cow::Borrowed("<unnamed>"));
        write!(f, "Unit(\"{name}\" @ {offs:#08x})")
    }
}

impl<'dwarf, 'units> Unit<'dwarf, 'units> {
    fn dwarf(&self) -> &'units gimli::Dwarf<R<'dwarf>> {
        &self.all.dwarf
    }

    /// Gets the name of the translation unit.
    pub fn name(&self) -> Option<Cow<'dwarf, str>> {
        self.unit.name.map(|x| x.to_string_lossy())
    }

    /// Iterate over concrete subprograms in this translation unit.
    pub fn subprograms<'unit>(&'unit self) -> SubprogramIter<'dwarf, 'units, 'unit> {
        SubprogramIter {
            unit: self,
            die_iter: self.unit.entries(),
            next_mode: NextItemMode::Any,
        }
    }

    /// Construct an iterator over the raw rows of the line-number program.
    ///
    /// Returns [`None`] if the unit doesn't have a line program.
    pub fn line_rows(&self) -> Option<LineRowIter<'dwarf, 'units>> {
        let line_program = self.unit.line_program.as_ref()?.clone();
        Some(LineRowIter {
            unit: self.clone(),
            rows: line_program.rows(),
            files: HashMap::new(),
        })
    }

    /// Resolves the given reference value.
    ///
    /// Supports [`AV::UnitRef`] and [`AV::DebugInfoRef`].
    fn resolve_ref(
        &self,
        reference: AV<R<'dwarf>>,
    ) -> Result<(Unit<'dwarf, 'units>, gimli::UnitOffset<usize>)> {
        let offs = match reference {
            // Reference within same CU. Simple case, do early exit.
            AV::UnitRef(offs) => return Ok((self.clone(), offs)),
            AV::DebugInfoRef(offs) => offs,
            _ => return Err(Error::BadRefAttrType),
        };

        let Some(refd_unit) = self.all.unit_for_offset(offs)? else {
            return Err(Error::BadUnitRef);
        };
        let Some(offs) = offs.to_unit_offset(&refd_unit.unit.header) else {
            return Err(Error::BadUnitOffset);
        };

        Ok((refd_unit, offs))
    }

    /// Reads the full path of the given line table file.
    ///
    /// Relative paths are resolved against the compilation directory.
    fn file_path(
        &self,
        header: &gimli::LineProgramHeader<R<'dwarf>>,
        index: u64,
    ) -> Result<Option<String>> {
        let Some(file_entry) = header.file(index) else {
            return Ok(None);
        };

        let dwarf = self.dwarf();
        let name = dwarf.attr_string(&self.unit, file_entry.path_name())?;
        let name = name.to_string_lossy();
        if name.starts_with('/') {
            return Ok(Some(name.into_owned()));
        }

        let dir = match file_entry.directory(header) {
            Some(av) => Some(dwarf.attr_string(&self.unit, av)?.to_string_lossy()),
            None => None,
        };

        let comp_dir = self.unit.comp_dir.map(|x| x.to_string_lossy());
        let dir = match (dir, comp_dir) {
            (Some(dir), Some(comp_dir)) if !dir.starts_with('/') && dir != comp_dir => {
                Some(Cow::Owned(join(&comp_dir, &dir)))
            }
            (Some(dir), _) => Some(dir),
            (None, comp_dir) => comp_dir,
        };

        Ok(Some(match dir {
            Some(dir) if !dir.is_empty() => join(&dir, &name),
            _ => name.into_owned(),
        }))
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Determines how the next item is selected.
#[derive(Debug, Copy, Clone)]
enum NextItemMode {
    /// Selects whatever DIE is next (depth-first search).
    Any,

    /// Selects the next sibling.
    SkipChildren,
}

/// Iterator over the concrete subprograms in a [`Unit`].
///
/// Created via [`Unit::subprograms`]. Children of subprograms (inline
/// instances, nested functions, parameters) are skipped; records nested in
/// other scopes (namespaces, classes) are visited.
///
/// Errors of the iterator itself mean that the DIE tree can't be walked any
/// further. Each item carries its own result: a subprogram with unreadable
/// attributes or broken references doesn't affect the ones after it.
pub struct SubprogramIter<'dwarf, 'units, 'unit> {
    unit: &'unit Unit<'dwarf, 'units>,
    die_iter: gimli::EntriesCursor<'unit, 'unit, R<'dwarf>>,
    next_mode: NextItemMode,
}

impl<'dwarf, 'units, 'unit> FallibleIterator for SubprogramIter<'dwarf, 'units, 'unit> {
    type Item = Result<SubprogramInfo<'dwarf, 'units>>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        loop {
            let die = 'found_die: {
                // Reset mode and skip children if we were asked to.
                if let NextItemMode::SkipChildren =
                    mem::replace(&mut self.next_mode, NextItemMode::Any)
                {
                    if let Some(sibling) = self.die_iter.next_sibling()? {
                        break 'found_die sibling;
                    }
                    // If no sibling was found, continue normal DFS.
                }

                match self.die_iter.next_dfs()? {
                    Some(x) => x.1,
                    None => return Ok(None),
                }
            };

            // Skip irrelevant records, but not their children: they might
            // contain records that we do care about.
            if !matches!(die.tag(), DW_TAG_subprogram | DW_TAG_entry_point) {
                continue;
            }

            self.next_mode = NextItemMode::SkipChildren;

            match die_is_abstract(die) {
                Ok(true) => continue,
                Ok(false) => (),
                Err(e) => return Ok(Some(Err(e))),
            }

            return Ok(Some(SubprogramInfo::from_die(self.unit.clone(), die)));
        }
    }
}

/// Names and code ranges of a concrete subprogram.
pub struct SubprogramInfo<'dwarf, 'units> {
    name: Option<UnitAV<'dwarf, 'units>>,
    link_name: Option<UnitAV<'dwarf, 'units>>,
    die_ranges: Option<gimli::RangeIter<R<'dwarf>>>,
}

impl fmt::Debug for SubprogramInfo<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubprogramInfo(name = {:?})", self.name())
    }
}

impl<'dwarf, 'units> SubprogramInfo<'dwarf, 'units> {
    /// Merge this instance with another, preferring entries from `self`.
    fn merge_from(&mut self, other: Self) {
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.link_name.is_none() {
            self.link_name = other.link_name;
        }
    }

    fn from_die(
        unit: Unit<'dwarf, 'units>,
        die: &gimli::DebuggingInformationEntry<'_, '_, R<'dwarf>>,
    ) -> Result<Self> {
        let mut info = Self::names_from_die(unit.clone(), die, 0)?;

        // A bad range list only invalidates this one entry.
        info.die_ranges = match unit.dwarf().die_ranges(&unit.unit, die) {
            Ok(ranges) => Some(ranges),
            Err(e) => {
                log::debug!("{unit:?}: unreadable subprogram ranges: {e}");
                None
            }
        };

        Ok(info)
    }

    fn names_from_die(
        unit: Unit<'dwarf, 'units>,
        die: &gimli::DebuggingInformationEntry<'_, '_, R<'dwarf>>,
        recursion_depth: usize,
    ) -> Result<Self> {
        // Abstract origins and specifications may in theory form loops.
        if recursion_depth > 4 {
            return Err(Error::DieReferenceChainTooLong);
        }

        // Iterate the attributes and pick what we need. This is faster than
        // calling `attr_value` for each attribute since this would internally
        // loop over all attributes for each call.
        let mut name = None;
        let mut link_name = None;
        let mut abstract_origin = None;
        let mut spec = None;
        let mut attrs = die.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                DW_AT_name => name = Some(UnitAV(unit.clone(), attr.value())),
                DW_AT_linkage_name | DW_AT_MIPS_linkage_name => {
                    link_name = Some(UnitAV(unit.clone(), attr.value()))
                }
                DW_AT_abstract_origin => abstract_origin = Some(attr.value()),
                DW_AT_specification => spec = Some(attr.value()),
                _ => (),
            }
        }

        let mut info = SubprogramInfo {
            name,
            link_name,
            die_ranges: None,
        };

        // `merge_from` prefers properties from `self`, making sure that we
        // use the most concrete information for our current DIE.
        for ref_attr in abstract_origin.into_iter().chain(spec) {
            let (refd_unit, refd_offs) = unit.resolve_ref(ref_attr)?;
            let refd_die = refd_unit.unit.entry(refd_offs)?;
            info.merge_from(Self::names_from_die(
                refd_unit.clone(),
                &refd_die,
                recursion_depth + 1,
            )?);
        }

        Ok(info)
    }

    /// Reads the plain (source-level) name of this function.
    pub fn name(&self) -> Result<Option<Cow<'dwarf, str>>> {
        read_name(self.name.as_ref())
    }

    /// Reads the linkage (symbol) name of this function. Usually mangled.
    pub fn linkage_name(&self) -> Result<Option<Cow<'dwarf, str>>> {
        read_name(self.link_name.as_ref())
    }

    /// Destructively retrieve the DIE ranges for this routine.
    ///
    /// This consumes the range iterator on the first call, causing the next
    /// [`Self::take_ranges`] call to return [`None`]. This is a quirk that is
    /// required to work around gimli's DIE range iterator not implementing
    /// [`Clone`].
    pub fn take_ranges(&mut self) -> Option<RangeIter<'dwarf>> {
        self.die_ranges.take().map(RangeIter)
    }
}

fn read_name<'dwarf>(av: Option<&UnitAV<'dwarf, '_>>) -> Result<Option<Cow<'dwarf, str>>> {
    let Some(UnitAV(unit, av)) = av else {
        return Ok(None);
    };

    let x = unit.dwarf().attr_string(&unit.unit, *av)?;
    Ok(Some(x.to_string_lossy()))
}

/// Iterator yielding the PC ranges of a subroutine.
///
/// Thin wrapper around the corresponding gimli type to prevent leaking gimli
/// types into the public interface of this module.
pub struct RangeIter<'dwarf>(gimli::RangeIter<R<'dwarf>>);

impl<'dwarf> FallibleIterator for RangeIter<'dwarf> {
    type Item = Range<VirtAddr>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.0.next()?.map(|x| x.begin..x.end))
    }
}

/// Single row of a line-number program, as emitted by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    /// Address of the first instruction of the row.
    pub address: VirtAddr,
    /// Full path of the source file, if the row references a valid file.
    pub file: Option<Arc<str>>,
    /// Line number within the source file, starting at `1`.
    pub line: Option<NonZeroU64>,
    /// Column within the line, `0` for the left edge.
    pub column: u64,
    /// Whether this row is a recommended breakpoint location.
    pub is_stmt: bool,
    /// Whether this row marks the first byte after a sequence.
    pub end_sequence: bool,
}

/// Iterator yielding the raw rows of a unit's line-number program.
///
/// Constructed via [`Unit::line_rows`]. File paths are resolved once per
/// file index and shared between rows.
pub struct LineRowIter<'dwarf, 'units> {
    unit: Unit<'dwarf, 'units>,
    rows: gimli::LineRows<R<'dwarf>, gimli::IncompleteLineProgram<R<'dwarf>>>,
    files: HashMap<u64, Option<Arc<str>>>,
}

impl<'dwarf, 'units> FallibleIterator for LineRowIter<'dwarf, 'units> {
    type Item = LineRow;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        let Some((header, row)) = self.rows.next_row()? else {
            return Ok(None);
        };

        let file = match self.files.get(&row.file_index()) {
            Some(file) => file.clone(),
            None => {
                let file: Option<Arc<str>> = self
                    .unit
                    .file_path(header, row.file_index())?
                    .map(Into::into);
                if file.is_none() {
                    log::debug!("{:?}: invalid file index {}", self.unit, row.file_index());
                }
                self.files.insert(row.file_index(), file.clone());
                file
            }
        };

        let column = match row.column() {
            gimli::ColumnType::LeftEdge => 0,
            gimli::ColumnType::Column(x) => x.get(),
        };

        Ok(Some(LineRow {
            address: row.address(),
            file,
            line: row.line(),
            column,
            is_stmt: row.is_stmt(),
            end_sequence: row.end_sequence(),
        }))
    }
}

/// Pair of an attribute value and the corresponding unit.
struct UnitAV<'dwarf, 'units>(Unit<'dwarf, 'units>, AV<R<'dwarf>>);

/// Start offset of a unit in `.debug_info`.
///
/// [`None`] for units living in `.debug_types`, which we never collect.
fn unit_start(unit: &gimli::UnitHeader<R<'_>>) -> Option<gimli::DebugInfoOffset> {
    unit.offset().as_debug_info_offset()
}

/// Constructs the offset [`Range`] for a unit.
fn unit_range(unit: &gimli::UnitHeader<R<'_>>) -> Option<Range<gimli::DebugInfoOffset>> {
    let start = unit_start(unit)?;
    let end = gimli::DebugInfoOffset(start.0 + unit.length_including_self());
    Some(start..end)
}

/// Inspect the given DIE and determine whether it is an abstract record
/// that doesn't actually describe a location in the executable by itself.
fn die_is_abstract(die: &gimli::DebuggingInformationEntry<'_, '_, R<'_>>) -> Result<bool> {
    let mut attrs = die.attrs();
    while let Some(attr) = attrs.next()? {
        match attr.name() {
            // DWARF 5 [3.3.8.1]:
            // > Any subroutine entry that contains a DW_AT_inline attribute
            // > whose value is other than DW_INL_not_inlined is known as an
            // > abstract instance root.
            DW_AT_inline => match attr.value() {
                AV::Inline(DW_INL_not_inlined) => (),
                AV::Inline(_) => return Ok(true),
                _ => (),
            },

            // DWARF 5 [2.13.1]:
            // > A debugging information entry that represents a non-defining or
            // > otherwise incomplete declaration of a program entity has a
            // > DW_AT_declaration attribute, which is a flag.
            DW_AT_declaration => {
                if let AV::Flag(true) = attr.value() {
                    return Ok(true);
                }
            }

            _ => (),
        }
    }

    Ok(false)
}

/// Collect list of all unit headers in a DWARF file.
fn collect_unit_headers<'obj>(
    dwarf: &gimli::Dwarf<R<'obj>>,
) -> Result<Vec<gimli::UnitHeader<R<'obj>>>> {
    let mut unit_iter = dwarf.units().enumerate();
    let mut units = Vec::with_capacity(unit_iter.size_hint().0);

    while let Some((i, unit)) = unit_iter.next()? {
        if i >= MAX_COMP_UNITS {
            return Err(Error::UnitLimitExceeded);
        }

        units.push(unit);
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::dwarfgen::{self, CompUnit, Func, Sequence};
    use crate::tests::elfgen::ElfBuilder;
    use crate::tests::TempDir;

    fn two_unit_exe(dir: &TempDir) -> std::path::PathBuf {
        let dwarf = dwarfgen::encode(&[
            CompUnit {
                name: "main.c",
                comp_dir: "/src",
                funcs: vec![
                    Func::Defined {
                        name: "main",
                        linkage_name: None,
                        low: 0x1000,
                        high: 0x1020,
                    },
                    Func::Declaration { name: "puts" },
                    Func::Defined {
                        name: "helper",
                        linkage_name: Some("_Z6helperv"),
                        low: 0x1020,
                        high: 0x1030,
                    },
                ],
                sequences: vec![Sequence {
                    rows: vec![(0x1000, 3), (0x1008, 4), (0x1020, 9)],
                    end: 0x1030,
                }],
            },
            CompUnit {
                name: "util.c",
                comp_dir: "/src",
                funcs: vec![Func::Defined {
                    name: "util",
                    linkage_name: None,
                    low: 0x2000,
                    high: 0x2004,
                }],
                sequences: vec![Sequence {
                    rows: vec![(0x2000, 12)],
                    end: 0x2004,
                }],
            },
        ]);

        let mut elf = ElfBuilder::new(object::elf::ET_EXEC);
        elf.section(".text", 0x1000, 0x1000, vec![0xCC; 0x1100]);
        elf.dwarf(&dwarf);
        dir.write("exe", &elf.build())
    }

    #[test]
    fn subprograms() {
        let dir = TempDir::new();
        let obj = objfile::File::load(&two_unit_exe(&dir)).unwrap();
        let obj = obj.parse().unwrap();

        let dwarf = Sections::load(&obj).unwrap();
        let units = dwarf.units().unwrap();
        assert_eq!(units.len(), 2);

        let mut unit_iter = units.iter();
        let main_c = unit_iter.next().unwrap().unwrap();
        assert_eq!(main_c.name().unwrap(), "main.c");

        let mut sp_iter = main_c.subprograms();

        let mut main = sp_iter.next().unwrap().unwrap().unwrap();
        assert_eq!(main.name().unwrap().unwrap(), "main");
        assert!(main.linkage_name().unwrap().is_none());
        let rng: Vec<_> = main.take_ranges().unwrap().collect().unwrap();
        assert_eq!(rng, [0x1000..0x1020]);
        assert!(main.take_ranges().is_none());

        // `puts` is skipped due to `DW_AT_declaration`.

        let helper = sp_iter.next().unwrap().unwrap().unwrap();
        assert_eq!(helper.name().unwrap().unwrap(), "helper");
        assert_eq!(helper.linkage_name().unwrap().unwrap(), "_Z6helperv");

        assert!(sp_iter.next().unwrap().is_none());

        let util_c = unit_iter.next().unwrap().unwrap();
        assert_eq!(util_c.name().unwrap(), "util.c");
        let mut util = util_c.subprograms().next().unwrap().unwrap().unwrap();
        let rng: Vec<_> = util.take_ranges().unwrap().collect().unwrap();
        assert_eq!(rng, [0x2000..0x2004]);

        assert!(unit_iter.next().unwrap().is_none());
    }

    #[test]
    fn line_rows() {
        let dir = TempDir::new();
        let obj = objfile::File::load(&two_unit_exe(&dir)).unwrap();
        let obj = obj.parse().unwrap();

        let dwarf = Sections::load(&obj).unwrap();
        let units = dwarf.units().unwrap();
        let main_c = units.iter().next().unwrap().unwrap();

        let rows: Vec<_> = main_c.line_rows().unwrap().collect().unwrap();
        let summary: Vec<_> = rows
            .iter()
            .map(|x| (x.address, x.line.map_or(0, NonZeroU64::get), x.end_sequence))
            .collect();
        assert_eq!(
            summary,
            [
                (0x1000, 3, false),
                (0x1008, 4, false),
                (0x1020, 9, false),
                (0x1030, 9, true),
            ]
        );

        for row in &rows {
            assert!(row.file.as_deref().unwrap().ends_with("main.c"));
            assert!(row.is_stmt);
            assert_eq!(row.column, 0);
        }

        // Paths are shared between rows of the same file.
        assert!(Arc::ptr_eq(
            rows[0].file.as_ref().unwrap(),
            rows[3].file.as_ref().unwrap()
        ));
    }

    #[test]
    fn no_debug_info() {
        let dir = TempDir::new();
        let mut elf = ElfBuilder::new(object::elf::ET_EXEC);
        elf.section(".text", 0x1000, 0x1000, vec![0xCC; 0x10]);
        let path = dir.write("exe", &elf.build());

        let obj = objfile::File::load(&path).unwrap();
        let obj = obj.parse().unwrap();
        let dwarf = Sections::load(&obj).unwrap();
        let units = dwarf.units().unwrap();
        assert!(units.is_empty());
        assert!(units.iter().next().unwrap().is_none());
    }
}
