// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped access to ELF images.

use crate::{AnyError, VirtAddr};

use std::io::Read as _;
use std::{fmt, fs, io, ops, path};

use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapMut};
use object::{CompressionFormat, Object as _, ObjectSection as _, ObjectSymbol as _};
use zstd::stream::read::Decoder as ZstdDecoder;

/// Maximum size of an individual object section to keep in memory.
///
/// All sections where the decompressed representation is larger than this
/// constant are instead read into anonymous temporary files and  `mmap`ed.
const SWAP_THRESH: usize = 16 * 1024 * 1024;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during object file parsing.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Sections are compressed in an unsupported format")]
    UnsupportedCompressionFormat,

    #[error("Object file is too big to be loaded")]
    FileTooBig,

    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`object`] errors into ours, with type erasure.
///
/// We erase the type here to prevent leaking [`object`] library types into our
/// public interface. If code needs to special-case based on particular [`object`]
/// errors, we should instead lift them into custom error variants.
impl From<object::Error> for Error {
    fn from(e: object::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Maps an ELF image into memory.
///
/// The mapping lives as long as this object: drop it to unmap and close the
/// file.
pub struct File(Mmap);

impl File {
    /// Map the file at the given path into memory.
    pub fn load(path: &path::Path) -> Result<Self> {
        Self::load_file(&fs::File::open(path)?)
    }

    /// Map the given file into memory.
    pub fn load_file(file: &fs::File) -> Result<Self> {
        Ok(Self(unsafe { Mmap::map(file)? }))
    }

    /// Parse the header and create a reader.
    pub fn parse(&self) -> Result<Reader<'_>> {
        Ok(Reader(object::File::parse(&self.0[..])?))
    }
}

/// Kind of object file, as far as symbolization cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Fully linked, position-dependent executable (`ET_EXEC`).
    Executable,

    /// Shared object or position-independent executable (`ET_DYN`).
    Dynamic,

    /// Relocatable object file (`ET_REL`).
    Relocatable,

    /// Core dumps and anything we don't recognize.
    Other,
}

/// Provides read access to the data in an object file.
///
/// Created via [`File::parse`].
pub struct Reader<'obj>(object::File<'obj>);

impl<'obj> Reader<'obj> {
    /// Loads the section with the given name into memory.
    ///
    /// Depending on whether the section is compressed in the input file or not,
    /// this can be an expensive operation. Callers should store and retrieve
    /// the returned instance if it is needed more than once.
    ///
    /// Requests for `.debug_*` sections fall back to the legacy GNU
    /// `.zdebug_*` variant if the plain one is missing.
    pub fn load_section(&self, name: &[u8]) -> Result<Option<Section<'obj>>> {
        let obj_sec = match self.0.section_by_name_bytes(name) {
            Some(sec) => sec,
            None => match name.strip_prefix(b".debug_") {
                Some(suffix) => {
                    let zname = [&b".zdebug_"[..], suffix].concat();
                    let Some(sec) = self.0.section_by_name_bytes(&zname) else {
                        return Ok(None);
                    };
                    sec
                }
                None => return Ok(None),
            },
        };

        Section::load_from_obj_section(&obj_sec).map(Some)
    }

    /// Checks whether a section with the given name exists, without loading it.
    pub fn has_section(&self, name: &[u8]) -> bool {
        self.0.section_by_name_bytes(name).is_some()
    }

    /// Checks whether the file carries DWARF debug info, compressed or not.
    pub fn has_debug_info(&self) -> bool {
        self.has_section(b".debug_info") || self.has_section(b".zdebug_info")
    }

    /// Checks whether this file has little-endian byte-order.
    pub fn is_little_endian(&self) -> bool {
        self.0.is_little_endian()
    }

    /// Returns the kind of object file.
    pub fn kind(&self) -> ObjectKind {
        match self.0.kind() {
            object::ObjectKind::Executable => ObjectKind::Executable,
            object::ObjectKind::Dynamic => ObjectKind::Dynamic,
            object::ObjectKind::Relocatable => ObjectKind::Relocatable,
            _ => ObjectKind::Other,
        }
    }

    /// Reads the GNU build ID note, if present.
    pub fn build_id(&self) -> Result<Option<&'obj [u8]>> {
        Ok(self.0.build_id()?)
    }

    /// Iterate over defined function symbols in this executable.
    ///
    /// Unlike symbol values, which are virtual addresses, the returned
    /// [`Symbol::section`] allows translating them into file offsets via
    /// [`Self::section_placement`].
    pub fn function_symbols(&self, source: SymbolSource) -> impl Iterator<Item = Symbol<'_>> {
        let iter = match source {
            SymbolSource::Debug => self.0.symbols(),
            SymbolSource::Dynamic => self.0.dynamic_symbols(),
        };

        iter.filter(|x| x.kind() == object::SymbolKind::Text)
            .filter(|x| !x.is_undefined())
            .filter_map(|x| {
                Some(Symbol {
                    name: x.name().ok()?, // just skip non-utf8 symbols
                    virt_addr: x.address(),
                    length: x.size(),
                    section: x.section_index().map(|idx| idx.0),
                })
            })
    }

    /// Returns the virtual address and the file offset of the given section.
    ///
    /// Returns [`None`] for unknown indices and for sections without data in
    /// the file (e.g. `.bss`).
    pub fn section_placement(&self, index: usize) -> Option<SectionPlacement> {
        let sec = self.0.section_by_index(object::SectionIndex(index)).ok()?;
        let (file_offset, _) = sec.file_range()?;
        Some(SectionPlacement {
            virt_addr: sec.address(),
            file_offset,
        })
    }
}

/// Location of a section in memory and in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPlacement {
    /// Virtual address of the first byte of the section.
    pub virt_addr: VirtAddr,
    /// Offset of the first byte of the section within the file.
    pub file_offset: u64,
}

impl SectionPlacement {
    /// Translates a virtual address within this section to a file offset.
    pub fn file_offset_of(&self, addr: VirtAddr) -> u64 {
        addr.wrapping_sub(self.virt_addr)
            .wrapping_add(self.file_offset)
    }
}

/// Information and raw data of an object file section.
#[derive(Debug)]
pub struct Section<'obj> {
    data: SectionData<'obj>,
}

impl<'obj> Section<'obj> {
    /// Construction from an [`object::Section`].
    fn load_from_obj_section(obj_sec: &object::Section<'obj, '_>) -> Result<Self> {
        Ok(Section {
            data: SectionData::load_from_obj_sec(obj_sec)?,
        })
    }
}

/// Allow using section objects where slices are expected.
impl<'obj> ops::Deref for Section<'obj> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.data {
            SectionData::Borrowed(x) => x,
            SectionData::InMemory(x) => &x[..],
            SectionData::Swapped(x) => &x[..],
        }
    }
}

/// Storage for object file sections.
pub enum SectionData<'obj> {
    /// Section was uncompressed in the input file and we simply kept a ref.
    Borrowed(&'obj [u8]),

    /// Section was originally compressed and we decompressed it into memory.
    InMemory(Vec<u8>),

    /// Section was originally compressed and we decompressed it into a
    /// memory-mapped temporary file.
    Swapped(MmapMut),
}

impl<'obj> SectionData<'obj> {
    /// Creates a variant of the [`SectionData`] enum most appropriate for the
    /// given size.
    fn read_smart(final_size: usize, mut reader: impl io::Read) -> Result<Self> {
        if final_size >= SWAP_THRESH {
            let mut file = tempfile::tempfile()?;
            io::copy(&mut reader, &mut file)?;
            let mmap = unsafe { MmapMut::map_mut(&file)? };
            Ok(SectionData::Swapped(mmap))
        } else {
            let mut mem_buf = Vec::with_capacity(final_size);
            reader.read_to_end(&mut mem_buf)?;
            Ok(SectionData::InMemory(mem_buf))
        }
    }

    /// Load the data from the given [`object::Section`].
    ///
    /// Handles both `SHF_COMPRESSED` sections and legacy `.zdebug_*` ones.
    fn load_from_obj_sec(sec: &object::Section<'obj, '_>) -> Result<Self> {
        let data = sec.compressed_data()?;

        // Ensure that the file fits into memory.
        let final_size: usize = data
            .uncompressed_size
            .try_into()
            .map_err(|_| Error::FileTooBig)?;

        let decoder: Box<dyn io::Read> = match data.format {
            CompressionFormat::Zlib => Box::new(ZlibDecoder::new(data.data)),
            CompressionFormat::Zstandard => Box::new(ZstdDecoder::new(data.data)?),
            CompressionFormat::None => return Ok(SectionData::Borrowed(data.data)),
            _ => return Err(Error::UnsupportedCompressionFormat),
        };

        let decoder = decoder.take(final_size as u64);
        Self::read_smart(final_size, decoder)
    }
}

impl<'obj> fmt::Debug for SectionData<'obj> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (storage, len) = match self {
            Self::Borrowed(x) => ("borrowed", x.len()),
            Self::InMemory(x) => ("in-memory", x.len()),
            Self::Swapped(x) => ("mmapped", x.len()),
        };

        write!(f, "SectionData([{} bytes, {}])", len, storage)
    }
}

/// Specifies an object symbol source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolSource {
    /// Debug symbol table (`.symtab`).
    Debug,

    /// Dynamic symbol table (`.dynsym`).
    Dynamic,
}

/// Basic executable function symbol.
#[derive(Debug, Clone)]
pub struct Symbol<'a> {
    /// Function name. Might be mangled.
    pub name: &'a str,
    /// Start address of the function (`st_value`).
    pub virt_addr: VirtAddr,
    /// Length of the function. Zero if unknown.
    pub length: u64,
    /// Index of the section that defines the symbol, if any.
    pub section: Option<usize>,
}
