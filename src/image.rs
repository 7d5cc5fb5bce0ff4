//! In-memory ELF image model.
//!
//! An [`Image`] is a flat, owned view of an ELF file: the identification and
//! file-header fields, the section table and the program headers. It is the
//! shared currency of the clone and patch pipelines. Reading is done through
//! `object::read::elf` (see [`reader`]), writing through
//! `object::write::elf::Writer` (see [`crate::writer`]).
//!
//! Section indices follow the ELF convention: index 0 is the implicit null
//! section and is never stored, so `sections[i]` has index `i + 1`.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use object::elf;
use object::Endianness;

pub mod reader;
pub mod symbols;
pub mod validate;

/// Index of a section within one image's section table.
///
/// Indices of different images live in distinct index spaces; translating
/// between them is the job of [`crate::index_map::IndexMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionIndex(pub u32);

impl SectionIndex {
    /// The null section, used as "no section" / "no link".
    pub const NULL: SectionIndex = SectionIndex(0);
}

/// A section or symbol name as stored in a string table.
///
/// ELF names are NUL-terminated byte strings with no required encoding, so
/// the bytes are kept as read and only decoded (lossily) for display.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Vec<u8>);

impl Name {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl Deref for Name {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Name {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Name {
    fn from(bytes: Vec<u8>) -> Self {
        Name(bytes)
    }
}

impl From<&[u8]> for Name {
    fn from(bytes: &[u8]) -> Self {
        Name(bytes.to_vec())
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Self {
        Name(name.as_bytes().to_vec())
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// Classification of a section by its `sh_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Null,
    /// `SHT_PROGBITS`
    ProgramData,
    /// `SHT_NOBITS`
    ZeroFill,
    StringTable,
    SymbolTable,
    DynamicSymbolTable,
    /// `SHT_REL` and `SHT_RELA`
    Relocation,
    /// Dynamic linking metadata: `.dynamic`, hash tables and symbol versioning.
    Dynamic,
    Other(u32),
}

impl SectionKind {
    pub fn from_type(sh_type: u32) -> Self {
        match sh_type {
            elf::SHT_NULL => SectionKind::Null,
            elf::SHT_PROGBITS => SectionKind::ProgramData,
            elf::SHT_NOBITS => SectionKind::ZeroFill,
            elf::SHT_STRTAB => SectionKind::StringTable,
            elf::SHT_SYMTAB => SectionKind::SymbolTable,
            elf::SHT_DYNSYM => SectionKind::DynamicSymbolTable,
            elf::SHT_REL | elf::SHT_RELA => SectionKind::Relocation,
            elf::SHT_DYNAMIC
            | elf::SHT_HASH
            | elf::SHT_GNU_HASH
            | elf::SHT_GNU_VERSYM
            | elf::SHT_GNU_VERDEF
            | elf::SHT_GNU_VERNEED => SectionKind::Dynamic,
            other => SectionKind::Other(other),
        }
    }
}

/// Whole-image metadata carried in the ELF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub is_64: bool,
    pub endian: Endianness,
    pub os_abi: u8,
    pub abi_version: u8,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: u64,
    pub e_flags: u32,
}

/// A section of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub index: SectionIndex,
    pub name: Name,
    pub sh_type: u32,
    pub flags: u64,
    /// Section index of a related section, or an unused zero, depending on type.
    pub link: u32,
    pub info: u32,
    pub addr_align: u64,
    pub entry_size: u64,
    pub addr: u64,
    pub size: u64,
    /// Raw contents. `None` for sections without file data (`SHT_NOBITS`).
    pub data: Option<Vec<u8>>,
    /// File offset in the image this section was loaded from. Zero for
    /// sections created in memory; the writer computes fresh offsets.
    pub offset: u64,
}

impl Section {
    pub fn new(index: SectionIndex, name: impl Into<Name>) -> Self {
        Self {
            index,
            name: name.into(),
            sh_type: elf::SHT_NULL,
            flags: 0,
            link: 0,
            info: 0,
            addr_align: 0,
            entry_size: 0,
            addr: 0,
            size: 0,
            data: None,
            offset: 0,
        }
    }

    pub fn kind(&self) -> SectionKind {
        SectionKind::from_type(self.sh_type)
    }

    pub fn is_alloc(&self) -> bool {
        self.flags & u64::from(elf::SHF_ALLOC) != 0
    }

    /// Whether the section occupies bytes in the file.
    pub fn has_file_data(&self) -> bool {
        !matches!(self.kind(), SectionKind::ZeroFill | SectionKind::Null)
    }

    /// Whether `info` holds a section index rather than a count or flags.
    pub fn info_is_index(&self) -> bool {
        self.kind() == SectionKind::Relocation || self.flags & u64::from(elf::SHF_INFO_LINK) != 0
    }

    /// Replaces the contents and keeps `size` in step with them.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.size = data.len() as u64;
        self.data = Some(data);
    }

    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }
}

/// A program header together with the sections it maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub p_type: u32,
    pub flags: u32,
    pub align: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    /// Member sections in non-decreasing address order. Never read from a
    /// file; rebuilt by [`crate::layout::reconstruct_segments`].
    pub sections: Vec<SectionIndex>,
    /// File offset in the image this segment was loaded from.
    pub offset: u64,
}

impl Segment {
    pub fn new(p_type: u32) -> Self {
        Self {
            p_type,
            flags: 0,
            align: 0,
            vaddr: 0,
            paddr: 0,
            file_size: 0,
            mem_size: 0,
            sections: Vec::new(),
            offset: 0,
        }
    }

    pub fn end(&self) -> u64 {
        self.vaddr.saturating_add(self.mem_size)
    }

    /// Whether `[addr, addr + size)` lies within `[vaddr, vaddr + memsz)`.
    ///
    /// A zero-sized range is contained when its address falls inside the
    /// segment (the end address itself belongs to the next region).
    pub fn contains_range(&self, addr: u64, size: u64) -> bool {
        if size == 0 {
            return self.vaddr <= addr && addr < self.end();
        }
        self.vaddr <= addr && addr.saturating_add(size) <= self.end()
    }

    pub fn contains(&self, section: &Section) -> bool {
        self.contains_range(section.addr, section.size)
    }
}

/// A complete ELF image held in memory.
#[derive(Debug, Clone)]
pub struct Image {
    pub header: Header,
    /// Section table without the null entry: `sections[i].index == i + 1`.
    pub sections: Vec<Section>,
    pub segments: Vec<Segment>,
    /// The section name string table of a loaded image (`e_shstrndx`).
    pub name_table: Option<SectionIndex>,
}

impl Image {
    /// Creates an empty image of the given class and encoding.
    pub fn new(is_64: bool, endian: Endianness) -> Self {
        Self {
            header: Header {
                is_64,
                endian,
                os_abi: elf::ELFOSABI_SYSV,
                abi_version: 0,
                e_type: elf::ET_NONE,
                e_machine: elf::EM_NONE,
                e_entry: 0,
                e_flags: 0,
            },
            sections: Vec::new(),
            segments: Vec::new(),
            name_table: None,
        }
    }

    pub fn section(&self, index: SectionIndex) -> Option<&Section> {
        let slot = (index.0 as usize).checked_sub(1)?;
        self.sections.get(slot)
    }

    pub fn section_mut(&mut self, index: SectionIndex) -> Option<&mut Section> {
        let slot = (index.0 as usize).checked_sub(1)?;
        self.sections.get_mut(slot)
    }

    /// Appends a section with the next free index.
    pub fn add_section(&mut self, name: impl Into<Name>) -> &mut Section {
        let index = SectionIndex(self.sections.len() as u32 + 1);
        self.sections.push(Section::new(index, name));
        let slot = self.sections.len() - 1;
        &mut self.sections[slot]
    }

    pub fn section_by_name(&self, name: impl AsRef<[u8]>) -> Option<&Section> {
        let name = name.as_ref();
        self.sections.iter().find(|s| s.name.as_bytes() == name)
    }

    pub fn section_by_name_mut(&mut self, name: impl AsRef<[u8]>) -> Option<&mut Section> {
        let name = name.as_ref();
        self.sections.iter_mut().find(|s| s.name.as_bytes() == name)
    }

    /// First section of the given type, in table order.
    pub fn section_by_type(&self, sh_type: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.sh_type == sh_type)
    }

    /// Number of section header entries, counting the null section.
    pub fn section_count(&self) -> u32 {
        self.sections.len() as u32 + 1
    }

    pub fn is_name_table(&self, index: SectionIndex) -> bool {
        self.name_table == Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_indices_start_after_null() {
        let mut image = Image::new(true, Endianness::Little);
        let text = image.add_section(".text").index;
        let bss = image.add_section(".bss").index;
        assert_eq!(text, SectionIndex(1));
        assert_eq!(bss, SectionIndex(2));
        assert!(image.section(SectionIndex::NULL).is_none());
        assert_eq!(image.section(bss).map(|s| s.name.as_bytes()), Some(&b".bss"[..]));
        assert_eq!(image.section_count(), 3);
    }

    #[test]
    fn names_keep_their_bytes() {
        let mut image = Image::new(true, Endianness::Little);
        image.add_section(&b".d\xe9bug"[..]);
        let section = image.section_by_name(b".d\xe9bug").unwrap();
        assert_eq!(section.name.as_bytes(), b".d\xe9bug");
        assert_eq!(section.name.to_string(), ".d\u{fffd}bug");
        assert!(image.section_by_name(".d\u{e9}bug").is_none());
    }

    #[test]
    fn classifies_section_types() {
        assert_eq!(SectionKind::from_type(elf::SHT_PROGBITS), SectionKind::ProgramData);
        assert_eq!(SectionKind::from_type(elf::SHT_RELA), SectionKind::Relocation);
        assert_eq!(SectionKind::from_type(elf::SHT_GNU_HASH), SectionKind::Dynamic);
        assert_eq!(SectionKind::from_type(elf::SHT_NOTE), SectionKind::Other(elf::SHT_NOTE));
    }

    #[test]
    fn segment_containment_is_half_open() {
        let mut segment = Segment::new(elf::PT_LOAD);
        segment.vaddr = 0x1000;
        segment.mem_size = 0x100;
        assert!(segment.contains_range(0x1000, 0x100));
        assert!(!segment.contains_range(0x1080, 0x100));
        assert!(segment.contains_range(0x10ff, 0));
        assert!(!segment.contains_range(0x1100, 0));
        assert!(!segment.contains_range(0xfff, 1));
    }
}
