//! Shared fixture: a small x86-64 executable with a HIP payload.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use elfclone::image::symbols::{self, StringTableBuilder, Symbol};
use elfclone::image::{Header, Image, Segment};
use elfclone::layout;
use elfclone::writer;
use object::endian::{I32, I64, U32, U64};
use object::pod::bytes_of;
use object::{elf, Endianness};

pub const PREAMBLE: u64 = 0x40;
pub const FATBIN_SIZE: u64 = 0x100;
pub const FATBIN_ADDR: u64 = 0x402000;
/// `binary` field of the wrapper record in the fixture.
pub const WRAPPER_OFFSET: u64 = 0x2000;

pub const SECTION_NAMES: [&str; 9] = [
    ".text",
    ".hip_fatbin",
    ".hipFatBinSegment",
    ".bss",
    ".note.test",
    ".rela.text",
    ".symtab",
    ".strtab",
    ".shstrtab",
];

fn symbol(name: &str, bind: u8, kind: u8, shndx: u16, value: u64) -> Symbol {
    Symbol {
        name: name.into(),
        value,
        size: 0,
        bind,
        kind,
        other: elf::STV_DEFAULT,
        shndx,
    }
}

pub fn fixture_symbols() -> Vec<Symbol> {
    vec![
        Symbol::default(),
        symbol("fixture.c", elf::STB_LOCAL, elf::STT_FILE, elf::SHN_ABS, 0),
        symbol("foo", elf::STB_GLOBAL, elf::STT_FUNC, 1, 0x401000),
        symbol("bar", elf::STB_GLOBAL, elf::STT_OBJECT, 4, 0x402120),
        symbol("abs_sym", elf::STB_GLOBAL, elf::STT_NOTYPE, elf::SHN_ABS, 0x1234),
        symbol("note_sym", elf::STB_GLOBAL, elf::STT_NOTYPE, 5, 0),
    ]
}

fn wrapper_record() -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(&0x4849_5046u32.to_le_bytes());
    record.extend_from_slice(&1u32.to_le_bytes());
    record.extend_from_slice(&WRAPPER_OFFSET.to_le_bytes());
    record.extend_from_slice(&0u64.to_le_bytes());
    record
}

/// One `Rela` record with an absolute relocation against `sym`.
fn relocation(header: &Header, offset: u64, sym: u32) -> Vec<u8> {
    let e = header.endian;
    if header.is_64 {
        let r_type = match header.e_machine {
            elf::EM_PPC64 => elf::R_PPC64_ADDR64,
            _ => elf::R_X86_64_64,
        };
        let rela = elf::Rela64 {
            r_offset: U64::new(e, offset),
            r_info: U64::new(e, (u64::from(sym) << 32) | u64::from(r_type)),
            r_addend: I64::new(e, 0),
        };
        bytes_of(&rela).to_vec()
    } else {
        let r_type = match header.e_machine {
            elf::EM_PPC => elf::R_PPC_ADDR32,
            _ => elf::R_386_32,
        };
        let rela = elf::Rela32 {
            r_offset: U32::new(e, offset as u32),
            r_info: U32::new(e, (sym << 8) | r_type),
            r_addend: I32::new(e, 0),
        };
        bytes_of(&rela).to_vec()
    }
}

/// Builds the 64-bit little-endian fixture image.
pub fn fixture_image() -> Image {
    fixture_image_for(true, Endianness::Little)
}

/// Builds the fixture image for one class and byte order. Sections, in
/// order: 1 .text, 2 .hip_fatbin, 3 .hipFatBinSegment, 4 .bss,
/// 5 .note.test, 6 .rela.text, 7 .symtab, 8 .strtab.
pub fn fixture_image_for(is_64: bool, endian: Endianness) -> Image {
    let mut image = Image::new(is_64, endian);
    image.header.e_type = elf::ET_EXEC;
    image.header.e_machine = match (is_64, endian) {
        (true, Endianness::Little) => elf::EM_X86_64,
        (true, Endianness::Big) => elf::EM_PPC64,
        (false, Endianness::Little) => elf::EM_386,
        (false, Endianness::Big) => elf::EM_PPC,
    };
    image.header.e_entry = 0x401000;
    let word = if is_64 { 8 } else { 4 };

    let alloc = |image: &mut Image,
                 name: &str,
                 sh_type,
                 flags: u32,
                 addr,
                 align,
                 data: Option<Vec<u8>>,
                 size| {
        let section = image.add_section(name);
        section.sh_type = sh_type;
        section.flags = u64::from(elf::SHF_ALLOC | flags);
        section.addr = addr;
        section.addr_align = align;
        match data {
            Some(data) => section.set_data(data),
            None => section.size = size,
        }
    };
    let text: Vec<u8> = (0..64u8).collect();
    alloc(&mut image, ".text", elf::SHT_PROGBITS, elf::SHF_EXECINSTR, 0x401000, 16, Some(text), 0);
    let fatbin: Vec<u8> = (0..FATBIN_SIZE).map(|i| (i % 251) as u8).collect();
    alloc(&mut image, ".hip_fatbin", elf::SHT_PROGBITS, 0, FATBIN_ADDR, 0x1000, Some(fatbin), 0);
    let wrapper = Some(wrapper_record());
    let write = elf::SHF_WRITE;
    alloc(&mut image, ".hipFatBinSegment", elf::SHT_PROGBITS, write, 0x402100, 8, wrapper, 0);
    alloc(&mut image, ".bss", elf::SHT_NOBITS, elf::SHF_WRITE, 0x402120, 16, None, 0x40);

    let note = image.add_section(".note.test");
    note.sh_type = elf::SHT_NOTE;
    note.addr_align = 4;
    note.set_data(vec![0x4e; 16]);

    let header = image.header.clone();
    let record = relocation(&header, 0x401004, 2);
    let rela = image.add_section(".rela.text");
    rela.sh_type = elf::SHT_RELA;
    rela.flags = u64::from(elf::SHF_INFO_LINK);
    rela.link = 7;
    rela.info = 1;
    rela.entry_size = record.len() as u64;
    rela.addr_align = word;
    rela.set_data(record);

    let mut strings = StringTableBuilder::default();
    let mut records = Vec::new();
    for (i, entry) in fixture_symbols().iter().enumerate() {
        let name = if i == 0 { 0 } else { strings.add(&entry.name) };
        symbols::encode(&header, entry, name, &mut records);
    }
    let symtab = image.add_section(".symtab");
    symtab.sh_type = elf::SHT_SYMTAB;
    symtab.link = 8;
    symtab.info = 2;
    symtab.entry_size = symbols::entry_size(&header) as u64;
    symtab.addr_align = word;
    symtab.set_data(records);

    let strtab = image.add_section(".strtab");
    strtab.sh_type = elf::SHT_STRTAB;
    strtab.addr_align = 1;
    strtab.set_data(strings.finish());

    let mut text_load = Segment::new(elf::PT_LOAD);
    text_load.flags = elf::PF_R | elf::PF_X;
    text_load.vaddr = 0x401000;
    text_load.paddr = 0x401000;
    text_load.file_size = 0x40;
    text_load.mem_size = 0x40;
    text_load.align = 0x1000;

    let mut data_load = Segment::new(elf::PT_LOAD);
    data_load.flags = elf::PF_R | elf::PF_W;
    data_load.vaddr = FATBIN_ADDR;
    data_load.paddr = FATBIN_ADDR;
    data_load.file_size = 0x118;
    data_load.mem_size = 0x160;
    data_load.align = 0x1000;

    image.segments.push(text_load);
    image.segments.push(data_load);
    layout::assign_sections(&mut image).expect("fixture segments are ordered");
    image
}

/// Writes the fixture executable into `dir` and returns its path.
pub fn write_fixture(dir: &Path) -> PathBuf {
    write_image(dir, "app", &fixture_image())
}

/// Writes `image` as `dir/name` and returns its path.
pub fn write_image(dir: &Path, name: &str, image: &Image) -> PathBuf {
    let path = dir.join(name);
    assert_eq!(image.validate(), "");
    writer::save(image, &path, None).expect("fixture is writable");
    path
}

/// Reads a section's contents by name.
pub fn contents<'a>(image: &'a Image, name: &str) -> &'a [u8] {
    image
        .section_by_name(name)
        .and_then(|s| s.data.as_deref())
        .unwrap_or_else(|| panic!("no contents for {name}"))
}

pub fn decode_symtab(image: &Image) -> Vec<Symbol> {
    let symtab = image.section_by_type(elf::SHT_SYMTAB).expect("symtab");
    let strtab = image
        .section(elfclone::image::SectionIndex(symtab.link))
        .expect("strtab");
    symbols::decode(
        &image.header,
        symtab.data.as_deref().expect("symtab contents"),
        symtab.entry_size,
        strtab.data.as_deref().expect("strtab contents"),
    )
    .expect("symtab decodes")
}
