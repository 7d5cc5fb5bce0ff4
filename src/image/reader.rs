//! Loading images from ELF files.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use object::elf;
use object::read::elf::{FileHeader, ProgramHeader, SectionHeader};
use object::{Endianness, FileKind};

use super::{Image, Section, SectionIndex, Segment};
use crate::error::{Error, Result};

impl Image {
    /// Maps the file at `path` and parses it.
    pub fn open(path: &Path) -> Result<Image> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;
        let image = Image::parse(&mmap)?;
        tracing::debug!(
            "loaded {}: {} sections, {} segments",
            path.display(),
            image.sections.len(),
            image.segments.len()
        );
        Ok(image)
    }

    /// Parses a 32- or 64-bit ELF file of either endianness.
    pub fn parse(data: &[u8]) -> Result<Image> {
        match FileKind::parse(data)? {
            FileKind::Elf32 => parse_elf::<elf::FileHeader32<Endianness>>(data),
            FileKind::Elf64 => parse_elf::<elf::FileHeader64<Endianness>>(data),
            other => Err(Error::Unsupported(format!("{other:?} is not an ELF image"))),
        }
    }
}

fn parse_elf<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Result<Image> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;
    let ident = header.e_ident();

    let mut image = Image::new(ident.class == elf::ELFCLASS64, endian);
    image.header.os_abi = ident.os_abi;
    image.header.abi_version = ident.abi_version;
    image.header.e_type = header.e_type(endian);
    image.header.e_machine = header.e_machine(endian);
    image.header.e_entry = header.e_entry(endian).into();
    image.header.e_flags = header.e_flags(endian);

    let sections = header.sections(endian, data)?;
    // Index 0 is the null section and is implicit in the model.
    for (index, section) in sections.iter().enumerate().skip(1) {
        let name = sections.section_name(endian, section)?;
        let sh_type = section.sh_type(endian);
        let contents = match sh_type {
            elf::SHT_NOBITS | elf::SHT_NULL => None,
            _ => Some(section.data(endian, data)?.to_vec()),
        };
        image.sections.push(Section {
            index: SectionIndex(index as u32),
            name: name.into(),
            sh_type,
            flags: section.sh_flags(endian).into(),
            link: section.sh_link(endian),
            info: section.sh_info(endian),
            addr_align: section.sh_addralign(endian).into(),
            entry_size: section.sh_entsize(endian).into(),
            addr: section.sh_addr(endian).into(),
            size: section.sh_size(endian).into(),
            data: contents,
            offset: section.sh_offset(endian).into(),
        });
    }

    let shstrndx = header.shstrndx(endian, data)?;
    if shstrndx != 0 {
        image.name_table = Some(SectionIndex(shstrndx));
    }

    for phdr in header.program_headers(endian, data)? {
        image.segments.push(Segment {
            p_type: phdr.p_type(endian),
            flags: phdr.p_flags(endian),
            align: phdr.p_align(endian).into(),
            vaddr: phdr.p_vaddr(endian).into(),
            paddr: phdr.p_paddr(endian).into(),
            file_size: phdr.p_filesz(endian).into(),
            mem_size: phdr.p_memsz(endian).into(),
            sections: Vec::new(),
            offset: phdr.p_offset(endian).into(),
        });
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_input() {
        let err = Image::parse(b"definitely not an object file").unwrap_err();
        assert!(matches!(err, Error::Parse(_) | Error::Unsupported(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Image::open(Path::new("/nonexistent/elfclone/input")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
