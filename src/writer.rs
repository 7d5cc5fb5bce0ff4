//! ELF file writer.
//!
//! Serialises an [`Image`] through `object::write::elf::Writer` and persists
//! it atomically. The section name string table is always regenerated and
//! placed last in the section table.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use object::write::elf::{FileHeader, ProgramHeader, SectionHeader, Writer};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::image::{Image, Section};
use crate::layout::FileLayout;

/// Encodes `image` as an ELF file.
pub fn to_bytes(image: &Image) -> Result<Vec<u8>> {
    let layout = FileLayout::plan(image);
    if !layout.errors.is_empty() {
        return Err(Error::Validation(layout.errors.join("\n")));
    }

    let mut file_backed: Vec<&Section> = image
        .sections
        .iter()
        .filter(|s| s.has_file_data() && s.size > 0)
        .collect();
    file_backed.sort_by_key(|s| layout.section_offset(s.index));

    let mut buffer = Vec::new();
    {
        let mut writer = Writer::new(image.header.endian, image.header.is_64, &mut buffer);

        // Reserve file ranges in file order.
        writer.reserve_file_header();
        writer.reserve_program_headers(image.segments.len() as u32);
        debug_assert_eq!(writer.reserved_len() as u64, layout.header_end);

        writer.reserve_null_section_index();
        let mut names = Vec::with_capacity(image.sections.len());
        for section in &image.sections {
            names.push(writer.add_section_name(section.name.as_bytes()));
            writer.reserve_section_index();
        }
        writer.reserve_shstrtab_section_index();

        for section in &file_backed {
            writer.reserve_until(layout.section_offset(section.index) as usize);
            writer.reserve(section.size as usize, 1);
        }
        writer.reserve_until(layout.data_end as usize);
        writer.reserve_shstrtab();
        writer.reserve_section_headers();

        // Write everything in the same order.
        writer.write_file_header(&FileHeader {
            os_abi: image.header.os_abi,
            abi_version: image.header.abi_version,
            e_type: image.header.e_type,
            e_machine: image.header.e_machine,
            e_entry: image.header.e_entry,
            e_flags: image.header.e_flags,
        })?;

        writer.write_align_program_headers();
        for (segment, &offset) in image.segments.iter().zip(&layout.segments) {
            writer.write_program_header(&ProgramHeader {
                p_type: segment.p_type,
                p_flags: segment.flags,
                p_offset: offset,
                p_vaddr: segment.vaddr,
                p_paddr: segment.paddr,
                p_filesz: segment.file_size,
                p_memsz: segment.mem_size,
                p_align: segment.align,
            });
        }

        for section in &file_backed {
            let offset = layout.section_offset(section.index) as usize;
            writer.pad_until(offset);
            writer.write(section.data.as_deref().unwrap_or_default());
            writer.pad_until(offset + section.size as usize);
        }
        writer.pad_until(layout.data_end as usize);
        writer.write_shstrtab();

        writer.write_null_section_header();
        for (section, name) in image.sections.iter().zip(names) {
            writer.write_section_header(&SectionHeader {
                name: Some(name),
                sh_type: section.sh_type,
                sh_flags: section.flags,
                sh_addr: section.addr,
                sh_offset: layout.section_offset(section.index),
                sh_size: section.size,
                sh_link: section.link,
                sh_info: section.info,
                sh_addralign: section.addr_align,
                sh_entsize: section.entry_size,
            });
        }
        writer.write_shstrtab_section_header();
    }

    Ok(buffer)
}

/// Checks `image` and writes it to `path`.
///
/// A non-empty self-check aborts with [`Error::Validation`] before anything
/// touches the file system. When `permissions_from` is given, the output
/// takes that file's permissions.
pub fn save(image: &Image, path: &Path, permissions_from: Option<&Path>) -> Result<()> {
    let problems = image.validate();
    if !problems.is_empty() {
        return Err(Error::Validation(problems));
    }
    let bytes = to_bytes(image)?;
    persist(&bytes, path, permissions_from)?;
    tracing::info!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Writes `bytes` to a temporary file next to `path` and renames it over
/// `path`, so readers see either the old file or the complete new one.
pub fn persist(bytes: &[u8], path: &Path, permissions_from: Option<&Path>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    file.write_all(bytes).map_err(|e| Error::io(file.path(), e))?;

    if let Some(source) = permissions_from {
        let permissions = fs::metadata(source)
            .map_err(|e| Error::io(source, e))?
            .permissions();
        file.as_file()
            .set_permissions(permissions)
            .map_err(|e| Error::io(file.path(), e))?;
    }
    file.as_file().sync_all().map_err(|e| Error::io(file.path(), e))?;
    file.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
