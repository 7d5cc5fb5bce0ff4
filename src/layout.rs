//! Segment reconstruction and file layout.
//!
//! A cloned image has no record of which sections each program header
//! covered: the new section table is built from scratch and may hold a
//! different subset in a different order. Membership is therefore rebuilt
//! from geometry, by address-range containment, and file offsets for the
//! output are derived from that membership.

use object::elf;

use crate::error::{Error, Result};
use crate::image::{Image, Section, SectionIndex, Segment};
use crate::utils::{align_congruent, align_up};

/// Clones every program header of `source` into `target` and rebuilds the
/// section membership of the clones from the sections already in `target`.
pub fn reconstruct_segments(source: &Image, target: &mut Image) -> Result<()> {
    for segment in &source.segments {
        target.segments.push(Segment {
            p_type: segment.p_type,
            flags: segment.flags,
            align: segment.align,
            vaddr: segment.vaddr,
            paddr: segment.paddr,
            file_size: segment.file_size,
            mem_size: segment.mem_size,
            sections: Vec::new(),
            offset: 0,
        });
    }
    assign_sections(target)?;

    for (i, segment) in target.segments.iter().enumerate() {
        tracing::debug!(
            "segment {} (type 0x{:x}, 0x{:x}..0x{:x}) holds {} sections",
            i,
            segment.p_type,
            segment.vaddr,
            segment.end(),
            segment.sections.len()
        );
    }
    Ok(())
}

/// Recomputes which sections every segment of `image` contains.
///
/// Only allocated sections take part; a section joins every segment whose
/// memory range fully contains it, so overlapping segments (a `PT_TLS` or
/// `PT_GNU_RELRO` inside a `PT_LOAD`) share members. Sections are visited in
/// table order and must reach each segment in non-decreasing address order.
pub fn assign_sections(image: &mut Image) -> Result<()> {
    let Image {
        sections, segments, ..
    } = image;

    for segment in segments.iter_mut() {
        segment.sections.clear();
    }

    for section in sections.iter().filter(|s| s.is_alloc()) {
        for (segment_index, segment) in segments.iter_mut().enumerate() {
            if !segment.contains(section) {
                continue;
            }
            if let Some(last) = segment.sections.last() {
                let previous = sections[last.0 as usize - 1].addr;
                if section.addr < previous {
                    return Err(Error::StructuralOrder {
                        segment: segment_index,
                        section: section.name.to_string(),
                        addr: section.addr,
                        previous,
                    });
                }
            }
            segment.sections.push(section.index);
        }
    }
    Ok(())
}

/// File offsets chosen for an image about to be written.
#[derive(Debug, Clone, Default)]
pub struct FileLayout {
    /// Offset of the program header table (0 without segments).
    pub phdr_offset: u64,
    /// End of the ELF header and program headers.
    pub header_end: u64,
    /// File offset of each section, indexed like `Image::sections`.
    pub sections: Vec<u64>,
    /// `p_offset` of each segment, indexed like `Image::segments`.
    pub segments: Vec<u64>,
    /// End of all section and segment data.
    pub data_end: u64,
    /// Inconsistencies found while placing sections.
    pub errors: Vec<String>,
}

impl FileLayout {
    /// Places every section of `image` in the file.
    ///
    /// Allocated sections go first in address order. The first member of a
    /// `PT_LOAD` segment is placed at an offset congruent to its address
    /// modulo the segment alignment; every later member keeps its address
    /// distance from that anchor, so `offset - p_offset == addr - vaddr`
    /// holds across the segment. Non-allocated sections follow.
    pub fn plan(image: &Image) -> FileLayout {
        let (ehdr_size, phdr_size, word) = if image.header.is_64 {
            (64, 56, 8)
        } else {
            (52, 32, 4)
        };
        let mut layout = FileLayout {
            sections: vec![0; image.sections.len()],
            ..FileLayout::default()
        };
        layout.header_end = ehdr_size;
        if !image.segments.is_empty() {
            layout.phdr_offset = align_up(ehdr_size, word);
            layout.header_end = layout.phdr_offset + phdr_size * image.segments.len() as u64;
        }

        let mut cursor = layout.header_end;
        let mut anchors: Vec<Option<(u64, u64)>> = vec![None; image.segments.len()];

        let mut alloc: Vec<&Section> = image.sections.iter().filter(|s| s.is_alloc()).collect();
        alloc.sort_by_key(|s| (s.addr, s.index));
        for section in alloc {
            let load = image.segments.iter().position(|seg| {
                seg.p_type == elf::PT_LOAD && seg.sections.contains(&section.index)
            });
            let offset = match load {
                Some(l) => match anchors[l] {
                    Some((base, anchor)) => base + (section.addr - anchor),
                    None => {
                        let segment = &image.segments[l];
                        let min = cursor.max(section.addr - segment.vaddr);
                        let offset = align_congruent(min, section.addr, segment.align);
                        anchors[l] = Some((offset, section.addr));
                        offset
                    }
                },
                None => align_up(cursor, section.addr_align),
            };
            layout.place(section, offset, &mut cursor);
        }

        layout.segments = layout.segment_offsets(image);
        for (segment, offset) in image.segments.iter().zip(&layout.segments) {
            cursor = cursor.max(offset + segment.file_size);
        }

        for section in image.sections.iter().filter(|s| !s.is_alloc()) {
            let offset = align_up(cursor, section.addr_align);
            layout.place(section, offset, &mut cursor);
        }

        layout.data_end = cursor;
        layout
    }

    fn place(&mut self, section: &Section, offset: u64, cursor: &mut u64) {
        if section.has_file_data() && section.size > 0 {
            if offset < *cursor {
                self.errors.push(format!(
                    "section `{}` at file offset 0x{:x} overlaps data ending at 0x{:x}",
                    section.name, offset, cursor
                ));
            }
            *cursor = (*cursor).max(offset + section.size);
        }
        self.sections[section.index.0 as usize - 1] = offset;
    }

    pub fn section_offset(&self, index: SectionIndex) -> u64 {
        self.sections[index.0 as usize - 1]
    }

    fn segment_offsets(&mut self, image: &Image) -> Vec<u64> {
        let mut offsets: Vec<Option<u64>> = image
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                if segment.p_type == elf::PT_PHDR {
                    return Some(self.phdr_offset);
                }
                let first = *segment.sections.first()?;
                let section = image.section(first)?;
                let delta = section.addr - segment.vaddr;
                let offset = self.section_offset(first);
                if offset < delta {
                    self.errors.push(format!(
                        "segment {i} starts 0x{delta:x} bytes before `{}` \
                         but only 0x{offset:x} bytes of file precede it",
                        section.name
                    ));
                    return Some(0);
                }
                Some(offset - delta)
            })
            .collect();

        // Segments without members borrow the offset of an enclosing PT_LOAD.
        for i in 0..offsets.len() {
            if offsets[i].is_some() {
                continue;
            }
            let segment = &image.segments[i];
            let enclosing = image.segments.iter().enumerate().find_map(|(j, load)| {
                let base = offsets[j]?;
                (load.p_type == elf::PT_LOAD && load.contains_range(segment.vaddr, 0))
                    .then(|| base + (segment.vaddr - load.vaddr))
            });
            offsets[i] = Some(enclosing.unwrap_or(0));
        }
        offsets.into_iter().map(|o| o.unwrap_or(0)).collect()
    }
}
