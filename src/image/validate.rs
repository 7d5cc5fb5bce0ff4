//! Structural self-check.

use object::elf;

use super::symbols::{self, is_reserved_index};
use super::{Image, SectionKind};
use crate::layout::FileLayout;

impl Image {
    /// Checks the image for structural inconsistencies.
    ///
    /// Returns one diagnostic per line; an empty string means no problems
    /// were found. The check covers cross references (section links, symbol
    /// section indices), segment membership, and the file layout the writer
    /// would produce.
    pub fn validate(&self) -> String {
        let mut problems = Vec::new();
        // The writer appends a regenerated `.shstrtab` after the last section.
        let count = self.section_count() + 1;

        for section in &self.sections {
            if section.link >= count {
                problems.push(format!(
                    "section `{}` links to nonexistent section {}",
                    section.name, section.link
                ));
            }
            if section.info_is_index() && section.info >= count {
                problems.push(format!(
                    "section `{}` info refers to nonexistent section {}",
                    section.name, section.info
                ));
            }
            if let Some(data) = &section.data {
                if data.len() as u64 != section.size {
                    problems.push(format!(
                        "section `{}` holds {} bytes but declares {}",
                        section.name,
                        data.len(),
                        section.size
                    ));
                }
            }
            if matches!(
                section.kind(),
                SectionKind::SymbolTable | SectionKind::DynamicSymbolTable
            ) {
                self.check_symbol_table(section, count, &mut problems);
            }
        }

        for (i, segment) in self.segments.iter().enumerate() {
            let mut previous = 0;
            for &member in &segment.sections {
                let Some(section) = self.section(member) else {
                    problems.push(format!(
                        "segment {i} refers to nonexistent section {}",
                        member.0
                    ));
                    continue;
                };
                if !segment.contains(section) {
                    problems.push(format!(
                        "section `{}` is registered in segment {i} but lies outside it",
                        section.name
                    ));
                }
                if section.addr < previous {
                    problems.push(format!(
                        "section `{}` is out of address order in segment {i}",
                        section.name
                    ));
                }
                previous = section.addr;
            }
        }

        let layout = FileLayout::plan(self);
        problems.extend(layout.errors.iter().cloned());
        for ((i, segment), &p_offset) in self.segments.iter().enumerate().zip(&layout.segments) {
            if segment.p_type != elf::PT_LOAD {
                continue;
            }
            if segment.align > 1 && p_offset % segment.align != segment.vaddr % segment.align {
                problems.push(format!(
                    "segment {i} offset 0x{p_offset:x} is not congruent to its address 0x{:x}",
                    segment.vaddr
                ));
            }
            for &member in &segment.sections {
                let Some(section) = self.section(member) else {
                    continue;
                };
                if !section.has_file_data() {
                    continue;
                }
                let offset = layout.section_offset(member);
                if offset.wrapping_sub(p_offset) != section.addr.wrapping_sub(segment.vaddr) {
                    problems.push(format!(
                        "section `{}` is not mapped at its address by segment {i}",
                        section.name
                    ));
                }
            }
        }

        problems.join("\n")
    }

    fn check_symbol_table(&self, table: &super::Section, count: u32, problems: &mut Vec<String>) {
        if table.entry_size == 0 {
            problems.push(format!("symbol table `{}` has a zero entry size", table.name));
            return;
        }
        let strtab = match self.section(super::SectionIndex(table.link)) {
            Some(s) if s.kind() == SectionKind::StringTable => s,
            _ => {
                problems.push(format!(
                    "symbol table `{}` is not linked to a string table",
                    table.name
                ));
                return;
            }
        };
        let (Some(data), Some(strings)) = (&table.data, &strtab.data) else {
            problems.push(format!("symbol table `{}` has no contents", table.name));
            return;
        };
        match symbols::decode(&self.header, data, table.entry_size, strings) {
            Ok(entries) => {
                for symbol in entries {
                    if !is_reserved_index(symbol.shndx) && u32::from(symbol.shndx) >= count {
                        problems.push(format!(
                            "symbol `{}` in `{}` refers to nonexistent section {}",
                            symbol.name, table.name, symbol.shndx
                        ));
                    }
                }
            }
            Err(e) => problems.push(format!("symbol table `{}`: {e}", table.name)),
        }
    }
}
