//! Image cloning.
//!
//! This module contains the `Cloner` struct which drives a clone through
//! its passes, in this order:
//! 1. Header: the new image takes the source's class, encoding and header fields.
//! 2. Sections: selected sections are copied, without their links.
//! 3. Links: `link`/`info` references are translated into the new numbering.
//! 4. Symbols: `.symtab` and `.strtab` are rebuilt; `.dynsym` is remapped.
//! 5. Segments: program headers are copied and their members recomputed.
//!
//! Each pass depends on the index map filled by the section pass.

use crate::config::{ClonePolicy, Disposition, SymbolScope};
use crate::error::Result;
use crate::image::{Image, SectionIndex};
use crate::index_map::IndexMap;
use crate::layout;
use crate::links::{self, DanglingLink, DeferredLink};
use crate::symbol;

/// Summary of a finished clone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloneReport {
    pub cloned_sections: usize,
    pub skipped_sections: usize,
    pub dangling: Vec<DanglingLink>,
    pub symbols: usize,
    pub unmapped_symbols: usize,
    pub dynamic_remapped: usize,
}

pub struct Cloner<'a> {
    source: &'a Image,
    policy: &'a ClonePolicy,
    target: Image,
    index_map: IndexMap,
    /// Source sections regenerated by a later pass.
    rebuilt: Vec<SectionIndex>,
    deferred: Vec<DeferredLink>,
    report: CloneReport,
}

impl<'a> Cloner<'a> {
    /// Starts a clone of `source` with the header copied over.
    pub fn new(source: &'a Image, policy: &'a ClonePolicy) -> Self {
        let mut target = Image::new(source.header.is_64, source.header.endian);
        target.header = source.header.clone();
        tracing::debug!(
            "cloning header: type {}, machine {}, entry 0x{:x}",
            target.header.e_type,
            target.header.e_machine,
            target.header.e_entry
        );
        Self {
            source,
            policy,
            target,
            index_map: IndexMap::new(),
            rebuilt: Vec::new(),
            deferred: Vec::new(),
            report: CloneReport::default(),
        }
    }

    /// Copies every section the policy selects, in source order.
    ///
    /// `link` is left zero until [`Cloner::correct_links`] runs; `info` is
    /// copied and rewritten there if it holds a section index.
    pub fn clone_sections(&mut self) {
        for section in &self.source.sections {
            match self.policy.decide(self.source, section) {
                Disposition::Skip => {
                    tracing::debug!("skipping section `{}`", section.name);
                    self.report.skipped_sections += 1;
                }
                Disposition::Rebuild => self.rebuilt.push(section.index),
                Disposition::Clone => {
                    let new = self.target.add_section(section.name.clone());
                    new.sh_type = section.sh_type;
                    new.flags = section.flags;
                    new.info = section.info;
                    new.addr_align = section.addr_align;
                    new.entry_size = section.entry_size;
                    new.addr = section.addr;
                    new.size = section.size;
                    new.data = section.data.clone();
                    let index = new.index;
                    self.index_map.insert(section.index, index);
                    self.report.cloned_sections += 1;
                    tracing::debug!(
                        "cloned section `{}` {} -> {} (size 0x{:x}, align {})",
                        section.name,
                        section.index.0,
                        index.0,
                        section.size,
                        section.addr_align
                    );
                }
            }
        }
        if self.index_map.is_empty() {
            tracing::warn!("no section of the source was selected for cloning");
        }
        tracing::debug!("index map holds {} sections", self.index_map.len());
    }

    /// Translates `link` and index-valued `info` of every cloned section.
    pub fn correct_links(&mut self) {
        let result = links::correct_links(
            self.source,
            &mut self.target,
            &self.index_map,
            &self.rebuilt,
        );
        tracing::debug!(
            "corrected {} links, {} deferred to the symbol pass",
            result.corrected,
            result.deferred.len()
        );
        self.deferred = result.deferred;
        self.report.dangling.extend(result.dangling);
    }

    /// Rebuilds `.symtab` and its string table, then resolves the links
    /// that referred to them.
    pub fn clone_symbols(&mut self) -> Result<()> {
        let tables =
            symbol::clone_symbol_table(self.source, &mut self.target, &mut self.index_map)?;
        self.report.symbols = tables.symbols;
        self.report.unmapped_symbols = tables.unmapped;

        let deferred = std::mem::take(&mut self.deferred);
        let unresolved = links::resolve_deferred(&mut self.target, &self.index_map, &deferred);
        self.report.dangling.extend(unresolved);

        if self.policy.symbols == SymbolScope::StaticAndDynamic {
            self.report.dynamic_remapped =
                symbol::remap_dynamic_symbols(&mut self.target, &self.index_map)?;
        }
        Ok(())
    }

    pub fn reconstruct_segments(&mut self) -> Result<()> {
        layout::reconstruct_segments(self.source, &mut self.target)
    }

    pub fn index_map(&self) -> &IndexMap {
        &self.index_map
    }

    pub fn finish(self) -> (Image, CloneReport) {
        (self.target, self.report)
    }
}

/// Runs every pass over `source`.
pub fn clone_image(source: &Image, policy: &ClonePolicy) -> Result<(Image, CloneReport)> {
    let mut cloner = Cloner::new(source, policy);
    cloner.clone_sections();
    cloner.correct_links();
    cloner.clone_symbols()?;
    cloner.reconstruct_segments()?;

    let (image, report) = cloner.finish();
    tracing::info!(
        "cloned {} sections, {} symbols, {} segments",
        report.cloned_sections,
        report.symbols,
        image.segments.len()
    );
    Ok((image, report))
}
