//! Cross-section reference correction.
//!
//! A section's `link` (and, for relocation sections, `info`) holds an index
//! into its own image's section table. After cloning, those indices point
//! into the wrong table; this pass translates them through the
//! [`IndexMap`]. It must run once every section has been cloned.

use crate::image::{Image, Name, Section, SectionIndex};
use crate::index_map::IndexMap;

/// Which header field holds the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkField {
    Link,
    Info,
}

/// A reference whose target was not cloned. The field has been zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingLink {
    pub section: Name,
    pub field: LinkField,
    /// The unresolved index, in the source image's numbering.
    pub target: u32,
}

/// A reference to a table the section cloner skipped because a later pass
/// rebuilds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredLink {
    /// The referring section, in the clone's numbering.
    pub section: SectionIndex,
    pub field: LinkField,
    /// The referenced section, in the source image's numbering.
    pub target: SectionIndex,
}

/// Outcome of [`correct_links`].
#[derive(Debug, Default)]
pub struct LinkCorrection {
    pub corrected: usize,
    pub deferred: Vec<DeferredLink>,
    pub dangling: Vec<DanglingLink>,
}

fn set_field(section: &mut Section, field: LinkField, value: u32) {
    match field {
        LinkField::Link => section.link = value,
        LinkField::Info => section.info = value,
    }
}

fn dangling(section: &Section, field: LinkField, target: u32) -> DanglingLink {
    tracing::warn!(
        "{:?} of section `{}` refers to section {} which was not cloned; cleared",
        field,
        section.name,
        target
    );
    DanglingLink {
        section: section.name.clone(),
        field,
        target,
    }
}

/// Rewrites the `link` and index-valued `info` fields of every cloned
/// section of `target`.
///
/// References to sections listed in `rebuilt` are returned as deferred and
/// left zero until [`resolve_deferred`] runs.
pub fn correct_links(
    source: &Image,
    target: &mut Image,
    map: &IndexMap,
    rebuilt: &[SectionIndex],
) -> LinkCorrection {
    let mut result = LinkCorrection::default();

    for new in target.sections.iter_mut() {
        let Some(old) = map.old_for(new.index).and_then(|i| source.section(i)) else {
            continue;
        };

        let mut fields = vec![(LinkField::Link, old.link)];
        if old.info_is_index() {
            fields.push((LinkField::Info, old.info));
        }

        for (field, value) in fields {
            set_field(new, field, 0);
            if value == 0 {
                continue;
            }
            let referenced = SectionIndex(value);
            if rebuilt.contains(&referenced) {
                result.deferred.push(DeferredLink {
                    section: new.index,
                    field,
                    target: referenced,
                });
                continue;
            }
            match source.section(referenced).and_then(|s| map.new_for(s.index)) {
                Some(clone) => {
                    set_field(new, field, clone.0);
                    result.corrected += 1;
                }
                None => result.dangling.push(dangling(new, field, value)),
            }
        }
    }

    result
}

/// Resolves references deferred by [`correct_links`] once the rebuilt
/// tables have been registered in `map`.
pub fn resolve_deferred(
    target: &mut Image,
    map: &IndexMap,
    deferred: &[DeferredLink],
) -> Vec<DanglingLink> {
    let mut unresolved = Vec::new();
    for link in deferred {
        let clone = map.new_for(link.target);
        let Some(section) = target.section_mut(link.section) else {
            continue;
        };
        match clone {
            Some(clone) => set_field(section, link.field, clone.0),
            None => unresolved.push(dangling(section, link.field, link.target.0)),
        }
    }
    unresolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{elf, Endianness};

    /// Source: 1 .text, 2 .dynstr, 3 .dynsym(link 2), 4 .note, 5 .custom(link 4),
    /// 6 .symtab, 7 .rela.text(link 6, info 1).
    fn source() -> Image {
        let mut image = Image::new(true, Endianness::Little);
        for (name, sh_type, link, info) in [
            (".text", elf::SHT_PROGBITS, 0, 0),
            (".dynstr", elf::SHT_STRTAB, 0, 0),
            (".dynsym", elf::SHT_DYNSYM, 2, 1),
            (".note", elf::SHT_NOTE, 0, 0),
            (".custom", elf::SHT_PROGBITS, 4, 0),
            (".symtab", elf::SHT_SYMTAB, 0, 0),
            (".rela.text", elf::SHT_RELA, 6, 1),
        ] {
            let section = image.add_section(name);
            section.sh_type = sh_type;
            section.link = link;
            section.info = info;
        }
        image
    }

    /// Clones everything except .note and .symtab, in reverse order.
    fn clone(source: &Image) -> (Image, IndexMap) {
        clone_only(source, &[7, 5, 3, 2, 1])
    }

    fn clone_only(source: &Image, indices: &[usize]) -> (Image, IndexMap) {
        let mut target = Image::new(true, Endianness::Little);
        let mut map = IndexMap::new();
        for &old in indices {
            let section = &source.sections[old - 1];
            let new = target.add_section(section.name.clone());
            new.sh_type = section.sh_type;
            new.info = section.info;
            map.insert(section.index, new.index);
        }
        (target, map)
    }

    #[test]
    fn links_follow_their_targets() {
        let source = source();
        let (mut target, map) = clone(&source);
        let result = correct_links(&source, &mut target, &map, &[SectionIndex(6)]);

        let dynsym = target.section_by_name(".dynsym").unwrap();
        let dynstr = target.section_by_name(".dynstr").unwrap();
        assert_eq!(dynsym.link, dynstr.index.0);
        // .dynsym's info is a local symbol count and must be left alone.
        assert_eq!(dynsym.info, 1);

        let rela = target.section_by_name(".rela.text").unwrap();
        let text = target.section_by_name(".text").unwrap();
        assert_eq!(rela.info, text.index.0);
        assert_eq!(rela.link, 0);
        assert_eq!(
            result.deferred,
            vec![DeferredLink {
                section: rela.index,
                field: LinkField::Link,
                target: SectionIndex(6),
            }]
        );
        assert_eq!(result.corrected, 2);
    }

    #[test]
    fn missing_targets_are_reported_and_cleared() {
        let source = source();
        let (mut target, map) = clone(&source);
        let result = correct_links(&source, &mut target, &map, &[SectionIndex(6)]);

        assert_eq!(
            result.dangling,
            vec![DanglingLink {
                section: ".custom".into(),
                field: LinkField::Link,
                target: 4,
            }]
        );
        assert_eq!(target.section_by_name(".custom").unwrap().link, 0);
    }

    #[test]
    fn relocation_target_left_behind_clears_info() {
        let source = source();
        let (mut target, map) = clone_only(&source, &[7, 3, 2]);
        let result = correct_links(&source, &mut target, &map, &[SectionIndex(6)]);

        assert_eq!(
            result.dangling,
            vec![DanglingLink {
                section: ".rela.text".into(),
                field: LinkField::Info,
                target: 1,
            }]
        );
        assert_eq!(target.section_by_name(".rela.text").unwrap().info, 0);
        // The link to the rebuilt .symtab is still only deferred.
        assert_eq!(result.deferred.len(), 1);
        assert_eq!(result.corrected, 1);
    }

    #[test]
    fn deferred_links_resolve_after_rebuild() {
        let source = source();
        let (mut target, mut map) = clone(&source);
        let result = correct_links(&source, &mut target, &map, &[SectionIndex(6)]);

        let symtab = target.add_section(".symtab").index;
        map.insert(SectionIndex(6), symtab);
        let unresolved = resolve_deferred(&mut target, &map, &result.deferred);
        assert!(unresolved.is_empty());
        assert_eq!(target.section_by_name(".rela.text").unwrap().link, symtab.0);
    }

    #[test]
    fn link_correctness_property() {
        let source = source();
        let (mut target, map) = clone(&source);
        correct_links(&source, &mut target, &map, &[]);
        for new in &target.sections {
            if new.link == 0 {
                continue;
            }
            let old = source.section(map.old_for(new.index).unwrap()).unwrap();
            assert_eq!(map.old_for(SectionIndex(new.link)), Some(SectionIndex(old.link)));
        }
    }
}
