//! Symbol table cloning.
//!
//! `.symtab` and its string table are rebuilt rather than copied: the string
//! table is regenerated from the names actually emitted, and every symbol's
//! section index is translated into the clone's numbering. Dynamic symbol
//! tables are copied verbatim by the section cloner and only have their
//! section indices patched in place.

use object::elf;

use crate::error::{Error, Result};
use crate::image::symbols::{self, is_reserved_index, StringTableBuilder, Symbol};
use crate::image::{Image, SectionIndex, SectionKind};
use crate::index_map::IndexMap;

/// The tables created by [`clone_symbol_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTables {
    pub strtab: SectionIndex,
    pub symtab: SectionIndex,
    /// Records emitted, including the null symbol.
    pub symbols: usize,
    /// Symbols whose section was not cloned and now reference `SHN_UNDEF`.
    pub unmapped: usize,
}

/// Translates a symbol's section index into the clone's numbering.
///
/// Reserved markers (`SHN_UNDEF`, `SHN_ABS`, `SHN_COMMON`, processor and OS
/// specific values) pass through. Indices of sections that were not cloned
/// become `SHN_UNDEF`. Extended indices (`SHN_XINDEX`) are not supported and
/// also become `SHN_UNDEF`.
pub fn remap_section_index(shndx: u16, map: &IndexMap) -> u16 {
    if shndx == elf::SHN_XINDEX {
        tracing::warn!("extended section index in symbol table is not supported; cleared");
        return elf::SHN_UNDEF;
    }
    if is_reserved_index(shndx) {
        return shndx;
    }
    match map.new_for(SectionIndex(u32::from(shndx))) {
        Some(new) if new.0 < u32::from(elf::SHN_LORESERVE) => new.0 as u16,
        _ => elf::SHN_UNDEF,
    }
}

/// Rebuilds the static symbol table of `source` in `target`.
///
/// Creates a new string table followed by a new symbol table linked to it,
/// and records `old symtab -> new symtab` in `map` so that relocation
/// sections referring to the symbol table can be relinked. Symbol order is
/// preserved, so relocation entries keep pointing at the right symbols.
pub fn clone_symbol_table(
    source: &Image,
    target: &mut Image,
    map: &mut IndexMap,
) -> Result<SymbolTables> {
    let old_symtab = source
        .section_by_type(elf::SHT_SYMTAB)
        .ok_or_else(|| Error::missing(".symtab"))?;
    let old_strtab = source
        .section(SectionIndex(old_symtab.link))
        .filter(|s| s.kind() == SectionKind::StringTable)
        .ok_or_else(|| Error::missing(".strtab"))?;

    let (Some(records), Some(names)) = (&old_symtab.data, &old_strtab.data) else {
        return Err(Error::Malformed(format!(
            "symbol table `{}` or its string table has no contents",
            old_symtab.name
        )));
    };
    let old_symbols = symbols::decode(&source.header, records, old_symtab.entry_size, names)?;
    tracing::info!("{} symbols found in `{}`", old_symbols.len(), old_symtab.name);

    let strtab = {
        let section = target.add_section(old_strtab.name.clone());
        section.sh_type = elf::SHT_STRTAB;
        section.flags = old_strtab.flags;
        section.addr_align = old_strtab.addr_align.max(1);
        section.index
    };
    let symtab = {
        let section = target.add_section(old_symtab.name.clone());
        section.sh_type = elf::SHT_SYMTAB;
        section.flags = old_symtab.flags;
        section.info = old_symtab.info;
        section.addr_align = old_symtab.addr_align;
        section.entry_size = match old_symtab.entry_size {
            0 => symbols::entry_size(&source.header) as u64,
            size => size,
        };
        section.link = strtab.0;
        section.index
    };
    map.insert(old_symtab.index, symtab);

    let mut strings = StringTableBuilder::default();
    let mut data = Vec::with_capacity(records.len());
    let mut unmapped = 0;

    // Entry 0 is the format's reserved undefined symbol; source record `i`
    // must land on new record `i`.
    symbols::encode(&target.header, &Symbol::default(), 0, &mut data);
    for symbol in old_symbols.iter().skip(1) {
        let shndx = remap_section_index(symbol.shndx, map);
        tracing::trace!(
            "symbol `{}`: value 0x{:x}, size {}, bind {}, type {}, shndx {} -> {}",
            symbol.name,
            symbol.value,
            symbol.size,
            symbol.bind,
            symbol.kind,
            symbol.shndx,
            shndx
        );
        if shndx == elf::SHN_UNDEF && symbol.shndx != elf::SHN_UNDEF {
            tracing::debug!(
                "symbol `{}` lost its section {}: section was not cloned",
                symbol.name,
                symbol.shndx
            );
            unmapped += 1;
        }
        let cloned = Symbol {
            shndx,
            ..symbol.clone()
        };
        let name = strings.add(&cloned.name);
        symbols::encode(&target.header, &cloned, name, &mut data);
    }

    let count = data.len() / symbols::entry_size(&target.header);
    target
        .section_mut(strtab)
        .ok_or_else(|| Error::missing(&old_strtab.name))?
        .set_data(strings.finish());
    target
        .section_mut(symtab)
        .ok_or_else(|| Error::missing(&old_symtab.name))?
        .set_data(data);

    Ok(SymbolTables {
        strtab,
        symtab,
        symbols: count,
        unmapped,
    })
}

/// Patches the section index of every record of every `.dynsym` in `target`.
///
/// Returns the number of records changed.
pub fn remap_dynamic_symbols(target: &mut Image, map: &IndexMap) -> Result<usize> {
    let header = target.header.clone();
    let mut changed = 0;
    for section in target
        .sections
        .iter_mut()
        .filter(|s| s.kind() == SectionKind::DynamicSymbolTable)
    {
        let Some(data) = section.data.as_mut() else {
            continue;
        };
        changed += symbols::remap_indices_in_place(&header, data, section.entry_size, |shndx| {
            remap_section_index(shndx, map)
        })?;
    }
    Ok(changed)
}
