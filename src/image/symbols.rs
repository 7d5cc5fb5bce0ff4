//! Symbol records and string tables.
//!
//! Records are read as `object::elf::Sym32`/`Sym64` through the generic
//! [`object::read::elf::Sym`] accessors and written back with
//! [`object::pod::bytes_of`]. Names stay raw bytes throughout.

use std::collections::HashMap;
use std::mem;

use object::elf::{self, FileHeader32, FileHeader64, Sym32, Sym64};
use object::endian::{U16, U32, U64};
use object::pod::{self, bytes_of};
use object::read::elf::{FileHeader, Sym as _};
use object::read::StringTable;
use object::Endianness;

use super::{Header, Name};
use crate::error::{Error, Result};

/// A decoded symbol table entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Symbol {
    pub name: Name,
    pub value: u64,
    pub size: u64,
    pub bind: u8,
    pub kind: u8,
    pub other: u8,
    pub shndx: u16,
}

impl Symbol {
    pub fn info(&self) -> u8 {
        (self.bind << 4) | (self.kind & 0xf)
    }
}

/// One record with its name still an offset into the string table.
#[derive(Debug, Clone, Copy)]
struct Record {
    name: u32,
    value: u64,
    size: u64,
    info: u8,
    other: u8,
    shndx: u16,
}

impl Record {
    fn read<Elf: FileHeader<Endian = Endianness>>(endian: Endianness, sym: &Elf::Sym) -> Self {
        Record {
            name: sym.st_name(endian),
            value: sym.st_value(endian).into(),
            size: sym.st_size(endian).into(),
            info: sym.st_info(),
            other: sym.st_other(),
            shndx: sym.st_shndx(endian),
        }
    }

    fn write(&self, header: &Header, out: &mut Vec<u8>) {
        let endian = header.endian;
        if header.is_64 {
            let sym = Sym64 {
                st_name: U32::new(endian, self.name),
                st_info: self.info,
                st_other: self.other,
                st_shndx: U16::new(endian, self.shndx),
                st_value: U64::new(endian, self.value),
                st_size: U64::new(endian, self.size),
            };
            out.extend_from_slice(bytes_of(&sym));
        } else {
            let sym = Sym32 {
                st_name: U32::new(endian, self.name),
                st_value: U32::new(endian, self.value as u32),
                st_size: U32::new(endian, self.size as u32),
                st_info: self.info,
                st_other: self.other,
                st_shndx: U16::new(endian, self.shndx),
            };
            out.extend_from_slice(bytes_of(&sym));
        }
    }
}

/// `SHN_UNDEF` and the `SHN_LORESERVE..` range carry no section reference.
pub fn is_reserved_index(shndx: u16) -> bool {
    shndx == elf::SHN_UNDEF || shndx >= elf::SHN_LORESERVE
}

/// Size of one symbol record for the image class.
pub fn entry_size(header: &Header) -> usize {
    if header.is_64 {
        mem::size_of::<Sym64<Endianness>>()
    } else {
        mem::size_of::<Sym32<Endianness>>()
    }
}

/// Checks that symbol table contents are a whole number of records of the
/// image class.
fn check_records(header: &Header, data: &[u8], entsize: u64) -> Result<()> {
    let size = entry_size(header);
    if entsize != 0 && entsize != size as u64 {
        return Err(Error::Malformed(format!(
            "symbol entry size {entsize} does not match the {size}-byte record of this class"
        )));
    }
    if data.len() % size != 0 {
        return Err(Error::Malformed(format!(
            "symbol table of {} bytes is not a whole number of {size}-byte records",
            data.len()
        )));
    }
    Ok(())
}

fn read_records<Elf: FileHeader<Endian = Endianness>>(
    endian: Endianness,
    data: &[u8],
) -> Result<Vec<Record>> {
    let count = data.len() / mem::size_of::<Elf::Sym>();
    let (syms, _) = pod::slice_from_bytes::<Elf::Sym>(data, count)
        .map_err(|()| Error::Malformed("symbol table contents are misaligned".into()))?;
    Ok(syms.iter().map(|sym| Record::read::<Elf>(endian, sym)).collect())
}

fn records(header: &Header, data: &[u8], entsize: u64) -> Result<Vec<Record>> {
    check_records(header, data, entsize)?;
    if header.is_64 {
        read_records::<FileHeader64<Endianness>>(header.endian, data)
    } else {
        read_records::<FileHeader32<Endianness>>(header.endian, data)
    }
}

/// Reads the NUL-terminated name at `offset` of a string table.
pub fn name_at(strtab: &[u8], offset: u32) -> Result<&[u8]> {
    StringTable::new(strtab, 0, strtab.len() as u64)
        .get(offset)
        .map_err(|()| {
            Error::Malformed(format!("no string at offset {offset} of the string table"))
        })
}

/// Decodes every record of a symbol table, including the null entry 0.
pub fn decode(header: &Header, data: &[u8], entsize: u64, strtab: &[u8]) -> Result<Vec<Symbol>> {
    records(header, data, entsize)?
        .into_iter()
        .map(|record| {
            Ok(Symbol {
                name: name_at(strtab, record.name)?.into(),
                value: record.value,
                size: record.size,
                bind: record.info >> 4,
                kind: record.info & 0xf,
                other: record.other,
                shndx: record.shndx,
            })
        })
        .collect()
}

/// Appends the encoded record for `symbol`, whose name lives at `name` in
/// the accompanying string table.
pub fn encode(header: &Header, symbol: &Symbol, name: u32, out: &mut Vec<u8>) {
    Record {
        name,
        value: symbol.value,
        size: symbol.size,
        info: symbol.info(),
        other: symbol.other,
        shndx: symbol.shndx,
    }
    .write(header, out);
}

/// Rewrites the section index of every record in place.
///
/// Used for tables whose string table must stay byte-identical, such as
/// `.dynsym`. `remap` receives the current index and returns the new one.
pub fn remap_indices_in_place(
    header: &Header,
    data: &mut [u8],
    entsize: u64,
    mut remap: impl FnMut(u16) -> u16,
) -> Result<usize> {
    let size = entry_size(header);
    let decoded = records(header, data, entsize)?;
    let mut changed = 0;
    let mut encoded = Vec::with_capacity(size);
    for (raw, mut record) in data.chunks_exact_mut(size).zip(decoded) {
        let shndx = remap(record.shndx);
        if shndx == record.shndx {
            continue;
        }
        record.shndx = shndx;
        encoded.clear();
        record.write(header, &mut encoded);
        raw.copy_from_slice(&encoded);
        changed += 1;
    }
    Ok(changed)
}

/// Builds a string table, deduplicating identical names.
#[derive(Debug)]
pub struct StringTableBuilder {
    data: Vec<u8>,
    offsets: HashMap<Vec<u8>, u32>,
}

impl Default for StringTableBuilder {
    fn default() -> Self {
        // Offset 0 is the empty name.
        Self {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }
}

impl StringTableBuilder {
    pub fn add(&mut self, name: &[u8]) -> u32 {
        if name.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(name) {
            return offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(name);
        self.data.push(0);
        self.offsets.insert(name.to_vec(), offset);
        offset
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}
