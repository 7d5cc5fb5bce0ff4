//! Configuration module.
//!
//! This module defines the command-line interface using `clap` and the
//! section cloning policy derived from it. The policy is a plain value so it
//! can be inspected and tested without running a clone.

use clap::Parser;
use std::path::PathBuf;

use crate::image::{Image, Section, SectionKind};
use crate::payload::hip::DEFAULT_PREAMBLE_LEN;

/// Rebuilds an ELF executable, optionally replacing its embedded HIP fat binary.
///
/// With an output path the executable is cloned section by section into a
/// fresh image and the payload is substituted in the clone. Without one the
/// payload is patched directly into the source executable.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Executable to clone or patch
    pub source: PathBuf,

    /// Replacement device payload
    pub payload: PathBuf,

    /// Where to write the clone (omit to patch the source in place)
    pub output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,

    /// Length of the fixed header that precedes the blob in the payload section
    #[arg(long, default_value_t = DEFAULT_PREAMBLE_LEN, value_parser = parse_u64)]
    pub preamble_len: u64,

    /// Zero the part of the payload region the replacement does not cover
    #[arg(long)]
    pub clear_tail: bool,

    /// Clone without substituting the payload
    #[arg(long)]
    pub no_payload: bool,

    /// Also copy the source section name table
    #[arg(long)]
    pub keep_name_table: bool,

    /// Drop relocation sections from the clone
    #[arg(long)]
    pub no_relocations: bool,

    /// Drop dynamic linking sections from the clone
    #[arg(long)]
    pub no_dynamic: bool,

    /// Leave dynamic symbol section indices untouched
    #[arg(long)]
    pub static_symbols_only: bool,

    /// Section type (sh_type) to leave out of the clone; repeatable
    #[arg(long = "exclude-type", value_name = "SH_TYPE", value_parser = parse_u32)]
    pub exclude_types: Vec<u32>,
}

impl Config {
    pub fn policy(&self) -> ClonePolicy {
        ClonePolicy {
            include_auto_generated_name_table: self.keep_name_table,
            include_relocations: !self.no_relocations,
            include_dynamic_linking: !self.no_dynamic,
            excluded_types: self.exclude_types.clone(),
            symbols: if self.static_symbols_only {
                SymbolScope::Static
            } else {
                SymbolScope::StaticAndDynamic
            },
            ..ClonePolicy::default()
        }
    }
}

fn parse_u64(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid number `{value}`: {e}"))
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let wide = parse_u64(value)?;
    u32::try_from(wide).map_err(|_| format!("`{value}` does not fit in 32 bits"))
}

/// Which symbol tables get their section indices remapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// Only `.symtab`, which is always rebuilt.
    Static,
    /// `.symtab` plus every cloned `.dynsym`.
    StaticAndDynamic,
}

/// What the section cloner does with one source section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Clone,
    Skip,
    /// Regenerated by a later pass instead of being copied.
    Rebuild,
}

/// Selection rules for the section cloner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonePolicy {
    pub include_program_data: bool,
    pub include_zero_fill: bool,
    /// The source `.shstrtab`. The writer always generates its own.
    pub include_auto_generated_name_table: bool,
    pub include_others_by_default: bool,
    pub include_relocations: bool,
    pub include_dynamic_linking: bool,
    /// `sh_type` values never cloned, checked after the rules above for
    /// program data, zero-fill data and the name table.
    pub excluded_types: Vec<u32>,
    pub symbols: SymbolScope,
}

impl Default for ClonePolicy {
    fn default() -> Self {
        Self {
            include_program_data: true,
            include_zero_fill: true,
            include_auto_generated_name_table: false,
            include_others_by_default: true,
            include_relocations: true,
            include_dynamic_linking: true,
            excluded_types: Vec::new(),
            symbols: SymbolScope::StaticAndDynamic,
        }
    }
}

impl ClonePolicy {
    /// Decides the fate of `section`, which belongs to `image`.
    pub fn decide(&self, image: &Image, section: &Section) -> Disposition {
        let pick = |include: bool| {
            if include {
                Disposition::Clone
            } else {
                Disposition::Skip
            }
        };

        if image.is_name_table(section.index) {
            return pick(self.include_auto_generated_name_table);
        }
        match section.kind() {
            SectionKind::ProgramData => return pick(self.include_program_data),
            SectionKind::ZeroFill => return pick(self.include_zero_fill),
            SectionKind::Null => return Disposition::Skip,
            _ => {}
        }
        if self.excluded_types.contains(&section.sh_type) {
            return Disposition::Skip;
        }
        match section.kind() {
            SectionKind::SymbolTable => Disposition::Rebuild,
            SectionKind::StringTable if is_symbol_name_table(image, section) => {
                Disposition::Rebuild
            }
            SectionKind::Relocation => pick(self.include_relocations),
            SectionKind::Dynamic | SectionKind::DynamicSymbolTable => {
                pick(self.include_dynamic_linking)
            }
            _ => pick(self.include_others_by_default),
        }
    }
}

/// Whether some `SHT_SYMTAB` section names its symbols out of `section`.
fn is_symbol_name_table(image: &Image, section: &Section) -> bool {
    image
        .sections
        .iter()
        .any(|s| s.kind() == SectionKind::SymbolTable && s.link == section.index.0)
}
