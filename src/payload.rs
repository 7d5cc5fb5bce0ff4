//! Embedded payload substitution.
//!
//! Host executables carry their device code as an opaque blob in a payload
//! section, described by a small wrapper record in a companion section. The
//! [`PayloadFormat`] trait captures where those live for one toolchain so the
//! patcher itself stays format agnostic; [`hip`] is the only backend.
//!
//! Patching is strictly in place: the payload section never grows, and all
//! checks run before the first byte is modified.

use std::path::Path;

use crate::error::{Error, Result};
use crate::image::{Image, Section};
use crate::writer;

pub mod hip;

/// Location and shape of an embedded payload for one toolchain.
pub trait PayloadFormat {
    /// Name of the section holding the payload blob.
    fn payload_section(&self) -> &str;

    /// Name of the section holding the wrapper record.
    fn wrapper_section(&self) -> &str;

    /// Byte position, within the wrapper record, of the 8-byte
    /// little-endian offset of the blob.
    fn offset_field(&self) -> usize;

    /// Length of the fixed preamble at the start of the payload section.
    /// The replacement is written after it.
    fn preamble_len(&self) -> u64;

    /// Whether `wrapper` carries this format's identification.
    fn recognizes_wrapper(&self, wrapper: &[u8]) -> bool;
}

/// What a successful patch changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    /// Bytes of replacement written.
    pub written: u64,
    /// Bytes available after the preamble.
    pub capacity: u64,
    pub old_offset: u64,
    pub new_offset: u64,
}

/// Checked patch, computed before anything is modified.
#[derive(Debug)]
struct PatchPlan {
    report: PatchReport,
    field: usize,
    preamble: usize,
}

/// Replaces the payload of an image.
pub struct PayloadPatcher<F: PayloadFormat> {
    format: F,
    clear_tail: bool,
}

impl<F: PayloadFormat> PayloadPatcher<F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            clear_tail: false,
        }
    }

    /// Zero the remainder of the payload region after the replacement.
    pub fn clear_tail(mut self, clear: bool) -> Self {
        self.clear_tail = clear;
        self
    }

    /// Space available for a replacement in a payload section of `size` bytes.
    pub fn capacity(&self, size: u64) -> u64 {
        size.saturating_sub(self.format.preamble_len())
    }

    fn plan(&self, payload: &Section, wrapper: &Section, replacement: &[u8]) -> Result<PatchPlan> {
        if payload.data.is_none() {
            return Err(Error::Malformed(format!(
                "payload section `{}` has no file contents",
                payload.name
            )));
        }

        let preamble = self.format.preamble_len();
        if payload.size < preamble {
            return Err(Error::Malformed(format!(
                "payload section `{}` is smaller than its {preamble}-byte preamble",
                payload.name
            )));
        }
        let capacity = self.capacity(payload.size);
        let needed = replacement.len() as u64;
        if needed > capacity {
            return Err(Error::CapacityExceeded {
                section: payload.name.to_string(),
                needed,
                available: capacity,
            });
        }

        let field = self.format.offset_field();
        let record = wrapper.data.as_deref().unwrap_or_default();
        let Some(raw) = record.get(field..field + 8) else {
            return Err(Error::Malformed(format!(
                "wrapper section `{}` is too short for an offset at byte {field}",
                wrapper.name
            )));
        };
        if !self.format.recognizes_wrapper(record) {
            tracing::warn!(
                "wrapper section `{}` does not carry the expected identification",
                wrapper.name
            );
        }

        let mut bytes = [0; 8];
        bytes.copy_from_slice(raw);
        let old_offset = u64::from_le_bytes(bytes);
        let new_offset = old_offset.checked_add(preamble).ok_or_else(|| {
            Error::Malformed(format!("payload offset 0x{old_offset:x} overflows when adjusted"))
        })?;

        Ok(PatchPlan {
            report: PatchReport {
                written: needed,
                capacity,
                old_offset,
                new_offset,
            },
            field,
            preamble: preamble as usize,
        })
    }

    fn write_payload(&self, plan: &PatchPlan, region: &mut [u8], replacement: &[u8]) {
        let start = plan.preamble;
        region[start..start + replacement.len()].copy_from_slice(replacement);
        if self.clear_tail {
            region[start + replacement.len()..].fill(0);
        }
    }

    fn write_offset(plan: &PatchPlan, wrapper: &mut [u8]) {
        wrapper[plan.field..plan.field + 8].copy_from_slice(&plan.report.new_offset.to_le_bytes());
    }

    fn locate<'i>(&self, image: &'i Image) -> Result<(&'i Section, &'i Section)> {
        let payload = image
            .section_by_name(self.format.payload_section())
            .ok_or_else(|| Error::missing(self.format.payload_section()))?;
        let wrapper = image
            .section_by_name(self.format.wrapper_section())
            .ok_or_else(|| Error::missing(self.format.wrapper_section()))?;
        Ok((payload, wrapper))
    }

    /// Substitutes the payload of an in-memory image.
    pub fn patch_image(&self, image: &mut Image, replacement: &[u8]) -> Result<PatchReport> {
        let (payload, wrapper) = self.locate(image)?;
        let plan = self.plan(payload, wrapper, replacement)?;
        let (payload, wrapper) = (payload.index, wrapper.index);

        if let Some(region) = image.section_mut(payload).and_then(|s| s.data.as_mut()) {
            self.write_payload(&plan, region, replacement);
        }
        if let Some(record) = image.section_mut(wrapper).and_then(|s| s.data.as_mut()) {
            Self::write_offset(&plan, record);
        }
        self.log(&plan.report);
        Ok(plan.report)
    }

    /// Substitutes the payload directly in the bytes of an ELF file,
    /// leaving every other byte untouched.
    pub fn patch_bytes(&self, file: &mut [u8], replacement: &[u8]) -> Result<PatchReport> {
        let image = Image::parse(file)?;
        let (payload, wrapper) = self.locate(&image)?;
        let plan = self.plan(payload, wrapper, replacement)?;
        let payload_range = payload.offset as usize..(payload.offset + payload.size) as usize;
        let wrapper_start = wrapper.offset as usize;

        self.write_payload(&plan, &mut file[payload_range], replacement);
        Self::write_offset(&plan, &mut file[wrapper_start..]);
        self.log(&plan.report);
        Ok(plan.report)
    }

    /// Patches the image at `source` and atomically writes the result to
    /// `output`, which may be `source` itself.
    pub fn patch_file(
        &self,
        source: &Path,
        replacement: &[u8],
        output: &Path,
    ) -> Result<PatchReport> {
        let mut bytes = std::fs::read(source).map_err(|e| Error::io(source, e))?;
        let report = self.patch_bytes(&mut bytes, replacement)?;
        writer::persist(&bytes, output, Some(source))?;
        Ok(report)
    }

    fn log(&self, report: &PatchReport) {
        tracing::info!(
            "wrote {} of {} payload bytes into `{}`; offset 0x{:x} -> 0x{:x}",
            report.written,
            report.capacity,
            self.format.payload_section(),
            report.old_offset,
            report.new_offset
        );
    }
}
