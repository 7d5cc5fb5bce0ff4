//! HIP fat binary backend.
//!
//! HIP host executables embed their offload bundle in `.hip_fatbin` and
//! describe it with a `__hipFatBinaryWrapper` record in `.hipFatBinSegment`:
//!
//! ```text
//! offset  size  field
//!      0     4  magic    "HIPF" (0x48495046)
//!      4     4  version
//!      8     8  binary   offset of the bundle
//!     16     8  dummy
//! ```

use super::PayloadFormat;

pub const HIP_FATBIN_SECTION: &str = ".hip_fatbin";
pub const HIP_WRAPPER_SECTION: &str = ".hipFatBinSegment";
pub const HIP_WRAPPER_MAGIC: u32 = 0x4849_5046;

/// Offset of the `binary` field in the wrapper record.
const BINARY_FIELD: usize = 8;

/// Default length of the bundle preamble: one page.
pub const DEFAULT_PREAMBLE_LEN: u64 = 0x1000;

/// The HIP payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hip {
    preamble_len: u64,
}

impl Hip {
    pub fn new(preamble_len: u64) -> Self {
        Self { preamble_len }
    }
}

impl Default for Hip {
    fn default() -> Self {
        Self::new(DEFAULT_PREAMBLE_LEN)
    }
}

impl PayloadFormat for Hip {
    fn payload_section(&self) -> &str {
        HIP_FATBIN_SECTION
    }

    fn wrapper_section(&self) -> &str {
        HIP_WRAPPER_SECTION
    }

    fn offset_field(&self) -> usize {
        BINARY_FIELD
    }

    fn preamble_len(&self) -> u64 {
        self.preamble_len
    }

    fn recognizes_wrapper(&self, wrapper: &[u8]) -> bool {
        wrapper.get(..4) == Some(&HIP_WRAPPER_MAGIC.to_le_bytes()[..])
    }
}
