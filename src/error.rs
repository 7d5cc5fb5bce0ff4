//! Error types.
//!
//! Every fatal condition of the clone and patch pipelines maps to one variant
//! of [`Error`]. Recoverable problems (dangling cross references) are not
//! errors; they are reported through [`crate::cloner::CloneReport`].

use std::path::PathBuf;

use thiserror::Error;

/// The error type returned by all fallible operations of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A section required by the operation is absent from the image.
    #[error("required section `{name}` is missing")]
    MissingSection { name: String },

    /// The replacement payload does not fit into the reserved region.
    #[error("payload of {needed} bytes exceeds the {available} bytes reserved in `{section}`")]
    CapacityExceeded {
        section: String,
        needed: u64,
        available: u64,
    },

    /// A section would be registered into a segment below the address of
    /// the previously registered one.
    #[error(
        "section `{section}` at 0x{addr:x} follows 0x{previous:x} in segment {segment}; \
         members must be in address order"
    )]
    StructuralOrder {
        segment: usize,
        section: String,
        addr: u64,
        previous: u64,
    },

    /// The structural self-check of an image found inconsistencies.
    #[error("image failed the structural self-check:\n{0}")]
    Validation(String),

    /// Opening, reading or writing a file failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input could not be parsed as an ELF image.
    #[error("failed to parse image: {0}")]
    Parse(#[from] object::read::Error),

    /// The ELF writer rejected the output image.
    #[error("failed to write image: {0}")]
    Write(#[from] object::write::Error),

    /// The input is not in a supported format.
    #[error("unsupported input: {0}")]
    Unsupported(String),

    /// The image is structurally damaged in a way that prevents the operation.
    #[error("malformed image: {0}")]
    Malformed(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing(name: impl std::fmt::Display) -> Self {
        Error::MissingSection {
            name: name.to_string(),
        }
    }
}

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
