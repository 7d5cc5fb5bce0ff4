//! ELF Cloning Library.
//!
//! This library provides the core components for the `elfclone` tool.
//! It is organized into several modules:
//! - `config`: CLI configuration and the section cloning policy.
//! - `image`: In-memory ELF model, reader and self-check.
//! - `cloner`: The clone orchestration.
//! - `links`: Section link correction.
//! - `symbol`: Symbol table rebuilding.
//! - `layout`: Segment reconstruction and file offsets.
//! - `payload`: Embedded device payload substitution.
//! - `writer`: ELF serialisation.

pub mod cloner;
pub mod config;
pub mod error;
pub mod image;
pub mod index_map;
pub mod layout;
pub mod links;
pub mod payload;
pub mod symbol;
pub mod utils;
pub mod writer;

pub use error::{Error, Result};
