//! Entry point for elfclone.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Read the source executable and the replacement payload.
//! 3. Either clone the executable (header, sections, links, symbols,
//!    segments), substitute the payload in the clone and write it out, or
//!    patch the payload of the source in place when no output is given.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use tracing_subscriber::EnvFilter;

use elfclone::cloner::clone_image;
use elfclone::config::Config;
use elfclone::image::Image;
use elfclone::payload::hip::Hip;
use elfclone::payload::PayloadPatcher;
use elfclone::writer;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let patcher =
        PayloadPatcher::new(Hip::new(config.preamble_len)).clear_tail(config.clear_tail);
    let read_payload = || {
        fs::read(&config.payload)
            .with_context(|| format!("failed to read payload {}", config.payload.display()))
    };

    let Some(output) = &config.output else {
        if config.no_payload {
            anyhow::bail!("--no-payload needs an output path; nothing to do in place");
        }
        let payload = read_payload()?;
        let report = patcher
            .patch_file(&config.source, &payload, &config.source)
            .with_context(|| format!("failed to patch {}", config.source.display()))?;
        println!(
            "Patched {} ({} of {} bytes used)",
            config.source.display(),
            report.written,
            report.capacity
        );
        return Ok(());
    };

    // 1. Load the source image
    let source = Image::open(&config.source)
        .with_context(|| format!("failed to load {}", config.source.display()))?;

    // 2. Clone header, sections, links, symbols and segments
    let policy = config.policy();
    let (mut image, report) = clone_image(&source, &policy).context("failed to clone image")?;

    // 3. Substitute the payload
    if !config.no_payload {
        let payload = read_payload()?;
        patcher
            .patch_image(&mut image, &payload)
            .context("failed to substitute payload")?;
    }

    // 4. Check and write the clone
    writer::save(&image, output, Some(&config.source))
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Cloned {} sections and {} symbols to {} ({} dangling links)",
        report.cloned_sections,
        report.symbols,
        output.display(),
        report.dangling.len()
    );
    Ok(())
}
