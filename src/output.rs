//! Output persistence: validation log, export files and the summary CSV.
//!
//! Supports pretty-printed JSON, optional gzip, and CSV append.

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::export::SystemExport;
use crate::stats::SystemStats;

/// Logs a summary row as pretty-printed JSON.
pub fn print_json(stats: &SystemStats) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

/// Writes any serializable value as pretty-printed JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &bytes, false).map(|_| ())
}

/// Writes bytes to `path`, or to `path.gz` compressed when `gzip` is set.
/// Returns the path actually written.
pub fn write_bytes(path: &Path, bytes: &[u8], gzip: bool) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let (target, body) = if gzip {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;

        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        (PathBuf::from(name), compressed)
    } else {
        (path.to_path_buf(), bytes.to_vec())
    };

    fs::write(&target, body).with_context(|| format!("Failed to write {}", target.display()))?;
    debug!(path = %target.display(), gzip, "Wrote file");
    Ok(target)
}

/// Writes `<dir>/<system>.json` and `<dir>/<system>.geojson`.
pub fn write_export(dir: &Path, export: &SystemExport, gzip: bool) -> Result<()> {
    write_bytes(&dir.join(format!("{}.json", export.system)), &export.graph, gzip)?;
    write_bytes(
        &dir.join(format!("{}.geojson", export.system)),
        &export.geojson,
        gzip,
    )?;
    Ok(())
}

/// Appends a [`SystemStats`] record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, stats: &SystemStats) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(stats)?;
    writer.flush()?;

    Ok(())
}
