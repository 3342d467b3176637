use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::{parse_metadata, PackageMetadata};
use crate::error::{AppError, AppResult};

const METADATA_ENTRY: &str = "metadata.gz";
/// Decompressed gemspec ceiling; real specs are a few KiB.
const MAX_METADATA_BYTES: u64 = 16 * 1024 * 1024;

/// Extract normalized metadata from a `.gem` archive on disk.
///
/// The archive is read in place: only the `metadata.gz` entry is decompressed
/// and nothing is written to disk, so there is no scratch state to clean up on
/// any exit path.
pub fn extract(path: &Path) -> AppResult<PackageMetadata> {
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    trace!(archive = %path.display(), "extracting gem metadata");

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let checksum = format!("{:x}", hasher.finalize());
    file.seek(SeekFrom::Start(0))?;

    let mut meta = read_metadata(file, &label)?;
    meta.checksum = checksum;
    if let Some(stem) = label.strip_suffix(".gem") {
        meta.original_name = stem.to_string();
    }
    debug!(gem = %meta.full_name, checksum = %meta.checksum, "extracted gem metadata");
    Ok(meta)
}

/// Extract metadata from archive bytes already in memory.
pub fn extract_bytes(bytes: &[u8], label: &str) -> AppResult<PackageMetadata> {
    let mut meta = read_metadata(bytes, label)?;
    meta.checksum = format!("{:x}", Sha256::digest(bytes));
    Ok(meta)
}

fn read_metadata<R: Read>(reader: R, label: &str) -> AppResult<PackageMetadata> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| AppError::corrupt_archive(label, format!("unreadable tar: {e}")))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| AppError::corrupt_archive(label, format!("bad tar header: {e}")))?;
        let is_metadata = entry
            .path()
            .map(|p| p == Path::new(METADATA_ENTRY))
            .unwrap_or(false);
        if !is_metadata {
            continue;
        }

        let mut yaml = String::new();
        GzDecoder::new(entry)
            .take(MAX_METADATA_BYTES)
            .read_to_string(&mut yaml)
            .map_err(|e| {
                AppError::corrupt_archive(label, format!("failed to gunzip {METADATA_ENTRY}: {e}"))
            })?;
        return parse_metadata(&yaml, label);
    }

    Err(AppError::corrupt_archive(
        label,
        format!("archive has no {METADATA_ENTRY} entry"),
    ))
}
