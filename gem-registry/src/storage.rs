//! On-disk layout helpers: sharded archive paths and atomic writes.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Reject names that could escape their directory.
pub fn validate_file_name(file_name: &str) -> AppResult<()> {
    if file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.contains(['/', '\\', '\0'])
        || file_name.contains("..")
    {
        warn!(file = %file_name, "rejected unsafe file name");
        return Err(AppError::BadRequest(format!("invalid file name: {file_name:?}")));
    }
    Ok(())
}

/// `<gem_dir>/<namespace>/<first character>/<file_name>`
pub fn gem_path(gem_dir: &Path, namespace: &str, file_name: &str) -> AppResult<PathBuf> {
    validate_file_name(file_name)?;
    let shard: String = file_name.chars().take(1).collect();
    Ok(gem_dir.join(namespace).join(shard).join(file_name))
}

/// Write `content` next to `path` then rename it into place, so readers see
/// either the old file or the complete new one.
pub fn write_atomic(path: &Path, content: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::InternalError(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    debug!(path = %path.display(), size = content.len(), "wrote file");
    Ok(())
}

/// Async counterpart of [`write_atomic`] for request handlers.
pub async fn save_file<P: AsRef<Path>>(path: P, content: Vec<u8>) -> AppResult<()> {
    let path = path.as_ref().to_path_buf();
    let size = content.len();
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &content))
        .await
        .map_err(|e| AppError::InternalError(format!("write task failed: {e}")))??;
    info!(path = %path.display(), size, "file saved");
    Ok(())
}

pub async fn read_file<P: AsRef<Path>>(path: P) -> AppResult<Vec<u8>> {
    let path = path.as_ref();
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "file not found");
            Err(AppError::NotFound(format!(
                "{} not found",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// A file counts as cached only when it exists and is non-empty.
pub async fn is_cached<P: AsRef<Path>>(path: P) -> bool {
    matches!(fs::metadata(path.as_ref()).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

/// Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> AppResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed file");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
