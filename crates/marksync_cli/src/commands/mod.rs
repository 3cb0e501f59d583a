//! CLI command implementations.

pub mod compact;
pub mod dump_store;
pub mod inspect;
pub mod verify;

use marksync_engine::BookmarkModelMetadata;
use std::path::{Path, PathBuf};

/// File name of the record log inside a store directory.
pub const STORE_FILE_NAME: &str = "records.log";

/// Reads and decodes a metadata blob.
pub fn read_blob(path: &Path) -> Result<BookmarkModelMetadata, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(BookmarkModelMetadata::from_bytes(&bytes)?)
}

/// Resolves a store argument to the log file it names.
pub fn store_file(path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let file = if path.is_dir() {
        path.join(STORE_FILE_NAME)
    } else {
        path.to_path_buf()
    };
    if !file.exists() {
        return Err(format!("No record store found at {}", file.display()).into());
    }
    Ok(file)
}
