//! Verify command implementation.

use super::read_blob;
use marksync_engine::METADATA_FORMAT_VERSION;
use std::path::Path;

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying sync metadata at {}", path.display());
    println!();

    let metadata = read_blob(path)?;
    println!(
        "✓ Decoded format v{} ({} entities)",
        metadata.format_version,
        metadata.bookmarks_metadata.len()
    );
    if metadata.format_version < METADATA_FORMAT_VERSION {
        println!("  note: written by an older format version");
    }

    let issues = metadata.validate();
    if issues.is_empty() {
        println!("✓ No inconsistencies found");
        return Ok(());
    }

    println!("✗ {} issue(s) found:", issues.len());
    for issue in &issues {
        println!("  - {issue}");
    }
    Err(format!("{} metadata issue(s)", issues.len()).into())
}
