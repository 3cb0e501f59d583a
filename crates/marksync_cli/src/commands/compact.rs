//! Compact command implementation.

use super::store_file;
use marksync_storage::{FileRecordStore, RecordStore};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = store_file(path)?;
    let size_before = std::fs::metadata(&file)?.len();

    let store = FileRecordStore::open(&file)?;
    let batches_before = store.batch_count();
    let records = store.read_all_metadata()?.entities.len();

    println!("Compacting record store at {}", file.display());
    println!("  Batches before: {batches_before}");
    println!("  Records:        {records}");

    store.compact()?;

    let size_after = std::fs::metadata(&file)?.len();
    println!("  Batches after:  {}", store.batch_count());
    println!("  Size before: {size_before} bytes");
    println!("  Size after:  {size_after} bytes");
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_testkit::prelude::*;

    #[test]
    fn compaction_keeps_records() {
        let store = TestStore::new();
        let harness = SyncTestHarness::new();
        harness.processor.attach_store(store.store.clone()).unwrap();
        init_with_synced_bookmarks(
            &harness,
            &[BookmarkInfo::url("n1", "title", TEST_URL, BOOKMARK_BAR_ID)],
        );
        harness.apply(vec![create_tombstone("n1")]);
        let path = store.store.path().to_path_buf();
        drop(harness);

        run(&path).unwrap();

        let reopened = store.reopen();
        assert_eq!(reopened.batch_count(), 1);
        let ids: Vec<_> = reopened.read_all_metadata().unwrap().entities.into_keys().collect();
        assert_eq!(ids, vec![BOOKMARK_BAR_ID]);
    }
}
