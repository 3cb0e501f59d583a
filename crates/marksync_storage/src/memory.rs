//! In-memory record store for testing.

use crate::batch::WriteBatch;
use crate::error::{StorageError, StorageResult};
use crate::store::{MetadataBatch, Record, RecordStore, StoreState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory record store.
///
/// This store keeps everything in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// Commits can be made to fail with [`set_reject_commits`](Self::set_reject_commits)
/// to exercise error paths.
///
/// # Example
///
/// ```rust
/// use marksync_storage::{InMemoryRecordStore, RecordStore};
///
/// let store = InMemoryRecordStore::new();
/// let mut batch = store.create_write_batch();
/// batch.write_data("id", b"data".to_vec());
/// store.commit_write_batch(batch).unwrap();
/// assert_eq!(store.commit_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: RwLock<StoreState>,
    reject_commits: AtomicBool,
    commits: AtomicU64,
}

impl InMemoryRecordStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following commit fail with [`StorageError::Rejected`].
    pub fn set_reject_commits(&self, reject: bool) {
        self.reject_commits.store(reject, Ordering::SeqCst);
    }

    /// Returns the number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Drops all stored records.
    pub fn clear(&self) {
        *self.state.write() = StoreState::default();
    }
}

impl RecordStore for InMemoryRecordStore {
    fn read_all_metadata(&self) -> StorageResult<MetadataBatch> {
        Ok(self.state.read().metadata_batch())
    }

    fn read_data(&self, ids: &[String]) -> StorageResult<Vec<Record>> {
        Ok(self.state.read().read_data(ids))
    }

    fn read_all_data(&self) -> StorageResult<Vec<Record>> {
        Ok(self.state.read().read_all_data())
    }

    fn commit_write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.reject_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("store is rejecting commits".into()));
        }
        self.state.write().apply(&batch);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataChangeList;

    #[test]
    fn empty_store() {
        let store = InMemoryRecordStore::new();
        let metadata = store.read_all_metadata().unwrap();
        assert!(metadata.entities.is_empty());
        assert!(metadata.global_state.is_none());
        assert!(store.read_all_data().unwrap().is_empty());
    }

    #[test]
    fn commit_and_read() {
        let store = InMemoryRecordStore::new();

        let mut changes = MetadataChangeList::new();
        changes.update_metadata("a", vec![1]);
        changes.update_global_state(vec![2]);

        let mut batch = store.create_write_batch();
        batch.write_data("a", b"payload".to_vec());
        batch.take_metadata_changes(changes);
        store.commit_write_batch(batch).unwrap();

        let metadata = store.read_all_metadata().unwrap();
        assert_eq!(metadata.entities.get("a"), Some(&vec![1]));
        assert_eq!(metadata.global_state, Some(vec![2]));

        let data = store.read_data(&["a".into()]).unwrap();
        assert_eq!(data[0].payload, b"payload");
    }

    #[test]
    fn rejected_commit_leaves_state_untouched() {
        let store = InMemoryRecordStore::new();
        store.set_reject_commits(true);

        let mut batch = store.create_write_batch();
        batch.write_data("a", vec![1]);
        let result = store.commit_write_batch(batch);

        assert!(matches!(result, Err(StorageError::Rejected(_))));
        assert!(store.read_all_data().unwrap().is_empty());
        assert_eq!(store.commit_count(), 0);

        store.set_reject_commits(false);
        let mut batch = store.create_write_batch();
        batch.write_data("a", vec![1]);
        store.commit_write_batch(batch).unwrap();
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn clear_metadata() {
        let store = InMemoryRecordStore::new();

        let mut changes = MetadataChangeList::new();
        changes.update_metadata("a", vec![1]);
        let mut batch = store.create_write_batch();
        batch.take_metadata_changes(changes);
        store.commit_write_batch(batch).unwrap();

        let mut changes = MetadataChangeList::new();
        changes.clear_metadata("a");
        changes.clear_global_state();
        let mut batch = store.create_write_batch();
        batch.take_metadata_changes(changes);
        store.commit_write_batch(batch).unwrap();

        assert!(store.read_all_metadata().unwrap().entities.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let store = InMemoryRecordStore::new();
        let mut batch = store.create_write_batch();
        batch.write_data("a", vec![1]);
        store.commit_write_batch(batch).unwrap();

        store.clear();
        assert!(store.read_all_data().unwrap().is_empty());
    }

    #[test]
    fn store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InMemoryRecordStore>();
    }
}
