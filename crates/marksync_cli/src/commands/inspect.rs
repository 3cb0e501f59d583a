//! Inspect command implementation.

use super::read_blob;
use marksync_engine::BookmarkModelMetadata;
use serde::Serialize;
use std::path::Path;

/// Blob summary.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Blob path.
    pub path: String,
    /// Blob size in bytes.
    pub size: u64,
    /// Encoding version.
    pub format_version: u32,
    /// Whether the first sync finished.
    pub initial_sync_done: bool,
    /// Data type of the progress marker.
    pub data_type_id: i32,
    /// Progress token length in bytes.
    pub progress_token_len: usize,
    /// Number of entity records.
    pub entity_count: usize,
    /// Number of tombstones.
    pub tombstone_count: usize,
    /// Number of entities with unacknowledged local edits.
    pub unsynced_count: usize,
    /// Entity records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntitySummary>>,
}

/// One entity record.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Server id.
    pub server_id: String,
    /// Local node id, absent for tombstones.
    pub node: Option<u64>,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Local edit counter.
    pub sequence_number: i64,
    /// Acknowledged edit counter.
    pub acked_sequence_number: i64,
    /// Server version.
    pub server_version: i64,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_entities: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let metadata = read_blob(path)?;
    let size = std::fs::metadata(path)?.len();
    let result = summarize(&path.display().to_string(), size, &metadata, show_entities);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn summarize(
    path: &str,
    size: u64,
    metadata: &BookmarkModelMetadata,
    show_entities: bool,
) -> InspectResult {
    let records = &metadata.bookmarks_metadata;
    let entities = show_entities.then(|| {
        records
            .iter()
            .map(|record| EntitySummary {
                server_id: record.metadata.server_id.clone(),
                node: record.id.map(|id| id.0),
                is_deleted: record.metadata.is_deleted,
                sequence_number: record.metadata.sequence_number,
                acked_sequence_number: record.metadata.acked_sequence_number,
                server_version: record.metadata.server_version,
            })
            .collect()
    });

    InspectResult {
        path: path.to_string(),
        size,
        format_version: metadata.format_version,
        initial_sync_done: metadata.model_type_state.initial_sync_done,
        data_type_id: metadata.model_type_state.progress_marker.data_type_id,
        progress_token_len: metadata.model_type_state.progress_marker.token.len(),
        entity_count: records.len(),
        tombstone_count: records.iter().filter(|r| r.metadata.is_deleted).count(),
        unsynced_count: records.iter().filter(|r| r.metadata.is_unsynced()).count(),
        entities,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Sync Metadata: {}", result.path);
    println!("  Size:              {} bytes", result.size);
    println!("  Format version:    {}", result.format_version);
    println!("  Initial sync done: {}", result.initial_sync_done);
    println!(
        "  Progress marker:   type {} ({} token bytes)",
        result.data_type_id, result.progress_token_len
    );
    println!();
    println!("Entities:");
    println!("  Total:      {}", result.entity_count);
    println!("  Tombstones: {}", result.tombstone_count);
    println!("  Unsynced:   {}", result.unsynced_count);

    if let Some(entities) = &result.entities {
        println!();
        println!(
            "  {:<38} {:>8} {:>6} {:>6} {:>8}",
            "Server id", "Node", "Seq", "Acked", "Version"
        );
        for entity in entities {
            let node = match (entity.is_deleted, entity.node) {
                (true, _) => "deleted".to_string(),
                (false, Some(node)) => node.to_string(),
                (false, None) => "-".to_string(),
            };
            println!(
                "  {:<38} {:>8} {:>6} {:>6} {:>8}",
                entity.server_id,
                node,
                entity.sequence_number,
                entity.acked_sequence_number,
                entity.server_version
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_testkit::prelude::*;

    #[test]
    fn summary_counts_records() {
        let harness = SyncTestHarness::new();
        init_with_synced_bookmarks(
            &harness,
            &[BookmarkInfo::url("n1", "title", TEST_URL, BOOKMARK_BAR_ID)],
        );
        let blob = harness.processor.encode_sync_metadata().unwrap();
        let metadata = BookmarkModelMetadata::from_bytes(&blob).unwrap();

        let result = summarize("blob", blob.len() as u64, &metadata, true);

        assert!(result.initial_sync_done);
        assert_eq!(result.entity_count, 2);
        assert_eq!(result.tombstone_count, 0);
        assert_eq!(result.unsynced_count, 0);
        let ids: Vec<_> = result
            .entities
            .unwrap()
            .into_iter()
            .map(|e| e.server_id)
            .collect();
        assert_eq!(ids, vec![BOOKMARK_BAR_ID, "n1"]);
    }

    #[test]
    fn entities_are_omitted_unless_requested() {
        let result = summarize("blob", 0, &BookmarkModelMetadata::default(), false);
        assert!(result.entities.is_none());
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("\"entities\""));
    }
}
