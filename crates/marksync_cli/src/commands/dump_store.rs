//! Dump-store command implementation.

use super::store_file;
use marksync_engine::{BookmarkMetadata, BookmarkSpecifics, ModelTypeState};
use marksync_storage::{FileRecordStore, RecordStore};
use serde::Serialize;
use std::path::Path;

/// Store contents.
#[derive(Debug, Serialize)]
pub struct StoreDump {
    /// Log file path.
    pub path: String,
    /// Batches in the log.
    pub batch_count: usize,
    /// Global sync state, if one was written.
    pub initial_sync_done: Option<bool>,
    /// Metadata records.
    pub records: Vec<RecordDump>,
}

/// One stored entity.
#[derive(Debug, Serialize)]
pub struct RecordDump {
    /// Server id.
    pub id: String,
    /// Local node id.
    pub node: Option<u64>,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Local edit counter.
    pub sequence_number: i64,
    /// Acknowledged edit counter.
    pub acked_sequence_number: i64,
    /// Title from the stored payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// URL from the stored payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Runs the dump-store command.
pub fn run(path: &Path, show_data: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = store_file(path)?;
    let store = FileRecordStore::open(&file)?;
    let dump = dump(&store, show_data)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

fn dump(store: &FileRecordStore, show_data: bool) -> Result<StoreDump, Box<dyn std::error::Error>> {
    let metadata = store.read_all_metadata()?;
    let initial_sync_done = metadata
        .global_state
        .as_deref()
        .map(|bytes| ciborium::from_reader::<ModelTypeState, _>(bytes))
        .transpose()?
        .map(|state| state.initial_sync_done);

    let mut records = Vec::with_capacity(metadata.entities.len());
    for (id, bytes) in &metadata.entities {
        let record: BookmarkMetadata = match ciborium::from_reader(bytes.as_slice()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%id, error = %e, "skipping undecodable metadata record");
                continue;
            }
        };
        let specifics = if show_data {
            store
                .read_data(std::slice::from_ref(id))?
                .first()
                .and_then(|data| ciborium::from_reader::<BookmarkSpecifics, _>(data.payload.as_slice()).ok())
        } else {
            None
        };
        records.push(RecordDump {
            id: id.clone(),
            node: record.id.map(|node| node.0),
            is_deleted: record.metadata.is_deleted,
            sequence_number: record.metadata.sequence_number,
            acked_sequence_number: record.metadata.acked_sequence_number,
            title: specifics.as_ref().map(|s| s.title.clone()),
            url: specifics.and_then(|s| s.url),
        });
    }

    Ok(StoreDump {
        path: store.path().display().to_string(),
        batch_count: store.batch_count(),
        initial_sync_done,
        records,
    })
}

fn print_text_output(dump: &StoreDump) {
    println!("Record Store: {}", dump.path);
    println!("  Batches:           {}", dump.batch_count);
    match dump.initial_sync_done {
        Some(done) => println!("  Initial sync done: {done}"),
        None => println!("  Initial sync done: (no global state)"),
    }
    println!("  Records:           {}", dump.records.len());
    println!();

    for record in &dump.records {
        let status = if record.is_deleted {
            "tombstone".to_string()
        } else if record.sequence_number > record.acked_sequence_number {
            format!("unsynced ({}/{})", record.acked_sequence_number, record.sequence_number)
        } else {
            "synced".to_string()
        };
        let node = record
            .node
            .map_or_else(|| "-".to_string(), |node| node.to_string());
        println!("  {} node={} {}", record.id, node, status);
        if let Some(title) = &record.title {
            println!("      title: {title}");
        }
        if let Some(url) = &record.url {
            println!("      url:   {url}");
        }
    }
}
