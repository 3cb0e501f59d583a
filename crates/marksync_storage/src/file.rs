//! File-backed record store.

use crate::batch::WriteBatch;
use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::store::{MetadataBatch, Record, RecordStore, StoreState};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Frame marker preceding every batch in the log.
const FRAME_MAGIC: [u8; 4] = *b"MKSL";

/// Magic plus little-endian payload length.
const FRAME_HEADER_LEN: usize = 8;

/// CRC32 over header and payload, little-endian.
const FRAME_TRAILER_LEN: usize = 4;

/// A record store persisted as an append-only log of write batches.
///
/// Each committed [`WriteBatch`] is encoded as CBOR and appended as one
/// frame: magic, payload length, payload and a CRC32 trailer. Opening the
/// store replays every frame into memory. A last frame that is cut short
/// or fails its checksum is truncated away, so the store always reflects
/// a prefix of the committed batches. A commit that fails mid-write rolls
/// the file back to its previous length.
///
/// # Durability
///
/// With [`StoreConfig::sync_on_commit`] set (the default) every commit
/// calls `File::sync_data` before returning.
///
/// # Example
///
/// ```no_run
/// use marksync_storage::{FileRecordStore, RecordStore};
/// use std::path::Path;
///
/// let store = FileRecordStore::open(Path::new("bookmarks.log")).unwrap();
/// let mut batch = store.create_write_batch();
/// batch.write_data("id", b"data".to_vec());
/// store.commit_write_batch(batch).unwrap();
/// ```
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    config: StoreConfig,
    file: Mutex<File>,
    state: RwLock<StoreState>,
    batches: Mutex<usize>,
}

impl FileRecordStore {
    /// Opens or creates a store at the given path with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its log is corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Opens or creates a store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a complete frame
    /// fails to decode.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (state, batches, valid_len) = replay(&bytes)?;
        if valid_len < bytes.len() as u64 {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                file_len = bytes.len(),
                "truncating torn tail of record log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        tracing::debug!(path = %path.display(), batches, "opened record log");

        let store = Self {
            path: path.to_path_buf(),
            config,
            file: Mutex::new(file),
            state: RwLock::new(state),
            batches: Mutex::new(batches),
        };

        let threshold = store.config.compact_after_batches;
        if threshold > 0 && batches > threshold {
            store.compact()?;
        }

        Ok(store)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of batches currently in the log.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        *self.batches.lock()
    }

    /// Rewrites the log as a single snapshot batch.
    ///
    /// The snapshot is written to a sibling file and renamed over the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<()> {
        let mut file = self.file.lock();
        let mut batches = self.batches.lock();
        let snapshot = self.state.read().to_snapshot_batch();

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            if !snapshot.is_empty() {
                tmp.write_all(&encode_frame(&snapshot)?)?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        let mut reopened = OpenOptions::new().read(true).write(true).open(&self.path)?;
        reopened.seek(SeekFrom::End(0))?;
        *file = reopened;

        let before = *batches;
        *batches = usize::from(!snapshot.is_empty());
        tracing::info!(path = %self.path.display(), before, "compacted record log");
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
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
        if batch.is_empty() {
            return Ok(());
        }

        let frame = encode_frame(&batch)?;
        let mut file = self.file.lock();
        append_frame(&mut *file, &frame, self.config.sync_on_commit)?;

        self.state.write().apply(&batch);
        *self.batches.lock() += 1;
        Ok(())
    }
}

/// Log file operations needed to append a frame and undo a partial one.
trait LogFile: Write + Seek {
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;
    fn sync_data(&mut self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&mut self) -> std::io::Result<()> {
        File::sync_data(self)
    }
}

/// Appends `frame` at the end of the log.
///
/// On failure the log is cut back to its previous length so the next
/// frame starts on a frame boundary.
fn append_frame<F: LogFile>(file: &mut F, frame: &[u8], sync: bool) -> StorageResult<()> {
    let start = file.seek(SeekFrom::End(0))?;
    let written = file.write_all(frame).and_then(|()| file.flush()).and_then(|()| {
        if sync {
            file.sync_data()
        } else {
            Ok(())
        }
    });

    if let Err(e) = written {
        tracing::error!(error = %e, offset = start, "record log write failed, rolling back");
        file.set_len(start)?;
        file.seek(SeekFrom::Start(start))?;
        return Err(e.into());
    }
    Ok(())
}

fn encode_frame(batch: &WriteBatch) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(batch, &mut payload).map_err(StorageError::codec)?;

    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::codec("write batch exceeds 4 GiB"))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + FRAME_TRAILER_LEN);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Replays a log, returning the state, batch count and length of the valid
/// prefix.
///
/// A checksum mismatch on the last frame is a torn tail. Anywhere else it
/// is corruption.
fn replay(bytes: &[u8]) -> StorageResult<(StoreState, usize, u64)> {
    let mut state = StoreState::default();
    let mut batches = 0;
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < FRAME_HEADER_LEN {
            break;
        }
        if rest[..4] != FRAME_MAGIC {
            return Err(StorageError::Corrupted {
                offset: offset as u64,
                message: "bad frame magic".into(),
            });
        }
        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let payload_end = FRAME_HEADER_LEN + len;
        let end = payload_end + FRAME_TRAILER_LEN;
        if rest.len() < end {
            break;
        }

        let stored = u32::from_le_bytes([
            rest[payload_end],
            rest[payload_end + 1],
            rest[payload_end + 2],
            rest[payload_end + 3],
        ]);
        let computed = compute_crc32(&rest[..payload_end]);
        if stored != computed {
            if rest.len() == end {
                break;
            }
            return Err(StorageError::Corrupted {
                offset: offset as u64,
                message: format!("checksum mismatch: expected {stored:#010x}, got {computed:#010x}"),
            });
        }

        let batch: WriteBatch = ciborium::from_reader(&rest[FRAME_HEADER_LEN..payload_end])
            .map_err(|e| StorageError::Corrupted {
                offset: offset as u64,
                message: e.to_string(),
            })?;
        state.apply(&batch);
        batches += 1;
        offset += end;
    }

    Ok((state, batches, offset as u64))
}

/// CRC32 (IEEE polynomial).
fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
