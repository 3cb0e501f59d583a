//! Sync entity types exchanged with the commit queue.

use marksync_model::{BookmarkNode, MetaInfoMap, PermanentFolder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Specifics field number of the bookmarks data type.
pub const BOOKMARKS_DATA_TYPE_ID: i32 = 32904;

/// Server tag of the bookmark bar folder.
pub const BOOKMARK_BAR_TAG: &str = "bookmark_bar";

/// Server tag of the mobile bookmarks folder.
pub const MOBILE_BOOKMARKS_TAG: &str = "synced_bookmarks";

/// Server tag of the other bookmarks folder.
pub const OTHER_BOOKMARKS_TAG: &str = "other_bookmarks";

/// Server tag of the bookmarks type root.
pub const BOOKMARKS_ROOT_TAG: &str = "google_chrome_bookmarks";

/// Parent id carried by the permanent folders.
pub const BOOKMARKS_ROOT_ID: &str = "32904_google_chrome_bookmarks";

/// Parent id carried by the type root itself.
pub const ROOT_PARENT_ID: &str = "0";

/// Server version of an entity that was never committed.
pub const UNCOMMITTED_VERSION: i64 = -1;

/// Microseconds between 1601-01-01 and 1970-01-01.
pub const WINDOWS_EPOCH_DELTA_US: i64 = 11_644_473_600_000_000;

/// Maps a server tag to the permanent folder it names.
pub fn permanent_folder_for_tag(tag: &str) -> Option<PermanentFolder> {
    match tag {
        BOOKMARK_BAR_TAG => Some(PermanentFolder::BookmarkBar),
        OTHER_BOOKMARKS_TAG => Some(PermanentFolder::OtherBookmarks),
        MOBILE_BOOKMARKS_TAG => Some(PermanentFolder::MobileBookmarks),
        _ => None,
    }
}

/// Returns the server tag of a permanent folder.
pub fn tag_for_permanent_folder(folder: PermanentFolder) -> &'static str {
    match folder {
        PermanentFolder::BookmarkBar => BOOKMARK_BAR_TAG,
        PermanentFolder::OtherBookmarks => OTHER_BOOKMARKS_TAG,
        PermanentFolder::MobileBookmarks => MOBILE_BOOKMARKS_TAG,
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}

/// One key/value pair of bookmark metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    /// Key, unique within one specifics.
    pub key: String,
    /// Value.
    pub value: String,
}

/// The synced content of a bookmark or folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkSpecifics {
    /// Display title.
    pub title: String,
    /// Target URL; absent for folders.
    pub url: Option<String>,
    /// Creation time in microseconds since 1601-01-01; 0 means unknown.
    pub creation_time_us: i64,
    /// Extensible metadata.
    pub meta_info: Vec<MetaInfo>,
}

impl BookmarkSpecifics {
    /// Specifics for a folder.
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Specifics for a URL bookmark.
    pub fn url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Captures the synced content of a tree node.
    pub fn from_node(node: &BookmarkNode) -> Self {
        Self {
            title: node.title.clone(),
            url: node.url.clone(),
            creation_time_us: node.creation_time.saturating_add(WINDOWS_EPOCH_DELTA_US),
            meta_info: node
                .meta_info
                .iter()
                .map(|(key, value)| MetaInfo {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.url.is_none()
            && self.creation_time_us == 0
            && self.meta_info.is_empty()
    }

    /// Returns the metadata as a map. Later duplicates of a key win.
    pub fn meta_info_map(&self) -> MetaInfoMap {
        self.meta_info
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    /// Creation time in microseconds since the Unix epoch, `None` if unknown.
    pub fn creation_time_unix_us(&self) -> Option<i64> {
        (self.creation_time_us != 0).then(|| self.creation_time_us - WINDOWS_EPOCH_DELTA_US)
    }

    /// Returns true if these specifics describe a usable bookmark.
    ///
    /// Empty specifics are never valid. Folders are otherwise always valid;
    /// URL bookmarks need a well-formed URL.
    pub fn is_valid_bookmark(&self, is_folder: bool) -> bool {
        if self.is_empty() {
            tracing::error!("invalid bookmark: empty specifics");
            return false;
        }
        if is_folder {
            return true;
        }
        match self.url.as_deref().map(url::Url::parse) {
            Some(Ok(_)) => true,
            _ => {
                tracing::error!(url = ?self.url, "invalid bookmark: invalid url in the specifics");
                false
            }
        }
    }

    /// SHA-256 of the CBOR encoding.
    pub fn hash(&self) -> Vec<u8> {
        let mut encoded = Vec::new();
        if let Err(e) = ciborium::into_writer(self, &mut encoded) {
            tracing::error!(error = %e, "failed to encode bookmark specifics for hashing");
            encoded.clear();
        }
        Sha256::digest(&encoded).to_vec()
    }
}

/// One entity as seen by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityData {
    /// Server id (or client id for uncommitted entities).
    pub id: String,
    /// Server id of the parent.
    pub parent_id: String,
    /// Well-known tag of permanent entities.
    pub server_defined_unique_tag: Option<String>,
    /// Whether the entity is a folder.
    pub is_folder: bool,
    /// Content; `None` marks a deletion.
    pub specifics: Option<BookmarkSpecifics>,
    /// Creation time in microseconds since the Unix epoch.
    pub creation_time: i64,
    /// Modification time in microseconds since the Unix epoch.
    pub modification_time: i64,
}

impl EntityData {
    /// Returns true if this entity is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.specifics.is_none()
    }
}

/// One record of an inbound update batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponseData {
    /// The updated entity.
    pub entity: EntityData,
    /// Server version after the update.
    pub response_version: i64,
}

/// Opaque cursor into the server's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressMarker {
    /// Specifics field number of the data type.
    pub data_type_id: i32,
    /// Server-defined token.
    pub token: Vec<u8>,
}

impl Default for ProgressMarker {
    fn default() -> Self {
        Self {
            data_type_id: BOOKMARKS_DATA_TYPE_ID,
            token: Vec::new(),
        }
    }
}

/// Global sync state of the bookmarks collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTypeState {
    /// Progress through the server's change stream.
    pub progress_marker: ProgressMarker,
    /// Whether the first full download has been applied.
    pub initial_sync_done: bool,
}

/// An unsynced entity handed to the commit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequestData {
    /// The entity as it should be committed.
    pub entity: EntityData,
    /// Local sequence number being committed.
    pub sequence_number: i64,
    /// Server version the edit is based on.
    pub base_version: i64,
    /// Hash of the committed specifics (empty for deletions).
    pub specifics_hash: Vec<u8>,
}

/// The server's answer for one committed entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponseData {
    /// Id the entity was committed under.
    pub client_id: String,
    /// Id assigned by the server.
    pub id: String,
    /// Sequence number that was committed.
    pub sequence_number: i64,
    /// New server version.
    pub response_version: i64,
}
