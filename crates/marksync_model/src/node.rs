//! Bookmark node types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Extensible key/value metadata attached to a node.
pub type MetaInfoMap = BTreeMap<String, String>;

/// Stable local identifier of a tree node.
///
/// Ids are never reused within one tree, so they survive in persisted sync
/// metadata across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a node is a folder or a URL leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A folder that may hold children.
    Folder,
    /// A bookmark pointing at a URL.
    Url,
}

/// The fixed top-level folders every tree carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermanentFolder {
    /// The bookmark bar.
    BookmarkBar,
    /// The "other bookmarks" folder.
    OtherBookmarks,
    /// Bookmarks synced from mobile devices.
    MobileBookmarks,
}

impl PermanentFolder {
    /// All permanent folders, in the order they appear below the root.
    pub const ALL: [PermanentFolder; 3] = [
        PermanentFolder::BookmarkBar,
        PermanentFolder::OtherBookmarks,
        PermanentFolder::MobileBookmarks,
    ];

    /// Default display title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            PermanentFolder::BookmarkBar => "Bookmarks bar",
            PermanentFolder::OtherBookmarks => "Other bookmarks",
            PermanentFolder::MobileBookmarks => "Mobile bookmarks",
        }
    }
}

/// A node in the bookmark tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkNode {
    /// Stable id.
    pub id: NodeId,
    /// Folder or URL.
    pub kind: NodeKind,
    /// Display title.
    pub title: String,
    /// Target URL, present only for URL nodes.
    pub url: Option<String>,
    /// Parent folder, `None` only for the root.
    pub parent: Option<NodeId>,
    /// Ordered children (always empty for URL nodes).
    pub children: Vec<NodeId>,
    /// Creation time in microseconds since the Unix epoch.
    pub creation_time: i64,
    /// Extensible key/value metadata.
    pub meta_info: MetaInfoMap,
    /// Set for the three permanent folders.
    pub permanent: Option<PermanentFolder>,
}

impl BookmarkNode {
    /// Returns true for folders (including the root and permanent folders).
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Returns true for the root and the permanent folders.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.permanent.is_some() || self.parent.is_none()
    }
}

/// Description of a node to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    /// Folder or URL.
    pub kind: NodeKind,
    /// Display title.
    pub title: String,
    /// Target URL, required for URL nodes.
    pub url: Option<String>,
    /// Creation time in microseconds; `None` means now.
    pub creation_time: Option<i64>,
    /// Initial metadata.
    pub meta_info: MetaInfoMap,
}

impl NewNode {
    /// Describes a new folder.
    #[must_use]
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Folder,
            title: title.into(),
            url: None,
            creation_time: None,
            meta_info: MetaInfoMap::new(),
        }
    }

    /// Describes a new URL bookmark.
    #[must_use]
    pub fn url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Url,
            title: title.into(),
            url: Some(url.into()),
            creation_time: None,
            meta_info: MetaInfoMap::new(),
        }
    }

    /// Sets the creation time in microseconds.
    #[must_use]
    pub fn with_creation_time(mut self, creation_time: i64) -> Self {
        self.creation_time = Some(creation_time);
        self
    }

    /// Sets the initial metadata.
    #[must_use]
    pub fn with_meta_info(mut self, meta_info: MetaInfoMap) -> Self {
        self.meta_info = meta_info;
        self
    }
}
