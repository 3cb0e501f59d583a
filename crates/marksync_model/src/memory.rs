//! In-memory bookmark tree.

use crate::error::{ModelError, ModelResult};
use crate::model::BookmarkModel;
use crate::node::{BookmarkNode, MetaInfoMap, NewNode, NodeId, NodeKind, PermanentFolder};
use crate::observer::{BookmarkModelObserver, NodeChange, ObserverId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// An in-memory bookmark tree.
///
/// The root has id 0 and the permanent folders ids 1 to 3, in
/// [`PermanentFolder::ALL`] order. Mutations made while undo is not
/// suspended are kept in an undo history.
///
/// # Example
///
/// ```rust
/// use marksync_model::{BookmarkModel, MemoryBookmarkModel, PermanentFolder};
///
/// let mut model = MemoryBookmarkModel::new();
/// let bar = model.permanent_node(PermanentFolder::BookmarkBar);
/// let id = model.add_url(bar, 0, "Rust", "https://www.rust-lang.org/").unwrap();
/// assert_eq!(model.children(bar), &[id]);
/// ```
pub struct MemoryBookmarkModel {
    nodes: HashMap<NodeId, BookmarkNode>,
    root: NodeId,
    permanent: [NodeId; 3],
    next_id: u64,
    loaded: bool,
    extensive_depth: usize,
    undo_suspended: usize,
    undo_history: Vec<NodeChange>,
    observers: Vec<(ObserverId, Arc<dyn BookmarkModelObserver>)>,
    next_observer: u64,
}

impl fmt::Debug for MemoryBookmarkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBookmarkModel")
            .field("nodes", &self.nodes.len())
            .field("loaded", &self.loaded)
            .field("extensive_depth", &self.extensive_depth)
            .field("undo_suspended", &self.undo_suspended)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for MemoryBookmarkModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBookmarkModel {
    /// Creates a loaded tree holding only the root and permanent folders.
    #[must_use]
    pub fn new() -> Self {
        let mut model = Self::new_unloaded();
        model.loaded = true;
        model
    }

    /// Creates a tree that rejects mutations until
    /// [`finish_loading`](Self::finish_loading) is called.
    #[must_use]
    pub fn new_unloaded() -> Self {
        let root = NodeId(0);
        let now = now_micros();
        let mut nodes = HashMap::new();
        let mut permanent = [NodeId(0); 3];

        for (i, folder) in PermanentFolder::ALL.into_iter().enumerate() {
            let id = NodeId(i as u64 + 1);
            permanent[i] = id;
            nodes.insert(
                id,
                BookmarkNode {
                    id,
                    kind: NodeKind::Folder,
                    title: folder.title().to_string(),
                    url: None,
                    parent: Some(root),
                    children: Vec::new(),
                    creation_time: now,
                    meta_info: MetaInfoMap::new(),
                    permanent: Some(folder),
                },
            );
        }
        nodes.insert(
            root,
            BookmarkNode {
                id: root,
                kind: NodeKind::Folder,
                title: String::new(),
                url: None,
                parent: None,
                children: permanent.to_vec(),
                creation_time: now,
                meta_info: MetaInfoMap::new(),
                permanent: None,
            },
        );

        Self {
            nodes,
            root,
            permanent,
            next_id: permanent.len() as u64 + 1,
            loaded: false,
            extensive_depth: 0,
            undo_suspended: 0,
            undo_history: Vec::new(),
            observers: Vec::new(),
            next_observer: 1,
        }
    }

    /// Marks the tree loaded and notifies observers.
    pub fn finish_loading(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        tracing::debug!(nodes = self.nodes.len(), "bookmark model loaded");
        for observer in self.observer_list() {
            observer.model_loaded();
        }
    }

    /// Returns the total number of nodes, including root and permanent folders.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the mutations recorded while undo was not suspended.
    #[must_use]
    pub fn undo_history(&self) -> &[NodeChange] {
        &self.undo_history
    }

    /// Forgets the recorded undo history.
    pub fn clear_undo_history(&mut self) {
        self.undo_history.clear();
    }

    /// Returns true while a run of extensive changes is open.
    #[must_use]
    pub fn in_extensive_changes(&self) -> bool {
        self.extensive_depth > 0
    }

    /// Returns true while undo recording is suspended.
    #[must_use]
    pub fn is_undo_suspended(&self) -> bool {
        self.undo_suspended > 0
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn observer_list(&self) -> Vec<Arc<dyn BookmarkModelObserver>> {
        self.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    fn notify(&mut self, change: NodeChange) {
        for observer in self.observer_list() {
            observer.on_node_change(&change);
        }
        if self.undo_suspended == 0 {
            self.undo_history.push(change);
        }
    }

    fn ensure_loaded(&self) -> ModelResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(ModelError::NotLoaded)
        }
    }

    fn existing(&self, id: NodeId) -> ModelResult<&BookmarkNode> {
        self.nodes.get(&id).ok_or(ModelError::NodeNotFound(id))
    }

    fn mutable_non_permanent(&mut self, id: NodeId) -> ModelResult<&mut BookmarkNode> {
        let node = self.nodes.get_mut(&id).ok_or(ModelError::NodeNotFound(id))?;
        if node.is_permanent() {
            return Err(ModelError::PermanentNode(id));
        }
        Ok(node)
    }

    fn folder(&self, id: NodeId) -> ModelResult<&BookmarkNode> {
        let node = self.existing(id)?;
        if !node.is_folder() {
            return Err(ModelError::NotAFolder(id));
        }
        Ok(node)
    }

    fn children_mut(&mut self, id: NodeId) -> ModelResult<&mut Vec<NodeId>> {
        self.nodes
            .get_mut(&id)
            .map(|node| &mut node.children)
            .ok_or(ModelError::NodeNotFound(id))
    }
}

impl BookmarkModel for MemoryBookmarkModel {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn permanent_node(&self, folder: PermanentFolder) -> NodeId {
        match folder {
            PermanentFolder::BookmarkBar => self.permanent[0],
            PermanentFolder::OtherBookmarks => self.permanent[1],
            PermanentFolder::MobileBookmarks => self.permanent[2],
        }
    }

    fn node(&self, id: NodeId) -> Option<&BookmarkNode> {
        self.nodes.get(&id)
    }

    fn add_node(&mut self, parent: NodeId, index: usize, node: NewNode) -> ModelResult<NodeId> {
        self.ensure_loaded()?;
        let len = self.folder(parent)?.children.len();
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }

        let id = NodeId(self.next_id);
        let url = match node.kind {
            NodeKind::Folder => None,
            NodeKind::Url => Some(node.url.ok_or(ModelError::KindMismatch(id))?),
        };
        self.next_id += 1;

        let new_node = BookmarkNode {
            id,
            kind: node.kind,
            title: node.title,
            url,
            parent: Some(parent),
            children: Vec::new(),
            creation_time: node.creation_time.unwrap_or_else(now_micros),
            meta_info: node.meta_info,
            permanent: None,
        };
        self.nodes.insert(id, new_node.clone());
        self.children_mut(parent)?.insert(index, id);

        self.notify(NodeChange::Added { node: new_node });
        Ok(id)
    }

    fn set_title(&mut self, id: NodeId, title: &str) -> ModelResult<()> {
        self.ensure_loaded()?;
        let node = self.mutable_non_permanent(id)?;
        if node.title == title {
            return Ok(());
        }
        node.title = title.to_string();
        let snapshot = node.clone();
        self.notify(NodeChange::Changed { node: snapshot });
        Ok(())
    }

    fn set_url(&mut self, id: NodeId, url: &str) -> ModelResult<()> {
        self.ensure_loaded()?;
        let node = self.mutable_non_permanent(id)?;
        if node.kind != NodeKind::Url {
            return Err(ModelError::KindMismatch(id));
        }
        if node.url.as_deref() == Some(url) {
            return Ok(());
        }
        node.url = Some(url.to_string());
        let snapshot = node.clone();
        self.notify(NodeChange::Changed { node: snapshot });
        Ok(())
    }

    fn set_meta_info_map(&mut self, id: NodeId, meta_info: MetaInfoMap) -> ModelResult<()> {
        self.ensure_loaded()?;
        let node = self.nodes.get_mut(&id).ok_or(ModelError::NodeNotFound(id))?;
        if node.meta_info == meta_info {
            return Ok(());
        }
        node.meta_info = meta_info;
        let snapshot = node.clone();
        self.notify(NodeChange::Changed { node: snapshot });
        Ok(())
    }

    fn move_node(&mut self, id: NodeId, new_parent: NodeId, index: usize) -> ModelResult<()> {
        self.ensure_loaded()?;
        let old_parent = self
            .mutable_non_permanent(id)?
            .parent
            .ok_or(ModelError::PermanentNode(id))?;
        let target_len = self.folder(new_parent)?.children.len();
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(ModelError::InvalidMove {
                node: id,
                parent: new_parent,
            });
        }

        let len = if old_parent == new_parent {
            target_len - 1
        } else {
            target_len
        };
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }

        let old_index = self
            .children(old_parent)
            .iter()
            .position(|child| *child == id);
        if old_parent == new_parent && old_index == Some(index) {
            return Ok(());
        }

        self.children_mut(old_parent)?.retain(|child| *child != id);
        self.children_mut(new_parent)?.insert(index, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(new_parent);
        }

        self.notify(NodeChange::Moved {
            node: id,
            old_parent,
            new_parent,
            new_index: index,
        });
        Ok(())
    }

    fn reorder_children(&mut self, parent: NodeId, order: Vec<NodeId>) -> ModelResult<()> {
        self.ensure_loaded()?;
        let mut current = self.folder(parent)?.children.clone();
        let mut requested = order.clone();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(ModelError::InvalidReorder(parent));
        }

        let children = self.children_mut(parent)?;
        if *children == order {
            return Ok(());
        }
        *children = order.clone();

        self.notify(NodeChange::ChildrenReordered {
            parent,
            children: order,
        });
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> ModelResult<()> {
        self.ensure_loaded()?;
        let parent = self
            .mutable_non_permanent(id)?
            .parent
            .ok_or(ModelError::PermanentNode(id))?;
        let index = self
            .children(parent)
            .iter()
            .position(|child| *child == id)
            .ok_or(ModelError::NodeNotFound(id))?;

        let subtree = self.subtree_preorder(id);
        self.children_mut(parent)?.remove(index);

        let mut removed = Vec::with_capacity(subtree.len());
        for node_id in &subtree {
            if let Some(node) = self.nodes.remove(node_id) {
                removed.push(node);
            }
        }
        let Some(node) = removed.into_iter().next() else {
            return Err(ModelError::NodeNotFound(id));
        };

        self.notify(NodeChange::Removed {
            node,
            parent,
            index,
            descendants: subtree[1..].to_vec(),
        });
        Ok(())
    }

    fn begin_extensive_changes(&mut self) {
        self.extensive_depth += 1;
        if self.extensive_depth == 1 {
            for observer in self.observer_list() {
                observer.extensive_changes_began();
            }
        }
    }

    fn end_extensive_changes(&mut self) {
        debug_assert!(self.extensive_depth > 0, "unbalanced end_extensive_changes");
        self.extensive_depth = self.extensive_depth.saturating_sub(1);
        if self.extensive_depth == 0 {
            for observer in self.observer_list() {
                observer.extensive_changes_ended();
            }
        }
    }

    fn suspend_undo(&mut self) {
        self.undo_suspended += 1;
    }

    fn resume_undo(&mut self) {
        debug_assert!(self.undo_suspended > 0, "unbalanced resume_undo");
        self.undo_suspended = self.undo_suspended.saturating_sub(1);
    }

    fn add_observer(&mut self, observer: Arc<dyn BookmarkModelObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}
