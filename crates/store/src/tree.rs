//! In-memory comment tree.
//!
//! Pure data structure: id-indexed, sorted, no I/O. The store owns exactly
//! one and hands out cloned snapshots.

use std::collections::HashMap;

use uuid::Uuid;

use threadkit_client_common::types::{Comment, CommentStatus, SortOrder};

/// How `remove` treats the target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
    /// Mark deleted, keep the node and its children attached. The default.
    Soft,
    /// Detach the node; descendants are dropped.
    Detach,
    /// Detach the node; children are re-parented to the removed node's
    /// parent.
    DetachReparent,
}

#[derive(Debug, Clone)]
pub struct CommentTree {
    roots: Vec<Comment>,
    /// id → path of ids from root to the node (inclusive). Sibling reorder
    /// does not invalidate paths.
    index: HashMap<Uuid, Vec<Uuid>>,
    sort: SortOrder,
}

impl CommentTree {
    pub fn new(sort: SortOrder) -> Self {
        Self {
            roots: Vec::new(),
            index: HashMap::new(),
            sort,
        }
    }

    /// Build from inflated snapshot roots, sorting and indexing everything.
    pub fn from_roots(roots: Vec<Comment>, sort: SortOrder) -> Self {
        let mut tree = Self {
            roots,
            index: HashMap::new(),
            sort,
        };
        tree.rebuild_index();
        tree.resort();
        tree
    }

    pub fn sort(&self) -> SortOrder {
        self.sort
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// Path of ids from root to the node, inclusive. The shape the server's
    /// write endpoints want.
    pub fn path_of(&self, id: Uuid) -> Option<Vec<Uuid>> {
        self.index.get(&id).cloned()
    }

    /// Total node count, references and descendants included.
    pub fn total_count(&self) -> usize {
        self.index.len()
    }

    /// Immutable snapshot of the root list. Consumers must not rely on
    /// mutating the clone.
    pub fn snapshot(&self) -> Vec<Comment> {
        self.roots.clone()
    }

    pub fn find(&self, id: Uuid) -> Option<&Comment> {
        let path = self.index.get(&id)?;
        node_by_path(&self.roots, path)
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Comment> {
        let path = self.index.get(&id)?.clone();
        node_by_path_mut(&mut self.roots, &path)
    }

    /// Insert a comment under its parent, or at root when the parent is
    /// unknown. Duplicate ids are a no-op. Returns whether the tree changed.
    pub fn insert(&mut self, mut comment: Comment) -> bool {
        if self.contains(comment.id) {
            return false;
        }

        let parent_path = comment
            .parent_id
            .and_then(|pid| self.index.get(&pid).cloned());

        match parent_path {
            Some(path) => {
                let parent = node_by_path_mut(&mut self.roots, &path)
                    .expect("indexed path resolves");
                comment.parent_id = Some(parent.id);
                fix_depths(&mut comment, parent.depth + 1);

                let mut node_path = path.clone();
                node_path.push(comment.id);
                index_subtree(&mut self.index, &comment, &node_path);

                parent.children.push(comment);
                sort_siblings(&mut parent.children, self.sort, false);
            }
            None => {
                comment.parent_id = None;
                fix_depths(&mut comment, 0);
                index_subtree(&mut self.index, &comment, &[comment.id]);
                self.roots.push(comment);
                sort_siblings(&mut self.roots, self.sort, true);
            }
        }
        true
    }

    /// Mutate a node in place. The containing sibling list is re-sorted when
    /// a sort-relevant field moved. Returns whether the node was found.
    pub fn update(&mut self, id: Uuid, patch: impl FnOnce(&mut Comment)) -> bool {
        let Some(path) = self.index.get(&id).cloned() else {
            return false;
        };
        let node = node_by_path_mut(&mut self.roots, &path).expect("indexed path resolves");

        let before = sort_key(node);
        patch(node);
        let after = sort_key(node);

        if before != after {
            self.resort_siblings_of(&path);
        }
        true
    }

    /// Remove a node. `Soft` keeps the node with sentinel text; the detach
    /// modes drop it from the tree.
    pub fn remove(&mut self, id: Uuid, mode: RemoveMode) -> bool {
        let Some(path) = self.index.get(&id).cloned() else {
            return false;
        };

        match mode {
            RemoveMode::Soft => {
                let node =
                    node_by_path_mut(&mut self.roots, &path).expect("indexed path resolves");
                node.mark_deleted();
                true
            }
            RemoveMode::Detach | RemoveMode::DetachReparent => {
                let reparent = mode == RemoveMode::DetachReparent;
                let siblings = self.siblings_of_mut(&path);
                let position = siblings.iter().position(|c| c.id == id).expect("indexed");
                let removed = siblings.remove(position);

                if reparent {
                    let parent_id = removed.parent_id;
                    let parent_depth = removed.depth;
                    let mut orphans = removed.children;
                    let siblings = self.siblings_of_mut(&path);
                    for mut child in orphans.drain(..) {
                        child.parent_id = parent_id;
                        fix_depths(&mut child, parent_depth);
                        siblings.push(child);
                    }
                }

                self.rebuild_index();
                self.resort_siblings_of(&path);
                true
            }
        }
    }

    /// Switch the active sort and re-sort every sibling list.
    pub fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
        self.resort();
    }

    fn resort(&mut self) {
        sort_siblings(&mut self.roots, self.sort, true);
        fn recurse(list: &mut [Comment], sort: SortOrder) {
            for node in list.iter_mut() {
                sort_siblings(&mut node.children, sort, false);
                recurse(&mut node.children, sort);
            }
        }
        recurse(&mut self.roots, self.sort);
    }

    fn resort_siblings_of(&mut self, path: &[Uuid]) {
        if path.len() <= 1 {
            sort_siblings(&mut self.roots, self.sort, true);
        } else {
            let sort = self.sort;
            let parent_path = &path[..path.len() - 1];
            if let Some(parent) = node_by_path_mut(&mut self.roots, parent_path) {
                sort_siblings(&mut parent.children, sort, false);
            }
        }
    }

    fn siblings_of_mut(&mut self, path: &[Uuid]) -> &mut Vec<Comment> {
        if path.len() <= 1 {
            &mut self.roots
        } else {
            let parent_path = &path[..path.len() - 1];
            &mut node_by_path_mut(&mut self.roots, parent_path)
                .expect("indexed path resolves")
                .children
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        fn walk(index: &mut HashMap<Uuid, Vec<Uuid>>, node: &Comment, prefix: &[Uuid]) {
            let mut path = prefix.to_vec();
            path.push(node.id);
            for child in &node.children {
                walk(index, child, &path);
            }
            index.insert(node.id, path);
        }
        for root in &self.roots {
            walk(&mut self.index, root, &[]);
        }
    }
}

fn node_by_path<'a>(roots: &'a [Comment], path: &[Uuid]) -> Option<&'a Comment> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.iter().find(|c| c.id == *first)?;
    for id in rest {
        node = node.children.iter().find(|c| c.id == *id)?;
    }
    Some(node)
}

fn node_by_path_mut<'a>(roots: &'a mut [Comment], path: &[Uuid]) -> Option<&'a mut Comment> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.iter_mut().find(|c| c.id == *first)?;
    for id in rest {
        node = node.children.iter_mut().find(|c| c.id == *id)?;
    }
    Some(node)
}

fn fix_depths(node: &mut Comment, depth: u32) {
    node.depth = depth;
    for child in &mut node.children {
        child.parent_id = Some(node.id);
        fix_depths(child, depth + 1);
    }
}

fn index_subtree(index: &mut HashMap<Uuid, Vec<Uuid>>, node: &Comment, path: &[Uuid]) {
    index.insert(node.id, path.to_vec());
    for child in &node.children {
        let mut child_path = path.to_vec();
        child_path.push(child.id);
        index_subtree(index, child, &child_path);
    }
}

/// Fields the comparators look at; a change forces a sibling re-sort.
fn sort_key(node: &Comment) -> (i64, i64, i64, bool) {
    (node.created_at, node.upvotes, node.downvotes, node.pinned)
}

/// Sort one sibling list. Pinned comments partition first at root level,
/// then the active sort applies within each partition.
fn sort_siblings(list: &mut [Comment], sort: SortOrder, is_root: bool) {
    list.sort_by(|a, b| {
        if is_root {
            let pinned = b.pinned.cmp(&a.pinned);
            if pinned != std::cmp::Ordering::Equal {
                return pinned;
            }
        }
        match sort {
            SortOrder::New => b.created_at.cmp(&a.created_at),
            SortOrder::Old => a.created_at.cmp(&b.created_at),
            SortOrder::Top => b
                .score()
                .cmp(&a.score())
                .then(a.created_at.cmp(&b.created_at)),
            SortOrder::Controversial => b
                .controversy()
                .cmp(&a.controversy())
                .then(b.created_at.cmp(&a.created_at)),
        }
    });
}

/// True when the status still accepts edits; deletes are terminal.
pub(crate) fn editable(status: CommentStatus) -> bool {
    status != CommentStatus::Deleted
}
