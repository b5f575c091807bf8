use log::debug;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::buffer::{
    BufferPoolManager, PageId, ReadPageGuard, WritePageGuard, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::error::{QuartzDBError, QuartzDBResult};
use crate::index::KeyComparator;
use crate::storage::codec::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec, HeaderPageCodec,
};
use crate::storage::page::{
    internal_page_capacity, leaf_page_capacity, BPlusTreeInternalPage, BPlusTreeLeafPage,
    BPlusTreePage, RecordId,
};
use crate::utils::util::page_bytes_to_array;

/// Write operations descending through `find_leaf_write`; reads use the
/// shared-latch descent in `find_leaf_read` and are always safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Insert,
    Delete,
}

/// Latches carried by one tree operation: the root-id latch while the root
/// may still change, the exclusively latched ancestors of the current node,
/// and the pages scheduled for reclamation once every latch is released.
#[derive(Debug)]
struct Context<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    write_set: VecDeque<WritePageGuard>,
    deleted_set: HashSet<PageId>,
}

impl<'a> Context<'a> {
    fn new() -> Self {
        Self {
            root_guard: None,
            write_set: VecDeque::new(),
            deleted_set: HashSet::new(),
        }
    }

    /// Drops every ancestor latch (and the root-id latch) once the current
    /// node is known safe for the operation.
    fn release_ancestors(&mut self) {
        self.write_set.clear();
        self.root_guard = None;
    }
}

/// Concurrent B+Tree over buffer-pool pages. Keys are unique, fixed-width
/// byte strings; all leaves sit at the same depth and chain left to right
/// through `next_page_id`.
///
/// Writers descend with exclusive latches, releasing ancestors as soon as a
/// child cannot propagate a structural change upward; readers crab with
/// shared latches. The root page id lives inside the root-id latch, so it is
/// only ever read or replaced while that latch is held.
#[derive(Debug)]
pub struct BPlusTree {
    pub index_name: String,
    pub buffer_pool: Arc<BufferPoolManager>,
    pub comparator: KeyComparator,
    pub key_size: usize,
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
    root_page_id: RwLock<PageId>,
}

impl BPlusTree {
    /// Opens the named tree, registering it in the header page on first use.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        key_size: usize,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> QuartzDBResult<Self> {
        let index_name = index_name.into();
        let root = {
            let mut header_guard = buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
            let (mut header, _) = HeaderPageCodec::decode(header_guard.data())?;
            match header.get_root_id(&index_name) {
                Some(root) => root,
                None => {
                    if !header.insert_record(&index_name, INVALID_PAGE_ID) {
                        return Err(QuartzDBError::Storage(format!(
                            "cannot register index {:?} in the header page",
                            index_name
                        )));
                    }
                    header_guard.overwrite(&page_bytes_to_array(&HeaderPageCodec::encode(&header)));
                    INVALID_PAGE_ID
                }
            }
        };
        Ok(Self {
            index_name,
            buffer_pool,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
            root_page_id: RwLock::new(root),
        })
    }

    /// Like `new`, with node capacities derived from the page size.
    pub fn new_with_page_capacity(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        key_size: usize,
    ) -> QuartzDBResult<Self> {
        let leaf_max_size = leaf_page_capacity(key_size);
        let internal_max_size = internal_page_capacity(key_size);
        Self::new(
            index_name,
            buffer_pool,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
        )
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Point lookup. Returns the record id stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> QuartzDBResult<Option<RecordId>> {
        let Some(leaf_guard) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let (leaf, _) = BPlusTreeLeafPageCodec::decode(leaf_guard.data(), self.comparator)?;
        Ok(leaf.look_up(key))
    }

    /// Unique insert. Returns false (leaving the tree untouched) when the
    /// key is already present.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> QuartzDBResult<bool> {
        debug_assert_eq!(key.len(), self.key_size);
        let mut context = Context::new();
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return self.start_new_tree(root_guard, key, rid);
        }
        context.root_guard = Some(root_guard);

        let mut leaf_guard = self.find_leaf_write(key, TreeOp::Insert, &mut context)?;
        let (mut leaf, _) = BPlusTreeLeafPageCodec::decode(leaf_guard.data(), self.comparator)?;
        if leaf.look_up(key).is_some() {
            return Ok(false);
        }
        leaf.insert(key.to_vec(), rid);
        if leaf.header.current_size > leaf.header.max_size {
            debug!(
                "leaf page {} overflowed on insert, splitting",
                leaf.header.page_id
            );
            self.split_and_propagate(leaf_guard, BPlusTreePage::Leaf(leaf), &mut context)?;
        } else {
            Self::persist(&mut leaf_guard, &BPlusTreePage::Leaf(leaf));
        }
        Ok(true)
    }

    /// Removes `key` if present. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> QuartzDBResult<()> {
        let mut context = Context::new();
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(());
        }
        context.root_guard = Some(root_guard);

        let mut leaf_guard = self.find_leaf_write(key, TreeOp::Delete, &mut context)?;
        let (mut leaf, _) = BPlusTreeLeafPageCodec::decode(leaf_guard.data(), self.comparator)?;
        if !leaf.delete(key) {
            return Ok(());
        }
        if leaf.header.current_size < leaf.min_size() {
            Self::persist(&mut leaf_guard, &BPlusTreePage::Leaf(leaf.clone()));
            self.coalesce_or_redistribute(leaf_guard, BPlusTreePage::Leaf(leaf), &mut context)?;
        } else {
            Self::persist(&mut leaf_guard, &BPlusTreePage::Leaf(leaf));
            drop(leaf_guard);
        }
        self.finish(&mut context)
    }

    /// Creates the first leaf and points the root-id slot at it. Runs with
    /// the root-id latch held exclusively.
    fn start_new_tree(
        &self,
        mut root_guard: RwLockWriteGuard<'_, PageId>,
        key: &[u8],
        rid: RecordId,
    ) -> QuartzDBResult<bool> {
        let mut guard = self.buffer_pool.new_page()?;
        let page_id = guard.page_id();
        let mut leaf = BPlusTreeLeafPage::new(
            page_id,
            INVALID_PAGE_ID,
            self.key_size as u32,
            self.leaf_max_size,
            self.comparator,
        );
        leaf.insert(key.to_vec(), rid);
        Self::persist(&mut guard, &BPlusTreePage::Leaf(leaf));
        drop(guard);
        *root_guard = page_id;
        self.sync_root_record(page_id)?;
        debug!("started new tree {:?} at root page {}", self.index_name, page_id);
        Ok(true)
    }

    /// Descends to the leaf covering `key`, latch-crabbing: each child is
    /// latched before its parent is released, and every retained ancestor is
    /// dropped the moment the current node is safe for `op`.
    fn find_leaf_write<'a>(
        &'a self,
        key: &[u8],
        op: TreeOp,
        context: &mut Context<'a>,
    ) -> QuartzDBResult<WritePageGuard> {
        let root_page_id = match context.root_guard.as_deref() {
            Some(root) => *root,
            None => {
                return Err(QuartzDBError::Internal(
                    "descent started without the root-id latch".to_string(),
                ))
            }
        };
        let mut current = self.buffer_pool.fetch_page_write(root_page_id)?;
        loop {
            let (page, _) = BPlusTreePageCodec::decode(current.data(), self.comparator)?;
            if Self::is_safe(&page, op) {
                context.release_ancestors();
            }
            match page {
                BPlusTreePage::Leaf(_) => return Ok(current),
                BPlusTreePage::Internal(internal) => {
                    let child_page_id = internal.look_up(key);
                    let child = self.buffer_pool.fetch_page_write(child_page_id)?;
                    context.write_set.push_back(current);
                    current = child;
                }
            }
        }
    }

    /// A node is safe when the pending operation cannot propagate a
    /// structural change to its ancestors.
    fn is_safe(page: &BPlusTreePage, op: TreeOp) -> bool {
        match op {
            TreeOp::Insert => page.size() < page.max_size(),
            TreeOp::Delete => match page {
                BPlusTreePage::Leaf(leaf) => leaf.header.current_size >= leaf.min_size() + 1,
                BPlusTreePage::Internal(internal) => {
                    internal.header.current_size > internal.min_size() + 1
                }
            },
        }
    }

    /// Shared-latch descent for reads and iterator construction. `None`
    /// targets the leftmost leaf. Ancestors are released as soon as the
    /// child latch is held.
    pub(crate) fn find_leaf_read(
        &self,
        target: Option<&[u8]>,
    ) -> QuartzDBResult<Option<ReadPageGuard>> {
        let root_guard = self.root_page_id.read();
        let root_page_id = *root_guard;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut current = self.buffer_pool.fetch_page_read(root_page_id)?;
        drop(root_guard);
        loop {
            let (page, _) = BPlusTreePageCodec::decode(current.data(), self.comparator)?;
            match page {
                BPlusTreePage::Leaf(_) => return Ok(Some(current)),
                BPlusTreePage::Internal(internal) => {
                    let child_page_id = match target {
                        Some(key) => internal.look_up(key),
                        None => internal.value_at(0),
                    };
                    current = self.buffer_pool.fetch_page_read(child_page_id)?;
                }
            }
        }
    }

    /// Splits the overflowed node and pushes separators upward, consuming
    /// retained ancestor latches from the context. Root splits grow the tree
    /// by one level under the root-id latch.
    fn split_and_propagate<'a>(
        &'a self,
        mut node_guard: WritePageGuard,
        mut node: BPlusTreePage,
        context: &mut Context<'a>,
    ) -> QuartzDBResult<()> {
        loop {
            let mut new_guard = self.buffer_pool.new_page()?;
            let new_page_id = new_guard.page_id();

            let (separator, new_page) = match &mut node {
                BPlusTreePage::Leaf(leaf) => {
                    let mut new_leaf = BPlusTreeLeafPage::new(
                        new_page_id,
                        leaf.header.parent_page_id,
                        leaf.header.key_size,
                        leaf.header.max_size,
                        self.comparator,
                    );
                    leaf.move_half_to(&mut new_leaf);
                    (new_leaf.key_at(0).to_vec(), BPlusTreePage::Leaf(new_leaf))
                }
                BPlusTreePage::Internal(internal) => {
                    let mut new_internal = BPlusTreeInternalPage::new(
                        new_page_id,
                        internal.header.parent_page_id,
                        internal.header.key_size,
                        internal.header.max_size,
                        self.comparator,
                    );
                    internal.move_half_to(&mut new_internal);
                    for child in new_internal.values() {
                        self.reparent(child, new_page_id)?;
                    }
                    (
                        new_internal.key_at(0).to_vec(),
                        BPlusTreePage::Internal(new_internal),
                    )
                }
            };
            Self::persist(&mut node_guard, &node);
            Self::persist(&mut new_guard, &new_page);

            if node.parent_page_id() == INVALID_PAGE_ID {
                // The root split: grow a new root above both halves.
                let mut root_guard_page = self.buffer_pool.new_page()?;
                let new_root_id = root_guard_page.page_id();
                let mut new_root = BPlusTreeInternalPage::new(
                    new_root_id,
                    INVALID_PAGE_ID,
                    self.key_size as u32,
                    self.internal_max_size,
                    self.comparator,
                );
                new_root.populate_new_root(node.page_id(), separator, new_page_id);
                Self::persist(&mut root_guard_page, &BPlusTreePage::Internal(new_root));
                drop(root_guard_page);

                let mut left = node;
                left.set_parent_page_id(new_root_id);
                Self::persist(&mut node_guard, &left);
                let mut right = new_page;
                right.set_parent_page_id(new_root_id);
                Self::persist(&mut new_guard, &right);
                drop(node_guard);
                drop(new_guard);

                let Some(root_slot) = context.root_guard.as_mut() else {
                    return Err(QuartzDBError::Internal(
                        "root-id latch not held while the root split".to_string(),
                    ));
                };
                **root_slot = new_root_id;
                self.sync_root_record(new_root_id)?;
                debug!("root split; new root is page {}", new_root_id);
                return Ok(());
            }

            let Some(mut parent_guard) = context.write_set.pop_back() else {
                return Err(QuartzDBError::Internal(
                    "parent latch missing while propagating a split".to_string(),
                ));
            };
            let (mut parent, _) =
                BPlusTreeInternalPageCodec::decode(parent_guard.data(), self.comparator)?;
            parent.insert_node_after(node.page_id(), separator, new_page_id);
            drop(node_guard);
            drop(new_guard);

            if parent.header.current_size > parent.header.max_size {
                node_guard = parent_guard;
                node = BPlusTreePage::Internal(parent);
                continue;
            }
            Self::persist(&mut parent_guard, &BPlusTreePage::Internal(parent));
            return Ok(());
        }
    }

    /// Rebalances an underflowing node against a sibling fetched through the
    /// retained parent: borrow one entry when the sibling can spare it,
    /// otherwise merge into the left page and recurse on the parent.
    fn coalesce_or_redistribute<'a>(
        &'a self,
        mut node_guard: WritePageGuard,
        mut node: BPlusTreePage,
        context: &mut Context<'a>,
    ) -> QuartzDBResult<()> {
        loop {
            if node.parent_page_id() == INVALID_PAGE_ID {
                return self.adjust_root(node_guard, node, context);
            }

            let Some(mut parent_guard) = context.write_set.pop_back() else {
                return Err(QuartzDBError::Internal(
                    "parent latch missing while rebalancing".to_string(),
                ));
            };
            let (mut parent, _) =
                BPlusTreeInternalPageCodec::decode(parent_guard.data(), self.comparator)?;
            let Some(node_index) = parent.value_index(node.page_id()) else {
                return Err(QuartzDBError::Internal(format!(
                    "page {} missing from its parent {}",
                    node.page_id(),
                    parent.header.page_id
                )));
            };

            // Prefer the left sibling; only the leftmost child borrows from
            // the right.
            let sibling_is_right = node_index == 0;
            let sibling_index = if sibling_is_right { 1 } else { node_index - 1 };
            let sibling_page_id = parent.value_at(sibling_index);
            let mut sibling_guard = self.buffer_pool.fetch_page_write(sibling_page_id)?;
            let (mut sibling, _) =
                BPlusTreePageCodec::decode(sibling_guard.data(), self.comparator)?;

            if node.size() + sibling.size() <= node.max_size() {
                // Merge; the surviving page is always the left one.
                let (mut left_guard, mut left, right_guard, right, right_index) =
                    if sibling_is_right {
                        (node_guard, node, sibling_guard, sibling, 1)
                    } else {
                        (sibling_guard, sibling, node_guard, node, node_index)
                    };
                let separator = parent.key_at(right_index).to_vec();
                match (&mut left, right) {
                    (BPlusTreePage::Leaf(left_leaf), BPlusTreePage::Leaf(mut right_leaf)) => {
                        right_leaf.move_all_to(left_leaf);
                    }
                    (
                        BPlusTreePage::Internal(left_internal),
                        BPlusTreePage::Internal(mut right_internal),
                    ) => {
                        let moved = right_internal.values();
                        right_internal.move_all_to(left_internal, separator);
                        for child in moved {
                            self.reparent(child, left_internal.header.page_id)?;
                        }
                    }
                    _ => {
                        return Err(QuartzDBError::Internal(
                            "sibling page type mismatch during merge".to_string(),
                        ))
                    }
                }
                Self::persist(&mut left_guard, &left);
                context.deleted_set.insert(right_guard.page_id());
                debug!(
                    "merged page {} into page {}",
                    right_guard.page_id(),
                    left.page_id()
                );
                drop(left_guard);
                drop(right_guard);

                parent.remove_at(right_index);
                if parent.is_root() {
                    return self.adjust_root(
                        parent_guard,
                        BPlusTreePage::Internal(parent),
                        context,
                    );
                }
                // Internal nodes rebalance one entry earlier than leaves so a
                // single-child internal page can never persist.
                if parent.header.current_size <= parent.min_size() {
                    Self::persist(&mut parent_guard, &BPlusTreePage::Internal(parent.clone()));
                    node_guard = parent_guard;
                    node = BPlusTreePage::Internal(parent);
                    continue;
                }
                Self::persist(&mut parent_guard, &BPlusTreePage::Internal(parent));
                return Ok(());
            }

            // Redistribute one entry from the sibling.
            match (&mut node, &mut sibling) {
                (BPlusTreePage::Leaf(node_leaf), BPlusTreePage::Leaf(sibling_leaf)) => {
                    if sibling_is_right {
                        let Some(kv) = sibling_leaf.pop_front() else {
                            return Err(QuartzDBError::Internal(
                                "right sibling empty during redistribute".to_string(),
                            ));
                        };
                        node_leaf.push_back(kv);
                        parent.set_key_at(1, sibling_leaf.key_at(0).to_vec());
                    } else {
                        let Some(kv) = sibling_leaf.pop_back() else {
                            return Err(QuartzDBError::Internal(
                                "left sibling empty during redistribute".to_string(),
                            ));
                        };
                        parent.set_key_at(node_index, kv.0.clone());
                        node_leaf.push_front(kv);
                    }
                }
                (BPlusTreePage::Internal(node_internal), BPlusTreePage::Internal(sibling_internal)) => {
                    if sibling_is_right {
                        let separator = parent.key_at(1).to_vec();
                        let Some((_, borrowed_child)) = sibling_internal.pop_front() else {
                            return Err(QuartzDBError::Internal(
                                "right sibling empty during redistribute".to_string(),
                            ));
                        };
                        node_internal.push_back((separator, borrowed_child));
                        parent.set_key_at(1, sibling_internal.key_at(0).to_vec());
                        self.reparent(borrowed_child, node_internal.header.page_id)?;
                    } else {
                        let separator = parent.key_at(node_index).to_vec();
                        let Some((borrowed_key, borrowed_child)) = sibling_internal.pop_back()
                        else {
                            return Err(QuartzDBError::Internal(
                                "left sibling empty during redistribute".to_string(),
                            ));
                        };
                        node_internal.set_key_at(0, separator);
                        let sentinel = node_internal.sentinel_key();
                        node_internal.push_front((sentinel, borrowed_child));
                        parent.set_key_at(node_index, borrowed_key);
                        self.reparent(borrowed_child, node_internal.header.page_id)?;
                    }
                }
                _ => {
                    return Err(QuartzDBError::Internal(
                        "sibling page type mismatch during redistribute".to_string(),
                    ))
                }
            }
            Self::persist(&mut node_guard, &node);
            Self::persist(&mut sibling_guard, &sibling);
            Self::persist(&mut parent_guard, &BPlusTreePage::Internal(parent));
            return Ok(());
        }
    }

    /// Root underflow: an internal root with a single child hands the tree
    /// to that child; an empty leaf root empties the tree.
    fn adjust_root<'a>(
        &'a self,
        mut root_guard: WritePageGuard,
        root: BPlusTreePage,
        context: &mut Context<'a>,
    ) -> QuartzDBResult<()> {
        match &root {
            BPlusTreePage::Internal(internal) if internal.header.current_size == 1 => {
                let child_page_id = internal.value_at(0);
                context.deleted_set.insert(internal.header.page_id);
                drop(root_guard);
                self.reparent(child_page_id, INVALID_PAGE_ID)?;
                let Some(root_slot) = context.root_guard.as_mut() else {
                    return Err(QuartzDBError::Internal(
                        "root-id latch not held while the root collapsed".to_string(),
                    ));
                };
                **root_slot = child_page_id;
                self.sync_root_record(child_page_id)?;
                debug!("root collapsed; new root is page {}", child_page_id);
            }
            BPlusTreePage::Leaf(leaf) if leaf.header.current_size == 0 => {
                context.deleted_set.insert(leaf.header.page_id);
                drop(root_guard);
                let Some(root_slot) = context.root_guard.as_mut() else {
                    return Err(QuartzDBError::Internal(
                        "root-id latch not held while the tree emptied".to_string(),
                    ));
                };
                **root_slot = INVALID_PAGE_ID;
                self.sync_root_record(INVALID_PAGE_ID)?;
                debug!("tree {:?} is now empty", self.index_name);
            }
            _ => {
                Self::persist(&mut root_guard, &root);
            }
        }
        Ok(())
    }

    /// Releases every latch still held, then reclaims the pages scheduled
    /// for deletion (a page can only be deallocated once it is unpinned).
    fn finish(&self, context: &mut Context<'_>) -> QuartzDBResult<()> {
        context.write_set.clear();
        context.root_guard = None;
        for page_id in context.deleted_set.drain() {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Rewrites a child's parent pointer; pages are navigated by id, so
    /// every moved child must be updated through the buffer pool.
    fn reparent(&self, page_id: PageId, parent_page_id: PageId) -> QuartzDBResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let (mut page, _) = BPlusTreePageCodec::decode(guard.data(), self.comparator)?;
        page.set_parent_page_id(parent_page_id);
        Self::persist(&mut guard, &page);
        Ok(())
    }

    /// Mirrors the current root id into this tree's header-page record.
    fn sync_root_record(&self, root_page_id: PageId) -> QuartzDBResult<()> {
        let mut header_guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let (mut header, _) = HeaderPageCodec::decode(header_guard.data())?;
        if !header.update_record(&self.index_name, root_page_id) {
            header.insert_record(&self.index_name, root_page_id);
        }
        header_guard.overwrite(&page_bytes_to_array(&HeaderPageCodec::encode(&header)));
        Ok(())
    }

    fn persist(guard: &mut WritePageGuard, page: &BPlusTreePage) {
        guard.overwrite(&page_bytes_to_array(&BPlusTreePageCodec::encode(page)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::default_key_comparator;
    use crate::storage::disk_manager::DiskManager;
    use crate::utils::util::pretty_format_btree;
    use rand::seq::SliceRandom;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    const KEY_SIZE: usize = 8;

    fn make_key(key: u64) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn make_rid(key: u64) -> RecordId {
        RecordId::new(key as PageId, key as u32)
    }

    fn setup(
        pool_size: usize,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> (TempDir, Arc<BufferPoolManager>, BPlusTree) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
        let tree = BPlusTree::new(
            "test_index",
            buffer_pool.clone(),
            default_key_comparator,
            KEY_SIZE,
            leaf_max_size,
            internal_max_size,
        )
        .unwrap();
        (temp_dir, buffer_pool, tree)
    }

    /// Walks the whole tree checking the structural invariants: per-node key
    /// order and size bounds, parent back-pointers, uniform leaf depth, the
    /// leaf chain, and globally ascending keys. Also asserts the pool is
    /// quiescent afterwards.
    fn verify_tree(tree: &BPlusTree) {
        let root_page_id = tree.root_page_id();
        if root_page_id == INVALID_PAGE_ID {
            assert!(tree.buffer_pool.all_unpinned());
            return;
        }
        let mut queue = VecDeque::from([(root_page_id, INVALID_PAGE_ID, 0usize)]);
        let mut leaves: Vec<(PageId, Vec<Vec<u8>>, PageId)> = Vec::new();
        let mut leaf_depth: Option<usize> = None;
        while let Some((page_id, expected_parent, depth)) = queue.pop_front() {
            let guard = tree.buffer_pool.fetch_page_read(page_id).unwrap();
            let (page, _) = BPlusTreePageCodec::decode(guard.data(), tree.comparator).unwrap();
            drop(guard);
            assert_eq!(page.parent_page_id(), expected_parent, "page {}", page_id);
            match page {
                BPlusTreePage::Internal(internal) => {
                    assert!(internal.header.current_size >= internal.min_size());
                    assert!(internal.header.current_size <= internal.header.max_size);
                    for i in 1..internal.array.len() {
                        if i >= 2 {
                            assert!(
                                (tree.comparator)(internal.key_at(i - 1), internal.key_at(i))
                                    == std::cmp::Ordering::Less,
                                "separators out of order in page {}",
                                page_id
                            );
                        }
                    }
                    for child in internal.values() {
                        queue.push_back((child, page_id, depth + 1));
                    }
                }
                BPlusTreePage::Leaf(leaf) => {
                    assert!(leaf.header.current_size >= leaf.min_size());
                    assert!(leaf.header.current_size <= leaf.header.max_size);
                    for i in 1..leaf.array.len() {
                        assert!(
                            (tree.comparator)(leaf.key_at(i - 1), leaf.key_at(i))
                                == std::cmp::Ordering::Less,
                            "leaf keys out of order in page {}",
                            page_id
                        );
                    }
                    match leaf_depth {
                        None => leaf_depth = Some(depth),
                        Some(expected) => assert_eq!(expected, depth, "uneven leaf depth"),
                    }
                    leaves.push((
                        page_id,
                        leaf.array.iter().map(|kv| kv.0.clone()).collect(),
                        leaf.header.next_page_id,
                    ));
                }
            }
        }
        for window in leaves.windows(2) {
            assert_eq!(window[0].2, window[1].0, "broken leaf chain");
        }
        if let Some(last) = leaves.last() {
            assert_eq!(last.2, INVALID_PAGE_ID);
        }
        let all_keys: Vec<&Vec<u8>> = leaves.iter().flat_map(|(_, keys, _)| keys).collect();
        for window in all_keys.windows(2) {
            assert!((tree.comparator)(window[0], window[1]) == std::cmp::Ordering::Less);
        }
        assert!(tree.buffer_pool.all_unpinned());
    }

    fn collect_leaf_ids(tree: &BPlusTree) -> Vec<PageId> {
        let mut leaf_ids = Vec::new();
        let Some(guard) = tree.find_leaf_read(None).unwrap() else {
            return leaf_ids;
        };
        let (mut leaf, _) = BPlusTreeLeafPageCodec::decode(guard.data(), tree.comparator).unwrap();
        drop(guard);
        leaf_ids.push(leaf.header.page_id);
        while leaf.header.next_page_id != INVALID_PAGE_ID {
            let guard = tree
                .buffer_pool
                .fetch_page_read(leaf.header.next_page_id)
                .unwrap();
            leaf = BPlusTreeLeafPageCodec::decode(guard.data(), tree.comparator)
                .unwrap()
                .0;
            leaf_ids.push(leaf.header.page_id);
        }
        leaf_ids
    }

    #[test]
    fn test_sequential_insert_and_get() {
        let (_temp_dir, _buffer_pool, tree) = setup(64, 3, 3);
        assert!(tree.is_empty());

        for key in 1..=10u64 {
            assert!(tree.insert(&make_key(key), make_rid(key)).unwrap());
            verify_tree(&tree);
        }
        for key in 1..=10u64 {
            assert_eq!(tree.get(&make_key(key)).unwrap(), Some(make_rid(key)));
        }
        assert_eq!(tree.get(&make_key(0)).unwrap(), None);
        assert_eq!(tree.get(&make_key(11)).unwrap(), None);

        // ten keys cannot fit in a single max-3 leaf: the tree has grown
        let root_guard = tree
            .buffer_pool
            .fetch_page_read(tree.root_page_id())
            .unwrap();
        let (root, _) = BPlusTreePageCodec::decode(root_guard.data(), tree.comparator).unwrap();
        assert!(!root.is_leaf());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (_temp_dir, _buffer_pool, tree) = setup(64, 3, 3);
        assert!(tree.insert(&make_key(7), make_rid(7)).unwrap());
        assert!(!tree.insert(&make_key(7), make_rid(8)).unwrap());
        assert_eq!(tree.get(&make_key(7)).unwrap(), Some(make_rid(7)));
        verify_tree(&tree);
    }

    #[test]
    fn test_reverse_insert() {
        let (_temp_dir, _buffer_pool, tree) = setup(64, 4, 4);
        for key in (1..=50u64).rev() {
            assert!(tree.insert(&make_key(key), make_rid(key)).unwrap());
        }
        verify_tree(&tree);
        for key in 1..=50u64 {
            assert_eq!(tree.get(&make_key(key)).unwrap(), Some(make_rid(key)));
        }
    }

    #[test]
    fn test_delete_interleaved() {
        let (_temp_dir, _buffer_pool, tree) = setup(128, 4, 4);
        for key in 1..=100u64 {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }
        for key in (2..=100u64).step_by(2) {
            tree.delete(&make_key(key)).unwrap();
            verify_tree(&tree);
        }
        for key in 1..=100u64 {
            let expected = if key % 2 == 1 { Some(make_rid(key)) } else { None };
            assert_eq!(tree.get(&make_key(key)).unwrap(), expected);
        }
        // deleting an absent key is a no-op
        tree.delete(&make_key(2)).unwrap();
        verify_tree(&tree);
    }

    #[test]
    fn test_delete_everything_empties_tree() {
        let (_temp_dir, _buffer_pool, tree) = setup(64, 3, 3);
        for key in 1..=30u64 {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }
        for key in 1..=30u64 {
            tree.delete(&make_key(key)).unwrap();
            verify_tree(&tree);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);

        // the tree starts over cleanly
        assert!(tree.insert(&make_key(5), make_rid(5)).unwrap());
        assert_eq!(tree.get(&make_key(5)).unwrap(), Some(make_rid(5)));
        verify_tree(&tree);
    }

    #[test]
    fn test_redistribute_then_merge() {
        let (_temp_dir, buffer_pool, tree) = setup(64, 4, 4);
        for key in 1..=7u64 {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }
        // leaves: [1,2,3] and [4,5,6,7]
        assert_eq!(collect_leaf_ids(&tree).len(), 2);
        tree.delete(&make_key(2)).unwrap();
        tree.delete(&make_key(3)).unwrap();
        verify_tree(&tree);

        // the right sibling had entries to spare: borrowed, nothing deleted
        let leaf_ids = collect_leaf_ids(&tree);
        assert_eq!(leaf_ids.len(), 2);
        for key in [1u64, 4, 5, 6, 7] {
            assert_eq!(tree.get(&make_key(key)).unwrap(), Some(make_rid(key)));
        }

        // now the siblings fit in one page: deleting again must merge and
        // collapse the root back to a single leaf
        let old_root = tree.root_page_id();
        tree.delete(&make_key(4)).unwrap();
        verify_tree(&tree);
        let leaf_ids_after = collect_leaf_ids(&tree);
        assert_eq!(leaf_ids_after.len(), 1);
        assert_ne!(tree.root_page_id(), old_root);
        assert!(!buffer_pool.resident(old_root));

        let root_guard = buffer_pool.fetch_page_read(tree.root_page_id()).unwrap();
        let (root, _) = BPlusTreePageCodec::decode(root_guard.data(), tree.comparator).unwrap();
        assert!(root.is_leaf());
        drop(root_guard);
        for key in [1u64, 5, 6, 7] {
            assert_eq!(tree.get(&make_key(key)).unwrap(), Some(make_rid(key)));
        }
    }

    #[test]
    fn test_root_record_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(64, disk_manager));

        let root_page_id = {
            let tree = BPlusTree::new(
                "orders_pk",
                buffer_pool.clone(),
                default_key_comparator,
                KEY_SIZE,
                4,
                4,
            )
            .unwrap();
            for key in 1..=20u64 {
                tree.insert(&make_key(key), make_rid(key)).unwrap();
            }
            tree.root_page_id()
        };

        let reopened = BPlusTree::new(
            "orders_pk",
            buffer_pool,
            default_key_comparator,
            KEY_SIZE,
            4,
            4,
        )
        .unwrap();
        assert_eq!(reopened.root_page_id(), root_page_id);
        for key in 1..=20u64 {
            assert_eq!(reopened.get(&make_key(key)).unwrap(), Some(make_rid(key)));
        }
    }

    #[test]
    fn test_pretty_format_smoke() {
        let (_temp_dir, _buffer_pool, tree) = setup(64, 3, 3);
        assert_eq!(pretty_format_btree(&tree).unwrap(), "Empty tree.");
        for key in 1..=8u64 {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }
        let display = pretty_format_btree(&tree).unwrap();
        assert!(display.contains("B+ Tree Level No.1"));
        assert!(display.contains("B+ Tree Level No.2"));
    }

    #[test]
    fn test_concurrent_insert() {
        const NUM_THREADS: usize = 8;
        const KEYS_PER_THREAD: u64 = 250;

        let (_temp_dir, _buffer_pool, tree) = setup(256, 8, 8);
        let tree = Arc::new(tree);
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let mut handles = vec![];
        for t in 0..NUM_THREADS as u64 {
            let tree = tree.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                let start = t * KEYS_PER_THREAD;
                for key in start..start + KEYS_PER_THREAD {
                    assert!(tree.insert(&make_key(key), make_rid(key)).unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        verify_tree(&tree);
        for key in 0..NUM_THREADS as u64 * KEYS_PER_THREAD {
            assert_eq!(tree.get(&make_key(key)).unwrap(), Some(make_rid(key)));
        }
    }

    #[test]
    fn test_concurrent_insert_and_get() {
        const NUM_READERS: usize = 4;
        const NUM_KEYS: u64 = 1000;

        let (_temp_dir, _buffer_pool, tree) = setup(256, 8, 8);
        let tree = Arc::new(tree);
        for key in 0..NUM_KEYS {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }

        let barrier = Arc::new(Barrier::new(NUM_READERS + 1));
        let mut handles = vec![];
        for t in 0..NUM_READERS as u64 {
            let tree = tree.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..NUM_KEYS {
                    let key = (i * 7 + t * 13) % NUM_KEYS;
                    assert_eq!(tree.get(&make_key(key)).unwrap(), Some(make_rid(key)));
                }
            }));
        }
        {
            let tree = tree.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for key in NUM_KEYS..NUM_KEYS + 500 {
                    assert!(tree.insert(&make_key(key), make_rid(key)).unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        verify_tree(&tree);
    }

    #[test]
    fn test_concurrent_delete() {
        const NUM_THREADS: usize = 8;
        const TOTAL_KEYS: u64 = 2000;

        let (_temp_dir, _buffer_pool, tree) = setup(256, 8, 8);
        let tree = Arc::new(tree);
        for key in 0..TOTAL_KEYS {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }

        let mut keys: Vec<u64> = (0..TOTAL_KEYS).collect();
        keys.shuffle(&mut rand::rng());
        let keys = Arc::new(keys);
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let mut handles = vec![];
        let chunk = TOTAL_KEYS as usize / NUM_THREADS;
        for t in 0..NUM_THREADS {
            let tree = tree.clone();
            let keys = keys.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for key in &keys[t * chunk..(t + 1) * chunk] {
                    tree.delete(&make_key(*key)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for key in 0..TOTAL_KEYS {
            assert_eq!(tree.get(&make_key(key)).unwrap(), None);
        }
        assert!(tree.is_empty());
        assert!(tree.buffer_pool.all_unpinned());
    }
}
