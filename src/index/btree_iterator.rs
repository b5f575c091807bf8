use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard, INVALID_PAGE_ID};
use crate::error::QuartzDBResult;
use crate::index::{BPlusTree, KeyComparator};
use crate::storage::codec::BPlusTreeLeafPageCodec;
use crate::storage::page::{BPlusTreeLeafPage, RecordId};

/// Forward cursor over the leaf chain. Holds one leaf pinned and
/// read-latched at a time; the latch is released before the next leaf is
/// fetched, so at most one leaf latch is ever held. Not restartable.
#[derive(Debug)]
pub struct TreeIndexIterator {
    buffer_pool: Arc<BufferPoolManager>,
    comparator: KeyComparator,
    leaf_guard: Option<ReadPageGuard>,
    leaf: Option<BPlusTreeLeafPage>,
    cursor: usize,
}

impl BPlusTree {
    /// Cursor positioned at the first entry of the tree.
    pub fn iter(&self) -> QuartzDBResult<TreeIndexIterator> {
        let leaf_guard = self.find_leaf_read(None)?;
        Ok(TreeIndexIterator::new(
            self.buffer_pool.clone(),
            self.comparator,
            leaf_guard,
            0,
        ))
    }

    /// Cursor positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> QuartzDBResult<TreeIndexIterator> {
        let Some(leaf_guard) = self.find_leaf_read(Some(key))? else {
            return Ok(TreeIndexIterator::new(
                self.buffer_pool.clone(),
                self.comparator,
                None,
                0,
            ));
        };
        let (leaf, _) = BPlusTreeLeafPageCodec::decode(leaf_guard.data(), self.comparator)?;
        let cursor = leaf.lower_bound(key);
        Ok(TreeIndexIterator::new(
            self.buffer_pool.clone(),
            self.comparator,
            Some(leaf_guard),
            cursor,
        ))
    }
}

impl TreeIndexIterator {
    fn new(
        buffer_pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        leaf_guard: Option<ReadPageGuard>,
        cursor: usize,
    ) -> Self {
        let leaf = leaf_guard.as_ref().and_then(|guard| {
            BPlusTreeLeafPageCodec::decode(guard.data(), comparator)
                .map(|(leaf, _)| leaf)
                .ok()
        });
        Self {
            buffer_pool,
            comparator,
            leaf_guard,
            leaf,
            cursor,
        }
    }

    /// The chain is exhausted; `next` will keep returning `None`.
    pub fn is_end(&self) -> bool {
        self.leaf_guard.is_none()
    }

    /// Yields the next `(key, record_id)` pair, stepping to the next leaf
    /// when the current one runs out.
    pub fn next(&mut self) -> QuartzDBResult<Option<(Vec<u8>, RecordId)>> {
        loop {
            if self.leaf_guard.is_none() {
                return Ok(None);
            }
            let Some(leaf) = self.leaf.as_ref() else {
                self.leaf_guard = None;
                return Ok(None);
            };
            if self.cursor < leaf.header.current_size as usize {
                let (key, rid) = leaf.kv_at(self.cursor).clone();
                self.cursor += 1;
                return Ok(Some((key, rid)));
            }

            let next_page_id = leaf.header.next_page_id;
            // Release latch and pin before touching the sibling.
            self.leaf_guard = None;
            self.leaf = None;
            if next_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.buffer_pool.fetch_page_read(next_page_id)?;
            let (leaf, _) = BPlusTreeLeafPageCodec::decode(guard.data(), self.comparator)?;
            self.leaf_guard = Some(guard);
            self.leaf = Some(leaf);
            self.cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PageId;
    use crate::index::default_key_comparator;
    use crate::storage::disk_manager::DiskManager;
    use tempfile::TempDir;

    const KEY_SIZE: usize = 8;

    fn make_key(key: u64) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn make_rid(key: u64) -> RecordId {
        RecordId::new(key as PageId, key as u32)
    }

    fn setup() -> (TempDir, BPlusTree) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(64, disk_manager));
        let tree = BPlusTree::new(
            "iter_test",
            buffer_pool,
            default_key_comparator,
            KEY_SIZE,
            4,
            4,
        )
        .unwrap();
        (temp_dir, tree)
    }

    #[test]
    fn test_iterator_over_empty_tree() {
        let (_temp_dir, tree) = setup();
        let mut iterator = tree.iter().unwrap();
        assert!(iterator.is_end());
        assert_eq!(iterator.next().unwrap(), None);
    }

    #[test]
    fn test_iterator_full_scan_crosses_leaves() {
        let (_temp_dir, tree) = setup();
        for key in 1..=50u64 {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }

        let mut iterator = tree.iter().unwrap();
        let mut seen = Vec::new();
        while let Some((key, rid)) = iterator.next().unwrap() {
            seen.push((key, rid));
        }
        assert!(iterator.is_end());
        assert_eq!(iterator.next().unwrap(), None);

        assert_eq!(seen.len(), 50);
        for (i, (key, rid)) in seen.iter().enumerate() {
            let expected = i as u64 + 1;
            assert_eq!(key, &make_key(expected));
            assert_eq!(rid, &make_rid(expected));
        }
        assert!(tree.buffer_pool.all_unpinned());
    }

    #[test]
    fn test_iterator_from_key() {
        let (_temp_dir, tree) = setup();
        for key in (2..=40u64).step_by(2) {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }

        // seek to a present key
        let mut iterator = tree.iter_from(&make_key(20)).unwrap();
        assert_eq!(iterator.next().unwrap(), Some((make_key(20), make_rid(20))));

        // seek between keys lands on the next greater one
        let mut iterator = tree.iter_from(&make_key(21)).unwrap();
        assert_eq!(iterator.next().unwrap(), Some((make_key(22), make_rid(22))));

        // seek past the end drains immediately
        let mut iterator = tree.iter_from(&make_key(100)).unwrap();
        assert_eq!(iterator.next().unwrap(), None);
        assert!(iterator.is_end());
    }

    #[test]
    fn test_iterator_sees_only_remaining_keys() {
        let (_temp_dir, tree) = setup();
        for key in 1..=30u64 {
            tree.insert(&make_key(key), make_rid(key)).unwrap();
        }
        for key in (2..=30u64).step_by(2) {
            tree.delete(&make_key(key)).unwrap();
        }

        let mut iterator = tree.iter().unwrap();
        let mut seen = Vec::new();
        while let Some((key, _)) = iterator.next().unwrap() {
            seen.push(key);
        }
        let expected: Vec<Vec<u8>> = (1..=30u64).step_by(2).map(make_key).collect();
        assert_eq!(seen, expected);
    }
}
