use std::cmp::Ordering;

pub mod btree_index;
pub mod btree_iterator;

pub use btree_index::BPlusTree;
pub use btree_iterator::TreeIndexIterator;

/// Total order over fixed-width opaque keys.
pub type KeyComparator = fn(&[u8], &[u8]) -> Ordering;

/// Lexicographic byte order; numeric order for big-endian encoded integers.
pub fn default_key_comparator(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}
