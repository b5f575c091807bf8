use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// Concurrent extendible hash table with fixed-capacity buckets.
///
/// The directory holds `2^global_depth` slots, each a shared reference to a
/// bucket with its own local depth `L <= global_depth`. Two slots share a
/// bucket exactly when their indices agree in the low `L` bits. Inserting
/// into a full bucket splits it on the next depth bit, doubling the
/// directory when the bucket's local depth would exceed the global depth.
/// Removal never shrinks the table.
///
/// The directory latch protects the global depth and the slot sequence; each
/// bucket latch protects its own mapping and local depth. `find`/`remove`
/// resolve the slot under the directory latch, release it, then take the
/// bucket latch; only the split path nests bucket -> directory, so the two
/// latch levels are never taken in opposite orders.
#[derive(Debug)]
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_max_size: usize,
    hash_builder: S,
    directory: RwLock<Directory<K, V>>,
}

#[derive(Debug)]
struct Directory<K, V> {
    global_depth: u32,
    num_buckets: usize,
    slots: Vec<Arc<Bucket<K, V>>>,
}

#[derive(Debug)]
struct Bucket<K, V> {
    inner: Mutex<BucketInner<K, V>>,
}

#[derive(Debug)]
struct BucketInner<K, V> {
    local_depth: u32,
    items: HashMap<K, V>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                local_depth,
                items: HashMap::new(),
            }),
        }
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_max_size: usize) -> Self {
        Self::with_hasher(bucket_max_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_max_size: usize, hash_builder: S) -> Self {
        assert!(bucket_max_size > 0, "bucket capacity must be positive");
        Self {
            bucket_max_size,
            hash_builder,
            directory: RwLock::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                slots: vec![Arc::new(Bucket::new(0))],
            }),
        }
    }

    fn hash_key(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    fn slot_of(hash: u64, global_depth: u32) -> usize {
        (hash as usize) & ((1usize << global_depth) - 1)
    }

    fn resolve(&self, hash: u64) -> Arc<Bucket<K, V>> {
        let dir = self.directory.read();
        dir.slots[Self::slot_of(hash, dir.global_depth)].clone()
    }

    /// Checks that the directory still routes `hash` to `bucket`; a split may
    /// have repointed the slot between resolving and latching the bucket.
    fn still_routed(&self, hash: u64, bucket: &Arc<Bucket<K, V>>) -> bool {
        let dir = self.directory.read();
        Arc::ptr_eq(&dir.slots[Self::slot_of(hash, dir.global_depth)], bucket)
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let hash = self.hash_key(key);
        loop {
            let bucket = self.resolve(hash);
            let inner = bucket.inner.lock();
            if !self.still_routed(hash, &bucket) {
                continue;
            }
            return inner.items.get(key).cloned();
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash_key(key);
        loop {
            let bucket = self.resolve(hash);
            let mut inner = bucket.inner.lock();
            if !self.still_routed(hash, &bucket) {
                continue;
            }
            return inner.items.remove(key).is_some();
        }
    }

    /// Upsert: overwrites the value of an existing key in place, otherwise
    /// inserts, splitting buckets (and doubling the directory) until the key
    /// fits.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash_key(&key);
        loop {
            let bucket = self.resolve(hash);
            let mut inner = bucket.inner.lock();
            if !self.still_routed(hash, &bucket) {
                continue;
            }

            if let Some(slot) = inner.items.get_mut(&key) {
                *slot = value;
                return;
            }
            if inner.items.len() < self.bucket_max_size {
                inner.items.insert(key, value);
                return;
            }

            // Split on the next depth bit, then retry; a degenerate
            // redistribution simply splits again on the following round.
            let high_bit = 1usize << inner.local_depth;
            inner.local_depth += 1;
            let mut dir = self.directory.write();
            if inner.local_depth > dir.global_depth {
                let doubled = dir.slots.clone();
                dir.slots.extend(doubled);
                dir.global_depth += 1;
            }
            let new_bucket = Arc::new(Bucket::new(inner.local_depth));
            {
                let mut new_inner = new_bucket.inner.lock();
                let moved: Vec<K> = inner
                    .items
                    .keys()
                    .filter(|k| (self.hash_key(k) as usize) & high_bit != 0)
                    .cloned()
                    .collect();
                for k in moved {
                    if let Some(v) = inner.items.remove(&k) {
                        new_inner.items.insert(k, v);
                    }
                }
            }
            dir.num_buckets += 1;
            for i in 0..dir.slots.len() {
                if i & high_bit != 0 && Arc::ptr_eq(&dir.slots[i], &bucket) {
                    dir.slots[i] = new_bucket.clone();
                }
            }
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.directory.read().global_depth
    }

    pub fn local_depth(&self, bucket_id: usize) -> Option<u32> {
        let bucket = self.directory.read().slots.get(bucket_id)?.clone();
        let inner = bucket.inner.lock();
        Some(inner.local_depth)
    }

    pub fn num_buckets(&self) -> usize {
        self.directory.read().num_buckets
    }

    /// Number of entries across all distinct buckets.
    pub fn len(&self) -> usize {
        let buckets: Vec<Arc<Bucket<K, V>>> = {
            let dir = self.directory.read();
            let mut distinct: Vec<Arc<Bucket<K, V>>> = Vec::new();
            for slot in &dir.slots {
                if !distinct.iter().any(|b| Arc::ptr_eq(b, slot)) {
                    distinct.push(slot.clone());
                }
            }
            distinct
        };
        buckets.iter().map(|b| b.inner.lock().items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
