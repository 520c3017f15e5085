use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// Hasher whose output for integer keys is the key value itself. Bucket
/// selection masks the low `global_depth` bits of the hash, so directory
/// placement stays predictable for integer-like keys (page ids included).
#[derive(Default)]
pub(crate) struct IdentityHasher {
    hash: u64,
}

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.hash ^= (*b as u64) << ((i % 8) * 8);
        }
    }

    fn write_u8(&mut self, v: u8) {
        self.hash = v as u64;
    }

    fn write_u16(&mut self, v: u16) {
        self.hash = v as u64;
    }

    fn write_u32(&mut self, v: u32) {
        self.hash = v as u64;
    }

    fn write_u64(&mut self, v: u64) {
        self.hash = v;
    }

    fn write_usize(&mut self, v: usize) {
        self.hash = v as u64;
    }

    fn write_i32(&mut self, v: i32) {
        self.hash = v as u32 as u64;
    }

    fn write_i64(&mut self, v: i64) {
        self.hash = v as u64;
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = IdentityHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A bucket with a fixed local depth. Splits never mutate depth in place;
/// they replace the bucket with two deeper ones.
struct Bucket<K, V> {
    depth: usize,
    items: Mutex<Vec<(K, V)>>,
}

impl<K: Eq + Clone, V: Clone> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Mutex::new(Vec::new()),
        }
    }

    fn find(&self, key: &K) -> Option<V> {
        let items = self.items.lock();
        items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn remove(&self, key: &K) -> bool {
        let mut items = self.items.lock();
        if let Some(pos) = items.iter().position(|(k, _)| k == key) {
            items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Upserts when the key is present, appends when there is capacity.
    /// Returns false when the bucket is full and the key is new.
    fn insert(&self, key: &K, value: &V, capacity: usize) -> bool {
        let mut items = self.items.lock();
        if let Some(entry) = items.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.clone();
            return true;
        }
        if items.len() >= capacity {
            return false;
        }
        items.push((key.clone(), value.clone()));
        true
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

struct Directory<K, V> {
    global_depth: usize,
    buckets: Vec<Arc<Bucket<K, V>>>,
}

/// Extendible hash table: a directory of `2^global_depth` shared bucket
/// references, each bucket carrying a local depth `<= global_depth`.
///
/// The table mutex linearizes all operations; per-bucket mutexes guard the
/// item vectors themselves. A full bucket whose local depth has reached the
/// global depth forces the directory to double before the bucket splits.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    dir: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table with global depth 0 and a single empty bucket.
    pub fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size,
            dir: Mutex::new(Directory {
                global_depth: 0,
                buckets: vec![Arc::new(Bucket::new(0))],
            }),
        }
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (hash_of(key) & mask) as usize
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.lock();
        let index = Self::index_of(key, dir.global_depth);
        dir.buckets[index].find(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let dir = self.dir.lock();
        let index = Self::index_of(key, dir.global_depth);
        dir.buckets[index].remove(key)
    }

    /// Inserts or updates a mapping. Splits buckets (growing the directory
    /// when needed) until the entry fits; each split strictly shrinks the
    /// offending bucket unless every item collides on the next hash bit, in
    /// which case the loop splits again at greater depth.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.dir.lock();
        loop {
            let index = Self::index_of(&key, dir.global_depth);
            let bucket = Arc::clone(&dir.buckets[index]);
            if bucket.insert(&key, &value, self.bucket_size) {
                return;
            }

            if bucket.depth == dir.global_depth {
                // Double the directory, duplicating every pointer into the
                // new upper half.
                let old_size = dir.buckets.len();
                for i in 0..old_size {
                    let dup = Arc::clone(&dir.buckets[i]);
                    dir.buckets.push(dup);
                }
                dir.global_depth += 1;
            }

            Self::split_bucket(&mut dir, &bucket);
        }
    }

    /// Replaces `old` with two buckets of depth `old.depth + 1`, rehashing
    /// items and rewriting every directory slot that pointed at `old`.
    fn split_bucket(dir: &mut Directory<K, V>, old: &Arc<Bucket<K, V>>) {
        let bit = 1u64 << old.depth;
        let zero = Arc::new(Bucket::new(old.depth + 1));
        let one = Arc::new(Bucket::new(old.depth + 1));

        {
            let items = old.items.lock();
            let mut zero_items = zero.items.lock();
            let mut one_items = one.items.lock();
            for (k, v) in items.iter() {
                if hash_of(k) & bit == 0 {
                    zero_items.push((k.clone(), v.clone()));
                } else {
                    one_items.push((k.clone(), v.clone()));
                }
            }
        }

        for i in 0..dir.buckets.len() {
            if Arc::ptr_eq(&dir.buckets[i], old) {
                dir.buckets[i] = if (i as u64) & bit == 0 {
                    Arc::clone(&zero)
                } else {
                    Arc::clone(&one)
                };
            }
        }
    }

    /// Number of hash bits the directory uses.
    pub fn global_depth(&self) -> usize {
        self.dir.lock().global_depth
    }

    /// Local depth of the bucket at the given directory index, or 0 when the
    /// index is out of range.
    pub fn local_depth(&self, index: usize) -> usize {
        let dir = self.dir.lock();
        dir.buckets.get(index).map_or(0, |b| b.depth)
    }

    /// Count of distinct buckets reachable from the directory.
    pub fn num_buckets(&self) -> usize {
        let dir = self.dir.lock();
        dir.buckets
            .iter()
            .map(Arc::as_ptr)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        let dir = self.dir.lock();
        let mut seen = HashSet::new();
        dir.buckets
            .iter()
            .filter(|b| seen.insert(Arc::as_ptr(b)))
            .map(|b| b.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table: ExtendibleHashTable<u32, String> = ExtendibleHashTable::new(4);

        table.insert(1, "one".to_string());
        table.insert(2, "two".to_string());

        assert_eq!(table.find(&1), Some("one".to_string()));
        assert_eq!(table.find(&2), Some("two".to_string()));
        assert_eq!(table.find(&3), None);

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_upsert_does_not_grow() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        table.insert(7, 1);
        table.insert(7, 2);
        table.insert(7, 3);

        assert_eq!(table.find(&7), Some(3));
        assert_eq!(table.len(), 1);
        assert_eq!(table.global_depth(), 0);
    }

    #[test]
    fn test_split_ladder() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        table.insert(0, 0);
        table.insert(1, 1);
        assert_eq!(table.global_depth(), 0);
        assert_eq!(table.num_buckets(), 1);

        table.insert(2, 2);
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 2);

        table.insert(3, 3);
        assert_eq!(table.global_depth(), 1);

        table.insert(4, 4);
        assert_eq!(table.global_depth(), 2);
        assert_eq!(table.num_buckets(), 3);

        for k in 0..5 {
            assert_eq!(table.find(&k), Some(k));
        }
    }

    #[test]
    fn test_local_depth_bound() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        for k in 0..32 {
            table.insert(k, k);
        }

        let global = table.global_depth();
        for i in 0..(1 << global) {
            assert!(table.local_depth(i) <= global);
        }
    }

    #[test]
    fn test_colliding_low_bits_force_deep_split() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        // All keys share the low 3 bits, forcing repeated splits.
        for k in [0u32, 8, 16, 24, 32] {
            table.insert(k, k);
        }

        for k in [0u32, 8, 16, 24, 32] {
            assert_eq!(table.find(&k), Some(k));
        }
        assert!(table.global_depth() >= 3);
    }
}
