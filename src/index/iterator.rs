use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result};
use crate::storage::page::{LeafPage, Storable};

/// Walks the leaf chain from a starting leaf, yielding entries in key order.
///
/// Each step pins at most one leaf. The iterator is a snapshot walker: it is
/// only valid while the tree is not structurally mutated.
pub struct BPlusTreeIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    current: PageId,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> BPlusTreeIterator<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, start: PageId) -> Self {
        Self {
            bpm,
            current: start,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Next entry, or None past the end of the last leaf.
    pub fn next_entry(&mut self) -> Result<Option<(K, V)>> {
        while !self.current.is_invalid() {
            let next = {
                let guard = self.bpm.fetch_page_read(self.current)?;
                let leaf = LeafPage::<_, K, V>::new(guard.data());
                if self.index < leaf.size() {
                    let entry = (leaf.key_at(self.index), leaf.value_at(self.index));
                    self.index += 1;
                    return Ok(Some(entry));
                }
                leaf.next_page_id()
            };
            self.current = next;
            self.index = 0;
        }
        Ok(None)
    }
}

impl<K, V> Iterator for BPlusTreeIterator<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
