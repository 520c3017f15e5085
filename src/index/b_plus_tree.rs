use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result, StrataError, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::{
    BTreePage, HeaderPage, InternalPage, LeafPage, Storable, LEAF_HEADER_SIZE, NODE_HEADER_SIZE,
};

use super::iterator::BPlusTreeIterator;

/// Disk-resident B+Tree over fixed-size keys and payloads.
///
/// Every node is one page fetched through the buffer pool; parents and
/// children reference each other by page id. Keys are unique. The root latch
/// serializes structural mutation while allowing concurrent point reads.
///
/// The `(index name -> root page id)` binding is persisted in the header
/// page whenever the root changes, so a tree can be reopened by name against
/// the same file.
pub struct BPlusTree<K, V> {
    index_name: String,
    root: RwLock<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
    bpm: Arc<BufferPoolManager>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    /// Opens (or starts empty) the tree named `index_name`. A `None` max
    /// size means the largest entry count that fits a page after the header.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let leaf_max_size =
            leaf_max_size.unwrap_or((PAGE_SIZE - LEAF_HEADER_SIZE) / (K::SIZE + V::SIZE));
        let internal_max_size =
            internal_max_size.unwrap_or((PAGE_SIZE - NODE_HEADER_SIZE) / (K::SIZE + PageId::SIZE));

        let root = {
            let guard = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            let header = HeaderPage::new(guard.data());
            header.find(&index_name).unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            root: RwLock::new(root),
            leaf_max_size,
            internal_max_size,
            bpm,
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_invalid()
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    fn leaf_min_size(&self) -> usize {
        (self.leaf_max_size + 1) / 2
    }

    fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let root = self.root.read();
        if root.is_invalid() {
            return Ok(None);
        }
        let leaf_id = self.find_leaf(*root, key)?;
        let guard = self.bpm.fetch_page_read(leaf_id)?;
        let leaf = LeafPage::<_, K, V>::new(guard.data());
        Ok(leaf.find_key(key).map(|pos| leaf.value_at(pos)))
    }

    /// Inserts a unique key. Returns false when the key already exists.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let mut root = self.root.write();
        if root.is_invalid() {
            *root = self.start_new_tree(&key, &value)?;
            return Ok(true);
        }
        let leaf_id = self.find_leaf(*root, &key)?;
        self.insert_into_leaf(&mut root, leaf_id, &key, &value)
    }

    /// Removes a key. Returns false when the key is absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let mut root = self.root.write();
        if root.is_invalid() {
            return Ok(false);
        }
        let leaf_id = self.find_leaf(*root, key)?;

        let removed = {
            let mut guard = self.bpm.fetch_page_write(leaf_id)?;
            let pos = {
                let leaf = LeafPage::<_, K, V>::new(guard.data());
                leaf.find_key(key)
            };
            match pos {
                None => false,
                Some(pos) => {
                    let mut leaf = LeafPage::<_, K, V>::new(guard.data_mut());
                    leaf.remove_entry_at(pos);
                    true
                }
            }
        };
        if !removed {
            return Ok(false);
        }

        self.rebalance(&mut root, leaf_id)?;
        Ok(true)
    }

    /// Iterator over the whole tree in key order via the leaf chain. Only
    /// valid while the tree is not structurally mutated.
    pub fn iter(&self) -> Result<BPlusTreeIterator<K, V>> {
        let root = self.root.read();
        if root.is_invalid() {
            return Ok(BPlusTreeIterator::new(
                Arc::clone(&self.bpm),
                INVALID_PAGE_ID,
            ));
        }

        let mut current = *root;
        loop {
            let guard = self.bpm.fetch_page_read(current)?;
            if BTreePage::new(guard.data()).is_leaf() {
                break;
            }
            current = InternalPage::<_, K>::new(guard.data()).child_at(0);
        }
        Ok(BPlusTreeIterator::new(Arc::clone(&self.bpm), current))
    }

    /// Descends to the leaf that covers `key`, releasing each parent before
    /// fetching its child.
    fn find_leaf(&self, root: PageId, key: &K) -> Result<PageId> {
        let mut current = root;
        loop {
            let guard = self.bpm.fetch_page_read(current)?;
            if BTreePage::new(guard.data()).is_leaf() {
                return Ok(current);
            }
            current = InternalPage::<_, K>::new(guard.data()).lookup_child(key);
        }
    }

    fn update_header_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        header.upsert(&self.index_name, root)
    }

    fn reparent(&self, child: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(child)?;
        BTreePage::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Allocates a leaf root holding the first entry and persists the new
    /// root binding.
    fn start_new_tree(&self, key: &K, value: &V) -> Result<PageId> {
        let page_id = {
            let mut guard = self.bpm.new_page()?;
            let page_id = guard.page_id();
            let mut leaf = LeafPage::<_, K, V>::new(guard.data_mut());
            leaf.init(page_id, self.leaf_max_size);
            leaf.insert_entry_at(0, key, value);
            page_id
        };
        self.update_header_root(page_id)?;
        trace!(root = %page_id, "started new tree");
        Ok(page_id)
    }

    fn insert_into_leaf(
        &self,
        root: &mut PageId,
        leaf_id: PageId,
        key: &K,
        value: &V,
    ) -> Result<bool> {
        let mut guard = self.bpm.fetch_page_write(leaf_id)?;

        let (duplicate, pos, size) = {
            let leaf = LeafPage::<_, K, V>::new(guard.data());
            let pos = leaf.lower_bound(key);
            let duplicate = pos < leaf.size() && leaf.key_at(pos) == *key;
            (duplicate, pos, leaf.size())
        };
        if duplicate {
            return Ok(false);
        }

        if size < self.leaf_max_size {
            let mut leaf = LeafPage::<_, K, V>::new(guard.data_mut());
            leaf.insert_entry_at(pos, key, value);
            return Ok(true);
        }

        // Leaf is at capacity: stage max_size + 1 entries, then split.
        let (mut entries, next, parent) = {
            let leaf = LeafPage::<_, K, V>::new(guard.data());
            (leaf.entries(), leaf.next_page_id(), leaf.parent_page_id())
        };
        entries.insert(pos, (*key, *value));
        let split = (entries.len() + 1) / 2;
        let separator = entries[split].0;

        // Allocate the right sibling before mutating the original leaf.
        let new_leaf_id = {
            let mut new_guard = self.bpm.new_page()?;
            let new_leaf_id = new_guard.page_id();
            let mut new_leaf = LeafPage::<_, K, V>::new(new_guard.data_mut());
            new_leaf.init(new_leaf_id, self.leaf_max_size);
            new_leaf.replace_entries(&entries[split..]);
            new_leaf.set_parent_page_id(parent);
            new_leaf.set_next_page_id(next);
            new_leaf_id
        };

        {
            let mut leaf = LeafPage::<_, K, V>::new(guard.data_mut());
            leaf.replace_entries(&entries[..split]);
            leaf.set_next_page_id(new_leaf_id);
        }
        drop(guard);

        trace!(left = %leaf_id, right = %new_leaf_id, "split leaf");
        self.insert_into_parent(root, leaf_id, parent, &separator, new_leaf_id)?;
        Ok(true)
    }

    /// Installs `(key, right_id)` just after `left_id` in its parent,
    /// growing a new root or splitting the parent as needed.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left_id: PageId,
        parent_id: PageId,
        key: &K,
        right_id: PageId,
    ) -> Result<()> {
        if parent_id.is_invalid() {
            // The split node was the root: grow a new internal root with the
            // two halves as its children.
            let new_root_id = {
                let mut guard = self.bpm.new_page()?;
                let new_root_id = guard.page_id();
                let mut node = InternalPage::<_, K>::new(guard.data_mut());
                node.init(new_root_id, self.internal_max_size);
                node.replace_entries(&[(*key, left_id), (*key, right_id)]);
                new_root_id
            };
            self.reparent(left_id, new_root_id)?;
            self.reparent(right_id, new_root_id)?;
            *root = new_root_id;
            self.update_header_root(new_root_id)?;
            trace!(root = %new_root_id, "grew new root");
            return Ok(());
        }

        let mut guard = self.bpm.fetch_page_write(parent_id)?;
        let (size, insert_pos) = {
            let node = InternalPage::<_, K>::new(guard.data());
            // A parent that no longer lists the split child is corrupt.
            let index = node
                .child_index_of(left_id)
                .ok_or(StrataError::InvalidPage(parent_id))?;
            (node.size(), index + 1)
        };

        if size < self.internal_max_size {
            let mut node = InternalPage::<_, K>::new(guard.data_mut());
            node.insert_entry_at(insert_pos, key, right_id);
            drop(guard);
            self.reparent(right_id, parent_id)?;
            return Ok(());
        }

        // Parent is at capacity: stage size + 1 entries and split, promoting
        // the key at the split point.
        let (mut entries, grandparent) = {
            let node = InternalPage::<_, K>::new(guard.data());
            (node.entries(), node.parent_page_id())
        };
        entries.insert(insert_pos, (*key, right_id));
        let split = (entries.len() + 1) / 2;
        let promoted = entries[split].0;
        let moved: Vec<(K, PageId)> = entries[split..].to_vec();

        let new_node_id = {
            let mut new_guard = self.bpm.new_page()?;
            let new_node_id = new_guard.page_id();
            let mut new_node = InternalPage::<_, K>::new(new_guard.data_mut());
            new_node.init(new_node_id, self.internal_max_size);
            new_node.replace_entries(&moved);
            new_node.set_parent_page_id(grandparent);
            new_node_id
        };

        {
            let mut node = InternalPage::<_, K>::new(guard.data_mut());
            node.replace_entries(&entries[..split]);
        }
        drop(guard);

        for (_, child) in &moved {
            self.reparent(*child, new_node_id)?;
        }
        if insert_pos < split {
            self.reparent(right_id, parent_id)?;
        }

        trace!(left = %parent_id, right = %new_node_id, "split internal node");
        self.insert_into_parent(root, parent_id, grandparent, &promoted, new_node_id)
    }

    /// Restores the minimum-size invariant for `node_id` after a deletion,
    /// recursing upward when a coalesce removes a parent separator.
    fn rebalance(&self, root: &mut PageId, node_id: PageId) -> Result<()> {
        let (is_leaf, size, parent_id) = {
            let guard = self.bpm.fetch_page_read(node_id)?;
            let page = BTreePage::new(guard.data());
            (page.is_leaf(), page.size(), page.parent_page_id())
        };

        if node_id == *root {
            return self.adjust_root(root, is_leaf, size);
        }

        let min_size = if is_leaf {
            self.leaf_min_size()
        } else {
            self.internal_min_size()
        };
        if size >= min_size {
            return Ok(());
        }

        // Consult the parent for a sibling, preferring the left one.
        let (sibling_id, separator_index, sibling_is_left) = {
            let guard = self.bpm.fetch_page_read(parent_id)?;
            let parent = InternalPage::<_, K>::new(guard.data());
            // A parent that does not list this node is corrupt.
            let index = parent
                .child_index_of(node_id)
                .ok_or(StrataError::InvalidPage(parent_id))?;
            if index > 0 {
                (parent.child_at(index - 1), index, true)
            } else {
                (parent.child_at(index + 1), index + 1, false)
            }
        };

        let sibling_size = {
            let guard = self.bpm.fetch_page_read(sibling_id)?;
            BTreePage::new(guard.data()).size()
        };

        if sibling_size > min_size {
            return self.redistribute(node_id, sibling_id, parent_id, separator_index, sibling_is_left, is_leaf);
        }

        let (left_id, right_id) = if sibling_is_left {
            (sibling_id, node_id)
        } else {
            (node_id, sibling_id)
        };
        self.coalesce(left_id, right_id, parent_id, separator_index, is_leaf)?;
        self.rebalance(root, parent_id)
    }

    /// Root special cases: an empty leaf root empties the tree; an internal
    /// root with a single child hands the root to that child.
    fn adjust_root(&self, root: &mut PageId, is_leaf: bool, size: usize) -> Result<()> {
        let old_root = *root;

        if is_leaf && size == 0 {
            *root = INVALID_PAGE_ID;
            self.update_header_root(INVALID_PAGE_ID)?;
            self.bpm.delete_page(old_root)?;
            trace!(root = %old_root, "tree emptied");
            return Ok(());
        }

        if !is_leaf && size == 1 {
            let child_id = {
                let guard = self.bpm.fetch_page_read(old_root)?;
                InternalPage::<_, K>::new(guard.data()).child_at(0)
            };
            self.reparent(child_id, INVALID_PAGE_ID)?;
            *root = child_id;
            self.update_header_root(child_id)?;
            self.bpm.delete_page(old_root)?;
            trace!(old = %old_root, new = %child_id, "root collapsed into its only child");
        }

        Ok(())
    }

    /// Moves one entry from the sibling across the parent separator.
    fn redistribute(
        &self,
        node_id: PageId,
        sibling_id: PageId,
        parent_id: PageId,
        separator_index: usize,
        sibling_is_left: bool,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let new_separator = {
                let mut node_guard = self.bpm.fetch_page_write(node_id)?;
                let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

                if sibling_is_left {
                    // Move the left sibling's last entry to the node's front;
                    // its key becomes the separator.
                    let (k, v) = {
                        let sibling = LeafPage::<_, K, V>::new(sibling_guard.data());
                        let last = sibling.size() - 1;
                        (sibling.key_at(last), sibling.value_at(last))
                    };
                    {
                        let mut sibling = LeafPage::<_, K, V>::new(sibling_guard.data_mut());
                        let last = sibling.size() - 1;
                        sibling.remove_entry_at(last);
                    }
                    let mut node = LeafPage::<_, K, V>::new(node_guard.data_mut());
                    node.insert_entry_at(0, &k, &v);
                    k
                } else {
                    // Move the right sibling's first entry to the node's end;
                    // the sibling's new first key becomes the separator.
                    let (k, v) = {
                        let sibling = LeafPage::<_, K, V>::new(sibling_guard.data());
                        (sibling.key_at(0), sibling.value_at(0))
                    };
                    {
                        let mut sibling = LeafPage::<_, K, V>::new(sibling_guard.data_mut());
                        sibling.remove_entry_at(0);
                    }
                    let next_separator = {
                        let sibling = LeafPage::<_, K, V>::new(sibling_guard.data());
                        sibling.key_at(0)
                    };
                    let mut node = LeafPage::<_, K, V>::new(node_guard.data_mut());
                    let size = node.size();
                    node.insert_entry_at(size, &k, &v);
                    next_separator
                }
            };

            let mut parent_guard = self.bpm.fetch_page_write(parent_id)?;
            let mut parent = InternalPage::<_, K>::new(parent_guard.data_mut());
            parent.set_key_at(separator_index, &new_separator);
            return Ok(());
        }

        // Internal nodes rotate through the parent: the separator comes
        // down into the node, the sibling's extreme key goes up.
        let mut parent_guard = self.bpm.fetch_page_write(parent_id)?;
        let old_separator = {
            let parent = InternalPage::<_, K>::new(parent_guard.data());
            parent.key_at(separator_index)
        };

        let (new_separator, moved_child) = {
            let mut node_guard = self.bpm.fetch_page_write(node_id)?;
            let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

            if sibling_is_left {
                let (last_key, last_child) = {
                    let sibling = InternalPage::<_, K>::new(sibling_guard.data());
                    let last = sibling.size() - 1;
                    (sibling.key_at(last), sibling.child_at(last))
                };
                {
                    let mut sibling = InternalPage::<_, K>::new(sibling_guard.data_mut());
                    let last = sibling.size() - 1;
                    sibling.remove_entry_at(last);
                }
                let mut node = InternalPage::<_, K>::new(node_guard.data_mut());
                node.insert_entry_at(0, &old_separator, last_child);
                // The former child 0, now at slot 1, sits under the
                // pushed-down separator.
                node.set_key_at(1, &old_separator);
                (last_key, last_child)
            } else {
                let (first_child, second_key) = {
                    let sibling = InternalPage::<_, K>::new(sibling_guard.data());
                    (sibling.child_at(0), sibling.key_at(1))
                };
                {
                    let mut node = InternalPage::<_, K>::new(node_guard.data_mut());
                    let size = node.size();
                    node.insert_entry_at(size, &old_separator, first_child);
                }
                let mut sibling = InternalPage::<_, K>::new(sibling_guard.data_mut());
                sibling.remove_entry_at(0);
                (second_key, first_child)
            }
        };

        {
            let mut parent = InternalPage::<_, K>::new(parent_guard.data_mut());
            parent.set_key_at(separator_index, &new_separator);
        }
        drop(parent_guard);

        self.reparent(moved_child, node_id)
    }

    /// Merges `right_id` into `left_id`, removes the separator entry from
    /// the parent, and deletes the right page.
    fn coalesce(
        &self,
        left_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        separator_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let separator = {
            let guard = self.bpm.fetch_page_read(parent_id)?;
            InternalPage::<_, K>::new(guard.data()).key_at(separator_index)
        };

        if is_leaf {
            let (right_entries, right_next) = {
                let guard = self.bpm.fetch_page_read(right_id)?;
                let right = LeafPage::<_, K, V>::new(guard.data());
                (right.entries(), right.next_page_id())
            };
            let mut guard = self.bpm.fetch_page_write(left_id)?;
            let mut all = {
                let left = LeafPage::<_, K, V>::new(guard.data());
                left.entries()
            };
            all.extend_from_slice(&right_entries);
            let mut left = LeafPage::<_, K, V>::new(guard.data_mut());
            left.replace_entries(&all);
            left.set_next_page_id(right_next);
        } else {
            let right_entries = {
                let guard = self.bpm.fetch_page_read(right_id)?;
                InternalPage::<_, K>::new(guard.data()).entries()
            };
            {
                let mut guard = self.bpm.fetch_page_write(left_id)?;
                let mut all = {
                    let left = InternalPage::<_, K>::new(guard.data());
                    left.entries()
                };
                // The parent separator drops down over the right node's
                // first child.
                all.push((separator, right_entries[0].1));
                all.extend_from_slice(&right_entries[1..]);
                let mut left = InternalPage::<_, K>::new(guard.data_mut());
                left.replace_entries(&all);
            }
            for (_, child) in &right_entries {
                self.reparent(*child, left_id)?;
            }
        }

        {
            let mut guard = self.bpm.fetch_page_write(parent_id)?;
            let mut parent = InternalPage::<_, K>::new(guard.data_mut());
            parent.remove_entry_at(separator_index);
        }

        self.bpm.delete_page(right_id)?;
        trace!(left = %left_id, right = %right_id, "coalesced siblings");
        Ok(())
    }
}
