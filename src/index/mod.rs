mod b_plus_tree;
mod iterator;

pub use b_plus_tree::BPlusTree;
pub use iterator::BPlusTreeIterator;
