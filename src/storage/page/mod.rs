mod btree_page;
mod header_page;
mod storable;

pub use btree_page::{
    BTreePage, BTreePageType, InternalPage, LeafPage, LEAF_HEADER_SIZE, NODE_HEADER_SIZE,
};
pub use header_page::HeaderPage;
pub use storable::Storable;
