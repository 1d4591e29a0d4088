pub mod bplus_tree;
pub mod btree_page;
pub mod key_comparator;

pub use bplus_tree::BPlusTree;
pub use btree_page::{
    page_type, HeaderNode, HeaderNodeRef, InternalNode, InternalNodeRef, LeafNode, LeafNodeRef,
    PageType,
};
pub use key_comparator::{IntegerComparator, KeyComparator};
