use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{KeelError, PageId, RecordId, Result, SlotId, INVALID_PAGE_ID};

use super::btree_page::{
    page_type, HeaderNode, HeaderNodeRef, InternalNode, InternalNodeRef, LeafNode, LeafNodeRef,
    PageType, MAX_INTERNAL_CAPACITY, MAX_LEAF_CAPACITY,
};
use super::key_comparator::KeyComparator;

/// Write-latched ancestors collected while descending for an insert.
/// Ancestors are dropped as soon as a node that cannot split is reached, so
/// concurrent operations only serialize below the deepest unsafe node.
struct InsertContext {
    /// Header page latch, held while the root may still change
    header: Option<WritePageGuard>,
    /// (page id, latch) pairs from the root down
    path: Vec<(PageId, WritePageGuard)>,
}

/// A B+Tree keyed by i64 with unique keys, stored in buffer-pool pages.
///
/// The tree is reached through a dedicated header page holding the root page
/// id, so the root can move without external coordination. Internal nodes
/// follow the pivot convention: slot 0 carries only a child pointer and
/// children cover half-open key ranges.
pub struct BPlusTree {
    index_name: String,
    header_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Creates a tree over an existing header page and resets it to empty.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(
            (2..=MAX_LEAF_CAPACITY).contains(&leaf_max_size),
            "leaf_max_size out of range"
        );
        assert!(
            (3..=MAX_INTERNAL_CAPACITY).contains(&internal_max_size),
            "internal_max_size out of range"
        );

        let tree = Self {
            index_name: name.into(),
            header_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        };

        let mut guard = tree.bpm.fetch_page_write(header_page_id)?;
        HeaderNode::new(guard.data_mut()).set_root_page_id(INVALID_PAGE_ID);

        Ok(tree)
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn get_root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(HeaderNodeRef::new(guard.data()).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.get_root_page_id()?.is_valid())
    }

    /// Point lookup. Descends with read latches, releasing each parent once
    /// the child latch is held.
    pub fn get_value(&self, key: i64) -> Result<Option<RecordId>> {
        let comparator = self.comparator.as_ref();

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_page_id = HeaderNodeRef::new(header_guard.data()).root_page_id();
        if !root_page_id.is_valid() {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(root_page_id)?;
        drop(header_guard);

        loop {
            let child = match page_type(guard.data()) {
                PageType::Leaf => {
                    let leaf = LeafNodeRef::new(guard.data());
                    let index = leaf.lower_bound(key, comparator);
                    if index < leaf.size()
                        && comparator.compare(leaf.key_at(index), key) == Ordering::Equal
                    {
                        return Ok(Some(leaf.rid_at(index)));
                    }
                    return Ok(None);
                }
                PageType::Internal => {
                    InternalNodeRef::new(guard.data()).lookup_child(key, comparator)
                }
                PageType::Invalid => {
                    return Err(KeelError::IndexCorrupted(format!(
                        "unexpected page type on {}",
                        guard.page_id()
                    )))
                }
            };

            // Hold the parent until the child latch is acquired
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Inserts a unique key. Returns false (and changes nothing) if the key
    /// is already present. Descends with write latches, keeping only the
    /// ancestors that a split could still reach.
    pub fn insert(&self, key: i64, rid: RecordId) -> Result<bool> {
        let comparator = self.comparator.as_ref();

        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_page_id = HeaderNodeRef::new(header_guard.data()).root_page_id();

        if !root_page_id.is_valid() {
            // Empty tree: the new leaf becomes the root
            let (leaf_page_id, mut leaf_guard) = self.bpm.new_page_guarded()?;
            {
                let mut data = leaf_guard.write();
                let mut leaf = LeafNode::new(&mut data[..]);
                leaf.init(self.leaf_max_size);
                leaf.insert_at(0, key, rid);
            }
            HeaderNode::new(header_guard.data_mut()).set_root_page_id(leaf_page_id);
            return Ok(true);
        }

        let mut ctx = InsertContext {
            header: Some(header_guard),
            path: Vec::new(),
        };

        let mut current = root_page_id;
        loop {
            let guard = self.bpm.fetch_page_write(current)?;

            let (is_leaf, is_safe) = match page_type(guard.data()) {
                PageType::Leaf => {
                    let leaf = LeafNodeRef::new(guard.data());
                    (true, leaf.size() < leaf.max_size() - 1)
                }
                PageType::Internal => {
                    let node = InternalNodeRef::new(guard.data());
                    (false, node.size() < node.max_size())
                }
                PageType::Invalid => {
                    return Err(KeelError::IndexCorrupted(format!(
                        "unexpected page type on {}",
                        current
                    )))
                }
            };

            if is_safe {
                // Nothing above this node can be touched by a split
                ctx.path.clear();
                ctx.header = None;
            }

            if is_leaf {
                ctx.path.push((current, guard));
                break;
            }

            let child = InternalNodeRef::new(guard.data()).lookup_child(key, comparator);
            ctx.path.push((current, guard));
            current = child;
        }

        let (leaf_page_id, mut leaf_guard) = ctx.path.pop().expect("descent reached no leaf");

        let (index, is_duplicate, needs_split) = {
            let leaf = LeafNodeRef::new(leaf_guard.data());
            let index = leaf.lower_bound(key, comparator);
            let is_duplicate = index < leaf.size()
                && comparator.compare(leaf.key_at(index), key) == Ordering::Equal;
            (index, is_duplicate, leaf.size() >= leaf.max_size() - 1)
        };

        if is_duplicate {
            return Ok(false);
        }

        if !needs_split {
            let mut leaf = LeafNode::new(leaf_guard.data_mut());
            leaf.insert_at(index, key, rid);
            return Ok(true);
        }

        let (separator, right_page_id) = self.split_leaf(&mut leaf_guard, index, key, rid)?;
        self.propagate_split(ctx, leaf_page_id, separator, right_page_id)
    }

    /// Splits a full leaf while absorbing the new pair. Returns the promoted
    /// separator and the new right sibling's page id.
    fn split_leaf(
        &self,
        leaf_guard: &mut WritePageGuard,
        index: usize,
        key: i64,
        rid: RecordId,
    ) -> Result<(i64, PageId)> {
        let mut leaf = LeafNode::new(leaf_guard.data_mut());

        let mut pairs = leaf.pairs();
        pairs.insert(index, (key, rid));
        let split_at = (pairs.len() + 1) / 2;
        let old_next = leaf.next_page_id();

        let (new_page_id, mut new_guard) = self.bpm.new_page_guarded()?;
        {
            let mut data = new_guard.write();
            let mut new_leaf = LeafNode::new(&mut data[..]);
            new_leaf.init(self.leaf_max_size);
            new_leaf.set_pairs(&pairs[split_at..]);
            new_leaf.set_next_page_id(old_next);
        }

        leaf.set_pairs(&pairs[..split_at]);
        leaf.set_next_page_id(new_page_id);

        debug!(
            index = self.index_name.as_str(),
            new_page = new_page_id.as_i32(),
            "leaf split"
        );

        Ok((pairs[split_at].0, new_page_id))
    }

    /// Walks the retained ancestor path upwards, inserting the promoted
    /// separator at each level and splitting further as needed. When the
    /// path is exhausted the root itself split and a new root is installed.
    fn propagate_split(
        &self,
        mut ctx: InsertContext,
        mut left_page_id: PageId,
        mut separator: i64,
        mut right_page_id: PageId,
    ) -> Result<bool> {
        let comparator = self.comparator.as_ref();

        loop {
            match ctx.path.pop() {
                Some((node_page_id, mut guard)) => {
                    let needs_split = {
                        let node = InternalNodeRef::new(guard.data());
                        node.size() >= node.max_size()
                    };

                    if !needs_split {
                        let mut node = InternalNode::new(guard.data_mut());
                        node.insert_pair(separator, right_page_id, comparator);
                        return Ok(true);
                    }

                    let mut node = InternalNode::new(guard.data_mut());
                    let mut pairs = node.pairs();
                    let mut position = 1;
                    while position < pairs.len()
                        && comparator.compare(separator, pairs[position].0) != Ordering::Less
                    {
                        position += 1;
                    }
                    pairs.insert(position, (separator, right_page_id));

                    // ceil((max_size + 1) / 2); the key at the split point is
                    // promoted and becomes the right node's unused slot-0 key
                    let split_at = (pairs.len() + 1) / 2;
                    let promoted = pairs[split_at].0;

                    let (new_page_id, mut new_guard) = self.bpm.new_page_guarded()?;
                    {
                        let mut data = new_guard.write();
                        let mut new_node = InternalNode::new(&mut data[..]);
                        new_node.init(self.internal_max_size);
                        new_node.set_pairs(&pairs[split_at..]);
                    }
                    node.set_pairs(&pairs[..split_at]);

                    debug!(
                        index = self.index_name.as_str(),
                        new_page = new_page_id.as_i32(),
                        "internal split"
                    );

                    left_page_id = node_page_id;
                    separator = promoted;
                    right_page_id = new_page_id;
                }
                None => {
                    // The root split: grow the tree by one level
                    let header_guard = ctx
                        .header
                        .as_mut()
                        .expect("root split without the header latch held");

                    let (new_root_id, mut root_guard) = self.bpm.new_page_guarded()?;
                    {
                        let mut data = root_guard.write();
                        let mut root = InternalNode::new(&mut data[..]);
                        root.init(self.internal_max_size);
                        root.set_pairs(&[(0, left_page_id), (separator, right_page_id)]);
                    }
                    HeaderNode::new(header_guard.data_mut()).set_root_page_id(new_root_id);

                    debug!(
                        index = self.index_name.as_str(),
                        new_root = new_root_id.as_i32(),
                        "root split, tree grew a level"
                    );

                    return Ok(true);
                }
            }
        }
    }

    /// Deletion is not implemented yet; reports the key as absent.
    // TODO: pair removal with merge/redistribute mirroring the split path
    pub fn remove(&self, key: i64) -> Result<bool> {
        warn!(key, "remove called but deletion is not implemented");
        Ok(false)
    }

    /// Reads whitespace-separated i64 keys from a file and inserts each,
    /// using the key itself as the record id. Debug helper.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for key in contents.split_whitespace().filter_map(|t| t.parse().ok()) {
            let rid = RecordId::new(PageId::new(key as i32), SlotId::new(0));
            self.insert(key, rid)?;
        }
        Ok(())
    }

    /// Reads whitespace-separated i64 keys from a file and removes each.
    /// Debug helper.
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for key in contents.split_whitespace().filter_map(|t| t.parse::<i64>().ok()) {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Prints the tree topology to stdout. Debug helper.
    pub fn print(&self) -> Result<()> {
        let root_page_id = self.get_root_page_id()?;
        if !root_page_id.is_valid() {
            println!("Empty tree");
            return Ok(());
        }
        self.print_node(root_page_id)
    }

    fn print_node(&self, page_id: PageId) -> Result<()> {
        let children = {
            let guard = self.bpm.fetch_page_basic(page_id)?;
            let data = guard.read();
            match page_type(&data[..]) {
                PageType::Leaf => {
                    let leaf = LeafNodeRef::new(&data[..]);
                    let keys: Vec<String> =
                        (0..leaf.size()).map(|i| leaf.key_at(i).to_string()).collect();
                    println!("Leaf Page: {}\tNext: {}", page_id, leaf.next_page_id());
                    println!("Contents: {}\n", keys.join(", "));
                    Vec::new()
                }
                PageType::Internal => {
                    let node = InternalNodeRef::new(&data[..]);
                    let mut entries = Vec::with_capacity(node.size());
                    for i in 0..node.size() {
                        if i == 0 {
                            entries.push(format!("_: {}", node.child_at(i)));
                        } else {
                            entries.push(format!("{}: {}", node.key_at(i), node.child_at(i)));
                        }
                    }
                    println!("Internal Page: {}", page_id);
                    println!("Contents: {}\n", entries.join(", "));
                    (0..node.size()).map(|i| node.child_at(i)).collect()
                }
                PageType::Invalid => {
                    return Err(KeelError::IndexCorrupted(format!(
                        "unexpected page type on {}",
                        page_id
                    )))
                }
            }
        };

        for child in children {
            self.print_node(child)?;
        }
        Ok(())
    }

    /// Writes the tree topology as a Graphviz dot file. Debug helper.
    pub fn draw(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = String::from("digraph G {\n");
        let root_page_id = self.get_root_page_id()?;
        if root_page_id.is_valid() {
            self.draw_node(root_page_id, &mut out)?;
        }
        out.push_str("}\n");
        std::fs::write(path, out)?;
        Ok(())
    }

    fn draw_node(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let children = {
            let guard = self.bpm.fetch_page_basic(page_id)?;
            let data = guard.read();
            match page_type(&data[..]) {
                PageType::Leaf => {
                    let leaf = LeafNodeRef::new(&data[..]);
                    let keys: Vec<String> =
                        (0..leaf.size()).map(|i| leaf.key_at(i).to_string()).collect();
                    out.push_str(&format!(
                        "  LEAF_{} [shape=record label=\"{}\"];\n",
                        page_id.as_i32(),
                        keys.join(" | ")
                    ));
                    if leaf.next_page_id().is_valid() {
                        out.push_str(&format!(
                            "  LEAF_{} -> LEAF_{} [style=dashed];\n",
                            page_id.as_i32(),
                            leaf.next_page_id().as_i32()
                        ));
                    }
                    Vec::new()
                }
                PageType::Internal => {
                    let node = InternalNodeRef::new(&data[..]);
                    let keys: Vec<String> = (1..node.size())
                        .map(|i| node.key_at(i).to_string())
                        .collect();
                    out.push_str(&format!(
                        "  INT_{} [shape=record label=\"{}\"];\n",
                        page_id.as_i32(),
                        keys.join(" | ")
                    ));
                    (0..node.size()).map(|i| node.child_at(i)).collect()
                }
                PageType::Invalid => {
                    return Err(KeelError::IndexCorrupted(format!(
                        "unexpected page type on {}",
                        page_id
                    )))
                }
            }
        };

        for child in &children {
            let prefix = {
                let child_guard = self.bpm.fetch_page_basic(*child)?;
                let child_data = child_guard.read();
                if page_type(&child_data[..]) == PageType::Leaf {
                    "LEAF"
                } else {
                    "INT"
                }
            };
            out.push_str(&format!(
                "  INT_{} -> {}_{};\n",
                page_id.as_i32(),
                prefix,
                child.as_i32()
            ));
            self.draw_node(*child, out)?;
        }
        Ok(())
    }
}
