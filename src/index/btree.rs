//! On-disk B+ tree, one node per page, accessed through the buffer pool.
//!
//! Header page (page 0, words): magic, root page, first leaf page, key
//! kind, key length, allocated node count, live entry count. Node pages
//! (words): kind, key count, parent, next leaf, prev leaf (leaf only),
//! reserved up to word 16, then packed entries. Leaf entries are
//! `(key, page_no, slot_id)`; internal entries interleave keys and child
//! pages with one trailing child word.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::{IndexError, IndexResult};
use super::key::{IndexKey, KeyKind, key_word_footprint};
use crate::file::{
    self, BufferManager, FileHandle, PAGE_KIND_INTERNAL, PAGE_KIND_LEAF, PAGE_WORDS, PageId,
};
use crate::record::RecordId;

pub const BTREE_MAGIC: u32 = 0x42505452;
pub const NODE_HEADER_WORDS: usize = 16;

const HDR_MAGIC: usize = 0;
const HDR_ROOT: usize = 1;
const HDR_FIRST_LEAF: usize = 2;
const HDR_KEY_KIND: usize = 3;
const HDR_KEY_LEN: usize = 4;
const HDR_NODE_COUNT: usize = 5;
const HDR_ENTRY_COUNT: usize = 6;

const NODE_KIND: usize = 0;
const NODE_KEY_COUNT: usize = 1;
const NODE_PARENT: usize = 2;
const NODE_NEXT_LEAF: usize = 3;
const NODE_PREV_LEAF: usize = 4;

#[derive(Debug, Clone)]
struct Node {
    page_no: i32,
    is_leaf: bool,
    parent: i32,
    next_leaf: i32,
    prev_leaf: i32,
    keys: Vec<IndexKey>,
    rids: Vec<RecordId>,
    children: Vec<i32>,
}

impl Node {
    fn new_leaf(page_no: i32, parent: i32) -> Self {
        Self {
            page_no,
            is_leaf: true,
            parent,
            next_leaf: -1,
            prev_leaf: -1,
            keys: Vec::new(),
            rids: Vec::new(),
            children: Vec::new(),
        }
    }

    fn new_internal(page_no: i32, parent: i32) -> Self {
        Self {
            page_no,
            is_leaf: false,
            parent,
            next_leaf: -1,
            prev_leaf: -1,
            keys: Vec::new(),
            rids: Vec::new(),
            children: Vec::new(),
        }
    }
}

fn read_key(
    page: &[u8],
    pos: &mut usize,
    kind: KeyKind,
    key_len: usize,
) -> IndexResult<IndexKey> {
    match kind {
        KeyKind::Int => {
            let v = file::read_word_i32(page, *pos);
            *pos += 1;
            Ok(IndexKey::Int(v))
        }
        KeyKind::Float => {
            let v = f32::from_bits(file::read_word(page, *pos));
            *pos += 1;
            Ok(IndexKey::Float(v))
        }
        KeyKind::Varchar => {
            let len = file::read_word(page, *pos) as usize;
            *pos += 1;
            if len > key_len || (*pos + len.div_ceil(4)) > PAGE_WORDS {
                return Err(IndexError::CorruptedNode(format!(
                    "string key length {} out of range",
                    len
                )));
            }
            let start = *pos * 4;
            let text = String::from_utf8_lossy(&page[start..start + len]).into_owned();
            *pos += len.div_ceil(4);
            Ok(IndexKey::Str(text))
        }
    }
}

fn write_key(page: &mut [u8], pos: &mut usize, key: &IndexKey) {
    match key {
        IndexKey::Int(v) => {
            file::write_word_i32(page, *pos, *v);
            *pos += 1;
        }
        IndexKey::Float(v) => {
            file::write_word(page, *pos, v.to_bits());
            *pos += 1;
        }
        IndexKey::Str(s) => {
            let bytes = s.as_bytes();
            file::write_word(page, *pos, bytes.len() as u32);
            *pos += 1;
            let start = *pos * 4;
            page[start..start + bytes.len()].copy_from_slice(bytes);
            *pos += bytes.len().div_ceil(4);
        }
    }
}

fn read_node(
    buffer_mgr: &mut BufferManager,
    file_handle: FileHandle,
    kind: KeyKind,
    key_len: usize,
    page_no: i32,
) -> IndexResult<Node> {
    let page = buffer_mgr.page(file_handle, page_no as PageId)?;

    let node_kind = file::read_word(page, NODE_KIND);
    let is_leaf = match node_kind {
        PAGE_KIND_LEAF => true,
        PAGE_KIND_INTERNAL => false,
        other => {
            return Err(IndexError::CorruptedNode(format!(
                "page {} has kind {}",
                page_no, other
            )));
        }
    };

    let key_count = file::read_word(page, NODE_KEY_COUNT) as usize;
    let mut node = Node {
        page_no,
        is_leaf,
        parent: file::read_word_i32(page, NODE_PARENT),
        next_leaf: if is_leaf {
            file::read_word_i32(page, NODE_NEXT_LEAF)
        } else {
            -1
        },
        prev_leaf: if is_leaf {
            file::read_word_i32(page, NODE_PREV_LEAF)
        } else {
            -1
        },
        keys: Vec::with_capacity(key_count),
        rids: Vec::new(),
        children: Vec::new(),
    };

    let mut pos = NODE_HEADER_WORDS;
    for _ in 0..key_count {
        node.keys.push(read_key(page, &mut pos, kind, key_len)?);
        if is_leaf {
            let page_no = file::read_word_i32(page, pos);
            let slot_id = file::read_word_i32(page, pos + 1);
            pos += 2;
            node.rids.push(RecordId::new(page_no, slot_id));
        } else {
            node.children.push(file::read_word_i32(page, pos));
            pos += 1;
        }
    }
    if !is_leaf && key_count > 0 {
        node.children.push(file::read_word_i32(page, pos));
    }

    Ok(node)
}

fn write_node(
    buffer_mgr: &mut BufferManager,
    file_handle: FileHandle,
    node: &Node,
) -> IndexResult<()> {
    let page = buffer_mgr.page_mut(file_handle, node.page_no as PageId)?;
    page[NODE_HEADER_WORDS * 4..].fill(0);

    file::write_word(
        page,
        NODE_KIND,
        if node.is_leaf { PAGE_KIND_LEAF } else { PAGE_KIND_INTERNAL },
    );
    file::write_word(page, NODE_KEY_COUNT, node.keys.len() as u32);
    file::write_word_i32(page, NODE_PARENT, node.parent);
    if node.is_leaf {
        file::write_word_i32(page, NODE_NEXT_LEAF, node.next_leaf);
        file::write_word_i32(page, NODE_PREV_LEAF, node.prev_leaf);
    }

    let mut pos = NODE_HEADER_WORDS;
    for (i, key) in node.keys.iter().enumerate() {
        write_key(page, &mut pos, key);
        if node.is_leaf {
            file::write_word_i32(page, pos, node.rids[i].page_no);
            file::write_word_i32(page, pos + 1, node.rids[i].slot_id);
            pos += 2;
        } else {
            file::write_word_i32(page, pos, node.children[i]);
            pos += 1;
        }
    }
    if !node.is_leaf
        && let Some(&last) = node.children.last()
    {
        file::write_word_i32(page, pos, last);
    }

    Ok(())
}

pub struct BPlusTree {
    file_handle: FileHandle,
    key_kind: KeyKind,
    key_len: usize,
    order: usize,
    root_page: i32,
    first_leaf: i32,
}

impl BPlusTree {
    /// Largest entry count a node may reach before it splits.
    fn compute_order(kind: KeyKind, key_len: usize) -> usize {
        let available = PAGE_WORDS - NODE_HEADER_WORDS;
        let k = key_word_footprint(kind, key_len);
        let leaf_order = available / (k + 2);
        let internal_order = (available - 1) / (k + 1);
        leaf_order.min(internal_order)
    }

    pub fn create(
        buffer_mgr: &mut BufferManager,
        path: &str,
        kind: KeyKind,
        key_len: usize,
    ) -> IndexResult<Self> {
        buffer_mgr.file_manager_mut().create_file(path)?;
        let file_handle = buffer_mgr.file_manager_mut().open_file(path)?;

        let page = buffer_mgr.page_mut(file_handle, 0)?;
        page.fill(0);
        file::write_word(page, HDR_MAGIC, BTREE_MAGIC);
        file::write_word_i32(page, HDR_ROOT, -1);
        file::write_word_i32(page, HDR_FIRST_LEAF, -1);
        file::write_word(page, HDR_KEY_KIND, kind.as_word());
        file::write_word(page, HDR_KEY_LEN, key_len as u32);
        file::write_word(page, HDR_NODE_COUNT, 0);
        file::write_word(page, HDR_ENTRY_COUNT, 0);

        Ok(Self {
            file_handle,
            key_kind: kind,
            key_len,
            order: Self::compute_order(kind, key_len),
            root_page: -1,
            first_leaf: -1,
        })
    }

    pub fn open(buffer_mgr: &mut BufferManager, path: &str) -> IndexResult<Self> {
        let file_handle = buffer_mgr.file_manager_mut().open_file(path)?;
        let page = buffer_mgr.page(file_handle, 0)?;

        if file::read_word(page, HDR_MAGIC) != BTREE_MAGIC {
            return Err(IndexError::InvalidMagic);
        }
        let kind_word = file::read_word(page, HDR_KEY_KIND);
        let kind =
            KeyKind::from_word(kind_word).ok_or(IndexError::InvalidKeyKind(kind_word))?;
        let key_len = file::read_word(page, HDR_KEY_LEN) as usize;

        Ok(Self {
            file_handle,
            key_kind: kind,
            key_len,
            order: Self::compute_order(kind, key_len),
            root_page: file::read_word_i32(page, HDR_ROOT),
            first_leaf: file::read_word_i32(page, HDR_FIRST_LEAF),
        })
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Advisory live entry count from the header page.
    pub fn entry_count(&self, buffer_mgr: &mut BufferManager) -> IndexResult<i64> {
        let page = buffer_mgr.page(self.file_handle, 0)?;
        Ok(file::read_word_i32(page, HDR_ENTRY_COUNT) as i64)
    }

    fn update_header(&self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        let page = buffer_mgr.page_mut(self.file_handle, 0)?;
        file::write_word_i32(page, HDR_ROOT, self.root_page);
        file::write_word_i32(page, HDR_FIRST_LEAF, self.first_leaf);
        Ok(())
    }

    fn adjust_entry_count(&self, buffer_mgr: &mut BufferManager, delta: i32) -> IndexResult<()> {
        let page = buffer_mgr.page_mut(self.file_handle, 0)?;
        let count = file::read_word_i32(page, HDR_ENTRY_COUNT);
        file::write_word_i32(page, HDR_ENTRY_COUNT, count + delta);
        Ok(())
    }

    /// Node pages are allocated from a monotonic counter; page 0 is the
    /// header, so node n lives on page n.
    fn allocate_page(&self, buffer_mgr: &mut BufferManager) -> IndexResult<i32> {
        let page = buffer_mgr.page_mut(self.file_handle, 0)?;
        let node_count = file::read_word(page, HDR_NODE_COUNT);
        file::write_word(page, HDR_NODE_COUNT, node_count + 1);
        Ok(node_count as i32 + 1)
    }

    fn read_node(&self, buffer_mgr: &mut BufferManager, page_no: i32) -> IndexResult<Node> {
        read_node(buffer_mgr, self.file_handle, self.key_kind, self.key_len, page_no)
    }

    fn write_node(&self, buffer_mgr: &mut BufferManager, node: &Node) -> IndexResult<()> {
        write_node(buffer_mgr, self.file_handle, node)
    }

    fn set_parent(
        &self,
        buffer_mgr: &mut BufferManager,
        page_no: i32,
        parent: i32,
    ) -> IndexResult<()> {
        let page = buffer_mgr.page_mut(self.file_handle, page_no as PageId)?;
        file::write_word_i32(page, NODE_PARENT, parent);
        Ok(())
    }

    /// Descend to the leaf that covers `key`: in each internal node, take
    /// the first child whose separator exceeds the key.
    fn find_leaf(&self, buffer_mgr: &mut BufferManager, key: &IndexKey) -> IndexResult<i32> {
        if self.root_page < 0 {
            return Ok(-1);
        }
        let mut current = self.root_page;
        loop {
            let node = self.read_node(buffer_mgr, current)?;
            if node.is_leaf {
                return Ok(current);
            }
            let mut i = 0;
            while i < node.keys.len() && key.compare(&node.keys[i]) != Ordering::Less {
                i += 1;
            }
            current = node.children[i];
        }
    }

    pub fn search(
        &self,
        buffer_mgr: &mut BufferManager,
        key: &IndexKey,
    ) -> IndexResult<Option<RecordId>> {
        let leaf_page = self.find_leaf(buffer_mgr, key)?;
        if leaf_page < 0 {
            return Ok(None);
        }
        let leaf = self.read_node(buffer_mgr, leaf_page)?;
        for (i, k) in leaf.keys.iter().enumerate() {
            if k.compare(key) == Ordering::Equal {
                return Ok(Some(leaf.rids[i]));
            }
        }
        Ok(None)
    }

    /// Insert a key. Returns false (and stores nothing) on a duplicate.
    pub fn insert(
        &mut self,
        buffer_mgr: &mut BufferManager,
        key: IndexKey,
        rid: RecordId,
    ) -> IndexResult<bool> {
        if self.root_page < 0 {
            let page_no = self.allocate_page(buffer_mgr)?;
            let mut leaf = Node::new_leaf(page_no, -1);
            leaf.keys.push(key);
            leaf.rids.push(rid);
            self.write_node(buffer_mgr, &leaf)?;
            self.root_page = page_no;
            self.first_leaf = page_no;
            self.update_header(buffer_mgr)?;
            self.adjust_entry_count(buffer_mgr, 1)?;
            return Ok(true);
        }

        let leaf_page = self.find_leaf(buffer_mgr, &key)?;
        let mut leaf = self.read_node(buffer_mgr, leaf_page)?;

        let mut at = 0;
        for k in &leaf.keys {
            match k.compare(&key) {
                Ordering::Equal => return Ok(false),
                Ordering::Less => at += 1,
                Ordering::Greater => break,
            }
        }
        leaf.keys.insert(at, key);
        leaf.rids.insert(at, rid);
        self.adjust_entry_count(buffer_mgr, 1)?;

        if leaf.keys.len() >= self.order {
            self.split_leaf(buffer_mgr, leaf)?;
        } else {
            self.write_node(buffer_mgr, &leaf)?;
        }
        Ok(true)
    }

    fn split_leaf(&mut self, buffer_mgr: &mut BufferManager, mut leaf: Node) -> IndexResult<()> {
        let mid = leaf.keys.len() / 2;
        let new_page = self.allocate_page(buffer_mgr)?;

        let mut right = Node::new_leaf(new_page, leaf.parent);
        right.keys = leaf.keys.split_off(mid);
        right.rids = leaf.rids.split_off(mid);
        right.next_leaf = leaf.next_leaf;
        right.prev_leaf = leaf.page_no;
        leaf.next_leaf = new_page;

        if right.next_leaf >= 0 {
            let page = buffer_mgr.page_mut(self.file_handle, right.next_leaf as PageId)?;
            file::write_word_i32(page, NODE_PREV_LEAF, new_page);
        }

        self.write_node(buffer_mgr, &leaf)?;
        self.write_node(buffer_mgr, &right)?;

        let promote = right.keys[0].clone();
        self.insert_into_parent(buffer_mgr, leaf.page_no, leaf.parent, promote, new_page)
    }

    fn split_internal(&mut self, buffer_mgr: &mut BufferManager, mut node: Node) -> IndexResult<()> {
        let mid = node.keys.len() / 2;
        let mid_key = node.keys[mid].clone();
        let new_page = self.allocate_page(buffer_mgr)?;

        let mut right = Node::new_internal(new_page, node.parent);
        right.keys = node.keys.split_off(mid + 1);
        right.children = node.children.split_off(mid + 1);
        node.keys.truncate(mid);

        for &child in &right.children {
            self.set_parent(buffer_mgr, child, new_page)?;
        }

        self.write_node(buffer_mgr, &node)?;
        self.write_node(buffer_mgr, &right)?;

        self.insert_into_parent(buffer_mgr, node.page_no, node.parent, mid_key, new_page)
    }

    fn insert_into_parent(
        &mut self,
        buffer_mgr: &mut BufferManager,
        left_page: i32,
        left_parent: i32,
        key: IndexKey,
        right_page: i32,
    ) -> IndexResult<()> {
        if left_parent < 0 {
            let root_page = self.allocate_page(buffer_mgr)?;
            let mut root = Node::new_internal(root_page, -1);
            root.keys.push(key);
            root.children.push(left_page);
            root.children.push(right_page);
            self.write_node(buffer_mgr, &root)?;
            self.set_parent(buffer_mgr, left_page, root_page)?;
            self.set_parent(buffer_mgr, right_page, root_page)?;
            self.root_page = root_page;
            self.update_header(buffer_mgr)?;
            return Ok(());
        }

        let mut parent = self.read_node(buffer_mgr, left_parent)?;
        let at = parent
            .children
            .iter()
            .position(|&c| c == left_page)
            .ok_or_else(|| {
                IndexError::CorruptedNode(format!(
                    "page {} missing from parent {}",
                    left_page, left_parent
                ))
            })?;
        parent.keys.insert(at, key);
        parent.children.insert(at + 1, right_page);
        self.set_parent(buffer_mgr, right_page, left_parent)?;

        if parent.keys.len() >= self.order {
            self.split_internal(buffer_mgr, parent)
        } else {
            self.write_node(buffer_mgr, &parent)
        }
    }

    /// Remove a key. Underfilled leaves are left in place; only an emptied
    /// root clears the tree.
    pub fn delete(&mut self, buffer_mgr: &mut BufferManager, key: &IndexKey) -> IndexResult<bool> {
        let leaf_page = self.find_leaf(buffer_mgr, key)?;
        if leaf_page < 0 {
            return Ok(false);
        }
        let mut leaf = self.read_node(buffer_mgr, leaf_page)?;
        let at = match leaf
            .keys
            .iter()
            .position(|k| k.compare(key) == Ordering::Equal)
        {
            Some(at) => at,
            None => return Ok(false),
        };

        leaf.keys.remove(at);
        leaf.rids.remove(at);
        self.adjust_entry_count(buffer_mgr, -1)?;
        self.write_node(buffer_mgr, &leaf)?;

        if leaf.keys.is_empty() && leaf.page_no == self.root_page {
            self.root_page = -1;
            self.first_leaf = -1;
            self.update_header(buffer_mgr)?;
        }

        Ok(true)
    }

    /// Streaming range scan over `[lower, upper]` with per-bound
    /// inclusivity; an absent bound is unbounded. Buffers one leaf at a
    /// time.
    pub fn range(
        &self,
        buffer_manager: Arc<Mutex<BufferManager>>,
        lower: Option<IndexKey>,
        upper: Option<IndexKey>,
        include_lower: bool,
        include_upper: bool,
    ) -> RangeScan {
        RangeScan {
            buffer_manager,
            file_handle: self.file_handle,
            key_kind: self.key_kind,
            key_len: self.key_len,
            root_page: self.root_page,
            first_leaf: self.first_leaf,
            lower,
            upper,
            include_lower,
            include_upper,
            entries: Vec::new(),
            entry_at: 0,
            next_leaf: -1,
            started: false,
            done: false,
        }
    }
}

/// Leaf-walking range iterator. Terminates at the first key past the upper
/// bound.
pub struct RangeScan {
    buffer_manager: Arc<Mutex<BufferManager>>,
    file_handle: FileHandle,
    key_kind: KeyKind,
    key_len: usize,
    root_page: i32,
    first_leaf: i32,
    lower: Option<IndexKey>,
    upper: Option<IndexKey>,
    include_lower: bool,
    include_upper: bool,
    entries: Vec<(IndexKey, RecordId)>,
    entry_at: usize,
    next_leaf: i32,
    started: bool,
    done: bool,
}

impl RangeScan {
    fn lock_buffers(&self) -> MutexGuard<'_, BufferManager> {
        match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load_leaf(&mut self, page_no: i32) -> IndexResult<()> {
        let mut buffer_mgr = self.lock_buffers();
        let node = read_node(
            &mut buffer_mgr,
            self.file_handle,
            self.key_kind,
            self.key_len,
            page_no,
        )?;
        drop(buffer_mgr);
        self.entries = node.keys.into_iter().zip(node.rids).collect();
        self.entry_at = 0;
        self.next_leaf = node.next_leaf;
        Ok(())
    }

    fn start(&mut self) -> IndexResult<()> {
        self.started = true;
        let start_leaf = match &self.lower {
            Some(key) => {
                let mut buffer_mgr = self.lock_buffers();
                let mut current = self.root_page;
                loop {
                    if current < 0 {
                        break -1;
                    }
                    let node = read_node(
                        &mut buffer_mgr,
                        self.file_handle,
                        self.key_kind,
                        self.key_len,
                        current,
                    )?;
                    if node.is_leaf {
                        break current;
                    }
                    let mut i = 0;
                    while i < node.keys.len() && key.compare(&node.keys[i]) != Ordering::Less {
                        i += 1;
                    }
                    current = node.children[i];
                }
            }
            None => self.first_leaf,
        };

        if start_leaf < 0 {
            self.done = true;
            return Ok(());
        }
        self.load_leaf(start_leaf)
    }

    fn above_lower(&self, key: &IndexKey) -> bool {
        match &self.lower {
            Some(bound) => match key.compare(bound) {
                Ordering::Greater => true,
                Ordering::Equal => self.include_lower,
                Ordering::Less => false,
            },
            None => true,
        }
    }

    fn below_upper(&self, key: &IndexKey) -> bool {
        match &self.upper {
            Some(bound) => match key.compare(bound) {
                Ordering::Less => true,
                Ordering::Equal => self.include_upper,
                Ordering::Greater => false,
            },
            None => true,
        }
    }
}

impl Iterator for RangeScan {
    type Item = IndexResult<RecordId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if !self.started
                && let Err(err) = self.start()
            {
                self.done = true;
                return Some(Err(err));
            }
            while self.entry_at < self.entries.len() {
                let (key, rid) = self.entries[self.entry_at].clone();
                self.entry_at += 1;
                if !self.below_upper(&key) {
                    self.done = true;
                    return None;
                }
                if self.above_lower(&key) {
                    return Some(Ok(rid));
                }
            }
            if self.next_leaf < 0 {
                self.done = true;
                return None;
            }
            let next = self.next_leaf;
            if let Err(err) = self.load_leaf(next) {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BufferManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let buffer_manager = BufferManager::new(PagedFileManager::new());
        (temp_dir, buffer_manager)
    }

    fn rid(slot: i32) -> RecordId {
        RecordId::new(0, slot)
    }

    /// Deterministic non-sorted insertion order covering 1..=n.
    fn shuffled(n: i32) -> Vec<i32> {
        let mut keys: Vec<i32> = (1..=n).collect();
        keys.sort_by_key(|&x| (x as i64 * 769) % n as i64);
        keys
    }

    #[test]
    fn test_order_computation() {
        // INT: (2032) / 3 = 677, (2031) / 2 = 1015
        assert_eq!(BPlusTree::compute_order(KeyKind::Int, 0), 677);
        // VARCHAR(8): K = 3, 2032/5 = 406, 2031/4 = 507
        assert_eq!(BPlusTree::compute_order(KeyKind::Varchar, 8), 406);
    }

    #[test]
    fn test_insert_search_point() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();

        for v in [5, 3, 9, 1, 7] {
            assert!(tree.insert(&mut bm, IndexKey::Int(v), rid(v)).unwrap());
        }

        assert_eq!(tree.search(&mut bm, &IndexKey::Int(7)).unwrap(), Some(rid(7)));
        assert_eq!(tree.search(&mut bm, &IndexKey::Int(4)).unwrap(), None);
        assert_eq!(tree.entry_count(&mut bm).unwrap(), 5);
    }

    #[test]
    fn test_duplicate_rejected() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();

        assert!(tree.insert(&mut bm, IndexKey::Int(1), rid(1)).unwrap());
        assert!(!tree.insert(&mut bm, IndexKey::Int(1), rid(2)).unwrap());
        assert_eq!(tree.entry_count(&mut bm).unwrap(), 1);
        assert_eq!(tree.search(&mut bm, &IndexKey::Int(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_splits_preserve_search() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();

        // enough keys to force multiple leaf splits and a root split
        let n = 2000;
        for v in shuffled(n) {
            assert!(tree.insert(&mut bm, IndexKey::Int(v), rid(v)).unwrap());
        }
        assert_eq!(tree.entry_count(&mut bm).unwrap(), n as i64);

        for v in [1, 2, 676, 677, 678, 1000, 1999, 2000] {
            assert_eq!(
                tree.search(&mut bm, &IndexKey::Int(v)).unwrap(),
                Some(rid(v)),
                "key {} lost after splits",
                v
            );
        }
        assert_eq!(tree.search(&mut bm, &IndexKey::Int(n + 1)).unwrap(), None);
    }

    #[test]
    fn test_range_scan_sorted() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();

        for v in shuffled(1500) {
            tree.insert(&mut bm, IndexKey::Int(v), rid(v)).unwrap();
        }
        drop(bm);

        // reopen through a shared pool for the iterator
        let shared = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        let tree = {
            let mut guard = shared.lock().unwrap();
            BPlusTree::open(&mut guard, path.to_str().unwrap()).unwrap()
        };

        let slots: Vec<i32> = tree
            .range(
                shared.clone(),
                Some(IndexKey::Int(100)),
                Some(IndexKey::Int(200)),
                true,
                true,
            )
            .map(|r| r.unwrap().slot_id)
            .collect();
        assert_eq!(slots, (100..=200).collect::<Vec<i32>>());

        let exclusive: Vec<i32> = tree
            .range(
                shared.clone(),
                Some(IndexKey::Int(100)),
                Some(IndexKey::Int(200)),
                false,
                false,
            )
            .map(|r| r.unwrap().slot_id)
            .collect();
        assert_eq!(exclusive, (101..=199).collect::<Vec<i32>>());

        let unbounded: Vec<i32> = tree
            .range(shared.clone(), None, Some(IndexKey::Int(5)), true, true)
            .map(|r| r.unwrap().slot_id)
            .collect();
        assert_eq!(unbounded, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_delete_and_reuse() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();

        for v in 1..=50 {
            tree.insert(&mut bm, IndexKey::Int(v), rid(v)).unwrap();
        }
        assert!(tree.delete(&mut bm, &IndexKey::Int(25)).unwrap());
        assert!(!tree.delete(&mut bm, &IndexKey::Int(25)).unwrap());

        assert_eq!(tree.search(&mut bm, &IndexKey::Int(25)).unwrap(), None);
        assert_eq!(tree.search(&mut bm, &IndexKey::Int(26)).unwrap(), Some(rid(26)));
        assert_eq!(tree.entry_count(&mut bm).unwrap(), 49);

        // the key can come back with a different rid
        assert!(tree.insert(&mut bm, IndexKey::Int(25), rid(99)).unwrap());
        assert_eq!(tree.search(&mut bm, &IndexKey::Int(25)).unwrap(), Some(rid(99)));
    }

    #[test]
    fn test_emptied_root_clears_tree() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();

        tree.insert(&mut bm, IndexKey::Int(1), rid(1)).unwrap();
        tree.delete(&mut bm, &IndexKey::Int(1)).unwrap();
        assert_eq!(tree.root_page, -1);
        assert_eq!(tree.first_leaf, -1);

        assert_eq!(tree.search(&mut bm, &IndexKey::Int(1)).unwrap(), None);
        tree.insert(&mut bm, IndexKey::Int(2), rid(2)).unwrap();
        assert_eq!(tree.search(&mut bm, &IndexKey::Int(2)).unwrap(), Some(rid(2)));
    }

    #[test]
    fn test_varchar_keys_split_and_order() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_name.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Varchar, 16).unwrap();

        // VARCHAR(16): K = 5, order = min(2032/7, 2031/6) = 290; 600 keys split
        let n = 600;
        for v in shuffled(n) {
            let key = IndexKey::Str(format!("key-{:05}", v));
            assert!(tree.insert(&mut bm, key, rid(v)).unwrap());
        }

        for v in [1, 289, 290, 291, 599, 600] {
            let key = IndexKey::Str(format!("key-{:05}", v));
            assert_eq!(tree.search(&mut bm, &key).unwrap(), Some(rid(v)));
        }
        assert_eq!(
            tree.search(&mut bm, &IndexKey::Str("key-99999".into())).unwrap(),
            None
        );
    }

    #[test]
    fn test_float_keys() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_score.idx");
        let mut tree =
            BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Float, 0).unwrap();

        for v in [2.5f32, -1.0, 0.0, 10.25] {
            tree.insert(&mut bm, IndexKey::Float(v), rid(v as i32)).unwrap();
        }
        assert_eq!(
            tree.search(&mut bm, &IndexKey::Float(10.25)).unwrap(),
            Some(rid(10))
        );
        assert_eq!(tree.search(&mut bm, &IndexKey::Float(3.0)).unwrap(), None);
    }

    #[test]
    fn test_persistence_across_open() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("t_k.idx");

        {
            let mut tree =
                BPlusTree::create(&mut bm, path.to_str().unwrap(), KeyKind::Int, 0).unwrap();
            for v in shuffled(800) {
                tree.insert(&mut bm, IndexKey::Int(v), rid(v)).unwrap();
            }
            bm.flush_all().unwrap();
        }
        drop(bm);

        let mut bm = BufferManager::new(PagedFileManager::new());
        let tree = BPlusTree::open(&mut bm, path.to_str().unwrap()).unwrap();
        assert_eq!(tree.key_kind(), KeyKind::Int);
        assert_eq!(tree.entry_count(&mut bm).unwrap(), 800);
        for v in [1, 400, 677, 678, 800] {
            assert_eq!(tree.search(&mut bm, &IndexKey::Int(v)).unwrap(), Some(rid(v)));
        }
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let (temp, mut bm) = setup();
        let path = temp.path().join("junk.idx");
        bm.file_manager_mut().create_file(&path).unwrap();
        let handle = bm.file_manager_mut().open_file(&path).unwrap();
        bm.page_mut(handle, 0).unwrap()[0] = 7;

        assert!(matches!(
            BPlusTree::open(&mut bm, path.to_str().unwrap()),
            Err(IndexError::InvalidMagic)
        ));
    }
}
