//! Weighted stack trace tree.
//!
//! Every node is one call frame; its total is the sample value observed on
//! every path through it. Children are kept ordered by name so that
//! serialization is deterministic and merging is order independent.
//! Weights saturate at `u64::MAX` everywhere: on insert, merge and decode.
//!
//! Serialized form (all integers are unsigned LEB128 varints), pre-order:
//! `name_len name self_value child_count` repeated for every node.
//!
//! Walks use explicit stacks, so tree depth is bounded by memory rather
//! than by the thread stack. Dropping a tree is iterative too.

use crate::utils::config::{MAX_STACK_DEPTH, ROOT_NODE_NAME};
use crate::utils::error::TreeError;
use std::cmp::Reverse;
use std::collections::btree_map::{self, Entry};
use std::collections::BTreeMap;
use std::fmt;
use std::mem;

/// A single call frame in a [`Tree`]
pub struct Node {
    name: String,
    self_value: u64,
    total: u64,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            self_value: 0,
            total: 0,
            children: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value attributed to this frame itself (it was the leaf)
    pub fn self_value(&self) -> u64 {
        self.self_value
    }

    /// Self value plus the totals of all children
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Children in name order
    pub fn children(&self) -> impl DoubleEndedIterator<Item = &Node> {
        self.children.values()
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    fn shallow_copy(&self) -> Node {
        Node {
            name: self.name.clone(),
            self_value: self.self_value,
            total: self.total,
            children: BTreeMap::new(),
        }
    }

    fn preorder(&self) -> PreOrder<'_> {
        PreOrder {
            stack: vec![(self, 0)],
        }
    }

    fn count(&self) -> usize {
        self.preorder().count()
    }

    fn insert<S: AsRef<str>>(&mut self, frames: &[S], value: u64) {
        let mut node = self;
        node.total = node.total.saturating_add(value);
        for frame in frames {
            let frame = frame.as_ref();
            node = node
                .children
                .entry(frame.to_string())
                .or_insert_with(|| Node::new(frame));
            node.total = node.total.saturating_add(value);
        }
        node.self_value = node.self_value.saturating_add(value);
    }

    fn merge(&mut self, other: Node) {
        let mut pending = vec![(self, other)];
        while let Some((dst, mut src)) = pending.pop() {
            dst.self_value = dst.self_value.saturating_add(src.self_value);
            dst.total = dst.total.saturating_add(src.total);

            let mut shared = Vec::new();
            for (name, child) in mem::take(&mut src.children) {
                match dst.children.entry(name) {
                    Entry::Occupied(_) => shared.push(child),
                    Entry::Vacant(entry) => {
                        entry.insert(child);
                    }
                }
            }
            if shared.is_empty() {
                continue;
            }

            // Both sides are in name order
            let mut shared = shared.into_iter().peekable();
            for (name, existing) in dst.children.iter_mut() {
                if let Some(child) = shared.next_if(|c| &c.name == name) {
                    pending.push((existing, child));
                }
            }
        }
    }

    /// Attach a decoded child, merging it with a same-named sibling
    fn adopt(&mut self, child: Node) {
        self.total = self.total.saturating_add(child.total);
        match self.children.entry(child.name.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(child),
            Entry::Vacant(entry) => {
                entry.insert(child);
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut pending: Vec<Node> = mem::take(&mut self.children).into_values().collect();
        while let Some(mut node) = pending.pop() {
            pending.extend(mem::take(&mut node.children).into_values());
        }
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        rebuild(self, |_| true)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.preorder();
        let mut right = other.preorder();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some((a, depth_a)), Some((b, depth_b))) => {
                    let same = depth_a == depth_b
                        && a.name == b.name
                        && a.self_value == b.self_value
                        && a.total == b.total
                        && a.children.len() == b.children.len();
                    if !same {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("self_value", &self.self_value)
            .field("total", &self.total)
            .field("children", &self.children.len())
            .finish()
    }
}

/// Pre-order walk in name order, yielding each node with its depth
struct PreOrder<'a> {
    stack: Vec<(&'a Node, usize)>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (&'a Node, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, depth) = self.stack.pop()?;
        self.stack
            .extend(node.children.values().rev().map(|c| (c, depth + 1)));
        Some((node, depth))
    }
}

/// Weighted call tree rooted at an implicit `root` frame
#[derive(Clone, PartialEq, Eq)]
pub struct Tree {
    root: Node,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tree {
    /// One entry per node: call path -> (self value, total)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path: Vec<&str> = Vec::new();
        let mut map = f.debug_map();
        for (node, depth) in self.root.preorder() {
            path.truncate(depth);
            path.push(&node.name);
            map.entry(&path.join(";"), &(node.self_value, node.total));
        }
        map.finish()
    }
}

impl Tree {
    /// Empty tree: a single root of weight 0
    pub fn new() -> Self {
        Self {
            root: Node::new(ROOT_NODE_NAME),
        }
    }

    /// Add `value` along `frames` (outermost caller first)
    pub fn insert_stack<S: AsRef<str>>(&mut self, frames: &[S], value: u64) {
        self.root.insert(frames, value);
    }

    /// Merge another tree into this one, summing weights per call path
    pub fn merge(&mut self, other: Tree) {
        self.root.merge(other.root);
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn total(&self) -> u64 {
        self.root.total
    }

    /// Number of nodes, root included
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    /// Frames on the longest call path, root excluded
    pub fn depth(&self) -> usize {
        self.root.preorder().map(|(_, depth)| depth).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.root.total == 0 && self.root.children.is_empty()
    }

    fn fits(&self, max_nodes: u64) -> bool {
        max_nodes == 0 || self.node_count() as u64 <= max_nodes
    }

    /// Keep the `max_nodes` heaviest nodes
    ///
    /// Nodes are ranked by total (descending), then depth, then call path, so
    /// the kept set always contains every ancestor of a kept node. The total
    /// of a dropped subtree is added to its parent's self value, which keeps
    /// every remaining total unchanged. `max_nodes == 0` means no limit.
    pub fn truncate(&self, max_nodes: u64) -> Tree {
        if self.fits(max_nodes) {
            return self.clone();
        }

        // Among nodes of equal depth, pre-order is call path order
        let mut ranked: Vec<(Reverse<u64>, usize, usize)> = self
            .root
            .preorder()
            .enumerate()
            .map(|(index, (node, depth))| (Reverse(node.total), depth, index))
            .collect();
        ranked.sort_unstable();

        let mut keep = vec![false; ranked.len()];
        for (_, _, index) in ranked.into_iter().take(max_nodes as usize) {
            keep[index] = true;
        }

        Tree {
            root: rebuild(&self.root, |index| keep[index]),
        }
    }

    /// Serialize the tree truncated to `max_nodes`
    pub fn bytes(&self, max_nodes: u64) -> Vec<u8> {
        if self.fits(max_nodes) {
            encode(&self.root)
        } else {
            encode(&self.truncate(max_nodes).root)
        }
    }

    /// Decode a tree produced by [`Tree::bytes`]
    ///
    /// Sibling frames with the same name are merged and totals are
    /// recomputed from self values.
    ///
    /// # Errors
    /// * `TreeError::Malformed` - truncated input, trailing bytes, invalid
    ///   UTF-8, an unexpected root frame, or a path deeper than
    ///   [`MAX_STACK_DEPTH`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Tree, TreeError> {
        let mut decoder = Decoder { buf: bytes, pos: 0 };
        let root = decoder.tree()?;
        if decoder.pos != bytes.len() {
            return Err(TreeError::Malformed(format!(
                "{} trailing bytes",
                bytes.len() - decoder.pos
            )));
        }
        if root.name != ROOT_NODE_NAME {
            return Err(TreeError::Malformed(format!(
                "unexpected root frame {:?}",
                root.name
            )));
        }
        Ok(Tree { root })
    }
}

/// Node under construction and the source children still to visit
struct Frame<'a> {
    out: Node,
    children: btree_map::Values<'a, String, Node>,
}

impl<'a> Frame<'a> {
    fn new(node: &'a Node) -> Self {
        Self {
            out: node.shallow_copy(),
            children: node.children.values(),
        }
    }
}

/// Copy `root`, keeping the nodes whose pre-order index passes `keep`
///
/// The root (index 0) is always kept. A rejected node takes its subtree
/// with it and its total is added to the parent's self value.
fn rebuild(root: &Node, keep: impl Fn(usize) -> bool) -> Node {
    let mut stack: Vec<Frame<'_>> = Vec::new();
    let mut current = Frame::new(root);
    let mut next_index = 1;

    loop {
        match current.children.next() {
            Some(child) => {
                if keep(next_index) {
                    next_index += 1;
                    stack.push(mem::replace(&mut current, Frame::new(child)));
                } else {
                    next_index += child.count();
                    current.out.self_value = current.out.self_value.saturating_add(child.total);
                }
            }
            None => match stack.pop() {
                Some(parent) => {
                    let done = mem::replace(&mut current, parent);
                    current.out.children.insert(done.out.name.clone(), done.out);
                }
                None => return current.out,
            },
        }
    }
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn encode(root: &Node) -> Vec<u8> {
    let mut buf = Vec::new();
    for (node, _) in root.preorder() {
        put_uvarint(&mut buf, node.name.len() as u64);
        buf.extend_from_slice(node.name.as_bytes());
        put_uvarint(&mut buf, node.self_value);
        put_uvarint(&mut buf, node.children.len() as u64);
    }
    buf
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn uvarint(&mut self) -> Result<u64, TreeError> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| TreeError::Malformed("unexpected end of input".to_string()))?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(TreeError::Malformed("varint overflows u64".to_string()));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn name(&mut self) -> Result<String, TreeError> {
        let len = self.uvarint()?;
        if len > self.remaining() as u64 {
            return Err(TreeError::Malformed(format!(
                "frame name of {} bytes exceeds input",
                len
            )));
        }
        let end = self.pos + len as usize;
        let name = std::str::from_utf8(&self.buf[self.pos..end])
            .map_err(|e| TreeError::Malformed(format!("frame name is not UTF-8: {}", e)))?;
        self.pos = end;
        Ok(name.to_string())
    }

    fn tree(&mut self) -> Result<Node, TreeError> {
        // Nodes still reading children, with the number of children left
        let mut open: Vec<(Node, u64)> = Vec::new();
        loop {
            if open.len() > MAX_STACK_DEPTH {
                return Err(TreeError::Malformed(format!(
                    "tree deeper than {} frames",
                    MAX_STACK_DEPTH
                )));
            }

            let mut node = Node::new(self.name()?);
            node.self_value = self.uvarint()?;
            node.total = node.self_value;

            let child_count = self.uvarint()?;
            // Every encoded child takes at least three bytes
            if child_count > (self.remaining() / 3) as u64 {
                return Err(TreeError::Malformed(format!(
                    "child count {} exceeds input",
                    child_count
                )));
            }
            open.push((node, child_count));

            while let Some((_, 0)) = open.last() {
                let Some((done, _)) = open.pop() else {
                    break;
                };
                match open.last_mut() {
                    Some((parent, left)) => {
                        *left -= 1;
                        parent.adopt(done);
                    }
                    None => return Ok(done),
                }
            }
        }
    }
}

/// Incremental merger of decoded trees
#[derive(Debug, Default)]
pub struct TreeMerger {
    tree: Tree,
}

impl TreeMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_tree(&mut self, tree: Tree) {
        self.tree.merge(tree);
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn into_tree(self) -> Tree {
        self.tree
    }
}
