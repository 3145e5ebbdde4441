//! Collapsed stack view of a tree.
//!
//! Collapsed stacks are the flat text form of a call tree.
//! Format: "parent;child;grandchild weight"
//!
//! Example: "main;handle;parse 40"
//! This means: main called handle which called parse, and 40 units of sample
//! value were observed with parse as the leaf.

use super::tree::{Node, Tree};
use log::debug;
use serde::{Deserialize, Serialize};

/// A single collapsed stack entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapsedStack {
    /// Stack trace as semicolon-separated string
    pub stack: String,

    /// Self value of the leaf frame
    pub weight: u64,
}

impl CollapsedStack {
    pub fn new(stack: String, weight: u64) -> Self {
        Self { stack, weight }
    }

    pub fn to_line(&self) -> String {
        format!("{} {}", self.stack, self.weight)
    }
}

/// Build collapsed stacks from a tree
///
/// # Returns
/// One entry per node with a non-zero self value, heaviest first (ties by
/// stack name). Weight held by the root itself, which only happens after
/// truncation, is reported under the root's own name.
pub fn build_collapsed_stacks(tree: &Tree) -> Vec<CollapsedStack> {
    let mut stacks = Vec::new();
    let root = tree.root();
    if root.self_value() > 0 {
        stacks.push(CollapsedStack::new(
            root.name().to_string(),
            root.self_value(),
        ));
    }

    let mut path: Vec<&str> = Vec::new();
    let mut pending: Vec<(&Node, usize)> = root.children().rev().map(|c| (c, 0)).collect();
    while let Some((node, depth)) = pending.pop() {
        path.truncate(depth);
        path.push(node.name());
        if node.self_value() > 0 {
            stacks.push(CollapsedStack::new(path.join(";"), node.self_value()));
        }
        pending.extend(node.children().rev().map(|c| (c, depth + 1)));
    }

    stacks.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.stack.cmp(&b.stack)));

    debug!("Built {} collapsed stacks", stacks.len());

    stacks
}
