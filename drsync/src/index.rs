//! Flattening of a rooted tree into a relative-path lookup

use std::collections::BTreeMap;

use tracing::debug;

use crate::node::{normalize_relative, Node};

/// Relative path to node lookup over one tree.
///
/// Keys are normalised relative paths; iteration is in sorted path order.
#[derive(Debug, Default)]
pub struct TreeIndex<'a> {
    nodes: BTreeMap<String, &'a Node>,
}

impl<'a> TreeIndex<'a> {
    pub fn get(&self, relative_path: &str) -> Option<&'a Node> {
        self.nodes.get(relative_path).copied()
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.nodes.contains_key(relative_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &'a Node)> + '_ {
        self.nodes.iter().map(|(path, node)| (path.as_str(), *node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Index every node of a tree, intermediate directories included.
///
/// Depth-first; when two nodes share a relative path the later one wins.
/// Nodes without a relative path are skipped, their children are still
/// visited.
pub fn index_tree(tree: &[Node]) -> TreeIndex<'_> {
    let mut index = TreeIndex::default();
    visit(tree, &mut index);
    index
}

fn visit<'a>(nodes: &'a [Node], index: &mut TreeIndex<'a>) {
    for node in nodes {
        let key = normalize_relative(&node.relative_path);
        if key.is_empty() {
            debug!("Skipping node without relative path: {}", node.path);
        } else {
            index.nodes.insert(key, node);
        }
        visit(&node.children, index);
    }
}
