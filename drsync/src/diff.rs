//! Classification of every relative path across a primary and a DR tree

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::index::index_tree;
use crate::node::{find_node, normalize_relative, Node, NodeKind, SyncStatus};
use crate::operation::SyncCounts;

/// How to treat a file whose DR copy is newer than primary while sizes match
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DrNewerPolicy {
    /// Only a strictly newer primary or a size change makes a file different
    #[default]
    Ignore,
    /// A newer DR copy is also flagged so that sync overwrites it
    Overwrite,
}

/// Options for the differ
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffOptions {
    #[serde(default)]
    pub dr_newer: DrNewerPolicy,
}

/// One classified relative path.
///
/// `primary` and `dr` hold detached copies of the nodes (children omitted).
/// At least one of them is always present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub status: SyncStatus,
    #[serde(rename = "primaryFile", skip_serializing_if = "Option::is_none")]
    pub primary: Option<Node>,
    #[serde(rename = "drFile", skip_serializing_if = "Option::is_none")]
    pub dr: Option<Node>,
    pub summary: String,
}

impl Difference {
    fn primary_only(path: &str, node: &Node) -> Self {
        Self {
            path: path.to_string(),
            name: node.name.clone(),
            kind: node.kind,
            status: SyncStatus::PrimaryOnly,
            primary: Some(detached(node, SyncStatus::PrimaryOnly)),
            dr: None,
            summary: "Exists only on primary".to_string(),
        }
    }

    fn dr_only(path: &str, node: &Node) -> Self {
        Self {
            path: path.to_string(),
            name: node.name.clone(),
            kind: node.kind,
            status: SyncStatus::DrOnly,
            primary: None,
            dr: Some(detached(node, SyncStatus::DrOnly)),
            summary: "Exists only on DR".to_string(),
        }
    }

    fn both(path: &str, primary: &Node, dr: &Node, status: SyncStatus, summary: String) -> Self {
        Self {
            path: path.to_string(),
            name: primary.name.clone(),
            kind: primary.kind,
            status,
            primary: Some(detached(primary, status)),
            dr: Some(detached(dr, status)),
            summary,
        }
    }

    /// Informational record for a path that needs no action
    pub fn in_sync(path: &str, primary: Option<&Node>, dr: Option<&Node>) -> Option<Self> {
        let reference = primary.or(dr)?;
        Some(Self {
            path: normalize_relative(path),
            name: reference.name.clone(),
            kind: reference.kind,
            status: SyncStatus::Synced,
            primary: primary.map(|n| detached(n, SyncStatus::Synced)),
            dr: dr.map(|n| detached(n, SyncStatus::Synced)),
            summary: "Files are in sync.".to_string(),
        })
    }

    pub fn is_actionable(&self) -> bool {
        self.status.is_actionable()
    }
}

fn detached(node: &Node, status: SyncStatus) -> Node {
    Node {
        children: Vec::new(),
        status,
        ..node.clone()
    }
}

/// Output of one differ pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    /// Annotated copy of the primary tree
    pub primary: Vec<Node>,
    /// Annotated copy of the DR tree
    pub dr: Vec<Node>,
    /// Every non-synced path, in sorted path order
    pub differences: Vec<Difference>,
}

impl Comparison {
    /// Differences a sync can act on
    pub fn actionable(&self) -> impl Iterator<Item = &Difference> {
        self.differences.iter().filter(|d| d.is_actionable())
    }

    pub fn difference(&self, relative_path: &str) -> Option<&Difference> {
        let wanted = normalize_relative(relative_path);
        self.differences.iter().find(|d| d.path == wanted)
    }

    /// Current status of a path, `Unknown` when neither tree has it
    pub fn status_of(&self, relative_path: &str) -> SyncStatus {
        if let Some(diff) = self.difference(relative_path) {
            return diff.status;
        }
        find_node(&self.primary, relative_path)
            .or_else(|| find_node(&self.dr, relative_path))
            .map(|node| node.status)
            .unwrap_or(SyncStatus::Unknown)
    }

    /// Relative paths annotated `synced` on either side
    pub fn synced_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        for tree in [&self.primary, &self.dr] {
            for (path, node) in index_tree(tree).iter() {
                if node.status == SyncStatus::Synced {
                    paths.insert(path.to_string());
                }
            }
        }
        paths
    }

    pub fn counts(&self) -> SyncCounts {
        SyncCounts::from_differences(self.actionable())
    }
}

/// Differ over two already loaded trees
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    options: DiffOptions,
}

impl DiffEngine {
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Classify every relative path seen in either tree.
    ///
    /// The inputs are left untouched; the returned trees are deep copies with
    /// `status` set on every indexed node. Statuses are not propagated to
    /// parent directories.
    pub fn compare(&self, primary: &[Node], dr: &[Node]) -> Comparison {
        let primary_index = index_tree(primary);
        let dr_index = index_tree(dr);

        let all_paths: BTreeSet<&str> = primary_index.paths().chain(dr_index.paths()).collect();

        let mut primary_status = HashMap::with_capacity(primary_index.len());
        let mut dr_status = HashMap::with_capacity(dr_index.len());
        let mut differences = Vec::new();

        for path in all_paths {
            match (primary_index.get(path), dr_index.get(path)) {
                (Some(p), Some(d)) => {
                    let (status, difference) = self.classify_pair(path, p, d);
                    primary_status.insert(path.to_string(), status);
                    dr_status.insert(path.to_string(), status);
                    differences.extend(difference);
                }
                (Some(p), None) => {
                    primary_status.insert(path.to_string(), SyncStatus::PrimaryOnly);
                    differences.push(Difference::primary_only(path, p));
                }
                (None, Some(d)) => {
                    dr_status.insert(path.to_string(), SyncStatus::DrOnly);
                    differences.push(Difference::dr_only(path, d));
                }
                (None, None) => {}
            }
        }

        let mut primary_tree = primary.to_vec();
        let mut dr_tree = dr.to_vec();
        annotate(&mut primary_tree, &primary_status);
        annotate(&mut dr_tree, &dr_status);

        debug!(
            primary_nodes = primary_index.len(),
            dr_nodes = dr_index.len(),
            differences = differences.len(),
            "Tree comparison finished"
        );

        Comparison {
            primary: primary_tree,
            dr: dr_tree,
            differences,
        }
    }

    fn classify_pair(&self, path: &str, p: &Node, d: &Node) -> (SyncStatus, Option<Difference>) {
        if p.kind != d.kind {
            let summary = format!("Type mismatch: primary is {}, DR is {}", p.kind, d.kind);
            return (
                SyncStatus::Different,
                Some(Difference::both(path, p, d, SyncStatus::Different, summary)),
            );
        }

        if p.kind == NodeKind::Directory {
            return (SyncStatus::Synced, None);
        }

        match self.file_mismatch(p, d) {
            Some(summary) => (
                SyncStatus::Different,
                Some(Difference::both(path, p, d, SyncStatus::Different, summary)),
            ),
            None => (SyncStatus::Synced, None),
        }
    }

    /// Metadata comparison of two files; primary is always the authority
    fn file_mismatch(&self, p: &Node, d: &Node) -> Option<String> {
        let primary_newer = p.modified > d.modified;
        let dr_newer = d.modified > p.modified;

        if p.size != d.size {
            return Some(format!("Size differs: primary={}, DR={}.", p.size, d.size));
        }
        if primary_newer {
            return Some("Primary is newer.".to_string());
        }
        if dr_newer && self.options.dr_newer == DrNewerPolicy::Overwrite {
            return Some(
                "Metadata differs: DR is newer (primary is the source of truth). Sync will overwrite."
                    .to_string(),
            );
        }
        None
    }
}

fn annotate(nodes: &mut [Node], statuses: &HashMap<String, SyncStatus>) {
    for node in nodes {
        node.status = statuses
            .get(&normalize_relative(&node.relative_path))
            .copied()
            .unwrap_or(SyncStatus::Unknown);
        annotate(&mut node.children, statuses);
    }
}

/// Classify two trees with default options
pub fn compare_trees(primary: &[Node], dr: &[Node]) -> Comparison {
    DiffEngine::default().compare(primary, dr)
}
