//! Tree model shared by both sides of a mirror

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a tree element
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
        }
    }
}

/// Per-path synchronization status, derived by the differ
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Unknown,
    Synced,
    Different,
    PrimaryOnly,
    DrOnly,
}

impl SyncStatus {
    /// Statuses that a sync can act on
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Different | Self::PrimaryOnly | Self::DrOnly)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Unknown => "unknown",
            SyncStatus::Synced => "synced",
            SyncStatus::Different => "different",
            SyncStatus::PrimaryOnly => "primary_only",
            SyncStatus::DrOnly => "dr_only",
        };
        f.write_str(label)
    }
}

/// Size of a node as reported by a provider.
///
/// Files usually carry a byte count. Aggregate or directory nodes may carry a
/// human-readable label such as `"4KB"`. Labels are normalised to bytes for
/// comparison where possible and compared verbatim otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSize {
    Bytes(u64),
    Label(String),
}

#[derive(PartialEq, Eq)]
enum SizeKey<'a> {
    Bytes(u64),
    Raw(&'a str),
}

impl NodeSize {
    /// Size in bytes, if the value can be interpreted as one
    pub fn bytes(&self) -> Option<u64> {
        match self {
            NodeSize::Bytes(n) => Some(*n),
            NodeSize::Label(label) => parse_size_label(label),
        }
    }

    fn key(&self) -> SizeKey<'_> {
        match self {
            NodeSize::Bytes(n) => SizeKey::Bytes(*n),
            NodeSize::Label(label) => match parse_size_label(label) {
                Some(n) => SizeKey::Bytes(n),
                None => SizeKey::Raw(label.trim()),
            },
        }
    }
}

impl Default for NodeSize {
    fn default() -> Self {
        NodeSize::Bytes(0)
    }
}

impl PartialEq for NodeSize {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for NodeSize {}

impl From<u64> for NodeSize {
    fn from(bytes: u64) -> Self {
        NodeSize::Bytes(bytes)
    }
}

impl From<&str> for NodeSize {
    fn from(label: &str) -> Self {
        NodeSize::Label(label.to_string())
    }
}

impl fmt::Display for NodeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSize::Bytes(n) => f.write_str(&format_bytes(*n)),
            NodeSize::Label(label) => f.write_str(label),
        }
    }
}

fn parse_size_label(label: &str) -> Option<u64> {
    let label = label.trim();
    let split = label
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(label.len());
    let (number, unit) = label.split_at(split);
    if number.is_empty() {
        return None;
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => return None,
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier);
    }
    let value: f64 = number.parse().ok()?;
    Some((value * multiplier as f64).round() as u64)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// An element of a primary or DR tree.
///
/// A node exclusively owns its children. `relative_path` is the only key used
/// to correlate nodes across the two trees; `path` is specific to the server
/// the node was listed from and is never compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Absolute path on the node's own server
    pub path: String,
    /// Path relative to the tree root, always `/`-separated
    pub relative_path: String,
    #[serde(rename = "lastModified")]
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub size: NodeSize,
    #[serde(default)]
    pub status: SyncStatus,
    /// Payload, only present when the provider fetched it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    /// Create a file node under `root`
    pub fn file(
        root: &str,
        relative_path: &str,
        size: impl Into<NodeSize>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self::new(root, relative_path, NodeKind::File, size.into(), modified, Vec::new())
    }

    /// Create a directory node under `root`
    pub fn directory(
        root: &str,
        relative_path: &str,
        modified: DateTime<Utc>,
        children: Vec<Node>,
    ) -> Self {
        Self::new(
            root,
            relative_path,
            NodeKind::Directory,
            NodeSize::Bytes(0),
            modified,
            children,
        )
    }

    fn new(
        root: &str,
        relative_path: &str,
        kind: NodeKind,
        size: NodeSize,
        modified: DateTime<Utc>,
        children: Vec<Node>,
    ) -> Self {
        let relative_path = normalize_relative(relative_path);
        let path = join_path(root, &relative_path);
        Self {
            id: path.clone(),
            name: file_name(&relative_path).to_string(),
            kind,
            path,
            relative_path,
            modified,
            size,
            status: SyncStatus::Unknown,
            content: None,
            children,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Whether any descendant carries a non-synced classified status.
    ///
    /// The differ never propagates statuses upward; callers that want an
    /// aggregate signal for a directory use this.
    pub fn has_changes_beneath(&self) -> bool {
        self.children
            .iter()
            .any(|child| child.status.is_actionable() || child.has_changes_beneath())
    }

    /// Set the status of this node and its whole subtree
    pub fn set_status_recursive(&mut self, status: SyncStatus) {
        self.status = status;
        for child in &mut self.children {
            child.set_status_recursive(status);
        }
    }

    /// Number of nodes in this subtree, including this one
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }
}

/// Find a node by relative path anywhere in a tree
pub fn find_node<'a>(tree: &'a [Node], relative_path: &str) -> Option<&'a Node> {
    let wanted = normalize_relative(relative_path);
    find_normalized(tree, &wanted)
}

fn find_normalized<'a>(tree: &'a [Node], wanted: &str) -> Option<&'a Node> {
    for node in tree {
        if normalize_relative(&node.relative_path) == wanted {
            return Some(node);
        }
        if let Some(found) = find_normalized(&node.children, wanted) {
            return Some(found);
        }
    }
    None
}

/// Normalise a relative path: `/` separators, no leading `./`, no surrounding separators
pub fn normalize_relative(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.trim_matches('/');
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest.trim_start_matches('/');
    }
    if trimmed == "." {
        return String::new();
    }
    trimmed.to_string()
}

/// Last segment of a normalised relative path
pub fn file_name(relative_path: &str) -> &str {
    relative_path.rsplit('/').next().unwrap_or(relative_path)
}

/// Join a relative path onto a server root, keeping the root's separator style
pub fn join_path(root: &str, relative_path: &str) -> String {
    let relative_path = normalize_relative(relative_path);
    let separator = if root.contains('\\') && !root.contains('/') {
        '\\'
    } else {
        '/'
    };
    if relative_path.is_empty() {
        return root.to_string();
    }
    let relative = if separator == '\\' {
        relative_path.replace('/', "\\")
    } else {
        relative_path
    };
    if root.is_empty() {
        relative
    } else if root.ends_with(separator) {
        format!("{root}{relative}")
    } else {
        format!("{root}{separator}{relative}")
    }
}
