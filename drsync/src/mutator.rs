//! Local add/remove/update of an in-memory tree
//!
//! Used when no external executor mutates the mirror and the session runs
//! fully in memory. Every function returns a new tree; the input is never
//! modified.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::node::{file_name, find_node, join_path, normalize_relative, Node, SyncStatus};
use crate::operation::{SyncAction, SyncOperation};

/// Insert `source` (and its subtree) at the position implied by its relative path.
///
/// Missing intermediate directories are synthesised with `synced` status and
/// the source's timestamp. Inserted nodes get absolute paths under
/// `root_base_path` and `synced` status. A node already at that path is
/// replaced.
pub fn add_node(tree: &[Node], root_base_path: &str, source: &Node) -> Vec<Node> {
    let mut result = tree.to_vec();
    let relative = normalize_relative(&source.relative_path);
    if relative.is_empty() {
        warn!("Cannot add node without relative path: {}", source.path);
        return result;
    }

    let segments: Vec<&str> = relative.split('/').collect();
    let inserted = rebase(source, root_base_path);
    insert_at(&mut result, root_base_path, &segments, 1, inserted, source.modified);
    result
}

fn insert_at(
    level: &mut Vec<Node>,
    root: &str,
    segments: &[&str],
    depth: usize,
    node: Node,
    modified: DateTime<Utc>,
) {
    let prefix = segments[..depth].join("/");
    let position = level
        .iter()
        .position(|n| normalize_relative(&n.relative_path) == prefix);

    if depth == segments.len() {
        match position {
            Some(i) => level[i] = node,
            None => level.push(node),
        }
        return;
    }

    let index = match position {
        Some(i) if level[i].is_dir() => i,
        Some(i) => {
            debug!("Replacing file '{}' with a directory", prefix);
            level[i] = synthesized_directory(root, &prefix, modified);
            i
        }
        None => {
            level.push(synthesized_directory(root, &prefix, modified));
            level.len() - 1
        }
    };
    insert_at(&mut level[index].children, root, segments, depth + 1, node, modified);
}

fn synthesized_directory(root: &str, relative_path: &str, modified: DateTime<Utc>) -> Node {
    let mut dir = Node::directory(root, relative_path, modified, Vec::new());
    dir.status = SyncStatus::Synced;
    dir
}

fn rebase(node: &Node, root: &str) -> Node {
    let relative_path = normalize_relative(&node.relative_path);
    let path = join_path(root, &relative_path);
    Node {
        id: path.clone(),
        name: if node.name.is_empty() {
            file_name(&relative_path).to_string()
        } else {
            node.name.clone()
        },
        kind: node.kind,
        path,
        relative_path,
        modified: node.modified,
        size: node.size.clone(),
        status: SyncStatus::Synced,
        content: node.content.clone(),
        children: node.children.iter().map(|c| rebase(c, root)).collect(),
    }
}

/// Remove the node at `relative_path` together with its subtree. No-op when absent.
pub fn remove_node(tree: &[Node], relative_path: &str) -> Vec<Node> {
    let wanted = normalize_relative(relative_path);
    let mut result = tree.to_vec();
    if !wanted.is_empty() {
        remove_in(&mut result, &wanted);
    }
    result
}

fn remove_in(nodes: &mut Vec<Node>, wanted: &str) {
    nodes.retain(|n| normalize_relative(&n.relative_path) != wanted);
    for node in nodes.iter_mut() {
        remove_in(&mut node.children, wanted);
    }
}

/// Copy the content-bearing fields of `source` onto the node at
/// `relative_path` and mark it `synced`. The payload is copied only when the
/// source carries one.
pub fn update_node(tree: &[Node], relative_path: &str, source: &Node) -> Vec<Node> {
    let wanted = normalize_relative(relative_path);
    let mut result = tree.to_vec();
    match find_in_mut(&mut result, &wanted) {
        Some(target) => {
            target.modified = source.modified;
            target.size = source.size.clone();
            if source.content.is_some() {
                target.content = source.content.clone();
            }
            target.status = SyncStatus::Synced;
        }
        None => debug!("Update target '{}' not found", wanted),
    }
    result
}

fn find_in_mut<'a>(nodes: &'a mut [Node], wanted: &str) -> Option<&'a mut Node> {
    for node in nodes.iter_mut() {
        if normalize_relative(&node.relative_path) == wanted {
            return Some(node);
        }
        if let Some(found) = find_in_mut(&mut node.children, wanted) {
            return Some(found);
        }
    }
    None
}

/// Apply one sync operation to a mirror tree.
///
/// `source` is the primary's node for the operation's path; creates and
/// overwrites need it. An overwrite across kinds (file vs directory) is a
/// remove followed by an add.
pub fn apply_operation(
    tree: &[Node],
    root_base_path: &str,
    operation: &SyncOperation,
    source: Option<&Node>,
) -> Result<Vec<Node>> {
    let action = operation.action().ok_or_else(|| {
        SyncError::validation(format!(
            "nothing to apply for '{}' with status '{}'",
            operation.path, operation.status
        ))
    })?;

    let require_source = || {
        source.ok_or_else(|| {
            SyncError::validation(format!("'{}' does not exist on primary", operation.path))
        })
    };

    match action {
        SyncAction::Delete => Ok(remove_node(tree, &operation.path)),
        SyncAction::Create => Ok(add_node(tree, root_base_path, require_source()?)),
        SyncAction::Overwrite => {
            let source = require_source()?;
            match find_node(tree, &operation.path) {
                Some(target) if target.kind == source.kind && !source.is_dir() => {
                    Ok(update_node(tree, &operation.path, source))
                }
                Some(target) if target.kind == source.kind => {
                    // Directories carry no content of their own.
                    let mut result = tree.to_vec();
                    if let Some(dir) = find_in_mut(&mut result, &normalize_relative(&operation.path)) {
                        dir.status = SyncStatus::Synced;
                    }
                    Ok(result)
                }
                _ => {
                    let pruned = remove_node(tree, &operation.path);
                    Ok(add_node(&pruned, root_base_path, source))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_add_synthesises_intermediate_directories() {
        let source = Node::file("/primary", "a/b/c.txt", 7u64, t(9));
        let tree = add_node(&[], "/dr", &source);

        assert_eq!(tree.len(), 1);
        let a = &tree[0];
        assert!(a.is_dir());
        assert_eq!(a.relative_path, "a");
        assert_eq!(a.path, "/dr/a");
        assert_eq!(a.status, SyncStatus::Synced);
        assert_eq!(a.modified, t(9));

        let c = find_node(&tree, "a/b/c.txt").unwrap();
        assert_eq!(c.path, "/dr/a/b/c.txt");
        assert_eq!(c.status, SyncStatus::Synced);
        assert_eq!(c.size.bytes(), Some(7));
    }

    #[test]
    fn test_add_directory_brings_subtree_and_replaces_existing() {
        let subtree = Node::directory(
            "/primary",
            "docs",
            t(1),
            vec![Node::file("/primary", "docs/x.md", 1u64, t(1))],
        );
        let existing = vec![Node::file("/dr", "docs", 99u64, t(0))];

        let tree = add_node(&existing, "/dr", &subtree);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].kind, NodeKind::Directory);
        let x = find_node(&tree, "docs/x.md").unwrap();
        assert_eq!(x.path, "/dr/docs/x.md");
        assert_eq!(x.status, SyncStatus::Synced);
        // input untouched
        assert_eq!(existing[0].kind, NodeKind::File);
    }

    #[test]
    fn test_remove_drops_subtree_and_ignores_missing() {
        let tree = vec![Node::directory(
            "/dr",
            "old",
            t(0),
            vec![Node::file("/dr", "old/x", 1u64, t(0))],
        )];

        assert!(remove_node(&tree, "old").is_empty());
        assert_eq!(remove_node(&tree, "old/x")[0].children.len(), 0);
        assert_eq!(remove_node(&tree, "missing"), tree);
    }

    #[test]
    fn test_update_copies_metadata_and_payload() {
        let tree = vec![Node::file("/dr", "a.txt", 1u64, t(0))];
        let mut source = Node::file("/primary", "a.txt", 5u64, t(3));
        source.content = Some("hello".to_string());

        let updated = update_node(&tree, "a.txt", &source);

        assert_eq!(updated[0].modified, t(3));
        assert_eq!(updated[0].size.bytes(), Some(5));
        assert_eq!(updated[0].content.as_deref(), Some("hello"));
        assert_eq!(updated[0].status, SyncStatus::Synced);
        assert_eq!(updated[0].path, "/dr/a.txt");
        assert_eq!(tree[0].size.bytes(), Some(1));
    }

    #[test]
    fn test_overwrite_across_kinds_replaces_node() {
        let tree = vec![Node::file("/dr", "cfg", 1u64, t(0))];
        let source = Node::directory("/primary", "cfg", t(2), vec![]);
        let op = SyncOperation::new("cfg", SyncStatus::Different, NodeKind::Directory);

        let result = apply_operation(&tree, "/dr", &op, Some(&source)).unwrap();

        assert!(result[0].is_dir());
        assert_eq!(result[0].path, "/dr/cfg");
    }

    #[test]
    fn test_create_without_source_is_rejected() {
        let op = SyncOperation::new("a.txt", SyncStatus::PrimaryOnly, NodeKind::File);
        assert!(apply_operation(&[], "/dr", &op, None).is_err());
    }
}
