//! Fully local mode: both trees live in memory and operations are applied
//! with the tree mutator

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::mutator::apply_operation;
use crate::node::{find_node, normalize_relative, Node};
use crate::operation::{SyncRequest, SyncResponse, SyncResult};
use crate::provider::TreeProvider;

#[derive(Debug)]
struct MirrorState {
    primary_root: String,
    dr_root: String,
    primary: Vec<Node>,
    dr: Vec<Node>,
}

/// Provider and executor over a pair of in-memory trees.
///
/// Clones share state, so the same mirror can be handed to a session as both
/// its provider and its executor.
#[derive(Debug, Clone)]
pub struct InMemoryMirror {
    state: Arc<RwLock<MirrorState>>,
}

impl InMemoryMirror {
    pub fn new(
        primary_root: impl Into<String>,
        primary: Vec<Node>,
        dr_root: impl Into<String>,
        dr: Vec<Node>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(MirrorState {
                primary_root: primary_root.into(),
                dr_root: dr_root.into(),
                primary,
                dr,
            })),
        }
    }

    pub async fn primary(&self) -> Vec<Node> {
        self.state.read().await.primary.clone()
    }

    pub async fn dr(&self) -> Vec<Node> {
        self.state.read().await.dr.clone()
    }

    pub async fn set_primary(&self, tree: Vec<Node>) {
        self.state.write().await.primary = tree;
    }

    pub async fn set_dr(&self, tree: Vec<Node>) {
        self.state.write().await.dr = tree;
    }
}

fn subtree_at<'a>(tree: &'a [Node], directory: &str) -> Option<&'a [Node]> {
    if directory.is_empty() {
        return Some(tree);
    }
    find_node(tree, directory)
        .filter(|n| n.is_dir())
        .map(|n| n.children.as_slice())
}

#[async_trait]
impl TreeProvider for InMemoryMirror {
    async fn list(&self, root: &str, directory: &str) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        let tree = if root == state.primary_root {
            &state.primary
        } else if root == state.dr_root {
            &state.dr
        } else {
            return Err(SyncError::provider(root, "unknown root"));
        };

        let directory = normalize_relative(directory);
        let level = subtree_at(tree, &directory).ok_or_else(|| {
            SyncError::provider(root, format!("'{}' is not a directory", directory))
        })?;

        Ok(level
            .iter()
            .map(|node| Node {
                children: Vec::new(),
                ..node.clone()
            })
            .collect())
    }
}

#[async_trait]
impl SyncExecutor for InMemoryMirror {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        request.validate()?;

        let mut state = self.state.write().await;
        if request.primary_root != state.primary_root || request.dr_root != state.dr_root {
            return Err(SyncError::transport(format!(
                "mirror serves '{}' -> '{}', not '{}' -> '{}'",
                state.primary_root, state.dr_root, request.primary_root, request.dr_root
            )));
        }

        let mut results = Vec::with_capacity(request.operations.len());
        for op in &request.operations {
            let source = find_node(&state.primary, &op.path).cloned();
            match apply_operation(&state.dr, &state.dr_root, op, source.as_ref()) {
                Ok(tree) => {
                    state.dr = tree;
                    results.push(SyncResult::success(&op.path, format!("{} applied", op.status)));
                }
                Err(e) => {
                    debug!(path = %op.path, "In-memory operation failed: {}", e);
                    results.push(SyncResult::failed(&op.path, e.to_string()));
                }
            }
        }
        Ok(SyncResponse { results })
    }
}
