//! DR Sync Library
//!
//! Reconciles a primary directory tree with its disaster-recovery mirror:
//! - Tree model and per-path indexing
//! - Differ classifying every relative path across both trees
//! - In-memory tree mutation for local simulation
//! - Sync sessions driving single and bulk syncs through an executor
//! - Append-only status log mirrored to `tracing`
//! - Providers and executors for local paths or external scripts

pub mod node;
pub mod index;
pub mod diff;
pub mod mutator;
pub mod operation;
pub mod wire;
pub mod process;
pub mod provider;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod status_log;
pub mod config;
pub mod error;

// Re-export main types and functions
pub use node::{format_bytes, Node, NodeKind, NodeSize, SyncStatus};
pub use index::{index_tree, TreeIndex};
pub use diff::{compare_trees, Comparison, DiffEngine, DiffOptions, Difference, DrNewerPolicy};
pub use mutator::{add_node, apply_operation, remove_node, update_node};
pub use operation::{
    Outcome, SyncAction, SyncCounts, SyncOperation, SyncRequest, SyncResponse, SyncResult,
};
pub use provider::{expand_directory, load_tree, CommandProvider, LocalFsProvider, TreeProvider};
pub use executor::{CommandExecutor, LocalFsExecutor, SyncExecutor};
pub use memory::InMemoryMirror;
pub use orchestrator::{BatchReport, BulkSyncPlan, PathOutcome, PathState, SyncSession};
pub use status_log::{LogChannel, LogEntry, Severity, StatusLog};
pub use config::{Application, DrSyncConfig};
pub use error::{Result, SyncError};

#[cfg(test)]
mod orchestrator_tests;
