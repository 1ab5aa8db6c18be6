//! Operations sent to a sync executor and the results it reports

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diff::Difference;
use crate::error::{Result, SyncError};
use crate::node::{normalize_relative, NodeKind, SyncStatus};

const MAX_ROOT_LEN: usize = 4096;

/// What an executor does for an operation, derived from its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    /// `primary_only`: create on DR
    Create,
    /// `dr_only`: delete from DR
    Delete,
    /// `different`: overwrite DR with primary's version
    Overwrite,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Create => write!(f, "Create"),
            SyncAction::Delete => write!(f, "Delete"),
            SyncAction::Overwrite => write!(f, "Overwrite"),
        }
    }
}

/// One unit of work for the executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOperation {
    pub path: String,
    pub status: SyncStatus,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

impl SyncOperation {
    pub fn new(path: impl Into<String>, status: SyncStatus, kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            status,
            kind,
        }
    }

    pub fn from_difference(difference: &Difference) -> Self {
        Self::new(difference.path.clone(), difference.status, difference.kind)
    }

    /// Action implied by the status; `None` for statuses nothing can act on
    pub fn action(&self) -> Option<SyncAction> {
        match self.status {
            SyncStatus::PrimaryOnly => Some(SyncAction::Create),
            SyncStatus::DrOnly => Some(SyncAction::Delete),
            SyncStatus::Different => Some(SyncAction::Overwrite),
            SyncStatus::Synced | SyncStatus::Unknown => None,
        }
    }

    /// Reject operations an executor must never see
    pub fn validate(&self) -> Result<()> {
        if normalize_relative(&self.path).is_empty() {
            return Err(SyncError::validation("operation is missing a relative path"));
        }
        if self.action().is_none() {
            return Err(SyncError::validation(format!(
                "operation for '{}' has non-actionable status '{}'",
                self.path, self.status
            )));
        }
        if has_parent_segment(&self.path) {
            return Err(SyncError::validation(format!(
                "operation path '{}' escapes the tree root",
                self.path
            )));
        }
        Ok(())
    }
}

fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "..")
}

/// Validate a tree root handed to a provider or executor
pub fn validate_root(root: &str) -> Result<()> {
    if root.trim().is_empty() {
        return Err(SyncError::validation("root path is empty"));
    }
    if root.len() > MAX_ROOT_LEN {
        return Err(SyncError::validation(format!(
            "root path exceeds {} bytes",
            MAX_ROOT_LEN
        )));
    }
    if has_parent_segment(root) {
        return Err(SyncError::validation(format!(
            "root path '{}' is not allowed",
            root
        )));
    }
    Ok(())
}

/// Request body sent to an executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub primary_root: String,
    pub dr_root: String,
    pub operations: Vec<SyncOperation>,
}

impl SyncRequest {
    /// Build a request, validating the roots and every operation
    pub fn new(
        primary_root: impl Into<String>,
        dr_root: impl Into<String>,
        operations: Vec<SyncOperation>,
    ) -> Result<Self> {
        let request = Self {
            primary_root: primary_root.into(),
            dr_root: dr_root.into(),
            operations,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        validate_root(&self.primary_root)?;
        validate_root(&self.dr_root)?;
        if self.operations.is_empty() {
            return Err(SyncError::validation("no operations to submit"));
        }
        for operation in &self.operations {
            operation.validate()?;
        }
        Ok(())
    }
}

/// Per-operation outcome reported by an executor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub path: String,
    pub status: Outcome,
    #[serde(default)]
    pub message: String,
}

impl SyncResult {
    pub fn success(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: Outcome::Success,
            message: message.into(),
        }
    }

    pub fn failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: Outcome::Failed,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Outcome::Success
    }
}

/// Response body returned by an executor
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncResponse {
    pub results: Vec<SyncResult>,
}

impl<'de> Deserialize<'de> for SyncResponse {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Body {
            Wrapped { results: Vec<SyncResult> },
            Bare(Vec<SyncResult>),
        }

        Ok(match Body::deserialize(deserializer)? {
            Body::Wrapped { results } | Body::Bare(results) => SyncResponse { results },
        })
    }
}

/// Item counts shown before a bulk sync is confirmed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub to_add: usize,
    pub to_update: usize,
    pub to_remove: usize,
}

impl SyncCounts {
    pub fn from_differences<'a>(differences: impl IntoIterator<Item = &'a Difference>) -> Self {
        Self::from_statuses(differences.into_iter().map(|d| d.status))
    }

    pub fn from_operations<'a>(operations: impl IntoIterator<Item = &'a SyncOperation>) -> Self {
        Self::from_statuses(operations.into_iter().map(|op| op.status))
    }

    fn from_statuses(statuses: impl Iterator<Item = SyncStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                SyncStatus::PrimaryOnly => counts.to_add += 1,
                SyncStatus::Different => counts.to_update += 1,
                SyncStatus::DrOnly => counts.to_remove += 1,
                SyncStatus::Synced | SyncStatus::Unknown => {}
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.to_add + self.to_update + self.to_remove
    }
}

impl fmt::Display for SyncCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to update, {} to remove",
            self.to_add, self.to_update, self.to_remove
        )
    }
}
