//! Sync executors: what applies a batch of operations to the DR tree

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::node::normalize_relative;
use crate::operation::{SyncAction, SyncOperation, SyncRequest, SyncResponse, SyncResult};
use crate::process::{run_json, CommandOutcome, CommandSpec};

/// Applies a validated batch of operations and reports a result per operation.
///
/// `Err` means the batch as a whole could not be delivered or its response
/// was unusable; per-operation failures are `failed` results inside `Ok`.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse>;
}

#[async_trait]
impl<T: SyncExecutor + ?Sized> SyncExecutor for Box<T> {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        (**self).execute(request).await
    }
}

/// Executor backed by an external program.
///
/// Invoked as `<program> <args..> --primary-root <p> --dr-root <d> --operations <json>`;
/// stdout must be a JSON results document.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, request: &SyncRequest) -> Result<CommandSpec> {
        let operations = serde_json::to_string(&request.operations)?;
        Ok(CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .args([
                "--primary-root",
                request.primary_root.as_str(),
                "--dr-root",
                request.dr_root.as_str(),
                "--operations",
            ])
            .arg(operations))
    }
}

#[async_trait]
impl SyncExecutor for CommandExecutor {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        request.validate()?;
        let spec = self.command(request)?;

        match run_json::<SyncResponse>(&spec).await {
            CommandOutcome::Success(response) => Ok(response),
            CommandOutcome::ProcessError(message) => Err(SyncError::transport(message)),
            CommandOutcome::ParseError { raw, message } => Err(SyncError::transport(format!(
                "unreadable executor output: {} (output: {})",
                message, raw
            ))),
        }
    }
}

/// Options for the local filesystem executor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalFsExecutorOptions {
    /// Report what would happen without touching the DR tree
    #[serde(default)]
    pub dry_run: bool,
}

/// Executor for a DR tree reachable as a local path
#[derive(Debug, Clone, Default)]
pub struct LocalFsExecutor {
    options: LocalFsExecutorOptions,
}

impl LocalFsExecutor {
    pub fn new(options: LocalFsExecutorOptions) -> Self {
        Self { options }
    }

    async fn apply(&self, primary_root: &Path, dr_root: &Path, op: &SyncOperation) -> Result<String> {
        let relative = normalize_relative(&op.path);
        let source = primary_root.join(&relative);
        let destination = dr_root.join(&relative);

        let action = op
            .action()
            .ok_or_else(|| SyncError::validation(format!("nothing to do for '{}'", op.path)))?;

        if self.options.dry_run {
            return Ok(format!("DRY RUN: would {} '{}'", action.to_string().to_lowercase(), relative));
        }

        match action {
            SyncAction::Delete => {
                if fs::symlink_metadata(&destination).await.is_err() {
                    return Ok("Already absent on DR".to_string());
                }
                self.delete_path(&destination).await?;
                Ok("Deleted from DR".to_string())
            }
            SyncAction::Create => {
                self.copy_path(&source, &destination).await?;
                Ok("Copied to DR".to_string())
            }
            SyncAction::Overwrite => {
                let source_is_dir = fs::metadata(&source)
                    .await
                    .map_err(|e| SyncError::path_error(&source, format!("Failed to read metadata: {}", e)))?
                    .is_dir();
                if let Ok(existing) = fs::symlink_metadata(&destination).await {
                    if existing.is_dir() != source_is_dir {
                        self.delete_path(&destination).await?;
                    }
                }
                self.copy_path(&source, &destination).await?;
                Ok("Overwrote DR copy".to_string())
            }
        }
    }

    async fn copy_path(&self, source: &Path, destination: &Path) -> Result<()> {
        let metadata = fs::metadata(source)
            .await
            .map_err(|e| SyncError::path_error(source, format!("Source not readable: {}", e)))?;

        if !metadata.is_dir() {
            return self.copy_file(source, destination).await;
        }

        self.create_directory(destination).await?;
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry
                .map_err(|e| SyncError::path_error(source, format!("Walk error: {}", e)))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| SyncError::path_error(entry.path(), e.to_string()))?;
            let target = destination.join(relative);
            if entry.file_type().is_dir() {
                self.create_directory(&target).await?;
            } else {
                self.copy_file(entry.path(), &target).await?;
            }
        }
        preserve_mtime(&metadata, destination);
        Ok(())
    }

    /// Copy a file from source to destination
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::path_error(parent, format!("Failed to create parent directory: {}", e))
            })?;
        }

        fs::copy(source, destination).await.map_err(|e| {
            SyncError::path_error(destination, format!("Failed to copy file: {}", e))
        })?;

        if let Ok(metadata) = fs::metadata(source).await {
            preserve_mtime(&metadata, destination);
        }
        Ok(())
    }

    /// Delete a file or directory
    async fn delete_path(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path).await.map_err(|e| {
                SyncError::path_error(path, format!("Failed to delete directory: {}", e))
            })
        } else {
            fs::remove_file(path).await.map_err(|e| {
                SyncError::path_error(path, format!("Failed to delete file: {}", e))
            })
        }
    }

    /// Create a directory
    async fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| {
            SyncError::path_error(path, format!("Failed to create directory: {}", e))
        })
    }
}

fn preserve_mtime(metadata: &std::fs::Metadata, destination: &Path) {
    let mtime = FileTime::from_last_modification_time(metadata);
    if let Err(e) = filetime::set_file_mtime(destination, mtime) {
        warn!("Failed to preserve mtime for '{}': {}", destination.display(), e);
    }
}

#[async_trait]
impl SyncExecutor for LocalFsExecutor {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        request.validate()?;

        let primary_root = PathBuf::from(&request.primary_root);
        let dr_root = PathBuf::from(&request.dr_root);
        if !primary_root.is_dir() {
            return Err(SyncError::transport(format!(
                "primary root '{}' is not reachable",
                request.primary_root
            )));
        }
        if !dr_root.is_dir() {
            return Err(SyncError::transport(format!(
                "DR root '{}' is not reachable",
                request.dr_root
            )));
        }

        let mut results = Vec::with_capacity(request.operations.len());
        for op in &request.operations {
            let result = match self.apply(&primary_root, &dr_root, op).await {
                Ok(message) => {
                    debug!(path = %op.path, "{}", message);
                    SyncResult::success(&op.path, message)
                }
                Err(e) => {
                    warn!(path = %op.path, "Operation failed: {}", e);
                    SyncResult::failed(&op.path, e.to_string())
                }
            };
            results.push(result);
        }

        info!(
            operations = results.len(),
            failed = results.iter().filter(|r| !r.is_success()).count(),
            dry_run = self.options.dry_run,
            "Local batch applied"
        );
        Ok(SyncResponse { results })
    }
}
