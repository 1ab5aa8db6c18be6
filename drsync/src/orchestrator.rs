//! Sync session: load, diff, select and drive syncs for one application

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Application;
use crate::diff::{Comparison, DiffEngine, DiffOptions, Difference};
use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::node::{find_node, normalize_relative, SyncStatus};
use crate::operation::{Outcome, SyncCounts, SyncOperation, SyncRequest, SyncResult};
use crate::provider::{load_tree, TreeProvider};
use crate::status_log::StatusLog;

/// Where a path stands from the session's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// Not loaded, or not present in either tree
    Unknown,
    /// Classified as needing action
    Classified(SyncStatus),
    Synced,
}

/// Actionable operations awaiting confirmation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkSyncPlan {
    pub operations: Vec<SyncOperation>,
    pub counts: SyncCounts,
}

impl BulkSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Result for one submitted path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathOutcome {
    pub path: String,
    pub outcome: Outcome,
    pub message: String,
    /// Classification after the post-sync reload; `unknown` when it failed
    pub status_after: SyncStatus,
}

/// Aggregated result of one submitted batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<PathOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn outcome(&self, path: &str) -> Option<&PathOutcome> {
        let wanted = normalize_relative(path);
        self.outcomes.iter().find(|o| o.path == wanted)
    }
}

/// One caller session over an application's primary and DR trees.
///
/// Sync entry points take `&mut self`, so a session never has two batches in
/// flight. Every re-diff runs on trees loaded after the executor answered.
pub struct SyncSession<P, E> {
    app: Application,
    provider: P,
    executor: E,
    engine: DiffEngine,
    log: StatusLog,
    comparison: Option<Comparison>,
    selected: Option<Difference>,
}

impl<P, E> SyncSession<P, E>
where
    P: TreeProvider,
    E: SyncExecutor,
{
    pub fn new(app: Application, provider: P, executor: E, options: DiffOptions) -> Self {
        Self {
            app,
            provider,
            executor,
            engine: DiffEngine::new(options),
            log: StatusLog::new(),
            comparison: None,
            selected: None,
        }
    }

    /// Replace the session log, e.g. with one created by [`StatusLog::with_channel`]
    pub fn with_log(mut self, log: StatusLog) -> Self {
        self.log = log;
        self
    }

    pub fn application(&self) -> &Application {
        &self.app
    }

    pub fn log(&self) -> &StatusLog {
        &self.log
    }

    pub fn comparison(&self) -> Option<&Comparison> {
        self.comparison.as_ref()
    }

    pub fn selected(&self) -> Option<&Difference> {
        self.selected.as_ref()
    }

    /// Load both trees and diff them. A current selection is re-resolved
    /// against the new comparison.
    ///
    /// On failure the previous comparison and selection are dropped, so
    /// nothing is planned from trees that may no longer hold.
    #[instrument(skip(self), fields(app = %self.app.name))]
    pub async fn load(&mut self) -> Result<&Comparison> {
        self.log.info(format!(
            "Loading files from Primary: {} and DR: {} for app: {}",
            self.app.primary_path, self.app.dr_path, self.app.name
        ));

        let trees = async {
            let primary = load_tree(&self.provider, &self.app.primary_path).await?;
            let dr = load_tree(&self.provider, &self.app.dr_path).await?;
            Ok::<_, SyncError>((primary, dr))
        }
        .await;

        let (primary, dr) = match trees {
            Ok(trees) => trees,
            Err(e) => {
                self.log
                    .error(format!("Failed to load files for {}: {}", self.app.name, e));
                self.comparison = None;
                self.selected = None;
                return Err(e);
            }
        };

        let comparison = self.engine.compare(&primary, &dr);
        self.log.info(format!(
            "Comparison complete for {}. Found {} differences.",
            self.app.name,
            comparison.differences.len()
        ));

        let reselect = self.selected.as_ref().map(|d| d.path.clone());
        self.comparison = Some(comparison);
        self.selected = reselect.and_then(|path| self.resolve(&path));

        self.comparison.as_ref().ok_or(SyncError::NotLoaded)
    }

    /// Select a path for display.
    ///
    /// Yields its difference, a synthetic in-sync record when the path is
    /// synced, or nothing when the path is unknown.
    pub fn select(&mut self, path: &str) -> Option<&Difference> {
        self.selected = self.resolve(path);
        self.selected.as_ref()
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    fn resolve(&self, path: &str) -> Option<Difference> {
        let comparison = self.comparison.as_ref()?;
        if let Some(difference) = comparison.difference(path) {
            return Some(difference.clone());
        }

        let primary = find_node(&comparison.primary, path);
        let dr = find_node(&comparison.dr, path);
        let synced = primary
            .or(dr)
            .map(|n| n.status == SyncStatus::Synced)
            .unwrap_or(false);
        if synced {
            Difference::in_sync(path, primary, dr)
        } else {
            None
        }
    }

    pub fn path_state(&self, path: &str) -> PathState {
        let Some(comparison) = self.comparison.as_ref() else {
            return PathState::Unknown;
        };
        match comparison.status_of(path) {
            SyncStatus::Synced => PathState::Synced,
            SyncStatus::Unknown => PathState::Unknown,
            status => PathState::Classified(status),
        }
    }

    /// Sync a single difference, then reload and re-select its path
    #[instrument(skip(self, difference), fields(app = %self.app.name, path = %difference.path))]
    pub async fn sync_one(&mut self, difference: &Difference) -> Result<BatchReport> {
        self.log.info(format!("Syncing {}...", difference.path));

        let operations = vec![SyncOperation::from_difference(difference)];
        let report = self.submit(operations).await?;

        self.selected = self.resolve(&difference.path);
        Ok(report)
    }

    /// Collect every actionable difference with counts for confirmation
    pub fn plan_sync_all(&self) -> Result<BulkSyncPlan> {
        let comparison = self.comparison.as_ref().ok_or(SyncError::NotLoaded)?;
        let operations: Vec<SyncOperation> = comparison
            .actionable()
            .map(SyncOperation::from_difference)
            .collect();
        let counts = SyncCounts::from_operations(&operations);
        debug!(%counts, "Planned sync of all differences");
        Ok(BulkSyncPlan { operations, counts })
    }

    /// Submit a confirmed plan as one batch
    #[instrument(skip(self, plan), fields(app = %self.app.name, operations = plan.operations.len()))]
    pub async fn execute_plan(&mut self, plan: BulkSyncPlan) -> Result<BatchReport> {
        if plan.is_empty() {
            self.log.info("No differences to sync.");
            return Ok(BatchReport::default());
        }

        self.log.info(format!(
            "Starting sync for all different files... ({})",
            plan.counts
        ));
        let total = plan.operations.len();
        let report = self.submit(plan.operations).await?;

        let message = format!(
            "Sync all operation completed for {}. {} items processed.",
            self.app.name, total
        );
        if report.all_succeeded() {
            self.log.success(message);
        } else {
            self.log
                .error(format!("{} {} failed.", message, report.failed));
        }
        Ok(report)
    }

    /// Plan, ask `confirm` with the counts, and execute when it agrees.
    ///
    /// Returns `None` when nothing is actionable or the caller declined.
    pub async fn sync_all<F>(&mut self, confirm: F) -> Result<Option<BatchReport>>
    where
        F: FnOnce(&SyncCounts) -> bool,
    {
        let plan = self.plan_sync_all()?;
        if plan.is_empty() {
            self.log.info("No differences to sync.");
            return Ok(None);
        }
        if !confirm(&plan.counts) {
            self.log.info("Sync all cancelled.");
            return Ok(None);
        }
        self.execute_plan(plan).await.map(Some)
    }

    async fn submit(&mut self, operations: Vec<SyncOperation>) -> Result<BatchReport> {
        let request = match SyncRequest::new(
            self.app.primary_path.clone(),
            self.app.dr_path.clone(),
            operations,
        ) {
            Ok(request) => request,
            Err(e) => {
                self.log.error(format!("Sync rejected: {}", e));
                return Err(e);
            }
        };

        let response = match self.executor.execute(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.log.error(format!(
                    "Sync failed for {} item(s): {}",
                    request.operations.len(),
                    e
                ));
                return Err(e);
            }
        };

        let mut results = response.results;
        let mut pending = Vec::with_capacity(request.operations.len());
        for op in &request.operations {
            let path = normalize_relative(&op.path);
            let result = match results
                .iter()
                .position(|r| normalize_relative(&r.path) == path)
            {
                Some(index) => results.remove(index),
                None => SyncResult::failed(&path, "No result reported by executor"),
            };

            if result.is_success() {
                self.log.success(format!("Successfully synced {}", path));
            } else {
                self.log
                    .error(format!("Failed to sync {}: {}", path, result.message));
            }
            pending.push((path, result));
        }
        if !results.is_empty() {
            debug!(extra = results.len(), "Executor reported results for unrequested paths");
        }

        // A failed reload still reports outcomes, with unknown post-sync status.
        if self.load().await.is_err() {
            debug!("Reload after sync failed, post-sync statuses unknown");
        }
        let comparison = self.comparison.as_ref();

        let mut report = BatchReport::default();
        for (path, result) in pending {
            if result.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            // Gone from both trees means nothing is left to reconcile.
            let status_after = match comparison.map(|c| c.status_of(&path)) {
                Some(SyncStatus::Unknown) => SyncStatus::Synced,
                Some(status) => status,
                None => SyncStatus::Unknown,
            };
            report.outcomes.push(PathOutcome {
                status_after,
                path,
                outcome: result.status,
                message: result.message,
            });
        }
        Ok(report)
    }
}
