//! Tests for sync sessions over in-memory trees

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::Application;
use crate::diff::{DiffOptions, Difference};
use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::memory::InMemoryMirror;
use crate::node::{Node, NodeKind, SyncStatus};
use crate::operation::{Outcome, SyncCounts, SyncRequest, SyncResponse, SyncResult};
use crate::orchestrator::{PathState, SyncSession};
use crate::provider::TreeProvider;
use crate::status_log::{Severity, StatusLog};

fn t(offset_hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + Duration::hours(offset_hours)
}

fn app() -> Application {
    Application::new("payroll", "/srv/primary", "/srv/dr")
}

/// Primary adds `add.txt`, updates `upd.txt`; DR still has `del.txt`; `same.txt` is in sync
fn mirror() -> InMemoryMirror {
    InMemoryMirror::new(
        "/srv/primary",
        vec![
            Node::file("/srv/primary", "add.txt", 3u64, t(1)),
            Node::file("/srv/primary", "same.txt", 7u64, t(0)),
            Node::file("/srv/primary", "upd.txt", 5u64, t(2)),
        ],
        "/srv/dr",
        vec![
            Node::file("/srv/dr", "del.txt", 1u64, t(0)),
            Node::file("/srv/dr", "same.txt", 7u64, t(0)),
            Node::file("/srv/dr", "upd.txt", 5u64, t(0)),
        ],
    )
}

fn session(mirror: &InMemoryMirror) -> SyncSession<InMemoryMirror, InMemoryMirror> {
    SyncSession::new(app(), mirror.clone(), mirror.clone(), DiffOptions::default())
}

/// Counts calls and delegates to the mirror
struct CountingExecutor {
    inner: InMemoryMirror,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SyncExecutor for CountingExecutor {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(request).await
    }
}

/// Reports `failed` for the listed paths without applying them
struct FlakyExecutor {
    inner: InMemoryMirror,
    failing: HashSet<String>,
}

#[async_trait]
impl SyncExecutor for FlakyExecutor {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let (failing, passing): (Vec<_>, Vec<_>) = request
            .operations
            .iter()
            .cloned()
            .partition(|op| self.failing.contains(&op.path));

        let mut results: Vec<SyncResult> = failing
            .iter()
            .map(|op| SyncResult::failed(&op.path, "Access is denied."))
            .collect();
        if !passing.is_empty() {
            let forwarded = SyncRequest::new(&request.primary_root, &request.dr_root, passing)?;
            results.extend(self.inner.execute(&forwarded).await?.results);
        }
        Ok(SyncResponse { results })
    }
}

/// Fails the whole batch
struct DownExecutor;

#[async_trait]
impl SyncExecutor for DownExecutor {
    async fn execute(&self, _request: &SyncRequest) -> Result<SyncResponse> {
        Err(SyncError::transport("'pwsh' exited with 1: remote host unreachable"))
    }
}

/// Lists through the mirror until the share goes offline
struct OfflineProvider {
    inner: InMemoryMirror,
    offline: Arc<AtomicBool>,
}

#[async_trait]
impl TreeProvider for OfflineProvider {
    async fn list(&self, root: &str, directory: &str) -> Result<Vec<Node>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::provider(root, "share offline"));
        }
        self.inner.list(root, directory).await
    }
}

/// Applies the batch, then takes the share offline
struct DisconnectingExecutor {
    inner: InMemoryMirror,
    offline: Arc<AtomicBool>,
}

#[async_trait]
impl SyncExecutor for DisconnectingExecutor {
    async fn execute(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let response = self.inner.execute(request).await?;
        self.offline.store(true, Ordering::SeqCst);
        Ok(response)
    }
}

/// Answers with no results at all
struct SilentExecutor;

#[async_trait]
impl SyncExecutor for SilentExecutor {
    async fn execute(&self, _request: &SyncRequest) -> Result<SyncResponse> {
        Ok(SyncResponse::default())
    }
}

fn loading_entries(log: &StatusLog) -> usize {
    log.entries()
        .iter()
        .filter(|e| e.message.starts_with("Loading files"))
        .count()
}

mod load_and_select_tests {
    use super::*;

    #[tokio::test]
    async fn test_load_classifies_and_logs() {
        let mirror = mirror();
        let mut session = session(&mirror);
        assert_eq!(session.path_state("add.txt"), PathState::Unknown);

        let comparison = session.load().await.unwrap();
        assert_eq!(comparison.differences.len(), 3);

        assert_eq!(
            session.path_state("add.txt"),
            PathState::Classified(SyncStatus::PrimaryOnly)
        );
        assert_eq!(
            session.path_state("upd.txt"),
            PathState::Classified(SyncStatus::Different)
        );
        assert_eq!(
            session.path_state("del.txt"),
            PathState::Classified(SyncStatus::DrOnly)
        );
        assert_eq!(session.path_state("same.txt"), PathState::Synced);
        assert_eq!(session.path_state("nowhere.txt"), PathState::Unknown);

        let messages: Vec<&str> = session
            .log()
            .entries()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(
            messages,
            vec![
                "Loading files from Primary: /srv/primary and DR: /srv/dr for app: payroll",
                "Comparison complete for payroll. Found 3 differences.",
            ]
        );
    }

    #[tokio::test]
    async fn test_select_in_sync_path_yields_synthetic_difference() {
        let mirror = mirror();
        let mut session = session(&mirror);
        session.load().await.unwrap();

        let selected = session.select("same.txt").unwrap();
        assert_eq!(selected.status, SyncStatus::Synced);
        assert_eq!(selected.summary, "Files are in sync.");
        assert!(selected.primary.is_some() && selected.dr.is_some());

        assert_eq!(
            session.select("upd.txt").map(|d| d.status),
            Some(SyncStatus::Different)
        );
        assert!(session.select("nowhere.txt").is_none());
        assert!(session.selected().is_none());
    }

    #[tokio::test]
    async fn test_plan_requires_loaded_comparison() {
        let mirror = mirror();
        let session = session(&mirror);
        assert!(matches!(session.plan_sync_all(), Err(SyncError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_log_channel_sees_session_entries() {
        let mirror = mirror();
        let (log, mut channel) = StatusLog::with_channel();
        let mut session = session(&mirror).with_log(log);

        session.load().await.unwrap();

        let first = channel.try_recv().unwrap();
        assert!(first.message.starts_with("Loading files"));
        assert_eq!(first.severity, Severity::Info);
        assert!(channel.try_recv().is_some());
    }
}

mod sync_tests {
    use super::*;

    #[tokio::test]
    async fn test_confirmation_counts() {
        let mirror = mirror();
        let mut session = session(&mirror);
        session.load().await.unwrap();

        let plan = session.plan_sync_all().unwrap();
        assert_eq!(
            plan.counts,
            SyncCounts {
                to_add: 1,
                to_update: 1,
                to_remove: 1
            }
        );

        let mut seen = None;
        let report = session
            .sync_all(|counts| {
                seen = Some(*counts);
                false
            })
            .await
            .unwrap();
        assert!(report.is_none());
        assert_eq!(seen, Some(plan.counts));
        assert_eq!(session.comparison().unwrap().differences.len(), 3);
    }

    #[tokio::test]
    async fn test_round_trip_leaves_everything_synced() {
        let mirror = mirror();
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = CountingExecutor {
            inner: mirror.clone(),
            calls: calls.clone(),
        };
        let mut session = SyncSession::new(app(), mirror.clone(), executor, DiffOptions::default());
        session.load().await.unwrap();

        let report = session.sync_all(|_| true).await.unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!((report.succeeded, report.failed), (3, 0));
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.outcome == Outcome::Success && o.status_after == SyncStatus::Synced));
        assert!(session.comparison().unwrap().differences.is_empty());
        assert_eq!(session.path_state("add.txt"), PathState::Synced);
        assert_eq!(session.path_state("upd.txt"), PathState::Synced);
        assert_eq!(session.path_state("del.txt"), PathState::Unknown);
        assert_eq!(loading_entries(session.log()), 2);

        let last = session.log().entries().last().unwrap();
        assert_eq!(last.severity, Severity::Success);
        assert_eq!(
            last.message,
            "Sync all operation completed for payroll. 3 items processed."
        );
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let mirror = mirror();
        let executor = FlakyExecutor {
            inner: mirror.clone(),
            failing: ["upd.txt".to_string()].into_iter().collect(),
        };
        let mut session = SyncSession::new(app(), mirror.clone(), executor, DiffOptions::default());
        session.load().await.unwrap();

        let report = session.sync_all(|_| true).await.unwrap().unwrap();

        assert_eq!((report.succeeded, report.failed), (2, 1));
        let failed = report.outcome("upd.txt").unwrap();
        assert_eq!(failed.outcome, Outcome::Failed);
        assert_eq!(failed.message, "Access is denied.");
        assert_eq!(failed.status_after, SyncStatus::Different);

        let remaining: Vec<&str> = session
            .comparison()
            .unwrap()
            .differences
            .iter()
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(remaining, vec!["upd.txt"]);

        let errors: Vec<&str> = session.log().errors().map(|e| e.message.as_str()).collect();
        assert_eq!(
            errors,
            vec![
                "Failed to sync upd.txt: Access is denied.",
                "Sync all operation completed for payroll. 3 items processed. 1 failed.",
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_one_reselects_path() {
        let mirror = mirror();
        let mut session = session(&mirror);
        session.load().await.unwrap();

        let difference = session.select("upd.txt").cloned().unwrap();
        let report = session.sync_one(&difference).await.unwrap();

        assert!(report.all_succeeded());
        let selected = session.selected().unwrap();
        assert_eq!(selected.path, "upd.txt");
        assert_eq!(selected.status, SyncStatus::Synced);
        assert_eq!(selected.summary, "Files are in sync.");

        let messages: Vec<&str> = session
            .log()
            .entries()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert!(messages.contains(&"Syncing upd.txt..."));
        assert!(messages.contains(&"Successfully synced upd.txt"));
        assert_eq!(session.comparison().unwrap().differences.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_one_deleted_path_is_no_longer_selected() {
        let mirror = mirror();
        let mut session = session(&mirror);
        session.load().await.unwrap();

        let difference = session.select("del.txt").cloned().unwrap();
        session.sync_one(&difference).await.unwrap();

        assert!(session.selected().is_none());
    }

    #[tokio::test]
    async fn test_directory_subtree_is_created() {
        let mirror = InMemoryMirror::new(
            "/srv/primary",
            vec![Node::directory(
                "/srv/primary",
                "docs",
                t(0),
                vec![
                    Node::file("/srv/primary", "docs/a.md", 1u64, t(0)),
                    Node::directory("/srv/primary", "docs/img", t(0), vec![]),
                ],
            )],
            "/srv/dr",
            vec![],
        );
        let mut session = session(&mirror);
        session.load().await.unwrap();
        assert_eq!(session.plan_sync_all().unwrap().counts.to_add, 3);

        let report = session.sync_all(|_| true).await.unwrap().unwrap();

        assert!(report.all_succeeded());
        assert!(session.comparison().unwrap().differences.is_empty());
        assert_eq!(mirror.dr().await[0].path, "/srv/dr/docs");
    }

    #[tokio::test]
    async fn test_nothing_to_sync() {
        let mirror = InMemoryMirror::new("/srv/primary", vec![], "/srv/dr", vec![]);
        let mut session = session(&mirror);
        session.load().await.unwrap();

        assert!(session.sync_all(|_| panic!("no confirmation expected")).await.unwrap().is_none());
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_validation_failure_makes_no_call() {
        let mirror = mirror();
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = CountingExecutor {
            inner: mirror.clone(),
            calls: calls.clone(),
        };
        let mut session = SyncSession::new(app(), mirror.clone(), executor, DiffOptions::default());
        session.load().await.unwrap();

        let in_sync = session.select("same.txt").cloned().unwrap();
        let err = session.sync_one(&in_sync).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let escaping = Difference {
            path: "../outside.txt".to_string(),
            name: "outside.txt".to_string(),
            kind: NodeKind::File,
            status: SyncStatus::PrimaryOnly,
            primary: None,
            dr: None,
            summary: String::new(),
        };
        assert!(matches!(
            session.sync_one(&escaping).await,
            Err(SyncError::Validation(_))
        ));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.log().errors().count(), 2);
        assert_eq!(loading_entries(session.log()), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_skips_reload() {
        let mirror = mirror();
        let mut session = SyncSession::new(app(), mirror.clone(), DownExecutor, DiffOptions::default());
        session.load().await.unwrap();

        let err = session.sync_all(|_| true).await.unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(loading_entries(session.log()), 1);
        assert_eq!(session.log().errors().count(), 1);
        assert_eq!(
            session.path_state("upd.txt"),
            PathState::Classified(SyncStatus::Different)
        );
        assert_eq!(mirror.dr().await.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_result_counts_as_failure() {
        let mirror = mirror();
        let mut session = SyncSession::new(app(), mirror.clone(), SilentExecutor, DiffOptions::default());
        session.load().await.unwrap();

        let difference = session.select("add.txt").cloned().unwrap();
        let report = session.sync_one(&difference).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.outcomes[0].message, "No result reported by executor");
        assert_eq!(report.outcomes[0].status_after, SyncStatus::PrimaryOnly);
    }

    #[tokio::test]
    async fn test_provider_failure_is_logged() {
        let mirror = mirror();
        let mut session = SyncSession::new(
            Application::new("payroll", "/srv/elsewhere", "/srv/dr"),
            mirror.clone(),
            mirror.clone(),
            DiffOptions::default(),
        );

        assert!(matches!(session.load().await, Err(SyncError::Provider { .. })));
        assert!(session.comparison().is_none());
        assert_eq!(session.log().errors().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_drops_stale_comparison() {
        let mirror = mirror();
        let offline = Arc::new(AtomicBool::new(false));
        let provider = OfflineProvider {
            inner: mirror.clone(),
            offline: offline.clone(),
        };
        let executor = DisconnectingExecutor {
            inner: mirror.clone(),
            offline: offline.clone(),
        };
        let mut session = SyncSession::new(app(), provider, executor, DiffOptions::default());
        session.load().await.unwrap();
        session.select("add.txt");

        let report = session.sync_all(|_| true).await.unwrap().unwrap();

        assert_eq!(report.succeeded, 3);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status_after == SyncStatus::Unknown));
        assert_eq!(mirror.dr().await.len(), 3);

        assert!(session.comparison().is_none());
        assert!(session.selected().is_none());
        assert_eq!(session.path_state("add.txt"), PathState::Unknown);
        assert!(matches!(session.plan_sync_all(), Err(SyncError::NotLoaded)));
        assert!(session
            .log()
            .errors()
            .any(|e| e.message.starts_with("Failed to load files for payroll")));
    }
}
