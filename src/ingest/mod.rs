//! Ingestion runs: synchronize, extract, score and persist every project,
//! then hand the still unreviewed commits to the view.
//!
//! A run executes off the presentation thread. Everything it produces reaches
//! the view as `IngestEvent`s over one channel, in send order.

use crate::git::{self, ExtractError, LocalHandle, SyncError, SyncOutcome};
use crate::score::Scorer;
use crate::store::{Store, StoreError};
use crate::{Commit, NumStat, Project};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{info, warn};

/// Why one project's pipeline stopped. The run carries on with the others.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Repository operations the orchestrator drives.
pub trait RepoBackend: Send + Sync {
    fn mirror_exists(&self, project: &Project) -> bool;

    fn ensure_current(&self, project: &Project) -> Result<LocalHandle, SyncError>;

    fn extract_since(
        &self,
        handle: &LocalHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, ExtractError>;

    fn parent_count(&self, handle: &LocalHandle, hash: &str) -> Result<usize, ExtractError>;

    fn numstat(&self, handle: &LocalHandle, hash: &str) -> Result<Vec<NumStat>, ExtractError>;
}

/// Mirrors under a code folder, driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitBackend {
    root: PathBuf,
}

impl GitBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RepoBackend for GitBackend {
    fn mirror_exists(&self, project: &Project) -> bool {
        git::mirror_path(&self.root, project).exists()
    }

    fn ensure_current(&self, project: &Project) -> Result<LocalHandle, SyncError> {
        git::ensure_current(&self.root, project)
    }

    fn extract_since(
        &self,
        handle: &LocalHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, ExtractError> {
        git::extract_since(handle, since)
    }

    fn parent_count(&self, handle: &LocalHandle, hash: &str) -> Result<usize, ExtractError> {
        git::parent_count(handle, hash)
    }

    fn numstat(&self, handle: &LocalHandle, hash: &str) -> Result<Vec<NumStat>, ExtractError> {
        git::numstat(handle, hash)
    }
}

/// Pipeline stage of a project within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Cloning,
    Pulling,
    Extracting,
    Scoring,
    Persisting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Cloning => "Cloning new repo (this may take a while)",
            Phase::Pulling => "Pulling repo",
            Phase::Extracting => "Extracting commits",
            Phase::Scoring => "Scoring commits",
            Phase::Persisting => "Storing commits",
        };
        f.write_str(label)
    }
}

/// Messages from an ingestion run to the presentation loop.
#[derive(Debug)]
pub enum IngestEvent {
    Progress { project: String, phase: Phase },
    ProjectFailed { project: String, message: String },
    /// Extracted commits of all projects that are still unreviewed, including
    /// ones stored by an earlier run.
    Commits(Vec<Commit>),
    Finished(RunSummary),
}

/// Totals of a run, for status display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: Vec<String>,
    /// Commits stored for the first time.
    pub new_commits: usize,
}

/// What one project's pipeline achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStats {
    pub outcome: SyncOutcome,
    pub extracted: usize,
    pub inserted: usize,
    pub cursor: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ProjectReport {
    pub project: String,
    pub result: Result<ProjectStats, IngestError>,
}

/// Outcome of a whole run. Reports are ordered by project name.
#[derive(Debug, Default)]
pub struct RunReport {
    pub projects: Vec<ProjectReport>,
    /// What the view needs from this run.
    pub unreviewed: Vec<Commit>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in &self.projects {
            match &report.result {
                Ok(stats) => {
                    summary.succeeded += 1;
                    summary.new_commits += stats.inserted;
                }
                Err(_) => summary.failed.push(report.project.clone()),
            }
        }
        summary
    }
}

/// Coordinates ingestion runs over a fixed set of projects.
pub struct Orchestrator<B> {
    store: Arc<Store>,
    backend: B,
    scorer: Scorer,
    projects: Vec<Project>,
    lookback: Duration,
    workers: usize,
}

impl<B: RepoBackend> Orchestrator<B> {
    pub fn new(store: Arc<Store>, backend: B, scorer: Scorer, mut projects: Vec<Project>) -> Self {
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            store,
            backend,
            scorer,
            projects,
            lookback: Duration::days(60),
            workers: 1,
        }
    }

    /// Window used for projects without a cursor.
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Maximum number of projects processed at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Run every project's pipeline once.
    ///
    /// A failing project is reported and skipped; it never stops the others.
    /// Once all projects are done, the extracted commits that are still
    /// unreviewed are sent as one `IngestEvent::Commits`, followed by
    /// `IngestEvent::Finished`.
    pub fn run(&self, events: &Sender<IngestEvent>) -> RunReport {
        let workers = self.workers.min(self.projects.len()).max(1);
        info!(projects = self.projects.len(), workers, "ingestion run started");

        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, ProjectReport, Vec<Commit>)>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let events = events.clone();
                let next = &next;
                let results = &results;
                scope.spawn(move || {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(project) = self.projects.get(index) else {
                            break;
                        };
                        let (report, commits) = self.ingest_project(project, &events);
                        if let Ok(mut results) = results.lock() {
                            results.push((index, report, commits));
                        }
                    }
                });
            }
        });

        let mut results = results.into_inner().unwrap_or_else(|e| e.into_inner());
        results.sort_by_key(|(index, _, _)| *index);

        let mut report = RunReport::default();
        for (_, project_report, commits) in results {
            report.projects.push(project_report);
            report.unreviewed.extend(commits);
        }

        let summary = report.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            new_commits = summary.new_commits,
            "ingestion run finished"
        );
        let _ = events.send(IngestEvent::Commits(report.unreviewed.clone()));
        let _ = events.send(IngestEvent::Finished(summary));
        report
    }

    fn ingest_project(
        &self,
        project: &Project,
        events: &Sender<IngestEvent>,
    ) -> (ProjectReport, Vec<Commit>) {
        let (result, commits) = match self.pipeline(project, events) {
            Ok((stats, commits)) => (Ok(stats), commits),
            Err(e) => {
                warn!(project = %project.name, error = %e, "project skipped");
                let _ = events.send(IngestEvent::ProjectFailed {
                    project: project.name.clone(),
                    message: e.to_string(),
                });
                (Err(e), Vec::new())
            }
        };
        (
            ProjectReport {
                project: project.name.clone(),
                result,
            },
            commits,
        )
    }

    /// Sync, extract, score, persist, then advance the cursor. Any error
    /// returns before the cursor moves.
    fn pipeline(
        &self,
        project: &Project,
        events: &Sender<IngestEvent>,
    ) -> Result<(ProjectStats, Vec<Commit>), IngestError> {
        let progress = |phase| {
            let _ = events.send(IngestEvent::Progress {
                project: project.name.clone(),
                phase,
            });
        };

        let stored = self.store.get_fetch_state(&project.name)?;
        let since = stored.unwrap_or_else(|| Utc::now() - self.lookback);

        progress(if self.backend.mirror_exists(project) {
            Phase::Pulling
        } else {
            Phase::Cloning
        });
        let handle = self.backend.ensure_current(project)?;

        progress(Phase::Extracting);
        let mut commits = self.backend.extract_since(&handle, Some(since))?;
        let extracted = commits.len();

        progress(Phase::Scoring);
        for commit in &mut commits {
            commit.slat_score = self.score(&handle, &commit.hash)?;
        }

        let cursor = commits
            .iter()
            .map(|c| c.commit_time)
            .fold(since, |a, b| a.max(b));

        progress(Phase::Persisting);
        let batch = self.store.store_batch(&commits)?;
        if stored != Some(cursor) {
            self.store.set_fetch_state(&project.name, cursor)?;
            info!(project = %project.name, %cursor, "cursor advanced");
        }

        Ok((
            ProjectStats {
                outcome: handle.outcome,
                extracted,
                inserted: batch.inserted,
                cursor: Some(cursor),
            },
            batch.unreviewed,
        ))
    }

    fn score(&self, handle: &LocalHandle, hash: &str) -> Result<u8, ExtractError> {
        let parents = self.backend.parent_count(handle, hash)?;
        let stats = if self.scorer.needs_stats(parents) {
            self.backend.numstat(handle, hash)?
        } else {
            Vec::new()
        };
        Ok(self.scorer.score(parents, &stats))
    }
}

/// Start a run on a background thread. Events arrive on `events`' receiver.
pub fn spawn_run<B>(
    orchestrator: Arc<Orchestrator<B>>,
    events: Sender<IngestEvent>,
) -> JoinHandle<RunReport>
where
    B: RepoBackend + 'static,
{
    std::thread::spawn(move || orchestrator.run(&events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReviewState;
    use crate::git::GitError;
    use crate::store::CommitFilter;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::mpsc;

    #[derive(Clone)]
    struct FakeCommit {
        commit: Commit,
        parents: usize,
        stats: Vec<NumStat>,
    }

    #[derive(Default)]
    struct FakeBackend {
        repos: Mutex<HashMap<String, Vec<FakeCommit>>>,
        failing_sync: HashSet<String>,
        failing_extract: HashSet<String>,
        numstat_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn add(&self, project: &str, hash: &str, hours_ago: i64, parents: usize, paths: &[&str]) {
            let commit = Commit {
                project: project.to_string(),
                hash: hash.to_string(),
                author_name: "Ada".to_string(),
                committer_name: "Ada".to_string(),
                commit_time: hours_ago_time(hours_ago),
                subject: format!("change {}", hash),
                body: String::new(),
                state: ReviewState::New,
                comment: None,
                slat_score: 0,
            };
            self.repos
                .lock()
                .unwrap()
                .entry(project.to_string())
                .or_default()
                .push(FakeCommit {
                    commit,
                    parents,
                    stats: paths.iter().map(|p| NumStat::new(1, 0, *p)).collect(),
                });
        }

        fn find(&self, handle: &LocalHandle, hash: &str) -> FakeCommit {
            self.repos.lock().unwrap()[&handle.project]
                .iter()
                .find(|c| c.commit.hash == hash)
                .cloned()
                .unwrap()
        }
    }

    fn hours_ago_time(hours: i64) -> DateTime<Utc> {
        // Whole seconds, like git timestamps.
        let now = Utc::now() - Duration::hours(hours);
        DateTime::from_timestamp(now.timestamp(), 0).unwrap()
    }

    impl RepoBackend for FakeBackend {
        fn mirror_exists(&self, _project: &Project) -> bool {
            true
        }

        fn ensure_current(&self, project: &Project) -> Result<LocalHandle, SyncError> {
            if self.failing_sync.contains(&project.name) {
                return Err(SyncError {
                    project: project.name.clone(),
                    source: GitError::CommandFailed("authentication failed".to_string()),
                });
            }
            Ok(LocalHandle {
                project: project.name.clone(),
                path: PathBuf::from("/fake").join(&project.name),
                outcome: SyncOutcome::UpToDate,
            })
        }

        fn extract_since(
            &self,
            handle: &LocalHandle,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Commit>, ExtractError> {
            if self.failing_extract.contains(&handle.project) {
                return Err(ExtractError::InvalidTimestamp {
                    repo: handle.project.clone(),
                    hash: "bad".to_string(),
                    value: "never".to_string(),
                });
            }
            Ok(self
                .repos
                .lock()
                .unwrap()
                .get(&handle.project)
                .map(|commits| {
                    commits
                        .iter()
                        .filter(|c| since.is_none_or(|s| c.commit.commit_time > s))
                        .map(|c| c.commit.clone())
                        .collect()
                })
                .unwrap_or_default())
        }

        fn parent_count(&self, handle: &LocalHandle, hash: &str) -> Result<usize, ExtractError> {
            Ok(self.find(handle, hash).parents)
        }

        fn numstat(&self, handle: &LocalHandle, hash: &str) -> Result<Vec<NumStat>, ExtractError> {
            self.numstat_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.find(handle, hash).stats)
        }
    }

    fn project(name: &str) -> Project {
        Project {
            name: name.to_string(),
            repo: format!("https://example.com/{}", name),
            icon: String::new(),
        }
    }

    fn orchestrator(
        backend: FakeBackend,
        names: &[&str],
    ) -> (Arc<Store>, Orchestrator<FakeBackend>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let projects = names.iter().map(|n| project(n)).collect();
        let orch = Orchestrator::new(store.clone(), backend, Scorer::default(), projects)
            .with_lookback(Duration::days(14));
        (store, orch)
    }

    fn stored_hashes(store: &Store) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = store
            .load_commits(&CommitFilter::default())
            .unwrap()
            .into_iter()
            .map(|c| (c.project, c.hash))
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn failing_project_does_not_stop_others() {
        let mut backend = FakeBackend::default();
        backend.add("alpha", "a1", 5, 1, &["a.rs"]);
        backend.add("bravo", "b1", 4, 1, &["b.rs"]);
        backend.add("charlie", "c1", 3, 1, &["c.rs"]);
        backend.failing_sync.insert("bravo".to_string());
        let (store, orch) = orchestrator(backend, &["charlie", "bravo", "alpha"]);

        let (tx, _rx) = mpsc::channel();
        let report = orch.run(&tx);

        let names: Vec<&str> = report.projects.iter().map(|r| r.project.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
        assert!(report.projects[0].result.is_ok());
        assert!(matches!(report.projects[1].result, Err(IngestError::Sync(_))));
        assert!(report.projects[2].result.is_ok());

        assert!(store.get_fetch_state("alpha").unwrap().is_some());
        assert!(store.get_fetch_state("bravo").unwrap().is_none());
        assert!(store.get_fetch_state("charlie").unwrap().is_some());
        assert_eq!(
            stored_hashes(&store),
            vec![
                ("alpha".to_string(), "a1".to_string()),
                ("charlie".to_string(), "c1".to_string())
            ]
        );
        assert_eq!(report.summary().failed, vec!["bravo".to_string()]);
    }

    #[test]
    fn second_run_is_idempotent() {
        let backend = FakeBackend::default();
        backend.add("alpha", "a1", 10, 1, &["a.rs"]);
        backend.add("alpha", "a2", 2, 1, &["b.rs"]);
        let (store, orch) = orchestrator(backend, &["alpha"]);
        let (tx, _rx) = mpsc::channel();

        let first = orch.run(&tx);
        let cursor = store.get_fetch_state("alpha").unwrap();
        let rows = stored_hashes(&store);
        assert_eq!(first.unreviewed.len(), 2);
        assert_eq!(first.summary().new_commits, 2);

        let second = orch.run(&tx);
        assert!(second.unreviewed.is_empty());
        assert_eq!(second.summary().new_commits, 0);
        assert_eq!(store.get_fetch_state("alpha").unwrap(), cursor);
        assert_eq!(stored_hashes(&store), rows);
    }

    #[test]
    fn cursor_is_newest_commit_time() {
        let backend = FakeBackend::default();
        backend.add("alpha", "a1", 10, 1, &[]);
        backend.add("alpha", "a2", 2, 1, &[]);
        backend.add("alpha", "a3", 6, 1, &[]);
        let (store, orch) = orchestrator(backend, &["alpha"]);
        let (tx, _rx) = mpsc::channel();

        orch.run(&tx);
        assert_eq!(
            store.get_fetch_state("alpha").unwrap(),
            Some(hours_ago_time(2))
        );
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let backend = FakeBackend::default();
        backend.add("alpha", "old", 48, 1, &[]);
        let (store, orch) = orchestrator(backend, &["alpha"]);
        let ahead = hours_ago_time(1);
        store.set_fetch_state("alpha", ahead).unwrap();

        let (tx, _rx) = mpsc::channel();
        let report = orch.run(&tx);

        assert!(report.unreviewed.is_empty());
        assert_eq!(store.get_fetch_state("alpha").unwrap(), Some(ahead));
    }

    #[test]
    fn extract_failure_leaves_cursor_untouched() {
        let mut backend = FakeBackend::default();
        backend.add("alpha", "a1", 3, 1, &[]);
        backend.failing_extract.insert("alpha".to_string());
        let (store, orch) = orchestrator(backend, &["alpha"]);
        let before = hours_ago_time(24);
        store.set_fetch_state("alpha", before).unwrap();

        let (tx, rx) = mpsc::channel();
        let report = orch.run(&tx);

        assert!(matches!(report.projects[0].result, Err(IngestError::Extract(_))));
        assert_eq!(store.get_fetch_state("alpha").unwrap(), Some(before));
        assert!(stored_hashes(&store).is_empty());

        let failed = rx.try_iter().any(|e| {
            matches!(e, IngestEvent::ProjectFailed { ref project, .. } if project == "alpha")
        });
        assert!(failed);
    }

    #[test]
    fn commits_older_than_lookback_are_skipped_on_first_run() {
        let backend = FakeBackend::default();
        backend.add("alpha", "ancient", 24 * 30, 1, &[]);
        backend.add("alpha", "recent", 24, 1, &[]);
        let (store, orch) = orchestrator(backend, &["alpha"]);

        let (tx, _rx) = mpsc::channel();
        orch.run(&tx);

        assert_eq!(
            stored_hashes(&store),
            vec![("alpha".to_string(), "recent".to_string())]
        );
    }

    #[test]
    fn commits_are_scored_before_storing() {
        let backend = FakeBackend::default();
        backend.add("alpha", "merge", 5, 2, &["src/lib.rs"]);
        backend.add("alpha", "root", 6, 0, &[]);
        backend.add("alpha", "deps", 4, 1, &["go.mod"]);
        backend.add("alpha", "plain", 3, 1, &["src/lib.rs"]);
        let (store, orch) = orchestrator(backend, &["alpha"]);

        let (tx, _rx) = mpsc::channel();
        orch.run(&tx);

        let scores: HashMap<String, u8> = store
            .load_commits(&CommitFilter::default())
            .unwrap()
            .into_iter()
            .map(|c| (c.hash, c.slat_score))
            .collect();
        assert_eq!(scores["merge"], 100);
        assert_eq!(scores["root"], 100);
        assert_eq!(scores["deps"], 100);
        assert_eq!(scores["plain"], 0);

        // Merge and root commits score without diff stats.
        assert_eq!(orch.backend.numstat_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reviewed_commits_are_not_resent() {
        let backend = FakeBackend::default();
        backend.add("alpha", "a1", 5, 1, &[]);
        let (store, orch) = orchestrator(backend, &["alpha"]);
        let (tx, _rx) = mpsc::channel();
        orch.run(&tx);
        store.mark_reviewed("alpha", "a1").unwrap();

        // Simulate a lost cursor: the same window is extracted again.
        store
            .set_fetch_state("alpha", hours_ago_time(24))
            .unwrap();
        let report = orch.run(&tx);

        assert!(report.unreviewed.is_empty());
        let loaded = store.load_commits(&CommitFilter::default()).unwrap();
        assert_eq!(loaded[0].state, ReviewState::Reviewed);
    }

    #[test]
    fn run_ends_with_commits_then_finished() {
        let backend = FakeBackend::default();
        backend.add("alpha", "a1", 5, 1, &[]);
        backend.add("bravo", "b1", 4, 1, &[]);
        let (_store, orch) = orchestrator(backend, &["alpha", "bravo"]);

        let (tx, rx) = mpsc::channel();
        orch.run(&tx);
        drop(tx);
        let events: Vec<IngestEvent> = rx.iter().collect();

        let n = events.len();
        assert!(n >= 2);
        match &events[n - 2] {
            IngestEvent::Commits(commits) => assert_eq!(commits.len(), 2),
            other => panic!("expected commits, got {other:?}"),
        }
        match &events[n - 1] {
            IngestEvent::Finished(summary) => {
                assert_eq!(summary.succeeded, 2);
                assert_eq!(summary.new_commits, 2);
            }
            other => panic!("expected finished, got {other:?}"),
        }
        let commit_events = events
            .iter()
            .filter(|e| matches!(e, IngestEvent::Commits(_)))
            .count();
        assert_eq!(commit_events, 1);
    }

    #[test]
    fn parallel_run_matches_sequential() {
        let build = || {
            let mut backend = FakeBackend::default();
            for (i, name) in ["p1", "p2", "p3", "p4", "p5"].iter().enumerate() {
                backend.add(name, &format!("{}-a", name), 3 + i as i64, 1, &[]);
                backend.add(name, &format!("{}-b", name), 1 + i as i64, 2, &[]);
            }
            backend.failing_sync.insert("p3".to_string());
            backend
        };
        let names = ["p5", "p4", "p3", "p2", "p1"];

        let (seq_store, seq) = orchestrator(build(), &names);
        let (par_store, par) = orchestrator(build(), &names);
        let par = par.with_workers(3);

        let (tx, _rx) = mpsc::channel();
        let seq_report = seq.run(&tx);
        let par_report = par.run(&tx);

        assert_eq!(seq_report.summary(), par_report.summary());
        assert_eq!(stored_hashes(&seq_store), stored_hashes(&par_store));
        let order: Vec<&str> = par_report.projects.iter().map(|r| r.project.as_str()).collect();
        assert_eq!(order, vec!["p1", "p2", "p3", "p4", "p5"]);
    }

    #[test]
    fn spawned_run_delivers_events() {
        let backend = FakeBackend::default();
        backend.add("alpha", "a1", 5, 1, &[]);
        let (_store, orch) = orchestrator(backend, &["alpha"]);

        let (tx, rx) = mpsc::channel();
        let handle = spawn_run(Arc::new(orch), tx);
        let report = handle.join().unwrap();

        assert_eq!(report.unreviewed.len(), 1);
        let finished = rx
            .iter()
            .any(|e| matches!(e, IngestEvent::Finished(_)));
        assert!(finished);
    }

    #[test]
    fn rerun_after_cursor_failure_still_delivers_stored_commits() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("review-deck.db");
        let store = Arc::new(Store::open(&db_path).unwrap());
        let backend = FakeBackend::default();
        backend.add("alpha", "a1", 5, 1, &[]);
        let orch = Orchestrator::new(
            Arc::clone(&store),
            backend,
            Scorer::default(),
            vec![project("alpha")],
        )
        .with_lookback(Duration::days(14));

        // Commits are stored, then writing the cursor fails.
        let side = rusqlite::Connection::open(&db_path).unwrap();
        side.execute_batch(
            "CREATE TRIGGER no_cursor BEFORE INSERT ON fetch_states
             BEGIN SELECT RAISE(ABORT, 'cursor write refused'); END;",
        )
        .unwrap();

        let (tx, _rx) = mpsc::channel();
        let first = orch.run(&tx);
        assert!(matches!(first.projects[0].result, Err(IngestError::Store(_))));
        assert!(first.unreviewed.is_empty());
        assert_eq!(store.count_commits(&CommitFilter::unreviewed()).unwrap(), 1);
        assert!(store.get_fetch_state("alpha").unwrap().is_none());

        side.execute_batch("DROP TRIGGER no_cursor;").unwrap();

        let second = orch.run(&tx);
        assert!(second.projects[0].result.is_ok());
        assert_eq!(second.summary().new_commits, 0);
        let hashes: Vec<&str> = second.unreviewed.iter().map(|c| c.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a1"]);
        assert!(store.get_fetch_state("alpha").unwrap().is_some());
    }
}
