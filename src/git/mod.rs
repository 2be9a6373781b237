use crate::parser::{self, InvalidTimestamp, LOG_FORMAT};
use crate::{Commit, NumStat, Project, ReviewState};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("invalid git ref: {0}")]
    InvalidRef(String),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Cloning or pulling a project's mirror failed.
#[derive(Debug, Error)]
#[error("sync of {project} failed: {source}")]
pub struct SyncError {
    pub project: String,
    #[source]
    pub source: GitError,
}

/// Reading commits out of a mirror failed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("illegal commit time {value:?} for {hash} in {repo}")]
    InvalidTimestamp {
        repo: String,
        hash: String,
        value: String,
    },
    #[error("reading history of {repo} failed: {source}")]
    Git {
        repo: String,
        #[source]
        source: GitError,
    },
}

impl ExtractError {
    fn git(repo: &str, source: GitError) -> Self {
        ExtractError::Git {
            repo: repo.to_string(),
            source,
        }
    }
}

/// What `ensure_current` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Cloned,
    Updated,
    UpToDate,
}

/// A synchronized local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHandle {
    pub project: String,
    pub path: PathBuf,
    pub outcome: SyncOutcome,
}

/// Directory name of a mirror: the last path segment of the repository location.
pub fn mirror_dir_name(repo: &str) -> &str {
    let trimmed = repo.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed)
}

/// Location of a project's mirror under the code folder.
pub fn mirror_path(root: &Path, project: &Project) -> PathBuf {
    root.join(mirror_dir_name(&project.repo))
}

/// Make sure a current mirror of the project exists under `root`.
///
/// Clones when the mirror is missing (possibly slow), pulls otherwise. An
/// already up-to-date mirror is a success. Failures are not retried.
pub fn ensure_current(
    root: &Path,
    project: &Project,
) -> std::result::Result<LocalHandle, SyncError> {
    let path = mirror_path(root, project);
    let wrap = |source| SyncError {
        project: project.name.clone(),
        source,
    };

    let outcome = if path.exists() {
        let before = head_sha(&path).ok();
        pull_repo(&path).map_err(wrap)?;
        let after = head_sha(&path).ok();
        if before == after {
            SyncOutcome::UpToDate
        } else {
            SyncOutcome::Updated
        }
    } else {
        std::fs::create_dir_all(root).map_err(|e| wrap(GitError::Io(e)))?;
        clone_repo(&project.repo, &path).map_err(wrap)?;
        SyncOutcome::Cloned
    };

    info!(project = %project.name, ?outcome, "mirror synchronized");
    Ok(LocalHandle {
        project: project.name.clone(),
        path,
        outcome,
    })
}

/// Clone a repository into `target`.
pub fn clone_repo(repo: &str, target: &Path) -> Result<()> {
    let mut cmd = git_command(None);
    cmd.arg("clone").arg("--quiet").arg("--").arg(repo).arg(target);
    run(cmd, "git clone").map(|_| ())
}

/// Fast-forward an existing mirror.
pub fn pull_repo(path: &Path) -> Result<()> {
    let mut cmd = git_command(Some(path));
    cmd.args(["pull", "--ff-only", "--quiet"]);
    run(cmd, "git pull").map(|_| ())
}

/// Current HEAD of a repository.
pub fn head_sha(path: &Path) -> Result<String> {
    let mut cmd = git_command(Some(path));
    cmd.args(["rev-parse", "HEAD"]);
    Ok(run(cmd, "git rev-parse HEAD")?.trim().to_string())
}

/// Commits strictly newer than `since` across all refs, without duplicates.
///
/// `None` extracts the whole history. Commits come back unscored and in the
/// `New` state.
pub fn extract_since(
    handle: &LocalHandle,
    since: Option<DateTime<Utc>>,
) -> std::result::Result<Vec<Commit>, ExtractError> {
    let mut cmd = git_command(Some(&handle.path));
    cmd.arg("log").arg("--all");
    if let Some(since) = since {
        cmd.arg(format!(
            "--since={}",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    cmd.arg(format!("--format={}", LOG_FORMAT));

    let output = run(cmd, "git log").map_err(|e| ExtractError::git(&handle.project, e))?;
    let records = parser::parse_log(&output).map_err(|InvalidTimestamp { hash, value }| {
        ExtractError::InvalidTimestamp {
            repo: handle.project.clone(),
            hash,
            value,
        }
    })?;

    let mut seen = HashSet::new();
    let mut commits = Vec::with_capacity(records.len());
    for record in records {
        let Some(commit_time) = Utc.timestamp_opt(record.commit_time, 0).single() else {
            return Err(ExtractError::InvalidTimestamp {
                repo: handle.project.clone(),
                hash: record.hash,
                value: record.commit_time.to_string(),
            });
        };
        if since.is_some_and(|since| commit_time <= since) {
            continue;
        }
        if !seen.insert(record.hash.clone()) {
            continue;
        }
        commits.push(Commit {
            project: handle.project.clone(),
            hash: record.hash,
            author_name: record.author_name,
            committer_name: record.committer_name,
            commit_time,
            subject: record.subject,
            body: record.body,
            state: ReviewState::New,
            comment: None,
            slat_score: 0,
        });
    }

    debug!(project = %handle.project, count = commits.len(), "extracted commits");
    Ok(commits)
}

/// Number of parents of a commit.
pub fn parent_count(
    handle: &LocalHandle,
    hash: &str,
) -> std::result::Result<usize, ExtractError> {
    validate_git_ref(hash).map_err(|e| ExtractError::git(&handle.project, e))?;
    let mut cmd = git_command(Some(&handle.path));
    cmd.args(["log", "-1", "--format=%P", hash]);
    let output =
        run(cmd, "git log --format=%P").map_err(|e| ExtractError::git(&handle.project, e))?;
    Ok(parser::count_parents(&output))
}

/// Per-path line counts of a commit against its first parent.
pub fn numstat(
    handle: &LocalHandle,
    hash: &str,
) -> std::result::Result<Vec<NumStat>, ExtractError> {
    validate_git_ref(hash).map_err(|e| ExtractError::git(&handle.project, e))?;
    let mut cmd = git_command(Some(&handle.path));
    cmd.args(["show", "--numstat", "--format=", "--no-color", hash]);
    let output =
        run(cmd, "git show --numstat").map_err(|e| ExtractError::git(&handle.project, e))?;
    Ok(parser::parse_numstat(&output))
}

/// Validate a git ref to prevent option injection.
pub fn validate_git_ref(ref_str: &str) -> Result<()> {
    if ref_str.is_empty() {
        return Err(GitError::InvalidRef("Empty git ref".to_string()));
    }
    if ref_str.starts_with('-') {
        return Err(GitError::InvalidRef(format!(
            "git ref may not start with '-': {}",
            ref_str
        )));
    }

    for ch in ref_str.chars() {
        if !ch.is_alphanumeric()
            && !matches!(
                ch,
                '-' | '_' | '/' | '.' | '~' | '^' | '@' | ':' | '{' | '}'
            )
        {
            return Err(GitError::InvalidRef(format!(
                "Invalid character in git ref: '{}'",
                ch
            )));
        }
    }

    Ok(())
}

/// A non-interactive git invocation. Credential prompts would block a
/// background worker forever, so they fail instead.
fn git_command(dir: Option<&Path>) -> Command {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C")
        .stdin(Stdio::null());
    cmd
}

fn run(mut cmd: Command, what: &str) -> Result<String> {
    let output = cmd.output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!(
            "{} failed: {}",
            what,
            stderr.trim()
        )));
    }

    String::from_utf8(output.stdout).map_err(GitError::from)
}
