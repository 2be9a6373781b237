pub mod browse;
pub mod cli;
pub mod config;
pub mod git;
pub mod ingest;
pub mod parser;
pub mod score;
pub mod store;
pub mod tui;
pub mod view;

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// A tracked repository, as supplied by configuration. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub repo: String,
    pub icon: String,
}

/// Review lifecycle of a commit. Only `New -> Reviewed` is ever applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewState {
    New,
    Reviewed,
}

impl ReviewState {
    /// Encoding used in the `commits.state` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewState::New => "new",
            ReviewState::Reviewed => "rev",
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ReviewState::New),
            "rev" => Ok(ReviewState::Reviewed),
            other => Err(other.to_owned()),
        }
    }
}

/// A commit tracked for review. Unique per `(project, hash)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub project: String,
    pub hash: String,
    pub author_name: String,
    pub committer_name: String,
    pub commit_time: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    pub state: ReviewState,
    pub comment: Option<String>,
    /// Slat score between 0 and 100.
    pub slat_score: u8,
}

impl Commit {
    /// Abbreviated hash for display.
    pub fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(6)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }
}

/// Line counts for one changed path of a commit.
///
/// `path` is kept verbatim, including rename notation such as
/// `services/{foo => echo}/Makefile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumStat {
    pub added: u64,
    pub removed: u64,
    pub path: String,
}

impl NumStat {
    pub fn new(added: u64, removed: u64, path: impl Into<String>) -> Self {
        Self {
            added,
            removed,
            path: path.into(),
        }
    }
}
