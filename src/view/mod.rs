use std::collections::HashSet;

use crate::Commit;

/// Durable change the presentation loop asks the store to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub project: String,
    pub hash: String,
}

/// Which commits a project tab shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProjectFilter {
    #[default]
    All,
    Project(String),
}

impl ProjectFilter {
    pub fn matches(&self, commit: &Commit) -> bool {
        match self {
            ProjectFilter::All => true,
            ProjectFilter::Project(name) => commit.project == *name,
        }
    }
}

/// Live set of unreviewed commits, owned by the presentation loop.
///
/// Always sorted by commit time, oldest first, with the hash as tie-break.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    commits: Vec<Commit>,
}

impl ViewState {
    pub fn new(commits: Vec<Commit>) -> Self {
        let mut view = Self::default();
        view.merge(commits);
        view
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Add incoming commits. Commits whose hash is already shown are dropped,
    /// including duplicates within `incoming`. Returns how many were added.
    pub fn merge(&mut self, incoming: Vec<Commit>) -> usize {
        let before = self.commits.len();
        let mut seen: HashSet<String> = self.commits.iter().map(|c| c.hash.clone()).collect();
        for commit in incoming {
            if seen.insert(commit.hash.clone()) {
                self.commits.push(commit);
            }
        }
        self.commits.sort_by(|a, b| {
            a.commit_time
                .cmp(&b.commit_time)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        self.commits.len() - before
    }

    /// Remove a commit from the view. Returns the store update to apply, or
    /// `None` when the hash is not shown.
    pub fn mark_reviewed(&mut self, hash: &str) -> Option<ReviewRequest> {
        let index = self.commits.iter().position(|c| c.hash == hash)?;
        let commit = self.commits.remove(index);
        Some(ReviewRequest {
            project: commit.project,
            hash: commit.hash,
        })
    }

    /// Commits matching `filter`, in view order.
    pub fn project_filter(&self, filter: &ProjectFilter) -> Vec<&Commit> {
        self.commits.iter().filter(|c| filter.matches(c)).collect()
    }
}

/// Row cursor over a filtered list whose length can change under it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
}

impl Selection {
    /// Move selection down (clamp to end).
    pub fn select_next(&mut self, len: usize) {
        if len > 0 && self.index < len - 1 {
            self.index += 1;
        }
    }

    /// Move selection up (clamp to start).
    pub fn select_prev(&mut self) {
        if self.index > 0 {
            self.index -= 1;
        }
    }

    /// Keep the selection inside a list of `len` rows.
    pub fn clamp(&mut self, len: usize) {
        if len == 0 {
            self.index = 0;
        } else if self.index >= len {
            self.index = len - 1;
        }
    }
}
