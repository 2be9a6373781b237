//! Slat ("should look at it") scoring.
//!
//! A score is an integer between 0 and 100. 100 means a commit definitely
//! needs a look, 0 means nothing risky was detected. Scoring is an ordered
//! list of rules. Each rule that fires raises the score to at least its own
//! value, and no rule can lower a score set by an earlier one.

use crate::NumStat;

/// Highest possible slat score.
pub const MAX_SCORE: u8 = 100;

/// Dependency manifests and lock files. A path containing one of these is
/// treated as a dependency change.
pub const DEFAULT_MANIFEST_MARKERS: &[&str] = &[
    "go.mod",
    "go.sum",
    "Cargo.toml",
    "Cargo.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "requirements.txt",
    "Pipfile.lock",
    "poetry.lock",
    "pyproject.toml",
    "Gemfile.lock",
    "composer.json",
    "composer.lock",
    "pom.xml",
    "build.gradle",
];

/// What a rule may look at: parentage and the changed paths.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub parent_count: usize,
    pub stats: &'a [NumStat],
}

type Predicate = Box<dyn Fn(&ScoreInput<'_>) -> bool + Send + Sync>;

/// A named predicate and the score it assigns when it fires.
pub struct Rule {
    pub name: &'static str,
    pub score: u8,
    predicate: Predicate,
}

impl Rule {
    pub fn new(
        name: &'static str,
        score: u8,
        predicate: impl Fn(&ScoreInput<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            score: score.min(MAX_SCORE),
            predicate: Box::new(predicate),
        }
    }

    pub fn fires(&self, input: &ScoreInput<'_>) -> bool {
        (self.predicate)(input)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("score", &self.score)
            .finish()
    }
}

/// Merges and root commits cannot be characterized by a single diff.
pub fn not_single_parent() -> Rule {
    Rule::new("not-single-parent", MAX_SCORE, |input| {
        input.parent_count != 1
    })
}

/// Any changed path mentions a dependency manifest.
pub fn touches_manifest(markers: Vec<String>) -> Rule {
    Rule::new("touches-manifest", MAX_SCORE, move |input| {
        input
            .stats
            .iter()
            .any(|stat| markers.iter().any(|m| stat.path.contains(m.as_str())))
    })
}

/// Ordered rule list computing slat scores.
#[derive(Debug)]
pub struct Scorer {
    rules: Vec<Rule>,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::with_markers(DEFAULT_MANIFEST_MARKERS.iter().map(|m| m.to_string()).collect())
    }
}

impl Scorer {
    /// The standard rules, with a custom manifest marker list.
    pub fn with_markers(markers: Vec<String>) -> Self {
        Self {
            rules: vec![not_single_parent(), touches_manifest(markers)],
        }
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Append a rule after the existing ones.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Score a commit from its parent count and diff stats.
    pub fn score(&self, parent_count: usize, stats: &[NumStat]) -> u8 {
        let input = ScoreInput {
            parent_count,
            stats,
        };
        let mut score = 0;
        for rule in &self.rules {
            if score >= MAX_SCORE {
                break;
            }
            if rule.fires(&input) {
                score = score.max(rule.score);
            }
        }
        score
    }

    /// Whether scoring needs the commit's diff stats. Commits that already
    /// score the maximum from parentage alone don't.
    pub fn needs_stats(&self, parent_count: usize) -> bool {
        self.score(parent_count, &[]) < MAX_SCORE
    }
}
