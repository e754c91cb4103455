//! Fuzzy line deduplication.
//!
//! Submission runs every candidate batch through three filters, in order:
//!
//! 1. batch-local: two candidates with the same grouping key (first
//!    fifteen whitespace-separated tokens of the normalized line) count
//!    as one; the first occurrence survives with its original text.
//! 2. against the team's queue: normalized-full-line match drops the
//!    candidate.
//! 3. against the team's history: normalized-full-line match drops the
//!    candidate.
//!
//! All functions here are pure; callers supply the exclusion sets.

use std::collections::HashSet;

/// Number of leading tokens that make up a grouping key.
pub const GROUPING_KEY_TOKENS: usize = 15;

/// Canonical form of a line: trimmed, lowercased. Exclusion sets must be
/// built from this same form.
pub fn normalize(line: &str) -> String {
    line.trim().to_lowercase()
}

/// Batch-local identity of a line: the first [`GROUPING_KEY_TOKENS`]
/// tokens of its normalized form, joined by single spaces. Lines that
/// differ only after the fifteenth token share a key.
pub fn grouping_key(line: &str) -> String {
    normalize(line)
        .split_whitespace()
        .take(GROUPING_KEY_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split raw input into candidate lines: one per newline, trimmed,
/// blanks dropped.
pub fn split_lines(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Outcome of a dedup pass over one batch.
#[derive(Debug, Clone)]
pub struct DedupReport {
    /// Survivors, original text preserved, input order kept.
    pub unique: Vec<String>,
    /// How many candidates the batch contained before filtering.
    pub submitted: usize,
}

impl DedupReport {
    pub fn duplicates(&self) -> usize {
        self.submitted - self.unique.len()
    }
}

/// Filter a batch of candidate lines against itself and against the
/// normalized contents of the queue and history.
///
/// Only an accepted line consumes its grouping key: a candidate dropped
/// because it already sits in the queue or history leaves later
/// same-key candidates eligible.
pub fn dedupe(
    candidates: &[String],
    queued: &HashSet<String>,
    claimed: &HashSet<String>,
) -> DedupReport {
    let mut seen_keys = HashSet::new();
    let mut unique = Vec::new();

    for line in candidates {
        let key = grouping_key(line);
        if seen_keys.contains(&key) {
            continue;
        }
        let norm = normalize(line);
        if queued.contains(&norm) || claimed.contains(&norm) {
            continue;
        }
        seen_keys.insert(key);
        unique.push(line.clone());
    }

    DedupReport {
        unique,
        submitted: candidates.len(),
    }
}
