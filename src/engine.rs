//! Core engine. The public API for submitting, claiming, and settings.
//!
//! The engine owns the storage and event stream. Every mutation runs
//! inside a single SQLite transaction so concurrent callers see either
//! all of an operation or none of it. The engine is `Send + Sync`;
//! share it behind an `Arc` to serve parallel requests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::dedup::{self, DedupReport};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;
use crate::storage::Storage;

/// How many times a claim is retried against a busy database before the
/// contention is surfaced to the caller.
const CLAIM_RETRY_LIMIT: u32 = 3;

/// The sorter engine. Owns all state and enforces all invariants.
pub struct Engine {
    storage: Mutex<Storage>,
}

/// What happened when a batch was submitted.
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// Lines actually added, in submission order.
    pub added: Vec<QueuedLine>,
    /// How many non-blank candidates the batch contained.
    pub submitted: usize,
}

impl EnqueueOutcome {
    pub fn duplicates(&self) -> usize {
        self.submitted - self.added.len()
    }
}

impl Engine {
    /// Create an engine with in-memory storage (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Mutex::new(Storage::in_memory()?),
        })
    }

    /// Create an engine backed by a file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            storage: Mutex::new(Storage::open(path)?),
        })
    }

    fn storage(&self) -> Result<MutexGuard<'_, Storage>> {
        match self.storage.lock() {
            Ok(guard) => Ok(guard),
            Err(_) => Err(Error::Other("storage lock poisoned".to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Run the dedup filter over raw input without enqueueing anything.
    ///
    /// Returns the surviving lines plus the candidate count, so callers
    /// can tell "all lines already exist" from "no lines entered".
    pub fn preview(&self, identity: &Identity, input: &str) -> Result<DedupReport> {
        validate_identity(identity)?;
        let candidates = dedup::split_lines(input);

        let storage = self.storage()?;
        let queued = normalized_set(storage.queued_contents(&identity.team_id)?);
        let claimed = normalized_set(storage.history_contents(&identity.team_id)?);

        Ok(dedup::dedupe(&candidates, &queued, &claimed))
    }

    /// Dedup raw input against the team's queue and history, then append
    /// the survivors to the queue.
    ///
    /// Dedup and insert run in one transaction: a line that passes the
    /// filter cannot be duplicated by a concurrent submission that
    /// committed in between. A batch that is entirely duplicates
    /// succeeds with nothing added.
    pub fn enqueue(&self, identity: &Identity, input: &str) -> Result<EnqueueOutcome> {
        validate_identity(identity)?;

        let candidates = dedup::split_lines(input);
        if candidates.is_empty() {
            return Err(Error::Validation("no lines to queue".to_string()));
        }

        let team_id = identity.team_id.clone();
        let added_by = identity.user_id.clone();
        let now = Utc::now();

        let outcome = self.storage()?.with_transaction(|ctx| {
            let queued = normalized_set(ctx.queued_contents(&team_id)?);
            let claimed = normalized_set(ctx.history_contents(&team_id)?);
            let report = dedup::dedupe(&candidates, &queued, &claimed);

            let mut added = Vec::with_capacity(report.unique.len());
            for content in &report.unique {
                let line = QueuedLine {
                    id: LineId::new(),
                    team_id: team_id.clone(),
                    content: content.clone(),
                    added_by: added_by.clone(),
                    added_at: now,
                };
                ctx.insert_queued_line(&line)?;
                added.push(line);
            }

            if !added.is_empty() {
                ctx.record_event(EventKind::LinesQueued {
                    team_id: team_id.clone(),
                    added_by: added_by.clone(),
                    count: added.len(),
                    duplicates: report.duplicates(),
                })?;
            }

            Ok(EnqueueOutcome {
                added,
                submitted: report.submitted,
            })
        })?;

        info!(
            team_id = %team_id,
            added = outcome.added.len(),
            duplicates = outcome.duplicates(),
            "lines queued"
        );
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// List the team's queue, newest first.
    pub fn list_queue(&self, identity: &Identity) -> Result<Vec<QueuedLine>> {
        validate_identity(identity)?;
        self.storage()?.list_queue(&identity.team_id)
    }

    /// Remove a single queued line. Fails with `NotFound` if the line
    /// does not exist under the caller's team.
    pub fn remove_line(&self, identity: &Identity, id: LineId) -> Result<()> {
        validate_identity(identity)?;
        let team_id = identity.team_id.clone();
        let removed_by = identity.user_id.clone();

        self.storage()?.with_transaction(|ctx| {
            if !ctx.delete_queued_line(&team_id, id)? {
                return Err(Error::NotFound(format!("queued line {id}")));
            }
            ctx.record_event(EventKind::LineRemoved {
                team_id: team_id.clone(),
                line_id: id,
                removed_by: removed_by.clone(),
            })?;
            Ok(())
        })?;

        debug!(team_id = %team_id, line_id = %id, "line removed");
        Ok(())
    }

    /// Remove every queued line for the team. Admin only.
    pub fn clear_queue(&self, identity: &Identity) -> Result<u64> {
        validate_identity(identity)?;
        if !identity.role.is_admin() {
            return Err(Error::PermissionDenied(
                "only admins can clear the queue".to_string(),
            ));
        }

        let team_id = identity.team_id.clone();
        let cleared_by = identity.user_id.clone();

        let removed = self.storage()?.with_transaction(|ctx| {
            let removed = ctx.clear_queue(&team_id)?;
            if removed > 0 {
                ctx.record_event(EventKind::QueueCleared {
                    team_id: team_id.clone(),
                    cleared_by: cleared_by.clone(),
                    removed,
                })?;
            }
            Ok(removed)
        })?;

        info!(team_id = %team_id, removed, "queue cleared");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Claim a batch of lines for the caller, moving them from the queue
    /// into history.
    ///
    /// Cooldown check, FIFO selection, history insert, queue removal,
    /// and claim mark all run in one transaction, so two concurrent
    /// claims can never take the same line. The team's
    /// configured `lines_per_claim` caps the attempt; fewer available
    /// lines than requested is a partial success, zero is
    /// `NoLinesAvailable`.
    ///
    /// A busy database is retried a bounded number of times, then
    /// surfaced as `Conflict`.
    pub fn claim(&self, identity: &Identity, request: ClaimRequest) -> Result<ClaimOutcome> {
        validate_identity(identity)?;
        if request.requested_count < MIN_LINES_PER_CLAIM {
            return Err(Error::Validation(
                "requested count must be at least 1".to_string(),
            ));
        }
        if request.requested_count > MAX_LINES_PER_CLAIM {
            return Err(Error::Validation(format!(
                "requested count must not exceed {MAX_LINES_PER_CLAIM}"
            )));
        }

        let mut busy_attempts = 0;
        loop {
            match self.try_claim(identity, request) {
                Err(e) if is_busy(&e) => {
                    busy_attempts += 1;
                    if busy_attempts > CLAIM_RETRY_LIMIT {
                        return Err(Error::Conflict(
                            "queue is contended by concurrent claims".to_string(),
                        ));
                    }
                }
                other => return other,
            }
        }
    }

    fn try_claim(&self, identity: &Identity, request: ClaimRequest) -> Result<ClaimOutcome> {
        let team_id = identity.team_id.clone();
        let user_id = identity.user_id.clone();
        let claimed_by_name = display_name(identity);

        let outcome = self.storage()?.with_transaction(|ctx| {
            let settings = ctx
                .get_settings(&team_id)?
                .unwrap_or_else(|| SorterSettings::defaults(team_id.clone()));

            if let Some(mark) = ctx.get_claim_mark(&team_id, &user_id)? {
                let window_end =
                    mark.last_claim_at + Duration::minutes(i64::from(settings.cooldown_minutes));
                if request.now < window_end {
                    let remaining = (window_end - request.now).num_seconds().max(1);
                    return Err(Error::CooldownActive {
                        remaining_secs: remaining as u64,
                    });
                }
            }

            // Configured lines_per_claim is a hard ceiling on the attempt.
            let take = request.requested_count.min(settings.lines_per_claim);
            let batch = ctx.oldest_queued(&team_id, take)?;
            if batch.is_empty() {
                return Err(Error::NoLinesAvailable);
            }

            // One shared claimed_at stamp for the whole batch.
            let claimed_at = request.now;
            let mut lines = Vec::with_capacity(batch.len());
            for line in &batch {
                let entry = HistoryEntry {
                    id: EntryId::new(),
                    team_id: team_id.clone(),
                    content: line.content.clone(),
                    claimed_by: user_id.clone(),
                    claimed_by_name: claimed_by_name.clone(),
                    claimed_at,
                    original_added_by: line.added_by.clone(),
                    original_added_at: line.added_at,
                };
                ctx.insert_history_entry(&entry)?;
                if !ctx.delete_queued_line(&team_id, line.id)? {
                    return Err(Error::Other(format!(
                        "queued line {} vanished mid-claim",
                        line.id
                    )));
                }
                lines.push(entry);
            }

            ctx.upsert_claim_mark(&ClaimMark {
                team_id: team_id.clone(),
                user_id: user_id.clone(),
                last_claim_at: claimed_at,
            })?;

            ctx.record_event(EventKind::LinesClaimed {
                team_id: team_id.clone(),
                claimed_by: user_id.clone(),
                count: lines.len(),
            })?;

            Ok(ClaimOutcome {
                claimed_count: lines.len(),
                lines,
            })
        })?;

        info!(
            team_id = %team_id,
            claimed_by = %user_id,
            count = outcome.claimed_count,
            "lines claimed"
        );
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// List the team's claim history, newest first.
    pub fn list_history(
        &self,
        identity: &Identity,
        limit: Option<u32>,
    ) -> Result<Vec<HistoryEntry>> {
        validate_identity(identity)?;
        self.storage()?.list_history(&identity.team_id, limit)
    }

    /// Case-insensitive substring search over the team's history.
    pub fn search_history(&self, identity: &Identity, query: &str) -> Result<Vec<HistoryEntry>> {
        validate_identity(identity)?;
        self.storage()?.search_history(&identity.team_id, query)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// The team's effective claim policy: the stored row, or the
    /// documented defaults when none exists.
    pub fn get_settings(&self, identity: &Identity) -> Result<SorterSettings> {
        validate_identity(identity)?;
        let stored = self.storage()?.get_settings(&identity.team_id)?;
        Ok(stored.unwrap_or_else(|| SorterSettings::defaults(identity.team_id.clone())))
    }

    /// Apply a partial settings update. Admin only; out-of-range values
    /// are rejected, never clamped. The first write for a team creates
    /// its row.
    pub fn update_settings(
        &self,
        identity: &Identity,
        patch: SettingsPatch,
    ) -> Result<SorterSettings> {
        validate_identity(identity)?;
        if !identity.role.is_admin() {
            return Err(Error::PermissionDenied(
                "only admins can change sorter settings".to_string(),
            ));
        }
        if let Some(n) = patch.lines_per_claim {
            if !(MIN_LINES_PER_CLAIM..=MAX_LINES_PER_CLAIM).contains(&n) {
                return Err(Error::Validation(format!(
                    "lines_per_claim must be between {MIN_LINES_PER_CLAIM} and {MAX_LINES_PER_CLAIM}"
                )));
            }
        }
        if let Some(n) = patch.cooldown_minutes {
            if !(MIN_COOLDOWN_MINUTES..=MAX_COOLDOWN_MINUTES).contains(&n) {
                return Err(Error::Validation(format!(
                    "cooldown_minutes must be between {MIN_COOLDOWN_MINUTES} and {MAX_COOLDOWN_MINUTES}"
                )));
            }
        }

        let team_id = identity.team_id.clone();
        let updated_by = identity.user_id.clone();

        let updated = self.storage()?.with_transaction(|ctx| {
            let mut settings = ctx
                .get_settings(&team_id)?
                .unwrap_or_else(|| SorterSettings::defaults(team_id.clone()));

            if let Some(n) = patch.lines_per_claim {
                settings.lines_per_claim = n;
            }
            if let Some(n) = patch.cooldown_minutes {
                settings.cooldown_minutes = n;
            }
            settings.updated_at = Utc::now();

            ctx.upsert_settings(&settings)?;
            ctx.record_event(EventKind::SettingsUpdated {
                team_id: team_id.clone(),
                updated_by: updated_by.clone(),
                lines_per_claim: settings.lines_per_claim,
                cooldown_minutes: settings.cooldown_minutes,
            })?;
            Ok(settings)
        })?;

        info!(
            team_id = %team_id,
            lines_per_claim = updated.lines_per_claim,
            cooldown_minutes = updated.cooldown_minutes,
            "settings updated"
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Get events since a sequence number.
    pub fn get_events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        self.storage()?.get_events_since(since_seq)
    }
}

fn validate_identity(identity: &Identity) -> Result<()> {
    if identity.team_id.as_str().trim().is_empty() {
        return Err(Error::Validation("team id must not be blank".to_string()));
    }
    if identity.user_id.as_str().trim().is_empty() {
        return Err(Error::Validation("user id must not be blank".to_string()));
    }
    Ok(())
}

/// History records a human-readable claimant; a blank display name
/// falls back to the user id.
fn display_name(identity: &Identity) -> String {
    let name = identity.name.trim();
    if name.is_empty() {
        identity.user_id.as_str().to_string()
    } else {
        name.to_string()
    }
}

fn normalized_set(contents: Vec<String>) -> HashSet<String> {
    contents.iter().map(|c| dedup::normalize(c)).collect()
}

fn is_busy(err: &Error) -> bool {
    matches!(
        err,
        Error::Storage(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
