//! Core data model.
//!
//! Every record in the system belongs to exactly one team: queued lines,
//! history entries, settings, and claim marks are all partitioned by
//! [`TeamId`]. A queued line is a piece of text waiting to be claimed; a
//! history entry is the immutable record of a claimed line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Tenant boundary. All queue/history/settings/claim-mark data is scoped
/// by this identifier; no operation crosses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the acting user within a team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for queued line IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId(pub Uuid);

impl LineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for LineId {
    fn default() -> Self {
        Self::new()
    }
}

/// Newtype for history entry IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Caller role within a team. Settings mutation and queue clearing are
/// admin-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Member => "member",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Request identity context. Supplied by the caller on every operation;
/// authentication happens outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub team_id: TeamId,
    /// Display name recorded as `claimed_by_name` on history entries.
    pub name: String,
    pub role: Role,
}

impl Identity {
    pub fn new(
        team_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            team_id: TeamId(team_id.into()),
            name: name.into(),
            role,
        }
    }
}

// ---------------------------------------------------------------------------
// Queued Line
// ---------------------------------------------------------------------------

/// A line of text waiting in a team's queue.
///
/// Owned by the queue until claimed (moved to history) or deleted.
/// Byte-identical lines can coexist in the queue — dedup is a
/// submission-time filter, not a storage constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedLine {
    pub id: LineId,
    pub team_id: TeamId,
    pub content: String,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// History Entry
// ---------------------------------------------------------------------------

/// The immutable record of a claimed line.
///
/// Created only by the claim path; `content`, `original_added_by`, and
/// `original_added_at` are carried over from the queued line unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub team_id: TeamId,
    pub content: String,
    pub claimed_by: UserId,
    pub claimed_by_name: String,
    pub claimed_at: DateTime<Utc>,
    pub original_added_by: UserId,
    pub original_added_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub const MIN_LINES_PER_CLAIM: u32 = 1;
pub const MAX_LINES_PER_CLAIM: u32 = 15;
pub const DEFAULT_LINES_PER_CLAIM: u32 = 5;

pub const MIN_COOLDOWN_MINUTES: u32 = 1;
pub const MAX_COOLDOWN_MINUTES: u32 = 1440;
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 5;

/// Per-team claim policy. One row per team, created lazily on first write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorterSettings {
    pub team_id: TeamId,
    /// Upper bound on lines handed out per claim, within
    /// [`MIN_LINES_PER_CLAIM`]..=[`MAX_LINES_PER_CLAIM`].
    pub lines_per_claim: u32,
    /// Minimum minutes between one user's successful claims, within
    /// [`MIN_COOLDOWN_MINUTES`]..=[`MAX_COOLDOWN_MINUTES`].
    pub cooldown_minutes: u32,
    pub updated_at: DateTime<Utc>,
}

impl SorterSettings {
    /// The documented defaults, returned when a team has no stored row.
    pub fn defaults(team_id: TeamId) -> Self {
        Self {
            team_id,
            lines_per_claim: DEFAULT_LINES_PER_CLAIM,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            updated_at: Utc::now(),
        }
    }
}

/// Partial settings update. `None` fields are left unchanged by the merge.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub lines_per_claim: Option<u32>,
    pub cooldown_minutes: Option<u32>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.lines_per_claim.is_none() && self.cooldown_minutes.is_none()
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// Per-(team, user) record of the most recent successful claim. Written
/// only inside the claim transaction; the cooldown window is measured
/// from `last_claim_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimMark {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub last_claim_at: DateTime<Utc>,
}

/// Parameters for one claim attempt.
///
/// `now` is the instant the attempt is evaluated against: it drives the
/// cooldown check and becomes the shared `claimed_at` stamp of the batch.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest {
    /// How many lines the caller wants, within 1..=[`MAX_LINES_PER_CLAIM`].
    /// The team's configured `lines_per_claim` caps the attempt further.
    pub requested_count: u32,
    pub now: DateTime<Utc>,
}

impl ClaimRequest {
    pub fn new(requested_count: u32) -> Self {
        Self {
            requested_count,
            now: Utc::now(),
        }
    }
}

/// Result of a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub claimed_count: usize,
    /// The history entries created by this claim, in FIFO queue order.
    pub lines: Vec<HistoryEntry>,
}
