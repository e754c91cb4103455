//! Structured events emitted by the engine on every state change.
//!
//! Consumers read the event stream to build activity feeds or audit
//! logs. Events record who changed a team's queue and how, not the
//! line contents themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LineId, TeamId, UserId};

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    LinesQueued {
        team_id: TeamId,
        added_by: UserId,
        count: usize,
        duplicates: usize,
    },
    LineRemoved {
        team_id: TeamId,
        line_id: LineId,
        removed_by: UserId,
    },
    QueueCleared {
        team_id: TeamId,
        cleared_by: UserId,
        removed: u64,
    },
    LinesClaimed {
        team_id: TeamId,
        claimed_by: UserId,
        count: usize,
    },
    SettingsUpdated {
        team_id: TeamId,
        updated_by: UserId,
        lines_per_claim: u32,
        cooldown_minutes: u32,
    },
    /// Fallback for event rows this build does not recognize. Keeps old
    /// binaries readable against newer databases.
    Unknown {
        raw: String,
    },
}
