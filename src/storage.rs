//! SQLite storage layer.
//!
//! Single source of truth for queued lines, claim history, settings,
//! claim marks, and events. WAL mode for concurrent read access. Reads
//! execute directly; every write path runs inside an engine transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    conn: Connection,
}

/// Handle for performing storage operations within a transaction.
///
/// All methods delegate to the same SQL logic as `Storage`, but execute
/// against the transaction's connection. This ensures atomicity — either
/// all operations commit together or none do.
pub(crate) struct TxContext<'a> {
    tx: &'a Connection,
}

impl TxContext<'_> {
    pub fn insert_queued_line(&self, line: &QueuedLine) -> Result<()> {
        insert_queued_line_on(self.tx, line)
    }

    pub fn oldest_queued(&self, team_id: &TeamId, limit: u32) -> Result<Vec<QueuedLine>> {
        oldest_queued_on(self.tx, team_id, limit)
    }

    pub fn delete_queued_line(&self, team_id: &TeamId, id: LineId) -> Result<bool> {
        delete_queued_line_on(self.tx, team_id, id)
    }

    pub fn clear_queue(&self, team_id: &TeamId) -> Result<u64> {
        clear_queue_on(self.tx, team_id)
    }

    pub fn queued_contents(&self, team_id: &TeamId) -> Result<Vec<String>> {
        queued_contents_on(self.tx, team_id)
    }

    pub fn history_contents(&self, team_id: &TeamId) -> Result<Vec<String>> {
        history_contents_on(self.tx, team_id)
    }

    pub fn insert_history_entry(&self, entry: &HistoryEntry) -> Result<()> {
        insert_history_entry_on(self.tx, entry)
    }

    pub fn get_settings(&self, team_id: &TeamId) -> Result<Option<SorterSettings>> {
        get_settings_on(self.tx, team_id)
    }

    pub fn upsert_settings(&self, settings: &SorterSettings) -> Result<()> {
        upsert_settings_on(self.tx, settings)
    }

    pub fn get_claim_mark(&self, team_id: &TeamId, user_id: &UserId) -> Result<Option<ClaimMark>> {
        get_claim_mark_on(self.tx, team_id, user_id)
    }

    pub fn upsert_claim_mark(&self, mark: &ClaimMark) -> Result<()> {
        upsert_claim_mark_on(self.tx, mark)
    }

    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        record_event_on(self.tx, kind)
    }
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    fn init(&mut self) -> Result<()> {
        // WAL mode for concurrent readers
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS queued_lines (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT NOT NULL UNIQUE,
                team_id     TEXT NOT NULL,
                content     TEXT NOT NULL,
                added_by    TEXT NOT NULL,
                added_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queued_team ON queued_lines(team_id, seq);

            CREATE TABLE IF NOT EXISTS history_entries (
                id                  TEXT PRIMARY KEY,
                team_id             TEXT NOT NULL,
                content             TEXT NOT NULL,
                claimed_by          TEXT NOT NULL,
                claimed_by_name     TEXT NOT NULL,
                claimed_at          TEXT NOT NULL,
                original_added_by   TEXT NOT NULL,
                original_added_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_team ON history_entries(team_id, claimed_at);

            CREATE TABLE IF NOT EXISTS sorter_settings (
                team_id          TEXT PRIMARY KEY,
                lines_per_claim  INTEGER NOT NULL,
                cooldown_minutes INTEGER NOT NULL,
                updated_at       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS claim_marks (
                team_id       TEXT NOT NULL,
                user_id       TEXT NOT NULL,
                last_claim_at TEXT NOT NULL,
                PRIMARY KEY (team_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS events (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                kind        TEXT NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure within a SQLite transaction.
    ///
    /// The transaction commits if the closure returns Ok, rolls back on Err.
    pub(crate) fn with_transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TxContext) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let mut ctx = TxContext { tx: &tx };
        let result = f(&mut ctx)?;
        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Queued Lines
    // -----------------------------------------------------------------------

    /// List a team's queue, newest first.
    pub fn list_queue(&self, team_id: &TeamId) -> Result<Vec<QueuedLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, team_id, content, added_by, added_at
             FROM queued_lines WHERE team_id = ?1 ORDER BY seq DESC",
        )?;

        let lines = stmt
            .query_map(params![team_id.as_str()], |row| Ok(row_to_queued_line(row)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut result = Vec::new();
        for line in lines {
            result.push(line.map_err(|e| Error::Other(format!("parse error: {e}")))?);
        }
        Ok(result)
    }

    /// Normalization inputs for dedup: every queued content string.
    pub fn queued_contents(&self, team_id: &TeamId) -> Result<Vec<String>> {
        queued_contents_on(&self.conn, team_id)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// List a team's claim history, newest first.
    pub fn list_history(
        &self,
        team_id: &TeamId,
        limit: Option<u32>,
    ) -> Result<Vec<HistoryEntry>> {
        list_history_on(&self.conn, team_id, limit)
    }

    /// Case-insensitive substring search over a team's history. The
    /// query is matched literally; LIKE-style wildcards have no special
    /// meaning.
    pub fn search_history(&self, team_id: &TeamId, query: &str) -> Result<Vec<HistoryEntry>> {
        search_history_on(&self.conn, team_id, query)
    }

    /// Normalization inputs for dedup: every claimed content string.
    pub fn history_contents(&self, team_id: &TeamId) -> Result<Vec<String>> {
        history_contents_on(&self.conn, team_id)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Get a team's stored settings. `None` means the team has never
    /// written any and the defaults apply.
    pub fn get_settings(&self, team_id: &TeamId) -> Result<Option<SorterSettings>> {
        get_settings_on(&self.conn, team_id)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Get events since a sequence number.
    pub fn get_events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        // Sequences beyond i64 cannot exist in the table; clamp instead
        // of wrapping negative.
        let since = i64::try_from(since_seq).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT seq, timestamp, kind FROM events WHERE seq > ?1 ORDER BY seq ASC")?;

        let events = stmt
            .query_map(params![since], |row| {
                let kind_str: String = row.get(2)?;
                Ok(Event {
                    seq: row.get::<_, i64>(0)? as u64,
                    timestamp: row
                        .get::<_, String>(1)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    kind: serde_json::from_str(&kind_str)
                        .unwrap_or(EventKind::Unknown { raw: kind_str }),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Inner functions — accept &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn insert_queued_line_on(conn: &Connection, line: &QueuedLine) -> Result<()> {
    conn.execute(
        "INSERT INTO queued_lines (id, team_id, content, added_by, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            line.id.0.to_string(),
            line.team_id.as_str(),
            line.content,
            line.added_by.as_str(),
            line.added_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn oldest_queued_on(conn: &Connection, team_id: &TeamId, limit: u32) -> Result<Vec<QueuedLine>> {
    let mut stmt = conn.prepare(
        "SELECT id, team_id, content, added_by, added_at
         FROM queued_lines WHERE team_id = ?1 ORDER BY seq ASC LIMIT ?2",
    )?;

    let lines = stmt
        .query_map(params![team_id.as_str(), limit], |row| {
            Ok(row_to_queued_line(row))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::new();
    for line in lines {
        result.push(line.map_err(|e| Error::Other(format!("parse error: {e}")))?);
    }
    Ok(result)
}

fn delete_queued_line_on(conn: &Connection, team_id: &TeamId, id: LineId) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM queued_lines WHERE team_id = ?1 AND id = ?2",
        params![team_id.as_str(), id.0.to_string()],
    )?;
    Ok(affected > 0)
}

fn clear_queue_on(conn: &Connection, team_id: &TeamId) -> Result<u64> {
    let affected = conn.execute(
        "DELETE FROM queued_lines WHERE team_id = ?1",
        params![team_id.as_str()],
    )?;
    Ok(affected as u64)
}

fn queued_contents_on(conn: &Connection, team_id: &TeamId) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT content FROM queued_lines WHERE team_id = ?1 ORDER BY seq ASC")?;
    let contents = stmt
        .query_map(params![team_id.as_str()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(contents)
}

fn history_contents_on(conn: &Connection, team_id: &TeamId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT content FROM history_entries WHERE team_id = ?1")?;
    let contents = stmt
        .query_map(params![team_id.as_str()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(contents)
}

fn insert_history_entry_on(conn: &Connection, entry: &HistoryEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO history_entries (
            id, team_id, content, claimed_by, claimed_by_name,
            claimed_at, original_added_by, original_added_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id.0.to_string(),
            entry.team_id.as_str(),
            entry.content,
            entry.claimed_by.as_str(),
            entry.claimed_by_name,
            entry.claimed_at.to_rfc3339(),
            entry.original_added_by.as_str(),
            entry.original_added_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn list_history_on(
    conn: &Connection,
    team_id: &TeamId,
    limit: Option<u32>,
) -> Result<Vec<HistoryEntry>> {
    // LIMIT -1 means no limit in SQLite. Entries from one claim share a
    // claimed_at stamp; the rowid tiebreak keeps their queue order.
    let mut stmt = conn.prepare(
        "SELECT id, team_id, content, claimed_by, claimed_by_name,
                claimed_at, original_added_by, original_added_at
         FROM history_entries WHERE team_id = ?1
         ORDER BY claimed_at DESC, rowid ASC LIMIT ?2",
    )?;

    let entries = stmt
        .query_map(
            params![team_id.as_str(), limit.map(i64::from).unwrap_or(-1)],
            |row| Ok(row_to_history_entry(row)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::new();
    for entry in entries {
        result.push(entry.map_err(|e| Error::Other(format!("parse error: {e}")))?);
    }
    Ok(result)
}

fn search_history_on(conn: &Connection, team_id: &TeamId, query: &str) -> Result<Vec<HistoryEntry>> {
    // SQLite LIKE folds ASCII case only, so matching happens here with
    // Rust's Unicode lowercase.
    let needle = query.to_lowercase();
    let entries = list_history_on(conn, team_id, None)?;
    Ok(entries
        .into_iter()
        .filter(|entry| entry.content.to_lowercase().contains(&needle))
        .collect())
}

fn get_settings_on(conn: &Connection, team_id: &TeamId) -> Result<Option<SorterSettings>> {
    let settings = conn
        .query_row(
            "SELECT team_id, lines_per_claim, cooldown_minutes, updated_at
             FROM sorter_settings WHERE team_id = ?1",
            params![team_id.as_str()],
            |row| {
                Ok(SorterSettings {
                    team_id: TeamId(row.get(0)?),
                    lines_per_claim: row.get(1)?,
                    cooldown_minutes: row.get(2)?,
                    updated_at: row
                        .get::<_, String>(3)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()?;

    Ok(settings)
}

fn upsert_settings_on(conn: &Connection, settings: &SorterSettings) -> Result<()> {
    conn.execute(
        "INSERT INTO sorter_settings (team_id, lines_per_claim, cooldown_minutes, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(team_id) DO UPDATE SET
             lines_per_claim = excluded.lines_per_claim,
             cooldown_minutes = excluded.cooldown_minutes,
             updated_at = excluded.updated_at",
        params![
            settings.team_id.as_str(),
            settings.lines_per_claim,
            settings.cooldown_minutes,
            settings.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn get_claim_mark_on(
    conn: &Connection,
    team_id: &TeamId,
    user_id: &UserId,
) -> Result<Option<ClaimMark>> {
    let mark = conn
        .query_row(
            "SELECT team_id, user_id, last_claim_at
             FROM claim_marks WHERE team_id = ?1 AND user_id = ?2",
            params![team_id.as_str(), user_id.as_str()],
            |row| {
                // The cooldown window is measured from this value, so a
                // corrupt timestamp is an error rather than a guess.
                let at_str: String = row.get(2)?;
                Ok(ClaimMark {
                    team_id: TeamId(row.get(0)?),
                    user_id: UserId(row.get(1)?),
                    last_claim_at: at_str.parse().map_err(|e: chrono::ParseError| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                })
            },
        )
        .optional()?;

    Ok(mark)
}

fn upsert_claim_mark_on(conn: &Connection, mark: &ClaimMark) -> Result<()> {
    conn.execute(
        "INSERT INTO claim_marks (team_id, user_id, last_claim_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(team_id, user_id) DO UPDATE SET
             last_claim_at = excluded.last_claim_at",
        params![
            mark.team_id.as_str(),
            mark.user_id.as_str(),
            mark.last_claim_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn record_event_on(conn: &Connection, kind: EventKind) -> Result<Event> {
    let now = Utc::now();

    conn.execute(
        "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
        params![
            now.to_rfc3339(),
            serde_json::to_string(&kind).unwrap_or_default(),
        ],
    )?;

    let seq = conn.last_insert_rowid();

    Ok(Event {
        seq: seq as u64,
        timestamp: now,
        kind,
    })
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

fn row_to_queued_line(row: &rusqlite::Row) -> std::result::Result<QueuedLine, String> {
    let id_str: String = row.get(0).map_err(|e| e.to_string())?;
    let added_at_str: String = row.get(4).map_err(|e| e.to_string())?;

    Ok(QueuedLine {
        id: LineId(id_str.parse().map_err(|e: uuid::Error| e.to_string())?),
        team_id: TeamId(row.get(1).map_err(|e| e.to_string())?),
        content: row.get(2).map_err(|e| e.to_string())?,
        added_by: UserId(row.get(3).map_err(|e| e.to_string())?),
        added_at: added_at_str
            .parse()
            .map_err(|_| "invalid added_at".to_string())?,
    })
}

fn row_to_history_entry(row: &rusqlite::Row) -> std::result::Result<HistoryEntry, String> {
    let id_str: String = row.get(0).map_err(|e| e.to_string())?;
    let claimed_at_str: String = row.get(5).map_err(|e| e.to_string())?;
    let original_at_str: String = row.get(7).map_err(|e| e.to_string())?;

    Ok(HistoryEntry {
        id: EntryId(id_str.parse().map_err(|e: uuid::Error| e.to_string())?),
        team_id: TeamId(row.get(1).map_err(|e| e.to_string())?),
        content: row.get(2).map_err(|e| e.to_string())?,
        claimed_by: UserId(row.get(3).map_err(|e| e.to_string())?),
        claimed_by_name: row.get(4).map_err(|e| e.to_string())?,
        claimed_at: claimed_at_str
            .parse()
            .map_err(|_| "invalid claimed_at".to_string())?,
        original_added_by: UserId(row.get(6).map_err(|e| e.to_string())?),
        original_added_at: original_at_str
            .parse()
            .map_err(|_| "invalid original_added_at".to_string())?,
    })
}
