//! SQLite session journal: sessions, exchanges, and a tool-call audit log.
//!
//! Uses `rusqlite` in synchronous mode behind a mutex; every call is short
//! and made from a scoped accessor, never across an await. WAL mode is
//! enabled so a diagnostics reader can query while a session is writing.
//!
//! The journal is an optional record of what happened. The runtime treats
//! every write as best-effort.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::errors::JournalError;
use super::types::{ComplexityTier, Exchange};

// ─── Types ──────────────────────────────────────────────────────────────────

/// Outcome recorded for one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            _ => Self::Error,
        }
    }
}

/// A row of the `tool_audit` table.
#[derive(Debug, Clone, Serialize)]
pub struct ToolAuditEntry {
    pub id: i64,
    pub session_id: String,
    pub timestamp: String,
    pub tier: ComplexityTier,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub status: AuditStatus,
    pub detail: String,
    pub execution_time_ms: u64,
}

/// A row of the `sessions` table.
#[derive(Debug, Clone, Serialize)]
pub struct JournalSession {
    pub id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub exchange_count: usize,
    pub summary: Option<String>,
}

// ─── SessionJournal ─────────────────────────────────────────────────────────

/// SQLite-backed journal handle.
pub struct SessionJournal {
    conn: Mutex<Connection>,
}

impl SessionJournal {
    /// Open (or create) the journal at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory journal (tests, ephemeral sessions).
    pub fn open_in_memory() -> Result<Self, JournalError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, JournalError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.create_tables()?;
        Ok(journal)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn create_tables(&self) -> Result<(), JournalError> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                exchange_count INTEGER NOT NULL DEFAULT 0,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                user_text TEXT NOT NULL,
                response_text TEXT NOT NULL,
                tier TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                success INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_exchanges_session
                ON exchanges(session_id, id);

            CREATE TABLE IF NOT EXISTS tool_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                tier TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT,
                status TEXT NOT NULL,
                detail TEXT,
                execution_time_ms INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_tool_audit_session
                ON tool_audit(session_id);
            ",
        )?;
        Ok(())
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    pub fn begin_session(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), JournalError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![session_id, started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn end_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        exchange_count: usize,
        summary: &str,
    ) -> Result<(), JournalError> {
        self.conn().execute(
            "UPDATE sessions SET ended_at = ?2, exchange_count = ?3, summary = ?4 WHERE id = ?1",
            params![session_id, ended_at.to_rfc3339(), exchange_count as i64, summary],
        )?;
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<JournalSession>, JournalError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, ended_at, exchange_count, summary
             FROM sessions ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(JournalSession {
                id: row.get(0)?,
                started_at: row.get(1)?,
                ended_at: row.get(2)?,
                exchange_count: row.get::<_, i64>(3)? as usize,
                summary: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ─── Exchanges ──────────────────────────────────────────────────────

    pub fn record_exchange(
        &self,
        session_id: &str,
        exchange: &Exchange,
    ) -> Result<(), JournalError> {
        self.conn().execute(
            "INSERT INTO exchanges
                (session_id, timestamp, user_text, response_text, tier, latency_ms, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                exchange.timestamp.to_rfc3339(),
                exchange.user_text,
                exchange.response_text,
                exchange.tier.as_str(),
                exchange.latency_ms as i64,
                exchange.success,
            ],
        )?;
        Ok(())
    }

    /// All exchanges of a session, oldest first.
    pub fn get_exchanges(&self, session_id: &str) -> Result<Vec<Exchange>, JournalError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, user_text, response_text, tier, latency_ms, success
             FROM exchanges WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let timestamp: String = row.get(0)?;
            let tier: String = row.get(3)?;
            Ok(Exchange {
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                user_text: row.get(1)?,
                response_text: row.get(2)?,
                tier: ComplexityTier::parse(&tier).unwrap_or(ComplexityTier::SimpleReasoning),
                latency_ms: row.get::<_, i64>(4)? as u64,
                success: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ─── Tool Audit ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_call(
        &self,
        session_id: &str,
        tier: ComplexityTier,
        tool_name: &str,
        arguments: &serde_json::Value,
        status: AuditStatus,
        detail: &str,
        execution_time_ms: u64,
    ) -> Result<(), JournalError> {
        self.conn().execute(
            "INSERT INTO tool_audit
                (session_id, tier, tool_name, arguments, status, detail, execution_time_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                tier.as_str(),
                tool_name,
                arguments.to_string(),
                status.as_str(),
                detail,
                execution_time_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_tool_audit(&self, session_id: &str) -> Result<Vec<ToolAuditEntry>, JournalError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, timestamp, tier, tool_name, arguments, status, detail,
                    execution_time_ms
             FROM tool_audit WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let tier: String = row.get(3)?;
            let arguments: Option<String> = row.get(5)?;
            let status: String = row.get(6)?;
            Ok(ToolAuditEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: row.get(2)?,
                tier: ComplexityTier::parse(&tier).unwrap_or(ComplexityTier::ComplexMultiStep),
                tool_name: row.get(4)?,
                arguments: arguments
                    .and_then(|a| serde_json::from_str(&a).ok())
                    .unwrap_or(serde_json::Value::Null),
                status: AuditStatus::parse(&status),
                detail: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                execution_time_ms: row.get::<_, i64>(8)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_journal() -> SessionJournal {
        SessionJournal::open_in_memory().unwrap()
    }

    fn exchange(user: &str, tier: ComplexityTier) -> Exchange {
        Exchange {
            user_text: user.into(),
            response_text: format!("re: {user}"),
            tier,
            latency_ms: 42,
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_begin_and_end_session() {
        let j = test_journal();
        j.begin_session("s1", Utc::now()).unwrap();
        j.begin_session("s1", Utc::now()).unwrap(); // idempotent
        j.end_session("s1", Utc::now(), 3, "three turns").unwrap();

        let sessions = j.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].exchange_count, 3);
        assert_eq!(sessions[0].summary.as_deref(), Some("three turns"));
        assert!(sessions[0].ended_at.is_some());
    }

    #[test]
    fn test_exchanges_round_trip_in_order() {
        let j = test_journal();
        j.begin_session("s1", Utc::now()).unwrap();
        j.record_exchange("s1", &exchange("hi", ComplexityTier::Instant)).unwrap();
        j.record_exchange("s1", &exchange("why", ComplexityTier::SimpleReasoning))
            .unwrap();

        let rows = j.get_exchanges("s1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_text, "hi");
        assert_eq!(rows[1].tier, ComplexityTier::SimpleReasoning);
        assert_eq!(rows[1].latency_ms, 42);
    }

    #[test]
    fn test_exchange_for_unknown_session_violates_foreign_key() {
        let j = test_journal();
        let err = j
            .record_exchange("missing", &exchange("x", ComplexityTier::Instant))
            .unwrap_err();
        assert!(matches!(err, JournalError::Database { .. }));
    }

    #[test]
    fn test_tool_audit() {
        let j = test_journal();
        j.begin_session("s1", Utc::now()).unwrap();
        j.record_tool_call(
            "s1",
            ComplexityTier::ExplicitFact,
            "clock.current_time",
            &serde_json::json!({}),
            AuditStatus::Success,
            "It's 3:04 PM.",
            2,
        )
        .unwrap();
        j.record_tool_call(
            "s1",
            ComplexityTier::ComplexMultiStep,
            "filesystem.read_file",
            &serde_json::json!({"path": "/nope"}),
            AuditStatus::Error,
            "not found",
            5,
        )
        .unwrap();

        let entries = j.get_tool_audit("s1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, AuditStatus::Success);
        assert_eq!(entries[1].arguments["path"], "/nope");
        assert_eq!(entries[1].tier, ComplexityTier::ComplexMultiStep);
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.db");
        let j = SessionJournal::open(&path).unwrap();
        j.begin_session("s1", Utc::now()).unwrap();
        drop(j);

        let reopened = SessionJournal::open(&path).unwrap();
        assert_eq!(reopened.list_sessions().unwrap().len(), 1);
    }
}
