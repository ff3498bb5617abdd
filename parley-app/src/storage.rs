//! SQLite log of finished conversations.

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_secs: i64,
    /// "disconnected" or "error".
    pub final_state: String,
    pub error: Option<String>,
    pub frames_sent: usize,
    pub buffers_played: u64,
    pub interruptions: u64,
    pub transcript: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRecordInput {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub final_state: String,
    pub error: Option<String>,
    pub frames_sent: usize,
    pub buffers_played: u64,
    pub interruptions: u64,
    pub transcript: String,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    db_path: PathBuf,
}

impl LocalStore {
    pub fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, String> {
        Connection::open(&self.db_path).map_err(|e| e.to_string())
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS conversation_history (
              id TEXT PRIMARY KEY,
              started_at INTEGER NOT NULL,
              ended_at INTEGER NOT NULL,
              final_state TEXT NOT NULL,
              error TEXT,
              frames_sent INTEGER NOT NULL DEFAULT 0,
              buffers_played INTEGER NOT NULL DEFAULT 0,
              interruptions INTEGER NOT NULL DEFAULT 0,
              transcript TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_conversation_started_at
              ON conversation_history(started_at DESC);
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn insert_conversation(&self, input: ConversationRecordInput) -> Result<String, String> {
        let id = new_id("conv");
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO conversation_history
            (id, started_at, ended_at, final_state, error, frames_sent, buffers_played, interruptions, transcript)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                id,
                input.started_at.timestamp(),
                input.ended_at.timestamp(),
                input.final_state,
                input.error,
                input.frames_sent as i64,
                input.buffers_played as i64,
                input.interruptions as i64,
                input.transcript
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(id)
    }

    /// Newest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ConversationRecord>, String> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, started_at, ended_at, final_state, error, frames_sent, buffers_played, interruptions, transcript
                 FROM conversation_history ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query(params![limit.clamp(1, 500) as i64])
            .map_err(|e| e.to_string())?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let started: i64 = row.get(1).map_err(|e| e.to_string())?;
            let ended: i64 = row.get(2).map_err(|e| e.to_string())?;
            items.push(ConversationRecord {
                id: row.get(0).map_err(|e| e.to_string())?,
                started_at: ts_to_rfc3339(started),
                ended_at: ts_to_rfc3339(ended),
                duration_secs: (ended - started).max(0),
                final_state: row.get(3).map_err(|e| e.to_string())?,
                error: row.get(4).map_err(|e| e.to_string())?,
                frames_sent: row.get::<_, i64>(5).map_err(|e| e.to_string())? as usize,
                buffers_played: row.get::<_, i64>(6).map_err(|e| e.to_string())? as u64,
                interruptions: row.get::<_, i64>(7).map_err(|e| e.to_string())? as u64,
                transcript: row.get(8).map_err(|e| e.to_string())?,
            });
        }
        Ok(items)
    }

    /// Delete conversations that started more than `retention_days` ago.
    pub fn prune_history(&self, retention_days: usize) -> Result<usize, String> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let conn = self.open()?;
        let changed = conn
            .execute(
                "DELETE FROM conversation_history WHERE started_at < ?1",
                params![cutoff.timestamp()],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed)
    }
}

fn ts_to_rfc3339(ts: i64) -> String {
    let dt: DateTime<Utc> = Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);
    dt.to_rfc3339()
}

fn new_id(prefix: &str) -> String {
    format!(
        "{prefix}-{}-{:08x}",
        Utc::now().timestamp_micros(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (LocalStore, PathBuf) {
        let dir = std::env::temp_dir().join(new_id("parley-store"));
        let store = LocalStore::new(dir.join("parley.db")).unwrap();
        (store, dir)
    }

    fn record(started_secs_ago: i64, transcript: &str) -> ConversationRecordInput {
        let started_at = Utc::now() - Duration::seconds(started_secs_ago);
        ConversationRecordInput {
            started_at,
            ended_at: started_at + Duration::seconds(30),
            final_state: "disconnected".into(),
            error: None,
            frames_sent: 120,
            buffers_played: 14,
            interruptions: 1,
            transcript: transcript.into(),
        }
    }

    #[test]
    fn lists_newest_first() {
        let (store, dir) = temp_store();
        store.insert_conversation(record(300, "older")).unwrap();
        store.insert_conversation(record(10, "newer")).unwrap();

        let items = store.list_recent(10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].transcript, "newer");
        assert_eq!(items[1].transcript, "older");
        assert_eq!(items[0].duration_secs, 30);
        assert_eq!(items[0].frames_sent, 120);

        assert_eq!(store.list_recent(1).unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn error_detail_round_trips() {
        let (store, dir) = temp_store();
        let mut failed = record(5, "");
        failed.final_state = "error".into();
        failed.error = Some("Connection error: socket reset".into());
        store.insert_conversation(failed).unwrap();

        let items = store.list_recent(5).unwrap();
        assert_eq!(items[0].final_state, "error");
        assert_eq!(
            items[0].error.as_deref(),
            Some("Connection error: socket reset")
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn prune_removes_only_expired() {
        let (store, dir) = temp_store();
        store
            .insert_conversation(record(10 * 86_400, "expired"))
            .unwrap();
        store.insert_conversation(record(60, "fresh")).unwrap();

        assert_eq!(store.prune_history(7).unwrap(), 1);
        let items = store.list_recent(10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].transcript, "fresh");
        assert_eq!(store.prune_history(0).unwrap(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
