//! SQLite-backed message queue
//!
//! Messages are rows with a `visible_at` timestamp. Receiving a message moves
//! `visible_at` forward by the visibility timeout and stamps a fresh receipt,
//! so an unacknowledged message reappears once its lease expires. Messages
//! received more than `max_receive_count` times are dead-lettered.

use crate::model::WorkMessage;
use crate::queue::{Delivery, LeaseHandle, MessageQueue, QueueError, QueueResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const QUEUE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    body TEXT NOT NULL,
    attributes TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'ready',
    visible_at INTEGER NOT NULL,
    receipt TEXT,
    receive_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_visible ON messages(state, visible_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_receipt ON messages(receipt);
"#;

const STATE_READY: &str = "ready";
const STATE_DEAD: &str = "dead";

/// Message counts by delivery state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Ready and visible now
    pub visible: u64,
    /// Ready but leased or delayed
    pub in_flight: u64,
    /// Dead-lettered
    pub dead: u64,
}

pub struct SqliteQueue {
    conn: Mutex<Connection>,
    visibility_timeout: Duration,
    max_receive_count: u32,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl SqliteQueue {
    /// Opens (or creates) the queue database at `path`
    pub fn new(
        path: &Path,
        visibility_timeout: Duration,
        max_receive_count: u32,
    ) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        Self::with_connection(conn, visibility_timeout, max_receive_count)
    }

    pub fn open_in_memory(visibility_timeout: Duration, max_receive_count: u32) -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, visibility_timeout, max_receive_count)
    }

    fn with_connection(
        conn: Connection,
        visibility_timeout: Duration,
        max_receive_count: u32,
    ) -> QueueResult<Self> {
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
            max_receive_count,
        })
    }

    fn conn(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| QueueError::LockPoisoned)
    }

    /// Counts messages by delivery state
    pub fn depth(&self) -> QueueResult<QueueDepth> {
        let now = now_millis();
        let conn = self.conn()?;
        let (visible, in_flight, dead): (i64, i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN state = ?1 AND visible_at <= ?3 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = ?1 AND visible_at > ?3 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN state = ?2 THEN 1 ELSE 0 END), 0)
             FROM messages",
            params![STATE_READY, STATE_DEAD, now],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(QueueDepth {
            visible: visible as u64,
            in_flight: in_flight as u64,
            dead: dead as u64,
        })
    }

    /// Lists dead-lettered messages with the reason they were parked
    pub fn dead_letters(&self) -> QueueResult<Vec<(i64, String, Option<String>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, last_error FROM messages WHERE state = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![STATE_DEAD], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn dead_letter(conn: &Connection, id: i64, reason: &str) -> QueueResult<()> {
        conn.execute(
            "UPDATE messages SET state = ?1, receipt = NULL, last_error = ?2 WHERE id = ?3",
            params![STATE_DEAD, reason, id],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn send(&self, message: &WorkMessage) -> QueueResult<()> {
        let body = message.to_body()?;
        let attributes = serde_json::to_string(&message.attributes())?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (kind, body, attributes, state, visible_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.kind().as_str(),
                body,
                attributes,
                STATE_READY,
                now_millis(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn receive(&self) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn()?;
        loop {
            let now = now_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let candidate: Option<(i64, String, String, u32)> = tx
                .query_row(
                    "SELECT id, body, attributes, receive_count FROM messages
                     WHERE state = ?1 AND visible_at <= ?2
                     ORDER BY visible_at, id LIMIT 1",
                    params![STATE_READY, now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((id, body, attributes, receive_count)) = candidate else {
                tx.commit()?;
                return Ok(None);
            };

            if receive_count >= self.max_receive_count {
                tracing::warn!(
                    message_id = id,
                    receive_count,
                    "Dead-lettering message after too many deliveries"
                );
                Self::dead_letter(&tx, id, "max receive count exceeded")?;
                tx.commit()?;
                continue;
            }

            let decoded = serde_json::from_str::<BTreeMap<String, String>>(&attributes)
                .map_err(QueueError::from)
                .and_then(|attrs| WorkMessage::from_parts(&body, &attrs).map_err(QueueError::from));
            let message = match decoded {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(message_id = id, "Dead-lettering undecodable message: {}", e);
                    Self::dead_letter(&tx, id, &e.to_string())?;
                    tx.commit()?;
                    continue;
                }
            };

            let receipt = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE messages SET receipt = ?1, visible_at = ?2, receive_count = receive_count + 1
                 WHERE id = ?3",
                params![receipt, now + millis(self.visibility_timeout), id],
            )?;
            tx.commit()?;

            return Ok(Some(Delivery {
                message,
                lease: LeaseHandle(receipt),
                receive_count: receive_count + 1,
            }));
        }
    }

    async fn ack(&self, lease: &LeaseHandle) -> QueueResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM messages WHERE receipt = ?1",
            params![lease.as_str()],
        )?;
        if deleted == 0 {
            return Err(QueueError::LeaseLost(lease.0.clone()));
        }
        Ok(())
    }

    async fn release(&self, lease: &LeaseHandle, delay: Duration) -> QueueResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages SET receipt = NULL, visible_at = ?1 WHERE receipt = ?2 AND state = ?3",
            params![now_millis() + millis(delay), lease.as_str(), STATE_READY],
        )?;
        if updated == 0 {
            return Err(QueueError::LeaseLost(lease.0.clone()));
        }
        Ok(())
    }
}
