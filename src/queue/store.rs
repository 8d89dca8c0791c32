//! SQLite persistence for the outbound queue
//!
//! Every queue mutation is written through before it becomes visible, so a
//! queued panic alert survives a crash or reboot.

use crate::channel::types::ChannelPreference;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::types::{AttemptRecord, DeadLetter, Priority, QueueEntry, QueuePayload};
use bytes::Bytes;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, seq, priority, channel, payload_kind, payload, created_at, \
                             attempts, max_attempts, last_attempt_at, history";

pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    /// Open (or create) a queue database file
    pub async fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    /// Queue store with in-memory database (lost on drop)
    pub async fn new_in_memory() -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // a single connection that is never recycled, or the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> QueueResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbound_entries (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                channel TEXT NOT NULL,
                payload_kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                last_attempt_at INTEGER,
                history TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                channel TEXT NOT NULL,
                payload_kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                last_attempt_at INTEGER,
                history TEXT NOT NULL,
                reason TEXT NOT NULL,
                dead_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_draw ON outbound_entries(priority, created_at, seq)",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_dead_letters_at ON dead_letters(dead_at)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn insert(&self, entry: &QueueEntry) -> QueueResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, entry).await
    }

    /// Persist attempt bookkeeping for an entry that stays queued
    pub async fn update_attempts(&self, entry: &QueueEntry) -> QueueResult<()> {
        let history = serde_json::to_string(&entry.history)?;

        let result = sqlx::query(
            "UPDATE outbound_entries SET attempts = ?, last_attempt_at = ?, history = ? WHERE id = ?",
        )
        .bind(entry.attempts as i64)
        .bind(entry.last_attempt_at.map(|at| at as i64))
        .bind(history)
        .bind(entry.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(entry.id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM outbound_entries WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move an entry to the dead-letter table in one transaction, then trim
    /// the dead-letter table to its newest `keep` rows
    pub async fn bury(&self, dead: &DeadLetter, keep: usize) -> QueueResult<u64> {
        let mut tx = self.pool.begin().await?;
        let pruned = bury_entry(&mut tx, dead, keep).await?;
        tx.commit().await?;
        Ok(pruned)
    }

    /// Insert `entry` and bury the evicted `dead` entry as one unit: either
    /// both land or neither does
    pub async fn insert_evicting(
        &self,
        entry: &QueueEntry,
        dead: &DeadLetter,
        keep: usize,
    ) -> QueueResult<u64> {
        let mut tx = self.pool.begin().await?;
        insert_entry(&mut tx, entry).await?;
        let pruned = bury_entry(&mut tx, dead, keep).await?;
        tx.commit().await?;
        Ok(pruned)
    }

    /// All pending entries in draw order
    pub async fn load_entries(&self) -> QueueResult<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM outbound_entries ORDER BY priority, created_at, seq",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Dead letters, newest first
    pub async fn load_dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        let rows = sqlx::query(&format!(
            "SELECT {}, reason, dead_at FROM dead_letters ORDER BY dead_at DESC, rowid DESC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut dead_letters = Vec::with_capacity(rows.len());
        for row in &rows {
            dead_letters.push(DeadLetter {
                entry: entry_from_row(row)?,
                reason: row.try_get("reason")?,
                dead_at: row.try_get::<i64, _>("dead_at")? as u64,
            });
        }
        Ok(dead_letters)
    }

    pub async fn count_dead_letters(&self) -> QueueResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }

    /// Highest insertion sequence ever handed out, across both tables
    pub async fn max_seq(&self) -> QueueResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT MAX(seq) as max_seq FROM (
                SELECT seq FROM outbound_entries UNION ALL SELECT seq FROM dead_letters
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Option<i64>, _>("max_seq")?.unwrap_or(0))
    }

    /// Close database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn entry_from_row(row: &SqliteRow) -> QueueResult<QueueEntry> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| QueueError::CorruptEntry(format!("{}: {}", id, e)))?;

    let rank: i64 = row.try_get("priority")?;
    let priority = u8::try_from(rank)
        .ok()
        .and_then(Priority::from_rank)
        .ok_or_else(|| QueueError::CorruptEntry(format!("{}: priority {}", id, rank)))?;

    let channel: String = row.try_get("channel")?;
    let channel = ChannelPreference::from_str(&channel)
        .map_err(|e| QueueError::CorruptEntry(format!("{}: {}", id, e)))?;

    let kind: String = row.try_get("payload_kind")?;
    let raw: Vec<u8> = row.try_get("payload")?;
    let payload = match kind.as_str() {
        "text" => QueuePayload::Text(
            String::from_utf8(raw)
                .map_err(|e| QueueError::CorruptEntry(format!("{}: {}", id, e)))?,
        ),
        "bytes" => QueuePayload::Bytes(Bytes::from(raw)),
        other => {
            return Err(QueueError::CorruptEntry(format!(
                "{}: payload kind {}",
                id, other
            )))
        }
    };

    let history: Vec<AttemptRecord> = serde_json::from_str(&row.try_get::<String, _>("history")?)?;

    Ok(QueueEntry {
        id,
        priority,
        channel,
        payload,
        created_at: row.try_get::<i64, _>("created_at")? as u64,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        last_attempt_at: row
            .try_get::<Option<i64>, _>("last_attempt_at")?
            .map(|at| at as u64),
        history,
        seq: row.try_get("seq")?,
    })
}

async fn insert_entry(conn: &mut SqliteConnection, entry: &QueueEntry) -> QueueResult<()> {
    let history = serde_json::to_string(&entry.history)?;

    sqlx::query(
        r#"
        INSERT INTO outbound_entries
        (id, seq, priority, channel, payload_kind, payload, created_at,
         attempts, max_attempts, last_attempt_at, history)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.seq)
    .bind(entry.priority.rank() as i64)
    .bind(entry.channel.as_str())
    .bind(entry.payload.kind())
    .bind(entry.payload.as_bytes())
    .bind(entry.created_at as i64)
    .bind(entry.attempts as i64)
    .bind(entry.max_attempts as i64)
    .bind(entry.last_attempt_at.map(|at| at as i64))
    .bind(history)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn bury_entry(conn: &mut SqliteConnection, dead: &DeadLetter, keep: usize) -> QueueResult<u64> {
    let entry = &dead.entry;
    let history = serde_json::to_string(&entry.history)?;

    sqlx::query("DELETE FROM outbound_entries WHERE id = ?")
        .bind(entry.id.to_string())
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO dead_letters
        (id, seq, priority, channel, payload_kind, payload, created_at,
         attempts, max_attempts, last_attempt_at, history, reason, dead_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.seq)
    .bind(entry.priority.rank() as i64)
    .bind(entry.channel.as_str())
    .bind(entry.payload.kind())
    .bind(entry.payload.as_bytes())
    .bind(entry.created_at as i64)
    .bind(entry.attempts as i64)
    .bind(entry.max_attempts as i64)
    .bind(entry.last_attempt_at.map(|at| at as i64))
    .bind(history)
    .bind(&dead.reason)
    .bind(dead.dead_at as i64)
    .execute(&mut *conn)
    .await?;

    let pruned = sqlx::query(
        r#"
        DELETE FROM dead_letters WHERE id NOT IN (
            SELECT id FROM dead_letters ORDER BY dead_at DESC, rowid DESC LIMIT ?
        )
        "#,
    )
    .bind(keep as i64)
    .execute(&mut *conn)
    .await?;

    Ok(pruned.rows_affected())
}
