//! Durable state store for Chanpost
//!
//! Wraps a SQLite pool holding the append-only delivery log, the
//! rate-limit window counters, and the candidate queue.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::types::{CandidatePost, ChannelQuota, DeliveryStatus, PostRecord};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the state store at the given path and run
    /// pending migrations. A failure here is fatal for the process.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            // Every pooled connection would otherwise open its own empty
            // in-memory database; pin the store to one connection that
            // never gets recycled.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await
                .map_err(StoreError::Sqlx)?
        } else {
            let expanded = shellexpand::tilde(db_path).to_string();
            let path = Path::new(&expanded);

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
                }
            }

            // Forward slashes keep the SQLite URL portable; mode=rwc
            // creates the file on first run.
            let db_url = format!("sqlite://{}?mode=rwc", expanded.replace('\\', "/"));
            SqlitePool::connect(&db_url).await.map_err(StoreError::Sqlx)?
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::Migration)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Delivery log
    // ------------------------------------------------------------------

    /// Append a terminal delivery outcome.
    ///
    /// The insert either fully persists or has no effect; a second
    /// successful record for the same (fingerprint, channel_id) is
    /// rejected by the unique index.
    pub async fn record(&self, record: &PostRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO post_records (fingerprint, channel_id, sent_at, status, message_id, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.channel_id)
        .bind(record.sent_at)
        .bind(record.status.as_str())
        .bind(&record.message_id)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    /// Whether a successful delivery has already been recorded for this
    /// (fingerprint, channel_id) pair.
    pub async fn has_successful_record(&self, fingerprint: &str, channel_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM post_records
            WHERE fingerprint = ? AND channel_id = ? AND status = 'sent'
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(row.is_some())
    }

    /// Whether any terminal outcome (sent or failed) exists for the pair.
    pub async fn has_terminal_record(&self, fingerprint: &str, channel_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM post_records
            WHERE fingerprint = ? AND channel_id = ?
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(row.is_some())
    }

    /// Most recent delivery records, optionally filtered by channel.
    pub async fn recent_records(
        &self,
        channel_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PostRecord>> {
        let rows = if let Some(channel) = channel_id {
            sqlx::query(
                r#"
                SELECT id, fingerprint, channel_id, sent_at, status, message_id, error
                FROM post_records
                WHERE channel_id = ?
                ORDER BY sent_at DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(channel)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT id, fingerprint, channel_id, sent_at, status, message_id, error
                FROM post_records
                ORDER BY sent_at DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(StoreError::Sqlx)?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    // ------------------------------------------------------------------
    // Rate-limit windows
    // ------------------------------------------------------------------

    /// Read the quota for a channel's current window. Window parameters
    /// come from the caller; only the counter is persisted.
    pub async fn get_quota(
        &self,
        channel_id: &str,
        window_start: i64,
        window_length: i64,
        max_per_window: u32,
    ) -> Result<ChannelQuota> {
        let row = sqlx::query_as::<_, (Option<i64>,)>(
            r#"
            SELECT sent_count FROM rate_limits
            WHERE channel_id = ? AND window_start = ?
            "#,
        )
        .bind(channel_id)
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(ChannelQuota {
            channel_id: channel_id.to_string(),
            window_start,
            sent_count: row.and_then(|r| r.0).unwrap_or(0) as u32,
            window_length,
            max_per_window,
        })
    }

    /// Persist a quota counter directly. The rate limiter's atomic
    /// check-and-increment path is preferred for contended updates.
    pub async fn save_quota(&self, quota: &ChannelQuota) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits (channel_id, window_start, sent_count)
            VALUES (?, ?, ?)
            ON CONFLICT(channel_id, window_start)
            DO UPDATE SET sent_count = excluded.sent_count
            "#,
        )
        .bind(&quota.channel_id)
        .bind(quota.window_start)
        .bind(quota.sent_count as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    /// Delete window counters that ended before the cutoff.
    pub async fn delete_old_windows(&self, cutoff_window: i64) -> Result<()> {
        sqlx::query("DELETE FROM rate_limits WHERE window_start < ?")
            .bind(cutoff_window)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Candidate queue
    // ------------------------------------------------------------------

    /// Add a candidate to the queue for a channel. Re-enqueueing the
    /// same fingerprint is a no-op.
    pub async fn enqueue(&self, candidate: &CandidatePost, channel_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO queue (fingerprint, channel_id, text, media_ref, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&candidate.fingerprint)
        .bind(channel_id)
        .bind(&candidate.text)
        .bind(&candidate.media_ref)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    /// Oldest queued candidates for a channel, up to `limit`.
    pub async fn due_candidates(&self, channel_id: &str, limit: usize) -> Result<Vec<CandidatePost>> {
        let rows = sqlx::query(
            r#"
            SELECT fingerprint, text, media_ref, created_at
            FROM queue
            WHERE channel_id = ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(channel_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(rows
            .iter()
            .map(|r| CandidatePost {
                fingerprint: r.get("fingerprint"),
                text: r.get("text"),
                media_ref: r.get("media_ref"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Remove a candidate from the queue once it reached a terminal
    /// outcome (or was identified as a duplicate).
    pub async fn remove_candidate(&self, fingerprint: &str, channel_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue WHERE fingerprint = ? AND channel_id = ?")
            .bind(fingerprint)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    /// All queued candidates with their channel, oldest first.
    pub async fn list_queue(&self, channel_id: Option<&str>) -> Result<Vec<(String, CandidatePost)>> {
        let rows = if let Some(channel) = channel_id {
            sqlx::query(
                r#"
                SELECT channel_id, fingerprint, text, media_ref, created_at
                FROM queue WHERE channel_id = ? ORDER BY created_at ASC
                "#,
            )
            .bind(channel)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT channel_id, fingerprint, text, media_ref, created_at
                FROM queue ORDER BY created_at ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await
        }
        .map_err(StoreError::Sqlx)?;

        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get("channel_id"),
                    CandidatePost {
                        fingerprint: r.get("fingerprint"),
                        text: r.get("text"),
                        media_ref: r.get("media_ref"),
                        created_at: r.get("created_at"),
                    },
                )
            })
            .collect())
    }
}

fn row_to_record(r: &sqlx::sqlite::SqliteRow) -> PostRecord {
    PostRecord {
        id: r.get("id"),
        fingerprint: r.get("fingerprint"),
        channel_id: r.get("channel_id"),
        sent_at: r.get("sent_at"),
        status: match r.get::<String, _>("status").as_str() {
            "sent" => DeliveryStatus::Sent,
            _ => DeliveryStatus::Failed,
        },
        message_id: r.get("message_id"),
        error: r.get("error"),
    }
}
