//! Rate limiting for channel sends
//!
//! Fixed-window counters per channel plus an optional global counter,
//! persisted in the state store. The check-and-increment runs in a
//! single transaction so concurrent channel loops cannot oversubscribe
//! a window.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::SqliteConnection;

use crate::config::{ChannelConfig, RateLimitConfig};
use crate::error::{Result, StoreError};
use crate::store::Database;
use crate::types::GLOBAL_QUOTA_KEY;

/// Outcome of a quota acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Denied; callers must not retry before `retry_after` elapses.
    Denied { retry_after: Duration },
}

pub struct RateLimiter {
    max_per_window: u32,
    window_secs: i64,
    global_max: Option<u32>,
    /// Per-channel overrides of the window quota.
    overrides: HashMap<String, u32>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_secs: i64, global_max: Option<u32>) -> Self {
        Self {
            max_per_window,
            window_secs,
            global_max,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig, channels: &[ChannelConfig]) -> Result<Self> {
        let mut limiter = Self::new(
            config.max_per_window,
            config.window_secs()?,
            config.global_max_per_window,
        );
        for channel in channels {
            if let Some(limit) = channel.max_per_window {
                limiter.overrides.insert(channel.id.clone(), limit);
            }
        }
        Ok(limiter)
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    fn limit_for(&self, channel_id: &str) -> u32 {
        self.overrides
            .get(channel_id)
            .copied()
            .unwrap_or(self.max_per_window)
    }

    fn window_start(&self, now: i64) -> i64 {
        (now / self.window_secs) * self.window_secs
    }

    /// Acquire one send slot for the channel at time `now`.
    ///
    /// On `Allowed` the channel counter (and the global counter, when a
    /// global ceiling is configured) has already been incremented. On
    /// `Denied` nothing is changed and `retry_after` is the time left in
    /// the current window.
    ///
    /// The check-and-increment takes the write lock up front (`BEGIN
    /// IMMEDIATE`), so concurrent acquirers queue on the lock instead of
    /// failing a deferred read-to-write upgrade with SQLITE_BUSY.
    pub async fn try_acquire(&self, db: &Database, channel_id: &str, now: i64) -> Result<Decision> {
        let window_start = self.window_start(now);
        let retry_after = Duration::from_secs((window_start + self.window_secs - now).max(1) as u64);

        let mut conn = db.pool().acquire().await.map_err(StoreError::Sqlx)?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(StoreError::Sqlx)?;

        match self.acquire_locked(&mut conn, channel_id, window_start).await {
            Ok(true) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(StoreError::Sqlx)?;
                Ok(Decision::Allowed)
            }
            Ok(false) => {
                sqlx::query("ROLLBACK")
                    .execute(&mut *conn)
                    .await
                    .map_err(StoreError::Sqlx)?;
                Ok(Decision::Denied { retry_after })
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Counter checks and increments, run while the write lock is held.
    /// Returns whether the slot was granted.
    async fn acquire_locked(
        &self,
        conn: &mut SqliteConnection,
        channel_id: &str,
        window_start: i64,
    ) -> Result<bool> {
        let channel_count = window_count(&mut *conn, channel_id, window_start).await?;
        if channel_count >= self.limit_for(channel_id) {
            return Ok(false);
        }

        if let Some(global_max) = self.global_max {
            let global_count = window_count(&mut *conn, GLOBAL_QUOTA_KEY, window_start).await?;
            if global_count >= global_max {
                return Ok(false);
            }
            increment_window(&mut *conn, GLOBAL_QUOTA_KEY, window_start).await?;
        }

        increment_window(&mut *conn, channel_id, window_start).await?;
        Ok(true)
    }

    /// Drop window counters that can no longer affect a decision.
    pub async fn cleanup_old_windows(&self, db: &Database, cutoff: i64) -> Result<()> {
        db.delete_old_windows(self.window_start(cutoff)).await
    }
}

async fn window_count(conn: &mut SqliteConnection, key: &str, window_start: i64) -> Result<u32> {
    let row = sqlx::query_as::<_, (Option<i64>,)>(
        r#"
        SELECT sent_count FROM rate_limits
        WHERE channel_id = ? AND window_start = ?
        "#,
    )
    .bind(key)
    .bind(window_start)
    .fetch_optional(conn)
    .await
    .map_err(StoreError::Sqlx)?;

    Ok(row.and_then(|r| r.0).unwrap_or(0) as u32)
}

async fn increment_window(conn: &mut SqliteConnection, key: &str, window_start: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rate_limits (channel_id, window_start, sent_count)
        VALUES (?, ?, 1)
        ON CONFLICT(channel_id, window_start)
        DO UPDATE SET sent_count = sent_count + 1
        "#,
    )
    .bind(key)
    .bind(window_start)
    .execute(conn)
    .await
    .map_err(StoreError::Sqlx)?;

    Ok(())
}
