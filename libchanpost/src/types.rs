//! Core types for Chanpost

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reserved quota key for the process-wide send counter.
pub const GLOBAL_QUOTA_KEY: &str = "*";

/// Compute the content fingerprint for a candidate payload.
///
/// Normalization collapses whitespace runs and trims the text so that
/// incidental formatting differences map to the same fingerprint. The
/// media reference, when present, is folded in after a separator byte
/// so `("a b", None)` and `("a", Some("b"))` stay distinct.
pub fn fingerprint(text: &str, media_ref: Option<&str>) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    if let Some(media) = media_ref {
        hasher.update([0u8]);
        hasher.update(media.trim().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A post produced by the content source, not yet accepted or rejected
/// for delivery. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePost {
    pub fingerprint: String,
    pub text: String,
    pub media_ref: Option<String>,
    pub created_at: i64,
}

impl CandidatePost {
    pub fn new(text: String, media_ref: Option<String>) -> Self {
        let fingerprint = fingerprint(&text, media_ref.as_deref());
        Self {
            fingerprint,
            text,
            media_ref,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable, append-only evidence that a delivery attempt reached a
/// terminal outcome. Never mutated after creation; at most one
/// successful record exists per `(fingerprint, channel_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Option<i64>,
    pub fingerprint: String,
    pub channel_id: String,
    pub sent_at: i64,
    pub status: DeliveryStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl PostRecord {
    /// Record for a successful delivery.
    pub fn sent(fingerprint: &str, channel_id: &str, sent_at: i64, message_id: String) -> Self {
        Self {
            id: None,
            fingerprint: fingerprint.to_string(),
            channel_id: channel_id.to_string(),
            sent_at,
            status: DeliveryStatus::Sent,
            message_id: Some(message_id),
            error: None,
        }
    }

    /// Record for a terminally failed delivery.
    pub fn failed(fingerprint: &str, channel_id: &str, sent_at: i64, error: String) -> Self {
        Self {
            id: None,
            fingerprint: fingerprint.to_string(),
            channel_id: channel_id.to_string(),
            sent_at,
            status: DeliveryStatus::Failed,
            message_id: None,
            error: Some(error),
        }
    }
}

/// Send counter for one channel over one fixed window.
///
/// `sent_count` never exceeds `max_per_window` within a window; the
/// counter resets when the window elapses. The key [`GLOBAL_QUOTA_KEY`]
/// carries the process-wide counter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelQuota {
    pub channel_id: String,
    pub window_start: i64,
    pub sent_count: u32,
    pub window_length: i64,
    pub max_per_window: u32,
}

impl ChannelQuota {
    pub fn window_end(&self) -> i64 {
        self.window_start + self.window_length
    }

    pub fn remaining(&self) -> u32 {
        self.max_per_window.saturating_sub(self.sent_count)
    }
}

/// Per-channel posting cadence, owned by the scheduler.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub channel_id: String,
    /// Seconds between cycles.
    pub cadence: i64,
    pub next_due_at: i64,
}

impl Schedule {
    pub fn new(channel_id: String, cadence: i64, now: i64) -> Self {
        Self {
            channel_id,
            cadence,
            next_due_at: now,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        now >= self.next_due_at
    }

    /// Advance the next due time by one cadence from `now`, keeping
    /// `next_due_at` monotonically non-decreasing.
    pub fn advance(&mut self, now: i64) {
        self.next_due_at = (now + self.cadence).max(self.next_due_at);
    }

    /// Push the next due time out to `resume_at` after a rate-limit
    /// denial, never moving it backwards.
    pub fn defer_until(&mut self, resume_at: i64) {
        self.next_due_at = resume_at.max(self.next_due_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("hello world", None);
        let b = fingerprint("hello world", None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64, "sha256 hex digest");
    }

    #[test]
    fn test_fingerprint_ignores_incidental_formatting() {
        let canonical = fingerprint("hello world", None);
        assert_eq!(fingerprint("  hello   world  ", None), canonical);
        assert_eq!(fingerprint("hello\n\tworld", None), canonical);
    }

    #[test]
    fn test_fingerprint_differs_for_different_content() {
        assert_ne!(fingerprint("hello world", None), fingerprint("hello worlds", None));
    }

    #[test]
    fn test_fingerprint_media_ref_is_significant() {
        let text_only = fingerprint("caption", None);
        let with_media = fingerprint("caption", Some("photo://abc"));
        assert_ne!(text_only, with_media);

        // Concatenation must not collide with the separated form
        assert_ne!(fingerprint("a b", None), fingerprint("a", Some("b")));
    }

    #[test]
    fn test_candidate_new_computes_fingerprint() {
        let candidate = CandidatePost::new("breaking news".to_string(), None);
        assert_eq!(candidate.fingerprint, fingerprint("breaking news", None));
        assert!(candidate.created_at > 1_600_000_000);
    }

    #[test]
    fn test_delivery_status_display() {
        assert_eq!(DeliveryStatus::Sent.to_string(), "sent");
        assert_eq!(DeliveryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_post_record_sent() {
        let record = PostRecord::sent("abc", "news", 1000, "42".to_string());
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.message_id, Some("42".to_string()));
        assert_eq!(record.error, None);
    }

    #[test]
    fn test_post_record_failed() {
        let record = PostRecord::failed("abc", "news", 1000, "chat not found".to_string());
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.message_id, None);
        assert_eq!(record.error, Some("chat not found".to_string()));
    }

    #[test]
    fn test_quota_window_end_and_remaining() {
        let quota = ChannelQuota {
            channel_id: "news".to_string(),
            window_start: 3600,
            sent_count: 2,
            window_length: 3600,
            max_per_window: 5,
        };
        assert_eq!(quota.window_end(), 7200);
        assert_eq!(quota.remaining(), 3);
    }

    #[test]
    fn test_quota_remaining_saturates() {
        let quota = ChannelQuota {
            channel_id: "news".to_string(),
            window_start: 0,
            sent_count: 9,
            window_length: 60,
            max_per_window: 3,
        };
        assert_eq!(quota.remaining(), 0);
    }

    #[test]
    fn test_schedule_advance_is_monotonic() {
        let mut schedule = Schedule::new("news".to_string(), 300, 1000);
        assert!(schedule.is_due(1000));

        schedule.advance(1000);
        assert_eq!(schedule.next_due_at, 1300);

        // Advancing from an earlier "now" never moves the schedule back
        schedule.advance(500);
        assert_eq!(schedule.next_due_at, 1300);

        schedule.advance(1300);
        assert_eq!(schedule.next_due_at, 1600);
    }

    #[test]
    fn test_schedule_defer_until_never_rewinds() {
        let mut schedule = Schedule::new("news".to_string(), 300, 1000);
        schedule.advance(1000);
        schedule.defer_until(1200);
        assert_eq!(schedule.next_due_at, 1300);

        schedule.defer_until(2000);
        assert_eq!(schedule.next_due_at, 2000);
    }
}
