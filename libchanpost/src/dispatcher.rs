//! Dispatch with bounded retries
//!
//! The dispatcher owns the retry loop around a delivery channel.
//! Transient failures are retried with backoff up to the policy ceiling;
//! a transient failure that exhausts its retries is demoted to a
//! permanent outcome so the scheduler records it and moves on.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channel::DeliveryChannel;
use crate::error::{DeliveryError, FailureKind};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::types::CandidatePost;

/// Terminal outcome of one dispatch, after retries.
#[derive(Debug, Clone)]
pub enum Delivery {
    Sent {
        message_id: String,
    },
    /// `Transient` here means dispatch was interrupted before reaching a
    /// terminal outcome (shutdown mid-retry); the candidate stays queued
    /// and nothing is recorded.
    Failed {
        kind: FailureKind,
        error: DeliveryError,
    },
}

pub struct Dispatcher {
    channel: Arc<dyn DeliveryChannel>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn DeliveryChannel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    /// Deliver one candidate, retrying transient failures.
    ///
    /// At most one send reaches the remote per terminal `Sent` outcome;
    /// every retry happens only after the previous attempt failed.
    pub async fn deliver(
        &self,
        post: &CandidatePost,
        channel_id: &str,
        shutdown: &Shutdown,
    ) -> Delivery {
        let mut attempt: u32 = 1;
        loop {
            match self.channel.send(post, channel_id).await {
                Ok(message_id) => {
                    debug!(
                        channel_id,
                        fingerprint = %post.fingerprint,
                        attempt,
                        message_id,
                        "delivered"
                    );
                    return Delivery::Sent { message_id };
                }
                Err(error) if !error.is_transient() => {
                    warn!(channel_id, fingerprint = %post.fingerprint, %error, "permanent delivery failure");
                    return Delivery::Failed {
                        kind: FailureKind::Permanent,
                        error,
                    };
                }
                Err(error) => {
                    if !self.policy.should_retry(attempt) {
                        warn!(
                            channel_id,
                            fingerprint = %post.fingerprint,
                            attempts = attempt,
                            %error,
                            "retries exhausted"
                        );
                        // The exhausted transient failure becomes terminal.
                        return Delivery::Failed {
                            kind: FailureKind::Permanent,
                            error,
                        };
                    }

                    let delay = self.backoff_for(&error, attempt);
                    debug!(
                        channel_id,
                        fingerprint = %post.fingerprint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient delivery failure, backing off"
                    );

                    if !sleep_unless_shutdown(delay, shutdown).await {
                        return Delivery::Failed {
                            kind: FailureKind::Transient,
                            error,
                        };
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// A remote rate limit that names its own retry-after wins over the
    /// policy's exponential backoff.
    fn backoff_for(&self, error: &DeliveryError, attempt: u32) -> Duration {
        match error {
            DeliveryError::RemoteRateLimit {
                retry_after: Some(retry_after),
                ..
            } => (*retry_after).max(self.policy.delay_for(attempt)),
            _ => self.policy.delay_for(attempt),
        }
    }
}

/// Sleep in short slices so a shutdown trigger is noticed promptly.
/// Returns false when interrupted by shutdown.
async fn sleep_unless_shutdown(total: Duration, shutdown: &Shutdown) -> bool {
    const SLICE: Duration = Duration::from_millis(100);

    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.is_triggered() {
            return false;
        }
        let step = remaining.min(SLICE);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !shutdown.is_triggered()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            jitter: Duration::ZERO,
        }
    }

    fn candidate(text: &str) -> CandidatePost {
        CandidatePost::new(text.to_string(), None)
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let channel = Arc::new(MockChannel::success("mock"));
        let dispatcher = Dispatcher::new(channel.clone(), fast_policy(3));

        let outcome = dispatcher
            .deliver(&candidate("hello"), "news", &Shutdown::new())
            .await;
        assert!(matches!(outcome, Delivery::Sent { .. }));
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let channel = Arc::new(MockChannel::new("mock"));
        channel.push_outcome(Err(DeliveryError::Timeout("slow".to_string())));
        channel.push_outcome(Ok("42".to_string()));
        let dispatcher = Dispatcher::new(channel.clone(), fast_policy(3));

        let outcome = dispatcher
            .deliver(&candidate("hello"), "news", &Shutdown::new())
            .await;
        match outcome {
            Delivery::Sent { message_id } => assert_eq!(message_id, "42"),
            other => panic!("expected Sent, got {other:?}"),
        }
        assert_eq!(channel.call_count(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let channel = Arc::new(MockChannel::always_failing(
            "mock",
            DeliveryError::InvalidPayload("too long".to_string()),
        ));
        let dispatcher = Dispatcher::new(channel.clone(), fast_policy(5));

        let outcome = dispatcher
            .deliver(&candidate("hello"), "news", &Shutdown::new())
            .await;
        match outcome {
            Delivery::Failed { kind, error } => {
                assert_eq!(kind, FailureKind::Permanent);
                assert!(matches!(error, DeliveryError::InvalidPayload(_)));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_transient_demotes_to_permanent() {
        let channel = Arc::new(MockChannel::always_failing(
            "mock",
            DeliveryError::Network("connection reset".to_string()),
        ));
        let dispatcher = Dispatcher::new(channel.clone(), fast_policy(3));

        let outcome = dispatcher
            .deliver(&candidate("hello"), "news", &Shutdown::new())
            .await;
        match outcome {
            Delivery::Failed { kind, .. } => assert_eq!(kind, FailureKind::Permanent),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(channel.call_count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let channel = Arc::new(MockChannel::always_failing(
            "mock",
            DeliveryError::Timeout("slow".to_string()),
        ));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        };
        let dispatcher = Dispatcher::new(channel.clone(), policy);

        let shutdown = Shutdown::new();
        shutdown.trigger();

        let outcome = dispatcher.deliver(&candidate("hello"), "news", &shutdown).await;
        match outcome {
            Delivery::Failed { kind, .. } => assert_eq!(kind, FailureKind::Transient),
            other => panic!("expected interrupted Failed, got {other:?}"),
        }
        // One attempt ran; the 60s backoff was skipped
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_retry_after_overrides_policy_delay() {
        let dispatcher = Dispatcher::new(Arc::new(MockChannel::success("mock")), fast_policy(3));

        let limited = DeliveryError::RemoteRateLimit {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(17)),
        };
        assert_eq!(dispatcher.backoff_for(&limited, 1), Duration::from_secs(17));

        let unspecified = DeliveryError::RemoteRateLimit {
            message: "slow down".to_string(),
            retry_after: None,
        };
        assert_eq!(
            dispatcher.backoff_for(&unspecified, 1),
            Duration::from_millis(1)
        );
    }
}
