//! Delivery channel abstraction and implementations
//!
//! A delivery channel turns a candidate post into a message in a remote
//! destination. Implementations classify their failures as transient or
//! permanent via [`DeliveryError`] so the dispatcher can decide whether
//! a retry makes sense.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::types::CandidatePost;

pub mod telegram;

// Mock channel is available for all builds (not just tests) to support
// integration tests
pub mod mock;

/// Unified interface for message delivery backends.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Deliver a single post to the given destination channel.
    ///
    /// Returns the backend-specific message identifier on success.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] classified by its `kind()`:
    /// transient failures (network faults, timeouts, remote rate limits)
    /// may be retried; permanent failures (bad payload, unknown channel,
    /// rejected credentials) must not be.
    async fn send(&self, post: &CandidatePost, channel_id: &str) -> Result<String, DeliveryError>;

    /// Lowercase identifier for the backend (e.g. "telegram", "mock").
    fn name(&self) -> &str;
}
