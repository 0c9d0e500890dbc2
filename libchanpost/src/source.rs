//! Content sources feeding the scheduler
//!
//! A source yields batches of candidate posts for a channel. The durable
//! queue in the state store is the production source; the mock source
//! drives deterministic scheduler tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ChanpostError, Result};
use crate::store::Database;
use crate::types::CandidatePost;

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the next batch of candidates for a channel, oldest first.
    ///
    /// An empty batch means nothing is pending; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ChanpostError::SourceUnavailable`] when the source
    /// cannot currently be read. The scheduler treats that as a skipped
    /// cycle, not a reason to stop.
    async fn fetch(&self, channel_id: &str) -> Result<Vec<CandidatePost>>;
}

/// Production source backed by the durable candidate queue.
pub struct QueueSource {
    db: Database,
    batch_size: usize,
}

impl QueueSource {
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self { db, batch_size }
    }
}

#[async_trait]
impl ContentSource for QueueSource {
    async fn fetch(&self, channel_id: &str) -> Result<Vec<CandidatePost>> {
        self.db.due_candidates(channel_id, self.batch_size).await
    }
}

/// Scripted source for tests: hands out pre-loaded batches in order,
/// then empty batches. Can be flipped to unavailable.
pub struct MockSource {
    batches: Mutex<Vec<Vec<CandidatePost>>>,
    unavailable: Mutex<bool>,
}

impl MockSource {
    pub fn new(batches: Vec<Vec<CandidatePost>>) -> Self {
        Self {
            batches: Mutex::new(batches),
            unavailable: Mutex::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch(&self, _channel_id: &str) -> Result<Vec<CandidatePost>> {
        if *self.unavailable.lock().unwrap() {
            return Err(ChanpostError::SourceUnavailable(
                "mock source offline".to_string(),
            ));
        }

        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(batches.remove(0))
        }
    }
}
