//! Duplicate suppression over the delivery log
//!
//! A candidate is a duplicate when a successful delivery record already
//! exists for its (fingerprint, channel_id) pair. The check is
//! side-effect free; recording happens only after dispatch.

use crate::error::Result;
use crate::store::Database;

pub struct Deduplicator {
    db: Database,
}

impl Deduplicator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// No false negatives: any fingerprint with a recorded success is
    /// reported as a duplicate. Hash collisions (false positives) are an
    /// accepted risk of the fingerprinting scheme.
    pub async fn is_duplicate(&self, fingerprint: &str, channel_id: &str) -> Result<bool> {
        self.db.has_successful_record(fingerprint, channel_id).await
    }
}
