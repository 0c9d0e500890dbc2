//! Chanpost - scheduled content delivery for Telegram channels
//!
//! This library provides the core posting pipeline: a durable candidate
//! queue, content deduplication, per-channel and global rate limiting,
//! and a retrying dispatcher, all driven by a per-channel scheduling loop.

pub mod channel;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ChanpostError, DeliveryError, FailureKind, Result};
pub use scheduler::Scheduler;
pub use shutdown::Shutdown;
pub use store::Database;
pub use types::{CandidatePost, ChannelQuota, DeliveryStatus, PostRecord, Schedule};
