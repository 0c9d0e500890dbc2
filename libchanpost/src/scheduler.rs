//! Per-channel posting scheduler
//!
//! Each channel runs an independent worker driving an explicit cycle
//! state machine: Idle -> Fetching -> Filtering -> (Throttled |
//! Dispatching -> Recording) -> Filtering -> ... -> Idle. Shutdown is
//! checked at state boundaries, so in-flight store writes always finish
//! before the worker stops.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channel::DeliveryChannel;
use crate::clock::Clock;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::{ChanpostError, FailureKind, Result};
use crate::rate_limiter::{Decision, RateLimiter};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::source::ContentSource;
use crate::store::Database;
use crate::types::{CandidatePost, PostRecord, Schedule};

/// Where a worker currently is inside one posting cycle.
#[derive(Debug)]
pub enum CycleState {
    Idle,
    Fetching,
    Filtering {
        candidates: Vec<CandidatePost>,
    },
    Throttled {
        resume_at: i64,
    },
    Dispatching {
        candidate: CandidatePost,
        rest: Vec<CandidatePost>,
    },
    Recording {
        candidate: CandidatePost,
        outcome: Delivery,
        rest: Vec<CandidatePost>,
    },
}

pub struct ChannelWorker {
    channel_id: String,
    schedule: Schedule,
    state: CycleState,
    db: Database,
    dedup: Deduplicator,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<Dispatcher>,
    source: Arc<dyn ContentSource>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
}

impl ChannelWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: String,
        cadence: i64,
        db: Database,
        limiter: Arc<RateLimiter>,
        dispatcher: Arc<Dispatcher>,
        source: Arc<dyn ContentSource>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Self {
        let now = clock.now();
        Self {
            schedule: Schedule::new(channel_id.clone(), cadence, now),
            channel_id,
            state: CycleState::Idle,
            dedup: Deduplicator::new(db.clone()),
            db,
            limiter,
            dispatcher,
            source,
            clock,
            shutdown,
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Perform one state transition.
    pub async fn step(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, CycleState::Idle);
        let now = self.clock.now();

        self.state = match state {
            CycleState::Idle => {
                if !self.shutdown.is_triggered() && self.schedule.is_due(now) {
                    CycleState::Fetching
                } else {
                    CycleState::Idle
                }
            }

            CycleState::Fetching => match self.source.fetch(&self.channel_id).await {
                Ok(candidates) => {
                    debug!(
                        channel_id = %self.channel_id,
                        count = candidates.len(),
                        "fetched candidates"
                    );
                    CycleState::Filtering { candidates }
                }
                Err(ChanpostError::SourceUnavailable(reason)) => {
                    // Skipped cycle, not a failure of the worker
                    warn!(channel_id = %self.channel_id, reason, "source unavailable, skipping cycle");
                    self.schedule.advance(now);
                    CycleState::Idle
                }
                Err(e) => return Err(e),
            },

            CycleState::Filtering { mut candidates } => {
                if self.shutdown.is_triggered() {
                    CycleState::Idle
                } else if candidates.is_empty() {
                    self.finish_cycle(now).await?;
                    CycleState::Idle
                } else {
                    let candidate = candidates.remove(0);
                    if self.dedup.is_duplicate(&candidate.fingerprint, &self.channel_id).await? {
                        debug!(
                            channel_id = %self.channel_id,
                            fingerprint = %candidate.fingerprint,
                            "duplicate suppressed"
                        );
                        self.db
                            .remove_candidate(&candidate.fingerprint, &self.channel_id)
                            .await?;
                        CycleState::Filtering { candidates }
                    } else {
                        match self.limiter.try_acquire(&self.db, &self.channel_id, now).await? {
                            Decision::Allowed => CycleState::Dispatching {
                                candidate,
                                rest: candidates,
                            },
                            Decision::Denied { retry_after } => {
                                let resume_at = now + retry_after.as_secs() as i64;
                                info!(
                                    channel_id = %self.channel_id,
                                    resume_at,
                                    "window quota exhausted, throttling"
                                );
                                self.schedule.defer_until(resume_at);
                                CycleState::Throttled { resume_at }
                            }
                        }
                    }
                }
            }

            // The schedule was already deferred; nothing to do until then
            CycleState::Throttled { .. } => CycleState::Idle,

            CycleState::Dispatching { candidate, rest } => {
                let outcome = self
                    .dispatcher
                    .deliver(&candidate, &self.channel_id, &self.shutdown)
                    .await;
                CycleState::Recording {
                    candidate,
                    outcome,
                    rest,
                }
            }

            CycleState::Recording {
                candidate,
                outcome,
                rest,
            } => match outcome {
                Delivery::Sent { message_id } => {
                    self.db
                        .record(&PostRecord::sent(
                            &candidate.fingerprint,
                            &self.channel_id,
                            now,
                            message_id,
                        ))
                        .await?;
                    self.db
                        .remove_candidate(&candidate.fingerprint, &self.channel_id)
                        .await?;
                    CycleState::Filtering { candidates: rest }
                }
                Delivery::Failed {
                    kind: FailureKind::Permanent,
                    error,
                } => {
                    self.db
                        .record(&PostRecord::failed(
                            &candidate.fingerprint,
                            &self.channel_id,
                            now,
                            error.to_string(),
                        ))
                        .await?;
                    self.db
                        .remove_candidate(&candidate.fingerprint, &self.channel_id)
                        .await?;
                    CycleState::Filtering { candidates: rest }
                }
                Delivery::Failed {
                    kind: FailureKind::Transient,
                    error,
                } => {
                    // Interrupted before a terminal outcome: the candidate
                    // stays in the queue and nothing is recorded.
                    debug!(
                        channel_id = %self.channel_id,
                        fingerprint = %candidate.fingerprint,
                        %error,
                        "dispatch interrupted, candidate requeued"
                    );
                    CycleState::Idle
                }
            },
        };

        Ok(())
    }

    async fn finish_cycle(&mut self, now: i64) -> Result<()> {
        self.schedule.advance(now);
        self.limiter
            .cleanup_old_windows(&self.db, now - self.limiter.window_secs())
            .await
    }

    /// Run exactly one posting cycle to completion, ignoring the cadence.
    pub async fn run_cycle_now(&mut self) -> Result<()> {
        self.schedule.next_due_at = self.clock.now();
        self.state = CycleState::Fetching;
        while !matches!(self.state, CycleState::Idle) {
            if let Err(e) = self.step().await {
                self.state = CycleState::Idle;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drive cycles until shutdown is triggered.
    pub async fn run(&mut self) {
        info!(
            channel_id = %self.channel_id,
            cadence_secs = self.schedule.cadence,
            "channel worker started"
        );

        while !self.shutdown.is_triggered() {
            if matches!(self.state, CycleState::Idle) && !self.schedule.is_due(self.clock.now()) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            if let Err(e) = self.step().await {
                error!(channel_id = %self.channel_id, error = %e, "cycle failed");
                self.schedule.advance(self.clock.now());
                self.state = CycleState::Idle;
            }
        }

        info!(channel_id = %self.channel_id, "channel worker stopped");
    }
}

/// Owns one worker per configured channel.
pub struct Scheduler {
    workers: Vec<ChannelWorker>,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        db: Database,
        channel: Arc<dyn DeliveryChannel>,
        source: Arc<dyn ContentSource>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::from_config(
            &config.rate_limits,
            &config.channels,
        )?);
        let dispatcher = Arc::new(Dispatcher::new(
            channel,
            RetryPolicy::from_config(&config.retry),
        ));

        let mut workers = Vec::with_capacity(config.channels.len());
        for channel_config in &config.channels {
            workers.push(ChannelWorker::new(
                channel_config.id.clone(),
                channel_config.cadence_secs()?,
                db.clone(),
                limiter.clone(),
                dispatcher.clone(),
                source.clone(),
                clock.clone(),
                shutdown.clone(),
            ));
        }

        Ok(Self { workers })
    }

    /// Run one cycle for every channel, sequentially.
    pub async fn run_once(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.run_cycle_now().await?;
        }
        Ok(())
    }

    /// Spawn one task per channel and run until shutdown.
    pub async fn run_forever(self) {
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|mut worker| tokio::spawn(async move { worker.run().await }))
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "channel worker task panicked");
            }
        }
    }
}
