//! Mock delivery channel for testing
//!
//! A scriptable channel that replays a queue of outcomes and records
//! every call, so dispatcher and scheduler tests can verify retry and
//! suppression behavior without network access.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::channel::DeliveryChannel;
use crate::error::DeliveryError;
use crate::types::CandidatePost;

/// One recorded delivery call.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel_id: String,
    pub text: String,
    pub media_ref: Option<String>,
}

struct MockState {
    /// Outcomes consumed front-to-back; when empty, sends succeed.
    script: VecDeque<Result<String, DeliveryError>>,
    call_count: usize,
    sent: Vec<SentMessage>,
}

pub struct MockChannel {
    name: String,
    delay: Duration,
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                call_count: 0,
                sent: Vec::new(),
            })),
        }
    }

    /// Channel that always succeeds with generated message ids.
    pub fn success(name: &str) -> Self {
        Self::new(name)
    }

    /// Channel that fails every send with the given error.
    pub fn always_failing(name: &str, error: DeliveryError) -> Self {
        let channel = Self::new(name);
        // An empty script means success, so park a long run of failures.
        {
            let mut state = channel.state.lock().unwrap();
            for _ in 0..64 {
                state.script.push_back(Err(error.clone()));
            }
        }
        channel
    }

    /// Queue the outcome for the next unscripted send.
    pub fn push_outcome(&self, outcome: Result<String, DeliveryError>) {
        self.state.lock().unwrap().script.push_back(outcome);
    }

    /// Simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().call_count
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl DeliveryChannel for MockChannel {
    async fn send(&self, post: &CandidatePost, channel_id: &str) -> Result<String, DeliveryError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.call_count += 1;
        let call = state.call_count;

        let outcome = state
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(format!("{}-msg-{}", self.name, call)));

        if let Ok(message_id) = &outcome {
            state.sent.push(SentMessage {
                channel_id: channel_id.to_string(),
                text: post.text.clone(),
                media_ref: post.media_ref.clone(),
            });
            return Ok(message_id.clone());
        }

        outcome
    }

    fn name(&self) -> &str {
        &self.name
    }
}
