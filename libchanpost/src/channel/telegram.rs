//! Telegram Bot API delivery channel
//!
//! Speaks the HTTP Bot API directly: `sendMessage` for text posts and
//! `sendPhoto` when the candidate carries a media reference. API errors
//! are mapped onto [`DeliveryError`] variants so retry decisions happen
//! upstream, not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::channel::DeliveryChannel;
use crate::config::TelegramConfig;
use crate::error::{DeliveryError, Result};
use crate::types::CandidatePost;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<ApiMessage>,
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    retry_after: Option<u64>,
}

impl TelegramChannel {
    pub fn new(token: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build a channel from config, reading the bot token from disk.
    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let token = config.read_token()?;
        Ok(Self::new(token, config.api_base.clone()))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Network(format!("malformed API response: {e}")))?;

        if api.ok {
            return match api.result {
                Some(message) => Ok(message.message_id.to_string()),
                None => Err(DeliveryError::Network(
                    "API reported ok without a message".to_string(),
                )),
            };
        }

        let description = api
            .description
            .unwrap_or_else(|| format!("API error (HTTP {})", status.as_u16()));
        debug!(method, %status, description, "telegram API call failed");

        Err(map_api_error(status, description, api.parameters))
    }
}

fn map_transport_error(error: reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout(error.to_string())
    } else {
        DeliveryError::Network(error.to_string())
    }
}

fn map_api_error(
    status: reqwest::StatusCode,
    description: String,
    parameters: Option<ApiParameters>,
) -> DeliveryError {
    match status.as_u16() {
        429 => DeliveryError::RemoteRateLimit {
            message: description,
            retry_after: parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        },
        401 | 403 => DeliveryError::Authentication(description),
        400 if description.to_lowercase().contains("chat not found") => {
            DeliveryError::ChannelNotFound(description)
        }
        400..=499 => DeliveryError::InvalidPayload(description),
        _ => DeliveryError::Network(description),
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send(&self, post: &CandidatePost, channel_id: &str) -> Result<String, DeliveryError> {
        match &post.media_ref {
            Some(media) => {
                self.call(
                    "sendPhoto",
                    json!({
                        "chat_id": channel_id,
                        "photo": media,
                        "caption": post.text,
                    }),
                )
                .await
            }
            None => {
                self.call(
                    "sendMessage",
                    json!({
                        "chat_id": channel_id,
                        "text": post.text,
                    }),
                )
                .await
            }
        }
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
