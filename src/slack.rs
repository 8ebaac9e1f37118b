//! Slack Events API envelopes and the `chat.postMessage` reply client.

use crate::config::SlackConfig;
use crate::error::{Error, Result};
use crate::types::{InboundEvent, Reply};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this are rejected as replays
const MAX_REQUEST_SKEW_SECS: i64 = 5 * 60;

/// Message subtypes that still carry a user's own words
const ANSWERED_SUBTYPES: [&str; 2] = ["thread_broadcast", "file_share"];

/// Top-level payload posted to the events endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event: SlackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

impl SlackEvent {
    /// Platform-neutral event, or `None` for event types the bot does not handle
    ///
    /// Only `message` events count; a mention also arrives as one. Channel
    /// housekeeping subtypes such as joins, topic changes and edits are dropped.
    pub fn to_inbound(&self, bot_user_id: Option<&str>) -> Option<InboundEvent> {
        if self.kind != "message" {
            return None;
        }

        let bot_message = self.subtype.as_deref() == Some("bot_message");
        if let Some(subtype) = self.subtype.as_deref() {
            if !bot_message && !ANSWERED_SUBTYPES.contains(&subtype) {
                return None;
            }
        }

        let from_self = match (bot_user_id, self.user.as_deref()) {
            (Some(bot), Some(user)) => bot == user,
            _ => false,
        };
        let is_from_self_or_bot = self.bot_id.is_some() || bot_message || from_self;

        Some(InboundEvent {
            user_id: self.user.clone(),
            text: self.text.as_deref().map(|t| strip_leading_mentions(t).to_string()),
            is_from_self_or_bot,
            channel: self.channel.clone(),
        })
    }
}

/// Drop `<@U123>` mentions at the start of a message, so `<@UBOT> 2` reads as `2`
pub fn strip_leading_mentions(text: &str) -> &str {
    let mut rest = text.trim_start();
    while let Some(after) = rest.strip_prefix("<@") {
        match after.find('>') {
            Some(end) => rest = after[end + 1..].trim_start(),
            None => break,
        }
    }
    rest
}

/// Checks `X-Slack-Signature` against the app's signing secret
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Signature(e.to_string()))?;
        mac.update(b"v0:");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }

    /// `v0=<hex>` signature for a timestamp and raw body
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String> {
        let digest = self.mac(timestamp, body)?.finalize().into_bytes();
        Ok(format!("v0={}", hex::encode(digest)))
    }

    /// Verify a request; `now` is the current Unix time in seconds
    pub fn verify(&self, timestamp: &str, body: &[u8], signature: &str, now: i64) -> Result<()> {
        let sent: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| Error::Signature(format!("invalid timestamp '{}'", timestamp)))?;
        if (now - sent).abs() > MAX_REQUEST_SKEW_SECS {
            return Err(Error::Signature("timestamp outside the allowed window".to_string()));
        }

        let expected = signature
            .strip_prefix("v0=")
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or_else(|| Error::Signature("malformed signature".to_string()))?;

        // verify_slice compares in constant time
        self.mac(timestamp.trim(), body)?
            .verify_slice(&expected)
            .map_err(|_| Error::Signature("signature mismatch".to_string()))
    }
}

/// Somewhere replies can be delivered
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn post(&self, reply: &Reply) -> Result<()>;
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Web API client posting with the bot token
pub struct SlackClient {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| Error::Config("SLACK_BOT_TOKEN is not set".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            bot_token,
        })
    }
}

#[async_trait]
impl ReplySink for SlackClient {
    async fn post(&self, reply: &Reply) -> Result<()> {
        let body: SlackResponse = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&PostMessage {
                channel: &reply.channel,
                text: &reply.text,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body.ok {
            Ok(())
        } else {
            Err(Error::Chat(body.error.unwrap_or_else(|| "unknown error".to_string())))
        }
    }
}
