//! # Notification Dispatcher
//!
//! Broadcasts a [`DailySummary`] to webhook channels. Delivery is best
//! effort: an unconfigured channel is skipped, a failing one is logged and
//! reported, and neither stops the remaining channels.
//!
//! | Channel | Envelope |
//! |---------|----------|
//! | WeCom | `{"msgtype":"markdown","markdown":{"content":...}}` |
//! | Feishu | `{"msg_type":"text","content":{"text":...}}` |

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::http_client::{HttpClient, HttpRequest};
use crate::synthesizer::DISCLAIMER;
use crate::DailySummary;

/// Webhook flavour; decides the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    WeCom,
    Feishu,
}

impl ChannelKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WeCom => "wecom",
            Self::Feishu => "feishu",
        }
    }
}

/// A configured notification target. An empty URL disables the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub kind: ChannelKind,
    pub webhook_url: String,
}

impl Channel {
    pub fn wecom(webhook_url: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::WeCom,
            webhook_url: webhook_url.into(),
        }
    }

    pub fn feishu(webhook_url: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Feishu,
            webhook_url: webhook_url.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.trim().is_empty()
    }
}

/// Why a delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryError {
    #[error("{channel} webhook unreachable: {message}")]
    Transport { channel: String, message: String },
    #[error("{channel} webhook returned status {status}")]
    Status { channel: String, status: u16 },
}

/// Result of one channel delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    Skipped,
    Failed { error: DeliveryError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: ChannelKind,
    #[serde(flatten)]
    pub outcome: ChannelOutcome,
}

/// Per-channel outcomes of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub channels: Vec<ChannelReport>,
}

impl DispatchReport {
    /// Channels a POST was sent to (skipped channels excluded).
    pub fn attempted(&self) -> usize {
        self.channels
            .iter()
            .filter(|report| report.outcome != ChannelOutcome::Skipped)
            .count()
    }

    pub fn delivered(&self) -> usize {
        self.channels
            .iter()
            .filter(|report| report.outcome == ChannelOutcome::Delivered)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.channels
            .iter()
            .filter(|report| matches!(report.outcome, ChannelOutcome::Failed { .. }))
            .count()
    }
}

/// Sends summaries to every configured channel.
#[derive(Clone)]
pub struct Dispatcher {
    channels: Vec<Channel>,
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
    display_offset: FixedOffset,
}

impl Dispatcher {
    pub fn new(channels: Vec<Channel>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            channels,
            http_client,
            timeout: Duration::from_secs(10),
            display_offset: Utc.fix(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Offset used when rendering the generation time.
    pub fn with_display_offset(mut self, offset: FixedOffset) -> Self {
        self.display_offset = offset;
        self
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Deliver `summary` to every channel. Never fails; see the report.
    pub async fn dispatch(&self, summary: &DailySummary) -> DispatchReport {
        let mut report = DispatchReport::default();

        for channel in &self.channels {
            let outcome = self.deliver(channel, summary).await;
            match &outcome {
                ChannelOutcome::Delivered => {
                    tracing::info!(channel = channel.kind.as_str(), "summary delivered");
                }
                ChannelOutcome::Skipped => {
                    tracing::info!(channel = channel.kind.as_str(), "webhook not configured; skipping");
                }
                ChannelOutcome::Failed { error } => {
                    tracing::warn!(channel = channel.kind.as_str(), %error, "summary delivery failed");
                }
            }
            report.channels.push(ChannelReport {
                channel: channel.kind,
                outcome,
            });
        }

        report
    }

    async fn deliver(&self, channel: &Channel, summary: &DailySummary) -> ChannelOutcome {
        if !channel.is_configured() {
            return ChannelOutcome::Skipped;
        }

        let body = render_envelope(channel.kind, summary, self.display_offset).to_string();
        let request = HttpRequest::post_json(channel.webhook_url.trim(), body)
            .with_timeout_ms(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX));

        let name = channel.kind.as_str().to_owned();
        let attempt = tokio::time::timeout(self.timeout, self.http_client.execute(request)).await;
        let error = match attempt {
            Ok(Ok(response)) if response.is_success() => return ChannelOutcome::Delivered,
            Ok(Ok(response)) => DeliveryError::Status {
                channel: name,
                status: response.status,
            },
            Ok(Err(error)) => DeliveryError::Transport {
                channel: name,
                message: error.message().to_owned(),
            },
            Err(_) => DeliveryError::Transport {
                channel: name,
                message: format!("no response within {} ms", self.timeout.as_millis()),
            },
        };
        ChannelOutcome::Failed { error }
    }
}

/// JSON envelope for a channel.
pub fn render_envelope(
    kind: ChannelKind,
    summary: &DailySummary,
    display_offset: FixedOffset,
) -> serde_json::Value {
    match kind {
        ChannelKind::WeCom => json!({
            "msgtype": "markdown",
            "markdown": { "content": render_markdown(summary, display_offset) },
        }),
        ChannelKind::Feishu => json!({
            "msg_type": "text",
            "content": { "text": render_text(summary, display_offset) },
        }),
    }
}

/// WeCom body: markdown headings.
pub fn render_markdown(summary: &DailySummary, display_offset: FixedOffset) -> String {
    format!(
        "# Daily Market Brief {date}\n\n\
         ## Market Overview\n{overview}\n\n\
         ## Key News\n{news}\n\n\
         ## Investment Advice\n{advice}\n\n\
         ## Risk Level\n{risk}\n\n\
         > {DISCLAIMER}\n\n\
         ---\n*Generated at {generated}*",
        date = summary.summary_date,
        overview = summary.market_overview,
        news = summary.key_news,
        advice = summary.investment_advice,
        risk = summary.risk_level.label(),
        generated = generated_at(summary, display_offset),
    )
}

/// Feishu body: plain text.
pub fn render_text(summary: &DailySummary, display_offset: FixedOffset) -> String {
    format!(
        "Daily Market Brief {date}\n\n\
         Market Overview:\n{overview}\n\n\
         Key News:\n{news}\n\n\
         Investment Advice:\n{advice}\n\n\
         Risk Level: {risk}\n\n\
         {DISCLAIMER}\n\n\
         ---\nGenerated at {generated}",
        date = summary.summary_date,
        overview = summary.market_overview,
        news = summary.key_news,
        advice = summary.investment_advice,
        risk = summary.risk_level.label(),
        generated = generated_at(summary, display_offset),
    )
}

fn generated_at(summary: &DailySummary, display_offset: FixedOffset) -> String {
    summary
        .ingested_at
        .with_timezone(&display_offset)
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}
