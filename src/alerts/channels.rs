//! Message channels the router delivers through
//!
//! Each channel knows how to get one text to one recipient identifier. The
//! staff and customer channels are separate instances so they can point at
//! different gateways.

use crate::error::{AlertError, GatewayError};
use crate::gateway::HttpGateway;
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Longest text a channel is handed
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Longest title a channel is handed
pub const MAX_TITLE_LEN: usize = 256;

#[cfg_attr(test, mockall::automock)]
pub trait MessageSender: Send + Sync {
    /// Deliver `text` to a single recipient identifier
    fn send(&self, recipient: &str, text: &str) -> Result<(), AlertError>;

    /// Name recorded in the alert log for attempts made through this sender
    fn channel_name(&self) -> String;
}

/// Truncate text to a maximum byte length without splitting a character
///
/// Truncated text ends in "...", and the result never exceeds `max_length`.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let mut cut = max_length.saturating_sub(3);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Render an alert's title and body as one channel message
pub fn format_message(title: &str, body: &str) -> String {
    let title = truncate_text(title, MAX_TITLE_LEN);
    if body.trim().is_empty() {
        return title;
    }
    truncate_text(&format!("{}\n\n{}", title, body.trim()), MAX_MESSAGE_LEN)
}

/// Writes messages to the log instead of delivering them
///
/// Selected when no gateway URL is configured for a channel.
#[derive(Debug, Clone)]
pub struct LogSender {
    channel: String,
}

impl LogSender {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

impl MessageSender for LogSender {
    fn send(&self, recipient: &str, text: &str) -> Result<(), AlertError> {
        info!("[{}] -> {}: {}", self.channel, recipient, text);
        Ok(())
    }

    fn channel_name(&self) -> String {
        self.channel.clone()
    }
}

#[derive(Serialize)]
struct OutgoingMessage<'a> {
    to: &'a str,
    text: &'a str,
}

/// Delivers through a JSON message gateway (`POST {url}` with `{to, text}`)
pub struct HttpGatewaySender {
    gateway: Arc<HttpGateway>,
    url: String,
    channel: String,
}

impl HttpGatewaySender {
    pub fn new(gateway: Arc<HttpGateway>, url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            gateway,
            url: url.into(),
            channel: channel.into(),
        }
    }
}

impl MessageSender for HttpGatewaySender {
    fn send(&self, recipient: &str, text: &str) -> Result<(), AlertError> {
        let message = OutgoingMessage {
            to: recipient,
            text,
        };
        self.gateway
            .post_json(&self.url, &message)
            .map_err(|e| match e {
                GatewayError::Status { status, body } => {
                    AlertError::DeliveryFailed(format!("gateway answered {}: {}", status, body))
                }
                other => AlertError::Transport(other.to_string()),
            })
    }

    fn channel_name(&self) -> String {
        self.channel.clone()
    }
}

/// Pick the HTTP sender when a URL is configured, the log sender otherwise
pub fn sender_for(
    gateway: Option<&Arc<HttpGateway>>,
    url: &str,
    channel: &str,
) -> Arc<dyn MessageSender> {
    match gateway {
        Some(gateway) if !url.trim().is_empty() => {
            Arc::new(HttpGatewaySender::new(Arc::clone(gateway), url, channel))
        }
        _ => Arc::new(LogSender::new(channel)),
    }
}
