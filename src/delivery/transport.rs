//! The outbound messaging seam.
//!
//! The chat transport itself lives outside this crate; everything here talks
//! to it through [`Transport`].

use async_trait::async_trait;
use thiserror::Error;

use crate::config::MessageMode;
use crate::storage::SubscriberId;

/// Failure reported by a [`Transport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The transport asked us to back off for `retry_after_secs`.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },
    /// The recipient can no longer be reached (blocked, kicked, chat gone).
    #[error("recipient rejected the message: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Per-message delivery flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Deliver without a notification sound.
    pub silent: bool,
    pub parse_mode: MessageMode,
    pub disable_web_page_preview: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            silent: false,
            parse_mode: MessageMode::Html,
            disable_web_page_preview: false,
        }
    }
}

/// Outbound chat transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        recipient: SubscriberId,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError>;

    /// Replaces the text of a message previously sent to `recipient`.
    async fn edit(
        &self,
        recipient: SubscriberId,
        message_id: i64,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError>;

    /// Sends `message` as a reply to `reply_to`.
    async fn reply(
        &self,
        recipient: SubscriberId,
        reply_to: i64,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError>;
}

/// A [`Transport`] that only writes every message to the log.
///
/// Used by `feedrelay run` when no chat transport is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(
        &self,
        recipient: SubscriberId,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        tracing::info!(recipient, silent = options.silent, "{message}");
        Ok(())
    }

    async fn edit(
        &self,
        recipient: SubscriberId,
        message_id: i64,
        message: &str,
        _options: &SendOptions,
    ) -> Result<(), TransportError> {
        tracing::info!(recipient, message_id, "edit: {message}");
        Ok(())
    }

    async fn reply(
        &self,
        recipient: SubscriberId,
        reply_to: i64,
        message: &str,
        _options: &SendOptions,
    ) -> Result<(), TransportError> {
        tracing::info!(recipient, reply_to, "reply: {message}");
        Ok(())
    }
}

/// A message accepted by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: SubscriberId,
    pub text: String,
    pub options: SendOptions,
}

/// In-memory [`Transport`] that records what it accepts.
///
/// Recipients can be marked as rejecting, in which case every call to them
/// fails with [`TransportError::Rejected`]. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: std::sync::Arc<std::sync::Mutex<RecordingState>>,
}

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<SentMessage>,
    rejecting: std::collections::HashSet<SubscriberId>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every future delivery to `recipient` fail permanently.
    pub fn reject(&self, recipient: SubscriberId) {
        self.state().rejecting.insert(recipient);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn sent_to(&self, recipient: SubscriberId) -> Vec<SentMessage> {
        self.state()
            .sent
            .iter()
            .filter(|m| m.recipient == recipient)
            .cloned()
            .collect()
    }

    fn record(
        &self,
        recipient: SubscriberId,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.rejecting.contains(&recipient) {
            return Err(TransportError::Rejected("Forbidden: bot was blocked by the user".into()));
        }
        state.sent.push(SentMessage {
            recipient,
            text: message.to_string(),
            options: *options,
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        recipient: SubscriberId,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.record(recipient, message, options)
    }

    async fn edit(
        &self,
        recipient: SubscriberId,
        _message_id: i64,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.record(recipient, message, options)
    }

    async fn reply(
        &self,
        recipient: SubscriberId,
        _reply_to: i64,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.record(recipient, message, options)
    }
}
