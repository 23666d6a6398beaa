//! Retry wrapper around a rate-limiting [`Transport`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::transport::{SendOptions, Transport, TransportError};
use crate::config::RetryPolicy;
use crate::storage::SubscriberId;

/// Outcome of a delivery that did not succeed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Permanent: the caller should drop the recipient's subscription.
    #[error("recipient rejected delivery: {0}")]
    Rejected(String),
    /// Still rate limited after every allowed attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: TransportError,
    },
    #[error("delivery failed: {0}")]
    Failed(TransportError),
}

impl DeliveryError {
    /// True when the recipient should be unsubscribed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Rejected(_))
    }
}

/// Which transport call a retry loop is wrapping; used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Send,
    Edit,
    Reply,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Send => "send",
            Operation::Edit => "edit",
            Operation::Reply => "reply",
        }
    }
}

/// Sends through a [`Transport`], honouring its rate-limit hints.
#[derive(Clone)]
pub struct DeliveryRetrier {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl DeliveryRetrier {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn send(
        &self,
        recipient: SubscriberId,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), DeliveryError> {
        self.run(Operation::Send, || {
            self.transport.send(recipient, message, options)
        })
        .await
    }

    pub async fn edit(
        &self,
        recipient: SubscriberId,
        message_id: i64,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), DeliveryError> {
        self.run(Operation::Edit, || {
            self.transport.edit(recipient, message_id, message, options)
        })
        .await
    }

    pub async fn reply(
        &self,
        recipient: SubscriberId,
        reply_to: i64,
        message: &str,
        options: &SendOptions,
    ) -> Result<(), DeliveryError> {
        self.run(Operation::Reply, || {
            self.transport.reply(recipient, reply_to, message, options)
        })
        .await
    }

    /// Runs `attempt` up to `max_attempts` times.
    ///
    /// Only [`TransportError::RateLimited`] is retried, after sleeping for the
    /// advertised delay (at least one second). Every other error ends the loop
    /// after that single attempt.
    pub async fn run<F, Fut>(&self, operation: Operation, mut attempt: F) -> Result<(), DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for n in 1..=max_attempts {
            let err = match attempt().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            match err {
                TransportError::RateLimited { retry_after_secs } if n < max_attempts => {
                    let wait = Duration::from_secs(retry_after_secs.max(1) as u64);
                    tracing::warn!(
                        operation = operation.as_str(),
                        attempt = n,
                        max_attempts,
                        wait_secs = wait.as_secs(),
                        "Rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                TransportError::RateLimited { .. } => {
                    return Err(DeliveryError::Exhausted {
                        attempts: n,
                        last: err,
                    });
                }
                TransportError::Rejected(reason) => return Err(DeliveryError::Rejected(reason)),
                other => return Err(DeliveryError::Failed(other)),
            }
        }

        // max_attempts >= 1, so the loop always returns
        Err(DeliveryError::Failed(TransportError::Other(
            "no delivery attempt made".into(),
        )))
    }
}
