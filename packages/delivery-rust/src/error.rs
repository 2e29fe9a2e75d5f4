//! Error types for the delivery path.

use cebroker_core::BindingError;

/// Errors raised by a [`Transport`](crate::transport::Transport) send.
///
/// Causes are rendered into the message and not chained as `source`, so a
/// full error chain prints each cause once.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid delivery address {address:?}")]
    InvalidAddress { address: String },
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("request to {address} timed out")]
    Timeout { address: String },
    #[error("request to {address} failed: {cause}")]
    Request { address: String, cause: reqwest::Error },
    #[error("response from {address} exceeds {limit} bytes")]
    ResponseTooLarge { address: String, limit: usize },
    #[error("failed to encode message: {0}")]
    Binding(BindingError),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl From<BindingError> for TransportError {
    fn from(err: BindingError) -> Self {
        Self::Binding(err)
    }
}

/// Errors raised when handing an event to a retry destination.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("target {target} has no retry queue configured")]
    NoRetryQueue { target: String },
    #[error("retry queue receiver has been dropped")]
    Closed,
    #[error("retry queue stayed full for {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Errors surfaced by processors and the delivery engine.
///
/// With retry enabled, only [`DeliveryError::Retry`] (and processor-level
/// errors such as a missing routing key) reach the caller; every dispatch
/// failure is converted into a retry hand-off first.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("processing context carries no target key")]
    MissingTargetKey,
    #[error("event delivery failed: HTTP status code {status}")]
    Status { status: u16 },
    #[error("event delivery timed out after {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },
    #[error("event delivery failed: {0}")]
    Transport(TransportError),
    #[error("failed to forward reply to broker ingress: {0}")]
    ReplyForward(TransportError),
    #[error("failed to encode event for delivery: {0}")]
    Binding(BindingError),
    #[error("failed to send event to retry topic: {cause}")]
    Retry { cause: PublishError },
    #[error("delivery to {failed} of {total} targets failed, first error: {first}")]
    Fanout {
        failed: usize,
        total: usize,
        first: Box<DeliveryError>,
    },
}

impl From<BindingError> for DeliveryError {
    fn from(err: BindingError) -> Self {
        Self::Binding(err)
    }
}

impl DeliveryError {
    /// Returns `true` for failures of a dispatch attempt, which are the ones
    /// eligible for the retry destination.
    #[must_use]
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Self::Status { .. }
                | Self::DeadlineExceeded { .. }
                | Self::Transport(_)
                | Self::ReplyForward(_)
                | Self::Binding(_)
        )
    }
}
