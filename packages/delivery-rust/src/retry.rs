//! Retry hand-off for failed deliveries.
//!
//! A failed delivery is not retried in-process. The untouched original event
//! is published to the target's retry topic, from where it re-enters the
//! broker later and is evaluated from its true hop position.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cebroker_core::{Event, Target};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::PublishError;

/// Publishes events to a named retry topic.
#[async_trait]
pub trait RetryPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), PublishError>;
}

/// Resolves a target's retry topic and publishes to it.
#[derive(Clone)]
pub struct RetryDispatcher {
    publisher: Arc<dyn RetryPublisher>,
}

impl RetryDispatcher {
    #[must_use]
    pub fn new(publisher: Arc<dyn RetryPublisher>) -> Self {
        Self { publisher }
    }

    /// Publishes `event` to the retry topic of `target` and returns the topic.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::NoRetryQueue`] if the target has no retry queue,
    /// or whatever the publisher fails with.
    pub async fn send_to_retry_topic(&self, target: &Target, event: &Event) -> Result<String, PublishError> {
        let Some(queue) = target.retry_queue.as_ref() else {
            return Err(PublishError::NoRetryQueue { target: target.key() });
        };
        self.publisher.publish(&queue.topic, event).await?;
        Ok(queue.topic.clone())
    }
}

impl std::fmt::Debug for RetryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryDispatcher").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ChannelRetryPublisher
// ---------------------------------------------------------------------------

/// An event bound for a retry topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryRecord {
    pub topic: String,
    pub event: Event,
}

/// [`RetryPublisher`] that hands records to a bounded mpsc channel.
///
/// The receiving half belongs to the host, which writes records to durable
/// storage. A full channel applies backpressure for at most `send_timeout`.
#[derive(Debug, Clone)]
pub struct ChannelRetryPublisher {
    tx: mpsc::Sender<RetryRecord>,
    send_timeout: Duration,
}

impl ChannelRetryPublisher {
    /// Creates the publisher and the receiver the host drains.
    #[must_use]
    pub fn new(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<RetryRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, send_timeout }, rx)
    }
}

#[async_trait]
impl RetryPublisher for ChannelRetryPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), PublishError> {
        let record = RetryRecord {
            topic: topic.to_string(),
            event: event.clone(),
        };
        match tokio::time::timeout(self.send_timeout, self.tx.send(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PublishError::Closed),
            #[allow(clippy::cast_possible_truncation)]
            Err(_elapsed) => Err(PublishError::Timeout {
                timeout_ms: self.send_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cebroker_core::RetryQueue;

    use super::*;

    fn target(retry: bool) -> Target {
        Target {
            namespace: "ns".to_string(),
            broker: "b".to_string(),
            name: "t".to_string(),
            address: "http://t".to_string(),
            retry_queue: retry.then(|| RetryQueue {
                topic: "retry-t".to_string(),
                subscription: "retry-t-sub".to_string(),
            }),
            filter_attributes: BTreeMap::new(),
        }
    }

    fn event() -> Event {
        Event::new("evt-1", "//orders", "order.created").with_extension("brokerhops", 7)
    }

    #[tokio::test]
    async fn publishes_to_target_retry_topic() {
        let (publisher, mut rx) = ChannelRetryPublisher::new(4, Duration::from_secs(1));
        let dispatcher = RetryDispatcher::new(Arc::new(publisher));

        let topic = dispatcher.send_to_retry_topic(&target(true), &event()).await.unwrap();

        assert_eq!(topic, "retry-t");
        let record = rx.recv().await.unwrap();
        assert_eq!(record.topic, "retry-t");
        assert_eq!(record.event, event());
    }

    #[tokio::test]
    async fn missing_retry_queue_is_an_error() {
        let (publisher, _rx) = ChannelRetryPublisher::new(4, Duration::from_secs(1));
        let dispatcher = RetryDispatcher::new(Arc::new(publisher));

        let err = dispatcher.send_to_retry_topic(&target(false), &event()).await.unwrap_err();
        assert!(matches!(err, PublishError::NoRetryQueue { target } if target == "ns/b/t"));
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (publisher, rx) = ChannelRetryPublisher::new(4, Duration::from_secs(1));
        drop(rx);
        let err = publisher.publish("retry-t", &event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_times_out() {
        let (publisher, _rx) = ChannelRetryPublisher::new(1, Duration::from_millis(100));
        publisher.publish("retry-t", &event()).await.unwrap();

        let err = publisher.publish("retry-t", &event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Timeout { timeout_ms: 100 }));
    }
}
