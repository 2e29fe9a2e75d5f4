//! Delivery of one event to one target.
//!
//! [`DeliveryEngine::deliver`] resolves the routing keys against the current
//! snapshot, dispatches a hop-stripped copy of the event to the target, and
//! re-injects any reply into the broker ingress with the decremented hop
//! count. Failures are either returned or, with retry enabled, handed to the
//! target's retry topic as the original, unmodified event.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use cebroker_core::hops::{delete_remaining_hops, update_remaining_hops};
use cebroker_core::{Broker, Encoding, Event, Message, RoutingKeys, SetRemainingHops, Target, Transformer};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::processors::ProcessContext;
use crate::reporter::{DeliveryLabels, DeliveryReporter};
use crate::retry::{RetryDispatcher, RetryPublisher};
use crate::targets::TargetsHandle;
use crate::transport::{Reply, Transport};

/// Why an event was dropped without a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BrokerMissing,
    TargetMissing,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BrokerMissing => "broker config no longer exists",
            Self::TargetMissing => "target config no longer exists",
        })
    }
}

/// Successful result of [`DeliveryEngine::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The routing keys no longer resolve. Nothing was sent.
    Dropped(DropReason),
    /// The target accepted the event and did not reply.
    Delivered { remaining_hops: i32 },
    /// The target replied and the reply was accepted by the broker ingress.
    ReplyForwarded { remaining_hops: i32 },
    /// The target replied but the hop budget is spent.
    ReplyDropped { remaining_hops: i32 },
    /// Delivery failed and the original event went to the retry topic.
    RetryEnqueued { topic: String },
}

impl DeliveryOutcome {
    /// Whether the processing chain continues after this outcome.
    #[must_use]
    pub fn continues_chain(&self) -> bool {
        matches!(
            self,
            Self::Delivered { .. } | Self::ReplyForwarded { .. } | Self::ReplyDropped { .. }
        )
    }
}

/// Delivers events to targets and re-injects their replies.
///
/// Stateless between calls apart from the shared handles; one engine serves
/// any number of concurrent deliveries.
pub struct DeliveryEngine {
    targets: Arc<TargetsHandle>,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn DeliveryReporter>,
    retry: RetryDispatcher,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(
        targets: Arc<TargetsHandle>,
        transport: Arc<dyn Transport>,
        reporter: Arc<dyn DeliveryReporter>,
        publisher: Arc<dyn RetryPublisher>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            targets,
            transport,
            reporter,
            retry: RetryDispatcher::new(publisher),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Delivers `event` to the target named by `keys`.
    ///
    /// `event` itself is never modified; the target and the retry topic each
    /// receive their own copy.
    ///
    /// # Errors
    ///
    /// With retry disabled, any dispatch or reply-forward failure is returned.
    /// With retry enabled, only a failure to publish to the retry topic is.
    pub async fn deliver(
        &self,
        event: &Event,
        keys: &RoutingKeys,
        ctx: &ProcessContext,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let span = info_span!(
            "deliver",
            broker = %keys.broker,
            target = %keys.target,
            event_id = %event.id,
            remaining_hops = tracing::field::Empty,
            cloudevents.encoding = tracing::field::Empty,
        );
        self.deliver_in_span(event, keys, ctx).instrument(span).await
    }

    async fn deliver_in_span(
        &self,
        event: &Event,
        keys: &RoutingKeys,
        ctx: &ProcessContext,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        // One snapshot for the whole call, even if a newer one lands meanwhile.
        let snapshot = self.targets.snapshot();

        let Some(broker) = snapshot.broker(&keys.broker) else {
            return Ok(dropped(DropReason::BrokerMissing));
        };
        let Some(target) = snapshot.target(&keys.target) else {
            return Ok(dropped(DropReason::TargetMissing));
        };

        match self.send(event, &broker, &target, ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if self.config.retry_on_failure && err.is_dispatch_failure() => {
                warn!(error = %err, "target delivery failed");
                info!("enqueueing for retry");
                let topic = self
                    .retry
                    .send_to_retry_topic(&target, event)
                    .await
                    .map_err(|cause| DeliveryError::Retry { cause })?;
                debug!(%topic, "event sent to retry topic");
                Ok(DeliveryOutcome::RetryEnqueued { topic })
            }
            Err(err) => Err(err),
        }
    }

    async fn send(
        &self,
        event: &Event,
        broker: &Broker,
        target: &Target,
        ctx: &ProcessContext,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let mut outgoing = event.clone();
        let remaining = update_remaining_hops(&mut outgoing, self.config.default_hop_ceiling);
        delete_remaining_hops(&mut outgoing);
        Span::current().record("remaining_hops", remaining);

        let labels = DeliveryLabels::for_target(target);
        self.reporter
            .finish_event_processing(&labels, ctx.received_at.elapsed());

        let encoding = match ctx.encoding {
            Encoding::Unknown => Encoding::Binary,
            known => known,
        };
        let message = Message::from_event(&outgoing, encoding)?;

        let started = Instant::now();
        let dispatch = self.transport.send(&target.address, message, &[]);
        let result = match self.config.delivery_timeout() {
            Some(limit) => tokio::time::timeout(limit, dispatch).await.map_err(|_elapsed| {
                DeliveryError::DeadlineExceeded {
                    timeout_ms: self.config.delivery_timeout_ms,
                }
            })?,
            None => dispatch.await,
        };
        let response = result.map_err(DeliveryError::Transport)?;
        self.reporter
            .report_dispatch_time(&labels, started.elapsed(), response.status.as_u16());

        if !response.status.is_success() {
            return Err(DeliveryError::Status {
                status: response.status.as_u16(),
            });
        }

        let reply = match response.reply {
            Reply::None => return Ok(DeliveryOutcome::Delivered { remaining_hops: remaining }),
            Reply::Message(reply) => reply,
        };
        let reply_encoding = reply.read_encoding();
        Span::current().record("cloudevents.encoding", tracing::field::display(reply_encoding));
        debug!(encoding = %reply_encoding, "target replied");

        if remaining <= 0 {
            match reply.to_event() {
                Ok(reply_event) => warn!(
                    remaining_hops = remaining,
                    reply_id = %reply_event.id,
                    reply_type = %reply_event.event_type,
                    "event has exhausted allowed hops: dropping reply"
                ),
                Err(err) => {
                    error!(error = %err, "failed to decode reply");
                    warn!(
                        remaining_hops = remaining,
                        "event has exhausted allowed hops: dropping reply"
                    );
                }
            }
            return Ok(DeliveryOutcome::ReplyDropped { remaining_hops: remaining });
        }

        let hops = SetRemainingHops(remaining);
        let transformers: [&dyn Transformer; 1] = [&hops];
        let forwarded = self
            .transport
            .send(&broker.address, reply, &transformers)
            .await
            .map_err(DeliveryError::ReplyForward)?;
        // The target already accepted the event; an ingress refusal is only logged.
        if forwarded.status.is_success() {
            debug!(remaining_hops = remaining, "reply forwarded to broker ingress");
        } else {
            warn!(
                status = forwarded.status.as_u16(),
                remaining_hops = remaining,
                "broker ingress did not accept reply"
            );
        }
        Ok(DeliveryOutcome::ReplyForwarded { remaining_hops: remaining })
    }
}

fn dropped(reason: DropReason) -> DeliveryOutcome {
    warn!(%reason, "event dropped: {reason}");
    DeliveryOutcome::Dropped(reason)
}

impl fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
