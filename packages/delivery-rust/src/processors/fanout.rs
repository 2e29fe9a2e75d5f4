//! Broker-to-target fanout.

use std::sync::Arc;

use async_trait::async_trait;
use cebroker_core::Event;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::{Next, ProcessContext, Processor};
use crate::error::DeliveryError;
use crate::targets::TargetsHandle;

/// Calls the next stage once per target of the event's broker.
///
/// Targets are processed concurrently. Every target is attempted; failures
/// are reported together once all of them have finished.
#[derive(Debug)]
pub struct FanoutProcessor {
    targets: Arc<TargetsHandle>,
    next: Next,
}

impl FanoutProcessor {
    #[must_use]
    pub fn new(targets: Arc<TargetsHandle>) -> Self {
        Self {
            targets,
            next: Next::none(),
        }
    }

    #[must_use]
    pub fn with_next(mut self, next: Next) -> Self {
        self.next = next;
        self
    }
}

#[async_trait]
impl Processor for FanoutProcessor {
    async fn process(&self, event: &Event, ctx: &ProcessContext) -> Result<(), DeliveryError> {
        let snapshot = self.targets.snapshot();
        if snapshot.broker(&ctx.broker).is_none() {
            warn!(broker = %ctx.broker, "event dropped: broker config no longer exists");
            return Ok(());
        }

        let contexts: Vec<ProcessContext> = snapshot
            .broker_targets(&ctx.broker)
            .iter()
            .map(|target| ctx.for_target(target.key()))
            .collect();
        if contexts.is_empty() {
            debug!(broker = %ctx.broker, event_id = %event.id, "broker has no targets");
            return Ok(());
        }

        let total = contexts.len();
        let results = join_all(contexts.iter().map(|ctx| self.next.process(event, ctx))).await;
        let mut errors = results.into_iter().filter_map(Result::err);
        let Some(first) = errors.next() else {
            return Ok(());
        };
        let failed = 1 + errors.count();
        Err(DeliveryError::Fanout {
            failed,
            total,
            first: Box::new(first),
        })
    }
}
