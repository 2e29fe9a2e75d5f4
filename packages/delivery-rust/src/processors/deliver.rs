//! Terminal delivery stage.

use std::sync::Arc;

use async_trait::async_trait;
use cebroker_core::Event;

use super::{Next, ProcessContext, Processor};
use crate::delivery::DeliveryEngine;
use crate::error::DeliveryError;

/// Runs [`DeliveryEngine::deliver`] for the target bound in the context.
///
/// The next stage sees the original event, and only when the delivery
/// produced an outcome that continues the chain.
#[derive(Debug)]
pub struct DeliverProcessor {
    engine: Arc<DeliveryEngine>,
    next: Next,
}

impl DeliverProcessor {
    #[must_use]
    pub fn new(engine: Arc<DeliveryEngine>) -> Self {
        Self {
            engine,
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
impl Processor for DeliverProcessor {
    async fn process(&self, event: &Event, ctx: &ProcessContext) -> Result<(), DeliveryError> {
        let keys = ctx.routing_keys().ok_or(DeliveryError::MissingTargetKey)?;
        let outcome = self.engine.deliver(event, &keys, ctx).await?;
        if outcome.continues_chain() {
            self.next.process(event, ctx).await
        } else {
            Ok(())
        }
    }
}
