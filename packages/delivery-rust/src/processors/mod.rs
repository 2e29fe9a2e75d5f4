//! Event processing pipeline.
//!
//! Processors form a singly linked chain: each holds a [`Next`] link and
//! decides itself whether, and with which context, the next stage runs. The
//! usual chain is fanout, then filter, then deliver.

pub mod deliver;
pub mod fanout;
pub mod filter;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cebroker_core::{Encoding, Event, RoutingKeys};

use crate::error::DeliveryError;

pub use deliver::DeliverProcessor;
pub use fanout::FanoutProcessor;
pub use filter::{matches_filter, FilterProcessor};

/// Per-event state threaded through the chain.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Key of the broker the event arrived on.
    pub broker: String,
    /// Key of the target, once the event has been fanned out.
    pub target: Option<String>,
    /// Encoding the event arrived in. Target dispatch reuses it.
    pub encoding: Encoding,
    /// When the broker received the event.
    pub received_at: Instant,
}

impl ProcessContext {
    #[must_use]
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            target: None,
            encoding: Encoding::default(),
            received_at: Instant::now(),
        }
    }

    /// Copy of this context bound to one target.
    #[must_use]
    pub fn for_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Routing keys, available once a target is bound.
    #[must_use]
    pub fn routing_keys(&self) -> Option<RoutingKeys> {
        self.target
            .as_ref()
            .map(|target| RoutingKeys::new(self.broker.clone(), target.clone()))
    }
}

/// A stage of the processing chain.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Handles `event`. Implementations call their [`Next`] link to continue.
    ///
    /// # Errors
    ///
    /// Returns the first failure of this stage or any later stage.
    async fn process(&self, event: &Event, ctx: &ProcessContext) -> Result<(), DeliveryError>;
}

/// Link to the following stage. An empty link ends the chain.
#[derive(Clone, Default)]
pub struct Next(Option<Arc<dyn Processor>>);

impl Next {
    #[must_use]
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self(Some(processor))
    }

    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// Runs the next stage, or succeeds when this is the end of the chain.
    ///
    /// # Errors
    ///
    /// Propagates the next stage's error.
    pub async fn process(&self, event: &Event, ctx: &ProcessContext) -> Result<(), DeliveryError> {
        match &self.0 {
            Some(next) => next.process(event, ctx).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Next")
            .field(&if self.0.is_some() { "Some(..)" } else { "None" })
            .finish()
    }
}
