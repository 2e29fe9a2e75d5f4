//! cebroker delivery: event delivery to targets, reply re-injection, retry hand-off and the processing pipeline.

pub mod config;
pub mod delivery;
pub mod error;
pub mod processors;
pub mod reporter;
pub mod retry;
pub mod targets;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, DeliveryArgs, DeliveryConfig, TransportConfig};
pub use delivery::{DeliveryEngine, DeliveryOutcome, DropReason};
pub use error::{DeliveryError, PublishError, TransportError};
pub use processors::{DeliverProcessor, FanoutProcessor, FilterProcessor, Next, ProcessContext, Processor};
pub use reporter::{DeliveryLabels, DeliveryReporter, MetricsReporter};
pub use retry::{ChannelRetryPublisher, RetryDispatcher, RetryPublisher, RetryRecord};
pub use targets::TargetsHandle;
pub use transport::{DispatchResponse, HttpTransport, Reply, Transport};
