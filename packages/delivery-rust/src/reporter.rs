//! Delivery metrics.
//!
//! The engine reports through the [`DeliveryReporter`] trait; nothing it
//! returns is consulted, so a reporter can never change a delivery outcome.
//! [`MetricsReporter`] records through the `metrics` facade and is a no-op
//! until the host installs a recorder/exporter.

use std::time::Duration;

use cebroker_core::Target;

/// Histogram of time from event receipt until dispatch begins, in milliseconds.
pub const PROCESSING_LATENCY: &str = "broker_event_processing_latency_ms";
/// Histogram of target dispatch duration, in milliseconds.
pub const DISPATCH_LATENCY: &str = "broker_event_dispatch_latency_ms";
/// Counter of target dispatches that produced an HTTP response.
pub const DISPATCH_TOTAL: &str = "broker_event_dispatch_total";

/// Labels attached to every delivery metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryLabels {
    pub namespace: String,
    pub broker: String,
    pub trigger: String,
}

impl DeliveryLabels {
    #[must_use]
    pub fn for_target(target: &Target) -> Self {
        Self {
            namespace: target.namespace.clone(),
            broker: target.broker.clone(),
            trigger: target.name.clone(),
        }
    }
}

/// Sink for delivery timings.
pub trait DeliveryReporter: Send + Sync {
    /// Marks the end of inbound handling, before the target is called.
    fn finish_event_processing(&self, labels: &DeliveryLabels, elapsed: Duration);

    /// Records how long the target took to answer and with which status.
    fn report_dispatch_time(&self, labels: &DeliveryLabels, elapsed: Duration, status: u16);
}

/// [`DeliveryReporter`] backed by the `metrics` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsReporter;

impl DeliveryReporter for MetricsReporter {
    fn finish_event_processing(&self, labels: &DeliveryLabels, elapsed: Duration) {
        metrics::histogram!(
            PROCESSING_LATENCY,
            "namespace" => labels.namespace.clone(),
            "broker" => labels.broker.clone(),
            "trigger" => labels.trigger.clone()
        )
        .record(elapsed.as_secs_f64() * 1000.0);
    }

    fn report_dispatch_time(&self, labels: &DeliveryLabels, elapsed: Duration, status: u16) {
        let code = status.to_string();
        let class = format!("{}xx", status / 100);
        metrics::histogram!(
            DISPATCH_LATENCY,
            "namespace" => labels.namespace.clone(),
            "broker" => labels.broker.clone(),
            "trigger" => labels.trigger.clone(),
            "response_code" => code.clone(),
            "response_code_class" => class.clone()
        )
        .record(elapsed.as_secs_f64() * 1000.0);
        metrics::counter!(
            DISPATCH_TOTAL,
            "namespace" => labels.namespace.clone(),
            "broker" => labels.broker.clone(),
            "trigger" => labels.trigger.clone(),
            "response_code" => code,
            "response_code_class" => class
        )
        .increment(1);
    }
}
