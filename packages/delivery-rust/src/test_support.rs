//! Test doubles shared by the delivery and processor tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cebroker_core::{Broker, Event, Message, RetryQueue, Target, Targets, Transformer};
use http::StatusCode;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::error::{DeliveryError, PublishError, TransportError};
use crate::processors::{ProcessContext, Processor};
use crate::reporter::{DeliveryLabels, DeliveryReporter};
use crate::retry::{RetryPublisher, RetryRecord};
use crate::transport::{DispatchResponse, Reply, Transport};

pub(crate) const INGRESS: &str = "http://ingress";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub(crate) fn broker() -> Broker {
    Broker {
        namespace: "ns".to_string(),
        name: "b".to_string(),
        address: INGRESS.to_string(),
    }
}

pub(crate) fn target(name: &str) -> Target {
    Target {
        namespace: "ns".to_string(),
        broker: "b".to_string(),
        name: name.to_string(),
        address: format!("http://{name}"),
        retry_queue: Some(RetryQueue {
            topic: format!("retry-{name}"),
            subscription: format!("retry-{name}-sub"),
        }),
        filter_attributes: BTreeMap::new(),
    }
}

pub(crate) fn snapshot(targets: impl IntoIterator<Item = Target>) -> Targets {
    Targets::new([broker()], targets)
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// Canned behaviour for one send.
#[derive(Debug)]
pub(crate) enum Scripted {
    Status(u16),
    Reply(u16, Message),
    ConnectRefused,
    Delay(Duration, Box<Scripted>),
}

/// A message as it left the transport, after send-time transformers ran.
#[derive(Debug, Clone)]
pub(crate) struct Sent {
    pub address: String,
    pub message: Message,
}

/// [`Transport`] answering from per-address scripts. Unscripted sends get 202.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedTransport {
    pub(crate) fn script(&self, address: &str, response: Scripted) {
        self.scripts
            .lock()
            .entry(address.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_to(&self, address: &str) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.address == address)
            .map(|s| s.message.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        address: &str,
        message: Message,
        transformers: &[&dyn Transformer],
    ) -> Result<DispatchResponse, TransportError> {
        let message = message.transformed(transformers)?;
        self.sent.lock().push(Sent {
            address: address.to_string(),
            message,
        });
        let mut next = self
            .scripts
            .lock()
            .get_mut(address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Scripted::Status(202));
        loop {
            match next {
                Scripted::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    next = *inner;
                }
                Scripted::Status(code) => {
                    return Ok(DispatchResponse {
                        status: StatusCode::from_u16(code).unwrap(),
                        reply: Reply::None,
                    });
                }
                Scripted::Reply(code, reply) => {
                    return Ok(DispatchResponse {
                        status: StatusCode::from_u16(code).unwrap(),
                        reply: Reply::Message(reply),
                    });
                }
                Scripted::ConnectRefused => {
                    return Err(TransportError::Connect {
                        address: address.to_string(),
                        reason: "connection refused".to_string(),
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    processed: Mutex<Vec<DeliveryLabels>>,
    dispatched: Mutex<Vec<(DeliveryLabels, u16)>>,
}

impl RecordingReporter {
    pub(crate) fn processed(&self) -> Vec<DeliveryLabels> {
        self.processed.lock().clone()
    }

    pub(crate) fn dispatched(&self) -> Vec<(DeliveryLabels, u16)> {
        self.dispatched.lock().clone()
    }
}

impl DeliveryReporter for RecordingReporter {
    fn finish_event_processing(&self, labels: &DeliveryLabels, _elapsed: Duration) {
        self.processed.lock().push(labels.clone());
    }

    fn report_dispatch_time(&self, labels: &DeliveryLabels, _elapsed: Duration, status: u16) {
        self.dispatched.lock().push((labels.clone(), status));
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    records: Mutex<Vec<RetryRecord>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub(crate) fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::SeqCst);
        publisher
    }

    pub(crate) fn records(&self) -> Vec<RetryRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl RetryPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Backend(anyhow::anyhow!("topic {topic} unavailable")));
        }
        self.records.lock().push(RetryRecord {
            topic: topic.to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingProcessor
// ---------------------------------------------------------------------------

/// Terminal [`Processor`] that records what reached it.
#[derive(Debug, Default)]
pub(crate) struct RecordingProcessor {
    seen: Mutex<Vec<(Event, Option<String>)>>,
    fail_for: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub(crate) fn seen(&self) -> Vec<(Event, Option<String>)> {
        self.seen.lock().clone()
    }

    /// Makes calls bound to `target` fail with a 500 status error.
    pub(crate) fn fail_for(&self, target: &str) {
        self.fail_for.lock().push(target.to_string());
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, event: &Event, ctx: &ProcessContext) -> Result<(), DeliveryError> {
        self.seen.lock().push((event.clone(), ctx.target.clone()));
        let fails = ctx
            .target
            .as_ref()
            .is_some_and(|t| self.fail_for.lock().contains(t));
        if fails {
            return Err(DeliveryError::Status { status: 500 });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TraceCapture
// ---------------------------------------------------------------------------

/// `tracing` layer keeping every event field and every value recorded onto a
/// span after creation, as `(name, rendered value)` pairs.
#[derive(Debug, Clone, Default)]
pub(crate) struct TraceCapture {
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl TraceCapture {
    /// Installs the capture as the thread's default subscriber until the guard drops.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub(crate) fn values(&self, name: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(field, _)| field == name)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

struct FieldVisitor<'a>(&'a Mutex<Vec<(String, String)>>);

impl Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.lock().push((field.name().to_string(), format!("{value:?}")));
    }
}

impl<S: Subscriber> Layer<S> for TraceCapture {
    fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        values.record(&mut FieldVisitor(&self.entries));
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        event.record(&mut FieldVisitor(&self.entries));
    }
}
