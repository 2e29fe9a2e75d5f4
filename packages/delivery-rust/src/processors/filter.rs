//! Trigger attribute filtering.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cebroker_core::Event;
use tracing::{debug, warn};

use super::{Next, ProcessContext, Processor};
use crate::error::DeliveryError;
use crate::targets::TargetsHandle;

/// Returns `true` if every filter entry equals the event's attribute of the
/// same name. An empty filter matches everything.
#[must_use]
pub fn matches_filter(filter: &BTreeMap<String, String>, event: &Event) -> bool {
    filter
        .iter()
        .all(|(name, expected)| event.attribute(name).is_some_and(|actual| actual == expected.as_str()))
}

/// Passes events on only if they match the bound target's filter.
#[derive(Debug)]
pub struct FilterProcessor {
    targets: Arc<TargetsHandle>,
    next: Next,
}

impl FilterProcessor {
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
impl Processor for FilterProcessor {
    async fn process(&self, event: &Event, ctx: &ProcessContext) -> Result<(), DeliveryError> {
        let key = ctx.target.as_deref().ok_or(DeliveryError::MissingTargetKey)?;
        let Some(target) = self.targets.snapshot().target(key) else {
            warn!(target = key, "event dropped: target config no longer exists");
            return Ok(());
        };
        if !matches_filter(&target.filter_attributes, event) {
            debug!(target = key, event_id = %event.id, "event does not match filter");
            return Ok(());
        }
        self.next.process(event, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use cebroker_core::Target;

    use super::*;
    use crate::test_support::{snapshot, target, RecordingProcessor};

    fn filtered(name: &str, filter: &[(&str, &str)]) -> Target {
        Target {
            filter_attributes: filter
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..target(name)
        }
    }

    fn event() -> Event {
        Event::new("evt-1", "//orders", "order.created")
            .with_subject("eu")
            .with_extension("priority", 3)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches_filter(&BTreeMap::new(), &event()));
    }

    #[test]
    fn filter_matches_attributes_and_extensions() {
        let t = filtered("t", &[("type", "order.created"), ("subject", "eu"), ("priority", "3")]);
        assert!(matches_filter(&t.filter_attributes, &event()));
    }

    #[test]
    fn filter_rejects_mismatch_and_absence() {
        let wrong = filtered("t", &[("type", "order.deleted")]);
        assert!(!matches_filter(&wrong.filter_attributes, &event()));

        let absent = filtered("t", &[("region", "eu")]);
        assert!(!matches_filter(&absent.filter_attributes, &event()));
    }

    #[tokio::test]
    async fn passes_matching_event_on() {
        let handle = Arc::new(TargetsHandle::new(snapshot([filtered("t", &[("type", "order.created")])])));
        let next = Arc::new(RecordingProcessor::default());
        let processor = FilterProcessor::new(handle).with_next(Next::new(next.clone()));

        processor
            .process(&event(), &ProcessContext::new("ns/b").for_target("ns/b/t"))
            .await
            .unwrap();

        assert_eq!(next.seen().len(), 1);
    }

    #[tokio::test]
    async fn stops_non_matching_event() {
        let handle = Arc::new(TargetsHandle::new(snapshot([filtered("t", &[("type", "other")])])));
        let next = Arc::new(RecordingProcessor::default());
        let processor = FilterProcessor::new(handle).with_next(Next::new(next.clone()));

        processor
            .process(&event(), &ProcessContext::new("ns/b").for_target("ns/b/t"))
            .await
            .unwrap();

        assert!(next.seen().is_empty());
    }

    #[tokio::test]
    async fn missing_target_is_dropped() {
        let handle = Arc::new(TargetsHandle::new(snapshot([])));
        let next = Arc::new(RecordingProcessor::default());
        let processor = FilterProcessor::new(handle).with_next(Next::new(next.clone()));

        processor
            .process(&event(), &ProcessContext::new("ns/b").for_target("ns/b/t"))
            .await
            .unwrap();

        assert!(next.seen().is_empty());
    }

    #[tokio::test]
    async fn missing_target_key_is_an_error() {
        let processor = FilterProcessor::new(Arc::new(TargetsHandle::default()));
        let err = processor
            .process(&event(), &ProcessContext::new("ns/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::MissingTargetKey));
    }
}
