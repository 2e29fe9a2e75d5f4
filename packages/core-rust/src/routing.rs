//! Routing snapshot: brokers, their targets, and where to retry.
//!
//! A [`Targets`] value is an immutable, point-in-time view of the routing
//! configuration. It is built once (by whatever watches the control plane)
//! and then only read. Lookups that miss return `None`: a broker or target can
//! disappear while events addressed to it are still in flight, and that is a
//! normal outcome rather than an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Builds the lookup key of a broker.
#[must_use]
pub fn broker_key(namespace: &str, broker: &str) -> String {
    format!("{namespace}/{broker}")
}

/// Builds the lookup key of a target.
#[must_use]
pub fn target_key(namespace: &str, broker: &str, target: &str) -> String {
    format!("{namespace}/{broker}/{target}")
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A broker: the ingress endpoint that accepts re-injected replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broker {
    pub namespace: String,
    pub name: String,
    /// Ingress URL replies are posted to.
    pub address: String,
}

impl Broker {
    #[must_use]
    pub fn key(&self) -> String {
        broker_key(&self.namespace, &self.name)
    }
}

/// Durable queue a target's failed deliveries are handed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueue {
    pub topic: String,
    #[serde(default)]
    pub subscription: String,
}

/// A subscriber endpoint attached to a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub namespace: String,
    /// Name of the owning broker, in the same namespace.
    pub broker: String,
    pub name: String,
    /// Delivery URL.
    pub address: String,
    #[serde(default)]
    pub retry_queue: Option<RetryQueue>,
    /// Exact-match attribute filter. Empty means "accept everything".
    #[serde(default)]
    pub filter_attributes: BTreeMap<String, String>,
}

impl Target {
    #[must_use]
    pub fn key(&self) -> String {
        target_key(&self.namespace, &self.broker, &self.name)
    }

    #[must_use]
    pub fn broker_key(&self) -> String {
        broker_key(&self.namespace, &self.broker)
    }

    /// Routing keys addressing this target.
    #[must_use]
    pub fn routing_keys(&self) -> RoutingKeys {
        RoutingKeys::new(self.broker_key(), self.key())
    }
}

/// The (broker, target) pair an event has been routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKeys {
    pub broker: String,
    pub target: String,
}

impl RoutingKeys {
    pub fn new(broker: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Targets snapshot
// ---------------------------------------------------------------------------

/// Serialized shape of a [`Targets`] snapshot.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsConfig {
    #[serde(default)]
    brokers: Vec<Broker>,
    #[serde(default)]
    targets: Vec<Target>,
}

impl From<TargetsConfig> for Targets {
    fn from(config: TargetsConfig) -> Self {
        Self::new(config.brokers, config.targets)
    }
}

/// Immutable routing snapshot keyed by broker and target keys.
///
/// Entries are held in `Arc`s so a lookup hands out a cheap reference that
/// stays valid even after the snapshot itself is replaced.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "TargetsConfig")]
pub struct Targets {
    brokers: BTreeMap<String, Arc<Broker>>,
    targets: BTreeMap<String, Arc<Target>>,
}

impl Targets {
    /// Builds a snapshot. Later entries win on duplicate keys.
    pub fn new(
        brokers: impl IntoIterator<Item = Broker>,
        targets: impl IntoIterator<Item = Target>,
    ) -> Self {
        Self {
            brokers: brokers.into_iter().map(|b| (b.key(), Arc::new(b))).collect(),
            targets: targets.into_iter().map(|t| (t.key(), Arc::new(t))).collect(),
        }
    }

    /// Parses a snapshot from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Looks up a broker by key.
    #[must_use]
    pub fn broker(&self, key: &str) -> Option<Arc<Broker>> {
        self.brokers.get(key).cloned()
    }

    /// Looks up a target by key.
    #[must_use]
    pub fn target(&self, key: &str) -> Option<Arc<Target>> {
        self.targets.get(key).cloned()
    }

    /// All targets attached to the broker, ordered by target key.
    #[must_use]
    pub fn broker_targets(&self, broker_key: &str) -> Vec<Arc<Target>> {
        let prefix = format!("{broker_key}/");
        self.targets
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, target)| Arc::clone(target))
            .collect()
    }

    #[must_use]
    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(ns: &str, name: &str) -> Broker {
        Broker {
            namespace: ns.to_string(),
            name: name.to_string(),
            address: format!("http://ingress/{ns}/{name}"),
        }
    }

    fn target(ns: &str, broker: &str, name: &str) -> Target {
        Target {
            namespace: ns.to_string(),
            broker: broker.to_string(),
            name: name.to_string(),
            address: format!("http://{name}.{ns}"),
            retry_queue: None,
            filter_attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(broker_key("ns", "default"), "ns/default");
        assert_eq!(target_key("ns", "default", "t1"), "ns/default/t1");
        let t = target("ns", "default", "t1");
        assert_eq!(t.routing_keys(), RoutingKeys::new("ns/default", "ns/default/t1"));
    }

    #[test]
    fn lookups_hit_and_miss() {
        let snapshot = Targets::new([broker("ns", "b")], [target("ns", "b", "t")]);
        assert_eq!(snapshot.broker("ns/b").unwrap().address, "http://ingress/ns/b");
        assert_eq!(snapshot.target("ns/b/t").unwrap().address, "http://t.ns");
        assert!(snapshot.broker("ns/missing").is_none());
        assert!(snapshot.target("ns/b/missing").is_none());
    }

    #[test]
    fn broker_targets_does_not_leak_prefix_siblings() {
        let snapshot = Targets::new(
            [broker("ns", "b"), broker("ns", "b2")],
            [
                target("ns", "b", "z"),
                target("ns", "b", "a"),
                target("ns", "b2", "x"),
                target("other", "b", "y"),
            ],
        );
        let names: Vec<_> = snapshot
            .broker_targets("ns/b")
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "z"]);
        assert!(snapshot.broker_targets("ns/none").is_empty());
    }

    #[test]
    fn lookups_outlive_the_snapshot() {
        let snapshot = Targets::new([broker("ns", "b")], []);
        let entry = snapshot.broker("ns/b").unwrap();
        drop(snapshot);
        assert_eq!(entry.name, "b");
    }

    #[test]
    fn parses_json_snapshot() {
        let json = r#"{
            "brokers": [{"namespace": "ns", "name": "b", "address": "http://ingress"}],
            "targets": [{
                "namespace": "ns", "broker": "b", "name": "t",
                "address": "http://sub",
                "retryQueue": {"topic": "retry-t", "subscription": "retry-t-sub"},
                "filterAttributes": {"type": "order.created"}
            }]
        }"#;
        let snapshot = Targets::from_json(json).unwrap();
        assert_eq!(snapshot.broker_count(), 1);
        assert_eq!(snapshot.target_count(), 1);
        let t = snapshot.target("ns/b/t").unwrap();
        assert_eq!(t.retry_queue.as_ref().unwrap().topic, "retry-t");
        assert_eq!(t.filter_attributes["type"], "order.created");
    }

    #[test]
    fn empty_json_is_an_empty_snapshot() {
        let snapshot = Targets::from_json("{}").unwrap();
        assert_eq!(snapshot.broker_count(), 0);
        assert_eq!(snapshot.target_count(), 0);
    }
}
