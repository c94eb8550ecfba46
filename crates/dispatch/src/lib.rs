mod event;
mod local;

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use strum::{AsRefStr, EnumString};
use thiserror::Error;

pub use event::{Event, EventPayload, EXT_KIND, EXT_MOOD};
pub use local::LocalBackend;

/// Reserved recipient that every actor is subscribed to.
pub const BROADCAST_RECIPIENT: &str = "all";

pub const LABEL_SENDER: &str = "sender";
pub const LABEL_NAMESPACE: &str = "namespace";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Delivery {0} not found")]
    NotFound(String),
    #[error("Backend rejected request: {0}")]
    Rejected(String),
    #[error("Failed to publish event: {0}")]
    Sink(String),
}

/// Whether a delivery carries an unprompted line or an answer to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Utterance,
    Reply,
}

/// Everything the backend needs to turn a send intent into a published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySpec {
    pub namespace: String,
    pub sender: String,
    /// Peer identity or [`BROADCAST_RECIPIENT`]
    pub recipient: String,
    /// Topic key, e.g. `conversation`
    pub topic: String,
    /// Full event type placed on the bus
    pub event_type: String,
    pub mood: String,
    pub kind: DeliveryKind,
    pub message: String,
}

impl DeliverySpec {
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_SENDER.to_string(), self.sender.clone()),
            (LABEL_NAMESPACE.to_string(), self.namespace.clone()),
        ])
    }

    /// Builds the bus event for this delivery. The event reuses the delivery id
    /// so a re-run job republishes the same identity.
    pub fn to_event(&self, id: &str) -> Event {
        let mut extensions = BTreeMap::new();
        extensions.insert(EXT_MOOD.to_string(), self.mood.clone());
        extensions.insert(EXT_KIND.to_string(), self.kind.as_ref().to_string());
        Event {
            id: id.to_string(),
            kind: self.event_type.clone(),
            source: self.sender.clone(),
            subject: self.recipient.clone(),
            extensions,
            data: EventPayload {
                message: self.message.clone(),
            },
        }
    }
}

/// Observed state of one pending delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub id: String,
    pub spec: DeliverySpec,
    pub labels: BTreeMap<String, String>,
    pub created_at: SystemTime,
    /// Set once the delivery job has published its event
    pub completed: bool,
}

/// Equality-based label selector, e.g. `sender=alice,namespace=default`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key).is_some_and(|v| v == value))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", pairs.join(","))
    }
}

/// The system that turns delivery specs into delivered events and owns the
/// ephemeral records until they are deleted.
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    async fn create_delivery(&self, spec: DeliverySpec) -> Result<String, Error>;

    /// Lists at most `limit` deliveries matching `selector`, oldest first.
    async fn list_deliveries(
        &self,
        selector: &LabelSelector,
        limit: usize,
    ) -> Result<Vec<DeliveryStatus>, Error>;

    async fn delete_delivery(&self, id: &str) -> Result<(), Error>;
}

/// Where a delivery job publishes its event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event) -> Result<(), Error>;
}
