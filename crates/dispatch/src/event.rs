use crate::DeliveryKind;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extension carrying the sender's mood.
pub const EXT_MOOD: &str = "mood";
/// Extension distinguishing unprompted lines from replies.
pub const EXT_KIND: &str = "kind";

/// Envelope exchanged on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub subject: String,
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
    pub data: EventPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub message: String,
}

impl Event {
    pub fn mood(&self) -> Option<&str> {
        self.extensions.get(EXT_MOOD).map(String::as_str)
    }

    pub fn delivery_kind(&self) -> Option<DeliveryKind> {
        self.extensions
            .get(EXT_KIND)
            .and_then(|kind| kind.parse().ok())
    }
}
