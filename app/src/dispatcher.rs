use crate::error::Error;
use crate::metrics::DELIVERIES_CREATED;
use crate::mood::Topic;
use crate::selector::Selection;
use crate::state::ActorState;
use dispatch::{DeliveryKind, DeliverySpec, DispatchBackend, BROADCAST_RECIPIENT};
use std::fmt;
use std::sync::Arc;
use tracing::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    Peer(String),
    All,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Peer(identity) => write!(f, "{identity}"),
            Recipient::All => write!(f, "{BROADCAST_RECIPIENT}"),
        }
    }
}

impl From<&str> for Recipient {
    fn from(s: &str) -> Self {
        if s == BROADCAST_RECIPIENT {
            Recipient::All
        } else {
            Recipient::Peer(s.to_string())
        }
    }
}

/// Acknowledgement that the backend accepted a delivery. Says nothing about
/// whether the event has reached anyone yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub id: String,
    pub recipient: Recipient,
    pub topic: Topic,
}

/// Turns selections into pending deliveries on the dispatch backend.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<ActorState>,
    backend: Arc<dyn DispatchBackend>,
    namespace: String,
}

impl Dispatcher {
    pub fn new(
        state: Arc<ActorState>,
        backend: Arc<dyn DispatchBackend>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            state,
            backend,
            namespace: namespace.into(),
        }
    }

    /// Sends the exchange's `output` for utterances and its `input` for
    /// replies. Returns once the backend has created the delivery.
    pub async fn send(
        &self,
        selection: &Selection,
        recipient: Recipient,
        kind: DeliveryKind,
    ) -> Result<DeliveryReceipt, Error> {
        let message = match kind {
            DeliveryKind::Utterance => selection.exchange.output.clone(),
            DeliveryKind::Reply => selection.exchange.input.clone(),
        };
        let spec = DeliverySpec {
            namespace: self.namespace.clone(),
            sender: self.state.identity().to_string(),
            recipient: recipient.to_string(),
            topic: selection.topic.to_string(),
            event_type: selection.topic.event_type(),
            mood: selection.mood.to_string(),
            kind,
            message,
        };

        match self.backend.create_delivery(spec).await {
            Ok(id) => {
                DELIVERIES_CREATED
                    .with_label_values(&[selection.topic.as_ref(), "success"])
                    .inc();
                debug!(
                    "{} -> {recipient} [{}/{}]: {:?}",
                    self.state.identity(),
                    selection.topic,
                    selection.mood,
                    match kind {
                        DeliveryKind::Utterance => &selection.exchange.output,
                        DeliveryKind::Reply => &selection.exchange.input,
                    }
                );
                Ok(DeliveryReceipt {
                    id,
                    recipient,
                    topic: selection.topic,
                })
            }
            Err(err) => {
                DELIVERIES_CREATED
                    .with_label_values(&[selection.topic.as_ref(), "failure"])
                    .inc();
                Err(err.into())
            }
        }
    }

    pub async fn broadcast(&self, selection: &Selection) -> Result<DeliveryReceipt, Error> {
        self.send(selection, Recipient::All, DeliveryKind::Utterance)
            .await
    }

    /// Says the exchange's `output` to a random known peer.
    pub async fn speak_to_peer(&self, selection: &Selection) -> Result<DeliveryReceipt, Error> {
        let peer = {
            let shared = self.state.shared.read().await;
            let mut rng = rand::thread_rng();
            shared.peers.choose(&mut rng)
        };
        let peer = peer.ok_or(Error::NoPeersKnown)?;
        self.send(selection, Recipient::Peer(peer), DeliveryKind::Utterance)
            .await
    }

    /// Answers `peer` with the exchange's `input`.
    pub async fn reply_to_peer(
        &self,
        peer: &str,
        selection: &Selection,
    ) -> Result<DeliveryReceipt, Error> {
        if !self.state.has_peers().await {
            return Err(Error::NoPeersKnown);
        }
        self.send(selection, Recipient::from(peer), DeliveryKind::Reply)
            .await
    }
}
