//! In-process event bus shared by every actor of a population.
//!
//! A single background task owns the broadcast channel; clients talk to it
//! through commands, the same front/back split a networked transport would
//! use. Routing is trigger-style: a [`Subscription`] only yields events whose
//! subject is its own identity or the broadcast target.

pub mod error;
use error::Error;

use async_trait::async_trait;
use dispatch::{Event, EventSink, BROADCAST_RECIPIENT};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tracing::*;

pub const DEFAULT_CAPACITY: usize = 1024;

enum FrontToBackCommand {
    Publish(Event, oneshot::Sender<usize>),
    Subscribe(oneshot::Sender<broadcast::Receiver<Event>>),
}

#[derive(Clone)]
pub struct Client {
    front_to_back_tx: mpsc::Sender<FrontToBackCommand>,
}

impl Client {
    /// Publishes an event and returns how many subscriptions received it.
    pub async fn publish(&self, event: Event) -> Result<usize, Error> {
        let (sender, receiver) = oneshot::channel();

        self.front_to_back_tx
            .send(FrontToBackCommand::Publish(event, sender))
            .await
            .map_err(|_| Error::ChannelSendError)?;
        receiver.await.map_err(Into::into)
    }

    pub async fn subscribe(&self, identity: impl Into<String>) -> Result<Subscription, Error> {
        let (sender, receiver) = oneshot::channel();

        self.front_to_back_tx
            .send(FrontToBackCommand::Subscribe(sender))
            .await
            .map_err(|_| Error::ChannelSendError)?;
        Ok(Subscription {
            identity: identity.into(),
            receiver: receiver.await?,
        })
    }
}

#[async_trait]
impl EventSink for Client {
    async fn publish(&self, event: Event) -> Result<(), dispatch::Error> {
        Client::publish(self, event)
            .await
            .map(|_| ())
            .map_err(|err| dispatch::Error::Sink(err.to_string()))
    }
}

/// Events addressed to one identity, either directly or via broadcast.
pub struct Subscription {
    identity: String,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.subject == self.identity || event.subject == BROADCAST_RECIPIENT {
                return Ok(event);
            }
        }
    }
}

pub fn spawn_event_bus(capacity: usize) -> Client {
    let (front_to_back_tx, mut front_to_back_rx) = mpsc::channel(capacity.max(1));
    let (events_tx, _) = broadcast::channel::<Event>(capacity.max(1));

    tokio::spawn(async move {
        while let Some(command) = front_to_back_rx.recv().await {
            match command {
                FrontToBackCommand::Publish(event, response) => {
                    trace!("Bus: {} {} -> {}", event.kind, event.source, event.subject);
                    // no subscribers is not an error for a broadcast medium
                    let receivers = events_tx.send(event).unwrap_or(0);
                    let _ = response.send(receivers);
                }
                FrontToBackCommand::Subscribe(response) => {
                    let _ = response.send(events_tx.subscribe());
                }
            }
        }
        debug!("Event bus stopped");
    });

    Client { front_to_back_tx }
}
