use crate::error::Error;
use crate::manifest::{Conversation, Exchange};
use crate::mood::{Mood, Purpose, Topic};
use crate::state::ActorState;
use rand::Rng;
use std::sync::Arc;

/// An exchange together with the topic and mood it was chosen under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub topic: Topic,
    pub mood: Mood,
    pub exchange: Exchange,
}

#[derive(Clone)]
pub struct ReplySelector {
    state: Arc<ActorState>,
}

impl ReplySelector {
    pub fn new(state: Arc<ActorState>) -> Self {
        Self { state }
    }

    pub async fn select_intro(&self) -> Result<Selection, Error> {
        self.select(Purpose::Intro).await
    }

    /// Neutral actors mirror the incoming topic; every other mood answers
    /// from its own topic.
    pub async fn select_reply(&self, incoming: Topic) -> Result<Selection, Error> {
        self.select(Purpose::Reply(incoming)).await
    }

    pub async fn select_self_initiated(&self) -> Result<Selection, Error> {
        self.select(Purpose::SelfInitiated).await
    }

    pub async fn select_farewell(&self) -> Result<Selection, Error> {
        self.select(Purpose::Farewell).await
    }

    async fn select(&self, purpose: Purpose) -> Result<Selection, Error> {
        let mood = self.state.mood().await;
        select_for(
            self.state.conversation(),
            mood,
            purpose,
            &mut rand::thread_rng(),
        )
    }
}

/// Resolves `purpose` under `mood` through the precedence table and picks
/// uniformly among that topic's exchanges.
pub fn select_for<R: Rng + ?Sized>(
    conversation: &Conversation,
    mood: Mood,
    purpose: Purpose,
    rng: &mut R,
) -> Result<Selection, Error> {
    let topic = mood.topic_for(purpose);
    let exchange = conversation.pick(topic, rng)?.clone();
    Ok(Selection {
        topic,
        mood,
        exchange,
    })
}
