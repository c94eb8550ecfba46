use crate::inbox::SeenEvents;
use crate::manifest::Conversation;
use crate::metrics::MOOD_TRANSITIONS;
use crate::mood::{Mood, Topic};
use crate::peers::PeerDirectory;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::*;

/// The fields every loop of an actor may mutate. One lock guards all three.
#[derive(Debug, Default)]
pub struct Shared {
    pub mood: Mood,
    pub peers: PeerDirectory,
    pub seen: SeenEvents,
}

/// State record owned by a single actor.
///
/// `identity`, `conversation` and `lifetime_deadline` are fixed at boot and
/// read without locking. Never hold `shared` across a call to the bus or the
/// dispatch backend.
pub struct ActorState {
    identity: String,
    conversation: Arc<Conversation>,
    lifetime_deadline: Instant,
    pub(crate) shared: RwLock<Shared>,
}

impl ActorState {
    pub fn new(
        identity: impl Into<String>,
        conversation: Conversation,
        mood: Mood,
        lifetime_deadline: Instant,
        seen_capacity: Option<usize>,
    ) -> Self {
        Self {
            identity: identity.into(),
            conversation: Arc::new(conversation),
            lifetime_deadline,
            shared: RwLock::new(Shared {
                mood,
                peers: PeerDirectory::default(),
                seen: SeenEvents::new(seen_capacity),
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn lifetime_deadline(&self) -> Instant {
        self.lifetime_deadline
    }

    pub async fn mood(&self) -> Mood {
        self.shared.read().await.mood
    }

    pub async fn peers(&self) -> Vec<String> {
        self.shared.read().await.peers.snapshot()
    }

    pub async fn has_peers(&self) -> bool {
        !self.shared.read().await.peers.is_empty()
    }

    pub async fn seen_count(&self) -> usize {
        self.shared.read().await.seen.len()
    }

    /// Applies the mood transition for an accepted event of `topic` and
    /// returns the mood in force afterwards.
    pub async fn observe_topic(&self, topic: Topic) -> Mood {
        let mut shared = self.shared.write().await;
        let before = shared.mood;
        let after = before.after_event(topic);
        if after != before {
            shared.mood = after;
            drop(shared);
            MOOD_TRANSITIONS
                .with_label_values(&[before.as_ref(), after.as_ref()])
                .inc();
            info!("{} is now {after} (was {before})", self.identity);
        }
        after
    }
}
