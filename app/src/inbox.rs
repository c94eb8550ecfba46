//! Admission of inbound events: self-exclusion, dedup and peer accrual.

use crate::metrics::EVENTS_RECEIVED;
use crate::state::ActorState;
use std::collections::{HashSet, VecDeque};
use strum::AsRefStr;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Admission {
    Accept,
    Duplicate,
    /// The actor's own broadcast came back around
    #[strum(serialize = "self")]
    OwnEvent,
}

/// Event identities already processed.
///
/// Unbounded unless a capacity is given, in which case the oldest identity
/// is forgotten first.
#[derive(Debug, Default)]
pub struct SeenEvents {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: Option<usize>,
}

impl SeenEvents {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if let Some(capacity) = self.capacity {
            while self.order.len() >= capacity {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.ids.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(id.to_string());
        }
        self.ids.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl ActorState {
    /// Admits an event at most once per identity. Check and insert happen
    /// under one write lock, so concurrent replays race to a single accept.
    pub async fn admit(&self, event_id: &str, source: &str) -> Admission {
        let admission = if source == self.identity() {
            Admission::OwnEvent
        } else {
            let mut shared = self.shared.write().await;
            if !shared.seen.insert(event_id) {
                Admission::Duplicate
            } else {
                if shared.peers.record(source) {
                    debug!("{} met {source}", self.identity());
                }
                Admission::Accept
            }
        };

        EVENTS_RECEIVED
            .with_label_values(&[admission.as_ref()])
            .inc();
        trace!("{} admission of {event_id} from {source}: {admission:?}", self.identity());
        admission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Conversation;
    use crate::mood::Mood;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn state() -> ActorState {
        ActorState::new("alice", Conversation::default(), Mood::Neutral, Instant::now(), None)
    }

    #[test]
    fn admission_labels() {
        assert_eq!(Admission::Accept.as_ref(), "accept");
        assert_eq!(Admission::Duplicate.as_ref(), "duplicate");
        assert_eq!(Admission::OwnEvent.as_ref(), "self");
    }

    #[tokio::test]
    async fn replay_is_admitted_once() {
        let state = state();
        assert_eq!(state.admit("1", "bob").await, Admission::Accept);
        for _ in 0..5 {
            assert_eq!(state.admit("1", "bob").await, Admission::Duplicate);
        }
        assert_eq!(state.peers().await, vec!["bob"]);
        assert_eq!(state.seen_count().await, 1);
    }

    #[tokio::test]
    async fn own_events_never_touch_state() {
        let state = state();
        for id in ["1", "2", "1"] {
            assert_eq!(state.admit(id, "alice").await, Admission::OwnEvent);
        }
        assert!(!state.has_peers().await);
        assert_eq!(state.seen_count().await, 0);

        // the id is still fresh for a real peer
        assert_eq!(state.admit("1", "bob").await, Admission::Accept);
    }

    #[tokio::test]
    async fn peers_accrue_regardless_of_order() {
        let events = [
            ("1", "bob"),
            ("2", "carol"),
            ("3", "bob"),
            ("4", "dave"),
            ("5", "carol"),
        ];
        let forward = state();
        let backward = state();
        for (id, source) in events {
            assert_eq!(forward.admit(id, source).await, Admission::Accept);
        }
        for (id, source) in events.iter().rev() {
            assert_eq!(backward.admit(id, source).await, Admission::Accept);
        }
        assert_eq!(forward.peers().await, vec!["bob", "carol", "dave"]);
        assert_eq!(forward.peers().await, backward.peers().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_replays_accept_once() {
        let state = Arc::new(state());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let mut accepted = 0;
                for id in 0..50 {
                    let source = format!("peer-{}", id % 5);
                    if state.admit(&id.to_string(), &source).await == Admission::Accept {
                        accepted += 1;
                    }
                    tokio::task::yield_now().await;
                }
                accepted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(state.peers().await.len(), 5);
        assert_eq!(state.seen_count().await, 50);
    }

    #[test]
    fn bounded_seen_set_forgets_oldest() {
        let mut seen = SeenEvents::new(Some(2));
        assert!(seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("c"));
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains("a"));
        assert!(seen.contains("b"));
        assert!(seen.contains("c"));
        assert!(seen.insert("a"));
    }

    #[test]
    fn unbounded_seen_set_keeps_everything() {
        let mut seen = SeenEvents::new(None);
        for id in 0..1000 {
            assert!(seen.insert(&id.to_string()));
        }
        assert_eq!(seen.len(), 1000);
        assert!(!seen.is_empty());
    }
}
