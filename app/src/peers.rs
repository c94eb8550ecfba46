use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::HashSet;

/// Identities of every remote actor this actor has heard from.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: HashSet<String>,
}

impl PeerDirectory {
    /// Returns true if the peer was not known before.
    pub fn record(&mut self, identity: &str) -> bool {
        if self.peers.contains(identity) {
            return false;
        }
        self.peers.insert(identity.to_string())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.peers.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.peers.iter().choose(rng).cloned()
    }

    /// Sorted copy, for logs and summaries.
    pub fn snapshot(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().cloned().collect();
        peers.sort();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn record_is_idempotent() {
        let mut peers = PeerDirectory::default();
        assert!(peers.record("bob"));
        assert!(!peers.record("bob"));
        assert!(peers.record("carol"));
        assert_eq!(peers.len(), 2);
        assert!(peers.contains("bob"));
        assert_eq!(peers.snapshot(), vec!["bob", "carol"]);
    }

    #[test]
    fn choose_from_known_peers() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut peers = PeerDirectory::default();
        assert_eq!(peers.choose(&mut rng), None);

        peers.record("bob");
        peers.record("carol");
        for _ in 0..20 {
            let peer = peers.choose(&mut rng).unwrap();
            assert!(peers.contains(&peer));
        }
    }
}
