//! Radio contact graph.
//!
//! Links model "in radio range": beacons fan out along them and unicasts
//! only arrive while a link is up. All nodes share one subnet; reachability
//! is the graph's business, not addressing's.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::node::NodeId;

/// Undirected contact graph with a uniform propagation delay.
#[derive(Debug, Clone)]
pub struct Topology {
    adjacency: HashMap<usize, HashSet<usize>>,
    delay: Duration,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// An empty graph with a 1 ms propagation delay.
    pub fn new() -> Self {
        Self {
            adjacency: HashMap::new(),
            delay: Duration::from_millis(1),
        }
    }

    /// Set the propagation delay for every link.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The propagation delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Connect two nodes.
    pub fn add_link(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        self.adjacency.entry(a.0).or_default().insert(b.0);
        self.adjacency.entry(b.0).or_default().insert(a.0);
    }

    /// Disconnect two nodes.
    pub fn remove_link(&mut self, a: NodeId, b: NodeId) {
        if let Some(peers) = self.adjacency.get_mut(&a.0) {
            peers.remove(&b.0);
        }
        if let Some(peers) = self.adjacency.get_mut(&b.0) {
            peers.remove(&a.0);
        }
    }

    /// Whether two nodes are in range of each other.
    pub fn connected(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency
            .get(&a.0)
            .is_some_and(|peers| peers.contains(&b.0))
    }

    /// The nodes in range of `node`, in index order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut peers: Vec<usize> = self
            .adjacency
            .get(&node.0)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        peers.sort_unstable();
        peers.into_iter().map(NodeId).collect()
    }
}
