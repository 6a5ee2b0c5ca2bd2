//! Canned topologies for experiments and integration tests.

use driftnet::AgentConfig;

use crate::node::NodeId;
use crate::sim::Simulator;

/// A chain 0-1-…-(n-1): every node is in range of its neighbors only, so
/// data can only spread through pairwise contacts.
pub fn chain(n: usize, config: AgentConfig, seed: u64) -> (Simulator, Vec<NodeId>) {
    let mut sim = Simulator::new(seed);
    let ids: Vec<NodeId> = (0..n).map(|_| sim.add_node(config.clone())).collect();
    for pair in ids.windows(2) {
        sim.connect(pair[0], pair[1]);
    }
    (sim, ids)
}

/// A clique: every node hears every other.
pub fn clique(n: usize, config: AgentConfig, seed: u64) -> (Simulator, Vec<NodeId>) {
    let mut sim = Simulator::new(seed);
    let ids: Vec<NodeId> = (0..n).map(|_| sim.add_node(config.clone())).collect();
    for i in 0..ids.len() {
        for j in i + 1..ids.len() {
            sim.connect(ids[i], ids[j]);
        }
    }
    (sim, ids)
}
