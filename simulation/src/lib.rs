//! # Driftnet simulation harness
//!
//! Deterministic discrete-event simulation for whole populations of
//! [`driftnet`] routing agents: a time-ordered event queue, a radio contact
//! graph, and per-node host-stack glue (loopback funnel, IP TTL spend on
//! forwards, local protocol demux).
//!
//! ```rust
//! use std::time::Duration;
//! use driftnet::AgentConfig;
//! use driftnet_sim::scenario;
//!
//! let (mut sim, ids) = scenario::chain(3, AgentConfig::default(), 42);
//! sim.send_at(driftnet::Timestamp::from_secs(1), ids[0], ids[2], b"hi".to_vec());
//! sim.run_for(Duration::from_secs(60));
//! assert!(!sim.node(ids[2]).delivered.is_empty());
//! ```

pub mod event;
pub mod host;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use event::{Event, Transmission};
pub use host::{PortOp, SimPort};
pub use metrics::SimStats;
pub use node::{DeliveredPacket, NodeId, NodeStats, SimNode};
pub use sim::Simulator;
pub use topology::Topology;
