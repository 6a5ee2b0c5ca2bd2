//! # Driftnet
//!
//! Epidemic store-carry-forward routing for delay-tolerant mobile ad hoc
//! networks, after Vahdat and Becker's "Epidemic Routing for
//! Partially-Connected Ad Hoc Networks".
//!
//! Nodes with intermittent connectivity eventually deliver unicast datagrams
//! by buffering every packet they see and reconciling buffers pairwise
//! whenever two nodes come into radio contact. There is no routing table:
//! a node announces itself with jittered beacons, the lower-addressed side
//! of an encounter requests a summary vector exchange, and each side ships
//! the packets the other is missing. Packets die by hop budget or lifetime,
//! never by acknowledgement.
//!
//! ## Architecture
//!
//! - [`buffer`]: the bounded, content-addressed packet buffer
//! - [`wire`]: bit-exact codecs for control frames and the data header
//! - [`agent`]: the per-node state machine driving beacons and anti-entropy
//! - [`port`]: the contract between the agent and its host event loop
//! - [`config`]: agent tunables
//! - [`net`], [`packet`], [`time`]: addressing, datagram, and clock types
//!
//! The core is strictly single-threaded: the host runs every handler to
//! completion on one event loop, so there are no locks and no `Send` bounds.
//! A discrete-event harness for exercising whole populations lives in the
//! companion `driftnet-sim` crate.

pub mod agent;
pub mod buffer;
pub mod config;
pub mod error;
pub mod net;
pub mod packet;
pub mod port;
pub mod time;
pub mod wire;

// Re-export the main types
pub use agent::{EPIDEMIC_PORT, RoutingAgent};
pub use buffer::{BufferEntry, PacketBuffer};
pub use config::{AgentConfig, ConfigWarning};
pub use error::{SendError, WireError};
pub use net::{DeviceId, InterfaceAddress, Ipv4Header, PROTO_ICMP, PROTO_UDP, Route};
pub use packet::{ControlTag, Datagram, PacketId};
pub use port::{
    Deferred, EndpointId, ErrorCallback, IngressCallbacks, LocalDeliverCallback, NetworkPort,
    UnicastForwardCallback,
};
pub use time::Timestamp;
pub use wire::{ControlMessage, DataHeader, MessageType, SummaryVector};
