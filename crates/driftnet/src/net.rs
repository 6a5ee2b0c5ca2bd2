//! IPv4 addressing types shared between the agent and its host stack.
//!
//! The core does not parse or build real IP packets. It consumes a small view
//! of the IPv4 header ([`Ipv4Header`]) and hands back [`Route`]s; the
//! surrounding stack owns everything else.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// IP protocol number for ICMP. ICMP traffic is never routed epidemically.
pub const PROTO_ICMP: u8 = 1;

/// IP protocol number for UDP.
pub const PROTO_UDP: u8 = 17;

/// Index of a network device on the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// One IPv4 address assigned to an interface, with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    /// The local (unicast) address.
    pub local: Ipv4Addr,
    /// Network prefix length in bits, 0..=32.
    pub prefix_len: u8,
}

impl InterfaceAddress {
    /// Create an interface address from a local address and prefix length.
    pub fn new(local: Ipv4Addr, prefix_len: u8) -> Self {
        debug_assert!(prefix_len <= 32);
        Self { local, prefix_len }
    }

    /// The netmask implied by the prefix length.
    pub fn mask(&self) -> Ipv4Addr {
        let bits = (!0u32)
            .checked_shl(32 - u32::from(self.prefix_len))
            .unwrap_or(0);
        Ipv4Addr::from(bits)
    }

    /// The subnet-directed broadcast address.
    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = u32::from(self.mask());
        Ipv4Addr::from(u32::from(self.local) | !mask)
    }

    /// Where link-local broadcasts for this interface go: the directed
    /// broadcast, or the limited broadcast when the prefix covers the whole
    /// address.
    pub fn broadcast_target(&self) -> Ipv4Addr {
        if self.prefix_len == 32 {
            Ipv4Addr::BROADCAST
        } else {
            self.broadcast()
        }
    }

    /// Whether `addr` falls inside this interface's subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask());
        u32::from(addr) & mask == u32::from(self.local) & mask
    }

    /// Whether this is a loopback address.
    pub fn is_loopback(&self) -> bool {
        self.local.is_loopback()
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.local, self.prefix_len)
    }
}

/// The slice of the IPv4 header the routing core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    /// Originating address.
    pub source: Ipv4Addr,
    /// Final destination address.
    pub destination: Ipv4Addr,
    /// Remaining IP hop budget. The epidemic protocol does not rely on it;
    /// see [`DataHeader::hop_count`](crate::wire::DataHeader).
    pub ttl: u8,
    /// IP protocol number of the payload.
    pub protocol: u8,
}

/// Route handed back to the host stack by the agent's egress path.
///
/// There is no next-hop discipline: for anything not delivered locally the
/// gateway is the destination itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Source address the outgoing packet should carry.
    pub source: Ipv4Addr,
    /// Final destination.
    pub destination: Ipv4Addr,
    /// Next hop, `None` for local delivery.
    pub gateway: Option<Ipv4Addr>,
    /// Output device, `None` when no device matched.
    pub out_device: Option<DeviceId>,
}
