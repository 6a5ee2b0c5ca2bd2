//! One simulated node: a routing agent wired to the simulated host stack.

use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

use tracing::{debug, warn};

use driftnet::{
    AgentConfig, DataHeader, Datagram, DeviceId, IngressCallbacks, InterfaceAddress, Ipv4Header,
    PROTO_UDP, RoutingAgent, Timestamp,
};

use crate::event::Transmission;
use crate::host::{PortOp, SimPort};

/// Index of a node inside the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A packet that reached a node's application sink.
#[derive(Debug, Clone)]
pub struct DeliveredPacket {
    /// Application payload, epidemic header stripped.
    pub payload: Vec<u8>,
    /// IP source of the delivery.
    pub source: Ipv4Addr,
    /// Simulation time of delivery.
    pub at: Timestamp,
    /// The epidemic header the packet arrived with, when it was a data
    /// packet from the network.
    pub data_header: Option<DataHeader>,
}

/// Per-node traffic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub beacons_sent: u64,
    pub replies_sent: u64,
    pub reply_backs_sent: u64,
    pub forwards_sent: u64,
}

/// A routing agent plus its host-stack glue.
///
/// Every node has a loopback device and one radio device on the shared
/// subnet. The glue implements the three host responsibilities the core
/// leaves outside: the loopback funnel for locally originated data, the IP
/// TTL spend on forwarding, and local protocol demux.
pub struct SimNode {
    pub agent: RoutingAgent,
    pub port: SimPort,
    pub address: Ipv4Addr,
    pub delivered: Vec<DeliveredPacket>,
    pub stats: NodeStats,
}

/// Loopback device index on every node.
pub const LOOPBACK_DEVICE: DeviceId = DeviceId(0);
/// Radio device index on every node.
pub const RADIO_DEVICE: DeviceId = DeviceId(1);

impl SimNode {
    /// Bring up a node at `address/prefix` and start its agent.
    pub fn new(address: Ipv4Addr, prefix_len: u8, config: AgentConfig, seed: u64) -> Self {
        let mut port = SimPort::new(seed);
        let mut agent = RoutingAgent::new(config);
        agent.notify_interface_up(
            LOOPBACK_DEVICE,
            InterfaceAddress::new(Ipv4Addr::LOCALHOST, 8),
            &mut port,
        );
        agent.notify_interface_up(
            RADIO_DEVICE,
            InterfaceAddress::new(address, prefix_len),
            &mut port,
        );
        agent.start(&mut port);

        Self {
            agent,
            port,
            address,
            delivered: Vec::new(),
            stats: NodeStats::default(),
        }
    }

    /// Ingress callbacks that stage their effects in the port outbox.
    pub fn callbacks(&self) -> IngressCallbacks {
        let forward_outbox = self.port.outbox_handle();
        let deliver_outbox = self.port.outbox_handle();
        IngressCallbacks {
            forward: Rc::new(move |route, frame, header| {
                forward_outbox.borrow_mut().push(PortOp::Forward {
                    route: *route,
                    frame,
                    header,
                });
            }),
            deliver: Rc::new(move |frame, header, device| {
                deliver_outbox.borrow_mut().push(PortOp::Deliver {
                    frame,
                    header,
                    device,
                });
            }),
            error: Rc::new(|_, header, error| {
                warn!(dest = %header.destination, %error, "send failed");
            }),
        }
    }

    /// An application on this node sends `payload` toward `dest`.
    ///
    /// Egress goes through the agent's RouteOutput; data is funneled to the
    /// loopback device and re-enters RouteInput where it is stamped and
    /// buffered.
    pub fn app_send(&mut self, dest: Ipv4Addr, payload: Vec<u8>, now: Timestamp) {
        self.port.set_now(now);
        let datagram = Datagram::data(payload);
        let header = Ipv4Header {
            source: self.address,
            destination: dest,
            ttl: 64,
            protocol: PROTO_UDP,
        };
        let route = self.agent.route_output(&datagram, &header);

        if route.gateway.is_none() {
            // Talking to ourselves: the stack short-circuits delivery.
            self.delivered.push(DeliveredPacket {
                payload: datagram.bytes().to_vec(),
                source: self.address,
                at: now,
                data_header: None,
            });
            return;
        }

        debug_assert_eq!(route.out_device, Some(LOOPBACK_DEVICE));
        let callbacks = self.callbacks();
        let consumed =
            self.agent
                .route_input(datagram, header, LOOPBACK_DEVICE, callbacks, &mut self.port);
        if !consumed {
            debug!(node = %self.address, "origination not consumed by the agent");
        }
    }

    /// The beacon timer fired.
    pub fn handle_beacon_timer(&mut self, now: Timestamp) {
        self.port.set_now(now);
        self.agent.on_beacon_timer(&mut self.port);
    }

    /// A transmission arrived on the radio.
    pub fn handle_delivery(&mut self, tx: &Transmission, now: Timestamp) {
        self.port.set_now(now);
        let callbacks = self.callbacks();
        self.agent.route_input(
            tx.frame.clone(),
            tx.header,
            RADIO_DEVICE,
            callbacks,
            &mut self.port,
        );
    }

    /// A control frame reached the agent's UDP endpoint.
    pub fn handle_agent_receive(&mut self, frame: &Datagram, sender: Ipv4Addr, now: Timestamp) {
        self.port.set_now(now);
        self.agent
            .on_receive(frame.bytes(), sender, &mut self.port);
    }
}
