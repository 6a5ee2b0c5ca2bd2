//! The discrete-event simulator.
//!
//! A single time-ordered event queue drives every node. Each event runs one
//! agent handler to completion, then the node's staged port operations are
//! drained and turned into future events. Same-time events dispatch in the
//! order they were scheduled, which preserves the core's ordering contract
//! for schedule-at-zero sends.

use std::collections::BinaryHeap;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, trace};

use driftnet::{AgentConfig, Datagram, EPIDEMIC_PORT, Ipv4Header, PROTO_UDP, Timestamp};

use crate::event::{Event, ScheduledEvent, Transmission};
use crate::host::PortOp;
use crate::metrics::SimStats;
use crate::node::{DeliveredPacket, NodeId, SimNode};
use crate::topology::Topology;

/// Discrete-event simulation of an epidemic routing population.
pub struct Simulator {
    nodes: Vec<SimNode>,
    topology: Topology,
    current_time: Timestamp,
    queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    seed: u64,
    stats: SimStats,
}

impl Simulator {
    /// Create a simulator; `seed` drives every node's jitter source.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            queue: BinaryHeap::new(),
            next_seq: 0,
            seed,
            stats: SimStats::default(),
        }
    }

    /// Replace the topology. Call before adding links.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Add a node on the shared 10.0.0.0/24 subnet. Addresses are assigned
    /// in creation order starting at 10.0.0.1.
    pub fn add_node(&mut self, config: AgentConfig) -> NodeId {
        let index = self.nodes.len();
        assert!(index < 254, "subnet address pool exhausted");
        let address = Ipv4Addr::new(10, 0, 0, index as u8 + 1);
        let seed = self
            .seed
            .wrapping_add(index as u64)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);

        let node = SimNode::new(address, 24, config, seed);
        node.port.set_now(self.current_time);
        self.nodes.push(node);

        let id = NodeId(index);
        // The agent armed its first beacon during start.
        self.drain(id, None);
        id
    }

    /// Put two nodes in radio range.
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        self.topology.add_link(a, b);
    }

    /// Take two nodes out of radio range.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) {
        self.topology.remove_link(a, b);
    }

    /// Queue an application send for a future time.
    pub fn send_at(&mut self, time: Timestamp, from: NodeId, to: NodeId, payload: Vec<u8>) {
        let dest = self.nodes[to.0].address;
        self.schedule(
            time,
            Event::AppSend {
                from,
                dest,
                payload,
            },
        );
    }

    /// Schedule a link failure.
    pub fn link_down_at(&mut self, time: Timestamp, a: NodeId, b: NodeId) {
        self.schedule(time, Event::LinkDown { a, b });
    }

    /// Schedule a link recovery.
    pub fn link_up_at(&mut self, time: Timestamp, a: NodeId, b: NodeId) {
        self.schedule(time, Event::LinkUp { a, b });
    }

    /// A node by id.
    pub fn node(&self, id: NodeId) -> &SimNode {
        &self.nodes[id.0]
    }

    /// All node ids.
    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).map(NodeId).collect()
    }

    /// A node's address.
    pub fn address_of(&self, id: NodeId) -> Ipv4Addr {
        self.nodes[id.0].address
    }

    /// Current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// Aggregate counters.
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Run until `end`, then advance the clock to `end`.
    pub fn run_until(&mut self, end: Timestamp) {
        while let Some(head) = self.queue.peek() {
            if head.time > end {
                break;
            }
            let scheduled = self.queue.pop().expect("peeked event");
            if scheduled.time > self.current_time {
                self.current_time = scheduled.time;
            }
            self.process(scheduled.event);
        }
        if end > self.current_time {
            self.current_time = end;
        }
    }

    /// Run for `duration` of simulated time.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.current_time + duration);
    }

    fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledEvent { time, seq, event });
    }

    fn process(&mut self, event: Event) {
        match event {
            Event::BeaconTimer { node } => {
                self.nodes[node.0].handle_beacon_timer(self.current_time);
                self.drain(node, None);
            }
            Event::Delivery { to, tx } => {
                self.nodes[to.0].handle_delivery(&tx, self.current_time);
                self.drain(to, Some(&tx));
            }
            Event::AppSend {
                from,
                dest,
                payload,
            } => {
                self.stats.app_sends += 1;
                self.nodes[from.0].app_send(dest, payload, self.current_time);
                self.drain(from, None);
            }
            Event::LinkUp { a, b } => {
                debug!(%a, %b, "link up");
                self.topology.add_link(a, b);
            }
            Event::LinkDown { a, b } => {
                debug!(%a, %b, "link down");
                self.topology.remove_link(a, b);
            }
        }
    }

    /// Drain one node's staged operations until nothing new appears.
    ///
    /// Deferred actions run first each round: they are the agent's
    /// schedule-at-zero sends and may stage further operations.
    fn drain(&mut self, node: NodeId, tx: Option<&Transmission>) {
        loop {
            let deferred = self.nodes[node.0].port.take_deferred();
            let ran_deferred = !deferred.is_empty();
            for action in deferred {
                action();
            }
            let ops = self.nodes[node.0].port.take_ops();
            if !ran_deferred && ops.is_empty() {
                break;
            }
            for op in ops {
                self.apply_op(node, op, tx);
            }
        }
    }

    fn apply_op(&mut self, node: NodeId, op: PortOp, tx: Option<&Transmission>) {
        let now = self.current_time;
        let delay = self.topology.delay();
        match op {
            PortOp::ArmBeacon {
                delay: beacon_delay,
            } => {
                self.schedule(now + beacon_delay, Event::BeaconTimer { node });
            }
            PortOp::Broadcast { dest, frame, .. } => {
                self.count_control(node, &frame);
                let header = Ipv4Header {
                    source: self.nodes[node.0].address,
                    destination: dest,
                    ttl: 64,
                    protocol: PROTO_UDP,
                };
                for peer in self.topology.neighbors(node) {
                    self.schedule(
                        now + delay,
                        Event::Delivery {
                            to: peer,
                            tx: Transmission {
                                header,
                                frame: frame.clone(),
                                udp_port: Some(EPIDEMIC_PORT),
                            },
                        },
                    );
                }
            }
            PortOp::Unicast { dest, frame, .. } => {
                self.count_control(node, &frame);
                let header = Ipv4Header {
                    source: self.nodes[node.0].address,
                    destination: dest,
                    ttl: 64,
                    protocol: PROTO_UDP,
                };
                match self.node_by_address(dest) {
                    Some(peer) if self.topology.connected(node, peer) => {
                        self.schedule(
                            now + delay,
                            Event::Delivery {
                                to: peer,
                                tx: Transmission {
                                    header,
                                    frame,
                                    udp_port: Some(EPIDEMIC_PORT),
                                },
                            },
                        );
                    }
                    _ => {
                        trace!(from = %node, %dest, "control unicast lost");
                        self.stats.control_lost += 1;
                    }
                }
            }
            PortOp::Forward {
                route,
                frame,
                mut header,
            } => {
                // The IP layer spends one TTL on the forward; the agent
                // pre-incremented to compensate.
                header.ttl = header.ttl.saturating_sub(1);
                self.stats.data_forwards += 1;
                self.nodes[node.0].stats.forwards_sent += 1;

                let gateway = route.gateway.unwrap_or(header.destination);
                match self.node_by_address(gateway) {
                    Some(peer) if self.topology.connected(node, peer) => {
                        self.schedule(
                            now + delay,
                            Event::Delivery {
                                to: peer,
                                tx: Transmission {
                                    header,
                                    frame,
                                    udp_port: None,
                                },
                            },
                        );
                    }
                    _ => {
                        trace!(from = %node, %gateway, "data forward lost");
                        self.stats.forwards_lost += 1;
                    }
                }
            }
            PortOp::Deliver { frame, header, .. } => match tx.and_then(|t| t.udp_port) {
                Some(port) if port == EPIDEMIC_PORT => {
                    self.nodes[node.0].handle_agent_receive(&frame, header.source, now);
                }
                _ => {
                    let data_header = tx.and_then(|t| t.frame.peek_data_header().ok());
                    debug!(at = %node, src = %header.source, "application delivery");
                    self.stats.deliveries += 1;
                    self.nodes[node.0].delivered.push(DeliveredPacket {
                        payload: frame.bytes().to_vec(),
                        source: header.source,
                        at: now,
                        data_header,
                    });
                }
            },
        }
    }

    fn node_by_address(&self, address: Ipv4Addr) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.address == address)
            .map(NodeId)
    }

    fn count_control(&mut self, node: NodeId, frame: &Datagram) {
        let stats = &mut self.nodes[node.0].stats;
        match frame.bytes().first() {
            Some(0) => {
                stats.beacons_sent += 1;
                self.stats.beacons_sent += 1;
            }
            Some(1) => {
                stats.replies_sent += 1;
                self.stats.replies_sent += 1;
            }
            Some(2) => {
                stats.reply_backs_sent += 1;
                self.stats.reply_backs_sent += 1;
            }
            _ => {}
        }
    }
}
