//! The per-node epidemic routing agent.
//!
//! Each node runs one [`RoutingAgent`]. It owns the packet buffer and the
//! UDP endpoints, broadcasts jittered beacons, and runs the pairwise
//! anti-entropy handshake with every peer it hears:
//!
//! ```text
//!   A (lower address)                 B (higher address)
//!         |<-------- BEACON ---------------|
//!         |--------- REPLY + SV(A) ------->|
//!         |<-- disjoint packets, REPLY_BACK + SV(B) --|
//!         |--- disjoint packets ---------->|
//! ```
//!
//! The agent keeps no routing table. Forwarding decisions come entirely from
//! buffer contents and summary-vector comparisons, bounded by the hop budget
//! and per-packet lifetime in the [`DataHeader`].

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferEntry, PacketBuffer};
use crate::config::AgentConfig;
use crate::net::{DeviceId, InterfaceAddress, Ipv4Header, PROTO_ICMP, Route};
use crate::packet::{Datagram, PacketId};
use crate::port::{EndpointId, IngressCallbacks, NetworkPort};
use crate::time::Timestamp;
use crate::wire::{ControlMessage, DataHeader, MessageType, SummaryVector};

/// Transport port for MANET routing protocols (RFC 5498).
pub const EPIDEMIC_PORT: u16 = 269;

/// One open endpoint and the interface it serves.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    id: EndpointId,
    device: DeviceId,
    iface: InterfaceAddress,
}

/// Store-carry-forward routing agent for one node.
pub struct RoutingAgent {
    config: AgentConfig,
    /// First non-loopback address assigned; identifies this node to peers.
    main_address: Option<Ipv4Addr>,
    /// Local sequence for ids of packets originated here.
    data_packet_counter: u16,
    /// Last time each peer was engaged in anti-entropy.
    host_contact_time: HashMap<Ipv4Addr, Timestamp>,
    /// One endpoint per up, non-loopback interface.
    endpoints: Vec<Endpoint>,
    /// Every up interface, loopback included, for egress device selection.
    devices: Vec<(DeviceId, InterfaceAddress)>,
    buffer: PacketBuffer,
}

impl RoutingAgent {
    /// Create an agent with the given configuration.
    pub fn new(config: AgentConfig) -> Self {
        for warning in config.validate() {
            warn!(%warning, "questionable agent configuration");
        }
        Self {
            buffer: PacketBuffer::new(config.queue_length),
            config,
            main_address: None,
            data_packet_counter: 0,
            host_contact_time: HashMap::new(),
            endpoints: Vec::new(),
            devices: Vec::new(),
        }
    }

    /// The agent's configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// This node's main address, once an interface is up.
    pub fn main_address(&self) -> Option<Ipv4Addr> {
        self.main_address
    }

    /// Read access to the packet buffer.
    pub fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    /// Start protocol operation: reset the packet counter and arm the first
    /// jittered beacon.
    pub fn start(&mut self, port: &mut dyn NetworkPort) {
        self.data_packet_counter = 0;
        self.buffer.set_max_queue_len(self.config.queue_length);
        self.arm_beacon(port);
    }

    /// Tear down: close every endpoint and forget all interface state. The
    /// buffer is dropped with the agent.
    pub fn shutdown(&mut self, port: &mut dyn NetworkPort) {
        for endpoint in self.endpoints.drain(..) {
            port.close_endpoint(endpoint.id);
        }
        self.devices.clear();
        self.host_contact_time.clear();
    }

    fn arm_beacon(&mut self, port: &mut dyn NetworkPort) {
        let jitter = port.jitter_ms(self.config.beacon_max_jitter_ms);
        port.arm_beacon_timer(self.config.beacon_interval + Duration::from_millis(jitter));
    }

    /// Beacon timer callback: broadcast on every endpoint, then re-arm with a
    /// fresh jitter draw.
    pub fn on_beacon_timer(&mut self, port: &mut dyn NetworkPort) {
        self.send_beacons(port);
        self.arm_beacon(port);
    }

    fn send_beacons(&mut self, port: &mut dyn NetworkPort) {
        // The header on a beacon is never consumed by the peer; a hop count
        // above one only keeps the receiver's ingress check from discarding
        // the frame.
        let header = DataHeader {
            packet_id: PacketId::NONE,
            hop_count: self.config.hop_count,
            timestamp: port.now(),
        };
        let mut frame = BytesMut::with_capacity(MessageType::WIRE_SIZE + DataHeader::WIRE_SIZE);
        MessageType::Beacon.encode(&mut frame);
        header.encode(&mut frame);
        let frame = frame.freeze();

        for endpoint in &self.endpoints {
            let dest = endpoint.iface.broadcast_target();
            trace!(%dest, device = %endpoint.device, "broadcasting beacon");
            port.broadcast(endpoint.id, dest, Datagram::control(frame.clone()));
        }
    }

    /// Receive callback for the agent's UDP endpoints.
    ///
    /// Runs the anti-entropy state machine. Malformed frames are logged and
    /// dropped; the agent never fails on wire input.
    pub fn on_receive(&mut self, frame: &[u8], sender: Ipv4Addr, port: &mut dyn NetworkPort) {
        self.buffer.drop_expired(port.now());

        match ControlMessage::decode(frame) {
            Ok(ControlMessage::Beacon) => {
                trace!(%sender, "beacon received");
                // Only the lower-addressed side of an encounter initiates,
                // and not while the peer is still in its cool-down.
                let initiate = self
                    .main_address
                    .is_some_and(|addr| u32::from(addr) < u32::from(sender));
                let now = port.now();
                if initiate && !self.is_host_contacted_recently(sender, now) {
                    self.send_summary_vector(sender, MessageType::Reply, port);
                }
            }
            Ok(ControlMessage::Reply(peer_summary)) => {
                debug!(%sender, packets = peer_summary.len(), "reply received");
                self.send_disjoint_packets(&peer_summary, sender, port);
                self.send_summary_vector(sender, MessageType::ReplyBack, port);
            }
            Ok(ControlMessage::ReplyBack(peer_summary)) => {
                debug!(%sender, packets = peer_summary.len(), "reply-back received");
                self.send_disjoint_packets(&peer_summary, sender, port);
            }
            Err(error) => {
                warn!(%sender, %error, "dropping malformed control frame");
            }
        }
    }

    /// Whether `host` was engaged in anti-entropy within the recent period.
    ///
    /// First contact records `now` and reports false. A contact inside the
    /// period reports true without refreshing, so the window measures from
    /// the start of the last exchange.
    fn is_host_contacted_recently(&mut self, host: Ipv4Addr, now: Timestamp) -> bool {
        match self.host_contact_time.get_mut(&host) {
            None => {
                self.host_contact_time.insert(host, now);
                false
            }
            Some(last) => {
                if now < *last + self.config.host_recent_period {
                    true
                } else {
                    *last = now;
                    false
                }
            }
        }
    }

    fn send_summary_vector(
        &mut self,
        dest: Ipv4Addr,
        kind: MessageType,
        port: &mut dyn NetworkPort,
    ) {
        debug_assert!(matches!(kind, MessageType::Reply | MessageType::ReplyBack));

        let summary = self.buffer.summary_vector(port.now());
        let mut frame = BytesMut::with_capacity(MessageType::WIRE_SIZE + summary.encoded_size());
        kind.encode(&mut frame);
        summary.encode(&mut frame);

        // Replies leave through the endpoint bound to the main address.
        let Some(endpoint) = self.main_endpoint() else {
            warn!(%dest, "no endpoint for main address, summary vector dropped");
            return;
        };
        debug!(%dest, %kind, packets = summary.len(), "sending summary vector");
        port.unicast(endpoint, dest, Datagram::control(frame.freeze()));
    }

    /// Stage every buffered packet the peer's summary lacks for immediate
    /// unicast to `dest`, in buffer-insertion order.
    fn send_disjoint_packets(
        &mut self,
        peer_summary: &SummaryVector,
        dest: Ipv4Addr,
        port: &mut dyn NetworkPort,
    ) {
        let wanted = self.buffer.find_disjoint(peer_summary);
        trace!(%dest, count = wanted.len(), "scheduling disjoint packets");
        for id in wanted.iter() {
            let entry = self.buffer.find(id);
            if entry.packet_id.is_none() {
                continue;
            }
            self.schedule_forward(entry, dest, port);
        }
    }

    fn schedule_forward(&self, entry: BufferEntry, dest: Ipv4Addr, port: &mut dyn NetworkPort) {
        // Never bounce a packet back to its source, and never forward
        // traffic addressed to this node.
        if dest == entry.header.source || self.is_my_own_address(entry.header.destination) {
            return;
        }

        let mut header = entry.header;
        // The host stack spends one IP TTL when it forwards; pre-increment so
        // the on-wire value is unchanged. Hop accounting lives in the
        // epidemic header, not in the IP TTL.
        header.ttl = header.ttl.saturating_add(1);

        let route = Route {
            source: header.source,
            destination: header.destination,
            gateway: Some(dest),
            out_device: self
                .main_address
                .and_then(|addr| self.device_for_address(addr)),
        };

        trace!(id = %entry.packet_id, %dest, "forwarding buffered packet");
        let forward = entry.forward.clone();
        let datagram = entry.datagram.clone();
        port.defer(Box::new(move || forward(&route, datagram, header)));
    }

    /// Egress route selection for packets originated on this node.
    ///
    /// Control packets go out the device whose subnet holds the destination.
    /// Data packets are deliberately routed to the loopback device so they
    /// re-enter through [`route_input`](Self::route_input), where they are
    /// stamped and buffered.
    pub fn route_output(&self, datagram: &Datagram, header: &Ipv4Header) -> Route {
        if self.is_my_own_address(header.destination) {
            trace!(dest = %header.destination, "route output: local delivery");
            return Route {
                source: header.destination,
                destination: header.destination,
                gateway: None,
                out_device: None,
            };
        }

        let source = self.main_address.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let out_device = if datagram.tag().is_control() {
            self.device_for_subnet(header.destination)
        } else {
            self.loopback_device()
        };
        Route {
            source,
            destination: header.destination,
            gateway: Some(header.destination),
            out_device,
        }
    }

    /// Ingress decision for a packet handed up by the host stack.
    ///
    /// Returns true when the packet was consumed: delivered locally,
    /// buffered for gossip, or deliberately discarded. Returns false when
    /// the stack should treat the packet as unroutable.
    pub fn route_input(
        &mut self,
        datagram: Datagram,
        header: Ipv4Header,
        in_device: DeviceId,
        callbacks: IngressCallbacks,
        port: &mut dyn NetworkPort,
    ) -> bool {
        if self.endpoints.is_empty() {
            warn!("no epidemic interfaces, packet ignored");
            return false;
        }
        if header.ttl < 1 {
            debug!(src = %header.source, "ttl expired, packet dropped");
            return false;
        }
        if header.protocol == PROTO_ICMP {
            debug!(src = %header.source, "icmp is not routed epidemically");
            return false;
        }

        let now = port.now();

        // Local delivery: the destination matches the broadcast or the main
        // address of an interface on the arriving device.
        for i in 0..self.endpoints.len() {
            let endpoint = self.endpoints[i];
            if endpoint.device != in_device {
                continue;
            }
            let for_us = header.destination == endpoint.iface.broadcast()
                || header.destination.is_broadcast()
                || Some(header.destination) == self.main_address;
            if !for_us {
                continue;
            }
            return self.deliver_local(datagram, header, in_device, callbacks);
        }

        // Not addressed to us: stamp or refresh the epidemic header and keep
        // the packet for gossip. The counter ticks for every packet that
        // reaches this path.
        self.data_packet_counter = self.data_packet_counter.wrapping_add(1);
        let local_id = PacketId::compose(header.source, self.data_packet_counter);

        if Some(header.source) == self.main_address {
            // Born here: fresh header, lifetime measured from now.
            let data_header = DataHeader {
                packet_id: local_id,
                hop_count: self.config.hop_count,
                timestamp: now,
            };
            let mut copy = datagram;
            copy.push_data_header(&data_header);
            debug!(id = %local_id, dest = %header.destination, "buffering locally originated packet");
            let entry = BufferEntry::new(copy, header, callbacks.forward, callbacks.error)
                .with_packet_id(local_id)
                .with_expire_time(now + self.config.queue_entry_expire_time);
            self.buffer.enqueue(entry);
            return true;
        }

        // In transit: peel the header it already carries.
        let mut copy = datagram;
        let data_header = match copy.strip_data_header() {
            Ok(data_header) => data_header,
            Err(error) => {
                warn!(src = %header.source, %error, "malformed epidemic header on forward path");
                return true;
            }
        };

        let expires = data_header.timestamp + self.config.queue_entry_expire_time;
        if data_header.hop_count <= 1 || expires < now {
            debug!(
                id = %data_header.packet_id,
                hops = data_header.hop_count,
                "hop budget or lifetime exhausted, not stored"
            );
            return true;
        }

        let refreshed = DataHeader {
            hop_count: data_header.hop_count - 1,
            ..data_header
        };
        copy.push_data_header(&refreshed);
        trace!(id = %data_header.packet_id, hops = refreshed.hop_count, "buffering packet in transit");
        let entry = BufferEntry::new(copy, header, callbacks.forward, callbacks.error)
            .with_packet_id(data_header.packet_id)
            .with_expire_time(expires);
        self.buffer.enqueue(entry);
        true
    }

    /// Local-delivery leg of the ingress path: record data packets for
    /// duplicate suppression, strip routing metadata, deliver once.
    fn deliver_local(
        &mut self,
        datagram: Datagram,
        header: Ipv4Header,
        in_device: DeviceId,
        callbacks: IngressCallbacks,
    ) -> bool {
        let mut local_copy = datagram.clone();
        let mut duplicate = false;

        if !datagram.tag().is_control() {
            match local_copy.strip_data_header() {
                Ok(data_header) => {
                    if self.buffer.find(data_header.packet_id).packet_id.is_none() {
                        let entry = BufferEntry::new(
                            datagram,
                            header,
                            callbacks.forward,
                            callbacks.error,
                        )
                        .with_packet_id(data_header.packet_id)
                        .with_expire_time(
                            data_header.timestamp + self.config.queue_entry_expire_time,
                        );
                        self.buffer.enqueue(entry);
                    } else {
                        duplicate = true;
                    }
                }
                Err(error) => {
                    warn!(src = %header.source, %error, "malformed epidemic header at delivery");
                    return true;
                }
            }
        }

        if duplicate {
            trace!(src = %header.source, "suppressing duplicate delivery");
        } else {
            local_copy.clear_tag();
            (callbacks.deliver)(local_copy, header, in_device);
        }
        true
    }

    /// Interface came up with `iface` assigned. Loopback interfaces are
    /// recorded for egress selection but get no endpoint.
    pub fn notify_interface_up(
        &mut self,
        device: DeviceId,
        iface: InterfaceAddress,
        port: &mut dyn NetworkPort,
    ) {
        self.devices.retain(|(d, _)| *d != device);
        self.devices.push((device, iface));
        if iface.is_loopback() {
            return;
        }
        if self.main_address.is_none() {
            self.main_address = Some(iface.local);
            debug!(address = %iface.local, "adopted main address");
        }
        let id = port.open_endpoint(device);
        self.endpoints.push(Endpoint { id, device, iface });
        debug!(%device, address = %iface.local, "epidemic endpoint open");
    }

    /// Interface went down: close its endpoint and forget it.
    pub fn notify_interface_down(&mut self, device: DeviceId, port: &mut dyn NetworkPort) {
        self.devices.retain(|(d, _)| *d != device);
        if let Some(pos) = self.endpoints.iter().position(|ep| ep.device == device) {
            let endpoint = self.endpoints.remove(pos);
            port.close_endpoint(endpoint.id);
            debug!(%device, "epidemic endpoint closed");
        }
    }

    /// Address added to an up interface. The protocol refuses interfaces
    /// carrying more than one address.
    pub fn notify_add_address(
        &mut self,
        device: DeviceId,
        iface: InterfaceAddress,
        address_count: usize,
        port: &mut dyn NetworkPort,
    ) {
        if address_count != 1 {
            warn!(%device, "multiple addresses per interface are not supported, address ignored");
            return;
        }
        if iface.is_loopback() {
            return;
        }
        if self.endpoints.iter().any(|ep| ep.device == device) {
            return;
        }
        self.devices.retain(|(d, _)| *d != device);
        self.devices.push((device, iface));
        if self.main_address.is_none() {
            self.main_address = Some(iface.local);
        }
        let id = port.open_endpoint(device);
        self.endpoints.push(Endpoint { id, device, iface });
        debug!(%device, address = %iface.local, "epidemic endpoint open after address add");
    }

    /// Address removed. Closes the matching endpoint; when the interface
    /// retains another address, a fresh endpoint is opened against it.
    pub fn notify_remove_address(
        &mut self,
        device: DeviceId,
        iface: InterfaceAddress,
        remaining: Option<InterfaceAddress>,
        port: &mut dyn NetworkPort,
    ) {
        let Some(pos) = self
            .endpoints
            .iter()
            .position(|ep| ep.device == device && ep.iface == iface)
        else {
            trace!(%device, "removed address was not participating");
            return;
        };
        let endpoint = self.endpoints.remove(pos);
        port.close_endpoint(endpoint.id);
        self.devices.retain(|(d, _)| *d != device);

        if let Some(next) = remaining {
            self.devices.push((device, next));
            let id = port.open_endpoint(device);
            self.endpoints.push(Endpoint {
                id,
                device,
                iface: next,
            });
        }
    }

    /// Whether `addr` belongs to one of this node's epidemic interfaces.
    fn is_my_own_address(&self, addr: Ipv4Addr) -> bool {
        self.endpoints.iter().any(|ep| ep.iface.local == addr)
    }

    /// The endpoint bound to the main address. Loopback never appears here:
    /// no endpoint is opened for loopback interfaces.
    fn main_endpoint(&self) -> Option<EndpointId> {
        self.main_address.and_then(|addr| {
            self.endpoints
                .iter()
                .find(|ep| ep.iface.local == addr)
                .map(|ep| ep.id)
        })
    }

    fn device_for_address(&self, addr: Ipv4Addr) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, iface)| iface.local == addr)
            .map(|(device, _)| *device)
    }

    fn device_for_subnet(&self, dest: Ipv4Addr) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, iface)| iface.contains(dest))
            .map(|(device, _)| *device)
    }

    fn loopback_device(&self) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, iface)| iface.is_loopback())
            .map(|(device, _)| *device)
    }
}
