//! Pairwise anti-entropy between live agents.
//!
//! Two agents are wired back-to-back and frames are shuttled by hand the way
//! a host stack would: control frames into the receive handler, deferred
//! forwards through route_input with the stack's TTL spend applied. No real
//! network is involved.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use driftnet::{
    AgentConfig, Datagram, Deferred, DeviceId, EndpointId, IngressCallbacks, InterfaceAddress,
    Ipv4Header, NetworkPort, PROTO_UDP, Route, RoutingAgent, SummaryVector, Timestamp,
};

const LOOPBACK: DeviceId = DeviceId(0);
const RADIO: DeviceId = DeviceId(1);

/// Recording port. All nodes in a test share one clock.
struct HarnessPort {
    clock: Rc<Cell<Timestamp>>,
    next_endpoint: u64,
    unicasts: Vec<(Ipv4Addr, Datagram)>,
    broadcasts: Vec<(Ipv4Addr, Datagram)>,
    deferred: Vec<Deferred>,
}

impl HarnessPort {
    fn new(clock: Rc<Cell<Timestamp>>) -> Self {
        Self {
            clock,
            next_endpoint: 0,
            unicasts: Vec::new(),
            broadcasts: Vec::new(),
            deferred: Vec::new(),
        }
    }
}

impl NetworkPort for HarnessPort {
    fn now(&self) -> Timestamp {
        self.clock.get()
    }

    fn jitter_ms(&mut self, upper: u32) -> u64 {
        u64::from(upper) / 2
    }

    fn open_endpoint(&mut self, _device: DeviceId) -> EndpointId {
        let id = EndpointId(self.next_endpoint);
        self.next_endpoint += 1;
        id
    }

    fn close_endpoint(&mut self, _endpoint: EndpointId) {}

    fn broadcast(&mut self, _endpoint: EndpointId, dest: Ipv4Addr, frame: Datagram) {
        self.broadcasts.push((dest, frame));
    }

    fn unicast(&mut self, _endpoint: EndpointId, dest: Ipv4Addr, frame: Datagram) {
        self.unicasts.push((dest, frame));
    }

    fn arm_beacon_timer(&mut self, _delay: Duration) {}

    fn defer(&mut self, action: Deferred) {
        self.deferred.push(action);
    }
}

struct Node {
    agent: RoutingAgent,
    port: HarnessPort,
    address: Ipv4Addr,
    /// Data packets the forward callback handed back to the "stack".
    outbound: Rc<RefCell<Vec<(Route, Datagram, Ipv4Header)>>>,
    /// Payloads the local-deliver callback handed to the "application".
    delivered: Rc<RefCell<Vec<Vec<u8>>>>,
    /// Control unicasts this node has ever sent, for assertions.
    control_sent: usize,
}

impl Node {
    fn new(clock: Rc<Cell<Timestamp>>, address: Ipv4Addr, config: AgentConfig) -> Self {
        let mut port = HarnessPort::new(clock);
        let mut agent = RoutingAgent::new(config);
        agent.notify_interface_up(
            LOOPBACK,
            InterfaceAddress::new(Ipv4Addr::LOCALHOST, 8),
            &mut port,
        );
        agent.notify_interface_up(RADIO, InterfaceAddress::new(address, 24), &mut port);
        agent.start(&mut port);
        Self {
            agent,
            port,
            address,
            outbound: Rc::new(RefCell::new(Vec::new())),
            delivered: Rc::new(RefCell::new(Vec::new())),
            control_sent: 0,
        }
    }

    fn callbacks(&self) -> IngressCallbacks {
        let outbound = self.outbound.clone();
        let delivered = self.delivered.clone();
        IngressCallbacks {
            forward: Rc::new(move |route, datagram, header| {
                outbound.borrow_mut().push((*route, datagram, header));
            }),
            deliver: Rc::new(move |datagram, _, _| {
                delivered.borrow_mut().push(datagram.bytes().to_vec());
            }),
            error: Rc::new(|_, _, _| {}),
        }
    }

    /// Originate a payload through the loopback funnel.
    fn originate(&mut self, dest: Ipv4Addr, payload: &[u8]) {
        let datagram = Datagram::data(payload.to_vec());
        let header = Ipv4Header {
            source: self.address,
            destination: dest,
            ttl: 64,
            protocol: PROTO_UDP,
        };
        let route = self.agent.route_output(&datagram, &header);
        assert_eq!(route.out_device, Some(LOOPBACK));
        let callbacks = self.callbacks();
        assert!(
            self.agent
                .route_input(datagram, header, LOOPBACK, callbacks, &mut self.port)
        );
    }

    fn fire_beacon(&mut self) {
        self.agent.on_beacon_timer(&mut self.port);
    }
}

/// Shuttle frames between the two nodes until nothing moves.
fn pump(a: &mut Node, b: &mut Node) {
    loop {
        let moved = shuttle(a, b) + shuttle(b, a);
        if moved == 0 {
            break;
        }
    }
}

/// Move everything `from` has produced toward `to`. Returns how many items
/// were transferred.
fn shuttle(from: &mut Node, to: &mut Node) -> usize {
    let mut moved = 0;

    for (dest, frame) in std::mem::take(&mut from.port.broadcasts) {
        // Directed broadcast on the shared subnet reaches the peer.
        assert_eq!(dest, Ipv4Addr::new(10, 0, 0, 255));
        to.agent
            .on_receive(frame.bytes(), from.address, &mut to.port);
        moved += 1;
    }

    for (dest, frame) in std::mem::take(&mut from.port.unicasts) {
        from.control_sent += 1;
        if dest == to.address {
            to.agent
                .on_receive(frame.bytes(), from.address, &mut to.port);
        }
        moved += 1;
    }

    for action in std::mem::take(&mut from.port.deferred) {
        action();
        moved += 1;
    }

    let outbound = std::mem::take(&mut *from.outbound.borrow_mut());
    for (route, datagram, mut header) in outbound {
        // The stack spends one IP TTL forwarding; the agent pre-incremented.
        header.ttl -= 1;
        if route.gateway == Some(to.address) {
            let callbacks = to.callbacks();
            to.agent
                .route_input(datagram, header, RADIO, callbacks, &mut to.port);
        }
        moved += 1;
    }

    moved
}

fn clock() -> Rc<Cell<Timestamp>> {
    Rc::new(Cell::new(Timestamp::from_secs(1)))
}

#[test]
fn lower_address_initiates_the_exchange() {
    let clock = clock();
    let mut a = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 1), AgentConfig::default());
    let mut b = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 2), AgentConfig::default());

    // B beacons; A holds the lower address and initiates.
    b.fire_beacon();
    pump(&mut b, &mut a);
    assert!(a.control_sent >= 1);

    // A beacons; B holds the higher address and stays silent.
    let before = b.control_sent;
    a.fire_beacon();
    pump(&mut a, &mut b);
    assert_eq!(b.control_sent, before);
}

#[test]
fn one_cycle_converges_both_buffers() {
    let clock = clock();
    let far = Ipv4Addr::new(10, 0, 0, 50);
    let mut a = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 1), AgentConfig::default());
    let mut b = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 2), AgentConfig::default());

    a.originate(far, b"from-a-1");
    a.originate(far, b"from-a-2");
    b.originate(far, b"from-b-1");
    assert_eq!(a.agent.buffer().len(), 2);
    assert_eq!(b.agent.buffer().len(), 1);

    b.fire_beacon();
    pump(&mut b, &mut a);

    // Both buffers now hold the union of the pre-exchange contents.
    assert_eq!(a.agent.buffer().len(), 3);
    assert_eq!(b.agent.buffer().len(), 3);

    let all_a = a.agent.buffer().find_disjoint(&SummaryVector::new());
    let all_b = b.agent.buffer().find_disjoint(&SummaryVector::new());
    for id in all_b.iter() {
        assert!(all_a.contains(id), "B holds {id} that A lacks");
    }

    // Nothing was for either node, so no local deliveries.
    assert!(a.delivered.borrow().is_empty());
    assert!(b.delivered.borrow().is_empty());
}

#[test]
fn exchange_delivers_packets_addressed_to_the_peer() {
    let clock = clock();
    let mut a = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 1), AgentConfig::default());
    let mut b = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 2), AgentConfig::default());

    let b_addr = b.address;
    a.originate(b_addr, b"carried message");
    assert_eq!(a.agent.buffer().len(), 1);

    b.fire_beacon();
    pump(&mut b, &mut a);

    let delivered = b.delivered.borrow().clone();
    assert_eq!(delivered, vec![b"carried message".to_vec()]);

    // A second full cycle must not re-deliver the duplicate.
    clock.set(clock.get() + Duration::from_secs(30));
    b.fire_beacon();
    pump(&mut b, &mut a);
    assert_eq!(b.delivered.borrow().len(), 1);
}

#[test]
fn exchanges_inside_recent_period_run_once() {
    let clock = clock();
    let mut a = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 1), AgentConfig::default());
    let mut b = Node::new(clock.clone(), Ipv4Addr::new(10, 0, 0, 2), AgentConfig::default());

    b.fire_beacon();
    pump(&mut b, &mut a);
    let after_first = a.control_sent;
    assert!(after_first >= 1);

    // Beacons keep arriving inside the ten second window: no new session.
    for secs in [2u64, 4, 6] {
        clock.set(Timestamp::from_secs(1 + secs));
        b.fire_beacon();
        pump(&mut b, &mut a);
    }
    assert_eq!(a.control_sent, after_first);

    // Past the window the exchange runs again.
    clock.set(Timestamp::from_secs(20));
    b.fire_beacon();
    pump(&mut b, &mut a);
    assert!(a.control_sent > after_first);
}
