//! The simulated host stack's side of the [`NetworkPort`] contract.
//!
//! Agent handlers record their effects as [`PortOp`]s in a shared outbox;
//! the simulator drains the outbox after each handler and turns the ops into
//! scheduled events. Deferred actions are held separately and run after the
//! handler returns, which gives the agent its schedule-at-zero semantics.

use std::cell::Cell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use driftnet::{
    Datagram, Deferred, DeviceId, EndpointId, Ipv4Header, NetworkPort, Route, Timestamp,
};

/// One effect an agent handler asked the host stack for.
pub enum PortOp {
    /// Broadcast a control frame.
    Broadcast {
        endpoint: EndpointId,
        dest: Ipv4Addr,
        frame: Datagram,
    },
    /// Unicast a control frame.
    Unicast {
        endpoint: EndpointId,
        dest: Ipv4Addr,
        frame: Datagram,
    },
    /// Re-arm the beacon timer.
    ArmBeacon { delay: Duration },
    /// A buffered data packet handed back through the forward callback.
    Forward {
        route: Route,
        frame: Datagram,
        header: Ipv4Header,
    },
    /// A packet handed up through the local-deliver callback.
    Deliver {
        frame: Datagram,
        header: Ipv4Header,
        device: DeviceId,
    },
}

/// Shared handle to a node's pending port operations.
pub type Outbox = Rc<std::cell::RefCell<Vec<PortOp>>>;

/// Virtual-time [`NetworkPort`] backed by the simulator.
pub struct SimPort {
    now: Cell<Timestamp>,
    rng: StdRng,
    outbox: Outbox,
    deferred: Vec<Deferred>,
    next_endpoint: u64,
    open: Vec<(EndpointId, DeviceId)>,
}

impl SimPort {
    /// Create a port with a seeded jitter source.
    pub fn new(seed: u64) -> Self {
        Self {
            now: Cell::new(Timestamp::ZERO),
            rng: StdRng::seed_from_u64(seed),
            outbox: Rc::new(std::cell::RefCell::new(Vec::new())),
            deferred: Vec::new(),
            next_endpoint: 0,
            open: Vec::new(),
        }
    }

    /// Advance the port's clock. Called by the simulator before every
    /// handler.
    pub fn set_now(&self, now: Timestamp) {
        self.now.set(now);
    }

    /// A handle callbacks can capture to stage ops from outside the agent.
    pub fn outbox_handle(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Take all staged ops.
    pub fn take_ops(&mut self) -> Vec<PortOp> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Take all deferred actions.
    pub fn take_deferred(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred)
    }

    /// Endpoints currently open.
    pub fn open_endpoints(&self) -> &[(EndpointId, DeviceId)] {
        &self.open
    }
}

impl NetworkPort for SimPort {
    fn now(&self) -> Timestamp {
        self.now.get()
    }

    fn jitter_ms(&mut self, upper: u32) -> u64 {
        self.rng.random_range(0..=u64::from(upper))
    }

    fn open_endpoint(&mut self, device: DeviceId) -> EndpointId {
        let id = EndpointId(self.next_endpoint);
        self.next_endpoint += 1;
        self.open.push((id, device));
        id
    }

    fn close_endpoint(&mut self, endpoint: EndpointId) {
        self.open.retain(|(id, _)| *id != endpoint);
    }

    fn broadcast(&mut self, endpoint: EndpointId, dest: Ipv4Addr, frame: Datagram) {
        self.outbox.borrow_mut().push(PortOp::Broadcast {
            endpoint,
            dest,
            frame,
        });
    }

    fn unicast(&mut self, endpoint: EndpointId, dest: Ipv4Addr, frame: Datagram) {
        self.outbox.borrow_mut().push(PortOp::Unicast {
            endpoint,
            dest,
            frame,
        });
    }

    fn arm_beacon_timer(&mut self, delay: Duration) {
        self.outbox.borrow_mut().push(PortOp::ArmBeacon { delay });
    }

    fn defer(&mut self, action: Deferred) {
        self.deferred.push(action);
    }
}
