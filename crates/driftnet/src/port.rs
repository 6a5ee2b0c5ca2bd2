//! The host-stack contract.
//!
//! The agent runs inside a single-threaded cooperative event loop owned by
//! its host (a discrete-event simulator, or any reactor with one timer
//! wheel). [`NetworkPort`] is everything the agent asks of that host: a
//! clock, a jitter source, endpoint management, control-frame transmission,
//! the beacon timer, and schedule-at-zero deferral.
//!
//! Deferral exists for ownership, not just fidelity: a deferred send runs the
//! entry's forward callback, which re-enters the host stack. Capturing clones
//! and running after the current handler returns keeps the agent's `&mut`
//! borrow exclusive.

use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SendError;
use crate::net::{DeviceId, Ipv4Header, Route};
use crate::packet::Datagram;
use crate::time::Timestamp;

/// Handle to one UDP endpoint the host stack opened for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u64);

/// Forwards a buffered data packet along a route.
pub type UnicastForwardCallback = Rc<dyn Fn(&Route, Datagram, Ipv4Header)>;

/// Delivers a packet to the local stack (protocol demux, then application).
pub type LocalDeliverCallback = Rc<dyn Fn(Datagram, Ipv4Header, DeviceId)>;

/// Reports a failed send back to the ingress context that owned the packet.
pub type ErrorCallback = Rc<dyn Fn(Datagram, Ipv4Header, SendError)>;

/// An action to run after the current handler completes.
pub type Deferred = Box<dyn FnOnce()>;

/// Callbacks the host stack supplies with every ingress packet.
///
/// Buffer entries capture the forward and error callbacks by value, so they
/// must stay cheap to clone and must not own the packet independently of the
/// entry.
#[derive(Clone)]
pub struct IngressCallbacks {
    /// Unicast-forward path back into the stack.
    pub forward: UnicastForwardCallback,
    /// Local delivery path.
    pub deliver: LocalDeliverCallback,
    /// Send-failure report path.
    pub error: ErrorCallback,
}

impl IngressCallbacks {
    /// Callbacks that do nothing. Used by sentinel buffer entries and tests.
    pub fn noop() -> Self {
        Self {
            forward: Rc::new(|_, _, _| {}),
            deliver: Rc::new(|_, _, _| {}),
            error: Rc::new(|_, _, _| {}),
        }
    }
}

/// What the agent requires from its host environment.
///
/// One implementation per host: the simulator provides a virtual-time port,
/// a deployment provides one backed by real sockets and a timer wheel. All
/// calls are made from inside agent handlers, which the host runs to
/// completion; nothing here blocks.
pub trait NetworkPort {
    /// Current time on the host's clock.
    fn now(&self) -> Timestamp;

    /// Uniform random draw in `[0, upper]` milliseconds, independent per
    /// call. Used to jitter beacon emission.
    fn jitter_ms(&mut self, upper: u32) -> u64;

    /// Open a broadcast-capable UDP endpoint on `device`, bound to
    /// [`EPIDEMIC_PORT`](crate::agent::EPIDEMIC_PORT) on the wildcard
    /// address. Received frames come back through the agent's receive
    /// handler.
    fn open_endpoint(&mut self, device: DeviceId) -> EndpointId;

    /// Close an endpoint. Outstanding receives are implicitly cancelled.
    fn close_endpoint(&mut self, endpoint: EndpointId);

    /// Broadcast a control frame from `endpoint` to `dest`.
    fn broadcast(&mut self, endpoint: EndpointId, dest: Ipv4Addr, frame: Datagram);

    /// Unicast a control frame from `endpoint` to `dest`.
    fn unicast(&mut self, endpoint: EndpointId, dest: Ipv4Addr, frame: Datagram);

    /// Arm the (single) beacon timer to fire after `delay`.
    fn arm_beacon_timer(&mut self, delay: Duration);

    /// Run `action` once the current handler has returned. Actions run in
    /// the order they were deferred.
    fn defer(&mut self, action: Deferred);
}
