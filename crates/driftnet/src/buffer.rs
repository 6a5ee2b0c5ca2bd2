//! The epidemic packet buffer.
//!
//! A bounded FIFO of in-flight data packets keyed by [`PacketId`], with a
//! secondary hash index for O(1) duplicate checks. The buffer is not a
//! routing table: it is simply the set of packets a node offers to every
//! peer it meets, trimmed by capacity and by per-packet expiry.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::net::Ipv4Header;
use crate::packet::{Datagram, PacketId};
use crate::port::{ErrorCallback, UnicastForwardCallback};
use crate::time::Timestamp;
use crate::wire::SummaryVector;

/// One buffered data packet.
///
/// Owns the wire bytes (with the epidemic header prepended) plus the IPv4
/// header and the forward/error callbacks captured from the ingress context
/// that stored it. Cloning shares the byte storage and the callbacks.
#[derive(Clone)]
pub struct BufferEntry {
    /// The packet, epidemic header included.
    pub datagram: Datagram,
    /// IPv4 header the packet arrived with.
    pub header: Ipv4Header,
    /// Forward path back into the host stack.
    pub forward: UnicastForwardCallback,
    /// Send-failure report path.
    pub error: ErrorCallback,
    /// Buffer key.
    pub packet_id: PacketId,
    /// Absolute expiry: origin timestamp plus the configured lifetime.
    pub expire_time: Timestamp,
}

impl BufferEntry {
    /// Create an entry with an unset id and expiry.
    pub fn new(
        datagram: Datagram,
        header: Ipv4Header,
        forward: UnicastForwardCallback,
        error: ErrorCallback,
    ) -> Self {
        Self {
            datagram,
            header,
            forward,
            error,
            packet_id: PacketId::NONE,
            expire_time: Timestamp::ZERO,
        }
    }

    /// Set the buffer key.
    pub fn with_packet_id(mut self, id: PacketId) -> Self {
        self.packet_id = id;
        self
    }

    /// Set the absolute expiry time.
    pub fn with_expire_time(mut self, expire: Timestamp) -> Self {
        self.expire_time = expire;
        self
    }

    /// The sentinel returned by [`PacketBuffer::find`] on a miss. Its
    /// `packet_id` is [`PacketId::NONE`], which real traffic never carries.
    pub fn not_found() -> Self {
        Self {
            datagram: Datagram::data(Vec::new()),
            header: Ipv4Header {
                source: std::net::Ipv4Addr::UNSPECIFIED,
                destination: std::net::Ipv4Addr::UNSPECIFIED,
                ttl: 0,
                protocol: 0,
            },
            forward: Rc::new(|_, _, _| {}),
            error: Rc::new(|_, _, _| {}),
            packet_id: PacketId::NONE,
            expire_time: Timestamp::ZERO,
        }
    }

    fn is_expired(&self, now: Timestamp) -> bool {
        self.expire_time < now
    }
}

impl fmt::Debug for BufferEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferEntry")
            .field("packet_id", &self.packet_id)
            .field("expire_time", &self.expire_time)
            .field("header", &self.header)
            .field("len", &self.datagram.len())
            .finish_non_exhaustive()
    }
}

/// Bounded FIFO of buffered packets with unique ids.
pub struct PacketBuffer {
    entries: VecDeque<BufferEntry>,
    index: HashSet<PacketId>,
    max_len: usize,
}

impl PacketBuffer {
    /// Create a buffer holding at most `max_len` entries.
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len.min(1024)),
            index: HashSet::with_capacity(max_len.min(1024)),
            max_len,
        }
    }

    /// Store an entry.
    ///
    /// A duplicate id leaves the buffer untouched. At capacity the oldest
    /// entry is evicted first. Never fails.
    pub fn enqueue(&mut self, entry: BufferEntry) {
        if self.index.contains(&entry.packet_id) {
            trace!(id = %entry.packet_id, "duplicate id, not enqueued");
            return;
        }
        while self.entries.len() >= self.max_len {
            match self.entries.pop_front() {
                Some(evicted) => {
                    self.index.remove(&evicted.packet_id);
                    debug!(id = %evicted.packet_id, "buffer full, evicting oldest");
                }
                None => break,
            }
        }
        self.index.insert(entry.packet_id);
        self.entries.push_back(entry);
    }

    /// Pop the oldest entry that has not expired by `now`.
    ///
    /// Expired entries encountered during the scan are discarded silently.
    /// Returns `None` once the buffer is empty.
    pub fn dequeue(&mut self, now: Timestamp) -> Option<BufferEntry> {
        while let Some(entry) = self.entries.pop_front() {
            self.index.remove(&entry.packet_id);
            if entry.is_expired(now) {
                trace!(id = %entry.packet_id, "dropping expired entry on dequeue");
                continue;
            }
            return Some(entry);
        }
        None
    }

    /// Look up an entry by id.
    ///
    /// Returns a clone of the entry, or the [`BufferEntry::not_found`]
    /// sentinel; callers test `packet_id.is_none()` for the miss.
    pub fn find(&self, id: PacketId) -> BufferEntry {
        self.entries
            .iter()
            .find(|entry| entry.packet_id == id)
            .cloned()
            .unwrap_or_else(BufferEntry::not_found)
    }

    /// Remove every entry whose expiry is behind `now`.
    pub fn drop_expired(&mut self, now: Timestamp) {
        let before = self.entries.len();
        let index = &mut self.index;
        self.entries.retain(|entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                index.remove(&entry.packet_id);
            }
            keep
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "dropped expired packets");
        }
    }

    /// The ids currently buffered, in insertion order, after expiring stale
    /// entries.
    pub fn summary_vector(&mut self, now: Timestamp) -> SummaryVector {
        self.drop_expired(now);
        let mut sv = SummaryVector::with_capacity(self.entries.len());
        for entry in &self.entries {
            sv.push(entry.packet_id);
        }
        sv
    }

    /// The ids buffered here but absent from `peer`, in insertion order.
    ///
    /// Linear in the local buffer; membership against the peer's vector is
    /// through a transient hash set.
    pub fn find_disjoint(&self, peer: &SummaryVector) -> SummaryVector {
        let peer_ids: HashSet<PacketId> = peer.iter().collect();
        let mut disjoint = SummaryVector::new();
        for entry in &self.entries {
            if !peer_ids.contains(&entry.packet_id) {
                disjoint.push(entry.packet_id);
            }
        }
        disjoint
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The capacity bound.
    pub fn max_queue_len(&self) -> usize {
        self.max_len
    }

    /// Change the capacity bound. An over-full buffer sheds its oldest
    /// entries at the next enqueue.
    pub fn set_max_queue_len(&mut self, max_len: usize) {
        self.max_len = max_len;
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.entries.len())
            .field("max_len", &self.max_len)
            .finish()
    }
}
