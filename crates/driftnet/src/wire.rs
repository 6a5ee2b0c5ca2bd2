//! Wire codecs for the epidemic control plane.
//!
//! Three encodings, all big-endian and bit-exact for interoperability:
//!
//! - [`MessageType`]: one byte tagging each control frame.
//! - [`SummaryVector`]: `u32` count followed by that many raw packet ids.
//! - [`DataHeader`]: 16 bytes stamped on every data packet holding the id,
//!   the hop budget, and the origin timestamp in nanoseconds.
//!
//! A control frame is the type byte followed by a [`SummaryVector`] for
//! replies; beacons carry a throwaway [`DataHeader`] the receiver ignores.
//! Decoding never panics: short buffers and unknown type bytes come back as
//! [`WireError`] and the caller logs and drops the frame.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::packet::PacketId;
use crate::time::Timestamp;

/// Control frame type tag. The numeric values are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Periodic presence announcement, broadcast.
    Beacon = 0,
    /// First summary vector of an anti-entropy session, unicast by the
    /// lower-addressed node.
    Reply = 1,
    /// Closing summary vector, unicast back by the beacon sender.
    ReplyBack = 2,
}

impl MessageType {
    /// Serialized size in bytes.
    pub const WIRE_SIZE: usize = 1;

    /// Append the type byte to `buf`.
    pub fn encode(self, buf: &mut impl BufMut) {
        buf.put_u8(self as u8);
    }

    /// Read a type byte from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < Self::WIRE_SIZE {
            return Err(WireError::Truncated {
                needed: Self::WIRE_SIZE,
                have: buf.remaining(),
            });
        }
        match buf.get_u8() {
            0 => Ok(MessageType::Beacon),
            1 => Ok(MessageType::Reply),
            2 => Ok(MessageType::ReplyBack),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Beacon => "BEACON",
            MessageType::Reply => "REPLY",
            MessageType::ReplyBack => "REPLY_BACK",
        };
        f.write_str(name)
    }
}

/// Header stamped on every data packet when a node first ingests it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHeader {
    /// Network-wide packet identifier.
    pub packet_id: PacketId,
    /// Remaining forwards permitted. Decremented at each forwarding ingest;
    /// the packet dies at one.
    pub hop_count: u32,
    /// Wall time at the originating node. The packet expires everywhere at
    /// `timestamp + queue_entry_expire_time`.
    pub timestamp: Timestamp,
}

impl DataHeader {
    /// Serialized size in bytes.
    pub const WIRE_SIZE: usize = 16;

    /// Append the header to `buf`, big-endian.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.packet_id.raw());
        buf.put_u32(self.hop_count);
        buf.put_u64(self.timestamp.as_nanos());
    }

    /// Read a header from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < Self::WIRE_SIZE {
            return Err(WireError::Truncated {
                needed: Self::WIRE_SIZE,
                have: buf.remaining(),
            });
        }
        Ok(Self {
            packet_id: PacketId::from_raw(buf.get_u32()),
            hop_count: buf.get_u32(),
            timestamp: Timestamp::from_nanos(buf.get_u64()),
        })
    }
}

/// Ordered list of packet ids a node currently buffers.
///
/// Order is the buffer's insertion order; membership tests treat it as a set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryVector {
    ids: Vec<PacketId>,
}

impl SummaryVector {
    /// An empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty vector with room for `capacity` ids.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
        }
    }

    /// Append an id.
    pub fn push(&mut self, id: PacketId) {
        self.ids.push(id);
    }

    /// Whether `id` is listed.
    pub fn contains(&self, id: PacketId) -> bool {
        self.ids.contains(&id)
    }

    /// Number of ids listed.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no ids are listed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate the ids in order.
    pub fn iter(&self) -> impl Iterator<Item = PacketId> + '_ {
        self.ids.iter().copied()
    }

    /// Serialized size in bytes.
    pub fn encoded_size(&self) -> usize {
        4 + 4 * self.ids.len()
    }

    /// Append the vector to `buf`: count, then each id, big-endian.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.ids.len() as u32);
        for id in &self.ids {
            buf.put_u32(id.raw());
        }
    }

    /// Read a vector from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::Truncated {
                needed: 4,
                have: buf.remaining(),
            });
        }
        let count = buf.get_u32() as usize;
        let needed = count.saturating_mul(4);
        if buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                have: buf.remaining(),
            });
        }
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(PacketId::from_raw(buf.get_u32()));
        }
        Ok(Self { ids })
    }
}

impl From<Vec<PacketId>> for SummaryVector {
    fn from(ids: Vec<PacketId>) -> Self {
        Self { ids }
    }
}

/// A parsed control frame.
///
/// Decode-only: frames are built field-by-field by the agent because beacons
/// carry a [`DataHeader`] that has no meaning to the receiver and is never
/// parsed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Presence announcement. Trailing bytes are ignored.
    Beacon,
    /// Summary vector opening an anti-entropy session.
    Reply(SummaryVector),
    /// Summary vector closing an anti-entropy session.
    ReplyBack(SummaryVector),
}

impl ControlMessage {
    /// Parse a control frame.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let mut buf = frame;
        match MessageType::decode(&mut buf)? {
            MessageType::Beacon => Ok(ControlMessage::Beacon),
            MessageType::Reply => Ok(ControlMessage::Reply(SummaryVector::decode(&mut buf)?)),
            MessageType::ReplyBack => {
                Ok(ControlMessage::ReplyBack(SummaryVector::decode(&mut buf)?))
            }
        }
    }
}
