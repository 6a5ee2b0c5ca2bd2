//! In-process packet representation: identifiers, the control tag, and the
//! datagram wrapper that carries wire bytes plus out-of-band metadata.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::wire::DataHeader;

/// Network-wide identifier of a data packet.
///
/// Composed as `(low16(source address) << 16) | low16(source counter)`. Two
/// packets with the same id are treated as identical everywhere; the id is
/// the buffer key and the unit of summary vectors.
///
/// Because the 32-bit source address is squeezed into 16 bits and the counter
/// wraps at 16 bits, distinct packets can collide across the population. The
/// protocol accepts this; a colliding packet is silently treated as a
/// duplicate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PacketId(u32);

impl PacketId {
    /// The absent id. Real traffic never carries it: the source counter is
    /// incremented before the first stamp, so the low half is never zero.
    pub const NONE: PacketId = PacketId(0);

    /// Compose an id from a source address and that source's local counter.
    pub fn compose(source: Ipv4Addr, counter: u16) -> Self {
        let host = u32::from(source) & 0xffff;
        PacketId(host << 16 | u32::from(counter))
    }

    /// The raw 32-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Build an id from its raw wire value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        PacketId(raw)
    }

    /// The low 16 bits of the originating address.
    #[inline]
    pub const fn source_bits(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The originator's counter value.
    #[inline]
    pub const fn sequence(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Whether this is the absent-id sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}#{}", self.source_bits(), self.sequence())
    }
}

/// In-process marker distinguishing control traffic the node generated from
/// data traffic. One byte of metadata, never serialized on the wire; it rides
/// beside the packet through the host stack's metadata channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlTag {
    /// The node built this packet itself (beacon or summary vector).
    Control,
    /// Ordinary data traffic.
    #[default]
    NotSet,
}

impl ControlTag {
    /// Whether the tag marks locally generated control traffic.
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, ControlTag::Control)
    }
}

/// Wire bytes plus the out-of-band [`ControlTag`].
///
/// Cloning is cheap: the byte storage is shared.
#[derive(Debug, Clone)]
pub struct Datagram {
    bytes: Bytes,
    tag: ControlTag,
}

impl Datagram {
    /// Wrap data-plane bytes.
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            tag: ControlTag::NotSet,
        }
    }

    /// Wrap a locally generated control frame.
    pub fn control(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            tag: ControlTag::Control,
        }
    }

    /// The wire bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Length of the wire bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether there are no wire bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The out-of-band tag.
    pub fn tag(&self) -> ControlTag {
        self.tag
    }

    /// Remove the tag. Done once before local delivery so applications never
    /// observe routing metadata.
    pub fn clear_tag(&mut self) {
        self.tag = ControlTag::NotSet;
    }

    /// Read the leading [`DataHeader`] without consuming it.
    pub fn peek_data_header(&self) -> Result<DataHeader, WireError> {
        DataHeader::decode(&mut &self.bytes[..])
    }

    /// Remove and return the leading [`DataHeader`].
    pub fn strip_data_header(&mut self) -> Result<DataHeader, WireError> {
        let header = self.peek_data_header()?;
        self.bytes = self.bytes.slice(DataHeader::WIRE_SIZE..);
        Ok(header)
    }

    /// Prepend a [`DataHeader`] to the wire bytes.
    pub fn push_data_header(&mut self, header: &DataHeader) {
        let mut buf = BytesMut::with_capacity(DataHeader::WIRE_SIZE + self.bytes.len());
        header.encode(&mut buf);
        buf.extend_from_slice(&self.bytes);
        self.bytes = buf.freeze();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    #[test]
    fn test_packet_id_composition() {
        let id = PacketId::compose(Ipv4Addr::new(10, 0, 2, 17), 41);
        assert_eq!(id.source_bits(), 0x0211);
        assert_eq!(id.sequence(), 41);
        assert_eq!(id.raw(), 0x0211_0029);
        assert!(!id.is_none());
    }

    #[test]
    fn test_packet_id_sentinel() {
        assert!(PacketId::NONE.is_none());
        assert_eq!(PacketId::from_raw(0), PacketId::NONE);

        // Counters start at one, so composing a real id never yields zero.
        let first = PacketId::compose(Ipv4Addr::new(0, 0, 0, 0), 1);
        assert!(!first.is_none());
    }

    #[test]
    fn test_packet_id_collision_across_sources() {
        // Only the low 16 address bits participate, so distant sources can
        // produce the same id. The protocol accepts this.
        let a = PacketId::compose(Ipv4Addr::new(10, 0, 1, 1), 7);
        let b = PacketId::compose(Ipv4Addr::new(172, 16, 1, 1), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_datagram_tagging() {
        let mut control = Datagram::control(vec![0u8]);
        assert!(control.tag().is_control());
        control.clear_tag();
        assert_eq!(control.tag(), ControlTag::NotSet);

        let data = Datagram::data(vec![1, 2, 3]);
        assert_eq!(data.tag(), ControlTag::NotSet);
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_datagram_header_round_trip() {
        let header = DataHeader {
            packet_id: PacketId::from_raw(0xdead_0001),
            hop_count: 12,
            timestamp: Timestamp::from_secs(3),
        };

        let mut datagram = Datagram::data(b"payload".to_vec());
        datagram.push_data_header(&header);
        assert_eq!(datagram.len(), DataHeader::WIRE_SIZE + 7);
        assert_eq!(datagram.peek_data_header().unwrap(), header);

        let stripped = datagram.strip_data_header().unwrap();
        assert_eq!(stripped, header);
        assert_eq!(&datagram.bytes()[..], b"payload");
    }

    #[test]
    fn test_datagram_short_header_is_malformed() {
        let datagram = Datagram::data(vec![0u8; 5]);
        assert!(datagram.peek_data_header().is_err());
    }
}
