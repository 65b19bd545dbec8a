//! The EtherCAT frame header following the Ethernet II header.

use crate::LEN_MASK;
use catline_wire::{WireError, WireRead, WireSized, WireWrite};

/// Protocol type in the upper 4 bits of the frame header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[repr(u8)]
pub(crate) enum ProtocolType {
    /// EtherCAT command frames.
    Command = 0x04,
    /// Alternative encoding for command frames emitted by some masters.
    CommandAlt = 0x01,
    #[wire(catch_all)]
    Unknown(u8),
}

impl ProtocolType {
    pub(crate) fn is_command(self) -> bool {
        matches!(self, Self::Command | Self::CommandAlt)
    }
}

/// An EtherCAT frame header.
///
/// A frame can contain one or more datagrams, each starting with a
/// [`DatagramHeader`](crate::datagram::datagram_header::DatagramHeader).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub payload_len: u16,
    pub protocol: ProtocolType,
}

impl WireSized for FrameHeader {
    const PACKED_LEN: usize = 2;

    type Buffer = [u8; 2];

    fn buffer() -> Self::Buffer {
        [0u8; 2]
    }
}

impl WireRead for FrameHeader {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        let raw = u16::unpack_from_slice(buf)?;

        Ok(Self {
            payload_len: raw & LEN_MASK,
            protocol: ProtocolType::unpack_from_slice(&[(raw >> 12) as u8])?,
        })
    }
}

impl WireWrite for FrameHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let mut protocol = [0u8; 1];

        self.protocol.pack_to_slice_unchecked(&mut protocol);

        let raw = (self.payload_len & LEN_MASK) | u16::from(protocol[0]) << 12;

        raw.pack_to_slice_unchecked(buf)
    }

    fn packed_len(&self) -> usize {
        Self::PACKED_LEN
    }
}

impl FrameHeader {
    /// Create a command frame header with the given payload length.
    pub fn command(len: u16) -> Self {
        debug_assert!(
            len <= LEN_MASK,
            "frame length may not exceed {} bytes",
            LEN_MASK
        );

        Self {
            payload_len: len & LEN_MASK,
            protocol: ProtocolType::Command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack() {
        let mut buf = [0u8; 2];

        FrameHeader::command(0x28).pack_to_slice_unchecked(&mut buf);

        assert_eq!(buf, [0x28, 0x40]);
    }

    #[test]
    fn unpack_alt_protocol() {
        // Some masters send protocol type 1 for command frames
        let parsed = FrameHeader::unpack_from_slice(&[0x28, 0x10]).unwrap();

        assert_eq!(parsed.payload_len, 0x28);
        assert!(parsed.protocol.is_command());
    }

    #[test]
    fn reject_unknown() {
        let parsed = FrameHeader::unpack_from_slice(&[0x00, 0xf0]).unwrap();

        assert!(!parsed.protocol.is_command());
    }
}
