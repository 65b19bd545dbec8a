//! A minimal Ethernet II frame view, just enough to carry EtherCAT traffic.

use crate::error::PduError;

/// A MAC address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    /// The broadcast address, `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// `true` if the least significant bit of the first octet is set, i.e.
    /// the address is multicast or broadcast.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl core::fmt::Display for EthernetAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d, e, g] = self.0;

        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// A view over a byte buffer laid out as an Ethernet II frame.
#[derive(Debug)]
pub struct EthernetFrame<T: AsRef<[u8]>> {
    buffer: T,
}

const DST_RANGE: core::ops::Range<usize> = 0..6;
const SRC_RANGE: core::ops::Range<usize> = 6..12;
const ETHERTYPE_RANGE: core::ops::Range<usize> = 12..14;

impl<T: AsRef<[u8]>> EthernetFrame<T> {
    /// Wrap a buffer without checking its length.
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    /// Wrap a buffer, ensuring it is at least long enough for the Ethernet
    /// header.
    pub fn new_checked(buffer: T) -> Result<Self, PduError> {
        if buffer.as_ref().len() < Self::header_len() {
            return Err(PduError::Ethernet);
        }

        Ok(Self::new_unchecked(buffer))
    }

    /// The length in bytes of the Ethernet II header.
    pub const fn header_len() -> usize {
        14
    }

    /// Total buffer length required for a frame with the given payload size.
    pub const fn buffer_len(payload_len: usize) -> usize {
        Self::header_len() + payload_len
    }

    pub fn dst_addr(&self) -> EthernetAddress {
        EthernetAddress(crate::fmt::unwrap!(
            self.buffer.as_ref()[DST_RANGE].try_into()
        ))
    }

    pub fn src_addr(&self) -> EthernetAddress {
        EthernetAddress(crate::fmt::unwrap!(
            self.buffer.as_ref()[SRC_RANGE].try_into()
        ))
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes(crate::fmt::unwrap!(
            self.buffer.as_ref()[ETHERTYPE_RANGE].try_into()
        ))
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::header_len()..]
    }

    /// Consume the view, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EthernetFrame<T> {
    pub fn set_dst_addr(&mut self, addr: EthernetAddress) {
        self.buffer.as_mut()[DST_RANGE].copy_from_slice(&addr.0);
    }

    pub fn set_src_addr(&mut self, addr: EthernetAddress) {
        self.buffer.as_mut()[SRC_RANGE].copy_from_slice(&addr.0);
    }

    pub fn set_ethertype(&mut self, ethertype: u16) {
        self.buffer.as_mut()[ETHERTYPE_RANGE].copy_from_slice(&ethertype.to_be_bytes());
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[Self::header_len()..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = [0u8; 20];

        let mut frame = EthernetFrame::new_checked(&mut buf[..]).unwrap();

        frame.set_dst_addr(EthernetAddress::BROADCAST);
        frame.set_src_addr(EthernetAddress([0x10; 6]));
        frame.set_ethertype(0x88a4);
        frame.payload_mut().fill(0xaa);

        let frame = EthernetFrame::new_checked(&buf[..]).unwrap();

        assert_eq!(frame.dst_addr(), EthernetAddress::BROADCAST);
        assert_eq!(frame.src_addr(), EthernetAddress([0x10; 6]));
        assert_eq!(frame.ethertype(), 0x88a4);
        assert_eq!(frame.payload(), &[0xaa; 6]);
        assert!(frame.dst_addr().is_multicast());
    }

    #[test]
    fn too_short() {
        assert!(EthernetFrame::new_checked(&[0u8; 4][..]).is_err());
    }
}
