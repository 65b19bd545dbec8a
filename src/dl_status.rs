/// DL status, register `0x0110`.
///
/// Defined in ETG1000.4 Table 34.
#[derive(Debug, Copy, Clone, PartialEq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub struct DlStatus {
    #[wire(bits = 1)]
    pub pdi_operational: bool,
    #[wire(bits = 1)]
    pub watchdog_ok: bool,
    #[wire(bits = 1, post_skip = 1)]
    pub extended_link_detection: bool,
    /// True if port 0 has a physical link present.
    #[wire(bits = 1)]
    pub link_port0: bool,
    /// True if port 1 has a physical link present.
    #[wire(bits = 1)]
    pub link_port1: bool,
    /// True if port 2 has a physical link present.
    #[wire(bits = 1)]
    pub link_port2: bool,
    /// True if port 3 has a physical link present.
    #[wire(bits = 1)]
    pub link_port3: bool,
    /// True if port 0 forwards to itself (loopback).
    #[wire(bits = 1)]
    pub loopback_port0: bool,
    /// RX signal detected on port 0.
    #[wire(bits = 1)]
    pub signal_port0: bool,
    /// True if port 1 forwards to itself (loopback).
    #[wire(bits = 1)]
    pub loopback_port1: bool,
    /// RX signal detected on port 1.
    #[wire(bits = 1)]
    pub signal_port1: bool,
    /// True if port 2 forwards to itself (loopback).
    #[wire(bits = 1)]
    pub loopback_port2: bool,
    /// RX signal detected on port 2.
    #[wire(bits = 1)]
    pub signal_port2: bool,
    /// True if port 3 forwards to itself (loopback).
    #[wire(bits = 1)]
    pub loopback_port3: bool,
    /// RX signal detected on port 3.
    #[wire(bits = 1)]
    pub signal_port3: bool,
}

impl DlStatus {
    /// The number of ports with a link present.
    pub fn link_count(&self) -> u8 {
        self.link_port0 as u8
            + self.link_port1 as u8
            + self.link_port2 as u8
            + self.link_port3 as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireRead;

    #[test]
    fn decode_two_ports() {
        // PDI operational, watchdog ok, links on ports 0 and 1
        let parsed = DlStatus::unpack_from_slice(&[0b0011_0011, 0x00]).unwrap();

        assert!(parsed.pdi_operational);
        assert!(parsed.watchdog_ok);
        assert!(parsed.link_port0);
        assert!(parsed.link_port1);
        assert!(!parsed.link_port2);
        assert_eq!(parsed.link_count(), 2);
    }
}
