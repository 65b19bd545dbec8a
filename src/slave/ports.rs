//! Slave port topology model.
//!
//! EtherCAT frames enter a slave at one port and are forwarded through the
//! others in the fixed processing order 0 → 3 → 1 → 2. Propagation delay
//! measurement leans on per-port receive timestamps latched by a broadcast
//! write.

use crate::dl_status::DlStatus;

/// The active ports of one slave and their latched DC receive times.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Ports {
    /// Bitmap of ports with an established link.
    pub active: u8,
    /// Receive time of the port-0 processing unit datagram at each port,
    /// nanoseconds, latched by a `BWR` of `DCTIME0`.
    pub receive_times: [u32; 4],
}

impl Ports {
    /// Derive active ports from DL status: a port is active when it has an
    /// RX signal and is not looped back.
    pub fn from_dl_status(dl_status: &DlStatus) -> Self {
        let pairs = [
            (dl_status.loopback_port0, dl_status.signal_port0),
            (dl_status.loopback_port1, dl_status.signal_port1),
            (dl_status.loopback_port2, dl_status.signal_port2),
            (dl_status.loopback_port3, dl_status.signal_port3),
        ];

        let mut active = 0;

        for (port, (loopback, signal)) in pairs.into_iter().enumerate() {
            if signal && !loopback {
                active |= 1 << port;
            }
        }

        Self {
            active,
            receive_times: [0; 4],
        }
    }

    pub fn is_active(&self, port: u8) -> bool {
        self.active & (1 << port) != 0
    }

    /// Number of ports with a link.
    pub fn link_count(&self) -> u8 {
        self.active.count_ones() as u8
    }

    pub fn time(&self, port: u8) -> u32 {
        self.receive_times[usize::from(port % 4)]
    }

    /// The port the frame enters this slave through: the active port with
    /// the smallest latched receive time.
    pub fn entry_port(&self) -> u8 {
        let mut entry: Option<u8> = None;

        for port in 0..4 {
            if !self.is_active(port) {
                continue;
            }

            entry = match entry {
                Some(current) if self.time(current) <= self.time(port) => Some(current),
                _ => Some(port),
            };
        }

        entry.unwrap_or(0)
    }

    /// The previous active port of `port` in processing order.
    pub fn prev_port(&self, port: u8) -> u8 {
        // Frame processing order is 0 -> 3 -> 1 -> 2, so the candidates for
        // "previous" are searched in reverse processing order.
        let candidates: [u8; 3] = match port {
            0 => [2, 1, 3],
            1 => [3, 0, 2],
            2 => [1, 3, 0],
            3 => [0, 2, 1],
            _ => return port,
        };

        for candidate in candidates {
            if self.is_active(candidate) {
                return candidate;
            }
        }

        port
    }
}

/// Which ports of a slave are still unassigned to downstream devices during
/// propagation delay calculation.
#[derive(Default, Debug, Copy, Clone)]
pub(crate) struct AvailablePorts(pub u8);

impl AvailablePorts {
    /// Consume and return the next unassigned port, searched in the fixed
    /// order 3, 1, 2, 0.
    pub fn consume_next(&mut self) -> u8 {
        for port in [3u8, 1, 2, 0] {
            if self.0 & (1 << port) != 0 {
                self.0 &= !(1 << port);

                return port;
            }
        }

        0
    }

    pub fn consume(&mut self, port: u8) {
        self.0 &= !(1 << port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(active: u8, times: [u32; 4]) -> Ports {
        Ports {
            active,
            receive_times: times,
        }
    }

    #[test]
    fn entry_port_is_earliest_active() {
        let p = ports(0b0111, [3000, 1000, 2000, 0]);

        assert_eq!(p.entry_port(), 1);
    }

    #[test]
    fn entry_port_ignores_inactive() {
        // Port 1 has the smallest time but no link
        let p = ports(0b0101, [3000, 1000, 2000, 0]);

        assert_eq!(p.entry_port(), 2);
    }

    #[test]
    fn prev_port_processing_order() {
        // All ports active
        let p = ports(0b1111, [0; 4]);

        assert_eq!(p.prev_port(3), 0);
        assert_eq!(p.prev_port(1), 3);
        assert_eq!(p.prev_port(2), 1);
        assert_eq!(p.prev_port(0), 2);
    }

    #[test]
    fn prev_port_skips_inactive() {
        // Only ports 0 and 1 active: previous of 1 is 0
        let p = ports(0b0011, [0; 4]);

        assert_eq!(p.prev_port(1), 0);
    }

    #[test]
    fn available_port_search_order() {
        let mut avail = AvailablePorts(0b1111);

        assert_eq!(avail.consume_next(), 3);
        assert_eq!(avail.consume_next(), 1);
        assert_eq!(avail.consume_next(), 2);
        assert_eq!(avail.consume_next(), 0);
    }
}
