//! Raw EtherCAT commands, e.g. `LRW`, `BRD`, `APWR`.

mod reads;
mod writes;

use catline_wire::WireWrite;

pub use reads::{Reads, WrappedRead};
pub use writes::{WrappedWrite, Writes};

const NOP: u8 = 0x00;
const APRD: u8 = 0x01;
const APWR: u8 = 0x02;
const APRW: u8 = 0x03;
const FPRD: u8 = 0x04;
const FPWR: u8 = 0x05;
const FPRW: u8 = 0x06;
const BRD: u8 = 0x07;
const BWR: u8 = 0x08;
const BRW: u8 = 0x09;
const LRD: u8 = 0x0A;
const LWR: u8 = 0x0B;
const LRW: u8 = 0x0C;
const ARMW: u8 = 0x0D;
const FRMW: u8 = 0x0E;

/// An EtherCAT command.
///
/// A `Command` on its own does nothing useful. Wrap it using
/// [`Command::brd`], [`Command::fpwr`], etc. to get a [`WrappedRead`] or
/// [`WrappedWrite`] which expose the actual network operations against a
/// [`Master`](crate::Master).
///
/// The 32 bit address field encodes either `(register << 16) | station`
/// for physical addressing modes, or a flat logical address for `L*`
/// commands.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Command {
    /// No operation.
    #[default]
    Nop,

    /// Read commands.
    Read(Reads),

    /// Write commands.
    Write(Writes),
}

impl WireWrite for Command {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        match *self {
            Command::Nop => {
                buf[0..4].fill(0);

                &buf[0..4]
            }

            Command::Read(Reads::Aprd { address, register })
            | Command::Read(Reads::Fprd { address, register })
            | Command::Read(Reads::Brd { address, register })
            | Command::Read(Reads::Frmw { address, register })
            | Command::Read(Reads::Armw { address, register })
            | Command::Write(Writes::Apwr { address, register })
            | Command::Write(Writes::Fpwr { address, register })
            | Command::Write(Writes::Bwr { address, register }) => {
                address.pack_to_slice_unchecked(&mut buf[0..2]);
                register.pack_to_slice_unchecked(&mut buf[2..4]);

                &buf[0..4]
            }

            Command::Read(Reads::Lrd { address })
            | Command::Write(Writes::Lwr { address })
            | Command::Write(Writes::Lrw { address }) => {
                address.pack_to_slice_unchecked(&mut buf[0..4]);

                &buf[0..4]
            }
        }
    }

    fn packed_len(&self) -> usize {
        // Either 2x u16 or 1x u32
        4
    }
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::Nop => write!(f, "NOP"),

            Command::Read(read) => match read {
                Reads::Aprd { address, register } => {
                    write!(f, "APRD(pos {}, reg {:#06x})", address, register)
                }
                Reads::Fprd { address, register } => {
                    write!(f, "FPRD(addr {:#06x}, reg {:#06x})", address, register)
                }
                Reads::Brd { register, .. } => write!(f, "BRD(reg {:#06x})", register),
                Reads::Lrd { address } => write!(f, "LRD(addr {:#010x})", address),
                Reads::Frmw { address, register } => {
                    write!(f, "FRMW(addr {:#06x}, reg {:#06x})", address, register)
                }
                Reads::Armw { address, register } => {
                    write!(f, "ARMW(pos {}, reg {:#06x})", address, register)
                }
            },

            Command::Write(write) => match write {
                Writes::Bwr { register, .. } => write!(f, "BWR(reg {:#06x})", register),
                Writes::Apwr { address, register } => {
                    write!(f, "APWR(pos {}, reg {:#06x})", address, register)
                }
                Writes::Fpwr { address, register } => {
                    write!(f, "FPWR(addr {:#06x}, reg {:#06x})", address, register)
                }
                Writes::Lwr { address } => write!(f, "LWR(addr {:#010x})", address),
                Writes::Lrw { address } => write!(f, "LRW(addr {:#010x})", address),
            },
        }
    }
}

impl Command {
    /// Create a broadcast read (BRD) of the given register.
    ///
    /// The address field is zero when transmitted and counts responding
    /// slaves on its way through the ring.
    pub fn brd(register: u16) -> WrappedRead {
        WrappedRead::new(Reads::Brd {
            address: 0,
            register,
        })
    }

    /// Create a broadcast write (BWR) to the given register.
    pub fn bwr(register: u16) -> WrappedWrite {
        WrappedWrite::new(Writes::Bwr {
            address: 0,
            register,
        })
    }

    /// Configured address read (FPRD).
    pub fn fprd(address: u16, register: u16) -> WrappedRead {
        WrappedRead::new(Reads::Fprd { address, register })
    }

    /// Configured address write (FPWR).
    pub fn fpwr(address: u16, register: u16) -> WrappedWrite {
        WrappedWrite::new(Writes::Fpwr { address, register })
    }

    /// Auto increment (positional) read (APRD).
    ///
    /// The position is negated on the wire; each slave increments the
    /// address field as the frame passes, so the slave at `position` sees
    /// zero and executes the command.
    pub fn aprd(position: u16, register: u16) -> WrappedRead {
        WrappedRead::new(Reads::Aprd {
            address: 0u16.wrapping_sub(position),
            register,
        })
    }

    /// Auto increment (positional) write (APWR).
    pub fn apwr(position: u16, register: u16) -> WrappedWrite {
        WrappedWrite::new(Writes::Apwr {
            address: 0u16.wrapping_sub(position),
            register,
        })
    }

    /// Configured address read, multiple write (FRMW).
    ///
    /// Distributes a value read from one slave to all others on the
    /// network, the backbone of distributed clocks time distribution.
    pub fn frmw(address: u16, register: u16) -> WrappedRead {
        WrappedRead::new(Reads::Frmw { address, register })
    }

    /// Auto increment read, multiple write (ARMW).
    pub fn armw(position: u16, register: u16) -> WrappedRead {
        WrappedRead::new(Reads::Armw {
            address: 0u16.wrapping_sub(position),
            register,
        })
    }

    /// Logical read (LRD).
    pub fn lrd(address: u32) -> WrappedRead {
        WrappedRead::new(Reads::Lrd { address })
    }

    /// Logical write (LWR).
    pub fn lwr(address: u32) -> WrappedWrite {
        WrappedWrite::new(Writes::Lwr { address })
    }

    /// Logical read/write (LRW), used mainly for process data exchange.
    pub fn lrw(address: u32) -> WrappedWrite {
        WrappedWrite::new(Writes::Lrw { address })
    }

    /// Get the command code byte.
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::Nop => NOP,

            Self::Read(read) => match read {
                Reads::Aprd { .. } => APRD,
                Reads::Fprd { .. } => FPRD,
                Reads::Brd { .. } => BRD,
                Reads::Lrd { .. } => LRD,
                Reads::Frmw { .. } => FRMW,
                Reads::Armw { .. } => ARMW,
            },

            Self::Write(write) => match write {
                Writes::Apwr { .. } => APWR,
                Writes::Fpwr { .. } => FPWR,
                Writes::Bwr { .. } => BWR,
                Writes::Lwr { .. } => LWR,
                Writes::Lrw { .. } => LRW,
            },
        }
    }

    /// Parse a command from its code byte and 4 byte address block.
    pub(crate) fn parse(code: u8, address: [u8; 4]) -> Option<Self> {
        let split = (
            u16::from_le_bytes([address[0], address[1]]),
            u16::from_le_bytes([address[2], address[3]]),
        );
        let logical = u32::from_le_bytes(address);

        let command = match code {
            NOP => Command::Nop,

            APRD => Reads::Aprd {
                address: split.0,
                register: split.1,
            }
            .into(),
            FPRD => Reads::Fprd {
                address: split.0,
                register: split.1,
            }
            .into(),
            BRD => Reads::Brd {
                address: split.0,
                register: split.1,
            }
            .into(),
            LRD => Reads::Lrd { address: logical }.into(),
            FRMW => Reads::Frmw {
                address: split.0,
                register: split.1,
            }
            .into(),
            ARMW => Reads::Armw {
                address: split.0,
                register: split.1,
            }
            .into(),

            APWR => Writes::Apwr {
                address: split.0,
                register: split.1,
            }
            .into(),
            FPWR => Writes::Fpwr {
                address: split.0,
                register: split.1,
            }
            .into(),
            BWR => Writes::Bwr {
                address: split.0,
                register: split.1,
            }
            .into(),
            LWR => Writes::Lwr { address: logical }.into(),
            LRW => Writes::Lrw { address: logical }.into(),

            // Read-writes (APRW/FPRW/BRW) are never sent by this master
            APRW | FPRW | BRW => return None,

            _ => return None,
        };

        Some(command)
    }

}

impl From<Reads> for Command {
    fn from(value: Reads) -> Self {
        Self::Read(value)
    }
}

impl From<Writes> for Command {
    fn from(value: Writes) -> Self {
        Self::Write(value)
    }
}

impl From<WrappedRead> for Command {
    fn from(value: WrappedRead) -> Self {
        Self::Read(value.command)
    }
}

impl From<WrappedWrite> for Command {
    fn from(value: WrappedWrite) -> Self {
        Self::Write(value.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_physical_address() {
        let mut buf = [0u8; 4];

        Command::from(Writes::Fpwr {
            address: 0x1001,
            register: 0x0120,
        })
        .pack_to_slice_unchecked(&mut buf);

        assert_eq!(buf, [0x01, 0x10, 0x20, 0x01]);
    }

    #[test]
    fn pack_logical_address() {
        let mut buf = [0u8; 4];

        Command::from(Writes::Lrw {
            address: 0xdead_beef,
        })
        .pack_to_slice_unchecked(&mut buf);

        assert_eq!(buf, [0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn auto_increment_negation() {
        let Command::Read(Reads::Aprd { address, .. }) = Command::from(Command::aprd(2, 0x0000))
        else {
            panic!("expected APRD");
        };

        assert_eq!(address, 0xfffe);
    }

    #[test]
    fn parse_roundtrip() {
        let commands = [
            Command::brd(0x0130).into(),
            Command::fprd(0x1000, 0x0918).into(),
            Command::lrw(0x0001_0000).into(),
            Command::frmw(0x1000, 0x0910).into(),
            Command::Nop,
        ];

        for command in commands {
            let mut buf = [0u8; 4];

            command.pack_to_slice_unchecked(&mut buf);

            assert_eq!(Command::parse(command.code(), buf), Some(command));
        }
    }
}
