//! Servo profile over EtherCAT: IDN reads/writes and AT/MDT mapping
//! generation.

use core::ops::Deref;

use crate::{
    error::{Error, MailboxError},
    fmt,
    mailbox::{MAILBOX_MAX, MailboxHeader, MailboxProtocol, MailboxType},
    slave::{Slave, SlaveRef},
};
use catline_wire::{WireRead, WireSized, WireWrite};

/// The IDN listing AT (drive to master) mapped IDNs.
pub const IDN_AT_MAPPING: u16 = 16;

/// The IDN listing MDT (master to drive) mapped IDNs.
pub const IDN_MDT_MAPPING: u16 = 24;

bitflags::bitflags! {
    /// Which elements of an IDN a SoE request addresses.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SoeElements: u8 {
        /// Data state.
        const DATA_STATE = 0x01;
        /// Parameter name.
        const NAME = 0x02;
        /// Attribute word.
        const ATTRIBUTE = 0x04;
        /// Unit.
        const UNIT = 0x08;
        /// Minimum value.
        const MIN = 0x10;
        /// Maximum value.
        const MAX = 0x20;
        /// Operation data (the value itself).
        const VALUE = 0x40;
        /// Default value.
        const DEFAULT = 0x80;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SoeElements {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "SoeElements({=u8:#04x})", self.bits())
    }
}

/// SoE header following the mailbox header: flags byte, element mask, then
/// either the IDN or the number of fragments left.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 4)]
pub(crate) struct SoeHeader {
    #[wire(bits = 3)]
    pub op_code: u8,
    /// More fragments follow.
    #[wire(bits = 1)]
    pub incomplete: bool,
    /// The request failed; the payload carries a 16 bit SoE error code.
    #[wire(bits = 1)]
    pub error: bool,
    /// Drive number (ATN).
    #[wire(bits = 3)]
    pub drive: u8,
    /// Element mask.
    #[wire(bytes = 1)]
    pub elements: u8,
    /// IDN in the final (or only) fragment, fragments left otherwise.
    #[wire(bytes = 2)]
    pub idn_or_fragments_left: u16,
}

impl SoeHeader {
    pub const READ_REQUEST: u8 = 0x01;
    pub const READ_RESPONSE: u8 = 0x02;
    pub const WRITE_REQUEST: u8 = 0x03;
    pub const WRITE_RESPONSE: u8 = 0x04;
    pub const NOTIFICATION: u8 = 0x05;
    pub const EMERGENCY: u8 = 0x06;
}

/// The attribute element of an IDN.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 4)]
pub struct SoeIdnAttribute {
    /// Conversion factor for display purposes.
    #[wire(bytes = 2)]
    pub conversion_factor: u16,
    /// Operation data length: 0 = 1 byte, 1 = 2 bytes, 2 = 4 bytes,
    /// 3 = 8 bytes.
    #[wire(bits = 2)]
    pub length: u8,
    /// The operation data is a list.
    #[wire(bits = 1, post_skip = 1)]
    pub is_list: bool,
    #[wire(bits = 4)]
    pub decimal_places: u8,
    /// Write protected in PRE-OP.
    #[wire(bits = 1)]
    pub write_protect_pre_op: bool,
    /// Write protected in SAFE-OP.
    #[wire(bits = 1)]
    pub write_protect_safe_op: bool,
    /// Write protected in OP.
    #[wire(bits = 1, post_skip = 5)]
    pub write_protect_op: bool,
}

impl SoeIdnAttribute {
    /// Operation data length in bits.
    pub fn bit_len(&self) -> u16 {
        8 << u16::from(self.length)
    }
}

impl<'master, S> SlaveRef<'master, S>
where
    S: Deref<Target = Slave>,
{
    fn soe_data_capacity(&self) -> Result<usize, Error> {
        let mailbox = self
            .state
            .config
            .mailbox
            .write
            .ok_or(Error::Mailbox(MailboxError::NoMailbox))?;

        Ok(usize::from(mailbox.len).min(MAILBOX_MAX) - MailboxHeader::LEN - SoeHeader::PACKED_LEN)
    }

    /// Read elements of an IDN into `buf`, reassembling fragmented
    /// responses, and return the filled portion.
    pub async fn soe_read<'buf>(
        &self,
        drive: u8,
        idn: u16,
        elements: SoeElements,
        buf: &'buf mut [u8],
    ) -> Result<&'buf [u8], Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Soe)?;

        self.mailbox_write(MailboxType::Soe, SoeHeader::PACKED_LEN as u16, |out| {
            SoeHeader {
                op_code: SoeHeader::READ_REQUEST,
                incomplete: false,
                error: false,
                drive,
                elements: elements.bits(),
                idn_or_fragments_left: idn,
            }
            .pack_to_slice_unchecked(out);
        })
        .await?;

        let mut response = [0u8; MAILBOX_MAX];
        let mut filled = 0;

        loop {
            let (_mbx_header, len) = self
                .mailbox_read_expecting(&mut response, MailboxType::Soe)
                .await?;

            let header = SoeHeader::unpack_from_slice(&response)?;

            if header.error {
                let error_code =
                    u16::unpack_from_slice(&response[SoeHeader::PACKED_LEN..]).unwrap_or(0);

                return Err(Error::Mailbox(MailboxError::SoeAborted { error_code, idn }));
            }

            if header.op_code == SoeHeader::NOTIFICATION || header.op_code == SoeHeader::EMERGENCY {
                fmt::debug!(
                    "Slave {:#06x} SoE notification/emergency for drive {}, ignoring",
                    self.configured_address,
                    header.drive
                );

                continue;
            }

            if header.op_code != SoeHeader::READ_RESPONSE {
                return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                    address: idn,
                    sub_index: drive,
                }));
            }

            let fragment = &response[SoeHeader::PACKED_LEN..len];

            // The fragments-left field of the first incomplete fragment
            // gives a size hint; the buffer bound is what actually matters
            if header.incomplete && filled == 0 {
                let total_hint =
                    (usize::from(header.idn_or_fragments_left) + 1) * fragment.len();

                if total_hint > buf.len() {
                    return Err(Error::Mailbox(MailboxError::BufferTooSmall));
                }
            }

            buf.get_mut(filled..filled + fragment.len())
                .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?
                .copy_from_slice(fragment);

            filled += fragment.len();

            if !header.incomplete {
                break;
            }
        }

        Ok(&buf[0..filled])
    }

    /// Write elements of an IDN, fragmenting over multiple mailbox messages
    /// when the data exceeds the slave's mailbox.
    pub async fn soe_write(
        &self,
        drive: u8,
        idn: u16,
        elements: SoeElements,
        data: &[u8],
    ) -> Result<(), Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Soe)?;

        let capacity = self.soe_data_capacity()?;

        let mut remaining = data;
        let mut fragments_left = data.len().div_ceil(capacity.max(1)).saturating_sub(1);

        loop {
            let chunk = remaining.len().min(capacity);
            let is_last = chunk == remaining.len();

            self.mailbox_write(
                MailboxType::Soe,
                (SoeHeader::PACKED_LEN + chunk) as u16,
                |out| {
                    SoeHeader {
                        op_code: SoeHeader::WRITE_REQUEST,
                        incomplete: !is_last,
                        error: false,
                        drive,
                        elements: elements.bits(),
                        idn_or_fragments_left: if is_last {
                            idn
                        } else {
                            fragments_left as u16
                        },
                    }
                    .pack_to_slice_unchecked(out);

                    out[SoeHeader::PACKED_LEN..SoeHeader::PACKED_LEN + chunk]
                        .copy_from_slice(&remaining[0..chunk]);
                },
            )
            .await?;

            remaining = &remaining[chunk..];
            fragments_left = fragments_left.saturating_sub(1);

            if is_last {
                break;
            }
        }

        let mut response = [0u8; MAILBOX_MAX];

        loop {
            let (_mbx_header, _len) = self
                .mailbox_read_expecting(&mut response, MailboxType::Soe)
                .await?;

            let header = SoeHeader::unpack_from_slice(&response)?;

            if header.error {
                let error_code =
                    u16::unpack_from_slice(&response[SoeHeader::PACKED_LEN..]).unwrap_or(0);

                return Err(Error::Mailbox(MailboxError::SoeAborted { error_code, idn }));
            }

            if header.op_code == SoeHeader::NOTIFICATION || header.op_code == SoeHeader::EMERGENCY {
                continue;
            }

            if header.op_code != SoeHeader::WRITE_RESPONSE {
                return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                    address: idn,
                    sub_index: drive,
                }));
            }

            break Ok(());
        }
    }

    /// Sum the process data sizes of one mapping IDN (16 for AT, 24 for
    /// MDT) of one drive, in bits.
    ///
    /// The 16 bits of the ever-present status (AT) or control (MDT) word
    /// are included.
    async fn soe_mapping_bits(&self, drive: u8, mapping_idn: u16) -> Result<u32, Error> {
        // Status/control word
        let mut bits = 16u32;

        let mut list_buf = [0u8; 512];

        let list = self
            .soe_read(drive, mapping_idn, SoeElements::VALUE, &mut list_buf)
            .await?;

        // The list starts with its current and maximum lengths in bytes,
        // then holds one sub-IDN per word
        let current_len = usize::from(u16::unpack_from_slice(list)?);

        let list = list
            .get(4..4 + current_len)
            .ok_or(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: mapping_idn,
                sub_index: drive,
            }))?;

        for sub_idn_raw in list.chunks_exact(2) {
            let sub_idn = u16::unpack_from_slice(sub_idn_raw)?;

            let mut attr_buf = [0u8; 4];

            let attribute = match self
                .soe_read(drive, sub_idn, SoeElements::ATTRIBUTE, &mut attr_buf)
                .await
            {
                Ok(raw) => SoeIdnAttribute::unpack_from_slice(raw)?,
                Err(e) => {
                    fmt::debug!(
                        "Slave {:#06x} drive {} IDN {} attribute read failed: {:?}",
                        self.configured_address,
                        drive,
                        sub_idn,
                        e
                    );

                    continue;
                }
            };

            bits += u32::from(attribute.bit_len());
        }

        fmt::debug!(
            "Slave {:#06x} drive {} mapping IDN {}: {} bits",
            self.configured_address,
            drive,
            mapping_idn,
            bits
        );

        Ok(bits)
    }

    /// Generate the process data sizes from the drives' AT (IDN 16) and MDT
    /// (IDN 24) mapping lists.
    ///
    /// Returns `(input_bytes, output_bytes)` summed over `drives` drive
    /// channels: inputs feed SM3, outputs feed SM2.
    pub(crate) async fn soe_mapping_sizes(&self, drives: u8) -> Result<(u16, u16), Error> {
        let mut at_bits = 0u32;
        let mut mdt_bits = 0u32;

        for drive in 0..drives.max(1) {
            at_bits += match self.soe_mapping_bits(drive, IDN_AT_MAPPING).await {
                Ok(bits) => bits,
                Err(Error::Mailbox(_)) => continue,
                Err(e) => return Err(e),
            };

            mdt_bits += match self.soe_mapping_bits(drive, IDN_MDT_MAPPING).await {
                Ok(bits) => bits,
                Err(Error::Mailbox(_)) => 0,
                Err(e) => return Err(e),
            };
        }

        Ok((
            (at_bits.div_ceil(8)) as u16,
            (mdt_bits.div_ceil(8)) as u16,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireWriteSized;

    #[test]
    fn header_roundtrip() {
        let header = SoeHeader {
            op_code: SoeHeader::READ_REQUEST,
            incomplete: false,
            error: false,
            drive: 2,
            elements: SoeElements::VALUE.bits(),
            idn_or_fragments_left: 17,
        };

        let packed = header.pack();

        // op 1, drive 2 in bits 5-7
        assert_eq!(packed, [0x01 | (2 << 5), 0x40, 17, 0x00]);
        assert_eq!(SoeHeader::unpack_from_slice(&packed), Ok(header));
    }

    #[test]
    fn error_flag() {
        let parsed = SoeHeader::unpack_from_slice(&[0x02 | 0x10, 0x40, 0x11, 0x00]).unwrap();

        assert!(parsed.error);
        assert_eq!(parsed.op_code, SoeHeader::READ_RESPONSE);
    }

    #[test]
    fn attribute_bit_len() {
        // length 0 = 8 bits .. length 3 = 64 bits
        for (raw, expect) in [(0u8, 8u16), (1, 16), (2, 32), (3, 64)] {
            let attr = SoeIdnAttribute {
                length: raw,
                ..SoeIdnAttribute::default()
            };

            assert_eq!(attr.bit_len(), expect);
        }
    }

    #[test]
    fn attribute_decode() {
        // Conversion factor 1, 16 bit value, write protected in OP
        let attr =
            SoeIdnAttribute::unpack_from_slice(&[0x01, 0x00, 0x01, 0x04]).unwrap();

        assert_eq!(attr.conversion_factor, 1);
        assert_eq!(attr.bit_len(), 16);
        assert!(attr.write_protect_op);
        assert!(!attr.write_protect_pre_op);
    }
}
