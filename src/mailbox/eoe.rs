//! Ethernet over EtherCAT: tunnelling Ethernet frames through the mailbox
//! in 32 byte aligned fragments, plus the Set IP Parameter service.

use core::ops::Deref;

use crate::{
    error::{Error, Item, MailboxError},
    fmt,
    mailbox::{MAILBOX_MAX, MailboxHeader, MailboxProtocol, MailboxType},
    slave::{Slave, SlaveRef},
};
use catline_wire::{WireRead, WireSized, WireWrite};

/// Fragments are aligned to this granularity, and the header's size/offset
/// fields count in these units.
const FRAGMENT_GRANULARITY: usize = 32;

/// The largest tunnelled frame: an Ethernet frame with VLAN tag.
pub const MAX_ETHERNET_FRAME: usize = 1522;

/// One EoE mailbox payload (header plus fragment data) queued in a slave's
/// receive pool when it arrived during some other mailbox transaction.
pub(crate) type EoeFragment = heapless::Vec<u8, MAILBOX_MAX>;

/// EoE header: 4 bytes.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct EoeHeader {
    /// One of the `FRAME_*` constants.
    pub frame_type: u8,
    /// Destination port on multi-port tunnelling devices, usually 0.
    pub port: u8,
    pub last_fragment: bool,
    /// A 32 bit timestamp follows the payload of the last fragment.
    pub time_appended: bool,
    pub time_requested: bool,
    /// Fragment counter within one frame, starting at 0.
    pub fragment_number: u8,
    /// In fragment 0: the complete frame size. In later fragments: the
    /// payload offset. Both in 32 byte units.
    pub complete_size_or_offset: u8,
    /// Identifies which frame a fragment belongs to.
    pub frame_number: u8,
}

impl EoeHeader {
    pub const FRAME_FRAGMENT_DATA: u8 = 0x00;
    pub const FRAME_INIT_RESPONSE: u8 = 0x03;
    pub const FRAME_SET_IP_REQUEST: u8 = 0x02;

    /// Frame size in 32 byte units, rounded up.
    fn blocks(len: usize) -> u8 {
        len.div_ceil(FRAGMENT_GRANULARITY) as u8
    }
}

impl catline_wire::WireSized for EoeHeader {
    const PACKED_LEN: usize = 4;

    type Buffer = [u8; 4];

    fn buffer() -> Self::Buffer {
        [0u8; 4]
    }
}

impl WireWrite for EoeHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        buf[0] = (self.frame_type & 0x0f) | (self.port & 0x0f) << 4;
        buf[1] = self.last_fragment as u8
            | (self.time_appended as u8) << 1
            | (self.time_requested as u8) << 2;

        let word = u16::from(self.fragment_number & 0x3f)
            | u16::from(self.complete_size_or_offset & 0x3f) << 6
            | u16::from(self.frame_number & 0x0f) << 12;

        word.pack_to_slice_unchecked(&mut buf[2..4]);

        &buf[0..4]
    }

    fn packed_len(&self) -> usize {
        Self::PACKED_LEN
    }
}

impl WireRead for EoeHeader {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, catline_wire::WireError> {
        let buf = buf
            .get(0..4)
            .ok_or(catline_wire::WireError::ReadBufferTooShort {
                needed: 4,
                got: buf.len(),
            })?;

        let word = u16::unpack_from_slice(&buf[2..4])?;

        Ok(Self {
            frame_type: buf[0] & 0x0f,
            port: buf[0] >> 4,
            last_fragment: buf[1] & 0x01 != 0,
            time_appended: buf[1] & 0x02 != 0,
            time_requested: buf[1] & 0x04 != 0,
            fragment_number: (word & 0x3f) as u8,
            complete_size_or_offset: ((word >> 6) & 0x3f) as u8,
            frame_number: (word >> 12) as u8,
        })
    }
}

/// IP parameters pushed to an EoE capable slave with the Set IP Parameter
/// service.
///
/// Only the `Some` fields are transferred; the request's flag bitmap tells
/// the slave which ones are present.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct EoeIpParameters {
    pub mac: Option<[u8; 6]>,
    pub ip: Option<[u8; 4]>,
    pub subnet_mask: Option<[u8; 4]>,
    pub gateway: Option<[u8; 4]>,
    pub dns_server: Option<[u8; 4]>,
    pub dns_name: Option<heapless::String<32>>,
}

impl<'master, S> SlaveRef<'master, S>
where
    S: Deref<Target = Slave>,
{
    fn eoe_data_capacity(&self) -> Result<usize, Error> {
        let mailbox = self
            .state
            .config
            .mailbox
            .write
            .ok_or(Error::Mailbox(MailboxError::NoMailbox))?;

        let capacity =
            usize::from(mailbox.len).min(MAILBOX_MAX) - MailboxHeader::LEN - EoeHeader::PACKED_LEN;

        // Fragment payloads must stay 32 byte aligned except for the last
        Ok(capacity - capacity % FRAGMENT_GRANULARITY)
    }

    /// Tunnel one Ethernet frame to the slave, fragmenting it as needed.
    pub async fn eoe_send_frame(&self, frame: &[u8]) -> Result<(), Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Eoe)?;

        if frame.len() > MAX_ETHERNET_FRAME {
            return Err(Error::Capacity(Item::EthernetFrame));
        }

        let capacity = self.eoe_data_capacity()?;

        // All fragments of one frame share a frame number
        let frame_number = self.state.mailbox_counter() & 0x0f;

        let mut offset = 0usize;
        let mut fragment_number = 0u8;

        while offset < frame.len() || frame.is_empty() {
            let chunk = (frame.len() - offset).min(capacity);
            let last_fragment = offset + chunk == frame.len();

            let header = EoeHeader {
                frame_type: EoeHeader::FRAME_FRAGMENT_DATA,
                port: 0,
                last_fragment,
                time_appended: false,
                time_requested: false,
                fragment_number,
                complete_size_or_offset: if fragment_number == 0 {
                    EoeHeader::blocks(frame.len())
                } else {
                    (offset / FRAGMENT_GRANULARITY) as u8
                },
                frame_number,
            };

            self.mailbox_write(
                MailboxType::Eoe,
                (EoeHeader::PACKED_LEN + chunk) as u16,
                |buf| {
                    header.pack_to_slice_unchecked(&mut buf[0..4]);

                    buf[4..4 + chunk].copy_from_slice(&frame[offset..offset + chunk]);
                },
            )
            .await?;

            offset += chunk;
            fragment_number += 1;

            if last_fragment {
                break;
            }
        }

        Ok(())
    }

    /// Receive one tunnelled Ethernet frame into `buf`, reassembling
    /// fragments, and return the filled portion.
    ///
    /// Fragments that arrived while other mailbox traffic was in flight are
    /// drained from the slave's receive pool before any new mailbox read.
    pub async fn eoe_receive_frame<'buf>(
        &self,
        buf: &'buf mut [u8],
    ) -> Result<&'buf [u8], Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Eoe)?;

        let mut response = [0u8; MAILBOX_MAX];

        let mut expected_fragment = 0u8;
        let mut frame_number = 0u8;
        let mut filled = 0usize;

        loop {
            let len = match self.state.pop_eoe_fragment() {
                Some(fragment) => {
                    response[0..fragment.len()].copy_from_slice(&fragment);

                    fragment.len()
                }
                None => {
                    self.mailbox_read_expecting(&mut response, MailboxType::Eoe)
                        .await?
                        .1
                }
            };

            let header = EoeHeader::unpack_from_slice(&response)?;

            if header.frame_type != EoeHeader::FRAME_FRAGMENT_DATA {
                fmt::debug!(
                    "Slave {:#06x} unexpected EoE frame type {:#04x}",
                    self.configured_address,
                    header.frame_type
                );

                continue;
            }

            let mut payload = &response[EoeHeader::PACKED_LEN..len];

            // The (optional) timestamp trails the last fragment's payload
            if header.last_fragment && header.time_appended {
                payload = payload
                    .get(0..payload.len().saturating_sub(4))
                    .unwrap_or(&[]);
            }

            if header.fragment_number == 0 {
                let complete_size =
                    usize::from(header.complete_size_or_offset) * FRAGMENT_GRANULARITY;

                if complete_size > buf.len() {
                    return Err(Error::Mailbox(MailboxError::BufferTooSmall));
                }

                frame_number = header.frame_number;
                filled = 0;
                expected_fragment = 0;
            } else if header.frame_number != frame_number
                || header.fragment_number != expected_fragment
            {
                fmt::debug!(
                    "Slave {:#06x} EoE fragment out of order ({} of frame {}), restarting",
                    self.configured_address,
                    header.fragment_number,
                    header.frame_number
                );

                filled = 0;
                expected_fragment = 0;

                continue;
            }

            let offset = if header.fragment_number == 0 {
                0
            } else {
                usize::from(header.complete_size_or_offset) * FRAGMENT_GRANULARITY
            };

            buf.get_mut(offset..offset + payload.len())
                .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?
                .copy_from_slice(payload);

            filled = offset + payload.len();
            expected_fragment += 1;

            if header.last_fragment {
                break;
            }
        }

        Ok(&buf[0..filled])
    }

    /// Push IP parameters to the slave with the Set IP Parameter service.
    pub async fn eoe_set_ip_parameters(&self, parameters: &EoeIpParameters) -> Result<(), Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Eoe)?;

        // Flags word then the present fields in wire order
        let mut payload = [0u8; 4 + 6 + 4 + 4 + 4 + 4 + 32];
        let mut flags = 0u32;
        let mut used = 4;

        if let Some(mac) = parameters.mac {
            flags |= 1 << 0;
            payload[used..used + 6].copy_from_slice(&mac);
            used += 6;
        }

        if let Some(ip) = parameters.ip {
            flags |= 1 << 1;
            payload[used..used + 4].copy_from_slice(&ip);
            used += 4;
        }

        if let Some(subnet) = parameters.subnet_mask {
            flags |= 1 << 2;
            payload[used..used + 4].copy_from_slice(&subnet);
            used += 4;
        }

        if let Some(gateway) = parameters.gateway {
            flags |= 1 << 3;
            payload[used..used + 4].copy_from_slice(&gateway);
            used += 4;
        }

        if let Some(dns_server) = parameters.dns_server {
            flags |= 1 << 4;
            payload[used..used + 4].copy_from_slice(&dns_server);
            used += 4;
        }

        if let Some(dns_name) = &parameters.dns_name {
            flags |= 1 << 5;
            payload[used..used + dns_name.len()].copy_from_slice(dns_name.as_bytes());
            used += 32;
        }

        flags.pack_to_slice_unchecked(&mut payload[0..4]);

        let header = EoeHeader {
            frame_type: EoeHeader::FRAME_SET_IP_REQUEST,
            port: 0,
            last_fragment: true,
            time_appended: false,
            time_requested: false,
            fragment_number: 0,
            complete_size_or_offset: 0,
            frame_number: 0,
        };

        self.mailbox_write(
            MailboxType::Eoe,
            (EoeHeader::PACKED_LEN + used) as u16,
            |buf| {
                header.pack_to_slice_unchecked(&mut buf[0..4]);

                buf[4..4 + used].copy_from_slice(&payload[0..used]);
            },
        )
        .await?;

        let mut response = [0u8; MAILBOX_MAX];

        let (_mbx_header, len) = self
            .mailbox_read_expecting(&mut response, MailboxType::Eoe)
            .await?;

        let response_header = EoeHeader::unpack_from_slice(&response)?;

        if response_header.frame_type != EoeHeader::FRAME_INIT_RESPONSE {
            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: 0,
                sub_index: 0,
            }));
        }

        // A result code of zero means success
        let result = response
            .get(EoeHeader::PACKED_LEN..len)
            .and_then(|payload| u16::unpack_from_slice(payload).ok())
            .unwrap_or(0);

        if result != 0 {
            fmt::error!(
                "Slave {:#06x} rejected IP parameters with code {:#06x}",
                self.configured_address,
                result
            );

            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: result,
                sub_index: 0,
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = EoeHeader {
            frame_type: EoeHeader::FRAME_FRAGMENT_DATA,
            port: 1,
            last_fragment: false,
            time_appended: false,
            time_requested: false,
            fragment_number: 3,
            complete_size_or_offset: 12,
            frame_number: 5,
        };

        let mut buf = [0u8; 4];

        header.pack_to_slice_unchecked(&mut buf);

        assert_eq!(buf, [0x10, 0x00, 0x03 | (12 << 6) as u8, (12 >> 2) | (5 << 4)]);
        assert_eq!(EoeHeader::unpack_from_slice(&buf), Ok(header));
    }

    #[test]
    fn first_fragment_encodes_total_blocks() {
        assert_eq!(EoeHeader::blocks(0), 0);
        assert_eq!(EoeHeader::blocks(1), 1);
        assert_eq!(EoeHeader::blocks(32), 1);
        assert_eq!(EoeHeader::blocks(33), 2);
        assert_eq!(EoeHeader::blocks(1514), 48);
    }

    #[test]
    fn last_fragment_flag() {
        let parsed = EoeHeader::unpack_from_slice(&[0x00, 0x01, 0x00, 0x00]).unwrap();

        assert!(parsed.last_fragment);
    }
}
