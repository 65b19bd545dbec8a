//! File access over EtherCAT, the trivial transfer protocol used for e.g.
//! firmware updates in the BOOT state.

use core::ops::Deref;

use crate::{
    error::{Error, FoeError, MailboxError},
    fmt,
    mailbox::{MAILBOX_MAX, MailboxHeader, MailboxProtocol, MailboxType},
    slave::{Slave, SlaveRef},
};
use catline_wire::{WireRead, WireWrite};

/// FoE header: an op code and a reserved byte, followed by op specific
/// fields.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub(crate) struct FoeHeader {
    #[wire(bytes = 1)]
    pub op_code: u8,
    #[wire(bytes = 1)]
    pub reserved: u8,
}

impl FoeHeader {
    pub const READ_REQUEST: u8 = 0x01;
    pub const WRITE_REQUEST: u8 = 0x02;
    pub const DATA: u8 = 0x03;
    pub const ACK: u8 = 0x04;
    pub const ERROR: u8 = 0x05;
    pub const BUSY: u8 = 0x06;

    /// FoE header plus the 4 byte password/packet number field.
    pub const FULL_LEN: usize = 6;
}

impl<'master, S> SlaveRef<'master, S>
where
    S: Deref<Target = Slave>,
{
    fn foe_data_capacity(&self) -> Result<usize, Error> {
        let mailbox = self
            .state
            .config
            .mailbox
            .write
            .ok_or(Error::Mailbox(MailboxError::NoMailbox))?;

        Ok(usize::from(mailbox.len).min(MAILBOX_MAX) - MailboxHeader::LEN - FoeHeader::FULL_LEN)
    }

    async fn foe_send(
        &self,
        op_code: u8,
        field: u32,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Foe)?;

        self.mailbox_write(
            MailboxType::Foe,
            (FoeHeader::FULL_LEN + payload.len()) as u16,
            |buf| {
                FoeHeader {
                    op_code,
                    reserved: 0,
                }
                .pack_to_slice_unchecked(&mut buf[0..2]);

                field.pack_to_slice_unchecked(&mut buf[2..6]);

                buf[FoeHeader::FULL_LEN..FoeHeader::FULL_LEN + payload.len()]
                    .copy_from_slice(payload);
            },
        )
        .await?;

        Ok(())
    }

    /// Receive one FoE message, returning its header, field and payload
    /// length after copying the payload into `buf`.
    async fn foe_receive(&self, buf: &mut [u8]) -> Result<(u8, u32, usize), Error> {
        let mut response = [0u8; MAILBOX_MAX];

        let (_mbx_header, len) = self
            .mailbox_read_expecting(&mut response, MailboxType::Foe)
            .await?;

        let header = FoeHeader::unpack_from_slice(&response)?;

        let field = u32::unpack_from_slice(&response[2..6])?;

        if header.op_code == FoeHeader::ERROR {
            fmt::error!(
                "Slave {:#06x} FoE error {:#010x}",
                self.configured_address,
                field
            );

            return Err(Error::Foe(FoeError::ErrorRequest { code: field }));
        }

        let payload = response
            .get(FoeHeader::FULL_LEN..len)
            .ok_or(Error::Foe(FoeError::NoAck))?;

        let out = buf
            .get_mut(0..payload.len())
            .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?;

        out.copy_from_slice(payload);

        Ok((header.op_code, field, payload.len()))
    }

    /// Read a file from the slave into `buf`, returning the filled portion.
    ///
    /// The transfer ends when a data packet shorter than the mailbox
    /// arrives.
    pub async fn foe_read<'buf>(
        &self,
        file_name: &str,
        password: u32,
        buf: &'buf mut [u8],
    ) -> Result<&'buf [u8], Error> {
        let capacity = self.foe_data_capacity()?;

        self.foe_send(FoeHeader::READ_REQUEST, password, file_name.as_bytes())
            .await?;

        let mut filled = 0;

        loop {
            let mut chunk = [0u8; MAILBOX_MAX];

            let (op_code, packet_nr, len) = self.foe_receive(&mut chunk).await?;

            match op_code {
                FoeHeader::BUSY => continue,
                FoeHeader::DATA => {
                    buf.get_mut(filled..filled + len)
                        .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?
                        .copy_from_slice(&chunk[0..len]);

                    filled += len;

                    self.foe_send(FoeHeader::ACK, packet_nr, &[]).await?;

                    // A short packet marks the end of the file
                    if len < capacity {
                        break;
                    }
                }
                other => {
                    fmt::error!(
                        "Slave {:#06x} unexpected FoE op {:#04x} during read",
                        self.configured_address,
                        other
                    );

                    return Err(Error::Foe(FoeError::NoAck));
                }
            }
        }

        Ok(&buf[0..filled])
    }

    /// Write a file to the slave.
    ///
    /// Data packets are sent with ascending packet numbers, each waiting for
    /// the slave's acknowledgement; the final packet is flagged by being
    /// shorter than the mailbox.
    pub async fn foe_write(
        &self,
        file_name: &str,
        password: u32,
        data: &[u8],
    ) -> Result<(), Error> {
        let capacity = self.foe_data_capacity()?;

        self.foe_send(FoeHeader::WRITE_REQUEST, password, file_name.as_bytes())
            .await?;

        self.foe_await_ack(0).await?;

        let mut packet_nr = 0u32;
        let mut remaining = data;

        loop {
            packet_nr += 1;

            let chunk = remaining.len().min(capacity);

            self.foe_send(FoeHeader::DATA, packet_nr, &remaining[0..chunk])
                .await?;

            self.foe_await_ack(packet_nr).await?;

            remaining = &remaining[chunk..];

            if remaining.is_empty() {
                // A final full-length packet cannot be recognised as the
                // end of the file, so an empty packet follows it
                if chunk == capacity {
                    packet_nr += 1;

                    self.foe_send(FoeHeader::DATA, packet_nr, &[]).await?;

                    self.foe_await_ack(packet_nr).await?;
                }

                break Ok(());
            }
        }
    }

    async fn foe_await_ack(&self, expect_packet: u32) -> Result<(), Error> {
        loop {
            let mut scratch = [0u8; MAILBOX_MAX];

            let (op_code, packet_nr, _len) = self.foe_receive(&mut scratch).await?;

            match op_code {
                FoeHeader::BUSY => continue,
                FoeHeader::ACK if packet_nr == expect_packet => break Ok(()),
                FoeHeader::ACK => {
                    fmt::error!(
                        "FoE acknowledged packet {} but {} was sent",
                        packet_nr,
                        expect_packet
                    );

                    break Err(Error::Foe(FoeError::WrongPacket));
                }
                _ => break Err(Error::Foe(FoeError::NoAck)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireWriteSized;

    #[test]
    fn header_roundtrip() {
        let header = FoeHeader {
            op_code: FoeHeader::DATA,
            reserved: 0,
        };

        assert_eq!(header.pack(), [0x03, 0x00]);
        assert_eq!(FoeHeader::unpack_from_slice(&[0x03, 0x00]), Ok(header));
    }
}
