//! The mailbox transport shared by all mailbox protocols.
//!
//! A request is written to the slave's receive mailbox (SM0) as an `FPWR`,
//! then the send mailbox (SM1) is polled for the response and drained with
//! an `FPRD`. Requests carry a rolling 3 bit counter used by both sides for
//! retransmit duplicate suppression, and a lost response can be recovered by
//! toggling the SM repeat request bit.

pub mod coe;
pub mod eoe;
pub mod foe;
pub mod soe;

use core::ops::Deref;

use crate::{
    error::{Error, MailboxError},
    fmt,
    register::RegisterAddress,
    slave::{Slave, SlaveRef, types::Mailbox},
    sync_manager_channel::Status as SmStatus,
    timer_factory::IntoTimeout,
};
use catline_wire::{WireRead, WireWrite};

/// The largest mailbox payload this master can exchange, mailbox header
/// included.
///
/// Sized to the payload area of a standard MTU frame; slaves advertise
/// their actual (usually much smaller) mailbox sizes via the SII.
pub const MAILBOX_MAX: usize = 1486;

/// Mailbox message priority.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    #[default]
    Lowest = 0x00,
    Low = 0x01,
    High = 0x02,
    Highest = 0x03,
}

/// Mailbox protocol type carried in the mailbox header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MailboxType {
    /// Error reply (ERR).
    Err = 0x00,
    /// ADS over EtherCAT (AoE).
    Aoe = 0x01,
    /// Ethernet over EtherCAT (EoE).
    Eoe = 0x02,
    /// CAN application protocol over EtherCAT (CoE).
    Coe = 0x03,
    /// File access over EtherCAT (FoE).
    Foe = 0x04,
    /// Servo profile over EtherCAT (SoE).
    Soe = 0x05,
    /// Vendor specific.
    VendorSpecific = 0x0f,
    #[wire(catch_all)]
    Unknown(u8),
}

/// A mailbox protocol, for support checks and error reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MailboxProtocol {
    Aoe,
    Eoe,
    Coe,
    Foe,
    Soe,
    Voe,
}

impl From<MailboxProtocol> for crate::eeprom::types::MailboxProtocols {
    fn from(value: MailboxProtocol) -> Self {
        use crate::eeprom::types::MailboxProtocols;

        match value {
            MailboxProtocol::Aoe => MailboxProtocols::AOE,
            MailboxProtocol::Eoe => MailboxProtocols::EOE,
            MailboxProtocol::Coe => MailboxProtocols::COE,
            MailboxProtocol::Foe => MailboxProtocols::FOE,
            MailboxProtocol::Soe => MailboxProtocols::SOE,
            MailboxProtocol::Voe => MailboxProtocols::VOE,
        }
    }
}

/// Mailbox header.
///
/// Defined in ETG1000.6 as `TMBXHEADER`, e.g. Table 29 - CoE Elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 6)]
pub struct MailboxHeader {
    /// Payload length following this header.
    #[wire(bytes = 2)]
    pub length: u16,
    /// Station address of the originator.
    #[wire(bytes = 2)]
    pub address: u16,
    #[wire(pre_skip = 6, bits = 2)]
    pub priority: Priority,
    #[wire(bits = 4)]
    pub mailbox_type: MailboxType,
    /// Rolling counter 1..=7; 0 is reserved. A receiver must ignore a
    /// message repeating the previous counter value.
    #[wire(bits = 3, post_skip = 1)]
    pub counter: u8,
}

impl MailboxHeader {
    /// Header length on the wire.
    pub const LEN: usize = 6;
}

impl<'master, S> SlaveRef<'master, S>
where
    S: Deref<Target = Slave>,
{
    fn write_mailbox_config(&self) -> Result<Mailbox, Error> {
        self.state
            .config
            .mailbox
            .write
            .ok_or(Error::Mailbox(MailboxError::NoMailbox))
    }

    fn read_mailbox_config(&self) -> Result<Mailbox, Error> {
        self.state
            .config
            .mailbox
            .read
            .ok_or(Error::Mailbox(MailboxError::NoMailbox))
    }

    /// Error with [`MailboxError::NotSupported`] when the slave does not
    /// advertise the given protocol.
    pub(crate) fn ensure_mailbox_protocol(&self, protocol: MailboxProtocol) -> Result<(), Error> {
        if self
            .state
            .config
            .mailbox
            .supported_protocols
            .contains(protocol.into())
        {
            Ok(())
        } else {
            Err(Error::Mailbox(MailboxError::NotSupported(protocol)))
        }
    }

    /// Read one sync manager's mailbox-full bit.
    pub(crate) async fn mailbox_full(&self, sync_manager: u8) -> Result<bool, Error> {
        let status = self
            .read(RegisterAddress::sync_manager_status(sync_manager))
            .receive::<SmStatus>(self.master)
            .await?;

        Ok(status.mailbox_full)
    }

    async fn wait_mailbox_full(&self, sync_manager: u8) -> Result<(), Error> {
        async {
            loop {
                if self.mailbox_full(sync_manager).await? {
                    break Ok(());
                }

                self.master.timeouts.loop_tick().await;
            }
        }
        .timeout(self.master.timeouts.mailbox_response)
        .await
        .map_err(|e| match e {
            Error::Timeout => Error::Mailbox(MailboxError::ReadEmpty),
            other => other,
        })
    }

    async fn wait_mailbox_empty(&self, sync_manager: u8) -> Result<(), Error> {
        async {
            loop {
                if !self.mailbox_full(sync_manager).await? {
                    break Ok(());
                }

                self.master.timeouts.loop_tick().await;
            }
        }
        .timeout(self.master.timeouts.mailbox_echo)
        .await
        .map_err(|e| match e {
            Error::Timeout => Error::Mailbox(MailboxError::WriteFull),
            other => other,
        })
    }

    /// Toggle the repeat request bit of the given sync manager and wait for
    /// the slave's repeat acknowledge to match, making it re-queue a lost
    /// mailbox message.
    async fn repeat_request(&self, sync_manager: u8) -> Result<(), Error> {
        // Status byte at +5 and activation byte at +6 read as one word; the
        // repeat request bit is 0x0200 of that word.
        let mut status = self
            .read(RegisterAddress::sync_manager_status(sync_manager))
            .receive::<u16>(self.master)
            .await?;

        status ^= 0x0200;

        self.write(RegisterAddress::sync_manager_status(sync_manager))
            .send(self.master, status)
            .await?;

        let want_ack = ((status & 0x0200) >> 8) as u8;

        async {
            loop {
                let control = self
                    .read(RegisterAddress::sync_manager_pdi_control(sync_manager))
                    .receive::<u8>(self.master)
                    .await?;

                if control & 0x02 == want_ack {
                    break Ok(());
                }

                self.master.timeouts.loop_tick().await;
            }
        }
        .timeout(self.master.timeouts.mailbox_response)
        .await?;

        fmt::debug!(
            "Slave {:#06x} SM{} repeat request acknowledged",
            self.configured_address,
            sync_manager
        );

        Ok(())
    }

    /// Write one mailbox request into the slave's receive mailbox.
    ///
    /// The payload is produced by `fill`, which is handed a buffer of
    /// `payload_len` bytes directly after the mailbox header. Returns the
    /// counter value used for the request.
    pub(crate) async fn mailbox_write(
        &self,
        mailbox_type: MailboxType,
        payload_len: u16,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<u8, Error> {
        let mailbox = self.write_mailbox_config()?;

        if usize::from(payload_len) + MailboxHeader::LEN > usize::from(mailbox.len)
            || usize::from(mailbox.len) > MAILBOX_MAX
        {
            return Err(Error::Mailbox(MailboxError::TooLong {
                address: 0,
                sub_index: 0,
            }));
        }

        // The receive mailbox must be empty before a new request goes in
        self.wait_mailbox_empty(mailbox.sync_manager).await?;

        let counter = self.state.mailbox_counter();

        let mut frame = [0u8; MAILBOX_MAX];

        MailboxHeader {
            length: payload_len,
            address: 0x0000,
            priority: Priority::Lowest,
            mailbox_type,
            counter,
        }
        .pack_to_slice_unchecked(&mut frame);

        fill(&mut frame[MailboxHeader::LEN..MailboxHeader::LEN + usize::from(payload_len)]);

        // The whole sync manager region is written; touching its last byte
        // is what marks the mailbox full on the slave side.
        self.write(mailbox.address)
            .with_len(mailbox.len)
            .send(
                self.master,
                &frame[0..MailboxHeader::LEN + usize::from(payload_len)],
            )
            .await?;

        Ok(counter)
    }

    /// Read one mailbox message from the slave's send mailbox into `buf`,
    /// waiting for it to become full first.
    ///
    /// Handles lost-mailbox recovery (WKC 0 on a full mailbox toggles the
    /// repeat request) and drops retransmit duplicates. Returns the header
    /// and the payload length copied into `buf`.
    pub(crate) async fn mailbox_read(
        &self,
        buf: &mut [u8],
    ) -> Result<(MailboxHeader, usize), Error> {
        let mailbox = self.read_mailbox_config()?;

        async {
            loop {
                self.wait_mailbox_full(mailbox.sync_manager).await?;

                let response = self
                    .read(mailbox.address)
                    .ignore_wkc()
                    .receive_slice(self.master, mailbox.len)
                    .await?;

                if response.working_counter == 0 {
                    // The message was lost between SM full and our read.
                    // Ask the slave to repeat it.
                    fmt::debug!(
                        "Slave {:#06x} mailbox read returned WKC 0, requesting repeat",
                        self.configured_address
                    );

                    drop(response);

                    self.repeat_request(mailbox.sync_manager).await?;

                    continue;
                }

                let header = MailboxHeader::unpack_from_slice(&response)?;

                if !self.state.accept_response_counter(header.counter) {
                    fmt::debug!(
                        "Slave {:#06x} duplicate mailbox counter {}, discarding",
                        self.configured_address,
                        header.counter
                    );

                    continue;
                }

                let payload_len = usize::from(header.length);

                let payload = response
                    .get(MailboxHeader::LEN..MailboxHeader::LEN + payload_len)
                    .ok_or(Error::Mailbox(MailboxError::SdoResponseInvalid {
                        address: 0,
                        sub_index: 0,
                    }))?;

                let out = buf
                    .get_mut(0..payload_len)
                    .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?;

                out.copy_from_slice(payload);

                break Ok((header, payload_len));
            }
        }
        .timeout(self.master.timeouts.mailbox_response)
        .await
    }

    /// Read mailbox messages until one of the expected protocol type
    /// arrives.
    ///
    /// CoE emergencies received in the meantime are queued on the slave;
    /// other unexpected messages are logged and dropped.
    pub(crate) async fn mailbox_read_expecting(
        &self,
        buf: &mut [u8],
        expected: MailboxType,
    ) -> Result<(MailboxHeader, usize), Error> {
        loop {
            let (header, len) = self.mailbox_read(buf).await?;

            if header.mailbox_type == expected {
                break Ok((header, len));
            }

            if header.mailbox_type == MailboxType::Coe {
                if let Some(emergency) = coe::try_parse_emergency(&buf[0..len]) {
                    fmt::warn!(
                        "Slave {:#06x} emergency: code {:#06x}, register {:#04x}",
                        self.configured_address,
                        emergency.error_code,
                        emergency.error_register
                    );

                    self.state.push_emergency(emergency);

                    continue;
                }
            }

            // Slaves tunnel Ethernet frames whenever they like, so EoE
            // fragments landing mid-transaction go to the slave's receive
            // pool for reassembly by the next EoE receive call.
            if header.mailbox_type == MailboxType::Eoe {
                fmt::debug!(
                    "Slave {:#06x} queueing EoE fragment received out of band",
                    self.configured_address
                );

                self.state.push_eoe_fragment(&buf[0..len]);

                continue;
            }

            fmt::warn!(
                "Slave {:#06x} unexpected mailbox message type {:?} while waiting for {:?}",
                self.configured_address,
                header.mailbox_type,
                expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireWriteSized;

    #[test]
    fn encode_header() {
        // From a wireshark capture of a CoE upload request
        let expected = [0x0a, 0x00, 0x00, 0x00, 0x00, 0x33];

        let packed = MailboxHeader {
            length: 10,
            priority: Priority::Lowest,
            address: 0x0000,
            counter: 3,
            mailbox_type: MailboxType::Coe,
        }
        .pack();

        assert_eq!(packed, expected);
    }

    #[test]
    fn decode_header() {
        let raw = [0x0a, 0x00, 0x00, 0x00, 0x00, 0x23];

        let expected = MailboxHeader {
            length: 10,
            address: 0x0000,
            priority: Priority::Lowest,
            mailbox_type: MailboxType::Coe,
            counter: 2,
        };

        assert_eq!(MailboxHeader::unpack_from_slice(&raw), Ok(expected));
    }

    #[test]
    fn header_counter_bits() {
        for counter in 1..=7 {
            let packed = MailboxHeader {
                length: 0,
                address: 0,
                priority: Priority::Lowest,
                mailbox_type: MailboxType::Soe,
                counter,
            }
            .pack();

            assert_eq!(packed[5] >> 4, counter);
            assert_eq!(packed[5] & 0x0f, 0x05);
        }
    }
}
