//! The RX handle fed by the application's network receive task.

use catline_wire::{WireRead, WireSized};

use crate::{
    MASTER_ADDR,
    datagram::{
        ReceiveAction, datagram_header::DatagramHeader, frame_header::FrameHeader,
        storage::DatagramStorageRef,
    },
    error::{Error, PduError, PduValidationError},
    ethernet::EthernetFrame,
    fmt,
};

/// The receive half of the datagram engine.
///
/// The owning task feeds every Ethernet frame received from the network
/// interface into [`receive_frame`](DatagramRx::receive_frame). Responses
/// are matched to their in-flight frame slot by the index of their first
/// datagram; anything unmatched is ignored.
#[derive(Debug)]
pub struct DatagramRx<'sto> {
    storage: DatagramStorageRef<'sto>,
}

impl<'sto> DatagramRx<'sto> {
    pub(crate) fn new(storage: DatagramStorageRef<'sto>) -> Self {
        Self { storage }
    }

    /// Process one received Ethernet frame.
    pub fn receive_frame(&mut self, ethernet_frame: &[u8]) -> Result<ReceiveAction, Error> {
        let frame = EthernetFrame::new_checked(ethernet_frame).map_err(Error::Pdu)?;

        if frame.ethertype() != crate::ETHERCAT_ETHERTYPE {
            return Ok(ReceiveAction::Ignored);
        }

        // Ignore looped-back frames we just sent. The first slave sets the
        // U/L bit of the source MAC, so processed responses never compare
        // equal to the master's address.
        if frame.src_addr() == MASTER_ADDR {
            return Ok(ReceiveAction::Ignored);
        }

        let payload = frame.payload();

        let header = FrameHeader::unpack_from_slice(payload)?;

        if !header.protocol.is_command() {
            fmt::trace!("ignoring non-command frame {:?}", header.protocol);

            return Ok(ReceiveAction::Ignored);
        }

        let datagrams = payload
            .get(FrameHeader::PACKED_LEN..FrameHeader::PACKED_LEN + usize::from(header.payload_len))
            .ok_or(Error::ReceiveFrame)?;

        let first = DatagramHeader::unpack_from_slice(datagrams)?;

        // Unmatched responses are stale (their future timed out) or belong
        // to a foreign master; both are dropped.
        let Some(mut receiving) = self.storage.claim_receiving(first.index) else {
            fmt::trace!("no in-flight frame for response index {}", first.index);

            return Ok(ReceiveAction::Ignored);
        };

        let sent = receiving.sent_first_header()?;

        if sent.command_code != first.command_code {
            // Consumes `receiving`, releasing the slot; the caller observes
            // a timeout rather than garbage data.
            drop(receiving);

            return Err(PduValidationError::CommandMismatch {
                sent: fmt::unwrap_opt!(crate::command::Command::parse(
                    sent.command_code,
                    sent.address
                )),
                received: crate::command::Command::parse(first.command_code, first.address)
                    .unwrap_or_default(),
            }
            .into());
        }

        if receiving.payload_len() != datagrams.len() {
            drop(receiving);

            return Err(Error::Pdu(PduError::Decode));
        }

        receiving.payload_mut().copy_from_slice(datagrams);

        if receiving.is_detached() {
            receiving.release();
        } else {
            receiving.mark_received();
        }

        Ok(ReceiveAction::Processed)
    }
}
