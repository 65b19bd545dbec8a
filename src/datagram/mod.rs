//! The datagram engine: frame assembly, index allocation and send/receive
//! correlation over pooled, allocation-free storage.
//!
//! # High level overview
//!
//! ```text
//! Calling code    Engine            TX/RX task         Network
//! ------------    ------            ----------         -------
//! push datagrams  stage frame
//!                 wake TX waker --> claim frame
//!                                   send bytes    -->  ring traverses
//!                                   receive bytes <--  slaves
//!                 match by index <- feed bytes in
//! response ready  wake future
//! ```
//!
//! Storage is declared up front as a [`DatagramStorage`] and split into
//! three parts: a [`DatagramTx`]/[`DatagramRx`] pair owned by the network
//! I/O task(s), and the [`DatagramLoop`] embedded into a
//! [`Master`](crate::Master).

pub(crate) mod created_frame;
pub(crate) mod datagram_header;
pub(crate) mod frame_element;
pub(crate) mod frame_header;
pub(crate) mod received_frame;
pub(crate) mod sendable_frame;
pub(crate) mod storage;
mod rx;
mod tx;

use crate::error::PduError;

pub use created_frame::{CreatedFrame, DatagramHandle};
pub use received_frame::{DatagramRef, FrameFuture, ReceivedDatagram, ReceivedFrame};
pub use rx::DatagramRx;
pub use sendable_frame::SendableFrame;
pub use storage::DatagramStorage;
pub use tx::DatagramTx;

use storage::DatagramStorageRef;

/// TX queue class of a frame.
///
/// High priority frames are claimed by the TX task before low priority ones
/// within the same wakeup, keeping cyclic process data and clock
/// distribution ahead of acyclic reads and mailbox traffic.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FramePriority {
    /// Acyclic traffic: one-shot reads/writes, mailbox exchanges.
    #[default]
    Low,
    /// Cyclic process data and distributed clock sync.
    High,
}

/// What [`DatagramRx::receive_frame`] did with a received Ethernet frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReceiveAction {
    /// The frame was not an EtherCAT response, or matched no in-flight
    /// request, and was ignored.
    Ignored,
    /// The frame was matched to an in-flight request and processed.
    Processed,
}

/// The master-side core of the datagram engine.
#[derive(Debug)]
pub struct DatagramLoop<'sto> {
    storage: DatagramStorageRef<'sto>,
}

impl<'sto> DatagramLoop<'sto> {
    pub(crate) fn new(storage: DatagramStorageRef<'sto>) -> Self {
        Self { storage }
    }

    /// Claim a free frame slot.
    pub(crate) fn alloc_frame(
        &self,
        priority: FramePriority,
    ) -> Result<CreatedFrame<'sto>, PduError> {
        self.storage.alloc_frame(priority)
    }

    /// The maximum payload all datagrams in one frame can occupy, including
    /// their per-datagram overhead.
    pub(crate) fn max_frame_payload(&self) -> usize {
        self.storage.frame_size - DatagramStorage::<0, 0>::element_size(0)
    }

    /// Wake the TX task.
    pub fn wake_sender(&self) {
        self.storage.tx_waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        MASTER_ADDR,
        command::Command,
        error::Error,
        ethernet::{EthernetAddress, EthernetFrame},
    };
    use core::{
        future::Future,
        task::{Context, Poll, Waker},
    };

    const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(128);

    /// Simulate the wire: take a sendable frame, apply `mutate` to the
    /// datagram area, bump the source MAC like a real first slave does, and
    /// return the bytes to feed back into the RX half.
    fn roundtrip_bytes(
        frame: SendableFrame<'_>,
        mutate: impl FnOnce(&mut [u8]),
    ) -> heapless::Vec<u8, FRAME_SIZE> {
        let mut wire = heapless::Vec::new();

        frame
            .send_blocking(|bytes| {
                wire.extend_from_slice(bytes).unwrap();

                Ok(bytes.len())
            })
            .expect("send");

        let mut eth = EthernetFrame::new_unchecked(wire.as_mut_slice());

        let mut reply_addr = MASTER_ADDR;
        reply_addr.0[0] |= 0x02;

        eth.set_src_addr(EthernetAddress(reply_addr.0));

        // Skip the EtherCAT frame header
        mutate(&mut eth.payload_mut()[2..]);

        wire
    }

    fn poll_once<'sto>(
        future: &mut FrameFuture<'sto>,
    ) -> Poll<Result<ReceivedFrame<'sto>, Error>> {
        let mut cx = Context::from_waker(Waker::noop());

        core::pin::Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn single_datagram_roundtrip() {
        let storage: DatagramStorage<4, FRAME_SIZE> = DatagramStorage::new();

        let (mut tx, mut rx, dgram_loop) = storage.try_split().expect("split");

        let mut frame = dgram_loop.alloc_frame(FramePriority::Low).expect("alloc");

        let handle = frame
            .push_datagram(Command::fprd(0x1000, 0x0130).into(), (), Some(2))
            .expect("push");

        let mut future = frame.mark_sendable(core::time::Duration::from_millis(100), 0);

        let sendable = tx.next_sendable_frame().expect("sendable");

        let wire = roundtrip_bytes(sendable, |datagrams| {
            // Fill the response payload and bump the working counter
            datagrams[10] = 0x08;
            datagrams[11] = 0x00;
            datagrams[12] = 1;
        });

        assert_eq!(rx.receive_frame(&wire), Ok(ReceiveAction::Processed));

        let Poll::Ready(Ok(received)) = poll_once(&mut future) else {
            panic!("future not ready");
        };

        let datagram = received.datagram(handle).expect("datagram");

        assert_eq!(datagram.working_counter, 1);
        assert_eq!(&*datagram, &[0x08, 0x00]);
    }

    #[test]
    fn response_to_unknown_index_ignored() {
        let storage: DatagramStorage<4, FRAME_SIZE> = DatagramStorage::new();

        let (_tx, mut rx, _dgram_loop) = storage.try_split().expect("split");

        let mut wire = [0u8; 60];

        {
            let mut eth = EthernetFrame::new_unchecked(&mut wire[..]);

            eth.set_dst_addr(EthernetAddress::BROADCAST);
            eth.set_src_addr(EthernetAddress([0x12, 0x10, 0x10, 0x10, 0x10, 0x10]));
            eth.set_ethertype(crate::ETHERCAT_ETHERTYPE);

            // EtherCAT header: 12 byte payload, command protocol
            eth.payload_mut()[0] = 12;
            eth.payload_mut()[1] = 0x40;
        }

        assert_eq!(rx.receive_frame(&wire), Ok(ReceiveAction::Ignored));
    }

    #[test]
    fn own_frame_echo_ignored() {
        let storage: DatagramStorage<4, FRAME_SIZE> = DatagramStorage::new();

        let (_tx, mut rx, _dgram_loop) = storage.try_split().expect("split");

        let mut wire = [0u8; 60];

        {
            let mut eth = EthernetFrame::new_unchecked(&mut wire[..]);

            eth.set_src_addr(MASTER_ADDR);
            eth.set_ethertype(crate::ETHERCAT_ETHERTYPE);
        }

        assert_eq!(rx.receive_frame(&wire), Ok(ReceiveAction::Ignored));
    }

    #[test]
    fn multiple_datagrams_chain() {
        let storage: DatagramStorage<4, FRAME_SIZE> = DatagramStorage::new();

        let (mut tx, mut rx, dgram_loop) = storage.try_split().expect("split");

        let mut frame = dgram_loop.alloc_frame(FramePriority::Low).expect("alloc");

        let first = frame
            .push_datagram(Command::brd(0x0000).into(), (), Some(1))
            .expect("push 1");
        let second = frame
            .push_datagram(Command::brd(0x0130).into(), (), Some(2))
            .expect("push 2");

        let mut future = frame.mark_sendable(core::time::Duration::from_millis(100), 0);

        let sendable = tx.next_sendable_frame().expect("sendable");

        let wire = roundtrip_bytes(sendable, |datagrams| {
            // First datagram: 1 byte payload at offset 10, wkc at 11
            datagrams[11] = 2;
            // Second datagram begins at 13: wkc at 13 + 10 + 2
            datagrams[25] = 3;
        });

        // The first datagram must have its more-follows flag set on the wire
        let flags = u16::from_le_bytes([wire[14 + 2 + 6], wire[14 + 2 + 7]]);
        assert_ne!(flags & 0x8000, 0, "more_follows must be set");

        assert_eq!(rx.receive_frame(&wire), Ok(ReceiveAction::Processed));

        let Poll::Ready(Ok(received)) = poll_once(&mut future) else {
            panic!("future not ready");
        };

        assert_eq!(received.datagram(first).expect("first").working_counter, 2);
        assert_eq!(
            received.datagram(second).expect("second").working_counter,
            3
        );
    }

    #[test]
    fn high_priority_sent_first() {
        let storage: DatagramStorage<4, FRAME_SIZE> = DatagramStorage::new();

        let (mut tx, _rx, dgram_loop) = storage.try_split().expect("split");

        let mut low = dgram_loop.alloc_frame(FramePriority::Low).expect("alloc");
        low.push_datagram(Command::brd(0x0000).into(), (), Some(1))
            .expect("push");
        let _low_fut = low.mark_sendable(core::time::Duration::from_millis(100), 0);

        let mut high = dgram_loop.alloc_frame(FramePriority::High).expect("alloc");
        let high_handle = high
            .push_datagram(Command::lrw(0x0000).into(), [0u8; 4], None)
            .expect("push");
        let _high_fut = high.mark_sendable(core::time::Duration::from_millis(100), 0);

        // LRW frame was queued second but must come out first
        let first_out = tx.next_sendable_frame().expect("first");

        let mut first_bytes = heapless::Vec::<u8, FRAME_SIZE>::new();

        first_out
            .send_blocking(|bytes| {
                first_bytes.extend_from_slice(bytes).unwrap();

                Ok(bytes.len())
            })
            .expect("send");

        // Command code of first datagram: LRW = 0x0c
        assert_eq!(first_bytes[14 + 2], 0x0c);

        assert_eq!(high_handle.payload_len, 4);

        assert!(tx.next_sendable_frame().is_some(), "low frame still queued");
    }

    #[test]
    fn detached_frame_releases_on_rx() {
        let storage: DatagramStorage<2, FRAME_SIZE> = DatagramStorage::new();

        let (mut tx, mut rx, dgram_loop) = storage.try_split().expect("split");

        let mut frame = dgram_loop.alloc_frame(FramePriority::Low).expect("alloc");

        frame
            .push_datagram(Command::fpwr(0x1000, 0x0920).into(), 0u64, None)
            .expect("push");

        frame.mark_sendable_detached();

        let sendable = tx.next_sendable_frame().expect("sendable");

        let wire = roundtrip_bytes(sendable, |datagrams| {
            datagrams[10 + 8] = 1;
        });

        assert_eq!(rx.receive_frame(&wire), Ok(ReceiveAction::Processed));

        // The slot and its index must be free again with no-one waiting
        assert!(dgram_loop.alloc_frame(FramePriority::Low).is_ok());
    }
}
