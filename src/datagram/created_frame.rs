//! A frame in the process of being filled with datagrams.

use core::{mem::ManuallyDrop, time::Duration};

use catline_wire::{WireRead, WireSized, WireWrite};

use crate::{
    ETHERCAT_ETHERTYPE, MASTER_ADDR,
    command::Command,
    datagram::{
        datagram_header::{DatagramFlags, DatagramHeader},
        frame_element::{FrameBox, FrameState},
        frame_header::FrameHeader,
        received_frame::FrameFuture,
    },
    error::PduError,
    ethernet::{EthernetAddress, EthernetFrame},
    fmt,
};

/// A handle to one datagram pushed into a frame, used to find its slice of
/// the response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DatagramHandle {
    /// Byte offset of the datagram header within the frame's datagram area.
    pub(crate) offset: usize,
    /// Payload length excluding header and working counter.
    pub(crate) payload_len: u16,
    pub(crate) index: u8,
    pub(crate) command_code: u8,
}

impl DatagramHandle {
    /// The total space this datagram occupies in a frame.
    pub fn alloc_size(&self) -> usize {
        DatagramHeader::OVERHEAD + usize::from(self.payload_len)
    }
}

/// A frame slot in the `Created` state, exclusively owned by the allocating
/// caller until marked sendable.
#[derive(Debug)]
pub struct CreatedFrame<'sto> {
    inner: ManuallyDrop<FrameBox<'sto>>,
    /// Offset of the most recently pushed datagram header, for updating its
    /// more-follows flag.
    last_header_offset: Option<usize>,
}

impl<'sto> CreatedFrame<'sto> {
    /// Fixed overhead of one datagram: its header plus the trailing working
    /// counter.
    pub const DATAGRAM_OVERHEAD: usize = DatagramHeader::OVERHEAD;

    pub(crate) fn new(inner: FrameBox<'sto>) -> Self {
        Self {
            inner: ManuallyDrop::new(inner),
            last_header_offset: None,
        }
    }

    /// `true` if no datagrams have been pushed into this frame yet.
    pub fn is_empty(&self) -> bool {
        self.inner.datagram_count() == 0
    }

    /// Remaining payload capacity for one more datagram.
    pub fn capacity_for_datagram(&self) -> usize {
        self.inner
            .datagram_buf()
            .len()
            .saturating_sub(self.inner.payload_len())
            .saturating_sub(Self::DATAGRAM_OVERHEAD)
    }

    /// Push a datagram into this frame.
    ///
    /// The datagram payload is `data`, zero padded up to `len_override` if
    /// that is longer — used to reserve space for a read response larger
    /// than the written data.
    pub fn push_datagram(
        &mut self,
        command: Command,
        data: impl WireWrite,
        len_override: Option<u16>,
    ) -> Result<DatagramHandle, PduError> {
        let data_len = data.packed_len();

        let payload_len = usize::from(len_override.unwrap_or(0)).max(data_len);

        let offset = self.inner.payload_len();

        let end = offset + DatagramHeader::OVERHEAD + payload_len;

        if end > self.inner.datagram_buf().len() {
            return Err(PduError::TooLong);
        }

        let index = self.inner.index_alloc().alloc()?;

        if let Err(e) = self.inner.push_index(index) {
            self.inner.index_alloc().free(index);

            return Err(e);
        }

        // This datagram is the last in the frame (so far)
        let header = DatagramHeader::new(command, index, payload_len as u16, false);

        let buf = self.inner.datagram_buf_mut();

        header.pack_to_slice_unchecked(&mut buf[offset..]);

        let payload_start = offset + DatagramHeader::PACKED_LEN;

        data.pack_to_slice_unchecked(&mut buf[payload_start..payload_start + data_len]);
        buf[payload_start + data_len..end].fill(0);

        // The previous datagram is no longer the last one in the frame
        if let Some(prev_offset) = self.last_header_offset.replace(offset) {
            let flags_offset = prev_offset + 6;

            let mut flags =
                fmt::unwrap!(DatagramFlags::unpack_from_slice(&buf[flags_offset..]));

            flags.more_follows = true;

            flags.pack_to_slice_unchecked(&mut buf[flags_offset..]);
        }

        self.inner.set_payload_len(end);

        Ok(DatagramHandle {
            offset,
            payload_len: payload_len as u16,
            index,
            command_code: command.code(),
        })
    }

    /// Push a datagram filled with as much of `bytes` as will fit in the
    /// remaining frame space.
    ///
    /// Returns the number of bytes consumed along with the datagram handle,
    /// or `None` if the input is empty or no space is left at all.
    pub fn push_datagram_slice_rest(
        &mut self,
        command: Command,
        bytes: &[u8],
    ) -> Result<Option<(usize, DatagramHandle)>, PduError> {
        if bytes.is_empty() {
            return Ok(None);
        }

        let chunk_len = self.capacity_for_datagram().min(bytes.len());

        if chunk_len == 0 {
            return Ok(None);
        }

        let handle = self.push_datagram(command, &bytes[0..chunk_len], None)?;

        Ok(Some((chunk_len, handle)))
    }

    fn write_headers(inner: &mut FrameBox<'sto>) {
        let payload_len = inner.payload_len();

        {
            let mut ethernet = EthernetFrame::new_unchecked(inner.ethernet_frame_mut());

            ethernet.set_dst_addr(EthernetAddress::BROADCAST);
            ethernet.set_src_addr(MASTER_ADDR);
            ethernet.set_ethertype(ETHERCAT_ETHERTYPE);
        }

        FrameHeader::command(payload_len as u16).pack_to_slice_unchecked(inner.ecat_header_mut());
    }

    /// The frame is filled and ready to go: queue it for sending, wake the
    /// TX task and return a future that resolves when the response arrives.
    pub fn mark_sendable(
        mut self,
        timeout: Duration,
        retries: usize,
    ) -> FrameFuture<'sto> {
        // SAFETY: `self` is forgotten below so the inner box is not dropped
        // twice.
        let mut inner = unsafe { ManuallyDrop::take(&mut self.inner) };

        core::mem::forget(self);

        Self::write_headers(&mut inner);

        inner.set_state(FrameState::Sendable);
        inner.wake_sender();

        FrameFuture::new(inner, timeout, retries)
    }

    /// Queue the frame for sending without any waiter: the RX path releases
    /// all resources as soon as the response returns.
    pub fn mark_sendable_detached(mut self) {
        // SAFETY: `self` is forgotten below so the inner box is not dropped
        // twice.
        let mut inner = unsafe { ManuallyDrop::take(&mut self.inner) };

        core::mem::forget(self);

        Self::write_headers(&mut inner);

        inner.set_detached();
        inner.set_state(FrameState::Sendable);
        inner.wake_sender();
    }
}

impl Drop for CreatedFrame<'_> {
    fn drop(&mut self) {
        // The frame was never queued, so the slot and any allocated indices
        // can be released directly.
        self.inner.release();
    }
}
