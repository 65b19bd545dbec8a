//! Response-side frame states: receiving, received, and the future that
//! connects them to the sending task.

use core::{
    future::Future,
    mem::ManuallyDrop,
    ops::Deref,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use catline_wire::{WireRead, WireSized};

use crate::{
    datagram::{
        created_frame::DatagramHandle,
        datagram_header::DatagramHeader,
        frame_element::{FrameBox, FrameState},
    },
    error::{Error, PduError, PduValidationError},
    fmt,
    timer_factory::{Timer, timer},
};

/// A frame claimed by the RX path while the response payload is copied in
/// and validated.
#[derive(Debug)]
pub(crate) struct ReceivingFrame<'sto> {
    inner: ManuallyDrop<FrameBox<'sto>>,
}

impl<'sto> ReceivingFrame<'sto> {
    pub fn new(inner: FrameBox<'sto>) -> Self {
        Self {
            inner: ManuallyDrop::new(inner),
        }
    }

    /// The header of the first datagram as sent, before the response is
    /// copied over it.
    pub fn sent_first_header(&self) -> Result<DatagramHeader, Error> {
        DatagramHeader::unpack_from_slice(self.inner.datagram_buf()).map_err(Error::from)
    }

    pub fn payload_len(&self) -> usize {
        self.inner.payload_len()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.inner.payload_len();

        &mut self.inner.datagram_buf_mut()[0..len]
    }

    pub fn is_detached(&self) -> bool {
        self.inner.is_detached()
    }

    /// Response stored: wake the waiting future.
    pub fn mark_received(mut self) {
        // SAFETY: `self` is forgotten below so the inner box is not dropped
        // twice.
        let inner = unsafe { ManuallyDrop::take(&mut self.inner) };

        core::mem::forget(self);

        if inner
            .swap_state(FrameState::RxBusy, FrameState::RxDone)
            .is_err()
        {
            fmt::error!("failed to mark frame received");
        }

        inner.wake();
    }

    /// Release the frame without waking anything, for detached frames and
    /// unrecoverable response errors.
    pub fn release(mut self) {
        // SAFETY: `self` is forgotten below so the inner box is not dropped
        // twice.
        let mut inner = unsafe { ManuallyDrop::take(&mut self.inner) };

        core::mem::forget(self);

        inner.release();
    }
}

impl Drop for ReceivingFrame<'_> {
    fn drop(&mut self) {
        // Error path: the response was unusable. Releasing (instead of
        // re-arming) lets the waiting future time out rather than hang on a
        // frame that will never complete.
        self.inner.release();
    }
}

/// A validated response frame, with exclusive access to the returned
/// datagram payloads.
#[derive(Debug)]
pub struct ReceivedFrame<'sto> {
    inner: ManuallyDrop<FrameBox<'sto>>,
}

impl<'sto> ReceivedFrame<'sto> {
    fn new(inner: FrameBox<'sto>) -> Self {
        Self {
            inner: ManuallyDrop::new(inner),
        }
    }

    fn datagram_parts(&self, handle: DatagramHandle) -> Result<(usize, usize, u16), Error> {
        let buf = self.inner.datagram_buf();

        let header = DatagramHeader::unpack_from_slice(
            buf.get(handle.offset..)
                .ok_or(PduError::InvalidIndex(handle.index))?,
        )?;

        if header.index != handle.index {
            return Err(PduValidationError::IndexMismatch {
                sent: handle.index,
                received: header.index,
            }
            .into());
        }

        if header.command_code != handle.command_code
            || header.flags.length != handle.payload_len
        {
            return Err(Error::Pdu(PduError::Decode));
        }

        let payload_start = handle.offset + DatagramHeader::PACKED_LEN;
        let payload_end = payload_start + usize::from(handle.payload_len);

        let wkc = u16::unpack_from_slice(
            buf.get(payload_end..payload_end + 2)
                .ok_or(PduError::Decode)?,
        )?;

        Ok((payload_start, payload_end, wkc))
    }

    /// Borrow the response payload of one datagram in this frame.
    pub fn datagram(&self, handle: DatagramHandle) -> Result<DatagramRef<'_>, Error> {
        let (start, end, working_counter) = self.datagram_parts(handle)?;

        Ok(DatagramRef {
            data: &self.inner.datagram_buf()[start..end],
            working_counter,
        })
    }

    /// Consume the frame, returning an owned handle to one datagram's
    /// response payload.
    ///
    /// Other datagrams in the frame become inaccessible; their resources are
    /// released when the returned [`ReceivedDatagram`] is dropped.
    pub fn into_datagram(
        mut self,
        handle: DatagramHandle,
    ) -> Result<ReceivedDatagram<'sto>, Error> {
        let (start, end, working_counter) = self.datagram_parts(handle)?;

        // SAFETY: `self` is forgotten below so the inner box is not dropped
        // twice.
        let inner = unsafe { ManuallyDrop::take(&mut self.inner) };

        core::mem::forget(self);

        Ok(ReceivedDatagram {
            inner: ManuallyDrop::new(inner),
            data_start: start,
            data_end: end,
            working_counter,
        })
    }
}

impl Drop for ReceivedFrame<'_> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// A borrowed view of one datagram's response payload.
#[derive(Debug)]
pub struct DatagramRef<'frame> {
    data: &'frame [u8],
    /// The working counter returned for this datagram.
    pub working_counter: u16,
}

impl Deref for DatagramRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

/// An owned handle to one datagram's response payload.
///
/// The underlying frame slot is freed when this is dropped.
#[derive(Debug)]
pub struct ReceivedDatagram<'sto> {
    inner: ManuallyDrop<FrameBox<'sto>>,
    data_start: usize,
    data_end: usize,
    /// The working counter returned for this datagram.
    pub working_counter: u16,
}

impl Deref for ReceivedDatagram<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner.datagram_buf()[self.data_start..self.data_end]
    }
}

impl Drop for ReceivedDatagram<'_> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Resolves to the frame's response once the RX path has processed it.
///
/// When the configured timeout elapses the frame is re-queued up to the
/// configured number of retries, then failed with [`Error::Timeout`].
#[derive(Debug)]
pub struct FrameFuture<'sto> {
    frame: Option<FrameBox<'sto>>,
    timer: Timer,
    timeout: Duration,
    retries_left: usize,
}

impl<'sto> FrameFuture<'sto> {
    pub(crate) fn new(inner: FrameBox<'sto>, timeout: Duration, retries: usize) -> Self {
        Self {
            frame: Some(inner),
            timer: timer(timeout),
            timeout,
            retries_left: retries,
        }
    }
}

impl<'sto> Future for FrameFuture<'sto> {
    type Output = Result<ReceivedFrame<'sto>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(frame) = this.frame.as_ref() else {
            fmt::error!("frame future polled after completion");

            return Poll::Ready(Err(Error::Internal));
        };

        // Register before checking the state so a wake between the check
        // and the register is not lost.
        frame.register_waker(cx.waker());

        if frame
            .swap_state(FrameState::RxDone, FrameState::RxProcessing)
            .is_ok()
        {
            let inner = fmt::unwrap_opt!(this.frame.take());

            return Poll::Ready(Ok(ReceivedFrame::new(inner)));
        }

        match Pin::new(&mut this.timer).poll(cx) {
            Poll::Ready(()) => {
                if this.retries_left > 0 {
                    this.retries_left -= 1;

                    // No response: requeue the frame as-is and go again
                    if frame
                        .swap_state(FrameState::Sent, FrameState::Sendable)
                        .is_ok()
                    {
                        fmt::debug!("retrying frame, {} attempts left", this.retries_left);

                        frame.wake_sender();
                    }

                    this.timer = timer(this.timeout);

                    // Poll the fresh timer so it registers this task's waker
                    if Pin::new(&mut this.timer).poll(cx).is_ready() {
                        cx.waker().wake_by_ref();
                    }

                    Poll::Pending
                } else {
                    let mut inner = fmt::unwrap_opt!(this.frame.take());

                    inner.release_from_any_state();

                    Poll::Ready(Err(Error::Timeout))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for FrameFuture<'_> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.frame.take() {
            inner.release_from_any_state();
        }
    }
}
