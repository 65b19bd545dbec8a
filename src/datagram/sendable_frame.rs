//! A queued frame claimed by the TX task for putting on the wire.

use core::mem::ManuallyDrop;

use crate::{
    datagram::frame_element::{FrameBox, FrameState},
    error::Error,
    fmt,
};

/// A frame claimed in the `Sending` state, ready to be written to the
/// network interface.
#[derive(Debug)]
pub struct SendableFrame<'sto> {
    inner: ManuallyDrop<FrameBox<'sto>>,
}

impl<'sto> SendableFrame<'sto> {
    pub(crate) fn new(inner: FrameBox<'sto>) -> Self {
        Self {
            inner: ManuallyDrop::new(inner),
        }
    }

    /// The number of bytes to put on the wire for this frame.
    pub fn len(&self) -> usize {
        self.inner.ethernet_frame().len()
    }

    /// Whether this frame has no datagrams. Empty frames are never queued,
    /// so this is always `false` in practice.
    pub fn is_empty(&self) -> bool {
        self.inner.datagram_count() == 0
    }

    /// Hand the raw Ethernet frame bytes to a blocking send function.
    ///
    /// The closure must return the number of bytes sent; anything other
    /// than a complete send is treated as failure and re-queues the frame.
    pub fn send_blocking(
        mut self,
        send: impl FnOnce(&[u8]) -> Result<usize, Error>,
    ) -> Result<usize, Error> {
        // SAFETY: `self` is forgotten below so the inner box is not dropped
        // twice.
        let inner = unsafe { ManuallyDrop::take(&mut self.inner) };

        core::mem::forget(self);

        let bytes = inner.ethernet_frame();
        let expected = bytes.len();

        match send(bytes) {
            Ok(sent) if sent == expected => {
                // A fast response may have moved the frame into RxBusy
                // between the send above and here, so a failed swap is fine.
                let _ = inner.swap_state(FrameState::Sending, FrameState::Sent);

                Ok(sent)
            }
            Ok(sent) => {
                fmt::error!("only sent {} of {} bytes", sent, expected);

                let _ = inner.swap_state(FrameState::Sending, FrameState::Sendable);

                Err(Error::SendFrame)
            }
            Err(e) => {
                let _ = inner.swap_state(FrameState::Sending, FrameState::Sendable);

                Err(e)
            }
        }
    }
}

impl Drop for SendableFrame<'_> {
    fn drop(&mut self) {
        // Claimed but never sent: put the frame back in the queue.
        let _ = self
            .inner
            .swap_state(FrameState::Sending, FrameState::Sendable);
    }
}
