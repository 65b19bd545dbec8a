//! The TX handle driven by the application's network send task.

use core::task::Waker;

use crate::datagram::{SendableFrame, storage::DatagramStorageRef};

/// The send half of the datagram engine.
///
/// The owning task repeatedly calls
/// [`next_sendable_frame`](DatagramTx::next_sendable_frame) and writes each
/// returned frame to the network interface. When `None` is returned the task
/// should park itself and store its [`Waker`] with
/// [`replace_waker`](DatagramTx::replace_waker); it is woken whenever new
/// frames are queued.
#[derive(Debug)]
pub struct DatagramTx<'sto> {
    storage: DatagramStorageRef<'sto>,
}

impl<'sto> DatagramTx<'sto> {
    pub(crate) fn new(storage: DatagramStorageRef<'sto>) -> Self {
        Self { storage }
    }

    /// Claim the next frame queued for sending, if any.
    ///
    /// High priority frames (cyclic process data, distributed clocks) are
    /// returned before low priority ones (acyclic reads/writes, mailbox).
    pub fn next_sendable_frame(&mut self) -> Option<SendableFrame<'sto>> {
        self.storage.claim_sending().map(SendableFrame::new)
    }

    /// Store the waker used to signal the send task that frames are
    /// waiting.
    pub fn replace_waker(&self, waker: &Waker) {
        self.storage.tx_waker.register(waker);
    }
}
