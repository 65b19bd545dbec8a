//! Timeouts configuration and future timeout helpers.

use crate::error::Error;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// A timer future that completes after a given duration.
///
/// Backed by [`async_io::Timer`] on `std` targets and
/// [`embassy_time::Timer`] elsewhere.
pub(crate) struct Timer {
    #[cfg(feature = "std")]
    inner: async_io::Timer,
    #[cfg(not(feature = "std"))]
    inner: embassy_time::Timer,
}

impl core::fmt::Debug for Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Timer")
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|_| ())
    }
}

/// Create a timer that completes after the given duration.
#[cfg(feature = "std")]
pub(crate) fn timer(duration: Duration) -> Timer {
    Timer {
        inner: async_io::Timer::after(duration),
    }
}

/// Create a timer that completes after the given duration.
#[cfg(not(feature = "std"))]
pub(crate) fn timer(duration: Duration) -> Timer {
    Timer {
        inner: embassy_time::Timer::after(embassy_time::Duration::from_micros(
            duration.as_micros() as u64,
        )),
    }
}

/// Wrap a fallible future with a deadline.
pub(crate) trait IntoTimeout<O>: Future<Output = Result<O, Error>> + Sized {
    /// Race this future against a timer, returning [`Error::Timeout`] if the
    /// timer wins.
    fn timeout(self, duration: Duration) -> impl Future<Output = Result<O, Error>> {
        futures_lite::future::or(self, async move {
            timer(duration).await;

            Err(Error::Timeout)
        })
    }
}

impl<O, F> IntoTimeout<O> for F where F: Future<Output = Result<O, Error>> {}

/// Timeouts for various stages of master operation.
#[derive(Copy, Clone, Debug)]
pub struct Timeouts {
    /// How long to wait for a slave state change, e.g. PRE-OP to SAFE-OP.
    ///
    /// Defaults to 10 s as transitions can take quite a long time on some
    /// devices.
    pub state_transition: Duration,

    /// How long to wait for a datagram response before the frame is retried
    /// or failed.
    ///
    /// Defaults to 100 ms.
    pub pdu: Duration,

    /// How long to wait for an EEPROM read/write operation on a slave.
    ///
    /// Defaults to 10 ms.
    pub eeprom: Duration,

    /// The length of time to wait between polling loop iterations, e.g.
    /// waiting for a slave state change or a full mailbox.
    ///
    /// Defaults to 1 ms. Setting this to zero busy-waits and can starve
    /// other tasks on single threaded executors.
    pub wait_loop_delay: Duration,

    /// How long to wait for a slave to consume a written mailbox request.
    ///
    /// Defaults to 10 ms.
    pub mailbox_echo: Duration,

    /// How long to wait for a slave's response to arrive in its send (slave
    /// to master) mailbox.
    ///
    /// Defaults to 1 s.
    pub mailbox_response: Duration,
}

impl Timeouts {
    /// Wait for [`wait_loop_delay`](Timeouts::wait_loop_delay) before
    /// returning.
    pub(crate) async fn loop_tick(&self) {
        timer(self.wait_loop_delay).await;
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            state_transition: Duration::from_secs(10),
            pdu: Duration::from_millis(100),
            eeprom: Duration::from_millis(10),
            wait_loop_delay: Duration::from_millis(1),
            mailbox_echo: Duration::from_millis(10),
            mailbox_response: Duration::from_secs(1),
        }
    }
}
