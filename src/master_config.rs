//! Configuration passed to [`Master`](crate::Master).

use crate::dc::ClockMode;

/// Configuration passed to [`Master::new`](crate::Master::new).
#[derive(Debug, Copy, Clone)]
pub struct MasterConfig {
    /// The number of `FRMW` packets to send during the static phase of
    /// distributed clocks synchronisation.
    ///
    /// Defaults to 10000. Set to zero to skip static sync entirely.
    pub dc_static_sync_iterations: u32,

    /// Datagram network retry behaviour.
    pub retry_behaviour: RetryBehaviour,

    /// How the master's cycle timing is disciplined against the distributed
    /// clocks reference.
    pub clock_mode: ClockMode,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            dc_static_sync_iterations: 10_000,
            retry_behaviour: RetryBehaviour::default(),
            clock_mode: ClockMode::default(),
        }
    }
}

impl MasterConfig {
    /// Create a default config with the given clock discipline mode.
    pub fn with_clock_mode(clock_mode: ClockMode) -> Self {
        Self {
            clock_mode,
            ..Self::default()
        }
    }
}

/// Network communication retry policy.
///
/// Retries are performed at the rate defined by
/// [`Timeouts::pdu`](crate::Timeouts::pdu).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RetryBehaviour {
    /// Do not retry timed out sends (default).
    ///
    /// Timeouts surface as [`Error::Timeout`](crate::error::Error::Timeout).
    #[default]
    None,

    /// Resend a frame up to `N` times, then raise
    /// [`Error::Timeout`](crate::error::Error::Timeout).
    Count(usize),

    /// Resend a frame forever(*).
    ///
    /// This can soft-lock a program if e.g. the network cable is removed,
    /// as the frame will be resent for eternity. [`RetryBehaviour::Count`]
    /// puts an upper bound on that.
    ///
    /// (*) Forever in this case means a retry count of `usize::MAX`.
    Forever,
}

impl RetryBehaviour {
    pub(crate) const fn retry_count(&self) -> usize {
        match self {
            RetryBehaviour::None => 0,
            RetryBehaviour::Count(n) => *n,
            RetryBehaviour::Forever => usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_count_sanity_check() {
        assert_eq!(RetryBehaviour::None.retry_count(), 0);
        assert_eq!(RetryBehaviour::Count(10).retry_count(), 10);
        assert_eq!(RetryBehaviour::Forever.retry_count(), usize::MAX);
    }
}
