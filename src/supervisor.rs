//! Asynchronous fault detection and recovery.
//!
//! Cyclic code posts check requests into a bounded queue without ever
//! blocking; a background task drains the queue and drives recovery
//! transitions so the cyclic path stays clean of slow operations.

use core::ops::DerefMut;

use atomic_waker::AtomicWaker;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    error::Error,
    fmt,
    register::RegisterAddress,
    slave::{Slave, SlaveRef, types::Transition},
    slave_group::GroupId,
    slave_state::SlaveState,
};

/// A fault check request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Check {
    /// Check every slave of one group.
    Group(GroupId),
    /// Check a single slave by configured address.
    Slave(u16),
    /// Check everything.
    All,
}

impl Check {
    fn kind(&self) -> usize {
        match self {
            Check::Group(_) => 0,
            Check::Slave(_) => 1,
            Check::All => 2,
        }
    }
}

/// Bounded queue of pending checks, embedded in a
/// [`Master`](crate::Master).
pub(crate) struct SupervisorQueue {
    queue: heapless::mpmc::MpMcQueue<Check, 8>,
    waker: AtomicWaker,
    /// One in-flight message per kind; further posts of the same kind are
    /// dropped until it is consumed. Keeps a persistent fault from storming
    /// the queue.
    kind_pending: [AtomicBool; 3],
}

impl core::fmt::Debug for SupervisorQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SupervisorQueue")
            .field("group_pending", &self.kind_pending[0])
            .field("slave_pending", &self.kind_pending[1])
            .field("all_pending", &self.kind_pending[2])
            .finish()
    }
}

impl SupervisorQueue {
    pub fn new() -> Self {
        Self {
            queue: heapless::mpmc::MpMcQueue::new(),
            waker: AtomicWaker::new(),
            kind_pending: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
        }
    }

    /// Post a check without blocking.
    ///
    /// Returns `false` when the request was dropped, either because one of
    /// its kind is already pending or the pool is exhausted; the condition
    /// that triggered it will re-trigger, so nothing is lost.
    pub fn post(&self, check: Check) -> bool {
        let pending = &self.kind_pending[check.kind()];

        if pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        if self.queue.enqueue(check).is_err() {
            pending.store(false, Ordering::Release);

            return false;
        }

        self.waker.wake();

        true
    }

    pub fn try_next(&self) -> Option<Check> {
        let check = self.queue.dequeue()?;

        self.kind_pending[check.kind()].store(false, Ordering::Release);

        Some(check)
    }

    pub fn register_waker(&self, waker: &core::task::Waker) {
        self.waker.register(waker);
    }
}

impl<'sto> crate::Master<'sto> {
    /// Post a fault check request to the supervisor queue without blocking.
    ///
    /// Dropped silently (returning `false`) when a check of the same kind is
    /// already pending or the queue is full.
    pub fn request_check(&self, check: Check) -> bool {
        self.supervisor.post(check)
    }

    /// Wait for the next posted fault check request.
    ///
    /// This is the supervisor task's inbox: drive recovery for each
    /// received [`Check`], e.g. via
    /// [`SlaveGroup::check_group`](crate::SlaveGroup::check_group).
    pub async fn next_check(&self) -> Check {
        core::future::poll_fn(|cx| {
            // Register first so a post between the dequeue attempt and the
            // pending return is not lost
            self.supervisor.register_waker(cx.waker());

            match self.supervisor.try_next() {
                Some(check) => core::task::Poll::Ready(check),
                None => core::task::Poll::Pending,
            }
        })
        .await
    }
}

/// Verify one slave is in its expected state and drive recovery if not.
///
/// A slave that is unreachable or lost its state is forced to INIT and
/// climbed back up through the recorded expected state, replaying init
/// commands and restoring sync manager/FMMU configuration along the way. A
/// slave that is merely in the wrong state has its RX error counters logged
/// for diagnosis and is requested directly into the expected state.
pub(crate) async fn check_slave<S>(slave_ref: &mut SlaveRef<'_, S>) -> Result<(), Error>
where
    S: DerefMut<Target = Slave>,
{
    let expected = slave_ref.state.expected_state;

    let status = slave_ref.status().await;

    match status {
        Ok((state, _)) if state == expected => Ok(()),

        Ok((state, code)) if state != SlaveState::None => {
            fmt::warn!(
                "Slave {:#06x} in state {} (expected {}), status code: {}",
                slave_ref.configured_address(),
                state,
                expected,
                code
            );

            if let Ok(counters) = slave_ref.rx_error_counters().await {
                fmt::warn!(
                    "Slave {:#06x} RX error counters: {:?}",
                    slave_ref.configured_address(),
                    counters
                );
            }

            // Try the direct transition first; a full reconfiguration only
            // happens when the device dropped its configuration entirely
            slave_ref.request_state(expected).await
        }

        // Unreachable or state unknown: assume the device rebooted and
        // rebuild it from scratch
        _ => {
            fmt::warn!(
                "Slave {:#06x} lost (status: {:?}), reconfiguring",
                slave_ref.configured_address(),
                status.as_ref().map(|(state, _)| *state).ok()
            );

            recover_slave(slave_ref, expected).await
        }
    }
}

/// Force a slave to INIT and climb back to `expected`.
async fn recover_slave<S>(
    slave_ref: &mut SlaveRef<'_, S>,
    expected: SlaveState,
) -> Result<(), Error>
where
    S: DerefMut<Target = Slave>,
{
    slave_ref.request_state(SlaveState::Init).await?;

    if !expected.is_at_least(SlaveState::PreOp) {
        return Ok(());
    }

    slave_ref.configure_mailboxes().await?;

    if !expected.is_at_least(SlaveState::SafeOp) {
        return Ok(());
    }

    slave_ref
        .replay_init_commands(Transition::PreOpToSafeOp)
        .await?;

    slave_ref.restore_pd_config().await?;

    slave_ref.request_state(SlaveState::SafeOp).await?;

    if !expected.is_at_least(SlaveState::Op) {
        return Ok(());
    }

    slave_ref
        .replay_init_commands(Transition::SafeOpToOp)
        .await?;

    slave_ref.request_state(SlaveState::Op).await
}

impl<S> SlaveRef<'_, S>
where
    S: DerefMut<Target = Slave>,
{
    /// Rewrite the process data sync manager and FMMU registers recorded
    /// during mapping generation.
    pub(crate) async fn restore_pd_config(&mut self) -> Result<(), Error> {
        let sms = self.state.config.pd_sms.clone();

        for (index, config) in sms {
            self.write(RegisterAddress::sync_manager(index))
                .send(self.master, config)
                .await?;
        }

        let fmmus = self.state.config.fmmus.clone();

        for (index, config) in fmmus {
            self.write(RegisterAddress::fmmu(index))
                .send(self.master, config)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_and_drain() {
        let queue = SupervisorQueue::new();

        assert!(queue.post(Check::Slave(1000)));
        assert!(queue.post(Check::All));

        assert_eq!(queue.try_next(), Some(Check::Slave(1000)));
        assert_eq!(queue.try_next(), Some(Check::All));
        assert_eq!(queue.try_next(), None);
    }

    #[test]
    fn same_kind_suppressed_until_consumed() {
        let queue = SupervisorQueue::new();

        assert!(queue.post(Check::Group(GroupId(0))));
        // A second group check is dropped while one is pending, even for a
        // different group
        assert!(!queue.post(Check::Group(GroupId(1))));
        // Other kinds still go through
        assert!(queue.post(Check::Slave(1000)));

        assert_eq!(queue.try_next(), Some(Check::Group(GroupId(0))));

        // Consumed: the kind is usable again
        assert!(queue.post(Check::Group(GroupId(1))));
    }
}
