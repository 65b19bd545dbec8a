//! A type-erased group reference used during master initialisation.

use core::cell::UnsafeCell;

use crate::{
    Master,
    error::Error,
    fmt,
    pdi::PdiOffset,
    slave::{Slave, SlaveRef},
    slave_group::GroupId,
};

/// A reference to a [`SlaveGroup`](crate::SlaveGroup) with erased const
/// generics, so differently sized groups can be configured from one loop.
pub struct SlaveGroupRef<'a> {
    id: GroupId,
    max_pdi: usize,
    pdi_start: &'a UnsafeCell<PdiOffset>,
    slaves: &'a [spin::RwLock<Slave>],
}

impl<'a> SlaveGroupRef<'a> {
    pub(crate) fn new<const MAX_SLAVES: usize, const MAX_PDI: usize, S>(
        group: &'a crate::SlaveGroup<MAX_SLAVES, MAX_PDI, S>,
    ) -> Self {
        // SAFETY: `as_ref` is only called once all slaves are pushed, so
        // the list is not mutated while this slice is live.
        let inner = unsafe { &*group.inner.get() };

        Self {
            id: group.id,
            max_pdi: MAX_PDI,
            pdi_start: &group.pdi_start,
            slaves: inner.slaves.as_slice(),
        }
    }

    pub(crate) fn id(&self) -> GroupId {
        self.id
    }

    /// Configure the mailboxes of all slaves in this group and transition
    /// them to PRE-OP, reserving this group's slice of the logical address
    /// space.
    ///
    /// Returns the logical offset for the next group.
    pub(crate) async fn into_pre_op(
        &self,
        pdi_position: PdiOffset,
        master: &Master<'_>,
    ) -> Result<PdiOffset, Error> {
        fmt::debug!(
            "Group {:?}: {} slaves, logical base {:#010x}",
            self.id,
            self.slaves.len(),
            pdi_position.start_address
        );

        for slave in self.slaves {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            SlaveRef::new(master, configured_address, &mut *slave)
                .configure_mailboxes()
                .await?;
        }

        // SAFETY: Only written here, during single threaded init.
        unsafe { *self.pdi_start.get() = pdi_position };

        // The group's eventual mapping may use less than its full capacity,
        // but reserving all of it keeps group ranges disjoint without a
        // second pass.
        Ok(pdi_position.increment(self.max_pdi as u16))
    }
}
