use crate::{
    error::Error,
    slave::Slave,
    slave_group::{GroupId, PreOp, SlaveGroup, SlaveGroupRef},
};

/// A trait implemented only by [`SlaveGroup`] so multiple groups with
/// differing const generic parameters can be iterated over during
/// [`Master::init`](crate::Master::init).
#[doc(hidden)]
pub trait SlaveGroupHandle {
    /// Get the group's unique ID.
    fn id(&self) -> GroupId;

    /// Add a slave device to this group.
    ///
    /// # Safety
    ///
    /// This mutates the group's internal slave list through a shared
    /// reference; no other borrow of the group's contents may be held over
    /// a call to this method.
    unsafe fn push(&self, slave: Slave) -> Result<(), Error>;

    /// Get a type-erased reference to this group for configuration.
    fn as_ref(&self) -> SlaveGroupRef<'_>;
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize> SlaveGroupHandle
    for SlaveGroup<MAX_SLAVES, MAX_PDI, PreOp>
{
    fn id(&self) -> GroupId {
        self.id
    }

    unsafe fn push(&self, slave: Slave) -> Result<(), Error> {
        unsafe { &mut *self.inner.get() }
            .slaves
            .push(spin::RwLock::new(slave))
            .map_err(|_| Error::Capacity(crate::error::Item::Slave))
    }

    fn as_ref(&self) -> SlaveGroupRef<'_> {
        SlaveGroupRef::new(self)
    }
}
