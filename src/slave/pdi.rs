//! Access to one slave's slice of a group's process data image.

use core::ops::Deref;

use crate::slave::Slave;

/// A borrowed [`Slave`] along with its input and output slices of the
/// group's process data image.
///
/// Produced by [`SlaveGroup::slave`](crate::SlaveGroup::slave) in SAFE-OP or
/// OP. The write guard it wraps guarantees exclusive access, so mutable IO
/// access through a shared group reference is sound.
pub struct SlavePdi<'group> {
    slave: spin::RwLockWriteGuard<'group, Slave>,

    inputs: &'group [u8],

    outputs: &'group mut [u8],
}

impl core::fmt::Debug for SlavePdi<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlavePdi")
            .field("configured_address", &self.slave.configured_address())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl<'group> SlavePdi<'group> {
    pub(crate) fn new(
        slave: spin::RwLockWriteGuard<'group, Slave>,
        inputs: &'group [u8],
        outputs: &'group mut [u8],
    ) -> Self {
        Self {
            slave,
            inputs,
            outputs,
        }
    }
}

impl Deref for SlavePdi<'_> {
    type Target = Slave;

    fn deref(&self) -> &Self::Target {
        &self.slave
    }
}

impl<'master> crate::slave::SlaveRef<'master, SlavePdi<'_>> {
    /// This slave's process data inputs (slave to master), as read during
    /// the last cyclic exchange.
    pub fn inputs_raw(&self) -> &[u8] {
        self.state.inputs
    }

    /// This slave's process data outputs (master to slave), sent on the next
    /// cyclic exchange.
    pub fn outputs_raw(&self) -> &[u8] {
        self.state.outputs
    }

    /// Mutable access to this slave's process data outputs.
    pub fn outputs_raw_mut(&mut self) -> &mut [u8] {
        self.state.outputs
    }
}
