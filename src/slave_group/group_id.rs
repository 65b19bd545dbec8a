/// A unique identifier for a [`SlaveGroup`](crate::SlaveGroup), assigned at
/// creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupId(pub(crate) usize);

impl From<GroupId> for usize {
    fn from(value: GroupId) -> Self {
        value.0
    }
}
