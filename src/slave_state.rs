/// AL (application layer) state for a single slave device.
///
/// Read from register `0x0130`
/// ([`RegisterAddress::AlStatus`](crate::register::RegisterAddress::AlStatus)).
///
/// Defined in ETG1000.6 6.4.1, ETG1000.6 Table 9.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum SlaveState {
    /// No state recorded/read/known.
    #[default]
    None = 0x00,
    /// EtherCAT `INIT` state.
    Init = 0x01,
    /// EtherCAT `PRE-OP` state.
    PreOp = 0x02,
    /// EtherCAT `BOOT` state, used for e.g. FoE firmware updates.
    Bootstrap = 0x03,
    /// EtherCAT `SAFE-OP` state.
    SafeOp = 0x04,
    /// EtherCAT `OP` state.
    Op = 0x08,
    /// State is a combination of the above variants or an unknown value.
    #[wire(catch_all)]
    Other(u8),
}

impl core::fmt::Display for SlaveState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SlaveState::None => f.write_str("None"),
            SlaveState::Init => f.write_str("Init"),
            SlaveState::PreOp => f.write_str("Pre-Operational"),
            SlaveState::Bootstrap => f.write_str("Bootstrap"),
            SlaveState::SafeOp => f.write_str("Safe-Operational"),
            SlaveState::Op => f.write_str("Operational"),
            SlaveState::Other(value) => write!(f, "Other({:#04x})", value),
        }
    }
}

impl SlaveState {
    /// `true` if this state is at or above `other` in the EtherCAT state
    /// machine ordering INIT < PRE-OP < SAFE-OP < OP.
    ///
    /// `BOOT` is only reachable from INIT and is not ordered against the
    /// operational states.
    pub fn is_at_least(&self, other: SlaveState) -> bool {
        self.rank().is_some_and(|me| other.rank().is_some_and(|them| me >= them))
    }

    fn rank(&self) -> Option<u8> {
        match self {
            SlaveState::Init => Some(0),
            SlaveState::PreOp => Some(1),
            SlaveState::SafeOp => Some(2),
            SlaveState::Op => Some(3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        assert!(SlaveState::Op.is_at_least(SlaveState::PreOp));
        assert!(SlaveState::PreOp.is_at_least(SlaveState::PreOp));
        assert!(!SlaveState::Init.is_at_least(SlaveState::SafeOp));
        assert!(!SlaveState::Bootstrap.is_at_least(SlaveState::Init));
    }
}
