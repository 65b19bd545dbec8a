use crate::slave_state::SlaveState;

/// The AL control/status word for an individual slave device.
///
/// Defined in ETG1000.6 Table 9 - AL Control Description.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bits = 16)]
pub struct AlControl {
    /// AL state.
    #[wire(bits = 4)]
    pub state: SlaveState,
    /// Error flag (error acknowledge when written).
    #[wire(bits = 1)]
    pub error: bool,
    /// ID request flag.
    #[wire(bits = 1, post_skip = 10)]
    pub id_request: bool,
}

impl AlControl {
    pub fn new(state: SlaveState) -> Self {
        Self {
            state,
            error: false,
            id_request: false,
        }
    }

    /// Request a state while acknowledging any pending error.
    pub fn acknowledging(state: SlaveState) -> Self {
        Self {
            state,
            error: true,
            ..Default::default()
        }
    }

    /// Reset the slave: back to `INIT` with the error flag acknowledged.
    pub fn reset() -> Self {
        Self::acknowledging(SlaveState::Init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::{WireRead, WireWriteSized};

    #[test]
    fn al_control() {
        let value = AlControl {
            state: SlaveState::SafeOp,
            error: true,
            id_request: false,
        };

        assert_eq!(value.pack(), [0x04 | 0x10, 0x00]);
    }

    #[test]
    fn unpack() {
        let parsed = AlControl::unpack_from_slice(&[0x04 | 0x10, 0x00]).unwrap();

        assert_eq!(
            parsed,
            AlControl {
                state: SlaveState::SafeOp,
                error: true,
                id_request: false,
            }
        );
    }

    #[test]
    fn unpack_short() {
        assert!(AlControl::unpack_from_slice(&[0x04 | 0x10]).is_err());
    }
}
