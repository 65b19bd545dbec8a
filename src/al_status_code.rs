/// AL status codes read from register `0x0134` after a failed or faulted
/// state transition.
///
/// Defined in ETG1000.6 Table 11.
#[derive(Clone, Copy, Debug, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum AlStatusCode {
    /// No error.
    NoError = 0x0000,
    /// Unspecified error.
    UnspecifiedError = 0x0001,
    /// No memory.
    NoMemory = 0x0002,
    /// Invalid device setup.
    InvalidDeviceSetup = 0x0003,
    /// Invalid requested state change.
    InvalidRequestedStateChange = 0x0011,
    /// Unknown requested state.
    UnknownRequestedState = 0x0012,
    /// Bootstrap not supported.
    BootstrapNotSupported = 0x0013,
    /// No valid firmware.
    NoValidFirmware = 0x0014,
    /// Invalid mailbox configuration (BOOT state).
    InvalidMailboxConfigurationBoot = 0x0015,
    /// Invalid mailbox configuration (PRE-OP state).
    InvalidMailboxConfigurationPreOp = 0x0016,
    /// Invalid sync manager configuration.
    InvalidSyncManagerConfiguration = 0x0017,
    /// No valid inputs available.
    NoValidInputsAvailable = 0x0018,
    /// No valid outputs.
    NoValidOutputs = 0x0019,
    /// Synchronization error.
    SynchronizationError = 0x001A,
    /// Sync manager watchdog.
    SyncManagerWatchdog = 0x001B,
    /// Invalid sync Manager types.
    InvalidSyncManagerTypes = 0x001C,
    /// Invalid output configuration.
    InvalidOutputConfiguration = 0x001D,
    /// Invalid input configuration.
    InvalidInputConfiguration = 0x001E,
    /// Invalid watchdog configuration.
    InvalidWatchdogConfiguration = 0x001F,
    /// Slave needs cold start.
    SlaveNeedsColdStart = 0x0020,
    /// Slave needs INIT.
    SlaveNeedsInit = 0x0021,
    /// Slave needs PREOP.
    SlaveNeedsPreop = 0x0022,
    /// Slave needs SAFEOP.
    SlaveNeedsSafeop = 0x0023,
    /// Invalid input mapping.
    InvalidInputMapping = 0x0024,
    /// Invalid output mapping.
    InvalidOutputMapping = 0x0025,
    /// Inconsistent settings.
    InconsistentSettings = 0x0026,
    /// Freerun not supported.
    FreerunNotSupported = 0x0027,
    /// Synchronization not supported.
    SynchronizationNotSupported = 0x0028,
    /// Freerun needs 3 buffer mode.
    FreerunNeeds3BufferMode = 0x0029,
    /// Background watchdog.
    BackgroundWatchdog = 0x002A,
    /// No valid inputs and outputs.
    NoValidInputsAndOutputs = 0x002B,
    /// Fatal sync error.
    FatalSyncError = 0x002C,
    /// No sync error.
    NoSyncError = 0x002D,
    /// Invalid DC SYNC configuration.
    InvalidDcSyncConfiguration = 0x0030,
    /// Invalid DC latch configuration.
    InvalidDcLatchConfiguration = 0x0031,
    /// PLL error.
    PllError = 0x0032,
    /// DC sync IO error.
    DcSyncIoError = 0x0033,
    /// DC sync timeout error.
    DcSyncTimeoutError = 0x0034,
    /// DC invalid sync cycle time.
    DcInvalidSyncCycleTime = 0x0035,
    /// DC sync0 cycle time.
    DcSync0CycleTime = 0x0036,
    /// DC sync1 cycle time.
    DcSync1CycleTime = 0x0037,
    /// MBX_AOE.
    MbxAoe = 0x0041,
    /// MBX_EOE.
    MbxEoe = 0x0042,
    /// MBX_COE.
    MbxCoe = 0x0043,
    /// MBX_FOE.
    MbxFoe = 0x0044,
    /// MBX_SOE.
    MbxSoe = 0x0045,
    /// MBX_VOE.
    MbxVoe = 0x004F,
    /// EEPROM no access.
    EepromNoAccess = 0x0050,
    /// EEPROM error.
    EepromError = 0x0051,
    /// Slave restarted locally.
    SlaveRestartedLocally = 0x0060,
    /// Device identification value updated.
    DeviceIdentificationValueUpdated = 0x0061,
    /// Application controller available.
    ApplicationControllerAvailable = 0x00F0,
    /// Unknown status code.
    #[wire(catch_all)]
    Unknown(u16),
}

impl core::fmt::Display for AlStatusCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::NoError => "No error",
            Self::UnspecifiedError => "Unspecified error",
            Self::NoMemory => "No memory",
            Self::InvalidDeviceSetup => "Invalid device setup",
            Self::InvalidRequestedStateChange => "Invalid requested state change",
            Self::UnknownRequestedState => "Unknown requested state",
            Self::BootstrapNotSupported => "Bootstrap not supported",
            Self::NoValidFirmware => "No valid firmware",
            Self::InvalidMailboxConfigurationBoot => "Invalid mailbox configuration (BOOT state)",
            Self::InvalidMailboxConfigurationPreOp => "Invalid mailbox configuration (PRE-OP state)",
            Self::InvalidSyncManagerConfiguration => "Invalid sync manager configuration",
            Self::NoValidInputsAvailable => "No valid inputs available",
            Self::NoValidOutputs => "No valid outputs",
            Self::SynchronizationError => "Synchronization error",
            Self::SyncManagerWatchdog => "Sync manager watchdog",
            Self::InvalidSyncManagerTypes => "Invalid sync manager types",
            Self::InvalidOutputConfiguration => "Invalid output configuration",
            Self::InvalidInputConfiguration => "Invalid input configuration",
            Self::InvalidWatchdogConfiguration => "Invalid watchdog configuration",
            Self::SlaveNeedsColdStart => "Slave needs cold start",
            Self::SlaveNeedsInit => "Slave needs INIT",
            Self::SlaveNeedsPreop => "Slave needs PRE-OP",
            Self::SlaveNeedsSafeop => "Slave needs SAFE-OP",
            Self::InvalidInputMapping => "Invalid input mapping",
            Self::InvalidOutputMapping => "Invalid output mapping",
            Self::InconsistentSettings => "Inconsistent settings",
            Self::FreerunNotSupported => "Freerun not supported",
            Self::SynchronizationNotSupported => "Synchronization not supported",
            Self::FreerunNeeds3BufferMode => "Freerun needs 3 buffer mode",
            Self::BackgroundWatchdog => "Background watchdog",
            Self::NoValidInputsAndOutputs => "No valid inputs and outputs",
            Self::FatalSyncError => "Fatal sync error",
            Self::NoSyncError => "No sync error",
            Self::InvalidDcSyncConfiguration => "Invalid DC SYNC configuration",
            Self::InvalidDcLatchConfiguration => "Invalid DC latch configuration",
            Self::PllError => "PLL error",
            Self::DcSyncIoError => "DC sync IO error",
            Self::DcSyncTimeoutError => "DC sync timeout error",
            Self::DcInvalidSyncCycleTime => "DC invalid sync cycle time",
            Self::DcSync0CycleTime => "DC SYNC0 cycle time",
            Self::DcSync1CycleTime => "DC SYNC1 cycle time",
            Self::MbxAoe => "MBX_AOE",
            Self::MbxEoe => "MBX_EOE",
            Self::MbxCoe => "MBX_COE",
            Self::MbxFoe => "MBX_FOE",
            Self::MbxSoe => "MBX_SOE",
            Self::MbxVoe => "MBX_VOE",
            Self::EepromNoAccess => "EEPROM no access",
            Self::EepromError => "EEPROM error",
            Self::SlaveRestartedLocally => "Slave restarted locally",
            Self::DeviceIdentificationValueUpdated => "Device identification value updated",
            Self::ApplicationControllerAvailable => "Application controller available",
            Self::Unknown(value) => return write!(f, "Unknown ({:#06x})", value),
        };

        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireRead;

    #[test]
    fn unpack_known_and_unknown() {
        assert_eq!(
            AlStatusCode::unpack_from_slice(&[0x1b, 0x00]),
            Ok(AlStatusCode::SyncManagerWatchdog)
        );
        assert_eq!(
            AlStatusCode::unpack_from_slice(&[0x34, 0x12]),
            Ok(AlStatusCode::Unknown(0x1234))
        );
    }
}
