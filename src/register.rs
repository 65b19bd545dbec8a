//! Slave device register address abstraction.

/// Slave register addresses, giving the raw EtherCAT offsets usable names.
///
/// Defined in ETG1000.4, Table 31.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum RegisterAddress {
    /// Type, `u8`.
    Type = 0x0000u16,
    /// EtherCAT revision.
    Revision = 0x0001,
    /// Slave build number.
    Build = 0x0002,
    /// Number of supported FMMU entities.
    FmmuCount = 0x0004,
    /// Number of supported sync manager channels.
    SyncManagerChannels = 0x0005,
    /// RAM size in kilo-octets (1024 octets).
    RamSize = 0x0006,
    /// EtherCAT port descriptors 0-3, `u8`.
    PortDescriptors = 0x0007,
    /// Features supported by the slave, `u16`.
    SupportFlags = 0x0008,
    /// The slave's configured station address, `u16`.
    ConfiguredStationAddress = 0x0010,
    /// The slave's station address alias, `u16`.
    ConfiguredStationAlias = 0x0012,

    /// DL control, `u16`. ETG1000.4 Table 32.
    DlControl = 0x0100,
    /// DL status, `u16`. ETG1000.4 Table 34.
    DlStatus = 0x0110,

    /// Application Layer (AL) control register, `u16`. ETG1000.6 Table 9.
    AlControl = 0x0120,
    /// Application Layer (AL) status register, `u16`.
    AlStatus = 0x0130,
    /// Application Layer (AL) status code register, `u16`.
    AlStatusCode = 0x0134,

    /// PDI control, `u8`.
    PdiControl = 0x0140,

    /// Start of the 16 byte RX error counter block (per-port invalid frame
    /// and RX error counts), read for diagnosis during supervised recovery.
    RxErrorCounters = 0x0300,

    /// Watchdog divider, `u16`.
    WatchdogDivider = 0x0400,
    /// PDI watchdog timeout, `u16`.
    PdiWatchdog = 0x0410,
    /// Sync manager watchdog timeout, `u16`.
    SyncManagerWatchdog = 0x0420,
    /// Sync manager watchdog status (1 bit), `u16`.
    SyncManagerWatchdogStatus = 0x0440,

    /// EEPROM (SII) config register, `u16`.
    SiiConfig = 0x0500,
    /// EEPROM (SII) PDI access state, `u8`.
    SiiPdiAccess = 0x0501,
    /// EEPROM (SII) control register, `u16`.
    SiiControl = 0x0502,
    /// EEPROM (SII) word address, `u16`.
    SiiAddress = 0x0504,
    /// The start of 4 bytes (read) or 2 bytes (write) of data used by the
    /// EEPROM interface.
    SiiData = 0x0508,

    /// Fieldbus Memory Management Unit (FMMU) 0. ETG1000.4 Table 57.
    ///
    /// Subsequent FMMUs are at `0x0610`, `0x0620`, …; see
    /// [`RegisterAddress::fmmu`].
    Fmmu0 = 0x0600,

    /// Sync Manager (SM) 0. ETG1000.4 Table 59.
    ///
    /// Subsequent SMs are at `0x0808`, `0x0810`, …; see
    /// [`RegisterAddress::sync_manager`].
    Sm0 = 0x0800,

    /// Distributed clock (DC) port 0 receive time in ns. ETG1000.4 Table 60.
    ///
    /// Port times 1-3 follow at 4 byte intervals.
    DcTimePort0 = 0x0900,
    /// DC port 1 receive time in ns.
    DcTimePort1 = 0x0904,
    /// DC port 2 receive time in ns.
    DcTimePort2 = 0x0908,
    /// DC port 3 receive time in ns.
    DcTimePort3 = 0x090c,
    /// DC system time, `u64` when read from a 64 bit capable slave.
    DcSystemTime = 0x0910,
    /// DC receive time of the processing unit port, `u64`.
    DcReceiveTime = 0x0918,
    /// DC system time offset, `u64`.
    DcSystemTimeOffset = 0x0920,
    /// DC system time transmission delay, `u32`.
    DcSystemTimeTransmissionDelay = 0x0928,
    /// DC system time difference, `u32`.
    DcSystemTimeDifference = 0x092C,

    /// DC control loop parameter 1, `u16`.
    DcControlLoopParam1 = 0x0930,
    /// DC control loop parameter 2, `u16`.
    DcControlLoopParam2 = 0x0932,
    /// DC control loop parameter 3, `u16`.
    DcControlLoopParam3 = 0x0934,

    /// DC cyclic unit control, `u8`: assigns the sync unit to EtherCAT or
    /// PDI.
    DcCyclicUnitControl = 0x0980,
    /// DC sync activation, `u8`: bit 0 cyclic operation, bit 1 SYNC0, bit 2
    /// SYNC1.
    DcSyncActive = 0x0981,
    /// DC SYNC0 start (first trigger) time, `u64` ns.
    DcSyncStartTime = 0x0990,
    /// DC SYNC0 cycle time, `u32` ns.
    DcSync0CycleTime = 0x09A0,
    /// DC SYNC1 cycle time, `u32` ns.
    DcSync1CycleTime = 0x09A4,
}

impl From<RegisterAddress> for u16 {
    fn from(reg: RegisterAddress) -> Self {
        reg as u16
    }
}

impl RegisterAddress {
    /// FMMU register block by index.
    pub fn fmmu(index: u8) -> u16 {
        debug_assert!(index < 16, "FMMU index out of range");

        Self::Fmmu0 as u16 + u16::from(index) * 0x10
    }

    /// Sync manager register block by index.
    pub fn sync_manager(index: u8) -> u16 {
        debug_assert!(index < 16, "SM index out of range");

        Self::Sm0 as u16 + u16::from(index) * 0x08
    }

    /// Sync manager status byte (offset +5 into the SM block).
    ///
    /// Reading a `u16` from here also covers the activate byte at +6,
    /// including the repeat request bit used for mailbox recovery.
    pub fn sync_manager_status(index: u8) -> u16 {
        Self::sync_manager(index) + 5
    }

    /// Sync manager PDI control byte (offset +7), carrying the repeat
    /// acknowledge bit.
    pub fn sync_manager_pdi_control(index: u8) -> u16 {
        Self::sync_manager(index) + 7
    }

    /// DC port receive time register by port number (0-3).
    pub fn dc_time_port(port: u8) -> u16 {
        debug_assert!(port < 4, "port out of range");

        Self::DcTimePort0 as u16 + u16::from(port) * 4
    }
}

/// Support flags register (`0x0008`) contents.
///
/// Defined in ETG1000.4 Table 31 "ESC Features".
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub struct SupportFlags {
    #[wire(bits = 1)]
    pub fmmu_supports_bit_ops: bool,
    #[wire(bits = 1)]
    pub reserved_register_support: bool,
    #[wire(bits = 1)]
    pub dc_supported: bool,
    #[wire(bits = 1)]
    pub has_64bit_dc: bool,
    #[wire(bits = 1)]
    pub low_jitter: bool,
    #[wire(bits = 1)]
    pub ebus_enhanced_link_detection: bool,
    #[wire(bits = 1)]
    pub mii_enhanced_link_detection: bool,
    #[wire(bits = 1)]
    pub separate_fcs_error_handling: bool,
    #[wire(bits = 1)]
    pub enhanced_dc_sync: bool,
    /// Cleared when the slave does NOT support LRW; a cleared flag forces
    /// its whole group onto split LRD/LWR exchange.
    #[wire(bits = 1)]
    pub lrw_supported: bool,
    #[wire(bits = 1)]
    pub brw_aprw_fprw_supported: bool,
    #[wire(bits = 1, post_skip = 4)]
    pub special_fmmu: bool,
}

impl core::fmt::Display for SupportFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("DC: ")?;

        if self.dc_supported {
            f.write_str("yes")?;

            if self.has_64bit_dc {
                f.write_str(" (64 bit)")?;
            } else {
                f.write_str(" (32 bit)")?;
            }
        } else {
            f.write_str("no")?;
        }

        if !self.lrw_supported {
            f.write_str(", no LRW")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::{WireRead, WireWriteSized};

    #[test]
    fn block_addresses() {
        assert_eq!(RegisterAddress::fmmu(0), 0x0600);
        assert_eq!(RegisterAddress::fmmu(2), 0x0620);
        assert_eq!(RegisterAddress::sync_manager(1), 0x0808);
        assert_eq!(RegisterAddress::sync_manager_status(1), 0x080d);
        assert_eq!(RegisterAddress::sync_manager_pdi_control(1), 0x080f);
        assert_eq!(RegisterAddress::dc_time_port(3), 0x090c);
    }

    #[test]
    fn support_flags_roundtrip() {
        let flags = SupportFlags {
            dc_supported: true,
            has_64bit_dc: true,
            lrw_supported: true,
            ..SupportFlags::default()
        };

        let packed = flags.pack();

        assert_eq!(SupportFlags::unpack_from_slice(&packed), Ok(flags));
    }

    #[test]
    fn support_flags_fuzz() {
        heckcheck::check(|flags: SupportFlags| {
            let packed = flags.pack();

            let unpacked = SupportFlags::unpack_from_slice(&packed).expect("unpack");

            pretty_assertions::assert_eq!(flags, unpacked);

            Ok(())
        });
    }
}
