//! Typed views of SII (EEPROM) contents.

use crate::sync_manager_channel::{Control, Direction, OperationMode};
use catline_wire::WireRead;

/// SII EEPROM ownership, register `0x0500`.
///
/// Some slaves require PDI ownership of the EEPROM to transition out of
/// INIT; ownership is handed back to the master afterwards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum SiiOwner {
    /// The master (EtherCAT frame side) owns the EEPROM interface.
    Master = 0x0000,
    /// The slave's PDI owns the EEPROM interface.
    Pdi = 0x0001,
}

/// SII control/status register, `0x0502`.
///
/// Defined in ETG1000.4 Table 48.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub struct SiiControl {
    /// EEPROM write access enabled.
    #[wire(bits = 1, post_skip = 4)]
    pub write_enable: bool,
    /// EEPROM emulation by the PDI.
    #[wire(bits = 1)]
    pub emulation: bool,
    /// Reads return 8 bytes when set, 4 otherwise.
    #[wire(bits = 1)]
    pub read_size_8: bool,
    /// Address algorithm: 1 byte addresses when clear, 2 bytes when set.
    #[wire(bits = 1)]
    pub word_addressing: bool,

    /// Read operation requested/in progress.
    #[wire(bits = 1)]
    pub read: bool,
    /// Write operation requested/in progress.
    #[wire(bits = 1)]
    pub write: bool,
    /// Reload operation requested/in progress.
    #[wire(bits = 1)]
    pub reload: bool,
    /// Configuration area checksum error.
    #[wire(bits = 1)]
    pub checksum_error: bool,
    /// Device info error.
    #[wire(bits = 1)]
    pub device_info_error: bool,
    /// Command error, cleared on next valid command.
    #[wire(bits = 1)]
    pub command_error: bool,
    /// Write error.
    #[wire(bits = 1)]
    pub write_error: bool,
    /// Operation in progress.
    #[wire(bits = 1)]
    pub busy: bool,
}

impl SiiControl {
    /// A read request.
    pub fn read() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// A write request.
    pub fn write() -> Self {
        Self {
            write_enable: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn has_error(&self) -> bool {
        self.checksum_error || self.device_info_error || self.command_error || self.write_error
    }
}

/// SII category types, ETG1000.6 Table 19.
#[derive(Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum CategoryType {
    Nop = 0,
    Strings = 10,
    DataTypes = 20,
    General = 30,
    Fmmu = 40,
    SyncManager = 41,
    TxPdo = 50,
    RxPdo = 51,
    DistributedClock = 60,
    End = 0xffff,
    #[wire(catch_all)]
    Unknown(u16) = 0xfffe,
}

/// Well known SII word addresses below the category area.
pub mod word_address {
    /// Configured station alias.
    pub const STATION_ALIAS: u16 = 0x0004;
    /// Low byte holds the config area checksum.
    pub const CHECKSUM: u16 = 0x0007;
    /// Identity block: vendor, product, revision, serial; 2 words each.
    pub const IDENTITY: u16 = 0x0008;
    /// Bootstrap then standard mailbox offsets/sizes, 8 words.
    pub const MAILBOX_CONFIG: u16 = 0x0014;
    /// Supported mailbox protocols bitmap.
    pub const MAILBOX_PROTOCOLS: u16 = 0x001c;
    /// First category header.
    pub const FIRST_CATEGORY: u16 = 0x0040;
}

/// Identity block read from the SII, word address `0x0008`.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[wire(bytes = 16)]
pub struct SlaveIdentity {
    /// Manufacturer vendor ID.
    #[wire(bytes = 4)]
    pub vendor_id: u32,
    /// Product code.
    #[wire(bytes = 4)]
    pub product_id: u32,
    /// Product revision.
    #[wire(bytes = 4)]
    pub revision: u32,
    /// Device serial number.
    #[wire(bytes = 4)]
    pub serial: u32,
}

impl core::fmt::Display for SlaveIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "vendor {:#010x}, product {:#010x}, rev {}, serial {}",
            self.vendor_id, self.product_id, self.revision, self.serial
        )
    }
}

bitflags::bitflags! {
    /// Mailbox protocols supported by a slave, SII word `0x001c`.
    ///
    /// Defined in ETG1000.6 Table 18.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct MailboxProtocols: u16 {
        /// ADS over EtherCAT.
        const AOE = 0x0001;
        /// Ethernet over EtherCAT.
        const EOE = 0x0002;
        /// CAN application protocol over EtherCAT.
        const COE = 0x0004;
        /// File access over EtherCAT.
        const FOE = 0x0008;
        /// Servo profile over EtherCAT.
        const SOE = 0x0010;
        /// Vendor specific.
        const VOE = 0x0020;
    }
}

/// Default mailbox configuration, SII words `0x0014..0x001d`.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DefaultMailbox {
    /// Bootstrap state receive (master to slave) mailbox offset and size.
    pub bootstrap_receive_offset: u16,
    pub bootstrap_receive_size: u16,
    /// Bootstrap state send (slave to master) mailbox offset and size.
    pub bootstrap_send_offset: u16,
    pub bootstrap_send_size: u16,
    /// Standard receive (master to slave) mailbox offset and size.
    pub receive_offset: u16,
    pub receive_size: u16,
    /// Standard send (slave to master) mailbox offset and size.
    pub send_offset: u16,
    pub send_size: u16,
    /// Mailbox protocols supported by the slave.
    pub supported_protocols: MailboxProtocols,
}

impl catline_wire::WireRead for DefaultMailbox {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, catline_wire::WireError> {
        let words = heapless::Vec::<u16, 9>::unpack_from_slice(buf.get(0..18).ok_or(
            catline_wire::WireError::ReadBufferTooShort {
                needed: 18,
                got: buf.len(),
            },
        )?)?;

        Ok(Self {
            bootstrap_receive_offset: words[0],
            bootstrap_receive_size: words[1],
            bootstrap_send_offset: words[2],
            bootstrap_send_size: words[3],
            receive_offset: words[4],
            receive_size: words[5],
            send_offset: words[6],
            send_size: words[7],
            supported_protocols: MailboxProtocols::from_bits_retain(words[8]),
        })
    }
}

impl DefaultMailbox {
    pub fn has_mailbox(&self) -> bool {
        !self.supported_protocols.is_empty() && self.receive_size > 0 && self.send_size > 0
    }
}

bitflags::bitflags! {
    /// CoE detail flags from the SII general category.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct CoeDetails: u8 {
        /// SDO supported.
        const ENABLE_SDO = 0x01;
        /// SDO info service supported.
        const ENABLE_SDO_INFO = 0x02;
        /// PDO assignment configurable.
        const ENABLE_PDO_ASSIGN = 0x04;
        /// PDO mapping configurable.
        const ENABLE_PDO_CONFIG = 0x08;
        /// Startup upload of PDO configuration.
        const ENABLE_STARTUP_UPLOAD = 0x10;
        /// SDO complete access supported.
        const ENABLE_COMPLETE_ACCESS = 0x20;
    }
}

/// The parts of the SII general category (type 30) the master cares about.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 10)]
pub struct SiiGeneral {
    /// Strings category index of the device group name.
    #[wire(bytes = 1)]
    pub group_string_idx: u8,
    /// Strings category index of the device image name.
    #[wire(bytes = 1)]
    pub image_string_idx: u8,
    /// Strings category index of the order number.
    #[wire(bytes = 1)]
    pub order_string_idx: u8,
    /// Strings category index of the device name.
    #[wire(bytes = 1, post_skip_bytes = 1)]
    pub name_string_idx: u8,
    #[wire(bytes = 1)]
    pub coe_details: u8,
    /// FoE supported when non-zero.
    #[wire(bytes = 1)]
    pub foe_enabled: u8,
    /// EoE supported when non-zero.
    #[wire(bytes = 1)]
    pub eoe_enabled: u8,
    /// Number of SoE drive channels.
    #[wire(bytes = 1, post_skip_bytes = 1)]
    pub soe_channels: u8,
}

impl SiiGeneral {
    pub fn coe_details(&self) -> CoeDetails {
        CoeDetails::from_bits_retain(self.coe_details)
    }
}

/// Sync manager usage from the SII sync manager category.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SyncManagerType {
    /// Not used.
    #[default]
    Unused = 0x00,
    /// Mailbox receive (master to slave).
    MailboxWrite = 0x01,
    /// Mailbox send (slave to master).
    MailboxRead = 0x02,
    /// Process data outputs (master to slave).
    ProcessDataWrite = 0x03,
    /// Process data inputs (slave to master).
    ProcessDataRead = 0x04,
    #[wire(catch_all)]
    Unknown(u8),
}

/// One entry of the SII sync manager category (type 41), 8 bytes.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 8)]
pub struct SyncManager {
    #[wire(bytes = 2)]
    pub start_addr: u16,
    #[wire(bytes = 2)]
    pub length: u16,
    #[wire(bytes = 1)]
    pub control: u8,
    #[wire(bytes = 1)]
    pub status: u8,
    /// Bit 0: enabled.
    #[wire(bytes = 1)]
    pub enable: u8,
    #[wire(bytes = 1)]
    pub usage_type: SyncManagerType,
}

impl SyncManager {
    pub fn is_enabled(&self) -> bool {
        self.enable & 0x01 != 0
    }

    /// Decode the raw SII control byte into the sync manager channel control
    /// register format.
    pub fn control(&self) -> Control {
        Control::unpack_from_slice(&[self.control]).unwrap_or(Control {
            operation_mode: OperationMode::Normal,
            direction: Direction::MasterRead,
            ..Control::default()
        })
    }
}

/// FMMU usage from the SII FMMU category (type 40), one byte per FMMU.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FmmuUsage {
    #[default]
    Unused = 0x00,
    Outputs = 0x01,
    Inputs = 0x02,
    SyncManagerStatus = 0x03,
    #[wire(alternatives = [0xff])]
    Future = 0x04,
    #[wire(catch_all)]
    Unknown(u8),
}

/// Header of one PDO in the SII TxPDO/RxPDO categories, 8 bytes, followed by
/// `num_entries` [`PdoEntry`]s.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 8)]
pub struct Pdo {
    #[wire(bytes = 2)]
    pub index: u16,
    #[wire(bytes = 1)]
    pub num_entries: u8,
    /// The sync manager this PDO is assigned to.
    #[wire(bytes = 1)]
    pub sync_manager: u8,
    #[wire(bytes = 1)]
    pub dc_sync: u8,
    #[wire(bytes = 1)]
    pub name_string_idx: u8,
    #[wire(bytes = 2)]
    pub flags: u16,
}

/// One PDO entry in the SII TxPDO/RxPDO categories, 8 bytes.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 8)]
pub struct PdoEntry {
    #[wire(bytes = 2)]
    pub index: u16,
    #[wire(bytes = 1)]
    pub sub_index: u8,
    #[wire(bytes = 1)]
    pub name_string_idx: u8,
    #[wire(bytes = 1)]
    pub data_type: u8,
    #[wire(bytes = 1)]
    pub bit_len: u8,
    #[wire(bytes = 2)]
    pub flags: u16,
}

/// A PDO together with the summed bit length of its entries, collected
/// during the category walk.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PdoWithBitLen {
    pub index: u16,
    pub sync_manager: u8,
    pub bit_len: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireRead;

    #[test]
    fn sii_control_busy() {
        let parsed = SiiControl::unpack_from_slice(&[0x00, 0x81]).unwrap();

        assert!(parsed.busy);
        assert!(parsed.read);
        assert!(!parsed.has_error());
    }

    #[test]
    fn default_mailbox() {
        let mut raw = [0u8; 18];

        // Standard receive mailbox at 0x1000, 128 bytes
        raw[8..10].copy_from_slice(&0x1000u16.to_le_bytes());
        raw[10..12].copy_from_slice(&128u16.to_le_bytes());
        // Standard send mailbox at 0x1080, 128 bytes
        raw[12..14].copy_from_slice(&0x1080u16.to_le_bytes());
        raw[14..16].copy_from_slice(&128u16.to_le_bytes());
        // CoE + FoE
        raw[16..18].copy_from_slice(&0x000cu16.to_le_bytes());

        let parsed = DefaultMailbox::unpack_from_slice(&raw).unwrap();

        assert!(parsed.has_mailbox());
        assert_eq!(parsed.receive_offset, 0x1000);
        assert_eq!(parsed.send_offset, 0x1080);
        assert!(parsed.supported_protocols.contains(MailboxProtocols::COE));
        assert!(parsed.supported_protocols.contains(MailboxProtocols::FOE));
        assert!(!parsed.supported_protocols.contains(MailboxProtocols::SOE));
    }

    #[test]
    fn sync_manager_category_entry() {
        let raw = [0x00, 0x10, 0x80, 0x00, 0x26, 0x00, 0x01, 0x01];

        let parsed = SyncManager::unpack_from_slice(&raw).unwrap();

        assert_eq!(parsed.start_addr, 0x1000);
        assert_eq!(parsed.length, 0x0080);
        assert_eq!(parsed.control, 0x26);
        assert!(parsed.is_enabled());
        assert_eq!(parsed.usage_type, SyncManagerType::MailboxWrite);
    }
}
