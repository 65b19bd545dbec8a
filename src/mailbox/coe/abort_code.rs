//! SDO abort codes.

/// SDO abort codes, ETG1000.6 Table 41.
#[derive(Clone, Copy, Debug, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum CoeAbortCode {
    /// Toggle bit not changed.
    ToggleMismatch = 0x0503_0000,
    /// SDO protocol timeout.
    SdoTimeout = 0x0504_0000,
    /// Client/Server command specifier not valid or unknown.
    InvalidCommand = 0x0504_0001,
    /// Out of memory.
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object.
    UnsupportedAccess = 0x0601_0000,
    /// Attempt to read to a write only object.
    WriteOnlyRead = 0x0601_0001,
    /// Attempt to write to a read only object.
    ReadOnlyWrite = 0x0601_0002,
    /// Subindex cannot be written, SI0 must be 0 for write access.
    SubIndexCannotBeWritten = 0x0601_0003,
    /// SDO complete access not supported for variable length objects.
    NoComplexAccess = 0x0601_0004,
    /// Object length exceeds mailbox size.
    ObjectTooLong = 0x0601_0005,
    /// Object mapped to RxPDO, SDO download blocked.
    BlockedByPdo = 0x0601_0006,
    /// The object does not exist in the object directory.
    NotFound = 0x0602_0000,
    /// The object cannot be mapped into the PDO.
    CannotMap = 0x0604_0041,
    /// The number and length of the objects to be mapped would exceed the
    /// PDO length.
    PdoTooLong = 0x0604_0042,
    /// General parameter incompatibility reason.
    ParameterIncompatible = 0x0604_0043,
    /// General internal incompatibility in the device.
    Incompatible = 0x0604_0047,
    /// Access failed due to a hardware error.
    Hardware = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match.
    DataLengthMismatch = 0x0607_0010,
    /// Data type does not match, length of service parameter too high.
    DataTooLong = 0x0607_0012,
    /// Data type does not match, length of service parameter too low.
    DataTooShort = 0x0607_0013,
    /// Subindex does not exist.
    SubIndexNotFound = 0x0609_0011,
    /// Value range of parameter exceeded (only for write access).
    ValueOutOfRange = 0x0609_0030,
    /// Value of parameter written too high.
    ValueTooLarge = 0x0609_0031,
    /// Value of parameter written too low.
    ValueTooSmall = 0x0609_0032,
    /// Maximum value is less than minimum value.
    MaxLessThanMin = 0x0609_0036,
    /// Data cannot be transferred or stored to the application.
    CannotTransfer = 0x0800_0020,
    /// Data cannot be transferred or stored to the application because of
    /// local control.
    LocalControl = 0x0800_0021,
    /// Data cannot be transferred or stored to the application because of
    /// the present device state.
    InvalidState = 0x0800_0022,
    /// Object dictionary dynamic generation fails or no object dictionary is
    /// present.
    NoObjectDictionary = 0x0800_0023,
    /// An unknown or unmapped abort code.
    #[wire(catch_all)]
    Unknown(u32),
}

impl core::fmt::Display for CoeAbortCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::ToggleMismatch => "Toggle bit not changed",
            Self::SdoTimeout => "SDO protocol timeout",
            Self::InvalidCommand => "Command specifier not valid or unknown",
            Self::OutOfMemory => "Out of memory",
            Self::UnsupportedAccess => "Unsupported access to an object",
            Self::WriteOnlyRead => "Attempt to read a write only object",
            Self::ReadOnlyWrite => "Attempt to write a read only object",
            Self::SubIndexCannotBeWritten => "Subindex cannot be written, SI0 must be 0",
            Self::NoComplexAccess => "Complete access not supported for this object",
            Self::ObjectTooLong => "Object length exceeds mailbox size",
            Self::BlockedByPdo => "Object mapped to RxPDO, SDO download blocked",
            Self::NotFound => "The object does not exist in the object directory",
            Self::CannotMap => "The object cannot be mapped into the PDO",
            Self::PdoTooLong => "The mapped objects would exceed the PDO length",
            Self::ParameterIncompatible => "General parameter incompatibility",
            Self::Incompatible => "General internal incompatibility in the device",
            Self::Hardware => "Access failed due to a hardware error",
            Self::DataLengthMismatch => "Data length does not match",
            Self::DataTooLong => "Data length too high",
            Self::DataTooShort => "Data length too low",
            Self::SubIndexNotFound => "Subindex does not exist",
            Self::ValueOutOfRange => "Value range of parameter exceeded",
            Self::ValueTooLarge => "Value of parameter written too high",
            Self::ValueTooSmall => "Value of parameter written too low",
            Self::MaxLessThanMin => "Maximum value is less than minimum value",
            Self::CannotTransfer => "Data cannot be transferred to the application",
            Self::LocalControl => "Data transfer blocked by local control",
            Self::InvalidState => "Data transfer blocked by present device state",
            Self::NoObjectDictionary => "No object dictionary is present",
            Self::Unknown(code) => return write!(f, "unknown abort code {:#010x}", code),
        };

        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::WireRead;

    #[test]
    fn decode() {
        assert_eq!(
            CoeAbortCode::unpack_from_slice(&[0x00, 0x00, 0x02, 0x06]),
            Ok(CoeAbortCode::NotFound)
        );
        assert_eq!(
            CoeAbortCode::unpack_from_slice(&[0xef, 0xbe, 0xad, 0xde]),
            Ok(CoeAbortCode::Unknown(0xdead_beef))
        );
    }
}
