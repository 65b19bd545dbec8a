//! Error types returned by catline APIs.

pub use crate::al_status_code::AlStatusCode;
pub use crate::mailbox::coe::abort_code::CoeAbortCode;
use crate::{command::Command, fmt, slave_state::SlaveState};
use core::num::TryFromIntError;

/// The top level catline error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A low level error occurred when producing or consuming a datagram.
    Pdu(PduError),
    /// A working counter (WKC) mismatch was encountered.
    WorkingCounter {
        /// The expected working counter value.
        expected: u16,
        /// The actual value received.
        received: u16,
    },
    /// Something timed out.
    Timeout,
    /// An EEPROM (SII) error was encountered.
    Eeprom(EepromError),
    /// A fixed size buffer was not large enough to hold a given item type.
    Capacity(Item),
    /// A string was too long to fit in a fixed size buffer.
    StringTooLong {
        /// The length of the fixed size buffer.
        max_length: usize,
        /// The length of the input string.
        string_length: usize,
    },
    /// A mailbox error was encountered.
    Mailbox(MailboxError),
    /// A File over EtherCAT transfer failed.
    Foe(FoeError),
    /// Failed to send a frame over the network interface.
    SendFrame,
    /// Failed to receive a frame properly.
    ReceiveFrame,
    /// A value could not be converted into a target integer type without loss.
    IntegerTypeConversion,
    /// The allotted storage for a group's process data image is too small for
    /// the length mapped from all slaves in the group.
    PdiTooLong {
        /// Maximum PDI length.
        max_length: usize,
        /// Actual PDI length.
        desired_length: usize,
    },
    /// An item in a list could not be found.
    NotFound {
        /// Item kind.
        item: Item,
        /// An index into a list of items.
        index: Option<usize>,
    },
    /// An internal error occurred. This indicates a bug in catline.
    Internal,
    /// There is a problem with the discovered EtherCAT slave topology.
    Topology,
    /// An error was read back from one or more slaves when attempting to
    /// transition to a new state.
    StateTransition,
    /// An unknown slave device was encountered during discovery.
    UnknownSlave,
    /// A slave is in an unexpected state.
    InvalidState {
        /// The desired state.
        expected: SlaveState,
        /// The actual state.
        actual: SlaveState,
        /// The slave's configured station address.
        configured_address: u16,
    },
    /// An error occurred encoding or decoding an item.
    Wire(catline_wire::WireError),
    /// A slave reported an AL status code.
    Slave(AlStatusCode),
    /// A distributed clocks error occurred.
    DistributedClock(DistributedClockError),
    /// A slave in a group is already borrowed.
    Borrow,
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Pdu(e) => write!(f, "datagram: {}", e),
            Error::WorkingCounter { expected, received } => {
                write!(f, "working counter expected {}, got {}", expected, received)
            }
            Error::Timeout => f.write_str("timeout"),
            Error::Eeprom(e) => write!(f, "eeprom: {}", e),
            Error::Capacity(item) => write!(f, "not enough capacity for {:?}", item),
            Error::StringTooLong {
                max_length,
                string_length,
            } => write!(
                f,
                "string of {} bytes too long for max storage of {} bytes",
                string_length, max_length
            ),
            Error::Mailbox(e) => write!(f, "mailbox: {}", e),
            Error::Foe(e) => write!(f, "FoE: {}", e),
            Error::SendFrame => f.write_str("failed to send EtherCAT frame"),
            Error::ReceiveFrame => f.write_str("failed to receive an EtherCAT frame"),
            Error::IntegerTypeConversion => f.write_str("failed to convert between integer types"),
            Error::PdiTooLong {
                max_length,
                desired_length,
            } => write!(
                f,
                "process data image is too long ({} bytes), max length is {}",
                desired_length, max_length
            ),
            Error::NotFound { item, index } => {
                write!(f, "item kind {:?} not found (index: {:?})", item, index)
            }
            Error::Internal => f.write_str("internal error"),
            Error::Topology => f.write_str("topology"),
            Error::StateTransition => f.write_str("a slave failed to transition to a new state"),
            Error::UnknownSlave => f.write_str("unknown slave"),
            Error::InvalidState {
                expected,
                actual,
                configured_address,
            } => write!(
                f,
                "slave {:#06x} state is invalid: {}, expected {}",
                configured_address, actual, expected
            ),
            Error::Wire(e) => write!(f, "wire encode/decode error: {}", e),
            Error::Slave(e) => write!(f, "slave error: {}", e),
            Error::DistributedClock(e) => write!(f, "distributed clocks: {}", e),
            Error::Borrow => f.write_str("slave is already borrowed"),
        }
    }
}

/// The kind of item being looked for or stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Item {
    /// An EtherCAT slave device.
    Slave,
    /// Process Data Object.
    Pdo,
    /// A PDO entry.
    PdoEntry,
    /// Fieldbus Memory Management Unit.
    Fmmu,
    /// Sync manager.
    SyncManager,
    /// A user-defined slave group.
    Group,
    /// A frame slot in the datagram storage.
    Frame,
    /// A per-slave init command.
    InitCommand,
    /// An EtherCAT datagram index.
    Index,
    /// A CoE emergency message.
    Emergency,
    /// A tunnelled Ethernet frame.
    EthernetFrame,
}

/// Low level datagram/frame errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PduError {
    /// Failed to decode raw datagram data into a given data type.
    Decode,
    /// Something went wrong when encoding/decoding the raw Ethernet II frame.
    Ethernet,
    /// Datagram data is too long to fit in the given buffer.
    TooLong,
    /// A frame index was given that does not point to a frame.
    InvalidIndex(u8),
    /// A received frame is invalid.
    Validation(PduValidationError),
    /// No frame slots are free.
    ///
    /// This may be caused by a too small `MAX_FRAMES` value in
    /// [`DatagramStorage`](crate::DatagramStorage), or sending frames faster
    /// than responses return.
    NoFrameSlots,
    /// All 256 datagram indices are in flight.
    OutOfIndices,
    /// A frame is not in a state expected by an internal transition.
    ///
    /// This is an internal error and should not appear in user code.
    InvalidFrameState,
}

impl core::fmt::Display for PduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PduError::Decode => f.write_str("failed to decode raw datagram data into type"),
            PduError::Ethernet => f.write_str("network"),
            PduError::TooLong => f.write_str("data is too long to fit in given buffer"),
            PduError::InvalidIndex(index) => write!(f, "invalid frame index {}", index),
            PduError::Validation(e) => write!(f, "received datagram validation failed: {}", e),
            PduError::NoFrameSlots => f.write_str("no frame slots free"),
            PduError::OutOfIndices => f.write_str("all datagram indices in flight"),
            PduError::InvalidFrameState => f.write_str("invalid frame state"),
        }
    }
}

/// A received datagram failed to validate against what was sent.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PduValidationError {
    /// The index of the received datagram does not match that of the sent one.
    IndexMismatch {
        /// Sent index.
        sent: u8,
        /// Received index.
        received: u8,
    },
    /// The received command does not match the one sent.
    CommandMismatch {
        /// Sent command.
        sent: Command,
        /// Received command.
        received: Command,
    },
}

impl core::fmt::Display for PduValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::IndexMismatch { sent, received } => {
                write!(f, "index mismatch: sent {}, received {}", sent, received)
            }
            Self::CommandMismatch { sent, received } => {
                write!(f, "command mismatch: sent {}, received {}", sent, received)
            }
        }
    }
}

/// Mailbox errors, shared by all mailbox protocols.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MailboxError {
    /// An SDO operation was aborted.
    Aborted {
        /// Abort code.
        code: CoeAbortCode,
        /// The object index used in the operation.
        address: u16,
        /// The subindex used in the operation.
        sub_index: u8,
    },
    /// A SoE operation returned its error flag.
    SoeAborted {
        /// SoE error code.
        error_code: u16,
        /// The IDN used in the operation.
        idn: u16,
    },
    /// Mailbox data is too long to fit in the given type or the slave's
    /// mailbox.
    TooLong {
        /// The address used in the operation.
        address: u16,
        /// The subindex used in the operation.
        sub_index: u8,
    },
    /// The slave has no mailbox but one is required for the given action.
    NoMailbox,
    /// The slave's mailbox does not support the required protocol.
    NotSupported(crate::mailbox::MailboxProtocol),
    /// The response to a mailbox action is invalid.
    SdoResponseInvalid {
        /// The address used in the operation.
        address: u16,
        /// The subindex used in the operation.
        sub_index: u8,
    },
    /// A read was attempted but the slave's send mailbox stayed empty.
    ReadEmpty,
    /// A write was attempted but the slave's receive mailbox stayed full.
    WriteFull,
    /// The response payload does not fit the caller's buffer.
    BufferTooSmall,
    /// A received mailbox counter repeated the previous one; the message was
    /// discarded as a retransmit duplicate.
    DuplicateCounter,
}

impl core::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MailboxError::Aborted {
                code,
                address,
                sub_index,
            } => write!(f, "{:#06x}:{} aborted: {}", address, sub_index, code),
            MailboxError::SoeAborted { error_code, idn } => {
                write!(f, "IDN {} aborted with SoE error {:#06x}", idn, error_code)
            }
            MailboxError::TooLong { address, sub_index } => {
                write!(f, "{:#06x}:{} data is too long", address, sub_index)
            }
            MailboxError::NoMailbox => f.write_str("device has no mailbox"),
            MailboxError::NotSupported(protocol) => {
                write!(f, "mailbox protocol {:?} not supported by device", protocol)
            }
            MailboxError::SdoResponseInvalid { address, sub_index } => {
                write!(f, "{:#06x}:{} invalid response from device", address, sub_index)
            }
            MailboxError::ReadEmpty => f.write_str("read mailbox is empty"),
            MailboxError::WriteFull => f.write_str("write mailbox is full"),
            MailboxError::BufferTooSmall => f.write_str("response too long for buffer"),
            MailboxError::DuplicateCounter => f.write_str("duplicate mailbox counter"),
        }
    }
}

/// File over EtherCAT errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FoeError {
    /// The slave aborted the transfer with an error request.
    ErrorRequest {
        /// FoE error code, e.g. `0x8001` not found.
        code: u32,
    },
    /// An acknowledgement was expected but something else arrived.
    NoAck,
    /// The slave acknowledged a different packet number than the one sent.
    WrongPacket,
    /// The slave is busy; the operation may be retried.
    Busy,
}

impl core::fmt::Display for FoeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FoeError::ErrorRequest { code } => write!(f, "error request, code {:#010x}", code),
            FoeError::NoAck => f.write_str("no acknowledgement"),
            FoeError::WrongPacket => f.write_str("wrong packet number acknowledged"),
            FoeError::Busy => f.write_str("device busy"),
        }
    }
}

/// Distributed clocks errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DistributedClockError {
    /// No DC reference slave was found on the network.
    NoReference,
}

impl core::fmt::Display for DistributedClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoReference => f.write_str("no DC reference slave found"),
        }
    }
}

/// EEPROM (SII) errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// Failed to decode data from the EEPROM.
    Decode,
    /// An EEPROM section is too large to fit in the given buffer.
    SectionOverrun,
    /// The given category does not exist in the slave's EEPROM.
    NoCategory,
    /// The section in the slave's EEPROM is too small to fill the given
    /// buffer.
    SectionUnderrun,
    /// The EEPROM interface reported an ownership or command error.
    Control,
    /// The EEPROM checksum over configuration words 0..7 is invalid.
    Checksum,
}

impl core::fmt::Display for EepromError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EepromError::Decode => f.write_str("failed to decode data"),
            EepromError::SectionOverrun => f.write_str("section too large to fit in buffer"),
            EepromError::NoCategory => f.write_str("category not found"),
            EepromError::SectionUnderrun => f.write_str("section too short to fill buffer"),
            EepromError::Control => f.write_str("EEPROM interface error"),
            EepromError::Checksum => f.write_str("configuration checksum invalid"),
        }
    }
}

/// Convenience trait to swallow the "category not found" EEPROM error for
/// optional categories.
pub(crate) trait IgnoreNoCategory<T> {
    fn ignore_no_category(self) -> Result<Option<T>, Error>;
}

impl<T> IgnoreNoCategory<T> for Result<T, Error> {
    fn ignore_no_category(self) -> Result<Option<T>, Error> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(Error::Eeprom(EepromError::NoCategory)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl From<PduError> for Error {
    fn from(e: PduError) -> Self {
        Self::Pdu(e)
    }
}

impl From<MailboxError> for Error {
    fn from(e: MailboxError) -> Self {
        Self::Mailbox(e)
    }
}

impl From<FoeError> for Error {
    fn from(e: FoeError) -> Self {
        Self::Foe(e)
    }
}

impl From<EepromError> for Error {
    fn from(e: EepromError) -> Self {
        Self::Eeprom(e)
    }
}

impl From<DistributedClockError> for Error {
    fn from(e: DistributedClockError) -> Self {
        Self::DistributedClock(e)
    }
}

impl From<PduValidationError> for PduError {
    fn from(e: PduValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<PduValidationError> for Error {
    fn from(e: PduValidationError) -> Self {
        Self::Pdu(PduError::Validation(e))
    }
}

impl From<TryFromIntError> for Error {
    fn from(_e: TryFromIntError) -> Self {
        fmt::error!("integer conversion error");

        Self::IntegerTypeConversion
    }
}

impl From<catline_wire::WireError> for Error {
    fn from(value: catline_wire::WireError) -> Self {
        Self::Wire(value)
    }
}
