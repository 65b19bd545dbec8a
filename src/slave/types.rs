//! Supporting types for the slave descriptor.

use core::time::Duration;

use crate::{
    eeprom::types::{MailboxProtocols, SyncManagerType},
    mailbox::soe::SoeElements,
    pdi::PdiSegment,
};

/// A configured mailbox sync manager region on a slave.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mailbox {
    /// Physical start address in slave RAM.
    pub address: u16,
    /// Mailbox length in bytes, including the 6 byte mailbox header.
    pub len: u16,
    /// The sync manager channel backing this mailbox.
    pub sync_manager: u8,
}

/// Mailbox configuration for one slave, derived from the SII and `0x1C00`.
#[derive(Debug, Default, Clone)]
pub struct MailboxConfig {
    /// Slave to master mailbox (SM1).
    pub read: Option<Mailbox>,
    /// Master to slave mailbox (SM0).
    pub write: Option<Mailbox>,
    /// Protocols the slave claims to support.
    pub supported_protocols: MailboxProtocols,
    /// Sync manager types read from CoE object `0x1C00`, used for PDO
    /// mapping generation.
    pub coe_sync_manager_types: heapless::Vec<SyncManagerType, 16>,
    /// Whether CoE can be used with this slave.
    pub has_coe: bool,
    /// Whether SDO complete access is supported.
    pub complete_access: bool,
}

/// Input and output segments of a slave within its group's process data
/// image.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoRanges {
    /// Slave to master data.
    pub input: PdiSegment,
    /// Master to slave data.
    pub output: PdiSegment,
}

impl IoRanges {
    /// The number of bytes this slave occupies in an overlapping logical
    /// read/write window.
    pub fn overlapping_len(&self) -> usize {
        self.input.len().max(self.output.len())
    }
}

/// Per-slave configuration assembled during state transitions.
#[derive(Debug, Default, Clone)]
pub struct SlaveConfig {
    pub io: IoRanges,
    pub mailbox: MailboxConfig,
    /// Process data sync manager registers as programmed during mapping
    /// generation, kept for supervised recovery.
    pub(crate) pd_sms: heapless::Vec<(u8, crate::sync_manager_channel::SyncManagerChannel), 8>,
    /// FMMU registers as programmed during mapping generation.
    pub(crate) fmmus: heapless::Vec<(u8, crate::fmmu::Fmmu), 8>,
}

/// Which EEPROM mailbox layout to program into the mailbox sync managers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum MailboxSet {
    /// The standard offsets, used for PRE-OP and above.
    Standard,
    /// The bootstrap offsets, used for the BOOT state (e.g. FoE firmware
    /// download).
    Bootstrap,
}

/// The state machine edge an [`InitCommand`] is replayed on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    /// INIT -> PRE-OP.
    InitToPreOp,
    /// PRE-OP -> SAFE-OP, the canonical place for PDO assignment writes.
    PreOpToSafeOp,
    /// SAFE-OP -> OP.
    SafeOpToOp,
}

/// Maximum payload bytes of one init command.
pub const INIT_COMMAND_DATA_MAX: usize = 32;

/// A mailbox write replayed on a specific state transition, every time that
/// transition runs — including supervised recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommand {
    /// When to replay this command.
    pub transition: Transition,
    /// What to write.
    pub kind: InitCommandKind,
}

/// The protocol-specific part of an [`InitCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitCommandKind {
    /// A CoE SDO download.
    Coe {
        /// Object index.
        index: u16,
        /// Object subindex.
        sub_index: u8,
        /// Use complete access.
        complete: bool,
        /// Raw little endian payload.
        data: heapless::Vec<u8, INIT_COMMAND_DATA_MAX>,
    },
    /// A SoE IDN write.
    Soe {
        /// Drive number (ATN).
        drive: u8,
        /// Parameter IDN.
        idn: u16,
        /// Which elements the payload carries.
        elements: SoeElements,
        /// Raw little endian payload.
        data: heapless::Vec<u8, INIT_COMMAND_DATA_MAX>,
    },
}

/// Distributed clock SYNC pulse configuration for one slave.
///
/// Applied by
/// [`SlaveGroup::configure_dc_sync`](crate::SlaveGroup::configure_dc_sync).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DcSync {
    /// DC sync unit disabled; the slave free-runs.
    #[default]
    Disabled,
    /// Generate SYNC0 pulses.
    Sync0,
    /// Generate SYNC0 and SYNC1 pulses.
    Sync01 {
        /// SYNC1 cycle time.
        sync1_period: Duration,
    },
}

impl core::fmt::Display for DcSync {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DcSync::Disabled => f.write_str("disabled"),
            DcSync::Sync0 => f.write_str("SYNC0"),
            DcSync::Sync01 { sync1_period } => {
                write!(f, "SYNC0/SYNC1 ({} ns)", sync1_period.as_nanos())
            }
        }
    }
}
