//! An EtherCAT master runtime supporting `std` and `no_std` environments.
//!
//! # Crate architecture
//!
//! A [`DatagramStorage`] is declared up front (usually `static`) and split
//! into TX/RX handles for the network I/O task plus the engine core a
//! [`Master`] is built around. [`Master::init`] scans the network, builds
//! [`Slave`] descriptors, configures distributed clocks and assigns slaves
//! to [`SlaveGroup`]s, which then drive the cyclic process data exchange
//! and expose per-slave mailbox protocols (CoE, SoE, FoE, EoE).
//!
//! The network interface itself is not part of this crate: the I/O task
//! pumps [`DatagramTx::next_sendable_frame`] onto a raw socket (or similar)
//! and feeds received Ethernet frames into [`DatagramRx::receive_frame`].
//!
//! ```rust,no_run
//! use catline::{
//!     DatagramStorage, Master, MasterConfig, Timeouts, std::ethercat_now,
//! };
//!
//! const MAX_SLAVES: usize = 16;
//! const MAX_PDI: usize = 64;
//! const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(1100);
//!
//! static STORAGE: DatagramStorage<16, FRAME_SIZE> = DatagramStorage::new();
//!
//! let (tx, rx, dgram_loop) = STORAGE.try_split().expect("can only split once");
//!
//! let master = Master::new(dgram_loop, Timeouts::default(), MasterConfig::default());
//!
//! // `tx` and `rx` are handed to the network I/O task here.
//!
//! # async {
//! let group = master
//!     .init_single_group::<MAX_SLAVES, MAX_PDI>(ethercat_now)
//!     .await
//!     .expect("init");
//!
//! let group = group.into_op(&master).await.expect("OP");
//!
//! loop {
//!     group.tx_rx(&master).await.expect("TX/RX");
//!
//!     // Read inputs, write outputs via `group.slave(&master, n)`
//! }
//! # };
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

// This mod MUST go first so the others see its macros.
pub(crate) mod fmt;

mod al_control;
mod al_status_code;
mod command;
pub mod datagram;
mod dc;
mod dl_status;
pub mod eeprom;
pub mod error;
mod ethernet;
mod fmmu;
pub mod mailbox;
mod master;
mod master_config;
mod pdi;
mod register;
pub mod slave;
pub mod slave_group;
mod slave_state;
pub mod supervisor;
mod sync_manager_channel;
mod timer_factory;

#[cfg(feature = "std")]
pub mod std;

pub use al_control::AlControl;
pub use al_status_code::AlStatusCode;
pub use command::{Command, Reads, WrappedRead, WrappedWrite, Writes};
pub use datagram::{
    DatagramLoop, DatagramRx, DatagramStorage, DatagramTx, ReceiveAction, SendableFrame,
};
pub use dc::{ClockMode, DcControl};
pub use dl_status::DlStatus;
pub use ethernet::{EthernetAddress, EthernetFrame};
pub use fmmu::Fmmu;
pub use mailbox::{
    MailboxProtocol,
    coe::{CoeEmergency, EntryDescription, ObjectDescription, SubIndex},
    eoe::EoeIpParameters,
    soe::SoeElements,
};
pub use master::Master;
pub use master_config::{MasterConfig, RetryBehaviour};
pub use pdi::{PdiOffset, PdiSegment};
pub use register::{RegisterAddress, SupportFlags};
pub use slave::{Slave, SlaveRef, types::DcSync, types::Transition};
pub use slave_group::{DcSyncConfig, GroupId, SlaveGroup, SlaveGroupHandle, TxRxResponse};
pub use slave_state::SlaveState;
pub use supervisor::Check;
pub use sync_manager_channel::SyncManagerChannel;
pub use timer_factory::Timeouts;

/// 11 bit length mask used by frame and datagram headers.
const LEN_MASK: u16 = 0b0000_0111_1111_1111;

/// EtherType of EtherCAT frames.
const ETHERCAT_ETHERTYPE: u16 = 0x88a4;

/// The master's source MAC address.
///
/// A fixed locally administered address; EtherCAT slaves never interpret
/// it, and the first slave flips the U/L bit on the way back so responses
/// are distinguishable from looped back transmissions.
const MASTER_ADDR: EthernetAddress = EthernetAddress([0x10, 0x10, 0x10, 0x10, 0x10, 0x10]);

/// Configured station addresses are assigned upwards from this value during
/// network scan, i.e. the first slave gets address 1000.
const BASE_SLAVE_ADDRESS: u16 = 1000;

#[cfg(not(target_endian = "little"))]
compile_error!(
    "only little endian targets are supported: EtherCAT is little endian on the wire and payloads are reinterpreted in place"
);
