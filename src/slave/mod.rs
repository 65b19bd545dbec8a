//! Slave device descriptors and typed access to them.

pub(crate) mod configuration;
pub(crate) mod pdi;
pub(crate) mod ports;
pub mod types;

use core::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU8, Ordering},
};

use crate::{
    Master,
    al_control::AlControl,
    al_status_code::AlStatusCode,
    command::{Command, WrappedRead, WrappedWrite},
    dl_status::DlStatus,
    eeprom::{
        Eeprom,
        types::{DefaultMailbox, SlaveIdentity},
    },
    error::{Error, Item},
    fmt,
    mailbox::{coe::CoeEmergency, eoe::EoeFragment},
    register::{RegisterAddress, SupportFlags},
    slave_state::SlaveState,
    timer_factory::IntoTimeout,
};
use catline_wire::WireRead;
use ports::Ports;
use types::{DcSync, InitCommand, InitCommandKind, SlaveConfig, Transition};

/// Maximum number of init commands that can be registered per slave.
const MAX_INIT_COMMANDS: usize = 16;

/// One slave device on the network.
///
/// Created during [`Master::init`], owned by a
/// [`SlaveGroup`](crate::SlaveGroup) afterwards.
#[derive(Debug)]
#[doc(alias = "SubDevice")]
pub struct Slave {
    /// Configured station address, assigned by the master during scan.
    pub(crate) configured_address: u16,

    /// Station alias from the SII configuration area.
    pub(crate) alias_address: u16,

    /// Position in the ring, 0 being closest to the master.
    pub(crate) index: u16,

    pub(crate) config: SlaveConfig,

    pub(crate) identity: SlaveIdentity,

    pub(crate) name: heapless::String<64>,

    pub(crate) flags: SupportFlags,

    pub(crate) ports: Ports,

    /// Default mailbox offsets/sizes from the SII, standard and bootstrap.
    pub(crate) default_mailbox: DefaultMailbox,

    /// The index of this slave's topological parent, `None` when attached
    /// directly to the master.
    pub(crate) parent_index: Option<usize>,

    /// Propagation delay from the master in nanoseconds.
    pub(crate) propagation_delay: u32,

    /// DC receive time of the processing unit, latched during DC
    /// configuration.
    pub(crate) dc_receive_time: u64,

    pub(crate) dc_sync: DcSync,

    /// The state this slave should be in, tracked for supervised recovery.
    pub(crate) expected_state: SlaveState,

    /// Mailbox request counter. Cycles 1..=7; 0 is reserved.
    mailbox_counter: AtomicU8,

    /// The counter of the last accepted mailbox response, for retransmit
    /// duplicate suppression. Zero means nothing seen yet.
    last_response_counter: AtomicU8,

    /// Mailbox writes replayed during state transitions.
    pub(crate) init_commands: heapless::Vec<InitCommand, MAX_INIT_COMMANDS>,

    /// IP parameters pushed to the slave on entry to PRE-OP when EoE is in
    /// use.
    pub(crate) eoe_ip: Option<crate::mailbox::eoe::EoeIpParameters>,

    /// Emergency messages received while other mailbox traffic was in
    /// flight. Bounded; oldest are dropped first.
    pub(crate) emergencies: spin::RwLock<heapless::Deque<CoeEmergency, 4>>,

    /// Tunnelled Ethernet fragments received while other mailbox traffic
    /// was in flight, awaiting reassembly. Bounded; oldest are dropped
    /// first.
    pub(crate) eoe_fragments: spin::RwLock<heapless::Deque<EoeFragment, 2>>,
}

impl Slave {
    /// Read a freshly addressed slave's registers and EEPROM into a
    /// descriptor.
    pub(crate) async fn new(
        master: &Master<'_>,
        index: u16,
        configured_address: u16,
    ) -> Result<Self, Error> {
        let slave_ref = SlaveRef::new(master, configured_address, ());

        let flags = slave_ref
            .read(RegisterAddress::SupportFlags)
            .receive::<SupportFlags>(master)
            .await?;

        let alias_address = slave_ref
            .read(RegisterAddress::ConfiguredStationAlias)
            .receive::<u16>(master)
            .await?;

        let ports = slave_ref
            .read(RegisterAddress::DlStatus)
            .receive::<DlStatus>(master)
            .await
            .map(|dl_status| Ports::from_dl_status(&dl_status))?;

        let eeprom = slave_ref.eeprom();

        let identity = eeprom.identity().await?;

        let name = match eeprom.device_name::<64>().await? {
            Some(name) => name,
            None => {
                let mut fallback = heapless::String::new();

                // Vendor and product uniquely identify an unnamed device
                core::fmt::write(
                    &mut fallback,
                    format_args!("{:#010x}:{:#010x}", identity.vendor_id, identity.product_id),
                )
                .map_err(|_| Error::Internal)?;

                fallback
            }
        };

        let default_mailbox = eeprom.mailbox_config().await?;

        fmt::debug!(
            "Slave {:#06x} name {} {}, {}, alias address {:#06x}",
            configured_address,
            name,
            identity,
            flags,
            alias_address
        );

        Ok(Self {
            configured_address,
            alias_address,
            index,
            config: SlaveConfig::default(),
            identity,
            name,
            flags,
            ports,
            default_mailbox,
            parent_index: None,
            propagation_delay: 0,
            dc_receive_time: 0,
            dc_sync: DcSync::Disabled,
            expected_state: SlaveState::Init,
            // 0 is reserved so the cycle starts at 1 and repeats 1..=7
            mailbox_counter: AtomicU8::new(1),
            last_response_counter: AtomicU8::new(0),
            init_commands: heapless::Vec::new(),
            eoe_ip: None,
            emergencies: spin::RwLock::new(heapless::Deque::new()),
            eoe_fragments: spin::RwLock::new(heapless::Deque::new()),
        })
    }

    /// Derive each slave's topological parent by walking backwards over the
    /// already scanned devices.
    ///
    /// Walking towards the master, a running counter is decremented for
    /// every chain end (1 link), incremented for every split (3 links) and
    /// incremented twice for every cross (4 links). The first device with
    /// more than one link seen while the counter is not negative is the
    /// parent; falling off the front means the device hangs off the master
    /// directly via slave 0.
    pub(crate) fn assign_parents(slaves: &mut [Slave]) -> Result<(), Error> {
        for slave_idx in 0..slaves.len() {
            let (parents, rest) = slaves.split_at_mut(slave_idx);

            let slave = rest.first_mut().ok_or(Error::Internal)?;

            slave.parent_index = None;

            let mut topology: i16 = 0;

            for (parent_idx, parent) in parents.iter().enumerate().rev() {
                match parent.ports.link_count() {
                    // Chain end, presumably hanging off a coupler further up
                    1 => topology -= 1,
                    // A split: a coupler with one downstream branch
                    3 => topology += 1,
                    // A cross: two downstream branches
                    4 => topology += 2,
                    _ => (),
                }

                if (topology >= 0 && parent.ports.link_count() > 1) || parent_idx == 0 {
                    slave.parent_index = Some(parent_idx);

                    break;
                }
            }

            fmt::debug!(
                "Slave {:#06x} parent: {:?}",
                slave.configured_address,
                slave.parent_index
            );
        }

        Ok(())
    }

    /// Get the slave's human readable name from its EEPROM.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Get identity (vendor/product/revision/serial) details.
    pub fn identity(&self) -> SlaveIdentity {
        self.identity
    }

    /// Get the configured station address.
    pub fn configured_address(&self) -> u16 {
        self.configured_address
    }

    /// Get the station alias.
    pub fn alias_address(&self) -> u16 {
        self.alias_address
    }

    /// The network propagation delay to this device in nanoseconds.
    ///
    /// Zero until distributed clocks have been configured during
    /// [`Master::init`].
    pub fn propagation_delay(&self) -> u32 {
        self.propagation_delay
    }

    /// The list index of this device's topological parent.
    ///
    /// `None` for a device attached directly to the master.
    pub fn parent_index(&self) -> Option<usize> {
        self.parent_index
    }

    /// Whether this device supports distributed clocks.
    pub fn dc_supported(&self) -> bool {
        self.flags.dc_supported
    }

    /// The DC SYNC pulse configuration requested for this device.
    pub fn dc_sync(&self) -> DcSync {
        self.dc_sync
    }

    pub(crate) fn io_segments(&self) -> &types::IoRanges {
        &self.config.io
    }

    /// Produce the next mailbox request counter value, from 1 to 7.
    pub(crate) fn mailbox_counter(&self) -> u8 {
        fmt::unwrap!(self.mailbox_counter.fetch_update(
            Ordering::Release,
            Ordering::Acquire,
            |n| {
                if n >= 7 { Some(1) } else { Some(n + 1) }
            }
        ))
    }

    /// Check a received mailbox counter against the previous one, recording
    /// it as seen.
    ///
    /// Returns `false` when the message is a retransmit duplicate and must
    /// be discarded.
    pub(crate) fn accept_response_counter(&self, counter: u8) -> bool {
        // Counter zero is reserved; some slaves send it for unsolicited
        // traffic which is never a duplicate.
        if counter == 0 {
            return true;
        }

        self.last_response_counter.swap(counter, Ordering::AcqRel) != counter
    }

    pub(crate) fn push_emergency(&self, emergency: CoeEmergency) {
        let mut queue = self.emergencies.write();

        if queue.is_full() {
            let _ = queue.pop_front();
        }

        // Capacity was just ensured
        let _ = queue.push_back(emergency);
    }

    /// Take the oldest queued CoE emergency message, if any.
    pub fn pop_emergency(&self) -> Option<CoeEmergency> {
        self.emergencies.write().pop_front()
    }

    /// Queue an EoE mailbox payload that arrived while some other mailbox
    /// transaction was in flight.
    pub(crate) fn push_eoe_fragment(&self, payload: &[u8]) {
        let Ok(fragment) = EoeFragment::from_slice(payload) else {
            fmt::error!("oversized EoE fragment dropped");

            return;
        };

        let mut queue = self.eoe_fragments.write();

        if queue.is_full() {
            fmt::warn!(
                "Slave {:#06x} EoE fragment pool full, dropping oldest",
                self.configured_address
            );

            let _ = queue.pop_front();
        }

        // Capacity was just ensured
        let _ = queue.push_back(fragment);
    }

    /// Take the oldest queued EoE mailbox payload, if any.
    pub(crate) fn pop_eoe_fragment(&self) -> Option<EoeFragment> {
        self.eoe_fragments.write().pop_front()
    }

    /// Register a CoE SDO download to be replayed on the given transition,
    /// e.g. a PDO assignment write on PRE-OP -> SAFE-OP.
    pub fn add_coe_init_command(
        &mut self,
        transition: Transition,
        index: u16,
        sub_index: u8,
        complete: bool,
        data: &[u8],
    ) -> Result<(), Error> {
        let data = heapless::Vec::from_slice(data).map_err(|_| Error::StringTooLong {
            max_length: types::INIT_COMMAND_DATA_MAX,
            string_length: data.len(),
        })?;

        self.init_commands
            .push(InitCommand {
                transition,
                kind: InitCommandKind::Coe {
                    index,
                    sub_index,
                    complete,
                    data,
                },
            })
            .map_err(|_| Error::Capacity(Item::InitCommand))
    }

    /// Register a SoE IDN write to be replayed on the given transition.
    pub fn add_soe_init_command(
        &mut self,
        transition: Transition,
        drive: u8,
        idn: u16,
        elements: crate::mailbox::soe::SoeElements,
        data: &[u8],
    ) -> Result<(), Error> {
        let data = heapless::Vec::from_slice(data).map_err(|_| Error::StringTooLong {
            max_length: types::INIT_COMMAND_DATA_MAX,
            string_length: data.len(),
        })?;

        self.init_commands
            .push(InitCommand {
                transition,
                kind: InitCommandKind::Soe {
                    drive,
                    idn,
                    elements,
                    data,
                },
            })
            .map_err(|_| Error::Capacity(Item::InitCommand))
    }
}

/// A wrapper around a [`Slave`] (or slave address) and a [`Master`],
/// providing network operations against that one device.
///
/// The `S` parameter carries varying amounts of slave state: `()` for plain
/// register access, `&mut Slave` during configuration, or
/// [`SlavePdi`](crate::slave::pdi::SlavePdi) for cyclic IO access through a
/// group.
#[derive(Debug)]
#[doc(alias = "SubDeviceRef")]
pub struct SlaveRef<'master, S> {
    pub(crate) master: &'master Master<'master>,
    pub(crate) configured_address: u16,
    pub(crate) state: S,
}

impl<'master, S> SlaveRef<'master, S> {
    pub(crate) fn new(master: &'master Master<'master>, configured_address: u16, state: S) -> Self {
        Self {
            master,
            configured_address,
            state,
        }
    }

    /// The configured station address of this device.
    pub fn configured_address(&self) -> u16 {
        self.configured_address
    }

    /// A configured-address read of one of this device's registers.
    pub(crate) fn read(&self, register: impl Into<u16>) -> WrappedRead {
        Command::fprd(self.configured_address, register.into())
    }

    /// A configured-address write to one of this device's registers.
    pub(crate) fn write(&self, register: impl Into<u16>) -> WrappedWrite {
        Command::fpwr(self.configured_address, register.into())
    }

    pub(crate) fn eeprom(&self) -> Eeprom<'master> {
        Eeprom::new(self.master, self.configured_address)
    }

    /// Read this device's AL state and status code.
    pub async fn status(&self) -> Result<(SlaveState, AlStatusCode), Error> {
        let status = self
            .read(RegisterAddress::AlStatus)
            .receive::<AlControl>(self.master)
            .await?;

        let code = self
            .read(RegisterAddress::AlStatusCode)
            .receive::<AlStatusCode>(self.master)
            .await
            .unwrap_or(AlStatusCode::NoError);

        Ok((status.state, code))
    }

    /// Read the current AL state.
    pub async fn state(&self) -> Result<SlaveState, Error> {
        self.read(RegisterAddress::AlStatus)
            .receive::<AlControl>(self.master)
            .await
            .map(|control| control.state)
    }

    /// Request a state without waiting for the device to reach it.
    pub(crate) async fn request_state_nowait(&self, state: SlaveState) -> Result<(), Error> {
        fmt::debug!(
            "Set state {} for slave address {:#04x}",
            state,
            self.configured_address
        );

        self.write(RegisterAddress::AlControl)
            .send(self.master, AlControl::new(state))
            .await
    }

    /// Request a state and poll AL status until the device reaches it.
    ///
    /// If the device raises its error flag instead, the status code is read
    /// and logged, the error is acknowledged with a reset request, and
    /// [`Error::StateTransition`] is returned.
    pub async fn request_state(&self, state: SlaveState) -> Result<(), Error> {
        self.request_state_nowait(state).await?;

        self.wait_for_state(state).await
    }

    /// Poll AL status until the device reaches the given state.
    pub async fn wait_for_state(&self, state: SlaveState) -> Result<(), Error> {
        async {
            loop {
                let status = self
                    .read(RegisterAddress::AlStatus)
                    .receive::<AlControl>(self.master)
                    .await?;

                if status.error {
                    let (_, code) = self.status().await?;

                    fmt::error!(
                        "Slave {:#06x} failed to transition to {}: {}",
                        self.configured_address,
                        state,
                        code
                    );

                    // Acknowledge so the device can try again later
                    self.write(RegisterAddress::AlControl)
                        .send(self.master, AlControl::acknowledging(state))
                        .await?;

                    return Err(Error::StateTransition);
                }

                if status.state == state {
                    break Ok(());
                }

                self.master.timeouts.loop_tick().await;
            }
        }
        .timeout(self.master.timeouts.state_transition)
        .await
    }

    /// Read the 16 byte RX error counter block for diagnosis.
    pub async fn rx_error_counters(&self) -> Result<[u8; 16], Error> {
        let response = self
            .read(RegisterAddress::RxErrorCounters)
            .receive_slice(self.master, 16)
            .await?;

        <[u8; 16]>::unpack_from_slice(&response).map_err(Error::from)
    }
}

impl<'master, S> SlaveRef<'master, S>
where
    S: Deref<Target = Slave>,
{
    /// Get the slave's human readable name.
    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Get identity details.
    pub fn identity(&self) -> SlaveIdentity {
        self.state.identity()
    }

    /// Take the oldest queued CoE emergency message, if any.
    pub fn pop_emergency(&self) -> Option<CoeEmergency> {
        self.state.pop_emergency()
    }
}

impl<'master, S> SlaveRef<'master, S>
where
    S: DerefMut<Target = Slave>,
{
    /// Set the DC SYNC configuration applied by
    /// [`SlaveGroup::configure_dc_sync`](crate::SlaveGroup::configure_dc_sync).
    pub fn set_dc_sync(&mut self, dc_sync: DcSync) {
        self.state.dc_sync = dc_sync;
    }

    /// Set IP parameters to be pushed to this EoE capable slave whenever it
    /// enters PRE-OP, including supervised recovery.
    pub fn set_eoe_ip_parameters(&mut self, parameters: crate::mailbox::eoe::EoeIpParameters) {
        self.state.eoe_ip = Some(parameters);
    }

    /// Register a CoE SDO download to be replayed on the given transition.
    pub fn add_coe_init_command(
        &mut self,
        transition: Transition,
        index: u16,
        sub_index: u8,
        complete: bool,
        data: &[u8],
    ) -> Result<(), Error> {
        self.state
            .add_coe_init_command(transition, index, sub_index, complete, data)
    }

    /// Set a new station alias, persisting it to the device EEPROM.
    pub async fn set_alias_address(&mut self, new_alias: u16) -> Result<(), Error> {
        self.eeprom().write_alias(new_alias).await?;

        self.state.alias_address = new_alias;

        Ok(())
    }
}

impl<S> Deref for SlaveRef<'_, S>
where
    S: Deref<Target = Slave>,
{
    type Target = Slave;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave_with_links(index: u16, link_count: u8) -> Slave {
        let active = match link_count {
            1 => 0b0001,
            2 => 0b0011,
            3 => 0b0111,
            _ => 0b1111,
        };

        Slave {
            configured_address: 1000 + index,
            alias_address: 0,
            index,
            config: SlaveConfig::default(),
            identity: Default::default(),
            name: heapless::String::new(),
            flags: Default::default(),
            ports: Ports {
                active,
                receive_times: [0; 4],
            },
            default_mailbox: Default::default(),
            parent_index: None,
            propagation_delay: 0,
            dc_receive_time: 0,
            dc_sync: DcSync::Disabled,
            expected_state: SlaveState::Init,
            mailbox_counter: AtomicU8::new(1),
            last_response_counter: AtomicU8::new(0),
            init_commands: heapless::Vec::new(),
            eoe_ip: None,
            emergencies: spin::RwLock::new(heapless::Deque::new()),
            eoe_fragments: spin::RwLock::new(heapless::Deque::new()),
        }
    }

    #[test]
    fn mailbox_counter_cycles_1_to_7() {
        let slave = slave_with_links(0, 2);

        let mut seen = heapless::Vec::<u8, 16>::new();

        for _ in 0..15 {
            seen.push(slave.mailbox_counter()).unwrap();
        }

        assert_eq!(
            seen.as_slice(),
            &[1, 2, 3, 4, 5, 6, 7, 1, 2, 3, 4, 5, 6, 7, 1]
        );
    }

    #[test]
    fn duplicate_response_counter_dropped() {
        let slave = slave_with_links(0, 2);

        assert!(slave.accept_response_counter(3));
        // Same counter again: retransmit duplicate
        assert!(!slave.accept_response_counter(3));
        assert!(slave.accept_response_counter(4));
        assert!(slave.accept_response_counter(3));
    }

    #[test]
    fn line_topology_parents() {
        // Two slaves in a line: 0 connects to the master, 1 hangs off 0
        let mut slaves = [slave_with_links(0, 2), slave_with_links(1, 1)];

        Slave::assign_parents(&mut slaves).unwrap();

        assert_eq!(slaves[0].parent_index, None);
        assert_eq!(slaves[1].parent_index, Some(0));
    }

    #[test]
    fn coupler_branch_parents() {
        // 0: coupler with a branch (3 links), 1..2 on the branch, 3 after
        // the chain end behind the coupler again
        let mut slaves = [
            slave_with_links(0, 3),
            slave_with_links(1, 2),
            slave_with_links(2, 1),
            slave_with_links(3, 1),
        ];

        Slave::assign_parents(&mut slaves).unwrap();

        assert_eq!(slaves[0].parent_index, None);
        assert_eq!(slaves[1].parent_index, Some(0));
        assert_eq!(slaves[2].parent_index, Some(1));
        // The chain 1-2 ended, so 3 attaches back to the coupler
        assert_eq!(slaves[3].parent_index, Some(0));
    }

    #[test]
    fn eoe_fragment_pool_bounded() {
        let slave = slave_with_links(0, 2);

        slave.push_eoe_fragment(&[0x01, 0x01]);
        slave.push_eoe_fragment(&[0x02, 0x02]);
        // Pool holds two entries, so this drops the oldest
        slave.push_eoe_fragment(&[0x03, 0x03]);

        assert_eq!(
            slave.pop_eoe_fragment().as_deref(),
            Some(&[0x02u8, 0x02][..])
        );
        assert_eq!(
            slave.pop_eoe_fragment().as_deref(),
            Some(&[0x03u8, 0x03][..])
        );
        assert_eq!(slave.pop_eoe_fragment(), None);
    }

    #[test]
    fn emergency_queue_bounded() {
        let slave = slave_with_links(0, 2);

        for i in 0..6u16 {
            slave.push_emergency(CoeEmergency {
                error_code: i,
                error_register: 0,
                data: [0; 5],
            });
        }

        // Oldest two were dropped
        assert_eq!(slave.pop_emergency().map(|e| e.error_code), Some(2));
        assert_eq!(slave.pop_emergency().map(|e| e.error_code), Some(3));
        assert_eq!(slave.pop_emergency().map(|e| e.error_code), Some(4));
        assert_eq!(slave.pop_emergency().map(|e| e.error_code), Some(5));
        assert_eq!(slave.pop_emergency(), None);
    }
}
