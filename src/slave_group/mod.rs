//! Groups of slaves sharing one cyclic process data exchange.
//!
//! Slaves are divided into groups during [`Master::init`]; each group owns
//! a slice of the logical address space and is ticked independently,
//! potentially at different rates via its cycle divisor.

mod configurator;
mod group_id;
mod handle;

use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
    time::Duration,
};

use crate::{
    Master,
    command::Command,
    datagram::{CreatedFrame, DatagramHandle, FramePriority},
    dc::{ClockMode, DcCorrection},
    error::{Error, Item, PduError},
    fmt,
    pdi::PdiOffset,
    register::RegisterAddress,
    slave::{
        Slave, SlaveRef,
        configuration::PdoDirection,
        pdi::SlavePdi,
        types::{DcSync, MailboxSet, Transition},
    },
    slave_state::SlaveState,
    supervisor::{self, Check},
    timer_factory::IntoTimeout,
};
use catline_wire::WireRead;

pub use configurator::SlaveGroupRef;
pub use group_id::GroupId;
pub use handle::SlaveGroupHandle;

static NEXT_GROUP_ID: AtomicUsize = AtomicUsize::new(0);

/// Cyclic WKC mismatches tolerated before the supervisor is notified.
const WKC_FAULT_THRESHOLD: u32 = 1000;

/// DC sync activation register bits.
const CYCLIC_OP_ENABLE: u8 = 0b0000_0001;
const SYNC0_ACTIVATE: u8 = 0b0000_0010;
const SYNC1_ACTIVATE: u8 = 0b0000_0100;

/// A typestate for [`SlaveGroup`]: all slaves in `INIT`.
#[derive(Copy, Clone, Debug)]
pub struct Init;

/// A typestate for [`SlaveGroup`]: all slaves in `BOOT` with bootstrap
/// mailboxes, for e.g. FoE firmware updates.
#[derive(Copy, Clone, Debug)]
pub struct Boot;

/// A typestate for [`SlaveGroup`]: all slaves in `PRE-OP`; mailbox
/// configuration may be performed.
#[derive(Copy, Clone, Debug)]
pub struct PreOp;

/// A typestate for [`SlaveGroup`]: all slaves in `SAFE-OP`; inputs are
/// exchanged, outputs are ignored by the slaves.
#[derive(Copy, Clone, Debug)]
pub struct SafeOp;

/// A typestate for [`SlaveGroup`]: all slaves in `OP`, exchanging process
/// data in both directions.
#[derive(Copy, Clone, Debug)]
pub struct Op;

/// Marker trait for group states in which the process data image is mapped
/// and cyclic exchange may run.
#[doc(hidden)]
pub trait HasPdi {}

impl HasPdi for SafeOp {}
impl HasPdi for Op {}

/// How the group's process data travels on the wire.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum PdExchangeMode {
    /// One `LRW` over a shared window; inputs and outputs overlap.
    #[default]
    Overlapping,
    /// Separate `LWR` (outputs) and `LRD` (inputs) over disjoint windows,
    /// used when any slave in the group lacks LRW support.
    Split,
}

/// The group's wire layout and working counter expectations, computed
/// during mapping generation.
#[derive(Debug, Default, Clone)]
struct PdExchange {
    mode: PdExchangeMode,
    /// Total output bytes (Split) or shared window bytes (Overlapping).
    output_len: usize,
    /// Total input bytes.
    input_len: usize,
    expected_wkc_lrw: u16,
    expected_wkc_lrd: u16,
    expected_wkc_lwr: u16,
}

impl PdExchange {
    /// The number of bytes carried in the write direction on the wire.
    fn write_len(&self) -> usize {
        self.output_len
    }
}

#[derive(Default)]
struct GroupInner<const MAX_SLAVES: usize> {
    slaves: heapless::Vec<spin::RwLock<Slave>, MAX_SLAVES>,
    exchange: PdExchange,
}

/// Group distributed clock SYNC pulse configuration.
#[derive(Debug, Copy, Clone)]
pub struct DcSyncConfig {
    /// How long after "now" the first SYNC0 pulse fires. Defaults to
    /// 100 ms.
    pub start_delay: Duration,
    /// SYNC0 cycle time, usually equal to the process data cycle time.
    pub sync0_period: Duration,
    /// Shift of the SYNC0 pulse within the cycle.
    pub sync0_shift: Duration,
}

impl Default for DcSyncConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(100),
            sync0_period: Duration::from_millis(1),
            sync0_shift: Duration::ZERO,
        }
    }
}

/// The result of one cyclic exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TxRxResponse {
    /// Whether this tick actually exchanged data; `false` when skipped by
    /// the cycle divisor.
    pub exchanged: bool,
    /// The summed working counter of the exchange.
    pub working_counter: u16,
    /// DC system time echoed by the reference slave, when requested.
    pub dc_system_time: Option<u64>,
}

impl TxRxResponse {
    const SKIPPED: Self = Self {
        exchanged: false,
        working_counter: 0,
        dc_system_time: None,
    };
}

/// A group of one or more EtherCAT slaves.
///
/// Groups are created before [`Master::init`] and populated during it; they
/// are the only way to access slave process data.
#[doc(alias = "SubDeviceGroup")]
pub struct SlaveGroup<const MAX_SLAVES: usize, const MAX_PDI: usize, S = PreOp> {
    id: GroupId,
    /// Output (master to slave) process data image.
    pdi_out: UnsafeCell<[u8; MAX_PDI]>,
    /// Input (slave to master) process data image.
    pdi_in: UnsafeCell<[u8; MAX_PDI]>,
    pdi_start: UnsafeCell<PdiOffset>,
    inner: UnsafeCell<GroupInner<MAX_SLAVES>>,
    /// Cycle divisor: data is exchanged every Nth tick.
    cycle_divisor: AtomicU32,
    cycle_counter: AtomicU32,
    /// Consecutive cyclic WKC mismatches.
    wkc_failures: AtomicU32,
    dc_conf: UnsafeCell<Option<DcSyncConfig>>,
    _state: PhantomData<S>,
}

unsafe impl<const MAX_SLAVES: usize, const MAX_PDI: usize, S> Sync
    for SlaveGroup<MAX_SLAVES, MAX_PDI, S>
{
}
unsafe impl<const MAX_SLAVES: usize, const MAX_PDI: usize, S> Send
    for SlaveGroup<MAX_SLAVES, MAX_PDI, S>
{
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize, S> Default
    for SlaveGroup<MAX_SLAVES, MAX_PDI, S>
{
    fn default() -> Self {
        Self {
            id: GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed)),
            pdi_out: UnsafeCell::new([0u8; MAX_PDI]),
            pdi_in: UnsafeCell::new([0u8; MAX_PDI]),
            pdi_start: UnsafeCell::new(PdiOffset::default()),
            inner: UnsafeCell::new(GroupInner::default()),
            cycle_divisor: AtomicU32::new(1),
            cycle_counter: AtomicU32::new(0),
            wkc_failures: AtomicU32::new(0),
            dc_conf: UnsafeCell::new(None),
            _state: PhantomData,
        }
    }
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize, S> SlaveGroup<MAX_SLAVES, MAX_PDI, S> {
    fn inner(&self) -> &GroupInner<MAX_SLAVES> {
        unsafe { &*self.inner.get() }
    }

    fn pdi_start(&self) -> PdiOffset {
        unsafe { *self.pdi_start.get() }
    }

    /// The group's unique ID.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// The number of slaves in this group.
    pub fn len(&self) -> usize {
        self.inner().slaves.len()
    }

    /// Whether this group holds no slaves.
    pub fn is_empty(&self) -> bool {
        self.inner().slaves.is_empty()
    }

    /// Set the cycle divisor: process data is exchanged on every `divisor`th
    /// call to [`tx_rx`](SlaveGroup::tx_rx).
    pub fn set_cycle_divisor(&self, divisor: u32) {
        self.cycle_divisor.store(divisor.max(1), Ordering::Relaxed);
    }

    /// `true` when the cycle counter says this tick exchanges data.
    fn cycle_due(&self) -> bool {
        let divisor = self.cycle_divisor.load(Ordering::Relaxed).max(1);

        self.cycle_counter.fetch_add(1, Ordering::Relaxed) % divisor == 0
    }

    fn with_slave<R>(
        &self,
        index: usize,
        f: impl FnOnce(spin::RwLockWriteGuard<'_, Slave>) -> R,
    ) -> Result<R, Error> {
        let lock = self.inner().slaves.get(index).ok_or(Error::NotFound {
            item: Item::Slave,
            index: Some(index),
        })?;

        let guard = lock.try_write().ok_or(Error::Borrow)?;

        Ok(f(guard))
    }

    /// Request a new state for every slave and wait for all of them to
    /// reach it.
    async fn transition_to<TO>(
        self,
        master: &Master<'_>,
        desired_state: SlaveState,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, TO>, Error> {
        for slave in self.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            SlaveRef::new(master, configured_address, &mut *slave)
                .request_state_nowait(desired_state)
                .await?;

            slave.expected_state = desired_state;
        }

        fmt::debug!("Waiting for group state {}", desired_state);

        for slave in self.inner().slaves.iter() {
            let configured_address = slave.try_read().ok_or(Error::Borrow)?.configured_address();

            master
                .slave_ref(configured_address)
                .wait_for_state(desired_state)
                .await?;
        }

        fmt::debug!("--> Group reached state {}", desired_state);

        Ok(self.into_state())
    }

    fn into_state<TO>(self) -> SlaveGroup<MAX_SLAVES, MAX_PDI, TO> {
        SlaveGroup {
            id: self.id,
            pdi_out: self.pdi_out,
            pdi_in: self.pdi_in,
            pdi_start: self.pdi_start,
            inner: self.inner,
            cycle_divisor: self.cycle_divisor,
            cycle_counter: self.cycle_counter,
            wkc_failures: self.wkc_failures,
            dc_conf: self.dc_conf,
            _state: PhantomData,
        }
    }
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize>
    SlaveGroup<MAX_SLAVES, MAX_PDI, PreOp>
{
    /// Borrow an individual slave for configuration, e.g. SDO writes.
    ///
    /// # Errors
    ///
    /// Fails if the index is out of range or the slave is already borrowed.
    pub fn slave<'master, 'group>(
        &'group self,
        master: &'master Master<'master>,
        index: usize,
    ) -> Result<SlaveRef<'master, spin::RwLockWriteGuard<'group, Slave>>, Error> {
        let lock = self.inner().slaves.get(index).ok_or(Error::NotFound {
            item: Item::Slave,
            index: Some(index),
        })?;

        let guard = lock.try_write().ok_or(Error::Borrow)?;

        let configured_address = guard.configured_address();

        Ok(SlaveRef::new(master, configured_address, guard))
    }

    /// Configure the DC SYNC0/SYNC1 pulse generators of every slave that
    /// opted in via [`SlaveRef::set_dc_sync`].
    ///
    /// `now` must be the same time base handed to [`Master::init`].
    pub async fn configure_dc_sync(
        &self,
        master: &Master<'_>,
        dc_conf: DcSyncConfig,
        now: impl Fn() -> u64,
    ) -> Result<(), Error> {
        fmt::debug!("Configuring distributed clock sync for group {:?}", self.id);

        master.dc.set_cycle_interval(dc_conf.sync0_period);

        for index in 0..self.len() {
            let (configured_address, dc_sync, supported) = self.with_slave(index, |slave| {
                (slave.configured_address(), slave.dc_sync(), slave.dc_supported())
            })?;

            if matches!(dc_sync, DcSync::Disabled) {
                continue;
            }

            if !supported {
                fmt::warn!(
                    "Slave {:#06x} has no DC support but DC sync was requested",
                    configured_address
                );

                continue;
            }

            let slave_ref = master.slave_ref(configured_address);

            // Stop cyclic operation so the unit is ready for a new first
            // trigger, and assign the sync unit to EtherCAT
            slave_ref
                .write(RegisterAddress::DcSyncActive)
                .send(master, 0u8)
                .await?;

            slave_ref
                .write(RegisterAddress::DcCyclicUnitControl)
                .send(master, 0u8)
                .await?;

            // First trigger: a point in the near future on the network's
            // relative time axis
            let mut relative_now = now().wrapping_sub(master.dc.rtc_system_offset());

            if master.dc.mode() == ClockMode::ReferenceClock {
                relative_now = relative_now.wrapping_sub(master.dc.act_diff() as u64);
            }

            let start_time = relative_now
                .wrapping_add(dc_conf.start_delay.as_nanos() as u64)
                .wrapping_add(dc_conf.sync0_shift.as_nanos() as u64);

            slave_ref
                .write(RegisterAddress::DcSyncStartTime)
                .send(master, start_time)
                .await?;

            slave_ref
                .write(RegisterAddress::DcSync0CycleTime)
                .send(master, dc_conf.sync0_period.as_nanos() as u32)
                .await?;

            let activation = if let DcSync::Sync01 { sync1_period } = dc_sync {
                slave_ref
                    .write(RegisterAddress::DcSync1CycleTime)
                    .send(master, sync1_period.as_nanos() as u32)
                    .await?;

                CYCLIC_OP_ENABLE | SYNC0_ACTIVATE | SYNC1_ACTIVATE
            } else {
                CYCLIC_OP_ENABLE | SYNC0_ACTIVATE
            };

            slave_ref
                .write(RegisterAddress::DcSyncActive)
                .send(master, activation)
                .await?;

            fmt::debug!(
                "--> Slave {:#06x} SYNC start {}, cycle {} ns, activation {:#04x}",
                configured_address,
                start_time,
                dc_conf.sync0_period.as_nanos() as u32,
                activation
            );
        }

        // SAFETY: Written during single threaded configuration only.
        unsafe { *self.dc_conf.get() = Some(dc_conf) };

        Ok(())
    }

    /// Generate the process data mapping for all slaves, program their sync
    /// managers and FMMUs, then transition the group to SAFE-OP.
    pub async fn into_safe_op(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, SafeOp>, Error> {
        // Init commands tagged for this transition run before anything else
        // so e.g. PDO assignment writes land first
        for slave in self.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            SlaveRef::new(master, configured_address, &mut *slave)
                .replay_init_commands(Transition::PreOpToSafeOp)
                .await?;
        }

        self.generate_mapping(master).await?;

        let self_ = self.transition_to(master, SlaveState::SafeOp).await?;

        Ok(self_)
    }

    /// Derive the group's logical layout: one overlapping LRW window when
    /// every slave supports LRW, split LRD/LWR ranges otherwise.
    async fn generate_mapping(&self, master: &Master<'_>) -> Result<(), Error> {
        let base = self.pdi_start();

        let all_lrw = self
            .inner()
            .slaves
            .iter()
            .all(|slave| match slave.try_read() {
                Some(slave) => slave.flags.lrw_supported,
                None => false,
            });

        let mode = if all_lrw {
            PdExchangeMode::Overlapping
        } else {
            PdExchangeMode::Split
        };

        fmt::debug!(
            "Group {:?} mapping mode {:?}, logical base {:#010x}",
            self.id,
            mode,
            base.start_address
        );

        let exchange = match mode {
            PdExchangeMode::Overlapping => self.map_overlapping(master, base).await?,
            PdExchangeMode::Split => self.map_split(master, base).await?,
        };

        if exchange.input_len.max(exchange.write_len()) > MAX_PDI {
            return Err(Error::PdiTooLong {
                max_length: MAX_PDI,
                desired_length: exchange.input_len.max(exchange.write_len()),
            });
        }

        fmt::debug!(
            "Group {:?} PDI: {} output bytes, {} input bytes, expected WKC LRW {} / LWR {} / LRD {}",
            self.id,
            exchange.output_len,
            exchange.input_len,
            exchange.expected_wkc_lrw,
            exchange.expected_wkc_lwr,
            exchange.expected_wkc_lrd,
        );

        // SAFETY: Written during single threaded configuration only.
        unsafe { (*self.inner.get()).exchange = exchange };

        Ok(())
    }

    /// Overlapping layout: each slave reserves `max(input, output)` bytes
    /// of one shared window addressed by a single LRW.
    async fn map_overlapping(
        &self,
        master: &Master<'_>,
        base: PdiOffset,
    ) -> Result<PdExchange, Error> {
        let mut window = base;
        let mut expected_wkc = 0u16;

        for slave in self.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            let mut slave_ref = SlaveRef::new(master, configured_address, &mut *slave);

            // Inputs and outputs share the window: both passes start at the
            // same logical address
            let after_inputs = slave_ref
                .configure_fmmus(window, base.start_address, PdoDirection::MasterRead)
                .await?;

            let after_outputs = slave_ref
                .configure_fmmus(window, base.start_address, PdoDirection::MasterWrite)
                .await?;

            let input_len = slave_ref.state.config.io.input.len();
            let output_len = slave_ref.state.config.io.output.len();

            // LRW counts +1 for a successful read, +2 for a successful
            // write
            if input_len > 0 {
                expected_wkc += 1;
            }

            if output_len > 0 {
                expected_wkc += 2;
            }

            let advance = after_inputs
                .start_address
                .max(after_outputs.start_address)
                .saturating_sub(window.start_address);

            window = window.increment(advance as u16);
        }

        let window_len = (window.start_address - base.start_address) as usize;

        Ok(PdExchange {
            mode: PdExchangeMode::Overlapping,
            output_len: window_len,
            input_len: window_len,
            expected_wkc_lrw: expected_wkc,
            expected_wkc_lrd: 0,
            expected_wkc_lwr: 0,
        })
    }

    /// Split layout: all outputs packed first, all inputs after, exchanged
    /// with an LWR/LRD pair.
    async fn map_split(&self, master: &Master<'_>, base: PdiOffset) -> Result<PdExchange, Error> {
        let mut offset = base;
        let mut expected_wkc_lwr = 0u16;
        let mut expected_wkc_lrd = 0u16;

        // Outputs first so the write image is contiguous from the group
        // base
        for slave in self.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            let mut slave_ref = SlaveRef::new(master, configured_address, &mut *slave);

            offset = slave_ref
                .configure_fmmus(offset, base.start_address, PdoDirection::MasterWrite)
                .await?;

            if slave_ref.state.config.io.output.len() > 0 {
                expected_wkc_lwr += 1;
            }
        }

        let output_len = (offset.start_address - base.start_address) as usize;

        // Inputs second; their image ranges are rebased to start at zero by
        // passing the input region start as the group base
        let input_base = offset;

        for slave in self.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            let mut slave_ref = SlaveRef::new(master, configured_address, &mut *slave);

            offset = slave_ref
                .configure_fmmus(offset, input_base.start_address, PdoDirection::MasterRead)
                .await?;

            if slave_ref.state.config.io.input.len() > 0 {
                expected_wkc_lrd += 1;
            }
        }

        let input_len = (offset.start_address - input_base.start_address) as usize;

        Ok(PdExchange {
            mode: PdExchangeMode::Split,
            output_len,
            input_len,
            expected_wkc_lrw: 0,
            expected_wkc_lrd,
            expected_wkc_lwr,
        })
    }

    /// Transition the group into the BOOT state with bootstrap mailboxes,
    /// e.g. for FoE firmware updates.
    pub async fn into_boot(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, Boot>, Error> {
        // BOOT is only reachable from INIT
        let self_ = self.transition_to::<Init>(master, SlaveState::Init).await?;

        for slave in self_.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            let mut slave_ref = SlaveRef::new(master, configured_address, &mut *slave);

            slave_ref.configure_mailbox_sms(MailboxSet::Bootstrap).await?;
        }

        self_.transition_to(master, SlaveState::Bootstrap).await
    }

    /// Transition all slaves in the group back to INIT.
    pub async fn into_init(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, Init>, Error> {
        self.transition_to(master, SlaveState::Init).await
    }

    /// Transition the group through SAFE-OP into OP.
    pub async fn into_op(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, Op>, Error> {
        let self_ = self.into_safe_op(master).await?;

        self_.into_op(master).await
    }
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize> SlaveGroup<MAX_SLAVES, MAX_PDI, Boot> {
    /// Borrow an individual slave, e.g. for FoE transfers.
    pub fn slave<'master, 'group>(
        &'group self,
        master: &'master Master<'master>,
        index: usize,
    ) -> Result<SlaveRef<'master, spin::RwLockWriteGuard<'group, Slave>>, Error> {
        let lock = self.inner().slaves.get(index).ok_or(Error::NotFound {
            item: Item::Slave,
            index: Some(index),
        })?;

        let guard = lock.try_write().ok_or(Error::Borrow)?;

        let configured_address = guard.configured_address();

        Ok(SlaveRef::new(master, configured_address, guard))
    }

    /// Leave BOOT: back to INIT with the standard mailbox layout.
    pub async fn into_init(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, Init>, Error> {
        let self_ = self.transition_to::<Init>(master, SlaveState::Init).await?;

        for slave in self_.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            SlaveRef::new(master, configured_address, &mut *slave)
                .configure_mailbox_sms(MailboxSet::Standard)
                .await?;
        }

        Ok(self_)
    }
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize> SlaveGroup<MAX_SLAVES, MAX_PDI, SafeOp> {
    /// Transition the group from SAFE-OP to OP.
    pub async fn into_op(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, Op>, Error> {
        for slave in self.inner().slaves.iter() {
            let mut slave = slave.try_write().ok_or(Error::Borrow)?;

            let configured_address = slave.configured_address();

            SlaveRef::new(master, configured_address, &mut *slave)
                .replay_init_commands(Transition::SafeOpToOp)
                .await?;
        }

        self.transition_to(master, SlaveState::Op).await
    }

    /// Transition the group back from SAFE-OP to PRE-OP.
    pub async fn into_pre_op(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, PreOp>, Error> {
        self.teardown_dc_sync(master).await?;

        self.transition_to(master, SlaveState::PreOp).await
    }
}

impl<const MAX_SLAVES: usize, const MAX_PDI: usize> SlaveGroup<MAX_SLAVES, MAX_PDI, Op> {
    /// Transition the group from OP back to SAFE-OP.
    pub async fn into_safe_op(
        self,
        master: &Master<'_>,
    ) -> Result<SlaveGroup<MAX_SLAVES, MAX_PDI, SafeOp>, Error> {
        self.transition_to(master, SlaveState::SafeOp).await
    }

    /// Check whether all slaves in the group are in OP state.
    pub async fn all_op(&self, master: &Master<'_>) -> Result<bool, Error> {
        for slave in self.inner().slaves.iter() {
            let configured_address = slave.try_read().ok_or(Error::Borrow)?.configured_address();

            let state = master.slave_ref(configured_address).state().await?;

            if state != SlaveState::Op {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Verify every slave is in its expected state, driving recovery
    /// transitions for any that are not.
    ///
    /// The supervisor task calls this on receipt of a
    /// [`Check::Group`](crate::supervisor::Check) message.
    pub async fn check_group(&self, master: &Master<'_>) -> Result<(), Error> {
        for index in 0..self.len() {
            let lock = self.inner().slaves.get(index).ok_or(Error::NotFound {
                item: Item::Slave,
                index: Some(index),
            })?;

            let mut guard = lock.try_write().ok_or(Error::Borrow)?;

            let configured_address = guard.configured_address();

            let mut slave_ref = SlaveRef::new(master, configured_address, &mut *guard);

            if let Err(e) = supervisor::check_slave(&mut slave_ref).await {
                fmt::error!(
                    "Slave {:#06x} recovery failed: {:?}",
                    configured_address,
                    e
                );
            }
        }

        Ok(())
    }
}

// Methods for any state where the process data image is mapped.
impl<const MAX_SLAVES: usize, const MAX_PDI: usize, S> SlaveGroup<MAX_SLAVES, MAX_PDI, S>
where
    S: HasPdi,
{
    #[allow(clippy::mut_from_ref)]
    fn pdi_out_slice(&self, len: usize) -> &mut [u8] {
        unsafe { &mut (&mut *self.pdi_out.get())[0..len] }
    }

    #[allow(clippy::mut_from_ref)]
    fn pdi_in_slice(&self, len: usize) -> &mut [u8] {
        unsafe { &mut (&mut *self.pdi_in.get())[0..len] }
    }

    /// Borrow an individual slave along with its process data.
    pub fn slave<'master, 'group>(
        &'group self,
        master: &'master Master<'master>,
        index: usize,
    ) -> Result<SlaveRef<'master, SlavePdi<'group>>, Error> {
        let lock = self.inner().slaves.get(index).ok_or(Error::NotFound {
            item: Item::Slave,
            index: Some(index),
        })?;

        let guard = lock.try_write().ok_or(Error::Borrow)?;

        let configured_address = guard.configured_address();

        let io = guard.io_segments().clone();

        let exchange = &self.inner().exchange;

        // SAFETY: IO ranges of different slaves are disjoint, and the write
        // guard above makes this slave's ranges exclusively ours.
        let inputs = &self.pdi_in_slice(exchange.input_len)[io.input.bytes.clone()];

        let outputs = &mut self.pdi_out_slice(exchange.write_len())[io.output.bytes.clone()];

        Ok(SlaveRef::new(
            master,
            configured_address,
            SlavePdi::new(guard, inputs, outputs),
        ))
    }

    /// Drive the group's cyclic process data exchange.
    ///
    /// Sends one `LRW` (or an adjacent `LWR`/`LRD` pair for groups with
    /// non-LRW slaves), copies returned inputs into the input image, and
    /// tracks working counter faults. Honours the cycle divisor.
    pub async fn tx_rx(&self, master: &Master<'_>) -> Result<TxRxResponse, Error> {
        if !self.cycle_due() {
            return Ok(TxRxResponse::SKIPPED);
        }

        self.exchange(master, None).await
    }

    /// Drive the cyclic exchange and distributed clock sync in one frame.
    ///
    /// `cycle_timestamp_ns` is the master's timestamp for this cycle (e.g.
    /// from the same `now` source used at init) and feeds the clock
    /// discipline controller.
    pub async fn tx_rx_dc(
        &self,
        master: &Master<'_>,
        cycle_timestamp_ns: u64,
    ) -> Result<TxRxResponse, Error> {
        if !self.cycle_due() {
            return Ok(TxRxResponse::SKIPPED);
        }

        let response = self.exchange(master, Some(cycle_timestamp_ns)).await?;

        if let Some(dc_time) = response.dc_system_time {
            let correction = master.dc.observe(cycle_timestamp_ns, dc_time);

            if let DcCorrection::WriteReferenceOffset(offset) = correction {
                if let Some(reference) = master.dc_ref_address() {
                    // Fire-and-forget so the cyclic path never blocks on it
                    let _ = Command::fpwr(
                        reference,
                        RegisterAddress::DcSystemTimeOffset.into(),
                    )
                    .ignore_wkc()
                    .send_detached(master, offset);
                }
            }
        }

        Ok(response)
    }

    async fn exchange(
        &self,
        master: &Master<'_>,
        dc_timestamp: Option<u64>,
    ) -> Result<TxRxResponse, Error> {
        let exchange = self.inner().exchange.clone();
        let base = self.pdi_start().start_address;

        let mut dc_requested = false;
        let mut wkc_sum = 0u16;
        let mut dc_system_time = None;

        // Chunk state: (logical offset, write image bytes remaining,
        // read length remaining)
        let mut out_remaining = exchange.write_len();
        let mut in_remaining = match exchange.mode {
            PdExchangeMode::Overlapping => 0,
            PdExchangeMode::Split => exchange.input_len,
        };

        let mut out_sent = 0usize;
        let mut in_done = 0usize;

        loop {
            let mut frame = master
                .dgram_loop
                .alloc_frame(FramePriority::High)
                .map_err(Error::Pdu)?;

            // The DC distribution datagram leads the first frame of the
            // cycle
            let dc_handle = if let Some(timestamp) = dc_timestamp.filter(|_| !dc_requested) {
                dc_requested = true;

                Some(self.push_dc_datagram(master, &mut frame, timestamp)?)
            } else {
                None
            };

            let mut handles = heapless::Vec::<(DatagramHandle, ChunkKind), 4>::new();

            // Outputs (LRW or LWR) first so the pair lands adjacently
            if out_remaining > 0 {
                let command = match exchange.mode {
                    PdExchangeMode::Overlapping => Command::lrw(base + out_sent as u32),
                    PdExchangeMode::Split => Command::lwr(base + out_sent as u32),
                };

                let image = self.pdi_out_slice(exchange.write_len());

                if let Some((consumed, handle)) = frame
                    .push_datagram_slice_rest(command.into(), &image[out_sent..])
                    .map_err(Error::Pdu)?
                {
                    handles
                        .push((
                            handle,
                            ChunkKind::Write {
                                offset: out_sent,
                                len: consumed,
                            },
                        ))
                        .map_err(|_| Error::Internal)?;

                    out_sent += consumed;
                    out_remaining -= consumed;
                }
            }

            // Inputs (LRD) for split mode groups, sharing the frame with
            // the outputs when space allows
            if in_remaining > 0 {
                let chunk = frame.capacity_for_datagram().min(in_remaining);

                if chunk > 0 {
                    let address = base + exchange.output_len as u32 + in_done as u32;

                    match frame.push_datagram(
                        Command::lrd(address).into(),
                        (),
                        Some(chunk as u16),
                    ) {
                        Ok(handle) => {
                            handles
                                .push((
                                    handle,
                                    ChunkKind::Read {
                                        offset: in_done,
                                        len: chunk,
                                    },
                                ))
                                .map_err(|_| Error::Internal)?;

                            in_done += chunk;
                            in_remaining -= chunk;
                        }
                        // Frame full: the next frame picks this chunk up
                        Err(PduError::TooLong) => (),
                        Err(e) => return Err(Error::Pdu(e)),
                    }
                }
            }

            if frame.is_empty() {
                // Nothing fitted and nothing left: a zero length PDI with
                // no DC request
                break;
            }

            let received = frame
                .mark_sendable(
                    master.timeouts.pdu,
                    master.config.retry_behaviour.retry_count(),
                )
                .await?;

            if let Some(handle) = dc_handle {
                let datagram = received.datagram(handle)?;

                if datagram.working_counter > 0 {
                    dc_system_time = Some(u64::unpack_from_slice(&datagram)?);
                }
            }

            for (handle, kind) in handles {
                let datagram = received.datagram(handle)?;

                wkc_sum += datagram.working_counter;

                match kind {
                    ChunkKind::Write { offset, len } => {
                        // In overlapping mode the LRW response carries the
                        // input data in place of the outputs
                        if exchange.mode == PdExchangeMode::Overlapping {
                            self.pdi_in_slice(exchange.input_len)[offset..offset + len]
                                .copy_from_slice(&datagram[0..len]);
                        }
                    }
                    ChunkKind::Read { offset, len } => {
                        self.pdi_in_slice(exchange.input_len)[offset..offset + len]
                            .copy_from_slice(&datagram[0..len]);
                    }
                }
            }

            if out_remaining == 0 && in_remaining == 0 {
                break;
            }
        }

        let expected = match exchange.mode {
            PdExchangeMode::Overlapping => exchange.expected_wkc_lrw,
            PdExchangeMode::Split => exchange.expected_wkc_lwr + exchange.expected_wkc_lrd,
        };

        self.track_wkc(master, expected, wkc_sum);

        Ok(TxRxResponse {
            exchanged: true,
            working_counter: wkc_sum,
            dc_system_time,
        })
    }

    fn push_dc_datagram(
        &self,
        master: &Master<'_>,
        frame: &mut CreatedFrame<'_>,
        timestamp: u64,
    ) -> Result<DatagramHandle, Error> {
        // Master-as-reference broadcasts the master's own time; the other
        // modes distribute the reference slave's time with an FRMW
        let (command, payload): (Command, u64) =
            match (master.dc.mode(), master.dc_ref_address()) {
                (ClockMode::MasterAsReference, _) => (
                    Command::bwr(RegisterAddress::DcSystemTime.into()).into(),
                    timestamp,
                ),
                (_, Some(reference)) => (
                    Command::frmw(reference, RegisterAddress::DcSystemTime.into()).into(),
                    0,
                ),
                (_, None) => {
                    return Err(Error::DistributedClock(
                        crate::error::DistributedClockError::NoReference,
                    ));
                }
            };

        frame.push_datagram(command, payload, None).map_err(Error::Pdu)
    }

    /// Compare the observed working counter against the expectation,
    /// posting a supervisor check after a sustained mismatch.
    fn track_wkc(&self, master: &Master<'_>, expected: u16, observed: u16) {
        if observed == expected {
            self.wkc_failures.store(0, Ordering::Relaxed);

            return;
        }

        let failures = self.wkc_failures.fetch_add(1, Ordering::Relaxed) + 1;

        // Log 1-in-N so a persistent fault doesn't flood the log at cycle
        // rate
        if failures % WKC_FAULT_THRESHOLD == 1 {
            fmt::warn!(
                "Group {:?} WKC mismatch: expected {}, got {} ({} consecutive)",
                self.id,
                expected,
                observed,
                failures
            );
        }

        if failures >= WKC_FAULT_THRESHOLD {
            self.wkc_failures.store(0, Ordering::Relaxed);

            master.request_check(Check::Group(self.id));
        }
    }

    /// Disable the DC sync units of all slaves in the group.
    async fn teardown_dc_sync(&self, master: &Master<'_>) -> Result<(), Error> {
        for slave in self.inner().slaves.iter() {
            let slave = slave.try_read().ok_or(Error::Borrow)?;

            if !matches!(slave.dc_sync(), DcSync::Disabled) {
                master
                    .slave_ref(slave.configured_address())
                    .write(RegisterAddress::DcSyncActive)
                    .send(master, 0u8)
                    .await?;
            }
        }

        Ok(())
    }

    /// Wait (with the state transition timeout) until the group reports the
    /// given state on all slaves.
    pub async fn wait_for_state(
        &self,
        master: &Master<'_>,
        state: SlaveState,
    ) -> Result<(), Error> {
        async {
            'outer: loop {
                for slave in self.inner().slaves.iter() {
                    let configured_address =
                        slave.try_read().ok_or(Error::Borrow)?.configured_address();

                    if master.slave_ref(configured_address).state().await? != state {
                        master.timeouts.loop_tick().await;

                        continue 'outer;
                    }
                }

                break Ok(());
            }
        }
        .timeout(master.timeouts.state_transition)
        .await
    }
}

#[derive(Debug, Copy, Clone)]
enum ChunkKind {
    Write { offset: usize, len: usize },
    Read { offset: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_divisor_skips() {
        let group: SlaveGroup<2, 8> = SlaveGroup::default();

        group.set_cycle_divisor(3);

        let pattern: heapless::Vec<bool, 9> = (0..9).map(|_| group.cycle_due()).collect();

        assert_eq!(
            pattern.as_slice(),
            &[true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn group_ids_unique() {
        let a: SlaveGroup<1, 8> = SlaveGroup::default();
        let b: SlaveGroup<1, 8> = SlaveGroup::default();

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn sustained_wkc_mismatch_notifies_supervisor() {
        use crate::{DatagramStorage, MasterConfig, Timeouts};

        const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(128);

        static STORAGE: DatagramStorage<2, FRAME_SIZE> = DatagramStorage::new();

        let (_tx, _rx, dgram_loop) = STORAGE.try_split().expect("split");

        let master = crate::Master::new(dgram_loop, Timeouts::default(), MasterConfig::default());

        let group: SlaveGroup<2, 8, Op> = SlaveGroup::default();

        for _ in 0..WKC_FAULT_THRESHOLD - 1 {
            group.track_wkc(&master, 3, 1);
        }

        assert_eq!(master.supervisor.try_next(), None);

        // The threshold'th consecutive mismatch posts a group check
        group.track_wkc(&master, 3, 1);

        assert_eq!(master.supervisor.try_next(), Some(Check::Group(group.id())));

        // A matching counter resets the streak
        group.track_wkc(&master, 3, 3);
        group.track_wkc(&master, 3, 1);

        assert_eq!(master.supervisor.try_next(), None);
    }

    // Mapping generation and the working counter expectations it produces
    // are covered by the emulated cyclic exchange integration test, which
    // takes a group to OP and runs `tx_rx` against the emulated bus.
}
