//! The EtherCAT master.

use crate::{
    BASE_SLAVE_ADDRESS, MasterConfig, Timeouts,
    al_control::AlControl,
    al_status_code::AlStatusCode,
    command::Command,
    datagram::{
        CreatedFrame, DatagramLoop, FramePriority, ReceivedDatagram,
    },
    dc,
    error::{Error, Item, PduError},
    fmmu::Fmmu,
    fmt,
    pdi::PdiOffset,
    register::RegisterAddress,
    slave::{Slave, SlaveRef},
    slave_group::{self, SlaveGroupHandle},
    slave_state::SlaveState,
    supervisor::SupervisorQueue,
    sync_manager_channel::SyncManagerChannel,
    timer_factory::IntoTimeout,
};
use catline_wire::{WireSized, WireWrite};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU16, Ordering},
};
use heapless::FnvIndexMap;

/// The main EtherCAT controller.
///
/// A `Master` is passed by reference to [`SlaveGroup`](crate::SlaveGroup)s
/// to drive their cyclic exchange, and gives direct access to raw EtherCAT
/// commands like `BRD`, `LRW`, etc.
#[derive(Debug)]
pub struct Master<'sto> {
    pub(crate) dgram_loop: DatagramLoop<'sto>,
    /// The total number of discovered slaves.
    ///
    /// An `AtomicU16` only to satisfy `Sync`; it is written once during
    /// [`init`](Master::init).
    num_slaves: AtomicU16,
    /// Configured address of the DC reference slave, zero when no DC capable
    /// slave was found.
    dc_reference_configured_address: AtomicU16,
    /// Run-time clock discipline state.
    pub(crate) dc: dc::DcControl,
    /// Fault check queue drained by the supervisor task.
    pub(crate) supervisor: SupervisorQueue,
    pub(crate) timeouts: Timeouts,
    pub(crate) config: MasterConfig,
}

impl<'sto> Master<'sto> {
    /// Create a new EtherCAT master.
    pub fn new(dgram_loop: DatagramLoop<'sto>, timeouts: Timeouts, config: MasterConfig) -> Self {
        Self {
            dgram_loop,
            num_slaves: AtomicU16::new(0),
            dc_reference_configured_address: AtomicU16::new(0),
            dc: dc::DcControl::new(config.clock_mode),
            supervisor: SupervisorQueue::new(),
            timeouts,
            config,
        }
    }

    /// The clock discipline controller, e.g. for reading the cycle timer
    /// correction each tick.
    pub fn dc(&self) -> &dc::DcControl {
        &self.dc
    }

    /// Write zeroes to every slave's memory at `start`, `len` bytes long.
    async fn blank_memory(&self, start: impl Into<u16>, len: u16) -> Result<(), Error> {
        Command::bwr(start.into())
            .ignore_wkc()
            .with_len(len)
            .send(self, ())
            .await
    }

    /// Reset all slaves to a clean INIT state.
    async fn reset_slaves(&self) -> Result<(), Error> {
        fmt::debug!("Beginning reset");

        // Reset slaves to INIT, acknowledging any pending errors
        Command::bwr(RegisterAddress::AlControl.into())
            .ignore_wkc()
            .send(self, AlControl::reset())
            .await?;

        // Clear FMMUs - see ETG1000.4 Table 57.
        // Some devices can't blank the entire region in one go so each
        // entity is cleared individually.
        for fmmu_idx in 0..16 {
            self.blank_memory(RegisterAddress::fmmu(fmmu_idx), Fmmu::PACKED_LEN as u16)
                .await?;
        }

        // Clear SMs - see ETG1000.4 Table 59
        for sm_idx in 0..16 {
            self.blank_memory(
                RegisterAddress::sync_manager(sm_idx),
                SyncManagerChannel::PACKED_LEN as u16,
            )
            .await?;
        }

        // Disable DC sync units and zero DC state
        self.blank_memory(RegisterAddress::DcSyncActive, 1).await?;
        self.blank_memory(RegisterAddress::DcCyclicUnitControl, 1)
            .await?;
        self.blank_memory(RegisterAddress::DcSystemTime, 8).await?;
        self.blank_memory(RegisterAddress::DcSystemTimeOffset, 8)
            .await?;
        self.blank_memory(RegisterAddress::DcSystemTimeTransmissionDelay, 4)
            .await?;
        self.blank_memory(RegisterAddress::DcSystemTimeDifference, 4)
            .await?;
        self.blank_memory(RegisterAddress::DcSyncStartTime, 8).await?;
        self.blank_memory(RegisterAddress::DcSync0CycleTime, 4)
            .await?;
        self.blank_memory(RegisterAddress::DcSync1CycleTime, 4)
            .await?;

        // ETG1020 Section 22.2.4 defines these initial parameters.
        Command::bwr(RegisterAddress::DcControlLoopParam3.into())
            .ignore_wkc()
            .send(self, 0x0c00u16)
            .await?;
        // Must come after param 3 so the DC control unit is reset
        Command::bwr(RegisterAddress::DcControlLoopParam1.into())
            .ignore_wkc()
            .send(self, 0x1000u16)
            .await?;

        fmt::debug!("--> Reset complete");

        Ok(())
    }

    /// Detect slaves, set their fixed station addresses, read their
    /// descriptors, assign them to groups and bring everything to `PRE-OP`.
    ///
    /// The `group_filter` closure returns the
    /// [`&dyn SlaveGroupHandle`](crate::slave_group::SlaveGroupHandle) each
    /// slave should be assigned to. All slaves must be assigned to a group
    /// even if they are unused.
    ///
    /// `now` should return nanoseconds since the EtherCAT epoch (2000-01-01)
    /// and seeds the distributed clocks; use
    /// [`std::ethercat_now`](crate::std::ethercat_now) on `std` targets.
    ///
    /// `MAX_SLAVES` must be a power of 2 greater than 1.
    pub async fn init<const MAX_SLAVES: usize, G>(
        &self,
        now: impl Fn() -> u64 + Copy,
        mut group_filter: impl for<'g> FnMut(&'g G, &Slave) -> Result<&'g dyn SlaveGroupHandle, Error>,
    ) -> Result<G, Error>
    where
        G: Default,
    {
        let groups = G::default();

        // Each slave increments the working counter of the broadcast, so it
        // doubles as a device count
        let num_slaves = self.count_slaves().await?;

        fmt::debug!("Discovered {} slaves", num_slaves);

        if num_slaves == 0 {
            fmt::error!("No slaves were discovered. Check NIC device, connections and timeouts");

            return Err(Error::NotFound {
                item: Item::Slave,
                index: None,
            });
        }

        self.reset_slaves().await?;

        // The only place the count is stored, so ordering is irrelevant
        self.num_slaves.store(num_slaves, Ordering::Relaxed);

        let mut slaves = heapless::Deque::<Slave, MAX_SLAVES>::new();

        // Set the configured station address of all discovered slaves. Done
        // in its own pass so duplicate addresses left over from a previous
        // run cannot alias while the scan is half way through.
        for slave_idx in 0..num_slaves {
            let configured_address = BASE_SLAVE_ADDRESS.wrapping_add(slave_idx);

            // Confirm presence at this position first
            Command::aprd(slave_idx, RegisterAddress::Type.into())
                .receive::<u8>(self)
                .await?;

            Command::apwr(slave_idx, RegisterAddress::ConfiguredStationAddress.into())
                .send(self, configured_address)
                .await?;
        }

        // Read per-slave descriptors now all addresses are stable
        for slave_idx in 0..num_slaves {
            let configured_address = BASE_SLAVE_ADDRESS.wrapping_add(slave_idx);

            let slave = Slave::new(self, slave_idx, configured_address).await?;

            slaves
                .push_back(slave)
                .map_err(|_| Error::Capacity(Item::Slave))?;
        }

        {
            let (slaves, _) = slaves.as_mut_slices();

            Slave::assign_parents(slaves)?;

            fmt::debug!("Configuring topology/distributed clocks");

            // Measure propagation delays and program system time offsets.
            let dc_reference = dc::configure_dc(self, slaves, now).await?;

            if let Some(reference) = dc_reference {
                self.dc_reference_configured_address
                    .store(reference, Ordering::Relaxed);

                dc::run_dc_static_sync(self, reference, self.config.dc_static_sync_iterations)
                    .await?;
            }
        }

        // Scoped to reduce the lifetime of the group map borrows
        {
            // A unique list of groups so consecutive PDI segments can be
            // assigned to each one
            let mut group_map = FnvIndexMap::<_, _, MAX_SLAVES>::new();

            while let Some(slave) = slaves.pop_front() {
                let group = group_filter(&groups, &slave)?;

                // SAFETY: This mutates the group's internal slave list, so a
                // reference to the group's contents may not be held over
                // this line.
                unsafe { group.push(slave)? };

                group_map
                    .insert(usize::from(group.id()), UnsafeCell::new(group))
                    .map_err(|_| Error::Capacity(Item::Group))?;
            }

            let mut offset = PdiOffset::default();

            for (id, group) in group_map.into_iter() {
                let group = unsafe { *group.get() };

                offset = group.as_ref().into_pre_op(offset, self).await?;

                fmt::debug!("After group ID {} offset: {:?}", id, offset);
            }

            fmt::debug!("Total PDI {} bytes", offset.start_address);
        }

        // Check that all slaves reached PRE-OP
        self.wait_for_state(SlaveState::PreOp).await?;

        Ok(groups)
    }

    /// Convenience method to create a single group containing all discovered
    /// slaves.
    ///
    /// All slaves will be in `PRE-OP` once this returns. To transition
    /// further, see [`SlaveGroup::into_safe_op`](crate::SlaveGroup) and
    /// friends. For multiple groups, see [`Master::init`].
    pub async fn init_single_group<const MAX_SLAVES: usize, const MAX_PDI: usize>(
        &self,
        now: impl Fn() -> u64 + Copy,
    ) -> Result<crate::SlaveGroup<MAX_SLAVES, MAX_PDI, slave_group::PreOp>, Error> {
        self.init::<MAX_SLAVES, _>(now, |group, _slave| Ok(group))
            .await
    }

    /// Count the number of slaves on the network with a broadcast read.
    async fn count_slaves(&self) -> Result<u16, Error> {
        Command::brd(RegisterAddress::Type.into())
            .receive_wkc::<u8>(self)
            .await
            .map(|(_, wkc)| wkc)
    }

    /// The number of slaves discovered by [`init`](Master::init).
    pub fn num_slaves(&self) -> usize {
        usize::from(self.num_slaves.load(Ordering::Relaxed))
    }

    /// Get the configured address of the designated DC reference slave, if
    /// one was found.
    pub(crate) fn dc_ref_address(&self) -> Option<u16> {
        let addr = self.dc_reference_configured_address.load(Ordering::Relaxed);

        (addr > 0).then_some(addr)
    }

    /// Wait for all slaves on the network to reach the given state.
    pub async fn wait_for_state(&self, desired_state: SlaveState) -> Result<(), Error> {
        let num_slaves = self.num_slaves.load(Ordering::Relaxed);

        async {
            loop {
                let status = Command::brd(RegisterAddress::AlStatus.into())
                    .with_wkc(num_slaves)
                    .receive::<AlControl>(self)
                    .await?;

                fmt::trace!("Global AL status {:?}", status);

                if status.error {
                    fmt::error!(
                        "Error occurred transitioning all slaves to {}",
                        desired_state,
                    );

                    for slave_addr in
                        BASE_SLAVE_ADDRESS..(BASE_SLAVE_ADDRESS + self.num_slaves() as u16)
                    {
                        let (status, _wkc) =
                            Command::fprd(slave_addr, RegisterAddress::AlStatusCode.into())
                                .receive_wkc::<AlStatusCode>(self)
                                .await
                                .unwrap_or((AlStatusCode::UnspecifiedError, 0));

                        fmt::error!("--> Slave {:#06x} status code {}", slave_addr, status);
                    }

                    return Err(Error::StateTransition);
                }

                if status.state == desired_state {
                    break Ok(());
                }

                self.timeouts.loop_tick().await;
            }
        }
        .timeout(self.timeouts.state_transition)
        .await
    }

    /// Borrow a slave-addressed view without any slave state, for raw
    /// register access by configured address.
    pub fn slave_ref(&self, configured_address: u16) -> SlaveRef<'_, ()> {
        SlaveRef::new(self, configured_address, ())
    }

    #[allow(unused)]
    pub(crate) fn max_frame_payload(&self) -> usize {
        self.dgram_loop.max_frame_payload()
    }

    /// Allocate a frame, waiting for a slot and a spare datagram index up to
    /// the PDU timeout.
    pub(crate) async fn alloc_frame(&self) -> Result<CreatedFrame<'sto>, Error> {
        async {
            loop {
                match self.dgram_loop.alloc_frame(FramePriority::Low) {
                    Ok(frame) => break Ok(frame),
                    Err(PduError::NoFrameSlots) => self.timeouts.loop_tick().await,
                    Err(e) => break Err(Error::Pdu(e)),
                }
            }
        }
        .timeout(self.timeouts.pdu)
        .await
    }

    /// Send a single datagram in its own frame and wait for the response.
    pub(crate) async fn single_datagram(
        &self,
        command: Command,
        data: impl WireWrite,
        len_override: Option<u16>,
    ) -> Result<ReceivedDatagram<'sto>, Error> {
        // Waiting for a frame slot or a spare index is bounded by the PDU
        // timeout; the in-flight wait after that is bounded separately by
        // the frame future's own timer so retries get their full budget.
        let (frame, handle) = async {
            loop {
                let mut frame = self.alloc_frame().await?;

                match frame.push_datagram(command, &data, len_override) {
                    Ok(handle) => break Ok((frame, handle)),
                    // All indices in flight: drop the frame claim and wait
                    // for another caller to finish
                    Err(PduError::OutOfIndices) => {
                        drop(frame);

                        self.timeouts.loop_tick().await;
                    }
                    Err(e) => break Err(Error::Pdu(e)),
                }
            }
        }
        .timeout(self.timeouts.pdu)
        .await?;

        let received = frame
            .mark_sendable(
                self.timeouts.pdu,
                self.config.retry_behaviour.retry_count(),
            )
            .await?;

        received.into_datagram(handle)
    }

    /// Send a single datagram with no waiter; resources are released when
    /// the response returns.
    pub(crate) fn single_datagram_detached(
        &self,
        command: Command,
        data: impl WireWrite,
        len_override: Option<u16>,
    ) -> Result<(), Error> {
        let mut frame = self
            .dgram_loop
            .alloc_frame(FramePriority::Low)
            .map_err(Error::Pdu)?;

        frame
            .push_datagram(command, data, len_override)
            .map_err(Error::Pdu)?;

        frame.mark_sendable_detached();

        Ok(())
    }
}
