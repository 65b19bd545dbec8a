//! Slave configuration during state transitions: mailbox sync managers,
//! PDO mapping and FMMU programming.

use core::ops::DerefMut;

use crate::{
    eeprom::types::{
        CategoryType, CoeDetails, FmmuUsage, MailboxProtocols, SiiGeneral, SiiOwner, SyncManager,
        SyncManagerType,
    },
    error::{Error, IgnoreNoCategory, Item, MailboxError},
    fmmu::Fmmu,
    fmt,
    mailbox::coe::{SubIndex, abort_code::CoeAbortCode},
    pdi::{PdiOffset, PdiSegment},
    register::RegisterAddress,
    slave::{
        Slave, SlaveRef,
        types::{InitCommand, InitCommandKind, Mailbox, MailboxConfig, MailboxSet, Transition},
    },
    slave_state::SlaveState,
    sync_manager_channel::{
        Control, Enable, SM_BASE_ADDRESS, SM_TYPE_ADDRESS, Status, SyncManagerChannel,
    },
};
use catline_wire::WireRead;

/// Raw sync manager control bytes by role, used when the EEPROM's sync
/// manager category carries no control value.
fn default_sm_control(usage: SyncManagerType) -> u8 {
    match usage {
        // Mailbox out (master to slave): mailbox mode, write direction
        SyncManagerType::MailboxWrite => 0x26,
        // Mailbox in: mailbox mode, read direction
        SyncManagerType::MailboxRead => 0x22,
        // Process data outputs: buffered, write direction, watchdog
        SyncManagerType::ProcessDataWrite => 0x64,
        // Process data inputs: buffered, read direction
        _ => 0x20,
    }
}

impl<S> SlaveRef<'_, S>
where
    S: DerefMut<Target = Slave>,
{
    pub(crate) async fn set_eeprom_mode(&self, owner: SiiOwner) -> Result<(), Error> {
        self.eeprom().set_owner(owner).await
    }

    /// First stage configuration (INIT -> PRE-OP): program the mailbox sync
    /// managers and request PRE-OP.
    ///
    /// Configuration is continued by
    /// [`configure_fmmus`](SlaveRef::configure_fmmus) on the way to SAFE-OP.
    pub(crate) async fn configure_mailboxes(&mut self) -> Result<(), Error> {
        // Force EEPROM into master mode. Some slaves require PDI mode for
        // the INIT -> PRE-OP transition (ETG2010 "Eeprom/@AssignToPd"), so
        // ownership is handed over before the request below.
        self.set_eeprom_mode(SiiOwner::Master).await?;

        // Mailboxes must be configured in INIT state
        self.configure_mailbox_sms(MailboxSet::Standard).await?;

        self.set_eeprom_mode(SiiOwner::Pdi).await?;

        fmt::debug!(
            "Slave {:#06x} mailbox SMs configured. Transitioning to PRE-OP",
            self.configured_address
        );

        self.request_state(SlaveState::PreOp).await?;

        self.state.expected_state = SlaveState::PreOp;

        if self.state.config.mailbox.has_coe {
            self.read_coe_sm_types().await?;
        }

        if let Some(ip) = self.state.eoe_ip.clone() {
            if self
                .state
                .config
                .mailbox
                .supported_protocols
                .contains(MailboxProtocols::EOE)
            {
                self.eoe_set_ip_parameters(&ip).await?;
            } else {
                fmt::warn!(
                    "Slave {:#06x} has IP parameters configured but no EoE support",
                    self.configured_address
                );
            }
        }

        self.set_eeprom_mode(SiiOwner::Master).await?;

        Ok(())
    }

    /// Program SM0/SM1 from the EEPROM default mailbox layout.
    ///
    /// `MailboxSet::Bootstrap` uses the bootstrap offsets for the BOOT
    /// state instead of the standard ones.
    pub(crate) async fn configure_mailbox_sms(&mut self, set: MailboxSet) -> Result<(), Error> {
        let mailbox_config = self.state.default_mailbox;

        let general = self
            .eeprom()
            .general()
            .await
            .ignore_no_category()?
            .unwrap_or_else(|| {
                fmt::debug!(
                    "{:#06x} has no EEPROM general category, using default",
                    self.configured_address()
                );

                SiiGeneral::default()
            });

        fmt::trace!(
            "Slave {:#06x} mailbox configuration: {:?}",
            self.configured_address,
            mailbox_config
        );

        if !mailbox_config.has_mailbox() {
            fmt::trace!(
                "Slave {:#06x} has no valid mailbox configuration",
                self.configured_address
            );

            self.state.config.mailbox = MailboxConfig::default();

            return Ok(());
        }

        let (write_offset, write_size, read_offset, read_size) = match set {
            MailboxSet::Standard => (
                mailbox_config.receive_offset,
                mailbox_config.receive_size,
                mailbox_config.send_offset,
                mailbox_config.send_size,
            ),
            MailboxSet::Bootstrap => (
                mailbox_config.bootstrap_receive_offset,
                mailbox_config.bootstrap_receive_size,
                mailbox_config.bootstrap_send_offset,
                mailbox_config.bootstrap_send_size,
            ),
        };

        // SM0: master to slave. SM1: slave to master. Mailbox SM roles are
        // fixed by convention.
        let write_sm = SyncManagerChannel {
            physical_start_address: write_offset,
            length_bytes: write_size,
            control: fmt::unwrap!(Control::unpack_from_slice(&[default_sm_control(
                SyncManagerType::MailboxWrite
            )])),
            status: Status::default(),
            enable: Enable {
                enable: true,
                ..Enable::default()
            },
        };

        let read_sm = SyncManagerChannel {
            physical_start_address: read_offset,
            length_bytes: read_size,
            control: fmt::unwrap!(Control::unpack_from_slice(&[default_sm_control(
                SyncManagerType::MailboxRead
            )])),
            status: Status::default(),
            enable: Enable {
                enable: true,
                ..Enable::default()
            },
        };

        self.write(RegisterAddress::sync_manager(0))
            .send(self.master, write_sm)
            .await?;

        self.write(RegisterAddress::sync_manager(1))
            .send(self.master, read_sm)
            .await?;

        fmt::debug!(
            "Slave {:#06x} SM0: {}",
            self.configured_address,
            write_sm
        );
        fmt::debug!("Slave {:#06x} SM1: {}", self.configured_address, read_sm);

        let has_coe = mailbox_config
            .supported_protocols
            .contains(MailboxProtocols::COE)
            && read_size > 0;

        self.state.config.mailbox = MailboxConfig {
            write: Some(Mailbox {
                address: write_offset,
                len: write_size,
                sync_manager: 0,
            }),
            read: Some(Mailbox {
                address: read_offset,
                len: read_size,
                sync_manager: 1,
            }),
            supported_protocols: mailbox_config.supported_protocols,
            coe_sync_manager_types: heapless::Vec::new(),
            has_coe,
            complete_access: general
                .coe_details()
                .contains(CoeDetails::ENABLE_COMPLETE_ACCESS),
        };

        Ok(())
    }

    /// Read the sync manager communication types from CoE object `0x1C00`.
    ///
    /// Must be called in PRE-OP or above.
    async fn read_coe_sm_types(&mut self) -> Result<(), Error> {
        let num_indices = self
            .sdo_read::<u8>(SM_TYPE_ADDRESS, SubIndex::Index(0))
            .await?;

        let mut types = heapless::Vec::new();

        for index in 1..=num_indices {
            let sm_type = self
                .sdo_read::<u8>(SM_TYPE_ADDRESS, SubIndex::Index(index))
                .await
                .and_then(|raw| SyncManagerType::unpack_from_slice(&[raw]).map_err(Error::from))?;

            fmt::trace!("Sync manager {:?} at sub-index {}", sm_type, index);

            types.push(sm_type).map_err(|_| {
                fmt::error!("more than 16 sync manager types detected");

                Error::Capacity(Item::SyncManager)
            })?;
        }

        fmt::debug!(
            "Slave {:#06x} found sync manager types {:?}",
            self.configured_address,
            types
        );

        self.state.config.mailbox.coe_sync_manager_types = types;

        Ok(())
    }

    /// Second stage configuration (PRE-OP -> SAFE-OP): generate the PDO
    /// mapping for one direction and program process data SMs and FMMUs.
    pub(crate) async fn configure_fmmus(
        &mut self,
        mut global_offset: PdiOffset,
        group_start_address: u32,
        direction: PdoDirection,
    ) -> Result<PdiOffset, Error> {
        let sync_managers = self.eeprom().sync_managers().await?;
        let fmmu_usage = self.eeprom().fmmu_usage().await?;

        let state = self.state().await?;

        if state != SlaveState::PreOp {
            fmt::error!(
                "Slave {:#06x} is in invalid state {}. Expected {}",
                self.configured_address,
                state,
                SlaveState::PreOp
            );

            return Err(Error::InvalidState {
                expected: SlaveState::PreOp,
                actual: state,
                configured_address: self.configured_address,
            });
        }

        let has_coe = self.state.config.mailbox.has_coe;
        let has_soe = self
            .state
            .config
            .mailbox
            .supported_protocols
            .contains(MailboxProtocols::SOE);

        let range = if has_coe {
            self.configure_pdos_coe(&sync_managers, &fmmu_usage, direction, &mut global_offset)
                .await?
        } else if has_soe {
            self.configure_pdos_soe(&sync_managers, &fmmu_usage, direction, &mut global_offset)
                .await?
        } else {
            self.configure_pdos_eeprom(&sync_managers, &fmmu_usage, direction, &mut global_offset)
                .await?
        };

        let relative = PdiSegment {
            bytes: (range.bytes.start - group_start_address as usize)
                ..(range.bytes.end - group_start_address as usize),
        };

        match direction {
            PdoDirection::MasterRead => self.state.config.io.input = relative,
            PdoDirection::MasterWrite => self.state.config.io.output = relative,
        };

        fmt::debug!(
            "Slave {:#06x} PDI inputs: {} ({} bytes), outputs: {} ({} bytes)",
            self.configured_address,
            self.state.config.io.input,
            self.state.config.io.input.len(),
            self.state.config.io.output,
            self.state.config.io.output.len(),
        );

        Ok(global_offset)
    }

    async fn write_sm_config(
        &mut self,
        sync_manager_index: u8,
        sync_manager: &SyncManager,
        length_bytes: u16,
    ) -> Result<SyncManagerChannel, Error> {
        let control = if sync_manager.control != 0 {
            sync_manager.control()
        } else {
            fmt::unwrap!(Control::unpack_from_slice(&[default_sm_control(
                sync_manager.usage_type
            )]))
        };

        let sm_config = SyncManagerChannel {
            physical_start_address: sync_manager.start_addr,
            length_bytes,
            control,
            status: Status::default(),
            enable: Enable {
                enable: sync_manager.is_enabled(),
                ..Enable::default()
            },
        };

        self.write(RegisterAddress::sync_manager(sync_manager_index))
            .send(self.master, sm_config)
            .await?;

        // Recorded so supervised recovery can restore the register without
        // re-running mapping generation
        let recorded = &mut self.state.config.pd_sms;

        if let Some(existing) = recorded.iter_mut().find(|(idx, _)| *idx == sync_manager_index) {
            existing.1 = sm_config;
        } else {
            let _ = recorded.push((sync_manager_index, sm_config));
        }

        fmt::debug!(
            "Slave {:#06x} SM{}: {}",
            self.configured_address,
            sync_manager_index,
            sm_config
        );

        Ok(sm_config)
    }

    async fn write_fmmu_config(
        &mut self,
        fmmu_index: u8,
        global_offset: &mut PdiOffset,
        desired_sm_type: SyncManagerType,
        sm_config: &SyncManagerChannel,
    ) -> Result<(), Error> {
        // Multiple SMs may share one FMMU, so existing config is read back
        // and extended rather than overwritten.
        let fmmu_config = self
            .read(RegisterAddress::fmmu(fmmu_index))
            .receive::<Fmmu>(self.master)
            .await?;

        // All FMMUs are zeroed during init, so the enable flag doubles as an
        // "already configured" sentinel.
        let fmmu_config = if fmmu_config.enable {
            Fmmu {
                length_bytes: fmmu_config.length_bytes + sm_config.length_bytes,
                ..fmmu_config
            }
        } else {
            Fmmu {
                logical_start_address: global_offset.start_address,
                length_bytes: sm_config.length_bytes,
                // Byte aligned mappings only
                logical_start_bit: 0,
                logical_end_bit: 7,
                physical_start_address: sm_config.physical_start_address,
                physical_start_bit: 0,
                read_enable: desired_sm_type == SyncManagerType::ProcessDataRead,
                write_enable: desired_sm_type == SyncManagerType::ProcessDataWrite,
                enable: true,
            }
        };

        self.write(RegisterAddress::fmmu(fmmu_index))
            .send(self.master, fmmu_config)
            .await?;

        let recorded = &mut self.state.config.fmmus;

        if let Some(existing) = recorded.iter_mut().find(|(idx, _)| *idx == fmmu_index) {
            existing.1 = fmmu_config;
        } else {
            let _ = recorded.push((fmmu_index, fmmu_config));
        }

        fmt::debug!(
            "Slave {:#06x} FMMU{}: {}",
            self.configured_address,
            fmmu_index,
            fmmu_config
        );

        *global_offset = global_offset.increment(sm_config.length_bytes);

        Ok(())
    }

    /// Configure PDOs from CoE objects `0x1C00`/`0x1C1x`.
    async fn configure_pdos_coe(
        &mut self,
        sync_managers: &[SyncManager],
        fmmu_usage: &[FmmuUsage],
        direction: PdoDirection,
        global_offset: &mut PdiOffset,
    ) -> Result<PdiSegment, Error> {
        let (desired_sm_type, desired_fmmu_type) = direction.filter_terms();

        let start_offset = *global_offset;

        let sm_types = self.state.config.mailbox.coe_sync_manager_types.clone();

        for (sync_manager_index, (sm_type, sync_manager)) in
            sm_types.iter().zip(sync_managers.iter()).enumerate()
        {
            let sync_manager_index = sync_manager_index as u8;

            let sm_address = SM_BASE_ADDRESS + u16::from(sync_manager_index);

            if *sm_type != desired_sm_type {
                continue;
            }

            // Total number of PDO assignments for this sync manager. An
            // "object does not exist" abort here just means the SM is
            // unused, collapsing it to zero length.
            let num_sm_assignments = match self
                .sdo_read::<u8>(sm_address, SubIndex::Index(0))
                .await
            {
                Ok(count) => count,
                Err(Error::Mailbox(MailboxError::Aborted {
                    code: CoeAbortCode::NotFound,
                    ..
                })) => 0,
                Err(e) => return Err(e),
            };

            fmt::trace!(
                "SDO sync manager {} {:#06x} {:?}, sub indices: {}",
                sync_manager_index,
                sm_address,
                sm_type,
                num_sm_assignments
            );

            let mut sm_bit_len = 0u16;

            for i in 1..=num_sm_assignments {
                let pdo = self.sdo_read::<u16>(sm_address, SubIndex::Index(i)).await?;
                let num_mappings = self.sdo_read::<u8>(pdo, SubIndex::Index(0)).await?;

                fmt::trace!("--> #{} data: {:#06x} ({} mappings):", i, pdo, num_mappings);

                for i in 1..=num_mappings {
                    // A PDO entry, ETG1000.6 Table 74: index:16, subindex:8,
                    // bit length:8, little endian on the wire.
                    let mapping = self.sdo_read::<u32>(pdo, SubIndex::Index(i)).await?;

                    let bit_len = mapping & 0xff;

                    fmt::trace!(
                        "----> index {:#06x}, sub index {}, bit length {}",
                        mapping >> 16,
                        (mapping >> 8) & 0xff,
                        bit_len,
                    );

                    sm_bit_len += bit_len as u16;
                }
            }

            fmt::trace!(
                "----= total SM bit length {} ({} bytes)",
                sm_bit_len,
                sm_bit_len.div_ceil(8)
            );

            let sm_config = self
                .write_sm_config(sync_manager_index, sync_manager, sm_bit_len.div_ceil(8))
                .await?;

            if sm_bit_len > 0 {
                let fmmu_index = fmmu_usage
                    .iter()
                    .position(|usage| *usage == desired_fmmu_type)
                    .ok_or(Error::NotFound {
                        item: Item::Fmmu,
                        index: None,
                    })?;

                self.write_fmmu_config(
                    fmmu_index as u8,
                    global_offset,
                    desired_sm_type,
                    &sm_config,
                )
                .await?;
            }
        }

        Ok(PdiSegment {
            bytes: start_offset.up_to(*global_offset),
        })
    }

    /// Configure process data sync managers from the drives' SoE AT/MDT
    /// mapping lists, for servo slaves without CoE.
    ///
    /// AT data (drive to master) fills SM3, MDT data (master to drive)
    /// fills SM2.
    async fn configure_pdos_soe(
        &mut self,
        sync_managers: &[SyncManager],
        fmmu_usage: &[FmmuUsage],
        direction: PdoDirection,
        offset: &mut PdiOffset,
    ) -> Result<PdiSegment, Error> {
        let drives = self
            .eeprom()
            .general()
            .await
            .ignore_no_category()?
            .map(|general| general.soe_channels)
            .unwrap_or(1);

        let (input_bytes, output_bytes) = self.soe_mapping_sizes(drives).await?;

        let (sm_index, byte_len, sm_type, fmmu_type) = match direction {
            PdoDirection::MasterRead => (
                3u8,
                input_bytes,
                SyncManagerType::ProcessDataRead,
                FmmuUsage::Inputs,
            ),
            PdoDirection::MasterWrite => (
                2u8,
                output_bytes,
                SyncManagerType::ProcessDataWrite,
                FmmuUsage::Outputs,
            ),
        };

        let start_offset = *offset;

        let Some(sync_manager) = sync_managers.get(usize::from(sm_index)) else {
            fmt::warn!(
                "Slave {:#06x} has no SM{} for SoE process data",
                self.configured_address,
                sm_index
            );

            return Ok(PdiSegment {
                bytes: start_offset.up_to(*offset),
            });
        };

        let sm_config = self
            .write_sm_config(sm_index, sync_manager, byte_len)
            .await?;

        if byte_len > 0 {
            let fmmu_index = fmmu_usage
                .iter()
                .position(|usage| *usage == fmmu_type)
                .unwrap_or(usize::from(sm_index));

            self.write_fmmu_config(fmmu_index as u8, offset, sm_type, &sm_config)
                .await?;
        }

        Ok(PdiSegment {
            bytes: start_offset.up_to(*offset),
        })
    }

    /// Configure PDOs from the EEPROM TxPDO/RxPDO categories, for slaves
    /// without CoE.
    async fn configure_pdos_eeprom(
        &mut self,
        sync_managers: &[SyncManager],
        fmmu_usage: &[FmmuUsage],
        direction: PdoDirection,
        offset: &mut PdiOffset,
    ) -> Result<PdiSegment, Error> {
        let (sm_type, fmmu_type) = direction.filter_terms();

        let pdos = self.eeprom().pdos(direction.pdo_category()).await?;

        fmt::trace!("Slave {:?} PDOs {:?}", direction, pdos);

        let start_offset = *offset;

        for (sync_manager_index, sync_manager) in sync_managers
            .iter()
            .enumerate()
            .filter(|(_idx, sm)| sm.usage_type == sm_type)
        {
            let sync_manager_index = sync_manager_index as u8;

            let bit_len: u16 = pdos
                .iter()
                .filter(|pdo| pdo.sync_manager == sync_manager_index)
                .map(|pdo| pdo.bit_len)
                .sum();

            let fmmu_index = fmmu_usage
                .iter()
                .position(|usage| *usage == fmmu_type)
                .unwrap_or_else(|| {
                    fmt::trace!(
                        "No FMMU usage hint for SM{}, falling back to the SM index",
                        sync_manager_index,
                    );

                    usize::from(sync_manager_index)
                });

            let sm_config = self
                .write_sm_config(sync_manager_index, sync_manager, bit_len.div_ceil(8))
                .await?;

            fmt::debug!(
                "{:?} assignment SM {}, FMMU {}",
                sm_type,
                sync_manager_index,
                fmmu_index
            );

            if bit_len > 0 {
                self.write_fmmu_config(fmmu_index as u8, offset, sm_type, &sm_config)
                    .await?;
            }
        }

        Ok(PdiSegment {
            bytes: start_offset.up_to(*offset),
        })
    }

    /// Replay the registered init commands tagged with `transition`.
    ///
    /// Runs before the AL control request for the transition's target state,
    /// so e.g. PDO assignment writes land while the slave still accepts
    /// them.
    pub(crate) async fn replay_init_commands(&self, transition: Transition) -> Result<(), Error> {
        // The command list is part of the slave descriptor, so iterating
        // does not hold any lock across await points.
        for command in self
            .state
            .init_commands
            .iter()
            .filter(|command| command.transition == transition)
        {
            self.run_init_command(command).await?;
        }

        Ok(())
    }

    async fn run_init_command(&self, command: &InitCommand) -> Result<(), Error> {
        match &command.kind {
            InitCommandKind::Coe {
                index,
                sub_index,
                complete,
                data,
            } => {
                fmt::debug!(
                    "Slave {:#06x} init command: SDO {:#06x}:{} <- {:?}",
                    self.configured_address,
                    *index,
                    *sub_index,
                    data.as_slice()
                );

                let sub_index = if *complete {
                    SubIndex::Complete
                } else {
                    SubIndex::Index(*sub_index)
                };

                self.sdo_write_slice(*index, sub_index, data.as_slice())
                    .await
            }
            InitCommandKind::Soe {
                drive,
                idn,
                elements,
                data,
            } => {
                fmt::debug!(
                    "Slave {:#06x} init command: IDN {} drive {} <- {:?}",
                    self.configured_address,
                    *idn,
                    *drive,
                    data.as_slice()
                );

                self.soe_write(*drive, *idn, *elements, data.as_slice())
                    .await
            }
        }
    }
}

/// The direction of a PDO mapping pass.
#[derive(Debug, Copy, Clone)]
pub(crate) enum PdoDirection {
    /// Slave inputs read by the master.
    MasterRead,
    /// Master outputs written to the slave.
    MasterWrite,
}

impl PdoDirection {
    fn filter_terms(self) -> (SyncManagerType, FmmuUsage) {
        match self {
            PdoDirection::MasterRead => (SyncManagerType::ProcessDataRead, FmmuUsage::Inputs),
            PdoDirection::MasterWrite => (SyncManagerType::ProcessDataWrite, FmmuUsage::Outputs),
        }
    }

    fn pdo_category(self) -> CategoryType {
        match self {
            PdoDirection::MasterRead => CategoryType::TxPdo,
            PdoDirection::MasterWrite => CategoryType::RxPdo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sm_control_defaults() {
        assert_eq!(default_sm_control(SyncManagerType::MailboxWrite), 0x26);
        assert_eq!(default_sm_control(SyncManagerType::MailboxRead), 0x22);
        assert_eq!(default_sm_control(SyncManagerType::ProcessDataWrite), 0x64);
        assert_eq!(default_sm_control(SyncManagerType::ProcessDataRead), 0x20);
    }

    #[test]
    fn control_byte_decode() {
        // 0x26: mailbox mode, master write direction
        let control = Control::unpack_from_slice(&[0x26]).unwrap();

        assert_eq!(
            control.operation_mode,
            crate::sync_manager_channel::OperationMode::Mailbox
        );
        assert_eq!(
            control.direction,
            crate::sync_manager_channel::Direction::MasterWrite
        );

        // 0x64: buffered mode, master write, watchdog enabled
        let control = Control::unpack_from_slice(&[0x64]).unwrap();

        assert_eq!(
            control.operation_mode,
            crate::sync_manager_channel::OperationMode::Normal
        );
        assert_eq!(
            control.direction,
            crate::sync_manager_channel::Direction::MasterWrite
        );
        assert!(control.watchdog_enable);
    }
}
