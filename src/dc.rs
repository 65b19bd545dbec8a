//! Distributed Clocks (DC): propagation delay measurement, system time
//! distribution and run-time clock discipline.

use crate::{
    Master,
    command::Command,
    error::Error,
    fmt,
    register::RegisterAddress,
    slave::{Slave, ports::AvailablePorts},
};
use catline_wire::WireRead;

/// How the master's sense of time is disciplined against the network.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockMode {
    /// The first DC capable slave is the reference clock. A PI controller
    /// produces a correction for the master's cycle timer so the master
    /// follows the reference.
    #[default]
    ReferenceClock,
    /// The master's clock is authoritative; the reference slave's system
    /// time offset is nudged by half the observed difference each cycle to
    /// converge without overshoot.
    MasterClock,
    /// The master's clock is authoritative and is broadcast directly to all
    /// slaves instead of distributing the reference slave's time.
    MasterAsReference,
}

// PI gains for `ClockMode::ReferenceClock`: kp = 1.0, ki = 0.1, integral
// clamped to ±10.
const KP: f64 = 1.0;
const KI: f64 = 0.1;
const INTEGRAL_LIMIT: f64 = 10.0;

#[derive(Debug, Default, Copy, Clone)]
struct DcRuntime {
    /// Difference between master cycle time and DC time at the last
    /// observation, wrapped to ±half a cycle.
    act_diff: i64,
    /// Integral accumulator of the PI controller.
    integral: f64,
    /// Correction for the master's cycle timer in nanoseconds.
    timer_correction: f64,
    /// System time offset programmed into the reference slave, adjusted by
    /// half-diff nudges in [`ClockMode::MasterClock`].
    reference_offset: i64,
    /// Master wall clock at DC configuration time, the zero point of
    /// relative cycle timestamps.
    rtc_system_offset: u64,
}

/// Run-time clock discipline state, embedded in a [`Master`].
#[derive(Debug)]
pub struct DcControl {
    mode: ClockMode,
    cycle_interval_ns: core::sync::atomic::AtomicU64,
    runtime: spin::RwLock<DcRuntime>,
}

/// What the cyclic path must do after feeding a DC observation in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DcCorrection {
    /// Nothing; the timer correction has been updated.
    None,
    /// Write the given system time offset to the reference slave
    /// (fire-and-forget).
    WriteReferenceOffset(i64),
}

impl DcControl {
    pub(crate) fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            cycle_interval_ns: core::sync::atomic::AtomicU64::new(0),
            runtime: spin::RwLock::new(DcRuntime::default()),
        }
    }

    pub(crate) fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Set the application's cycle interval, the modulus for clock
    /// difference calculations.
    pub fn set_cycle_interval(&self, interval: core::time::Duration) {
        self.cycle_interval_ns.store(
            interval.as_nanos() as u64,
            core::sync::atomic::Ordering::Relaxed,
        );
    }

    /// The current correction for the master's cycle timer in nanoseconds.
    ///
    /// In [`ClockMode::ReferenceClock`] the application shortens or
    /// lengthens its next cycle wait by this amount to track the reference
    /// slave.
    pub fn timer_correction_ns(&self) -> f64 {
        self.runtime.read().timer_correction
    }

    /// The clock difference observed on the last cycle, in nanoseconds.
    ///
    /// Bounded by ±half the cycle interval; a sustained large value is a
    /// bus fault.
    pub fn act_diff(&self) -> i64 {
        self.runtime.read().act_diff
    }

    /// The master wall clock value recorded when DC was configured.
    pub fn rtc_system_offset(&self) -> u64 {
        self.runtime.read().rtc_system_offset
    }

    pub(crate) fn record_reference(&self, rtc_now: u64, reference_offset: i64) {
        let mut runtime = self.runtime.write();

        runtime.rtc_system_offset = rtc_now;
        runtime.reference_offset = reference_offset;
    }

    /// Feed one cycle's observation into the controller.
    ///
    /// `rtc_time` is the master's cycle timestamp, `dc_time` the system
    /// time echoed back by the reference slave.
    pub(crate) fn observe(&self, rtc_time: u64, dc_time: u64) -> DcCorrection {
        let interval = self
            .cycle_interval_ns
            .load(core::sync::atomic::Ordering::Relaxed) as i64;

        if interval == 0 {
            return DcCorrection::None;
        }

        let mut act_diff = (rtc_time.wrapping_sub(dc_time) as i64) % interval;

        // Wrap into ±half a cycle so a phase difference never looks like
        // many whole cycles of error
        if act_diff > interval / 2 {
            act_diff -= interval;
        } else if act_diff < -(interval / 2) {
            act_diff += interval;
        }

        let mut runtime = self.runtime.write();

        runtime.act_diff = act_diff;

        match self.mode {
            ClockMode::ReferenceClock => {
                let p = KP * act_diff as f64;

                runtime.integral = (runtime.integral + KI * act_diff as f64)
                    .clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);

                runtime.timer_correction = p + runtime.integral;

                DcCorrection::None
            }
            ClockMode::MasterClock => {
                // Only correct half the difference each cycle to avoid
                // overshooting the slave's own drift compensation
                runtime.reference_offset += act_diff / 2;

                DcCorrection::WriteReferenceOffset(runtime.reference_offset)
            }
            ClockMode::MasterAsReference => DcCorrection::None,
        }
    }
}

/// Measure propagation delays and program system time offsets for all DC
/// capable slaves.
///
/// Returns the configured address of the reference slave — the first DC
/// capable device — or `None` when the network has no DC support.
pub(crate) async fn configure_dc(
    master: &Master<'_>,
    slaves: &mut [Slave],
    now: impl Fn() -> u64 + Copy,
) -> Result<Option<u16>, Error> {
    // Latch receive times on all ports of all DC slaves in one broadcast
    Command::bwr(RegisterAddress::DcTimePort0.into())
        .ignore_wkc()
        .send(master, 0u32)
        .await?;

    let mut reference: Option<u16> = None;

    let mut available_ports = heapless::Vec::<AvailablePorts, 64>::new();

    for slave in slaves.iter() {
        available_ports
            .push(AvailablePorts(slave.ports.active))
            .map_err(|_| Error::Capacity(crate::error::Item::Slave))?;
    }

    // Index of a branch root whose port consumption is deferred because the
    // branch so far contains no DC slaves
    let mut parent_hold: Option<usize> = None;

    for slave_idx in 0..slaves.len() {
        if !slaves[slave_idx].flags.dc_supported {
            let parent = slaves[slave_idx].parent_index;

            // A non-DC slave at the head of a branch makes the branch root
            // responsible for the port bookkeeping when the branch ends
            if let Some(parent) = parent.filter(|p| slaves[*p].ports.link_count() > 2) {
                parent_hold = Some(parent);
            }

            if let Some(held) = parent_hold {
                if slaves[slave_idx].ports.link_count() == 1 {
                    available_ports[held].consume_next();

                    parent_hold = None;
                }
            }

            continue;
        }

        // This branch has a DC slave, so the hold is moot
        parent_hold = None;

        let configured_address = slaves[slave_idx].configured_address;

        // Read the four latched port receive times
        let times = master
            .slave_ref(configured_address)
            .read(RegisterAddress::DcTimePort0)
            .receive::<[u8; 16]>(master)
            .await?;

        for (port, chunk) in times.chunks_exact(4).enumerate() {
            slaves[slave_idx].ports.receive_times[port] =
                fmt::unwrap!(u32::unpack_from_slice(chunk));
        }

        let entry_port = slaves[slave_idx].ports.entry_port();

        available_ports[slave_idx].consume(entry_port);

        // Read the receive time of the processing unit and zero the slave's
        // local time by programming the inverse as its offset
        let receive_time = master
            .slave_ref(configured_address)
            .read(RegisterAddress::DcReceiveTime)
            .receive::<u64>(master)
            .await?;

        slaves[slave_idx].dc_receive_time = receive_time;

        let rtc_now = now();

        let offset = (rtc_now as i64).wrapping_sub(receive_time as i64);

        master
            .slave_ref(configured_address)
            .write(RegisterAddress::DcSystemTimeOffset)
            .send(master, offset)
            .await?;

        if reference.is_none() {
            reference = Some(configured_address);

            master.dc.record_reference(rtc_now, offset);

            fmt::debug!("Slave {:#06x} is the DC reference clock", configured_address);

            // The reference itself needs no propagation delay
            continue;
        }

        // Find the nearest DC capable ancestor
        let mut child = slave_idx;
        let mut parent = slaves[slave_idx].parent_index;

        while let Some(p) = parent {
            if slaves[p].flags.dc_supported {
                break;
            }

            child = p;
            parent = slaves[p].parent_index;
        }

        let Some(parent) = parent else {
            fmt::debug!(
                "Slave {:#06x} has no DC capable parent, skipping delay",
                configured_address
            );

            continue;
        };

        // The parent port this slave (or its branch) hangs off
        let parent_port = if slaves[parent].ports.link_count() == 1 {
            slaves[parent].ports.entry_port()
        } else {
            available_ports[parent].consume_next()
        };

        let parent_prev_port = slaves[parent].ports.prev_port(parent_port);

        let time_parent = i64::from(slaves[parent].ports.time(parent_port));
        let time_parent_previous = i64::from(slaves[parent].ports.time(parent_prev_port));

        // Loop time through this slave and everything behind it, as seen by
        // the parent
        let delay_slave_with_children = time_parent - time_parent_previous;

        // Loop time of just this slave's children
        let mut delay_children = if slaves[slave_idx].ports.link_count() > 1 {
            let own_entry = slaves[slave_idx].ports.entry_port();
            let own_last = slaves[slave_idx].ports.prev_port(own_entry);

            i64::from(slaves[slave_idx].ports.time(own_last))
                - i64::from(slaves[slave_idx].ports.time(own_entry))
        } else {
            0
        };

        if delay_children > delay_slave_with_children {
            delay_children = -delay_children;
        }

        // Delay of earlier siblings hanging between the parent's entry and
        // the port this slave is attached to
        let delay_previous_siblings = if child > parent {
            (time_parent_previous
                - i64::from(
                    slaves[parent]
                        .ports
                        .time(slaves[parent].ports.entry_port()),
                ))
            .abs()
        } else {
            0
        };

        // Forward delay is assumed equal to return delay
        let propagation_delay = ((delay_slave_with_children - delay_children) / 2
            + delay_previous_siblings) as u32
            + slaves[parent].propagation_delay;

        slaves[slave_idx].propagation_delay = propagation_delay;

        fmt::debug!(
            "Slave {:#06x} propagation delay {} ns",
            configured_address,
            propagation_delay
        );

        master
            .slave_ref(configured_address)
            .write(RegisterAddress::DcSystemTimeTransmissionDelay)
            .send(master, propagation_delay)
            .await?;
    }

    if let Some(reference) = reference {
        // Seed system time distribution with a single multi-write
        Command::frmw(reference, RegisterAddress::DcSystemTime.into())
            .ignore_wkc()
            .receive::<u64>(master)
            .await?;
    }

    fmt::debug!("Distributed clock config complete");

    Ok(reference)
}

/// Distribute the reference clock through the network until slave clocks
/// settle.
pub(crate) async fn run_dc_static_sync(
    master: &Master<'_>,
    reference: u16,
    iterations: u32,
) -> Result<(), Error> {
    fmt::debug!(
        "Performing static drift compensation using slave {:#06x} as reference. This can take some time...",
        reference
    );

    for _ in 0..iterations {
        Command::frmw(reference, RegisterAddress::DcSystemTime.into())
            .ignore_wkc()
            .receive::<u64>(master)
            .await?;
    }

    fmt::debug!("Static drift compensation complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_of(control: &DcControl, rtc: u64, dc: u64) -> i64 {
        control.observe(rtc, dc);

        control.act_diff()
    }

    #[test]
    fn act_diff_signed_wrap() {
        let control = DcControl::new(ClockMode::ReferenceClock);

        control.set_cycle_interval(core::time::Duration::from_millis(1));

        // Small positive phase error
        assert_eq!(diff_of(&control, 1_000_300, 1_000_000), 300);

        // An error over half a cycle wraps negative
        assert_eq!(diff_of(&control, 1_900_000, 1_000_000), -100_000);

        // DC ahead of the master
        assert_eq!(diff_of(&control, 1_000_000, 1_000_200), -200);
    }

    #[test]
    fn pi_controller_tracks_constant_offset() {
        let control = DcControl::new(ClockMode::ReferenceClock);

        control.set_cycle_interval(core::time::Duration::from_millis(1));

        // A constant 100 ns error: proportional part is 100, integral
        // climbs to its clamp
        for _ in 0..200 {
            control.observe(2_000_100, 2_000_000);
        }

        let correction = control.timer_correction_ns();

        assert_eq!(control.act_diff(), 100);
        assert!((correction - (100.0 + INTEGRAL_LIMIT)).abs() < f64::EPSILON);
    }

    #[test]
    fn master_clock_mode_half_nudges() {
        let control = DcControl::new(ClockMode::MasterClock);

        control.set_cycle_interval(core::time::Duration::from_millis(1));

        control.record_reference(0, 1000);

        assert_eq!(
            control.observe(5_000_200, 5_000_000),
            DcCorrection::WriteReferenceOffset(1100)
        );
        assert_eq!(
            control.observe(5_001_200, 5_001_000),
            DcCorrection::WriteReferenceOffset(1200)
        );
    }

    #[test]
    fn no_interval_no_correction() {
        let control = DcControl::new(ClockMode::ReferenceClock);

        assert_eq!(control.observe(123, 456), DcCorrection::None);
        assert_eq!(control.timer_correction_ns(), 0.0);
    }

    // Propagation delay calculation is covered end to end by the emulated
    // three slave chain integration test, which drives `configure_dc`
    // against latched port times and checks the programmed delay registers.
}
