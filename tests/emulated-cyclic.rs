//! Take an emulated two slave group to OP and drive the cyclic process
//! data exchange: logical read/write data movement, working counters,
//! distributed clock sync and the cycle divisor.

mod util;

use catline::{DatagramStorage, Master, MasterConfig, Timeouts, std::ethercat_now};
use std::sync::{Arc, Mutex};
use util::EmulatedSlave;

const MAX_SLAVES: usize = 16;
const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(1100);
const MAX_FRAMES: usize = 32;
const MAX_PDI: usize = 64;

#[tokio::test]
async fn cyclic_exchange_in_op() {
    let _ = env_logger::builder().is_test(true).try_init();

    static STORAGE: DatagramStorage<MAX_FRAMES, FRAME_SIZE> = DatagramStorage::new();

    let (tx, rx, dgram_loop) = STORAGE.try_split().expect("can only split once");

    let master = Master::new(
        dgram_loop,
        Timeouts {
            wait_loop_delay: core::time::Duration::from_micros(100),
            ..Timeouts::default()
        },
        MasterConfig {
            dc_static_sync_iterations: 0,
            ..MasterConfig::default()
        },
    );

    let slaves = Arc::new(Mutex::new(vec![
        EmulatedSlave::new("EMU2004", 0x0a, [0, 800, 0, 0], 5_000),
        EmulatedSlave::new("EMU3104", 0x02, [400, 0, 0, 0], 5_400),
    ]));

    util::spawn_bus(tx, rx, slaves.clone());

    let group = master
        .init_single_group::<MAX_SLAVES, MAX_PDI>(ethercat_now)
        .await
        .expect("init");

    // Both devices support LRW, so the group maps one overlapping window:
    // 2 output and 2 input bytes per device
    let group = group.into_op(&master).await.expect("OP");

    {
        let mut emulated = slaves.lock().unwrap();

        // Seed the devices' input process data (SM3 area)
        emulated[0].set_memory(0x1180, &[0x11, 0x22]);
        emulated[1].set_memory(0x1180, &[0x33, 0x44]);

        // System time echoed by the DC reference
        emulated[0].set_memory(0x0910, &5_000_000u64.to_le_bytes());
    }

    {
        let mut first = group.slave(&master, 0).expect("slave 0");

        first.outputs_raw_mut().copy_from_slice(&[0xaa, 0xbb]);
    }

    {
        let mut second = group.slave(&master, 1).expect("slave 1");

        second.outputs_raw_mut().copy_from_slice(&[0xcc, 0xdd]);
    }

    let response = group.tx_rx(&master).await.expect("tx/rx");

    assert!(response.exchanged);
    // Each device reads (+1) and writes (+2) the shared LRW window
    assert_eq!(response.working_counter, 6);
    assert_eq!(response.dc_system_time, None);

    // Inputs were hydrated from the devices...
    {
        let first = group.slave(&master, 0).expect("slave 0");

        assert_eq!(first.inputs_raw(), &[0x11, 0x22]);
    }

    {
        let second = group.slave(&master, 1).expect("slave 1");

        assert_eq!(second.inputs_raw(), &[0x33, 0x44]);
    }

    // ...and outputs landed in the devices' SM2 areas
    {
        let emulated = slaves.lock().unwrap();

        assert_eq!(emulated[0].memory(0x1100, 2), vec![0xaa, 0xbb]);
        assert_eq!(emulated[1].memory(0x1100, 2), vec![0xcc, 0xdd]);
    }

    // The DC variant leads the cycle with an FRMW time distribution and
    // feeds the returned time into the clock discipline
    master
        .dc()
        .set_cycle_interval(core::time::Duration::from_millis(1));

    let response = group.tx_rx_dc(&master, 5_000_300).await.expect("tx/rx dc");

    assert!(response.exchanged);
    assert_eq!(response.working_counter, 6);
    assert_eq!(response.dc_system_time, Some(5_000_000));
    // Master timestamp 5_000_300 vs reference time 5_000_000
    assert_eq!(master.dc().act_diff(), 300);

    // With a divisor of 2 every other tick is skipped
    group.set_cycle_divisor(2);

    let first = group.tx_rx(&master).await.expect("tx/rx");
    let second = group.tx_rx(&master).await.expect("tx/rx");

    assert_eq!(
        (first.exchanged, second.exchanged),
        (true, false),
        "cycle divisor must skip alternate ticks"
    );
}
