//! Propagation delay measurement over a three slave chain, driven through
//! the real DC configuration path during init.

mod util;

use catline::{DatagramStorage, Master, MasterConfig, Timeouts, std::ethercat_now};
use std::sync::{Arc, Mutex};
use util::EmulatedSlave;

const MAX_SLAVES: usize = 16;
const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(1100);
const MAX_FRAMES: usize = 32;
const MAX_PDI: usize = 64;

#[tokio::test]
async fn three_slave_chain_delays() {
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
            dc_static_sync_iterations: 4,
            ..MasterConfig::default()
        },
    );

    // A line of three devices with 400 ns then 800 ns of wire delay: entry
    // port times 0/400/1200 on the way out, and the turned-around frame is
    // latched again at 2000 by the middle device and 2400 by the first.
    // Forward and return delays are symmetric, so the programmed system
    // delays must come out at 0, 400 and 1200.
    let slaves = Arc::new(Mutex::new(vec![
        EmulatedSlave::new("EMU1100", 0x0a, [0, 2400, 0, 0], 5_000),
        EmulatedSlave::new("EMU2004", 0x0a, [400, 2000, 0, 0], 5_400),
        EmulatedSlave::new("EMU3104", 0x02, [1200, 0, 0, 0], 6_200),
    ]));

    util::spawn_bus(tx, rx, slaves.clone());

    let group = master
        .init_single_group::<MAX_SLAVES, MAX_PDI>(ethercat_now)
        .await
        .expect("init");

    assert_eq!(group.len(), 3);

    for (index, expected) in [(0usize, 0u32), (1, 400), (2, 1200)] {
        let slave = group.slave(&master, index).expect("slave");

        assert_eq!(
            slave.propagation_delay(),
            expected,
            "slave {} delay",
            index
        );
    }

    // The chain is a line: each device hangs off the previous one
    assert_eq!(group.slave(&master, 0).expect("slave").parent_index(), None);
    assert_eq!(
        group.slave(&master, 1).expect("slave").parent_index(),
        Some(0)
    );
    assert_eq!(
        group.slave(&master, 2).expect("slave").parent_index(),
        Some(1)
    );

    // The devices' system delay registers were programmed to match
    {
        let emulated = slaves.lock().unwrap();

        assert_eq!(emulated[0].reg_u32(0x0928), 0);
        assert_eq!(emulated[1].reg_u32(0x0928), 400);
        assert_eq!(emulated[2].reg_u32(0x0928), 1200);
    }
}
