//! Bring a two slave bus up to PRE-OP against the in-memory emulator:
//! discovery, station addressing, topology, distributed clock delays and
//! EEPROM-derived descriptors.

mod util;

use catline::{DatagramStorage, Master, MasterConfig, Timeouts, std::ethercat_now};
use std::sync::{Arc, Mutex};
use util::EmulatedSlave;

const MAX_SLAVES: usize = 16;
const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(1100);
const MAX_FRAMES: usize = 32;
const MAX_PDI: usize = 64;

#[tokio::test]
async fn two_slave_scan() {
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

    // A line of two devices: the first has its in and out ports up, the
    // second is the chain end. Port receive times model 400 ns of wire
    // delay between them.
    let slaves = Arc::new(Mutex::new(vec![
        EmulatedSlave::new("EMU2004", 0x0a, [0, 800, 0, 0], 5_000),
        EmulatedSlave::new("EMU3104", 0x02, [400, 0, 0, 0], 5_400),
    ]));

    util::spawn_bus(tx, rx, slaves.clone());

    let group = master
        .init_single_group::<MAX_SLAVES, MAX_PDI>(ethercat_now)
        .await
        .expect("init");

    assert_eq!(master.num_slaves(), 2);
    assert_eq!(group.len(), 2);

    {
        let first = group.slave(&master, 0).expect("slave 0");

        assert_eq!(first.configured_address(), 1000);
        assert_eq!(first.name(), "EMU2004");
        assert_eq!(first.identity().vendor_id, 0x0539);
        assert_eq!(first.parent_index(), None);
        assert_eq!(first.propagation_delay(), 0);
    }

    {
        let second = group.slave(&master, 1).expect("slave 1");

        assert_eq!(second.configured_address(), 1001);
        assert_eq!(second.name(), "EMU3104");
        assert_eq!(second.parent_index(), Some(0));
        // Half the 800 ns loop delta measured at the first slave
        assert_eq!(second.propagation_delay(), 400);
    }

    // The scan must have assigned the station addresses on the wire too
    {
        let emulated = slaves.lock().unwrap();

        assert_eq!(emulated[0].fixed_address, 1000);
        assert_eq!(emulated[1].fixed_address, 1001);

        // The second slave's propagation delay register was programmed
        assert_eq!(emulated[1].reg_u32(0x0928), 400);

        // Mailbox sync managers were configured from the EEPROM layout
        assert_eq!(emulated[0].reg(0x0800), 0x00);
        assert_eq!(emulated[0].reg(0x0801), 0x10);
        assert_eq!(emulated[0].reg(0x0804), 0x26);
        assert_eq!(emulated[0].reg(0x0808), 0x80);
        assert_eq!(emulated[0].reg(0x080c), 0x22);
    }
}
