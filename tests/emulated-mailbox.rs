//! Mailbox protocol round trips against the emulated bus: expedited SDO
//! write-then-read, abort decoding, and FoE file write-then-read.

mod util;

use catline::{
    DatagramStorage, Master, MasterConfig, Timeouts,
    error::{CoeAbortCode, Error, FoeError, MailboxError},
    std::ethercat_now,
};
use std::sync::{Arc, Mutex};
use util::EmulatedSlave;

const MAX_SLAVES: usize = 16;
const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(1100);
const MAX_FRAMES: usize = 32;
const MAX_PDI: usize = 64;

#[tokio::test]
async fn sdo_and_foe_roundtrips() {
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

    let slaves = Arc::new(Mutex::new(vec![EmulatedSlave::new(
        "EMUDRIVE",
        0x02,
        [0, 0, 0, 0],
        1_000,
    )]));

    util::spawn_bus(tx, rx, slaves.clone());

    let group = master
        .init_single_group::<MAX_SLAVES, MAX_PDI>(ethercat_now)
        .await
        .expect("init");

    let slave = group.slave(&master, 0).expect("slave 0");

    // Expedited write followed by a read must return the written value
    slave
        .sdo_write(0x6060, 0, 0x08u8)
        .await
        .expect("sdo write");

    assert_eq!(slave.sdo_read::<u8>(0x6060, 0).await, Ok(0x08));

    // The byte must actually be in the device's object store
    assert_eq!(
        slaves.lock().unwrap()[0].sdo_store.get(&(0x6060, 0)),
        Some(&vec![0x08u8])
    );

    // Reading an object that does not exist must surface the abort code
    assert_eq!(
        slave.sdo_read::<u8>(0x5999, 0).await,
        Err(Error::Mailbox(MailboxError::Aborted {
            code: CoeAbortCode::NotFound,
            address: 0x5999,
            sub_index: 0,
        }))
    );

    // FoE: write a file, read it back unchanged
    let payload = [0xaau8, 0xbb, 0xcc];

    slave
        .foe_write("test.bin", 0, &payload)
        .await
        .expect("foe write");

    let mut buf = [0u8; 64];

    let read_back = slave
        .foe_read("test.bin", 0, &mut buf)
        .await
        .expect("foe read");

    assert_eq!(read_back, &payload);

    // A missing file surfaces the FoE error request
    let result = slave.foe_read("nope.bin", 0, &mut buf).await;

    assert_eq!(
        result.map(<[u8]>::len),
        Err(Error::Foe(FoeError::ErrorRequest { code: 0x8001 }))
    );

    // A tunnelled Ethernet frame arriving while an SDO transfer is in
    // flight must be queued in the device's EoE receive pool, not dropped
    let tunnelled = [0x5au8, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60, 0x61];

    slaves.lock().unwrap()[0].inject_eoe_frame(&tunnelled);

    // The SDO read pops the EoE message off the mailbox first and still
    // completes
    assert_eq!(slave.sdo_read::<u8>(0x6060, 0).await, Ok(0x08));

    // The queued fragment is then reassembled without any new wire traffic
    let mut eoe_buf = [0u8; 64];

    let frame = slave
        .eoe_receive_frame(&mut eoe_buf)
        .await
        .expect("eoe receive");

    assert_eq!(frame, &tunnelled[..]);
}
