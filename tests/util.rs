#![allow(dead_code)]

//! An in-memory EtherCAT bus emulator.
//!
//! Frames claimed from the TX handle are walked through a chain of emulated
//! slaves — each applying its datagram segment and bumping the working
//! counter like real hardware — and fed straight back into the RX handle.

use catline::{DatagramRx, DatagramTx};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

const MAILBOX_SIZE: usize = 128;
const SM0_ADDR: u16 = 0x1000;
const SM1_ADDR: u16 = 0x1080;

/// FoE payload bytes per mailbox message: mailbox size minus mailbox header
/// (6) and FoE header + packet number (6).
pub const FOE_CHUNK: usize = MAILBOX_SIZE - 6 - 6;

pub struct EmulatedSlave {
    /// Sparse byte-addressed register file, doubling as process data
    /// memory.
    regs: BTreeMap<u16, u8>,
    eeprom: Vec<u8>,
    eeprom_addr: u16,
    pub fixed_address: u16,
    al_status: u8,
    /// Pending send-mailbox (SM1) messages, oldest first.
    mailbox_responses: VecDeque<Vec<u8>>,
    mailbox_counter: u8,
    pub sdo_store: BTreeMap<(u16, u8), Vec<u8>>,
    pub foe_files: BTreeMap<String, Vec<u8>>,
    foe_write: Option<(String, Vec<u8>)>,
}

fn put(img: &mut [u8], offset: usize, bytes: &[u8]) {
    img[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Build a synthetic SII image: identity, mailbox config, general, strings,
/// sync manager and FMMU categories.
pub fn eeprom_image(name: &str) -> Vec<u8> {
    let mut img = vec![0u8; 0x80];

    // Identity block at word 0x0008
    put(&mut img, 0x10, &0x0000_0539u32.to_le_bytes()); // vendor
    put(&mut img, 0x14, &0x0bad_cafeu32.to_le_bytes()); // product
    put(&mut img, 0x18, &1u32.to_le_bytes()); // revision
    put(&mut img, 0x1c, &42u32.to_le_bytes()); // serial

    // Bootstrap mailbox at word 0x0014, standard at word 0x0018
    for base in [0x28usize, 0x30] {
        put(&mut img, base, &SM0_ADDR.to_le_bytes());
        put(&mut img, base + 2, &(MAILBOX_SIZE as u16).to_le_bytes());
        put(&mut img, base + 4, &SM1_ADDR.to_le_bytes());
        put(&mut img, base + 6, &(MAILBOX_SIZE as u16).to_le_bytes());
    }

    // Supported protocols at word 0x001c: EoE | CoE | FoE
    put(&mut img, 0x38, &0x000eu16.to_le_bytes());

    // Category area from word 0x0040
    let mut cat = |type_: u16, data: &[u8]| {
        let mut padded = data.to_vec();

        if padded.len() % 2 != 0 {
            padded.push(0);
        }

        img.extend_from_slice(&type_.to_le_bytes());
        img.extend_from_slice(&((padded.len() / 2) as u16).to_le_bytes());
        img.extend_from_slice(&padded);
    };

    // General: name is string 1, SDO support enabled
    cat(30, &[0, 0, 0, 1, 0, 0x01, 1, 0, 0, 0]);

    // Strings
    let mut strings = vec![1u8, name.len() as u8];
    strings.extend_from_slice(name.as_bytes());
    cat(10, &strings);

    // Sync managers: mailbox out/in, process data out/in
    #[rustfmt::skip]
    cat(41, &[
        0x00, 0x10, 0x80, 0x00, 0x26, 0x00, 0x01, 0x01,
        0x80, 0x10, 0x80, 0x00, 0x22, 0x00, 0x01, 0x02,
        0x00, 0x11, 0x00, 0x00, 0x64, 0x00, 0x01, 0x03,
        0x80, 0x11, 0x00, 0x00, 0x20, 0x00, 0x01, 0x04,
    ]);

    // FMMUs: outputs, inputs
    cat(40, &[1, 2]);

    // End marker
    img.extend_from_slice(&0xffffu16.to_le_bytes());
    img.extend_from_slice(&0u16.to_le_bytes());

    img
}

impl EmulatedSlave {
    /// An emulated device with DC support.
    ///
    /// `dl_status_high` carries the loopback/signal bits of DL status, e.g.
    /// `0x0a` for two active ports.
    pub fn new(name: &str, dl_status_high: u8, port_times: [u32; 4], receive_time: u64) -> Self {
        let mut regs = BTreeMap::new();

        let mut set = |addr: u16, bytes: &[u8]| {
            for (i, byte) in bytes.iter().enumerate() {
                regs.insert(addr + i as u16, *byte);
            }
        };

        // Type
        set(0x0000, &[0x11]);
        // Support flags: DC (64 bit) + LRW
        set(0x0008, &0x020cu16.to_le_bytes());
        // DL status
        set(0x0110, &[0x00, dl_status_high]);

        // Latched DC port receive times
        for (port, time) in port_times.iter().enumerate() {
            set(0x0900 + port as u16 * 4, &time.to_le_bytes());
        }

        set(0x0918, &receive_time.to_le_bytes());

        let mut sdo_store = BTreeMap::new();

        // Sync manager communication types at 0x1C00
        sdo_store.insert((0x1c00, 0), vec![4u8]);
        sdo_store.insert((0x1c00, 1), vec![1u8]);
        sdo_store.insert((0x1c00, 2), vec![2u8]);
        sdo_store.insert((0x1c00, 3), vec![3u8]);
        sdo_store.insert((0x1c00, 4), vec![4u8]);

        // PDO assignments: one RxPDO with a 16 bit entry on SM2, one TxPDO
        // with a 16 bit entry on SM3
        sdo_store.insert((0x1c12, 0), vec![1u8]);
        sdo_store.insert((0x1c12, 1), 0x1600u16.to_le_bytes().to_vec());
        sdo_store.insert((0x1600, 0), vec![1u8]);
        sdo_store.insert((0x1600, 1), 0x7000_0110u32.to_le_bytes().to_vec());

        sdo_store.insert((0x1c13, 0), vec![1u8]);
        sdo_store.insert((0x1c13, 1), 0x1a00u16.to_le_bytes().to_vec());
        sdo_store.insert((0x1a00, 0), vec![1u8]);
        sdo_store.insert((0x1a00, 1), 0x6000_0110u32.to_le_bytes().to_vec());

        Self {
            regs,
            eeprom: eeprom_image(name),
            eeprom_addr: 0,
            fixed_address: 0,
            al_status: 0x01,
            mailbox_responses: VecDeque::new(),
            mailbox_counter: 0,
            sdo_store,
            foe_files: BTreeMap::new(),
            foe_write: None,
        }
    }

    pub fn reg(&self, addr: u16) -> u8 {
        *self.regs.get(&addr).unwrap_or(&0)
    }

    pub fn reg_u32(&self, addr: u16) -> u32 {
        u32::from_le_bytes([
            self.reg(addr),
            self.reg(addr + 1),
            self.reg(addr + 2),
            self.reg(addr + 3),
        ])
    }

    /// Write into the device's memory, e.g. to seed process data inputs.
    pub fn set_memory(&mut self, addr: u16, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.regs.insert(addr + i as u16, *byte);
        }
    }

    /// Read back a run of the device's memory, e.g. delivered process data
    /// outputs.
    pub fn memory(&self, addr: u16, len: usize) -> Vec<u8> {
        (0..len).map(|i| self.reg(addr + i as u16)).collect()
    }

    /// Queue an unsolicited tunnelled Ethernet frame as a single EoE
    /// fragment, as a slave would when it has traffic for the master.
    pub fn inject_eoe_frame(&mut self, frame: &[u8]) {
        assert!(frame.len() <= 32 * 63, "frame too long for one fragment");

        let mut payload = vec![0u8; 4 + frame.len()];

        // Frame type 0 (fragment data), port 0
        payload[0] = 0x00;
        // Last fragment
        payload[1] = 0x01;

        let blocks = frame.len().div_ceil(32) as u16;
        let word = (blocks << 6) | (9 << 12);

        payload[2..4].copy_from_slice(&word.to_le_bytes());
        payload[4..].copy_from_slice(frame);

        self.respond_mailbox(2, payload);
    }

    fn next_counter(&mut self) -> u8 {
        self.mailbox_counter = if self.mailbox_counter >= 7 {
            1
        } else {
            self.mailbox_counter + 1
        };

        self.mailbox_counter
    }

    /// Apply a read command. Returns `false` if the read must not bump the
    /// working counter (an empty mailbox).
    fn read(&mut self, ado: u16, out: &mut [u8]) -> bool {
        // Send mailbox: pop the oldest pending response
        if ado == SM1_ADDR {
            let Some(response) = self.mailbox_responses.pop_front() else {
                return false;
            };

            let len = response.len().min(out.len());

            out[0..len].copy_from_slice(&response[0..len]);

            return true;
        }

        for (i, byte) in out.iter_mut().enumerate() {
            let addr = ado + i as u16;

            *byte = match addr {
                // AL status word
                0x0130 => self.al_status,
                0x0131 => 0,
                // SM1 status byte: mailbox full flag
                0x080d => {
                    if self.mailbox_responses.is_empty() {
                        0x00
                    } else {
                        0x08
                    }
                }
                // SII control: never busy, no errors
                0x0502 | 0x0503 => 0,
                // SII data
                0x0508..=0x050b => {
                    let offset = usize::from(self.eeprom_addr) * 2 + usize::from(addr - 0x0508);

                    self.eeprom.get(offset).copied().unwrap_or(0xff)
                }
                other => self.reg(other),
            };
        }

        true
    }

    fn write(&mut self, ado: u16, data: &[u8]) -> bool {
        match ado {
            // AL control: transition immediately
            0x0120 => {
                self.al_status = data[0] & 0x0f;
            }
            // SII control + address in one write
            0x0502 if data.len() >= 4 => {
                // Read operation requested
                if data[1] & 0x01 != 0 {
                    self.eeprom_addr = u16::from_le_bytes([data[2], data[3]]);
                }
            }
            // Receive mailbox: a complete request
            SM0_ADDR => {
                self.handle_mailbox(data);
            }
            0x0010 if data.len() >= 2 => {
                self.fixed_address = u16::from_le_bytes([data[0], data[1]]);

                for (i, byte) in data.iter().enumerate() {
                    self.regs.insert(ado + i as u16, *byte);
                }
            }
            _ => {
                for (i, byte) in data.iter().enumerate() {
                    self.regs.insert(ado + i as u16, *byte);
                }
            }
        }

        true
    }

    /// Apply a logical command (LRD/LWR/LRW) through this device's
    /// programmed FMMUs, returning its working counter contribution: +1 for
    /// a successful read, +1 (LWR) or +2 (LRW) for a successful write.
    fn apply_logical(&mut self, command: u8, dg_start: u32, payload: &mut [u8]) -> u16 {
        let dg_end = dg_start + payload.len() as u32;

        let mut read_hit = false;
        let mut write_hit = false;

        for fmmu in 0..16u16 {
            let base = 0x0600 + fmmu * 0x10;

            // FMMU enable flag
            if self.reg(base + 12) & 0x01 == 0 {
                continue;
            }

            let logical_start = self.reg_u32(base);
            let length = u32::from(u16::from_le_bytes([self.reg(base + 4), self.reg(base + 5)]));
            let physical_start = u16::from_le_bytes([self.reg(base + 8), self.reg(base + 9)]);
            let direction = self.reg(base + 11);

            let start = logical_start.max(dg_start);
            let end = (logical_start + length).min(dg_end);

            for address in start..end {
                let payload_offset = (address - dg_start) as usize;
                let physical = physical_start + (address - logical_start) as u16;

                // Outputs land in slave memory before inputs are read back,
                // like the in-line processing of real hardware
                if direction & 0x02 != 0 && matches!(command, 0x0b | 0x0c) {
                    self.regs.insert(physical, payload[payload_offset]);

                    write_hit = true;
                }

                if direction & 0x01 != 0 && matches!(command, 0x0a | 0x0c) {
                    payload[payload_offset] = self.reg(physical);

                    read_hit = true;
                }
            }
        }

        match command {
            0x0a => u16::from(read_hit),
            0x0b => u16::from(write_hit),
            _ => u16::from(read_hit) + 2 * u16::from(write_hit),
        }
    }

    fn respond_mailbox(&mut self, mailbox_type: u8, payload: Vec<u8>) {
        let mut frame = vec![0u8; 6 + payload.len()];

        frame[0..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        frame[5] = (mailbox_type & 0x0f) | (self.next_counter() << 4);
        frame[6..].copy_from_slice(&payload);

        self.mailbox_responses.push_back(frame);
    }

    fn handle_mailbox(&mut self, data: &[u8]) {
        let len = usize::from(u16::from_le_bytes([data[0], data[1]]));
        let mailbox_type = data[5] & 0x0f;

        let payload = &data[6..6 + len];

        match mailbox_type {
            // CoE
            3 => self.handle_coe(&payload.to_vec()),
            // FoE
            4 => self.handle_foe(&payload.to_vec()),
            _ => (),
        }
    }

    fn handle_coe(&mut self, payload: &[u8]) {
        let service = payload[1] >> 4;

        // Only SDO requests are emulated
        if service != 0x02 {
            return;
        }

        let flags = payload[2];
        let command = flags >> 5;
        let index = u16::from_le_bytes([payload[3], payload[4]]);
        let sub_index = payload[5];

        match command {
            // Upload request
            0x02 => match self.sdo_store.get(&(index, sub_index)) {
                Some(value) if value.len() <= 4 => {
                    let mut response = vec![0u8; 10];

                    // CoE header: SDO response
                    response[1] = 0x30;
                    // Expedited upload response with size indicator
                    response[2] =
                        (0x02 << 5) | 0x02 | 0x01 | (((4 - value.len()) as u8) << 2);
                    response[3..5].copy_from_slice(&index.to_le_bytes());
                    response[5] = sub_index;
                    response[6..6 + value.len()].copy_from_slice(value);

                    self.respond_mailbox(3, response);
                }
                _ => self.respond_abort(index, sub_index),
            },
            // Expedited download request
            0x01 => {
                let unused = usize::from((flags >> 2) & 0x03);

                let value = payload[6..10 - unused].to_vec();

                self.sdo_store.insert((index, sub_index), value);

                let mut response = vec![0u8; 10];

                response[1] = 0x30;
                // Download response
                response[2] = 0x03 << 5;
                response[3..5].copy_from_slice(&index.to_le_bytes());
                response[5] = sub_index;

                self.respond_mailbox(3, response);
            }
            _ => self.respond_abort(index, sub_index),
        }
    }

    fn respond_abort(&mut self, index: u16, sub_index: u8) {
        let mut response = vec![0u8; 10];

        response[1] = 0x30;
        // Abort request, object does not exist
        response[2] = 0x04 << 5;
        response[3..5].copy_from_slice(&index.to_le_bytes());
        response[5] = sub_index;
        response[6..10].copy_from_slice(&0x0602_0000u32.to_le_bytes());

        self.respond_mailbox(3, response);
    }

    fn handle_foe(&mut self, payload: &[u8]) {
        let op_code = payload[0];
        let field = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]);

        match op_code {
            // Read request
            0x01 => {
                let name = String::from_utf8_lossy(&payload[6..]).into_owned();

                match self.foe_files.get(&name) {
                    Some(contents) => {
                        assert!(
                            contents.len() < FOE_CHUNK,
                            "emulator only supports single packet files"
                        );

                        let mut response = vec![0u8; 6 + contents.len()];

                        response[0] = 0x03; // data
                        response[2..6].copy_from_slice(&1u32.to_le_bytes());
                        response[6..].copy_from_slice(contents);

                        self.respond_mailbox(4, response);
                    }
                    None => {
                        let mut response = vec![0u8; 6];

                        response[0] = 0x05; // error
                        response[2..6].copy_from_slice(&0x8001u32.to_le_bytes());

                        self.respond_mailbox(4, response);
                    }
                }
            }
            // Write request
            0x02 => {
                let name = String::from_utf8_lossy(&payload[6..]).into_owned();

                self.foe_write = Some((name, Vec::new()));

                let mut response = vec![0u8; 6];

                response[0] = 0x04; // ack
                response[2..6].copy_from_slice(&0u32.to_le_bytes());

                self.respond_mailbox(4, response);
            }
            // Data
            0x03 => {
                let chunk = &payload[6..];

                let finished = chunk.len() < FOE_CHUNK;

                if let Some((_, contents)) = self.foe_write.as_mut() {
                    contents.extend_from_slice(chunk);
                }

                if finished {
                    if let Some((name, contents)) = self.foe_write.take() {
                        self.foe_files.insert(name, contents);
                    }
                }

                let mut response = vec![0u8; 6];

                response[0] = 0x04; // ack
                response[2..6].copy_from_slice(&field.to_le_bytes());

                self.respond_mailbox(4, response);
            }
            // Ack of a data packet during read: no reply
            0x04 => (),
            other => panic!("unhandled FoE op {other:#04x}"),
        }
    }
}

/// Walk one Ethernet frame through the emulated slave chain, mutating it
/// like the ring would.
pub fn process_frame(slaves: &mut [EmulatedSlave], bytes: &mut [u8]) {
    // The first slave sets the U/L bit of the source MAC
    bytes[6] |= 0x02;

    let payload_len = usize::from(u16::from_le_bytes([bytes[14], bytes[15]]) & 0x07ff);

    let mut offset = 16;
    let end = 16 + payload_len;

    while offset + 12 <= end {
        let command = bytes[offset];
        let adp = u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]);
        let ado = u16::from_le_bytes([bytes[offset + 4], bytes[offset + 5]]);
        let len = usize::from(
            u16::from_le_bytes([bytes[offset + 6], bytes[offset + 7]]) & 0x07ff,
        );

        let payload_range = offset + 10..offset + 10 + len;
        let wkc_range = payload_range.end..payload_range.end + 2;

        let mut wkc = 0u16;

        {
            let payload = &mut bytes[payload_range];

            match command {
                // APRD/APWR: positional, the address counts up as the frame
                // passes each slave
                0x01 | 0x02 => {
                    let mut position = adp;

                    for slave in slaves.iter_mut() {
                        if position == 0 {
                            let executed = if command == 0x01 {
                                slave.read(ado, payload)
                            } else {
                                slave.write(ado, payload)
                            };

                            if executed {
                                wkc += 1;
                            }
                        }

                        position = position.wrapping_add(1);
                    }
                }
                // FPRD/FPWR: configured address
                0x04 | 0x05 => {
                    for slave in slaves.iter_mut() {
                        if slave.fixed_address == adp {
                            let executed = if command == 0x04 {
                                slave.read(ado, payload)
                            } else {
                                slave.write(ado, payload)
                            };

                            if executed {
                                wkc += 1;
                            }
                        }
                    }
                }
                // BRD/BWR: every slave
                0x07 | 0x08 => {
                    for slave in slaves.iter_mut() {
                        let executed = if command == 0x07 {
                            slave.read(ado, payload)
                        } else {
                            slave.write(ado, payload)
                        };

                        if executed {
                            wkc += 1;
                        }
                    }
                }
                // FRMW: read from the addressed slave, write to the rest
                0x0e => {
                    let mut value = vec![0u8; len];

                    for slave in slaves.iter_mut() {
                        if slave.fixed_address == adp && slave.read(ado, &mut value) {
                            wkc += 1;
                        }
                    }

                    payload.copy_from_slice(&value);

                    for slave in slaves.iter_mut() {
                        if slave.fixed_address != adp && slave.write(ado, &value) {
                            wkc += 1;
                        }
                    }
                }
                // LRD/LWR/LRW: logical addressing through each slave's
                // programmed FMMUs
                0x0a | 0x0b | 0x0c => {
                    let logical = u32::from(adp) | u32::from(ado) << 16;

                    for slave in slaves.iter_mut() {
                        wkc += slave.apply_logical(command, logical, payload);
                    }
                }
                _ => (),
            }
        }

        let wkc = wkc.to_le_bytes();

        bytes[wkc_range.start] = wkc[0];
        bytes[wkc_range.start + 1] = wkc[1];

        offset += 10 + len + 2;
    }
}

/// Spawn the TX/RX pump connecting the datagram engine to the emulated bus.
pub fn spawn_bus(
    mut tx: DatagramTx<'static>,
    mut rx: DatagramRx<'static>,
    slaves: Arc<Mutex<Vec<EmulatedSlave>>>,
) {
    tokio::spawn(async move {
        loop {
            let mut idle = true;

            while let Some(frame) = tx.next_sendable_frame() {
                idle = false;

                let mut bytes = Vec::new();

                frame
                    .send_blocking(|raw| {
                        bytes.extend_from_slice(raw);

                        Ok(raw.len())
                    })
                    .expect("emulated send");

                process_frame(&mut slaves.lock().unwrap(), &mut bytes);

                let _ = rx.receive_frame(&bytes);
            }

            if idle {
                tokio::time::sleep(std::time::Duration::from_micros(100)).await;
            }
        }
    });
}
