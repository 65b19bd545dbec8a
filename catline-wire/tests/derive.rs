//! Round trips through the derives, checked against hand-packed bytes.

use catline_wire::{WireRead, WireReadWrite, WireSized, WireWrite, WireWriteSized};
use pretty_assertions::assert_eq;

#[derive(Debug, PartialEq, Eq, Copy, Clone, WireReadWrite)]
#[wire(bytes = 2)]
struct StatusWord {
    #[wire(bits = 4)]
    state: u8,
    #[wire(bits = 1)]
    error: bool,
    #[wire(bits = 1, post_skip = 2)]
    toggled: bool,
    #[wire(bytes = 1)]
    count: u8,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, WireReadWrite)]
#[repr(u8)]
enum Opcode {
    Nop = 0x00,
    Read = 0x01,
    #[wire(alternatives = [0x03, 0x04])]
    Write = 0x02,
    #[wire(catch_all)]
    Unknown(u8),
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, WireReadWrite)]
#[wire(bytes = 4)]
struct Nested {
    #[wire(bits = 8)]
    op: Opcode,
    #[wire(bits = 8)]
    sub: StatusNibbles,
    #[wire(bytes = 2)]
    address: u16,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, WireReadWrite)]
#[wire(bytes = 1)]
struct StatusNibbles {
    #[wire(bits = 4)]
    low: u8,
    #[wire(bits = 4)]
    high: u8,
}

#[test]
fn bit_fields_pack() {
    let status = StatusWord {
        state: 0x04,
        error: true,
        toggled: false,
        count: 0xaa,
    };

    assert_eq!(status.pack(), [0x04 | 0x10, 0xaa]);
}

#[test]
fn bit_fields_unpack() {
    let parsed = StatusWord::unpack_from_slice(&[0x04 | 0x10 | 0x20, 0x07]).unwrap();

    assert_eq!(
        parsed,
        StatusWord {
            state: 0x04,
            error: true,
            toggled: true,
            count: 0x07,
        }
    );
}

#[test]
fn unpack_too_short() {
    assert!(StatusWord::unpack_from_slice(&[0x00]).is_err());
}

#[test]
fn enum_alternatives() {
    assert_eq!(Opcode::unpack_from_slice(&[0x00]), Ok(Opcode::Nop));
    assert_eq!(Opcode::unpack_from_slice(&[0x03]), Ok(Opcode::Write));
    assert_eq!(Opcode::unpack_from_slice(&[0x04]), Ok(Opcode::Write));

    // Packs as the canonical discriminant, not an alternative
    assert_eq!(Opcode::Write.pack(), [0x02]);
}

#[test]
fn enum_catch_all() {
    assert_eq!(Opcode::unpack_from_slice(&[0xfe]), Ok(Opcode::Unknown(0xfe)));
    assert_eq!(Opcode::Unknown(0xfe).pack(), [0xfe]);
}

#[test]
fn nested_roundtrip() {
    let item = Nested {
        op: Opcode::Read,
        sub: StatusNibbles { low: 0x2, high: 0xf },
        address: 0x1000,
    };

    let packed = item.pack();

    assert_eq!(packed, [0x01, 0xf2, 0x00, 0x10]);
    assert_eq!(Nested::unpack_from_slice(&packed), Ok(item));
}

#[test]
fn sized_buffer() {
    assert_eq!(<StatusWord as WireSized>::PACKED_LEN, 2);
    assert_eq!(StatusWord::buffer(), [0u8; 2]);
}

#[test]
fn pack_checked_too_short() {
    let mut buf = [0u8; 1];

    assert!(StatusWord {
        state: 0,
        error: false,
        toggled: false,
        count: 0,
    }
    .pack_to_slice(&mut buf)
    .is_err());
}
