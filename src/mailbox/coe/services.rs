//! CoE wire headers and request builders.

use super::SubIndex;
use catline_wire::WireSized;

/// CoE header, 2 bytes: `number:9 | reserved:3 | service:4`.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoeHeader {
    /// PDO number for (R/T)xPDO services, zero otherwise.
    pub number: u16,
    pub service: CoeService,
}

impl catline_wire::WireSized for CoeHeader {
    const PACKED_LEN: usize = 2;

    type Buffer = [u8; 2];

    fn buffer() -> Self::Buffer {
        [0u8; 2]
    }
}

impl catline_wire::WireWrite for CoeHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let mut service = [0u8; 1];

        catline_wire::WireWrite::pack_to_slice_unchecked(&self.service, &mut service);

        let raw = (self.number & 0x01ff) | u16::from(service[0]) << 12;

        catline_wire::WireWrite::pack_to_slice_unchecked(&raw, buf)
    }

    fn packed_len(&self) -> usize {
        Self::PACKED_LEN
    }
}

impl catline_wire::WireRead for CoeHeader {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, catline_wire::WireError> {
        let raw = u16::unpack_from_slice(buf)?;

        Ok(Self {
            number: raw & 0x01ff,
            service: CoeService::unpack_from_slice(&[(raw >> 12) as u8])?,
        })
    }
}

/// CoE service types, ETG1000.6 Table 29.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CoeService {
    /// Emergency message.
    #[default]
    Emergency = 0x01,
    /// SDO request.
    SdoRequest = 0x02,
    /// SDO response.
    SdoResponse = 0x03,
    /// TxPDO.
    TxPdo = 0x04,
    /// RxPDO.
    RxPdo = 0x05,
    /// TxPDO remote request.
    TxPdoRemoteRequest = 0x06,
    /// RxPDO remote request.
    RxPdoRemoteRequest = 0x07,
    /// SDO information service.
    SdoInfo = 0x08,
    #[wire(catch_all)]
    Unknown(u8),
}

/// The flags byte of an initiate (expedited/normal) SDO request or response.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 1)]
pub struct InitSdoFlags {
    #[wire(bits = 1)]
    pub size_indicator: bool,
    #[wire(bits = 1)]
    pub expedited_transfer: bool,
    /// For expedited transfers: the number of *unused* bytes of the 4 byte
    /// data field, i.e. `4 - len`.
    #[wire(bits = 2)]
    pub size: u8,
    #[wire(bits = 1)]
    pub complete_access: bool,
    #[wire(bits = 3)]
    pub command: u8,
}

impl InitSdoFlags {
    pub const DOWNLOAD_REQUEST: u8 = 0x01;
    pub const DOWNLOAD_RESPONSE: u8 = 0x03;
    pub const UPLOAD_REQUEST: u8 = 0x02;
    pub const UPLOAD_RESPONSE: u8 = 0x02;
    pub const ABORT_REQUEST: u8 = 0x04;
}

/// An initiate SDO header: flags, index and subindex.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 4)]
pub struct InitSdoHeader {
    #[wire(bytes = 1)]
    pub flags: InitSdoFlags,
    #[wire(bytes = 2)]
    pub index: u16,
    #[wire(bytes = 1)]
    pub sub_index: u8,
}

/// The flags byte of a segmented SDO request or response.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 1)]
pub struct SegmentSdoHeader {
    /// Set on the final segment of a transfer.
    #[wire(bits = 1)]
    pub is_last_segment: bool,
    /// Number of bytes of the 7 byte segment data field that do NOT contain
    /// data, i.e. `7 - len`, for short final segments.
    #[wire(bits = 3)]
    pub segment_data_size: u8,
    /// Alternates 0/1 between consecutive segments, starting at 0.
    #[wire(bits = 1)]
    pub toggle: bool,
    #[wire(bits = 3)]
    pub command: u8,
}

impl SegmentSdoHeader {
    pub const DOWNLOAD_SEGMENT_REQUEST: u8 = 0x00;
    pub const DOWNLOAD_SEGMENT_RESPONSE: u8 = 0x01;
    pub const UPLOAD_SEGMENT_REQUEST: u8 = 0x03;
    pub const UPLOAD_SEGMENT_RESPONSE: u8 = 0x00;
}

/// SDO information service header following the CoE header.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, catline_wire::WireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 4)]
pub struct SdoInfoHeader {
    #[wire(bits = 7)]
    pub op_code: u8,
    /// More fragments follow this response.
    #[wire(bits = 1, post_skip_bytes = 1)]
    pub incomplete: bool,
    /// Number of fragments that follow this one.
    #[wire(bytes = 2)]
    pub fragments_left: u16,
}

impl SdoInfoHeader {
    pub const GET_OD_LIST_REQUEST: u8 = 0x01;
    pub const GET_OD_LIST_RESPONSE: u8 = 0x02;
    pub const GET_OBJECT_DESCRIPTION_REQUEST: u8 = 0x03;
    pub const GET_OBJECT_DESCRIPTION_RESPONSE: u8 = 0x04;
    pub const GET_ENTRY_DESCRIPTION_REQUEST: u8 = 0x05;
    pub const GET_ENTRY_DESCRIPTION_RESPONSE: u8 = 0x06;
    pub const ERROR: u8 = 0x07;
}

/// Build the 10 byte payload of an expedited SDO download.
pub(crate) fn expedited_download(index: u16, access: SubIndex, data: [u8; 4], len: u8) -> [u8; 10] {
    let mut buf = [0u8; 10];

    write_init_request(
        &mut buf,
        CoeService::SdoRequest,
        InitSdoHeader {
            flags: InitSdoFlags {
                size_indicator: true,
                expedited_transfer: true,
                size: 4u8.saturating_sub(len),
                complete_access: access.complete_access(),
                command: InitSdoFlags::DOWNLOAD_REQUEST,
            },
            index,
            sub_index: access.sub_index(),
        },
    );

    buf[6..10].copy_from_slice(&data);

    buf
}

/// Build the first 10 bytes (CoE header + initiate SDO header + complete
/// size) of a normal SDO download into `buf`, returning the payload start.
pub(crate) fn normal_download_headers(
    buf: &mut [u8],
    index: u16,
    access: SubIndex,
    complete_size: u32,
) -> usize {
    write_init_request(
        buf,
        CoeService::SdoRequest,
        InitSdoHeader {
            flags: InitSdoFlags {
                size_indicator: true,
                expedited_transfer: false,
                size: 0,
                complete_access: access.complete_access(),
                command: InitSdoFlags::DOWNLOAD_REQUEST,
            },
            index,
            sub_index: access.sub_index(),
        },
    );

    catline_wire::WireWrite::pack_to_slice_unchecked(&complete_size, &mut buf[6..10]);

    10
}

/// Build an SDO upload request payload.
pub(crate) fn upload(index: u16, access: SubIndex) -> [u8; 10] {
    let mut buf = [0u8; 10];

    write_init_request(
        &mut buf,
        CoeService::SdoRequest,
        InitSdoHeader {
            flags: InitSdoFlags {
                size_indicator: false,
                expedited_transfer: false,
                size: 0,
                complete_access: access.complete_access(),
                command: InitSdoFlags::UPLOAD_REQUEST,
            },
            index,
            sub_index: access.sub_index(),
        },
    );

    buf
}

/// Build an SDO upload segment request payload.
pub(crate) fn upload_segment(toggle: bool) -> [u8; 10] {
    let mut buf = [0u8; 10];

    catline_wire::WireWrite::pack_to_slice_unchecked(
        &CoeHeader {
            number: 0,
            service: CoeService::SdoRequest,
        },
        &mut buf[0..2],
    );

    catline_wire::WireWrite::pack_to_slice_unchecked(
        &SegmentSdoHeader {
            is_last_segment: false,
            segment_data_size: 0,
            toggle,
            command: SegmentSdoHeader::UPLOAD_SEGMENT_REQUEST,
        },
        &mut buf[2..3],
    );

    buf
}

fn write_init_request(buf: &mut [u8], service: CoeService, header: InitSdoHeader) {
    catline_wire::WireWrite::pack_to_slice_unchecked(
        &CoeHeader { number: 0, service },
        &mut buf[0..2],
    );

    catline_wire::WireWrite::pack_to_slice_unchecked(&header, &mut buf[2..6]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use catline_wire::{WireRead, WireWriteSized};

    #[test]
    fn coe_header_roundtrip() {
        let header = CoeHeader {
            number: 0,
            service: CoeService::SdoRequest,
        };

        let mut buf = [0u8; 2];

        catline_wire::WireWrite::pack_to_slice_unchecked(&header, &mut buf);

        assert_eq!(buf, [0x00, 0x20]);
        assert_eq!(CoeHeader::unpack_from_slice(&buf), Ok(header));
    }

    #[test]
    fn expedited_download_one_byte() {
        // Writing a single `0x08` byte: size field must encode 3 unused
        // bytes
        let buf = expedited_download(0x6060, SubIndex::Index(0), [0x08, 0, 0, 0], 1);

        // CoE header: SDO request
        assert_eq!(&buf[0..2], &[0x00, 0x20]);
        // Flags: size_indicator | expedited | size 3 << 2 | download << 5
        assert_eq!(buf[2], 0x01 | 0x02 | (3 << 2) | (1 << 5));
        // Index, sub index
        assert_eq!(&buf[3..6], &[0x60, 0x60, 0x00]);
        // Data
        assert_eq!(&buf[6..10], &[0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn segment_header_short_tail() {
        let header = SegmentSdoHeader {
            is_last_segment: true,
            // 2 bytes of data in the final segment
            segment_data_size: 7 - 2,
            toggle: true,
            command: SegmentSdoHeader::DOWNLOAD_SEGMENT_REQUEST,
        };

        let packed = header.pack();

        assert_eq!(packed, [0x01 | (5 << 1) | (1 << 4)]);
        assert_eq!(SegmentSdoHeader::unpack_from_slice(&packed), Ok(header));
    }

    #[test]
    fn sdo_info_header() {
        let header = SdoInfoHeader {
            op_code: SdoInfoHeader::GET_OD_LIST_RESPONSE,
            incomplete: true,
            fragments_left: 3,
        };

        let packed = header.pack();

        assert_eq!(packed, [0x02 | 0x80, 0x00, 0x03, 0x00]);
        assert_eq!(SdoInfoHeader::unpack_from_slice(&packed), Ok(header));
    }
}
