//! CANopen over EtherCAT: SDO transfers, SDO information services and
//! emergency messages.

pub mod abort_code;
pub(crate) mod services;

use core::ops::Deref;

use crate::{
    error::{Error, MailboxError},
    fmt,
    mailbox::{MAILBOX_MAX, MailboxHeader, MailboxProtocol, MailboxType},
    slave::{Slave, SlaveRef},
};
use abort_code::CoeAbortCode;
use catline_wire::{WireRead, WireReadSized, WireSized, WireWrite};
use services::{CoeHeader, CoeService, InitSdoFlags, InitSdoHeader, SdoInfoHeader, SegmentSdoHeader};

/// The sub index strategy of an SDO request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubIndex {
    /// A single sub index of an object.
    Index(u8),
    /// Complete access: all sub indices of the object in one transfer.
    Complete,
}

impl SubIndex {
    pub(crate) fn complete_access(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub(crate) fn sub_index(&self) -> u8 {
        match self {
            // Complete access transfers begin at sub index 1 by convention
            Self::Complete => 1,
            Self::Index(idx) => *idx,
        }
    }
}

impl From<u8> for SubIndex {
    fn from(value: u8) -> Self {
        Self::Index(value)
    }
}

/// A CoE emergency message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoeEmergency {
    /// Error code, e.g. `0x8130` heartbeat error.
    pub error_code: u16,
    /// The device's error register.
    pub error_register: u8,
    /// Manufacturer specific data.
    pub data: [u8; 5],
}

/// Parse an emergency message out of a CoE mailbox payload, returning `None`
/// for any other CoE service.
pub(crate) fn try_parse_emergency(payload: &[u8]) -> Option<CoeEmergency> {
    let header = CoeHeader::unpack_from_slice(payload).ok()?;

    if header.service != CoeService::Emergency || payload.len() < 10 {
        return None;
    }

    Some(CoeEmergency {
        error_code: u16::unpack_from_slice(&payload[2..4]).ok()?,
        error_register: payload[4],
        data: fmt::unwrap!(payload[5..10].try_into()),
    })
}

/// An object description from the SDO information service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescription {
    pub index: u16,
    pub data_type: u16,
    pub max_sub_index: u8,
    pub object_code: u8,
    pub name: heapless::String<64>,
}

/// An entry (sub index) description from the SDO information service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescription {
    pub index: u16,
    pub sub_index: u8,
    /// Which optional elements the response carries.
    pub value_info: u8,
    pub data_type: u16,
    pub bit_length: u16,
    pub object_access: u16,
    pub name: heapless::String<64>,
}

/// Check an initiate SDO response for aborts and the expected command.
fn parse_init_response(
    payload: &[u8],
    index: u16,
    sub_index: u8,
    expect_command: u8,
) -> Result<InitSdoHeader, Error> {
    let coe_header = CoeHeader::unpack_from_slice(payload)?;

    if coe_header.service != CoeService::SdoResponse {
        return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
            address: index,
            sub_index,
        }));
    }

    let header = InitSdoHeader::unpack_from_slice(&payload[2..])?;

    if header.flags.command == InitSdoFlags::ABORT_REQUEST {
        let code = CoeAbortCode::unpack_from_slice(payload.get(6..10).ok_or(
            Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: index,
                sub_index,
            }),
        )?)?;

        fmt::debug!("SDO {:#06x}:{} aborted: {}", index, sub_index, code);

        return Err(Error::Mailbox(MailboxError::Aborted {
            code,
            address: index,
            sub_index,
        }));
    }

    if header.flags.command != expect_command || header.index != index {
        return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
            address: index,
            sub_index,
        }));
    }

    Ok(header)
}

impl<'master, S> SlaveRef<'master, S>
where
    S: Deref<Target = Slave>,
{
    /// The usable data bytes of one mailbox message, after the mailbox
    /// header.
    fn mailbox_data_capacity(&self) -> Result<usize, Error> {
        let mailbox = self
            .state
            .config
            .mailbox
            .write
            .ok_or(Error::Mailbox(MailboxError::NoMailbox))?;

        Ok(usize::from(mailbox.len).min(MAILBOX_MAX) - MailboxHeader::LEN)
    }

    async fn coe_roundtrip(
        &self,
        request_len: u16,
        fill: impl FnOnce(&mut [u8]),
        response: &mut [u8],
    ) -> Result<usize, Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Coe)?;

        self.mailbox_write(MailboxType::Coe, request_len, fill)
            .await?;

        let (_header, len) = self
            .mailbox_read_expecting(response, MailboxType::Coe)
            .await?;

        Ok(len)
    }

    /// Write a value to the given SDO index and sub index.
    pub async fn sdo_write<T>(
        &self,
        index: u16,
        sub_index: impl Into<SubIndex>,
        value: T,
    ) -> Result<(), Error>
    where
        T: catline_wire::WireWriteSized,
    {
        let buf = value.pack();

        self.sdo_write_slice(index, sub_index.into(), buf.as_ref())
            .await
    }

    /// Write a slice of raw little endian bytes to the given SDO.
    ///
    /// Expedited transfers are used for up to 4 bytes; anything longer uses
    /// a normal download, segmented if it exceeds the slave's mailbox.
    pub async fn sdo_write_slice(
        &self,
        index: u16,
        sub_index: impl Into<SubIndex>,
        data: &[u8],
    ) -> Result<(), Error> {
        let access = sub_index.into();

        let mut response = [0u8; MAILBOX_MAX];

        if data.len() <= 4 && !access.complete_access() {
            let mut expedited = [0u8; 4];

            expedited[0..data.len()].copy_from_slice(data);

            let request = services::expedited_download(index, access, expedited, data.len() as u8);

            let len = self
                .coe_roundtrip(10, |buf| buf[0..10].copy_from_slice(&request[0..10]), &mut response)
                .await?;

            parse_init_response(
                &response[0..len],
                index,
                access.sub_index(),
                InitSdoFlags::DOWNLOAD_RESPONSE,
            )?;

            return Ok(());
        }

        // Normal download: 10 bytes of headers then as much data as fits
        let capacity = self.mailbox_data_capacity()?;
        let first_chunk = data.len().min(capacity - 10);

        let request_len = (10 + first_chunk) as u16;

        self.ensure_mailbox_protocol(MailboxProtocol::Coe)?;

        self.mailbox_write(MailboxType::Coe, request_len, |buf| {
            let payload_start =
                services::normal_download_headers(buf, index, access, data.len() as u32);

            buf[payload_start..payload_start + first_chunk].copy_from_slice(&data[0..first_chunk]);
        })
        .await?;

        let (_header, len) = self
            .mailbox_read_expecting(&mut response, MailboxType::Coe)
            .await?;

        parse_init_response(
            &response[0..len],
            index,
            access.sub_index(),
            InitSdoFlags::DOWNLOAD_RESPONSE,
        )?;

        // Anything that didn't fit follows in download segments
        let mut remaining = &data[first_chunk..];
        let mut toggle = false;

        while !remaining.is_empty() {
            let seg_capacity = capacity - 3;
            let chunk = remaining.len().min(seg_capacity);
            let is_last = chunk == remaining.len();

            let seg_header = SegmentSdoHeader {
                is_last_segment: is_last,
                // Segments shorter than the 7 byte minimum data field
                // encode their true length here
                segment_data_size: if chunk < 7 { 7 - chunk as u8 } else { 0 },
                toggle,
                command: SegmentSdoHeader::DOWNLOAD_SEGMENT_REQUEST,
            };

            let request_len = (3 + chunk) as u16;

            self.mailbox_write(MailboxType::Coe, request_len, |buf| {
                CoeHeader {
                    number: 0,
                    service: CoeService::SdoRequest,
                }
                .pack_to_slice_unchecked(&mut buf[0..2]);

                seg_header.pack_to_slice_unchecked(&mut buf[2..3]);

                buf[3..3 + chunk].copy_from_slice(&remaining[0..chunk]);
            })
            .await?;

            let (_header, len) = self
                .mailbox_read_expecting(&mut response, MailboxType::Coe)
                .await?;

            self.check_segment_response(&response[0..len], index, access.sub_index(), toggle)?;

            remaining = &remaining[chunk..];
            toggle = !toggle;
        }

        Ok(())
    }

    fn check_segment_response(
        &self,
        payload: &[u8],
        index: u16,
        sub_index: u8,
        toggle: bool,
    ) -> Result<SegmentSdoHeader, Error> {
        let coe_header = CoeHeader::unpack_from_slice(payload)?;

        if coe_header.service != CoeService::SdoResponse {
            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: index,
                sub_index,
            }));
        }

        let header = SegmentSdoHeader::unpack_from_slice(&payload[2..])?;

        if header.command == InitSdoFlags::ABORT_REQUEST {
            let code = CoeAbortCode::unpack_from_slice(payload.get(6..10).ok_or(
                Error::Mailbox(MailboxError::SdoResponseInvalid {
                    address: index,
                    sub_index,
                }),
            )?)?;

            return Err(Error::Mailbox(MailboxError::Aborted {
                code,
                address: index,
                sub_index,
            }));
        }

        if header.toggle != toggle {
            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: index,
                sub_index,
            }));
        }

        Ok(header)
    }

    /// Read an SDO into `buf`, returning the filled portion.
    ///
    /// Expedited, normal and segmented uploads are all handled here.
    pub async fn sdo_read_buf<'buf>(
        &self,
        index: u16,
        sub_index: impl Into<SubIndex>,
        buf: &'buf mut [u8],
    ) -> Result<&'buf [u8], Error> {
        let access = sub_index.into();

        let request = services::upload(index, access);

        let mut response = [0u8; MAILBOX_MAX];

        let len = self
            .coe_roundtrip(10, |out| out[0..10].copy_from_slice(&request), &mut response)
            .await?;

        let header = parse_init_response(
            &response[0..len],
            index,
            access.sub_index(),
            InitSdoFlags::UPLOAD_RESPONSE,
        )?;

        if header.flags.expedited_transfer {
            let data_len = usize::from(4 - header.flags.size);

            let out = buf
                .get_mut(0..data_len)
                .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?;

            out.copy_from_slice(&response[6..6 + data_len]);

            return Ok(&buf[0..data_len]);
        }

        // Normal transfer: a complete size then the first (maybe only) slice
        let complete_size = u32::unpack_from_slice(&response[6..10])? as usize;

        let first_chunk = (len - 10).min(complete_size);

        if complete_size > buf.len() {
            return Err(Error::Mailbox(MailboxError::BufferTooSmall));
        }

        buf[0..first_chunk].copy_from_slice(&response[10..10 + first_chunk]);

        let mut filled = first_chunk;
        let mut toggle = false;

        while filled < complete_size {
            let request = services::upload_segment(toggle);

            let len = self
                .coe_roundtrip(10, |out| out[0..10].copy_from_slice(&request), &mut response)
                .await?;

            let seg_header =
                self.check_segment_response(&response[0..len], index, access.sub_index(), toggle)?;

            let available = len - 3;

            // Short final segments encode their true length in
            // segment_data_size
            let data_len = if available <= 7 {
                7usize.saturating_sub(usize::from(seg_header.segment_data_size))
            } else {
                available
            }
            .min(complete_size - filled);

            buf.get_mut(filled..filled + data_len)
                .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?
                .copy_from_slice(&response[3..3 + data_len]);

            filled += data_len;
            toggle = !toggle;

            if seg_header.is_last_segment {
                break;
            }
        }

        if filled != complete_size {
            fmt::error!(
                "SDO {:#06x}:{} upload ended short: {} of {} bytes",
                index,
                access.sub_index(),
                filled,
                complete_size
            );

            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: index,
                sub_index: access.sub_index(),
            }));
        }

        Ok(&buf[0..filled])
    }

    /// Read an SDO into a fixed size type.
    pub async fn sdo_read<T>(&self, index: u16, sub_index: impl Into<SubIndex>) -> Result<T, Error>
    where
        T: WireReadSized,
    {
        let access = sub_index.into();

        let mut buf = T::buffer();

        let data = self.sdo_read_buf(index, access, buf.as_mut()).await?;

        if data.len() != T::PACKED_LEN {
            fmt::error!(
                "SDO {:#06x}:{} expected {} bytes, got {}",
                index,
                access.sub_index(),
                T::PACKED_LEN,
                data.len()
            );

            return Err(Error::Mailbox(MailboxError::TooLong {
                address: index,
                sub_index: access.sub_index(),
            }));
        }

        Ok(T::unpack_from_slice(data)?)
    }

    /// Run one SDO information request, reassembling fragmented responses
    /// into `out`.
    ///
    /// Returns the bytes of the reassembled response payload after the SDO
    /// info header.
    async fn sdo_info_request(
        &self,
        op_code: u8,
        response_op: u8,
        params: &[u8],
        out: &mut [u8],
    ) -> Result<usize, Error> {
        self.ensure_mailbox_protocol(MailboxProtocol::Coe)?;

        let request_len = (2 + SdoInfoHeader::PACKED_LEN + params.len()) as u16;

        self.mailbox_write(MailboxType::Coe, request_len, |buf| {
            CoeHeader {
                number: 0,
                service: CoeService::SdoInfo,
            }
            .pack_to_slice_unchecked(&mut buf[0..2]);

            SdoInfoHeader {
                op_code,
                incomplete: false,
                fragments_left: 0,
            }
            .pack_to_slice_unchecked(&mut buf[2..6]);

            buf[6..6 + params.len()].copy_from_slice(params);
        })
        .await?;

        let mut response = [0u8; MAILBOX_MAX];
        let mut filled = 0;

        loop {
            let (_header, len) = self
                .mailbox_read_expecting(&mut response, MailboxType::Coe)
                .await?;

            let coe_header = CoeHeader::unpack_from_slice(&response)?;

            if coe_header.service != CoeService::SdoInfo {
                return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                    address: 0,
                    sub_index: 0,
                }));
            }

            let info_header = SdoInfoHeader::unpack_from_slice(&response[2..6])?;

            if info_header.op_code == SdoInfoHeader::ERROR {
                let code = CoeAbortCode::unpack_from_slice(&response[6..10])?;

                return Err(Error::Mailbox(MailboxError::Aborted {
                    code,
                    address: 0,
                    sub_index: 0,
                }));
            }

            if info_header.op_code != response_op {
                return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                    address: 0,
                    sub_index: 0,
                }));
            }

            let fragment = &response[6..len];

            out.get_mut(filled..filled + fragment.len())
                .ok_or(Error::Mailbox(MailboxError::BufferTooSmall))?
                .copy_from_slice(fragment);

            filled += fragment.len();

            if !info_header.incomplete {
                break;
            }
        }

        Ok(filled)
    }

    /// Read the list of all object indices in the slave's object dictionary.
    pub async fn sdo_info_object_list(&self) -> Result<heapless::Vec<u16, 256>, Error> {
        // List type 1: all objects
        let mut out = [0u8; 516];

        let len = self
            .sdo_info_request(
                SdoInfoHeader::GET_OD_LIST_REQUEST,
                SdoInfoHeader::GET_OD_LIST_RESPONSE,
                &1u16.to_le_bytes(),
                &mut out,
            )
            .await?;

        // The response echoes the list type before the indices
        let indices = out
            .get(2..len)
            .ok_or(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: 0,
                sub_index: 0,
            }))?;

        heapless::Vec::unpack_from_slice(indices).map_err(Error::from)
    }

    /// Read the description of one object.
    pub async fn sdo_info_object_description(
        &self,
        index: u16,
    ) -> Result<ObjectDescription, Error> {
        let mut out = [0u8; 128];

        let len = self
            .sdo_info_request(
                SdoInfoHeader::GET_OBJECT_DESCRIPTION_REQUEST,
                SdoInfoHeader::GET_OBJECT_DESCRIPTION_RESPONSE,
                &index.to_le_bytes(),
                &mut out,
            )
            .await?;

        if len < 6 {
            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: index,
                sub_index: 0,
            }));
        }

        Ok(ObjectDescription {
            index: u16::unpack_from_slice(&out[0..2])?,
            data_type: u16::unpack_from_slice(&out[2..4])?,
            max_sub_index: out[4],
            object_code: out[5],
            name: decode_name(&out[6..len]),
        })
    }

    /// Read the description of one entry (sub index) of an object.
    ///
    /// `value_info` selects the optional elements the slave should include,
    /// e.g. `0x10` for unit type, per ETG1000.6 Table 44.
    pub async fn sdo_info_entry_description(
        &self,
        index: u16,
        sub_index: u8,
        value_info: u8,
    ) -> Result<EntryDescription, Error> {
        let mut out = [0u8; 128];

        let mut params = [0u8; 4];

        params[0..2].copy_from_slice(&index.to_le_bytes());
        params[2] = sub_index;
        params[3] = value_info;

        let len = self
            .sdo_info_request(
                SdoInfoHeader::GET_ENTRY_DESCRIPTION_REQUEST,
                SdoInfoHeader::GET_ENTRY_DESCRIPTION_RESPONSE,
                &params,
                &mut out,
            )
            .await?;

        if len < 10 {
            return Err(Error::Mailbox(MailboxError::SdoResponseInvalid {
                address: index,
                sub_index,
            }));
        }

        Ok(EntryDescription {
            index: u16::unpack_from_slice(&out[0..2])?,
            sub_index: out[2],
            value_info: out[3],
            data_type: u16::unpack_from_slice(&out[4..6])?,
            bit_length: u16::unpack_from_slice(&out[6..8])?,
            object_access: u16::unpack_from_slice(&out[8..10])?,
            name: decode_name(&out[10..len]),
        })
    }
}

fn decode_name(raw: &[u8]) -> heapless::String<64> {
    let mut name = heapless::String::new();

    let printable = raw
        .iter()
        .take_while(|byte| byte.is_ascii() && **byte != 0)
        .count()
        .min(64);

    if let Ok(s) = core::str::from_utf8(&raw[0..printable]) {
        let _ = name.push_str(s);
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_emergency() {
        // CoE header with emergency service, then code/register/data
        let payload = [
            0x00, 0x10, // CoE header, service 1
            0x30, 0x81, // error code 0x8130
            0x11, // error register
            0x01, 0x02, 0x03, 0x04, 0x05, // data
        ];

        assert_eq!(
            try_parse_emergency(&payload),
            Some(CoeEmergency {
                error_code: 0x8130,
                error_register: 0x11,
                data: [1, 2, 3, 4, 5],
            })
        );
    }

    #[test]
    fn non_emergency_ignored() {
        // SDO response service
        let payload = [0x00, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

        assert_eq!(try_parse_emergency(&payload), None);
    }

    #[test]
    fn abort_response_decoded() {
        // CoE SDO response carrying an abort for 0x1c12:0
        let mut payload = [0u8; 10];

        payload[0..2].copy_from_slice(&[0x00, 0x30]);
        // Command 4 (abort) in bits 5-7
        payload[2] = 4 << 5;
        payload[3..5].copy_from_slice(&0x1c12u16.to_le_bytes());
        payload[5] = 0;
        payload[6..10].copy_from_slice(&0x0602_0000u32.to_le_bytes());

        let result = parse_init_response(&payload, 0x1c12, 0, InitSdoFlags::UPLOAD_RESPONSE);

        assert_eq!(
            result,
            Err(Error::Mailbox(MailboxError::Aborted {
                code: CoeAbortCode::NotFound,
                address: 0x1c12,
                sub_index: 0,
            }))
        );
    }

    #[test]
    fn expedited_upload_response_parsed() {
        // Upload response with expedited 1 byte of data
        let mut payload = [0u8; 10];

        payload[0..2].copy_from_slice(&[0x00, 0x30]);
        // Command 2 (upload response), expedited, size indicator, 3 unused
        payload[2] = (2 << 5) | 0x02 | 0x01 | (3 << 2);
        payload[3..5].copy_from_slice(&0x6060u16.to_le_bytes());
        payload[5] = 0;
        payload[6] = 0x08;

        let header = parse_init_response(&payload, 0x6060, 0, InitSdoFlags::UPLOAD_RESPONSE)
            .expect("parse");

        assert!(header.flags.expedited_transfer);
        assert_eq!(header.flags.size, 3);
    }
}
