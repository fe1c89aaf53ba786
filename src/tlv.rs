//! MLE TLV type codes and their typed encodings, layered over the raw
//! byte-codec of [`crate::codec`].

use heapless::Vec;

use crate::addr::{Address16, LeaderData};
use crate::codec::{find_tlv, TlvCursor};
use crate::error::{Error, Result};

/// Maximum number of TLV type codes that may appear in one `TlvRequest`.
pub const MAX_REQUESTED_TLVS: usize = 8;
/// Maximum number of IPv6 addresses a Child may register (`spec.md` §3).
pub const MAX_REGISTERED_ADDRESSES: usize = 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    SourceAddress = 1,
    Mode = 2,
    Timeout = 3,
    Challenge = 4,
    Response = 5,
    LinkFrameCounter = 6,
    LinkQuality = 7,
    NetworkParameter = 8,
    MleFrameCounter = 9,
    Route = 10,
    Address16 = 11,
    LeaderData = 12,
    NetworkData = 13,
    TlvRequest = 14,
    ScanMask = 15,
    Connectivity = 16,
    LinkMargin = 17,
    Status = 18,
    Version = 19,
    AddressRegistration = 20,
}

bitflags::bitflags! {
    /// Bitmask on Parent Request indicating which device classes may respond.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScanMask: u8 {
        const ROUTER = 0b1000_0000;
        const CHILD  = 0b0100_0000;
    }
}

impl ScanMask {
    pub const ROUTER_ONLY: ScanMask = ScanMask::ROUTER;
    pub const ROUTER_AND_CHILD: ScanMask = ScanMask::from_bits_truncate(0xC0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Error = 1,
}

/// `Challenge`/`Response` payloads: 4 to 8 bytes on the wire; this crate
/// always emits and expects the maximum 8-byte form.
pub type Challenge = [u8; 8];

pub fn read_u16(message: &[u8], ty: TlvType) -> Result<u16> {
    let span = find_tlv(message, ty as u8).ok_or(Error::Parse)?;
    if span.length != 2 {
        return Err(Error::Parse);
    }
    let b = &message[span.value_offset..span.value_offset + 2];
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32(message: &[u8], ty: TlvType) -> Result<u32> {
    let span = find_tlv(message, ty as u8).ok_or(Error::Parse)?;
    if span.length != 4 {
        return Err(Error::Parse);
    }
    let b = &message[span.value_offset..span.value_offset + 4];
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_u8(message: &[u8], ty: TlvType) -> Result<u8> {
    let span = find_tlv(message, ty as u8).ok_or(Error::Parse)?;
    if span.length != 1 {
        return Err(Error::Parse);
    }
    Ok(message[span.value_offset])
}

pub fn read_source_address(message: &[u8]) -> Result<Address16> {
    Ok(Address16::new(read_u16(message, TlvType::SourceAddress)?))
}

pub fn read_address16(message: &[u8]) -> Result<Address16> {
    Ok(Address16::new(read_u16(message, TlvType::Address16)?))
}

pub fn read_challenge(message: &[u8]) -> Result<Challenge> {
    let span = find_tlv(message, TlvType::Challenge as u8).ok_or(Error::Parse)?;
    if span.length == 0 || span.length > 8 {
        return Err(Error::Parse);
    }
    let mut out = [0u8; 8];
    out[..span.length].copy_from_slice(&message[span.value_offset..span.value_offset + span.length]);
    Ok(out)
}

pub fn read_response(message: &[u8]) -> Result<Challenge> {
    let span = find_tlv(message, TlvType::Response as u8).ok_or(Error::Parse)?;
    if span.length == 0 || span.length > 8 {
        return Err(Error::Parse);
    }
    let mut out = [0u8; 8];
    out[..span.length].copy_from_slice(&message[span.value_offset..span.value_offset + span.length]);
    Ok(out)
}

pub fn read_leader_data(message: &[u8]) -> Result<LeaderData> {
    let span = find_tlv(message, TlvType::LeaderData as u8).ok_or(Error::Parse)?;
    if span.length != 8 {
        return Err(Error::Parse);
    }
    let b = &message[span.value_offset..span.value_offset + 8];
    Ok(LeaderData {
        partition_id: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        weighting: b[4],
        data_version: b[5],
        stable_data_version: b[6],
        leader_router_id: b[7],
    })
}

pub fn write_leader_data(cursor: &mut TlvCursor, data: &LeaderData) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&data.partition_id.to_be_bytes());
    buf[4] = data.weighting;
    buf[5] = data.data_version;
    buf[6] = data.stable_data_version;
    buf[7] = data.leader_router_id;
    cursor.push_tlv(TlvType::LeaderData as u8, &buf)
}

pub fn read_tlv_request(message: &[u8]) -> Result<Vec<u8, MAX_REQUESTED_TLVS>> {
    let span = find_tlv(message, TlvType::TlvRequest as u8).ok_or(Error::Parse)?;
    let bytes = &message[span.value_offset..span.value_offset + span.length];
    Vec::from_slice(bytes).map_err(|_| Error::Parse)
}

pub fn read_scan_mask(message: &[u8]) -> Result<ScanMask> {
    Ok(ScanMask::from_bits_truncate(read_u8(message, TlvType::ScanMask)?))
}

pub fn read_mode(message: &[u8]) -> Result<crate::addr::DeviceMode> {
    Ok(crate::addr::DeviceMode::from_bits_truncate(read_u8(
        message,
        TlvType::Mode,
    )?))
}

pub fn read_status(message: &[u8]) -> Option<u8> {
    find_tlv(message, TlvType::Status as u8).map(|span| message[span.value_offset])
}

/// `Connectivity` TLV: `(link_quality_this_hop << 24) | (lq3 << 16) | (lq2 << 8) | lq1`
/// per `spec.md` §4.6 parent scoring.
pub fn read_connectivity(message: &[u8]) -> Result<u32> {
    read_u32(message, TlvType::Connectivity)
}

pub fn write_connectivity(cursor: &mut TlvCursor, value: u32) -> Result<()> {
    cursor.push_tlv(TlvType::Connectivity as u8, &value.to_be_bytes())
}

pub fn read_link_margin(message: &[u8]) -> Result<u8> {
    read_u8(message, TlvType::LinkMargin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TlvCursor;

    #[test]
    fn leader_data_round_trips() {
        let data = LeaderData {
            partition_id: 0x1122_3344,
            weighting: 64,
            data_version: 1,
            stable_data_version: 1,
            leader_router_id: 1,
        };
        let mut buf = [0u8; 16];
        let mut cur = TlvCursor::new(&mut buf);
        write_leader_data(&mut cur, &data).unwrap();
        let written = cur.written();
        assert_eq!(read_leader_data(written).unwrap(), data);
    }

    #[test]
    fn scan_mask_router_only_excludes_child() {
        let mask = ScanMask::ROUTER_ONLY;
        assert!(mask.contains(ScanMask::ROUTER));
        assert!(!mask.contains(ScanMask::CHILD));
    }
}
