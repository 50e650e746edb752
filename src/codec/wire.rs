//! Wire primitives: varints, zigzag, tags, fixed-width little-endian.
//!
//! Layout of one field occurrence:
//! ┌──────────────────────────┬─────────────────────────────────┐
//! │ tag = (id << 3) | wire   │ payload (depends on wire type)  │
//! │ varint, 1..=5 bytes      │                                 │
//! └──────────────────────────┴─────────────────────────────────┘
//!
//! Every varint byte carries 7 payload bits; the top bit says "more follow".

use crate::error::DecodeError;

/// Largest field number a tag can carry.
pub const MAX_FIELD_ID: u32 = (1 << 29) - 1;

/// Longest legal varint (64 bits / 7).
pub const MAX_VARINT_LEN: usize = 10;

/// Low three bits of a tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthPrefixed = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthPrefixed),
            3 => Some(Self::StartGroup),
            4 => Some(Self::EndGroup),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }
}

/// Bytes needed to encode `v` as a varint.
#[inline(always)]
pub fn uint32_size(v: u32) -> usize {
    match v {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Negative int32 values are sign-extended to 64 bits on the wire.
#[inline(always)]
pub fn int32_size(v: i32) -> usize {
    if v < 0 {
        MAX_VARINT_LEN
    } else {
        uint32_size(v as u32)
    }
}

#[inline(always)]
pub fn uint64_size(v: u64) -> usize {
    if v >> 32 == 0 {
        return uint32_size(v as u32);
    }
    let significant = 64 - v.leading_zeros() as usize;
    (significant + 6) / 7
}

#[inline(always)]
pub fn sint32_size(v: i32) -> usize {
    uint32_size(zigzag32(v))
}

#[inline(always)]
pub fn sint64_size(v: i64) -> usize {
    uint64_size(zigzag64(v))
}

/// Size of the tag for field `id`.
#[inline(always)]
pub fn tag_size(id: u32) -> usize {
    uint32_size(id << 3)
}

#[inline(always)]
pub fn zigzag32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline(always)]
pub fn zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline(always)]
pub fn unzigzag32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

#[inline(always)]
pub fn unzigzag64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encode `v` into `out`, returning the number of bytes written.
#[inline(always)]
pub fn encode_uint64(mut v: u64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while v >= 0x80 {
        out[i] = (v as u8) | 0x80;
        v >>= 7;
        i += 1;
    }
    out[i] = v as u8;
    i + 1
}

#[inline(always)]
pub fn encode_uint32(v: u32, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    encode_uint64(v as u64, out)
}

/// Negative values take the full ten bytes.
#[inline(always)]
pub fn encode_int32(v: i32, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    encode_uint64(v as i64 as u64, out)
}

#[inline(always)]
pub fn encode_tag(id: u32, wire_type: WireType, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    encode_uint32((id << 3) | wire_type as u32, out)
}

/// Decode a varint at the start of `data`.
///
/// Returns the value and the number of bytes consumed. `offset` is only
/// used for error reporting.
#[inline]
pub fn decode_varint(data: &[u8], offset: usize) -> Result<(u64, usize), DecodeError> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(DecodeError::UnterminatedVarint { offset })
}

/// Length of the varint at the start of `data`, without decoding it.
#[inline]
pub fn scan_varint(data: &[u8], offset: usize) -> Result<usize, DecodeError> {
    data.iter()
        .take(MAX_VARINT_LEN)
        .position(|&b| b & 0x80 == 0)
        .map(|p| p + 1)
        .ok_or(DecodeError::UnterminatedVarint { offset })
}

/// Decode a tag, returning `(field id, raw wire type, bytes used)`.
#[inline]
pub fn decode_tag(data: &[u8], offset: usize) -> Result<(u32, u8, usize), DecodeError> {
    let (raw, used) = decode_varint(data, offset)?;
    if used > 5 || raw > u32::MAX as u64 {
        return Err(DecodeError::InvalidTag { offset });
    }
    let raw = raw as u32;
    let id = raw >> 3;
    if id == 0 {
        return Err(DecodeError::InvalidTag { offset });
    }
    Ok((id, (raw & 7) as u8, used))
}

#[inline(always)]
pub fn read_fixed32(data: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[..4]);
    u32::from_le_bytes(b)
}

#[inline(always)]
pub fn read_fixed64(data: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[..8]);
    u64::from_le_bytes(b)
}
