//! Default RPC frame headers.
//!
//! Request (client → server), 12 bytes:
//! ┌────────────────┬────────────────┬────────────────┐
//! │ method_index   │ payload_len    │ request_id     │
//! │ u32 LE         │ u32 LE         │ u32 as-is      │
//! └────────────────┴────────────────┴────────────────┘
//!
//! Response (server → client), 16 bytes:
//! ┌────────────────┬────────────────┬────────────────┬────────────────┐
//! │ status_code    │ method_index   │ payload_len    │ request_id     │
//! │ u32 LE         │ u32 LE         │ u32 LE         │ u32 as-is      │
//! └────────────────┴────────────────┴────────────────┴────────────────┘
//!
//! `request_id` is opaque to the server: it is copied byte-for-byte from the
//! request into the response and never endian-converted.

pub const REQUEST_HEADER_SIZE: usize = 12;
pub const RESPONSE_HEADER_SIZE: usize = 16;

/// Outcome carried by a response frame.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success = 0,
    /// The service produced no (valid) message.
    ServiceFailed = 1,
    /// The connection had too many requests outstanding.
    TooManyPending = 2,
}

impl StatusCode {
    #[inline(always)]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Success),
            1 => Some(Self::ServiceFailed),
            2 => Some(Self::TooManyPending),
            _ => None,
        }
    }
}

#[inline(always)]
fn le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline(always)]
fn ne(bytes: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub method_index: u32,
    pub payload_len: u32,
    pub request_id: u32,
}

impl RequestHeader {
    #[inline]
    pub fn to_bytes(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut out = [0u8; REQUEST_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.method_index.to_le_bytes());
        out[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        out[8..12].copy_from_slice(&self.request_id.to_ne_bytes());
        out
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8; REQUEST_HEADER_SIZE]) -> Self {
        Self {
            method_index: le(bytes, 0),
            payload_len: le(bytes, 4),
            request_id: ne(bytes, 8),
        }
    }

    /// Header plus payload.
    #[inline(always)]
    pub fn frame_len(&self) -> usize {
        REQUEST_HEADER_SIZE + self.payload_len as usize
    }
}

/// Response header. `status_code` stays raw so unknown codes can be
/// reported instead of silently mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status_code: u32,
    pub method_index: u32,
    pub payload_len: u32,
    pub request_id: u32,
}

impl ResponseHeader {
    pub fn new(status: StatusCode, method_index: u32, payload_len: u32, request_id: u32) -> Self {
        Self {
            status_code: status as u32,
            method_index,
            payload_len,
            request_id,
        }
    }

    #[inline(always)]
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_u32(self.status_code)
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut out = [0u8; RESPONSE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.status_code.to_le_bytes());
        out[4..8].copy_from_slice(&self.method_index.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.request_id.to_ne_bytes());
        out
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8; RESPONSE_HEADER_SIZE]) -> Self {
        Self {
            status_code: le(bytes, 0),
            method_index: le(bytes, 4),
            payload_len: le(bytes, 8),
            request_id: ne(bytes, 12),
        }
    }

    #[inline(always)]
    pub fn frame_len(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.payload_len as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let h = RequestHeader {
            method_index: 1,
            payload_len: 0x0203,
            request_id: 7,
        };
        let b = h.to_bytes();
        assert_eq!(&b[0..8], &[1, 0, 0, 0, 0x03, 0x02, 0, 0]);
        assert_eq!(&b[8..12], &7u32.to_ne_bytes());
        assert_eq!(RequestHeader::from_bytes(&b), h);
        assert_eq!(h.frame_len(), 12 + 0x0203);
    }

    #[test]
    fn test_response_layout() {
        let h = ResponseHeader::new(StatusCode::TooManyPending, 3, 0, 0xdead_beef);
        let b = h.to_bytes();
        assert_eq!(&b[0..12], &[2, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&b[12..16], &0xdead_beefu32.to_ne_bytes());
        let back = ResponseHeader::from_bytes(&b);
        assert_eq!(back.status(), Some(StatusCode::TooManyPending));
        assert_eq!(back.request_id, 0xdead_beef);
    }

    #[test]
    fn test_unknown_status() {
        let mut b = ResponseHeader::new(StatusCode::Success, 0, 0, 1).to_bytes();
        b[0] = 9;
        assert_eq!(ResponseHeader::from_bytes(&b).status(), None);
    }
}
