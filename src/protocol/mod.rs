//! Protocol Layer: RPC framing over the wire codec
//!
//! Prinsip desain:
//! - Fixed-size headers: a frame's length is known after 12/16 bytes
//! - Never consume a partial frame: `Incomplete` leaves the buffer untouched
//! - Pluggable: client and server only see the [`Protocol`] trait

mod default;
mod frame;

pub use default::{DefaultClientProtocol, DefaultServerProtocol};
pub use frame::{
    RequestHeader, ResponseHeader, StatusCode, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};

use crate::codec::{Message, MessageDescriptor, Sink};
use crate::core::DataBuffer;
use crate::error::ProtocolError;

/// Frame fields known before the payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub status: StatusCode,
    pub method_index: u32,
    pub request_id: u32,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub status: StatusCode,
    pub method_index: u32,
    pub request_id: u32,
    /// `None` for failure responses.
    pub message: Option<Message>,
}

/// A frame to encode, borrowing its message.
#[derive(Debug, Clone, Copy)]
pub struct PayloadRef<'a> {
    pub status: StatusCode,
    pub method_index: u32,
    pub request_id: u32,
    pub message: Option<&'a Message>,
}

impl<'a> PayloadRef<'a> {
    pub fn request(method_index: u32, request_id: u32, message: &'a Message) -> Self {
        Self {
            status: StatusCode::Success,
            method_index,
            request_id,
            message: Some(message),
        }
    }
}

/// Outcome of one deserialize attempt.
#[derive(Debug)]
pub enum Deserialized {
    /// A whole frame was consumed.
    Complete(Payload),
    /// Not enough bytes buffered yet; nothing was consumed.
    Incomplete,
    /// The stream is corrupt; the connection must be dropped.
    Failed(ProtocolError),
}

/// Maps a frame to the descriptor of its payload, `None` if the frame names
/// an unknown method or request.
pub type DescriptorLookup<'a> = dyn FnMut(&FrameInfo) -> Option<&'static MessageDescriptor> + 'a;

/// One side of an RPC framing.
///
/// Implementations must be shareable across threads: servers serialize
/// responses on worker threads when threading is configured.
pub trait Protocol: Send + Sync {
    /// Append one frame for `payload` to `out`.
    fn serialize(&self, out: &mut dyn Sink, payload: &PayloadRef<'_>) -> Result<(), ProtocolError>;

    /// Try to take one frame off the head of `input`.
    fn deserialize(&self, input: &mut DataBuffer, lookup: &mut DescriptorLookup<'_>)
        -> Deserialized;
}
