//! The stock client and server framings.

use crate::codec::{pack_to_buffer, packed_size, unpack, Sink};
use crate::core::DataBuffer;
use crate::error::ProtocolError;

use super::frame::{
    RequestHeader, ResponseHeader, StatusCode, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
use super::{Deserialized, DescriptorLookup, FrameInfo, Payload, PayloadRef, Protocol};

/// Client side: writes requests, reads responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClientProtocol;

/// Server side: reads requests, writes responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultServerProtocol;

/// Pull a `len`-byte payload off `input` and decode it.
fn read_message(
    input: &mut DataBuffer,
    len: usize,
    descriptor: &'static crate::codec::MessageDescriptor,
) -> Result<crate::codec::Message, ProtocolError> {
    let mut packed = vec![0u8; len];
    input.read(&mut packed);
    Ok(unpack(descriptor, &packed)?)
}

impl Protocol for DefaultClientProtocol {
    fn serialize(&self, out: &mut dyn Sink, payload: &PayloadRef<'_>) -> Result<(), ProtocolError> {
        let message = match payload.message {
            Some(m) if m.is_initialized() => m,
            Some(m) => return Err(ProtocolError::Uninitialized(m.descriptor().name)),
            None => return Err(ProtocolError::Uninitialized("<none>")),
        };
        let len = packed_size(message);
        let header = RequestHeader {
            method_index: payload.method_index,
            payload_len: len as u32,
            request_id: payload.request_id,
        };
        out.append(&header.to_bytes());
        pack_to_buffer(message, out);
        Ok(())
    }

    fn deserialize(
        &self,
        input: &mut DataBuffer,
        lookup: &mut DescriptorLookup<'_>,
    ) -> Deserialized {
        let mut raw = [0u8; RESPONSE_HEADER_SIZE];
        if input.peek(&mut raw) < RESPONSE_HEADER_SIZE {
            return Deserialized::Incomplete;
        }
        let header = ResponseHeader::from_bytes(&raw);
        if input.len() < header.frame_len() {
            return Deserialized::Incomplete;
        }
        let Some(status) = header.status() else {
            return Deserialized::Failed(ProtocolError::BadStatus(header.status_code));
        };
        if status != StatusCode::Success && header.payload_len != 0 {
            return Deserialized::Failed(ProtocolError::UnexpectedPayload {
                status: header.status_code,
                len: header.payload_len,
            });
        }

        let info = FrameInfo {
            status,
            method_index: header.method_index,
            request_id: header.request_id,
        };
        let message = if status == StatusCode::Success {
            let Some(descriptor) = lookup(&info) else {
                return Deserialized::Failed(ProtocolError::BadRequestId(header.request_id));
            };
            input.discard(RESPONSE_HEADER_SIZE);
            match read_message(input, header.payload_len as usize, descriptor) {
                Ok(m) => Some(m),
                Err(e) => return Deserialized::Failed(e),
            }
        } else {
            input.discard(RESPONSE_HEADER_SIZE);
            None
        };

        Deserialized::Complete(Payload {
            status,
            method_index: header.method_index,
            request_id: header.request_id,
            message,
        })
    }
}

impl Protocol for DefaultServerProtocol {
    /// A missing or uninitialized message is answered with `ServiceFailed`.
    fn serialize(&self, out: &mut dyn Sink, payload: &PayloadRef<'_>) -> Result<(), ProtocolError> {
        let message = match (payload.status, payload.message) {
            (StatusCode::Success, Some(m)) if m.is_initialized() => Some(m),
            _ => None,
        };
        match message {
            Some(m) => {
                let len = packed_size(m);
                let header = ResponseHeader::new(
                    StatusCode::Success,
                    payload.method_index,
                    len as u32,
                    payload.request_id,
                );
                out.append(&header.to_bytes());
                pack_to_buffer(m, out);
            }
            None => {
                let status = match payload.status {
                    StatusCode::Success => StatusCode::ServiceFailed,
                    other => other,
                };
                let header =
                    ResponseHeader::new(status, payload.method_index, 0, payload.request_id);
                out.append(&header.to_bytes());
            }
        }
        Ok(())
    }

    fn deserialize(
        &self,
        input: &mut DataBuffer,
        lookup: &mut DescriptorLookup<'_>,
    ) -> Deserialized {
        let mut raw = [0u8; REQUEST_HEADER_SIZE];
        if input.peek(&mut raw) < REQUEST_HEADER_SIZE {
            return Deserialized::Incomplete;
        }
        let header = RequestHeader::from_bytes(&raw);
        if input.len() < header.frame_len() {
            return Deserialized::Incomplete;
        }
        let info = FrameInfo {
            status: StatusCode::Success,
            method_index: header.method_index,
            request_id: header.request_id,
        };
        let Some(descriptor) = lookup(&info) else {
            return Deserialized::Failed(ProtocolError::BadMethod(header.method_index));
        };
        input.discard(REQUEST_HEADER_SIZE);
        match read_message(input, header.payload_len as usize, descriptor) {
            Ok(message) => Deserialized::Complete(Payload {
                status: StatusCode::Success,
                method_index: header.method_index,
                request_id: header.request_id,
                message: Some(message),
            }),
            Err(e) => Deserialized::Failed(e),
        }
    }
}
