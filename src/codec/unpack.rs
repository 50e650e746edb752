//! Wire bytes to message, in two passes.
//!
//! Pass 1 walks the input once, decoding only tags and value extents. It
//! counts elements per repeated field (looking inside packed payloads) and
//! records which required fields were seen. Pass 2 reserves every repeated
//! array at its exact size and converts the values. A failure anywhere drops
//! whatever was built so far; the caller only ever sees a complete message.

use crate::error::DecodeError;

use super::descriptor::{FieldDescriptor, FieldType, Label, MessageDescriptor};
use super::message::{Message, Slot, UnknownField};
use super::value::Value;
use super::wire::{self, WireType};

/// Deepest sub-message nesting `unpack` accepts.
pub const MAX_DEPTH: usize = 100;

/// One field occurrence found by the scan.
struct Member<'a> {
    id: u32,
    wire_type: WireType,
    field: Option<usize>,
    /// Everything after the tag (length prefix included).
    raw: &'a [u8],
    /// The value itself (length prefix stripped).
    payload: &'a [u8],
    /// Absolute offset of `payload`, for error reports.
    offset: usize,
}

/// Decode `data` as an instance of `descriptor`.
pub fn unpack(
    descriptor: &'static MessageDescriptor,
    data: &[u8],
) -> Result<Message, DecodeError> {
    unpack_at(descriptor, data, 0, 0)
}

fn unpack_at(
    descriptor: &'static MessageDescriptor,
    data: &[u8],
    base: usize,
    depth: usize,
) -> Result<Message, DecodeError> {
    let fields: &'static [FieldDescriptor] = descriptor.fields;
    let mut counts = vec![0usize; fields.len()];
    let mut required_seen = vec![0u64; (fields.len() + 63) / 64];
    let mut members = Vec::with_capacity(16);

    // Pass 1: extents only.
    let mut pos = 0;
    while pos < data.len() {
        let (id, raw_wire, used) = wire::decode_tag(&data[pos..], base + pos)?;
        let wire_type = match WireType::from_u8(raw_wire) {
            Some(w @ (WireType::Varint
            | WireType::Fixed64
            | WireType::LengthPrefixed
            | WireType::Fixed32)) => w,
            _ => return Err(DecodeError::UnsupportedWireType(raw_wire)),
        };
        let start = pos + used;
        let (raw_len, prefix_len) = scan_value(data, start, base, wire_type)?;
        let raw = &data[start..start + raw_len];
        let payload = &raw[prefix_len..];

        let field = descriptor.index_of_id(id);
        if let Some(index) = field {
            let f = &fields[index];
            let packed_input = wire_type == WireType::LengthPrefixed
                && f.is_repeated()
                && f.ty.is_packable();
            if wire_type != f.ty.wire_type() && !packed_input {
                return Err(DecodeError::WireTypeMismatch {
                    field: f.name,
                    wire_type,
                });
            }
            match f.label {
                Label::Repeated if packed_input => counts[index] += count_packed(f, payload)?,
                Label::Repeated => counts[index] += 1,
                Label::Required => required_seen[index / 64] |= 1 << (index % 64),
                Label::Optional => {}
            }
        }

        members.push(Member {
            id,
            wire_type,
            field,
            raw,
            payload,
            offset: base + start + prefix_len,
        });
        pos = start + raw_len;
    }

    for (index, f) in fields.iter().enumerate() {
        if f.label == Label::Required
            && f.default.is_none()
            && required_seen[index / 64] & (1 << (index % 64)) == 0
        {
            return Err(DecodeError::MissingRequired {
                message: descriptor.name,
                field: f.name,
            });
        }
    }

    // Pass 2: exact-size arrays, then conversion.
    let mut message = Message::new(descriptor);
    for (index, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        if let Slot::Repeated(vs) = message.slot_mut(index) {
            vs.try_reserve_exact(count)
                .map_err(|_| DecodeError::OutOfMemory {
                    field: fields[index].name,
                    count,
                })?;
        }
    }

    for m in members {
        let Some(index) = m.field else {
            message.push_unknown(UnknownField {
                id: m.id,
                wire_type: m.wire_type,
                data: m.raw.to_vec(),
            });
            continue;
        };
        let f = &fields[index];
        match message.slot_mut(index) {
            Slot::Repeated(vs) => {
                if m.wire_type == WireType::LengthPrefixed && f.ty.is_packable() {
                    unpack_packed(f, m.payload, m.offset, vs)?;
                } else {
                    vs.push(decode_value(f, m.wire_type, m.payload, m.offset, depth)?);
                }
            }
            Slot::Single(slot) => {
                let value = decode_value(f, m.wire_type, m.payload, m.offset, depth)?;
                match (slot, value) {
                    // A repeated occurrence of a singular sub-message merges.
                    (Some(Value::Message(existing)), Value::Message(more)) => {
                        existing.merge_from(*more)
                    }
                    (slot, value) => *slot = Some(value),
                }
            }
        }
    }

    Ok(message)
}

/// Returns `(bytes after the tag, length-prefix size)`.
fn scan_value(
    data: &[u8],
    start: usize,
    base: usize,
    wire_type: WireType,
) -> Result<(usize, usize), DecodeError> {
    let rest = &data[start..];
    let offset = base + start;
    match wire_type {
        WireType::Varint => Ok((wire::scan_varint(rest, offset)?, 0)),
        WireType::Fixed32 | WireType::Fixed64 => {
            let n = if wire_type == WireType::Fixed32 { 4 } else { 8 };
            if rest.len() < n {
                return Err(DecodeError::Truncated { wire_type, offset });
            }
            Ok((n, 0))
        }
        _ => {
            let (len, used) = wire::decode_varint(rest, offset)?;
            let remaining = rest.len() - used;
            if len > remaining as u64 {
                return Err(DecodeError::LengthOverflow {
                    len: len as usize,
                    remaining,
                    offset,
                });
            }
            Ok((used + len as usize, used))
        }
    }
}

/// Elements in a packed payload, validating its shape.
fn count_packed(field: &FieldDescriptor, payload: &[u8]) -> Result<usize, DecodeError> {
    let bad = DecodeError::BadPackedPayload { field: field.name };
    match field.ty.wire_type() {
        WireType::Fixed32 if payload.len() % 4 == 0 => Ok(payload.len() / 4),
        WireType::Fixed64 if payload.len() % 8 == 0 => Ok(payload.len() / 8),
        WireType::Varint => match payload.last() {
            Some(last) if last & 0x80 != 0 => Err(bad),
            _ => Ok(payload.iter().filter(|&&b| b & 0x80 == 0).count()),
        },
        _ => Err(bad),
    }
}

fn unpack_packed(
    field: &FieldDescriptor,
    payload: &[u8],
    offset: usize,
    out: &mut Vec<Value>,
) -> Result<(), DecodeError> {
    match field.ty.wire_type() {
        WireType::Fixed32 => {
            for chunk in payload.chunks_exact(4) {
                out.push(fixed32_value(&field.ty, wire::read_fixed32(chunk)));
            }
        }
        WireType::Fixed64 => {
            for chunk in payload.chunks_exact(8) {
                out.push(fixed64_value(&field.ty, wire::read_fixed64(chunk)));
            }
        }
        _ => {
            let mut pos = 0;
            while pos < payload.len() {
                let (v, used) = wire::decode_varint(&payload[pos..], offset + pos)?;
                out.push(varint_value(&field.ty, v));
                pos += used;
            }
        }
    }
    Ok(())
}

fn decode_value(
    field: &FieldDescriptor,
    wire_type: WireType,
    payload: &[u8],
    offset: usize,
    depth: usize,
) -> Result<Value, DecodeError> {
    Ok(match wire_type {
        WireType::Varint => varint_value(&field.ty, wire::decode_varint(payload, offset)?.0),
        WireType::Fixed32 => fixed32_value(&field.ty, wire::read_fixed32(payload)),
        WireType::Fixed64 => fixed64_value(&field.ty, wire::read_fixed64(payload)),
        _ => match field.ty {
            FieldType::String => match std::str::from_utf8(payload) {
                Ok(s) => Value::String(s.to_owned()),
                Err(_) => return Err(DecodeError::InvalidUtf8 { field: field.name }),
            },
            FieldType::Message(sub) => {
                if depth + 1 >= MAX_DEPTH {
                    return Err(DecodeError::RecursionLimit(MAX_DEPTH));
                }
                Value::Message(Box::new(unpack_at(sub, payload, offset, depth + 1)?))
            }
            _ => Value::Bytes(payload.to_vec()),
        },
    })
}

#[inline(always)]
fn varint_value(ty: &FieldType, v: u64) -> Value {
    match ty {
        FieldType::Sint32 => Value::Int32(wire::unzigzag32(v as u32)),
        FieldType::Int64 => Value::Int64(v as i64),
        FieldType::Sint64 => Value::Int64(wire::unzigzag64(v)),
        FieldType::Uint32 => Value::Uint32(v as u32),
        FieldType::Uint64 => Value::Uint64(v),
        FieldType::Bool => Value::Bool(v != 0),
        FieldType::Enum(_) => Value::Enum(v as i32),
        _ => Value::Int32(v as i32),
    }
}

#[inline(always)]
fn fixed32_value(ty: &FieldType, v: u32) -> Value {
    match ty {
        FieldType::Float => Value::Float(f32::from_bits(v)),
        FieldType::Sfixed32 => Value::Int32(v as i32),
        _ => Value::Uint32(v),
    }
}

#[inline(always)]
fn fixed64_value(ty: &FieldType, v: u64) -> Value {
    match ty {
        FieldType::Double => Value::Double(f64::from_bits(v)),
        FieldType::Sfixed64 => Value::Int64(v as i64),
        _ => Value::Uint64(v),
    }
}
