//! Message to wire bytes.
//!
//! Fields are written in descriptor order, then unknown fields in the order
//! they were read. Sub-messages are packed into a scratch buffer first since
//! their length prefix must precede them.

use super::descriptor::{FieldDescriptor, FieldType, Label};
use super::message::{Message, Slot};
use super::value::Value;
use super::wire::{self, WireType, MAX_VARINT_LEN};

/// Append-only byte destination.
pub trait Sink {
    fn append(&mut self, data: &[u8]);
}

impl Sink for Vec<u8> {
    #[inline(always)]
    fn append(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

/// Exact number of bytes [`pack`] produces.
pub fn packed_size(message: &Message) -> usize {
    let mut size = 0;
    for (field, slot) in message.descriptor().fields.iter().zip(message.slots()) {
        size += match slot {
            Slot::Single(Some(v)) => wire::tag_size(field.id) + value_size(&field.ty, v),
            Slot::Single(None) => match required_default(field) {
                Some(v) => wire::tag_size(field.id) + value_size(&field.ty, &v),
                None => 0,
            },
            Slot::Repeated(vs) if vs.is_empty() => 0,
            Slot::Repeated(vs) if field.is_packed() => {
                let payload: usize = vs.iter().map(|v| value_size(&field.ty, v)).sum();
                wire::tag_size(field.id) + wire::uint32_size(payload as u32) + payload
            }
            Slot::Repeated(vs) => vs
                .iter()
                .map(|v| wire::tag_size(field.id) + value_size(&field.ty, v))
                .sum(),
        };
    }
    for u in message.unknown_fields() {
        size += wire::tag_size(u.id) + u.data.len();
    }
    size
}

/// Pack into a freshly allocated vector.
pub fn pack(message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed_size(message));
    pack_to_buffer(message, &mut out);
    out
}

/// Pack into `out`, returning the number of bytes appended.
pub fn pack_to_buffer(message: &Message, out: &mut dyn Sink) -> usize {
    let mut written = 0;
    for (field, slot) in message.descriptor().fields.iter().zip(message.slots()) {
        match slot {
            Slot::Single(Some(v)) => {
                written += put_tag(field.id, field.ty.wire_type(), out);
                written += put_value(&field.ty, v, out);
            }
            Slot::Single(None) => {
                if let Some(v) = required_default(field) {
                    written += put_tag(field.id, field.ty.wire_type(), out);
                    written += put_value(&field.ty, &v, out);
                }
            }
            Slot::Repeated(vs) if vs.is_empty() => {}
            Slot::Repeated(vs) if field.is_packed() => {
                let payload: usize = vs.iter().map(|v| value_size(&field.ty, v)).sum();
                written += put_tag(field.id, WireType::LengthPrefixed, out);
                written += put_varint(payload as u64, out);
                for v in vs {
                    written += put_value(&field.ty, v, out);
                }
            }
            Slot::Repeated(vs) => {
                for v in vs {
                    written += put_tag(field.id, field.ty.wire_type(), out);
                    written += put_value(&field.ty, v, out);
                }
            }
        }
    }
    for u in message.unknown_fields() {
        written += put_tag(u.id, u.wire_type, out);
        out.append(&u.data);
        written += u.data.len();
    }
    written
}

// An unset required field with a default is written as that default.
fn required_default(field: &FieldDescriptor) -> Option<Value> {
    match field.label {
        Label::Required => field.default.map(|d| d.to_value()),
        _ => None,
    }
}

/// Payload size of one value, without its tag.
fn value_size(ty: &FieldType, v: &Value) -> usize {
    match *v {
        Value::Int32(x) => match ty {
            FieldType::Sint32 => wire::sint32_size(x),
            FieldType::Sfixed32 => 4,
            _ => wire::int32_size(x),
        },
        Value::Int64(x) => match ty {
            FieldType::Sint64 => wire::sint64_size(x),
            FieldType::Sfixed64 => 8,
            _ => wire::uint64_size(x as u64),
        },
        Value::Uint32(x) => match ty {
            FieldType::Fixed32 => 4,
            _ => wire::uint32_size(x),
        },
        Value::Uint64(x) => match ty {
            FieldType::Fixed64 => 8,
            _ => wire::uint64_size(x),
        },
        Value::Float(_) => 4,
        Value::Double(_) => 8,
        Value::Bool(_) => 1,
        Value::Enum(x) => wire::int32_size(x),
        Value::String(ref s) => wire::uint32_size(s.len() as u32) + s.len(),
        Value::Bytes(ref b) => wire::uint32_size(b.len() as u32) + b.len(),
        Value::Message(ref m) => {
            let n = packed_size(m);
            wire::uint32_size(n as u32) + n
        }
    }
}

#[inline(always)]
fn put_tag(id: u32, wire_type: WireType, out: &mut dyn Sink) -> usize {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = wire::encode_tag(id, wire_type, &mut buf);
    out.append(&buf[..n]);
    n
}

#[inline(always)]
fn put_varint(v: u64, out: &mut dyn Sink) -> usize {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = wire::encode_uint64(v, &mut buf);
    out.append(&buf[..n]);
    n
}

#[inline(always)]
fn put_bytes(data: &[u8], out: &mut dyn Sink) -> usize {
    let n = put_varint(data.len() as u64, out);
    out.append(data);
    n + data.len()
}

fn put_value(ty: &FieldType, v: &Value, out: &mut dyn Sink) -> usize {
    match *v {
        Value::Int32(x) => match ty {
            FieldType::Sint32 => put_varint(wire::zigzag32(x) as u64, out),
            FieldType::Sfixed32 => {
                out.append(&x.to_le_bytes());
                4
            }
            _ => put_varint(x as i64 as u64, out),
        },
        Value::Int64(x) => match ty {
            FieldType::Sint64 => put_varint(wire::zigzag64(x), out),
            FieldType::Sfixed64 => {
                out.append(&x.to_le_bytes());
                8
            }
            _ => put_varint(x as u64, out),
        },
        Value::Uint32(x) => match ty {
            FieldType::Fixed32 => {
                out.append(&x.to_le_bytes());
                4
            }
            _ => put_varint(x as u64, out),
        },
        Value::Uint64(x) => match ty {
            FieldType::Fixed64 => {
                out.append(&x.to_le_bytes());
                8
            }
            _ => put_varint(x, out),
        },
        Value::Float(x) => {
            out.append(&x.to_le_bytes());
            4
        }
        Value::Double(x) => {
            out.append(&x.to_le_bytes());
            8
        }
        Value::Bool(x) => {
            out.append(&[x as u8]);
            1
        }
        Value::Enum(x) => put_varint(x as i64 as u64, out),
        Value::String(ref s) => put_bytes(s.as_bytes(), out),
        Value::Bytes(ref b) => put_bytes(b, out),
        Value::Message(ref m) => {
            let mut scratch = Vec::new();
            pack_to_buffer(m, &mut scratch);
            put_bytes(&scratch, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_schema::{REQUIRED, SCALARS, SIMPLE};

    #[test]
    fn test_pack_int32_300() {
        let mut m = Message::new(&SIMPLE);
        m.set("value", 300).unwrap();
        assert_eq!(pack(&m), vec![0x08, 0xac, 0x02]);
        assert_eq!(packed_size(&m), 3);
    }

    #[test]
    fn test_empty_message_packs_to_nothing() {
        let m = Message::new(&SCALARS);
        assert!(pack(&m).is_empty());
    }

    #[test]
    fn test_fixed_and_zigzag_encodings() {
        let mut m = Message::new(&SCALARS);
        m.set("f02_sint32", -1).unwrap();
        m.set("f08_fixed32", 1u32).unwrap();
        m.set("f12_double", 1.0f64).unwrap();
        assert_eq!(
            pack(&m),
            vec![
                0x10, 0x01, // sint32 -1 -> zigzag 1
                0x45, 0x01, 0x00, 0x00, 0x00, // fixed32 1
                0x61, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f, // double 1.0
            ]
        );
    }

    #[test]
    fn test_packed_repeated_layout() {
        let mut m = Message::new(&SCALARS);
        for v in [3, 270, 86942] {
            m.push("f17_packed_int32", v).unwrap();
        }
        // Canonical example from the protobuf encoding guide.
        assert_eq!(
            pack(&m),
            vec![0x8a, 0x01, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05]
        );
    }

    #[test]
    fn test_unpacked_repeated_layout() {
        let mut m = Message::new(&SCALARS);
        m.push("f18_sint64", -1i64).unwrap();
        m.push("f18_sint64", 1i64).unwrap();
        assert_eq!(pack(&m), vec![0x90, 0x01, 0x01, 0x90, 0x01, 0x02]);
    }

    #[test]
    fn test_nested_message_is_length_prefixed() {
        let mut inner = Message::new(&SIMPLE);
        inner.set("value", 150).unwrap();
        let mut outer = Message::new(&SCALARS);
        outer.set("f23_simple", inner).unwrap();
        let bytes = pack(&outer);
        assert_eq!(bytes, vec![0xba, 0x01, 0x03, 0x08, 0x96, 0x01]);
        assert_eq!(packed_size(&outer), bytes.len());
    }

    #[test]
    fn test_required_default_is_written() {
        let mut m = Message::new(&REQUIRED);
        m.set("plain", 7).unwrap();
        // with_default (id 2) is unset but required, so its default goes out.
        assert_eq!(pack(&m), vec![0x08, 0x07, 0x10, 0x2a]);
    }

    #[test]
    fn test_pack_to_buffer_reports_length() {
        let mut m = Message::new(&SCALARS);
        m.set("f15_string", "hello").unwrap();
        m.set("f01_int32", -5).unwrap();
        let mut out = vec![0xff];
        let n = pack_to_buffer(&m, &mut out);
        assert_eq!(n, packed_size(&m));
        assert_eq!(out.len(), n + 1);
    }
}
