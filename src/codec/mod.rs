//! Wire Codec: descriptor-driven tag/length/value encoding
//!
//! Prinsip desain:
//! - Schema as data: one static descriptor table per message type drives
//!   both directions, no per-type code
//! - Exact sizing: `packed_size` agrees byte-for-byte with `pack`
//! - All-or-nothing decode: `unpack` returns a whole message or an error
//! - Forward compatible: unknown fields survive a decode/encode round trip

mod descriptor;
mod message;
mod pack;
mod unpack;
mod value;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_schema;

pub use descriptor::{
    DefaultValue, EnumDescriptor, EnumValue, FieldDescriptor, FieldType, Label,
    MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
pub use message::{Message, UnknownField};
pub use pack::{pack, pack_to_buffer, packed_size, Sink};
pub use unpack::{unpack, MAX_DEPTH};
pub use value::Value;
pub use wire::WireType;
