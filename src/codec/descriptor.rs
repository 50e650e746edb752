//! Static schema tables.
//!
//! Descriptors are created once (by a code generator, or by hand as in
//! [`crate::directory`]) and never mutated. Every reference between them is
//! `'static`, so a table can be a plain `static` item, including
//! self-referencing message types.

use std::fmt;
use std::ptr;

use super::value::Value;
use super::wire::{WireType, MAX_FIELD_ID};

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Required,
    Optional,
    Repeated,
}

/// Declared type of a field.
#[derive(Clone, Copy)]
pub enum FieldType {
    Int32,
    Sint32,
    Sfixed32,
    Int64,
    Sint64,
    Sfixed64,
    Uint32,
    Fixed32,
    Uint64,
    Fixed64,
    Float,
    Double,
    Bool,
    Enum(&'static EnumDescriptor),
    String,
    Bytes,
    Message(&'static MessageDescriptor),
}

impl FieldType {
    /// Wire type used when the field is not packed.
    #[inline(always)]
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldType::Int32
            | FieldType::Sint32
            | FieldType::Int64
            | FieldType::Sint64
            | FieldType::Uint32
            | FieldType::Uint64
            | FieldType::Bool
            | FieldType::Enum(_) => WireType::Varint,
            FieldType::Sfixed32 | FieldType::Fixed32 | FieldType::Float => WireType::Fixed32,
            FieldType::Sfixed64 | FieldType::Fixed64 | FieldType::Double => WireType::Fixed64,
            FieldType::String | FieldType::Bytes | FieldType::Message(_) => {
                WireType::LengthPrefixed
            }
        }
    }

    /// Scalars may use packed repeated encoding.
    #[inline(always)]
    pub fn is_packable(&self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message(_)
        )
    }

    /// Name of the value variant this type stores, for error messages.
    pub fn value_kind(&self) -> &'static str {
        match self {
            FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => "Int32",
            FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => "Int64",
            FieldType::Uint32 | FieldType::Fixed32 => "Uint32",
            FieldType::Uint64 | FieldType::Fixed64 => "Uint64",
            FieldType::Float => "Float",
            FieldType::Double => "Double",
            FieldType::Bool => "Bool",
            FieldType::Enum(_) => "Enum",
            FieldType::String => "String",
            FieldType::Bytes => "Bytes",
            FieldType::Message(_) => "Message",
        }
    }
}

impl fmt::Debug for FieldType {
    // Message types can be recursive, so only print names.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int32 => f.write_str("Int32"),
            FieldType::Sint32 => f.write_str("Sint32"),
            FieldType::Sfixed32 => f.write_str("Sfixed32"),
            FieldType::Int64 => f.write_str("Int64"),
            FieldType::Sint64 => f.write_str("Sint64"),
            FieldType::Sfixed64 => f.write_str("Sfixed64"),
            FieldType::Uint32 => f.write_str("Uint32"),
            FieldType::Fixed32 => f.write_str("Fixed32"),
            FieldType::Uint64 => f.write_str("Uint64"),
            FieldType::Fixed64 => f.write_str("Fixed64"),
            FieldType::Float => f.write_str("Float"),
            FieldType::Double => f.write_str("Double"),
            FieldType::Bool => f.write_str("Bool"),
            FieldType::String => f.write_str("String"),
            FieldType::Bytes => f.write_str("Bytes"),
            FieldType::Enum(e) => write!(f, "Enum({})", e.name),
            FieldType::Message(m) => write!(f, "Message({})", m.name),
        }
    }
}

/// Default for an unset singular field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Enum(i32),
    String(&'static str),
    Bytes(&'static [u8]),
}

impl DefaultValue {
    pub fn to_value(&self) -> Value {
        match *self {
            DefaultValue::Int32(v) => Value::Int32(v),
            DefaultValue::Int64(v) => Value::Int64(v),
            DefaultValue::Uint32(v) => Value::Uint32(v),
            DefaultValue::Uint64(v) => Value::Uint64(v),
            DefaultValue::Float(v) => Value::Float(v),
            DefaultValue::Double(v) => Value::Double(v),
            DefaultValue::Bool(v) => Value::Bool(v),
            DefaultValue::Enum(v) => Value::Enum(v),
            DefaultValue::String(s) => Value::String(s.to_owned()),
            DefaultValue::Bytes(b) => Value::Bytes(b.to_vec()),
        }
    }
}

/// One field of a message type.
///
/// The field's storage slot inside a [`super::Message`] is its position in
/// [`MessageDescriptor::fields`]; presence and element count live in that
/// slot.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub id: u32,
    pub label: Label,
    pub ty: FieldType,
    pub default: Option<DefaultValue>,
    pub packed: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, id: u32, label: Label, ty: FieldType) -> Self {
        Self {
            name,
            id,
            label,
            ty,
            default: None,
            packed: false,
        }
    }

    pub const fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    #[inline(always)]
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    #[inline(always)]
    pub fn is_packed(&self) -> bool {
        self.packed && self.label == Label::Repeated && self.ty.is_packable()
    }
}

/// A message type.
pub struct MessageDescriptor {
    /// Fully qualified name, e.g. `foo.Person`.
    pub name: &'static str,
    pub short_name: &'static str,
    pub package: &'static str,
    /// Sorted by field id.
    pub fields: &'static [FieldDescriptor],
    /// Indices into `fields`, sorted by field name.
    pub fields_by_name: &'static [usize],
}

impl MessageDescriptor {
    /// Number of value slots an instance carries.
    #[inline(always)]
    pub fn instance_size(&self) -> usize {
        self.fields.len()
    }

    /// Position of the field with number `id`.
    #[inline]
    pub fn index_of_id(&self, id: u32) -> Option<usize> {
        self.fields.binary_search_by_key(&id, |f| f.id).ok()
    }

    /// Position of the field named `name`.
    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.fields_by_name
            .binary_search_by(|&i| self.fields[i].name.cmp(name))
            .ok()
            .map(|pos| self.fields_by_name[pos])
    }

    pub fn field_by_id(&self, id: u32) -> Option<&'static FieldDescriptor> {
        let fields: &'static [FieldDescriptor] = self.fields;
        self.index_of_id(id).map(|i| &fields[i])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&'static FieldDescriptor> {
        let fields: &'static [FieldDescriptor] = self.fields;
        self.index_of_name(name).map(|i| &fields[i])
    }

    /// Check the invariants a hand-built table must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        for pair in self.fields.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(format!(
                    "{}: fields not sorted by id ({} before {})",
                    self.name, pair[0].id, pair[1].id
                ));
            }
        }
        for f in self.fields {
            if f.id == 0 || f.id > MAX_FIELD_ID {
                return Err(format!("{}.{}: field id {} out of range", self.name, f.name, f.id));
            }
            if f.packed && !(f.label == Label::Repeated && f.ty.is_packable()) {
                return Err(format!("{}.{}: packed on a non-packable field", self.name, f.name));
            }
            if let Some(d) = f.default {
                if f.label == Label::Repeated || !d.to_value().matches(&f.ty) {
                    return Err(format!("{}.{}: default does not fit", self.name, f.name));
                }
            }
        }
        if self.fields_by_name.len() != self.fields.len() {
            return Err(format!("{}: name index has wrong length", self.name));
        }
        let mut seen = vec![false; self.fields.len()];
        for &i in self.fields_by_name {
            if i >= seen.len() || seen[i] {
                return Err(format!("{}: name index is not a permutation", self.name));
            }
            seen[i] = true;
        }
        for pair in self.fields_by_name.windows(2) {
            if self.fields[pair[0]].name >= self.fields[pair[1]].name {
                return Err(format!("{}: name index not sorted", self.name));
            }
        }
        Ok(())
    }
}

// Descriptors are singletons: identity is address identity.
impl PartialEq for MessageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// One named value of an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    pub name: &'static str,
    pub number: i32,
}

/// An enum type.
#[derive(Debug)]
pub struct EnumDescriptor {
    pub name: &'static str,
    pub short_name: &'static str,
    /// Sorted by number.
    pub values: &'static [EnumValue],
}

impl EnumDescriptor {
    pub fn value_by_number(&self, number: i32) -> Option<&'static EnumValue> {
        let values: &'static [EnumValue] = self.values;
        values
            .binary_search_by_key(&number, |v| v.number)
            .ok()
            .map(|i| &values[i])
    }

    pub fn value_by_name(&self, name: &str) -> Option<&'static EnumValue> {
        let values: &'static [EnumValue] = self.values;
        values.iter().find(|v| v.name == name)
    }
}

/// One RPC method.
#[derive(Debug)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub input: &'static MessageDescriptor,
    pub output: &'static MessageDescriptor,
}

/// An RPC service: methods are addressed by their index in `methods`.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub short_name: &'static str,
    pub package: &'static str,
    pub methods: &'static [MethodDescriptor],
}

impl ServiceDescriptor {
    pub fn method(&self, index: u32) -> Option<&'static MethodDescriptor> {
        let methods: &'static [MethodDescriptor] = self.methods;
        methods.get(index as usize)
    }

    pub fn method_index(&self, name: &str) -> Option<u32> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as u32)
    }
}
