//! Dynamic message instances.
//!
//! A [`Message`] is a descriptor reference plus one slot per field, in
//! descriptor order. Singular slots hold `Option<Value>` (presence is
//! `Some`), repeated slots hold a `Vec<Value>` (count is its length).
//! Fields the descriptor does not know are kept verbatim in
//! `unknown_fields` and written back out after the known ones.

use crate::error::MessageError;

use super::descriptor::{FieldDescriptor, Label, MessageDescriptor};
use super::value::Value;
use super::wire::WireType;

/// Storage for one field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Single(Option<Value>),
    Repeated(Vec<Value>),
}

/// Field occurrence the descriptor did not recognise.
///
/// `data` is everything after the tag, including the length prefix for
/// length-prefixed values, so the field re-packs byte-identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub id: u32,
    pub wire_type: WireType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    descriptor: &'static MessageDescriptor,
    slots: Vec<Slot>,
    unknown_fields: Vec<UnknownField>,
}

impl Message {
    /// Empty instance: no singular field set, every repeated field empty.
    pub fn new(descriptor: &'static MessageDescriptor) -> Self {
        let slots = descriptor
            .fields
            .iter()
            .map(|f| match f.label {
                Label::Repeated => Slot::Repeated(Vec::new()),
                _ => Slot::Single(None),
            })
            .collect();
        Self {
            descriptor,
            slots,
            unknown_fields: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn descriptor(&self) -> &'static MessageDescriptor {
        self.descriptor
    }

    fn index(&self, name: &str) -> Result<usize, MessageError> {
        self.descriptor
            .index_of_name(name)
            .ok_or_else(|| MessageError::NoSuchField {
                message: self.descriptor.name,
                field: name.to_owned(),
            })
    }

    fn index_by_id(&self, id: u32) -> Result<usize, MessageError> {
        self.descriptor
            .index_of_id(id)
            .ok_or_else(|| MessageError::NoSuchField {
                message: self.descriptor.name,
                field: id.to_string(),
            })
    }

    fn field(&self, index: usize) -> &'static FieldDescriptor {
        let fields: &'static [FieldDescriptor] = self.descriptor.fields;
        &fields[index]
    }

    /// Value of a singular field, `None` when unset.
    pub fn get(&self, name: &str) -> Result<Option<&Value>, MessageError> {
        let index = self.index(name)?;
        self.get_at(index)
    }

    pub fn get_by_id(&self, id: u32) -> Result<Option<&Value>, MessageError> {
        let index = self.index_by_id(id)?;
        self.get_at(index)
    }

    fn get_at(&self, index: usize) -> Result<Option<&Value>, MessageError> {
        match &self.slots[index] {
            Slot::Single(v) => Ok(v.as_ref()),
            Slot::Repeated(_) => Err(MessageError::Repeated(self.field(index).name)),
        }
    }

    /// Value of a singular field, falling back to its declared default.
    pub fn get_or_default(&self, name: &str) -> Result<Option<Value>, MessageError> {
        let index = self.index(name)?;
        match self.get_at(index)? {
            Some(v) => Ok(Some(v.clone())),
            None => Ok(self.field(index).default.map(|d| d.to_value())),
        }
    }

    /// Set a singular field. The value must fit the declared type.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), MessageError> {
        let index = self.index(name)?;
        self.set_at(index, value.into())
    }

    pub fn set_by_id(&mut self, id: u32, value: impl Into<Value>) -> Result<(), MessageError> {
        let index = self.index_by_id(id)?;
        self.set_at(index, value.into())
    }

    fn set_at(&mut self, index: usize, value: Value) -> Result<(), MessageError> {
        let field = self.field(index);
        check_type(field, &value)?;
        match &mut self.slots[index] {
            Slot::Single(v) => {
                *v = Some(value);
                Ok(())
            }
            Slot::Repeated(_) => Err(MessageError::Repeated(field.name)),
        }
    }

    /// Unset a singular field or empty a repeated one.
    pub fn clear(&mut self, name: &str) -> Result<(), MessageError> {
        let index = self.index(name)?;
        match &mut self.slots[index] {
            Slot::Single(v) => *v = None,
            Slot::Repeated(vs) => vs.clear(),
        }
        Ok(())
    }

    /// Presence for singular fields, non-emptiness for repeated ones.
    pub fn has(&self, name: &str) -> Result<bool, MessageError> {
        let index = self.index(name)?;
        Ok(match &self.slots[index] {
            Slot::Single(v) => v.is_some(),
            Slot::Repeated(vs) => !vs.is_empty(),
        })
    }

    /// Elements of a repeated field.
    pub fn repeated(&self, name: &str) -> Result<&[Value], MessageError> {
        let index = self.index(name)?;
        match &self.slots[index] {
            Slot::Repeated(vs) => Ok(vs),
            Slot::Single(_) => Err(MessageError::NotRepeated(self.field(index).name)),
        }
    }

    /// Append to a repeated field.
    pub fn push(&mut self, name: &str, value: impl Into<Value>) -> Result<(), MessageError> {
        let index = self.index(name)?;
        let field = self.field(index);
        let value = value.into();
        check_type(field, &value)?;
        match &mut self.slots[index] {
            Slot::Repeated(vs) => {
                vs.push(value);
                Ok(())
            }
            Slot::Single(_) => Err(MessageError::NotRepeated(field.name)),
        }
    }

    #[inline(always)]
    pub fn unknown_fields(&self) -> &[UnknownField] {
        &self.unknown_fields
    }

    pub fn clear_unknown_fields(&mut self) {
        self.unknown_fields.clear();
    }

    /// Every required field is set or defaulted, recursively through the
    /// sub-messages that are present.
    pub fn is_initialized(&self) -> bool {
        self.descriptor
            .fields
            .iter()
            .zip(&self.slots)
            .all(|(field, slot)| match slot {
                Slot::Single(None) => field.label != Label::Required || field.default.is_some(),
                Slot::Single(Some(v)) => value_initialized(v),
                Slot::Repeated(vs) => vs.iter().all(value_initialized),
            })
    }

    /// Merge `other` into `self`: set scalars overwrite, repeated fields
    /// concatenate, sub-messages merge recursively, unknown fields append.
    ///
    /// # Panics
    /// If the two messages have different descriptors.
    pub fn merge_from(&mut self, other: Message) {
        assert!(
            self.descriptor == other.descriptor,
            "merge of '{}' into '{}'",
            other.descriptor.name,
            self.descriptor.name
        );
        for (dst, src) in self.slots.iter_mut().zip(other.slots) {
            match (dst, src) {
                (Slot::Single(d), Slot::Single(Some(s))) => match (d, s) {
                    (Some(Value::Message(dm)), Value::Message(sm)) => dm.merge_from(*sm),
                    (d, s) => *d = Some(s),
                },
                (Slot::Repeated(d), Slot::Repeated(s)) => d.extend(s),
                _ => {}
            }
        }
        self.unknown_fields.extend(other.unknown_fields);
    }

    #[inline(always)]
    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[inline(always)]
    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    pub(crate) fn push_unknown(&mut self, field: UnknownField) {
        self.unknown_fields.push(field);
    }
}

fn check_type(field: &FieldDescriptor, value: &Value) -> Result<(), MessageError> {
    if value.matches(&field.ty) {
        Ok(())
    } else {
        Err(MessageError::TypeMismatch {
            field: field.name,
            expected: field.ty.value_kind(),
        })
    }
}

fn value_initialized(v: &Value) -> bool {
    match v {
        Value::Message(m) => m.is_initialized(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_schema::{NODE, REQUIRED, SCALARS};

    #[test]
    fn test_new_message_is_empty() {
        let m = Message::new(&SCALARS);
        assert_eq!(m.get("f01_int32").unwrap(), None);
        assert!(m.repeated("f17_packed_int32").unwrap().is_empty());
        assert!(m.unknown_fields().is_empty());
    }

    #[test]
    fn test_set_checks_type() {
        let mut m = Message::new(&SCALARS);
        m.set("f01_int32", 5).unwrap();
        assert_eq!(m.get("f01_int32").unwrap(), Some(&Value::Int32(5)));
        assert_eq!(
            m.set("f01_int32", "five"),
            Err(MessageError::TypeMismatch {
                field: "f01_int32",
                expected: "Int32"
            })
        );
        assert!(matches!(
            m.set("nope", 1),
            Err(MessageError::NoSuchField { .. })
        ));
        assert_eq!(
            m.set("f17_packed_int32", 1),
            Err(MessageError::Repeated("f17_packed_int32"))
        );
        assert_eq!(
            m.push("f01_int32", 1),
            Err(MessageError::NotRepeated("f01_int32"))
        );
    }

    #[test]
    fn test_sub_message_type_must_match() {
        let mut m = Message::new(&SCALARS);
        assert!(m.set("f21_nested", Message::new(&NODE)).is_err());
        assert!(m.set("f21_nested", Message::new(&SCALARS)).is_ok());
    }

    #[test]
    fn test_access_by_id() {
        let mut m = Message::new(&SCALARS);
        m.set_by_id(15, "hi").unwrap();
        assert_eq!(m.get("f15_string").unwrap().and_then(Value::as_str), Some("hi"));
        assert!(m.get_by_id(999).is_err());
    }

    #[test]
    fn test_get_or_default() {
        let m = Message::new(&REQUIRED);
        assert_eq!(
            m.get_or_default("with_default").unwrap(),
            Some(Value::Int32(42))
        );
        assert_eq!(m.get_or_default("plain").unwrap(), None);
    }

    #[test]
    fn test_is_initialized() {
        let mut m = Message::new(&REQUIRED);
        assert!(!m.is_initialized());
        m.set("plain", 1).unwrap();
        assert!(m.is_initialized());

        let mut outer = Message::new(&SCALARS);
        let mut inner = Message::new(&SCALARS);
        inner.set("f01_int32", 1).unwrap();
        outer.push("f22_repeated_nested", inner).unwrap();
        assert!(outer.is_initialized());
    }

    #[test]
    fn test_clear_and_has() {
        let mut m = Message::new(&SCALARS);
        m.push("f20_strings", "a").unwrap();
        m.set("f13_bool", true).unwrap();
        assert!(m.has("f20_strings").unwrap());
        assert!(m.has("f13_bool").unwrap());
        m.clear("f20_strings").unwrap();
        m.clear("f13_bool").unwrap();
        assert!(!m.has("f20_strings").unwrap());
        assert!(!m.has("f13_bool").unwrap());
    }

    #[test]
    fn test_merge_from() {
        let mut a = Message::new(&SCALARS);
        a.set("f01_int32", 1).unwrap();
        a.push("f20_strings", "x").unwrap();
        let mut a_inner = Message::new(&SCALARS);
        a_inner.set("f15_string", "keep").unwrap();
        a.set("f21_nested", a_inner).unwrap();

        let mut b = Message::new(&SCALARS);
        b.set("f01_int32", 2).unwrap();
        b.push("f20_strings", "y").unwrap();
        let mut b_inner = Message::new(&SCALARS);
        b_inner.set("f13_bool", true).unwrap();
        b.set("f21_nested", b_inner).unwrap();

        a.merge_from(b);
        assert_eq!(a.get("f01_int32").unwrap(), Some(&Value::Int32(2)));
        assert_eq!(
            a.repeated("f20_strings").unwrap(),
            &[Value::from("x"), Value::from("y")]
        );
        let nested = a.get("f21_nested").unwrap().and_then(Value::as_message).unwrap();
        assert_eq!(nested.get("f15_string").unwrap().and_then(Value::as_str), Some("keep"));
        assert_eq!(nested.get("f13_bool").unwrap(), Some(&Value::Bool(true)));
    }
}
