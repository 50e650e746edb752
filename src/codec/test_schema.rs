//! Descriptor tables used by the codec unit tests.
//!
//! Field names carry their id as a prefix so name order equals id order.

use super::descriptor::{
    DefaultValue, EnumDescriptor, EnumValue, FieldDescriptor, FieldType, Label, MessageDescriptor,
};

pub static COLOR: EnumDescriptor = EnumDescriptor {
    name: "test.Color",
    short_name: "Color",
    values: &[
        EnumValue { name: "RED", number: 0 },
        EnumValue { name: "GREEN", number: 1 },
        EnumValue { name: "BLUE", number: 2 },
    ],
};

pub static SIMPLE: MessageDescriptor = MessageDescriptor {
    name: "test.Simple",
    short_name: "Simple",
    package: "test",
    fields: &[FieldDescriptor::new("value", 1, Label::Optional, FieldType::Int32)],
    fields_by_name: &[0],
};

pub static SCALARS: MessageDescriptor = MessageDescriptor {
    name: "test.Scalars",
    short_name: "Scalars",
    package: "test",
    fields: &[
        FieldDescriptor::new("f01_int32", 1, Label::Optional, FieldType::Int32),
        FieldDescriptor::new("f02_sint32", 2, Label::Optional, FieldType::Sint32),
        FieldDescriptor::new("f03_sfixed32", 3, Label::Optional, FieldType::Sfixed32),
        FieldDescriptor::new("f04_int64", 4, Label::Optional, FieldType::Int64),
        FieldDescriptor::new("f05_sint64", 5, Label::Optional, FieldType::Sint64),
        FieldDescriptor::new("f06_sfixed64", 6, Label::Optional, FieldType::Sfixed64),
        FieldDescriptor::new("f07_uint32", 7, Label::Optional, FieldType::Uint32),
        FieldDescriptor::new("f08_fixed32", 8, Label::Optional, FieldType::Fixed32),
        FieldDescriptor::new("f09_uint64", 9, Label::Optional, FieldType::Uint64),
        FieldDescriptor::new("f10_fixed64", 10, Label::Optional, FieldType::Fixed64),
        FieldDescriptor::new("f11_float", 11, Label::Optional, FieldType::Float),
        FieldDescriptor::new("f12_double", 12, Label::Optional, FieldType::Double),
        FieldDescriptor::new("f13_bool", 13, Label::Optional, FieldType::Bool),
        FieldDescriptor::new("f14_enum", 14, Label::Optional, FieldType::Enum(&COLOR)),
        FieldDescriptor::new("f15_string", 15, Label::Optional, FieldType::String),
        FieldDescriptor::new("f16_bytes", 16, Label::Optional, FieldType::Bytes),
        FieldDescriptor::new("f17_packed_int32", 17, Label::Repeated, FieldType::Int32).packed(),
        FieldDescriptor::new("f18_sint64", 18, Label::Repeated, FieldType::Sint64),
        FieldDescriptor::new("f19_packed_fixed32", 19, Label::Repeated, FieldType::Fixed32)
            .packed(),
        FieldDescriptor::new("f20_strings", 20, Label::Repeated, FieldType::String),
        FieldDescriptor::new("f21_nested", 21, Label::Optional, FieldType::Message(&SCALARS)),
        FieldDescriptor::new(
            "f22_repeated_nested",
            22,
            Label::Repeated,
            FieldType::Message(&SCALARS),
        ),
        FieldDescriptor::new("f23_simple", 23, Label::Optional, FieldType::Message(&SIMPLE)),
    ],
    fields_by_name: &[
        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22,
    ],
};

pub static REQUIRED: MessageDescriptor = MessageDescriptor {
    name: "test.Required",
    short_name: "Required",
    package: "test",
    fields: &[
        FieldDescriptor::new("plain", 1, Label::Required, FieldType::Int32),
        FieldDescriptor::new("with_default", 2, Label::Required, FieldType::Int32)
            .with_default(DefaultValue::Int32(42)),
    ],
    fields_by_name: &[0, 1],
};

/// Self-referencing, for nesting limits.
pub static NODE: MessageDescriptor = MessageDescriptor {
    name: "test.Node",
    short_name: "Node",
    package: "test",
    fields: &[
        FieldDescriptor::new("child", 1, Label::Optional, FieldType::Message(&NODE)),
        FieldDescriptor::new("value", 2, Label::Optional, FieldType::Int32),
    ],
    fields_by_name: &[0, 1],
};

#[test]
fn test_schemas_are_valid() {
    for d in [&SIMPLE, &SCALARS, &REQUIRED, &NODE] {
        d.validate().unwrap();
    }
    assert_eq!(COLOR.value_by_number(2).map(|v| v.name), Some("BLUE"));
    assert_eq!(COLOR.value_by_name("GREEN").map(|v| v.number), Some(1));
    assert_eq!(SCALARS.field_by_name("f15_string").map(|f| f.id), Some(15));
    assert_eq!(SCALARS.field_by_id(23).map(|f| f.name), Some("f23_simple"));
}

#[test]
fn test_validate_rejects_bad_tables() {
    static UNSORTED: MessageDescriptor = MessageDescriptor {
        name: "test.Unsorted",
        short_name: "Unsorted",
        package: "test",
        fields: &[
            FieldDescriptor::new("a", 2, Label::Optional, FieldType::Int32),
            FieldDescriptor::new("b", 1, Label::Optional, FieldType::Int32),
        ],
        fields_by_name: &[0, 1],
    };
    static BAD_PACKED: MessageDescriptor = MessageDescriptor {
        name: "test.BadPacked",
        short_name: "BadPacked",
        package: "test",
        fields: &[FieldDescriptor::new("s", 1, Label::Repeated, FieldType::String).packed()],
        fields_by_name: &[0],
    };
    static BAD_DEFAULT: MessageDescriptor = MessageDescriptor {
        name: "test.BadDefault",
        short_name: "BadDefault",
        package: "test",
        fields: &[FieldDescriptor::new("s", 1, Label::Optional, FieldType::String)
            .with_default(DefaultValue::Int32(1))],
        fields_by_name: &[0],
    };
    assert!(UNSORTED.validate().is_err());
    assert!(BAD_PACKED.validate().is_err());
    assert!(BAD_DEFAULT.validate().is_err());
}
