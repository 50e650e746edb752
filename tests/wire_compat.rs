//! Byte-exact wire vectors, checked against what stock protobuf encoders
//! produce for the same schema.

use protolite::codec::{
    pack, packed_size, unpack, FieldDescriptor, FieldType, Label, Message, MessageDescriptor,
    Value,
};
use protolite::directory::{format_person, Directory, LOOKUP_RESULT, NAME, PERSON, PHONE_NUMBER};
use protolite::DecodeError;

static MIXED: MessageDescriptor = MessageDescriptor {
    name: "compat.Mixed",
    short_name: "Mixed",
    package: "compat",
    fields: &[
        FieldDescriptor::new("a_sint", 1, Label::Optional, FieldType::Sint32),
        FieldDescriptor::new("b_fixed", 2, Label::Optional, FieldType::Fixed32),
        FieldDescriptor::new("c_double", 3, Label::Optional, FieldType::Double),
        FieldDescriptor::new("d_flag", 4, Label::Optional, FieldType::Bool),
        FieldDescriptor::new("e_packed", 5, Label::Repeated, FieldType::Int32).packed(),
        FieldDescriptor::new("f_text", 6, Label::Optional, FieldType::String),
    ],
    fields_by_name: &[0, 1, 2, 3, 4, 5],
};

fn person(name: &str, id: i32) -> Message {
    let mut p = Message::new(&PERSON);
    p.set("name", name).unwrap();
    p.set("id", id).unwrap();
    p
}

fn assert_encodes(message: &Message, expected: &[u8]) {
    let bytes = pack(message);
    assert_eq!(bytes, expected);
    assert_eq!(packed_size(message), expected.len());
    assert_eq!(&unpack(message.descriptor(), expected).unwrap(), message);
}

#[test]
fn test_person_vectors() {
    assert_encodes(&person("a", 1), &[0x0a, 0x01, 0x61, 0x10, 0x01]);
    assert_encodes(&person("", 300), &[0x0a, 0x00, 0x10, 0xac, 0x02]);

    // Negative int32 is sign-extended to ten bytes.
    assert_encodes(
        &person("a", -1),
        &[
            0x0a, 0x01, 0x61, 0x10, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01,
        ],
    );
}

#[test]
fn test_nested_and_repeated_vectors() {
    let mut p = person("a", 1);
    let mut phone = Message::new(&PHONE_NUMBER);
    phone.set("number", "1").unwrap();
    p.push("phone", phone).unwrap();
    let mut phone = Message::new(&PHONE_NUMBER);
    phone.set("number", "2").unwrap();
    phone.set("type", Value::Enum(2)).unwrap();
    p.push("phone", phone).unwrap();

    assert_encodes(
        &p,
        &[
            0x0a, 0x01, 0x61, 0x10, 0x01, // name, id
            0x22, 0x03, 0x0a, 0x01, 0x31, // phone { number: "1" }
            0x22, 0x05, 0x0a, 0x01, 0x32, 0x10, 0x02, // phone { number: "2", type: WORK }
        ],
    );

    let mut result = Message::new(&LOOKUP_RESULT);
    result.set("person", person("a", 1)).unwrap();
    assert_encodes(&result, &[0x0a, 0x05, 0x0a, 0x01, 0x61, 0x10, 0x01]);
    assert_encodes(&Message::new(&LOOKUP_RESULT), &[]);
}

#[test]
fn test_scalar_vectors() {
    let mut m = Message::new(&MIXED);
    m.set("a_sint", -1).unwrap();
    m.set("b_fixed", 1u32).unwrap();
    m.set("c_double", 1.0f64).unwrap();
    m.set("d_flag", true).unwrap();
    for v in [1, 2, 300] {
        m.push("e_packed", v).unwrap();
    }
    m.set("f_text", "hi").unwrap();

    assert_encodes(
        &m,
        &[
            0x08, 0x01, // sint32 -1, zigzag
            0x15, 0x01, 0x00, 0x00, 0x00, // fixed32 1
            0x19, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f, // double 1.0
            0x20, 0x01, // bool
            0x2a, 0x04, 0x01, 0x02, 0xac, 0x02, // packed [1, 2, 300]
            0x32, 0x02, 0x68, 0x69, // "hi"
        ],
    );
}

#[test]
fn test_unknown_fields_survive() {
    let input = [0x0a, 0x01, 0x78, 0x10, 0x07, 0x1d, 0x01, 0x02, 0x03, 0x04];
    let name = unpack(&NAME, &input).unwrap();
    assert_eq!(name.get("name").unwrap(), Some(&Value::String("x".into())));
    assert_eq!(name.unknown_fields().len(), 2);
    assert_eq!(pack(&name), input);
}

#[test]
fn test_malformed_input() {
    assert!(matches!(
        unpack(&PERSON, &[0x0a, 0x01, 0x61]),
        Err(DecodeError::MissingRequired { field: "id", .. })
    ));
    assert!(matches!(
        unpack(&PERSON, &[0x0a, 0x05, 0x61]),
        Err(DecodeError::LengthOverflow { .. })
    ));
    assert!(matches!(
        unpack(&PERSON, &[0x10, 0xff]),
        Err(DecodeError::UnterminatedVarint { .. })
    ));
    assert!(matches!(
        unpack(&NAME, &[0x00, 0x01]),
        Err(DecodeError::InvalidTag { .. })
    ));
}

#[test]
fn test_directory_round_trip() {
    let dir = Directory::parse("ann\n id 4\n email ann@example.com\n home 555\n").unwrap();
    let found = dir.lookup("ann");
    let decoded = unpack(&LOOKUP_RESULT, &pack(&found)).unwrap();
    let person = decoded.get("person").unwrap().unwrap().as_message().unwrap();
    assert_eq!(format_person(person), "ann\n 4\n ann@example.com\n HOME 555\n");
}
