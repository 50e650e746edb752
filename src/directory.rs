//! The `foo` schema and its `DirLookup` service, as a code generator would
//! emit them, plus an in-memory directory serving it.
//!
//! ```text
//! package foo;
//! message Person {
//!   required string name = 1;
//!   required int32 id = 2;
//!   optional string email = 3;
//!   enum PhoneType { MOBILE = 0; HOME = 1; WORK = 2; }
//!   message PhoneNumber {
//!     required string number = 1;
//!     optional PhoneType type = 2 [default = HOME];
//!   }
//!   repeated PhoneNumber phone = 4;
//! }
//! message LookupResult { optional Person person = 1; }
//! message Name { optional string name = 1; }
//! service DirLookup { rpc ByName (Name) returns (LookupResult); }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::codec::{
    DefaultValue, EnumDescriptor, EnumValue, FieldDescriptor, FieldType, Label, Message,
    MessageDescriptor, MethodDescriptor, ServiceDescriptor, Value,
};
use crate::network::{Responder, Service};

pub static PHONE_TYPE: EnumDescriptor = EnumDescriptor {
    name: "foo.Person.PhoneType",
    short_name: "PhoneType",
    values: &[
        EnumValue { name: "MOBILE", number: 0 },
        EnumValue { name: "HOME", number: 1 },
        EnumValue { name: "WORK", number: 2 },
    ],
};

pub static PHONE_NUMBER: MessageDescriptor = MessageDescriptor {
    name: "foo.Person.PhoneNumber",
    short_name: "PhoneNumber",
    package: "foo",
    fields: &[
        FieldDescriptor::new("number", 1, Label::Required, FieldType::String),
        FieldDescriptor::new("type", 2, Label::Optional, FieldType::Enum(&PHONE_TYPE))
            .with_default(DefaultValue::Enum(1)),
    ],
    fields_by_name: &[0, 1],
};

pub static PERSON: MessageDescriptor = MessageDescriptor {
    name: "foo.Person",
    short_name: "Person",
    package: "foo",
    fields: &[
        FieldDescriptor::new("name", 1, Label::Required, FieldType::String),
        FieldDescriptor::new("id", 2, Label::Required, FieldType::Int32),
        FieldDescriptor::new("email", 3, Label::Optional, FieldType::String),
        FieldDescriptor::new("phone", 4, Label::Repeated, FieldType::Message(&PHONE_NUMBER)),
    ],
    fields_by_name: &[2, 1, 0, 3],
};

pub static LOOKUP_RESULT: MessageDescriptor = MessageDescriptor {
    name: "foo.LookupResult",
    short_name: "LookupResult",
    package: "foo",
    fields: &[FieldDescriptor::new("person", 1, Label::Optional, FieldType::Message(&PERSON))],
    fields_by_name: &[0],
};

pub static NAME: MessageDescriptor = MessageDescriptor {
    name: "foo.Name",
    short_name: "Name",
    package: "foo",
    fields: &[FieldDescriptor::new("name", 1, Label::Optional, FieldType::String)],
    fields_by_name: &[0],
};

pub static DIR_LOOKUP: ServiceDescriptor = ServiceDescriptor {
    name: "foo.DirLookup",
    short_name: "DirLookup",
    package: "foo",
    methods: &[MethodDescriptor {
        name: "by_name",
        input: &NAME,
        output: &LOOKUP_RESULT,
    }],
};

/// Index of `by_name` in [`DIR_LOOKUP`].
pub const BY_NAME: u32 = 0;

/// Build a `foo.Name` query.
pub fn name_query(name: &str) -> Message {
    let mut m = Message::new(&NAME);
    // Field and type are fixed by the schema above.
    let _ = m.set("name", name);
    m
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("cannot read database: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("empty database")]
    Empty,
}

/// People keyed by name, answering `by_name`.
#[derive(Debug, Default, Clone)]
pub struct Directory {
    people: BTreeMap<String, Message>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Add a person; returns `false` if `person` is not a `foo.Person`
    /// with a name.
    pub fn insert(&mut self, person: Message) -> bool {
        if person.descriptor() != &PERSON {
            return false;
        }
        let name = match person.get("name") {
            Ok(Some(Value::String(s))) => s.clone(),
            _ => return false,
        };
        self.people.insert(name, person);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Message> {
        self.people.get(name)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse the stanza format: an unindented name line starts a person,
    /// indented `id N`, `email ADDR`, `mobile|home|work NUMBER` lines fill
    /// it in. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, DatabaseError> {
        let mut dir = Directory::new();
        let mut current: Option<Message> = None;

        for (i, raw) in text.lines().enumerate() {
            let line = i + 1;
            let parse_err = |message: String| DatabaseError::Parse { line, message };
            if raw.starts_with('#') || raw.trim().is_empty() {
                continue;
            }
            let trimmed = raw.trim_end();
            if !trimmed.starts_with(char::is_whitespace) {
                if let Some(p) = current.take() {
                    dir.insert(p);
                }
                let mut person = Message::new(&PERSON);
                person
                    .set("name", trimmed)
                    .map_err(|e| parse_err(e.to_string()))?;
                person.set("id", 0i32).map_err(|e| parse_err(e.to_string()))?;
                current = Some(person);
                continue;
            }

            let Some(person) = current.as_mut() else {
                return Err(parse_err(
                    "indented line before any person's name".to_string(),
                ));
            };
            let body = trimmed.trim_start();
            let (key, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
            let rest = rest.trim();
            match key {
                "id" => {
                    let id: i32 = rest
                        .parse()
                        .map_err(|_| parse_err(format!("bad id '{rest}'")))?;
                    person.set("id", id).map_err(|e| parse_err(e.to_string()))?;
                }
                "email" => {
                    person.set("email", rest).map_err(|e| parse_err(e.to_string()))?;
                }
                "mobile" | "home" | "work" => {
                    let kind = match key {
                        "mobile" => 0,
                        "home" => 1,
                        _ => 2,
                    };
                    let mut phone = Message::new(&PHONE_NUMBER);
                    phone.set("number", rest).map_err(|e| parse_err(e.to_string()))?;
                    phone
                        .set("type", Value::Enum(kind))
                        .map_err(|e| parse_err(e.to_string()))?;
                    person.push("phone", phone).map_err(|e| parse_err(e.to_string()))?;
                }
                other => {
                    return Err(parse_err(format!("unrecognized field '{other}'")));
                }
            }
        }
        if let Some(p) = current.take() {
            dir.insert(p);
        }
        if dir.is_empty() {
            return Err(DatabaseError::Empty);
        }
        debug!(people = dir.len(), "directory loaded");
        Ok(dir)
    }

    /// `LookupResult` for `name`; no person set if unknown.
    pub fn lookup(&self, name: &str) -> Message {
        let mut result = Message::new(&LOOKUP_RESULT);
        if let Some(person) = self.people.get(name) {
            // Only `foo.Person` values are ever inserted.
            let _ = result.set("person", person.clone());
        }
        result
    }
}

impl Service for Directory {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DIR_LOOKUP
    }

    fn invoke(&self, method_index: u32, input: Message, responder: Responder) {
        assert_eq!(method_index, BY_NAME, "DirLookup has one method");
        match input.get("name") {
            Ok(Some(Value::String(name))) => responder.respond(self.lookup(name)),
            _ => responder.fail(),
        }
    }
}

/// One line per field, as `protolite_client` prints a result.
pub fn format_person(person: &Message) -> String {
    let mut out = String::new();
    let text = |field: &str| match person.get(field) {
        Ok(Some(v)) => v.as_str().map(str::to_owned),
        _ => None,
    };
    out.push_str(&text("name").unwrap_or_default());
    out.push('\n');
    let id = match person.get("id") {
        Ok(Some(v)) => v.as_i32().unwrap_or(0),
        _ => 0,
    };
    out.push_str(&format!(" {id}\n"));
    if let Some(email) = text("email") {
        out.push_str(&format!(" {email}\n"));
    }
    for phone in person.repeated("phone").unwrap_or(&[]) {
        let Some(phone) = phone.as_message() else {
            continue;
        };
        let number = match phone.get("number") {
            Ok(Some(v)) => v.as_str().unwrap_or("").to_owned(),
            _ => String::new(),
        };
        let kind = match phone.get_or_default("type") {
            Ok(Some(v)) => v.as_i32().and_then(|n| PHONE_TYPE.value_by_number(n)),
            _ => None,
        };
        out.push_str(&format!(
            " {} {}\n",
            kind.map_or("???", |v| v.name),
            number
        ));
    }
    out
}
