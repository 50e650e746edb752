//! Message log inspector
//!
//! Prints the records of a log written by `protolite_client --log=FILE`,
//! either decoded as `foo.LookupResult` or as raw wire fields.
//!
//! Usage:
//!   cargo run --bin protolite_dump -- [--raw] FILE

use std::process;

use protolite::codec::wire::{self, WireType};
use protolite::core::MessageLog;
use protolite::directory::{format_person, LOOKUP_RESULT};
use protolite::error::DecodeError;
use protolite::unpack;

struct Config {
    path: Option<String>,
    raw: bool,
}

fn parse_args() -> Config {
    let mut config = Config {
        path: None,
        raw: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--raw" | "-r" => config.raw = true,
            "--help" | "-h" => {
                println!("protolite_dump - print the records of a message log\n");
                println!("Usage: protolite_dump [--raw] FILE\n");
                println!("Options:");
                println!("  -r, --raw    Print wire fields instead of decoding");
                println!("  -h, --help   Show this help");
                process::exit(0);
            }
            _ => config.path = Some(arg),
        }
    }
    config
}

/// One line per field: `id:wire value`. Nested payloads are not expanded.
fn dump_fields(data: &[u8], indent: &str) -> Result<(), DecodeError> {
    let mut pos = 0;
    while pos < data.len() {
        let (id, raw_type, used) = wire::decode_tag(&data[pos..], pos)?;
        pos += used;
        let rest = &data[pos..];
        match WireType::from_u8(raw_type) {
            Some(WireType::Varint) => {
                let (v, n) = wire::decode_varint(rest, pos)?;
                println!("{indent}{id}:varint {v}");
                pos += n;
            }
            Some(WireType::Fixed32) if rest.len() >= 4 => {
                println!("{indent}{id}:fixed32 {:#010x}", wire::read_fixed32(rest));
                pos += 4;
            }
            Some(WireType::Fixed64) if rest.len() >= 8 => {
                println!("{indent}{id}:fixed64 {:#018x}", wire::read_fixed64(rest));
                pos += 8;
            }
            Some(WireType::LengthPrefixed) => {
                let (len, n) = wire::decode_varint(rest, pos)?;
                let end = n.saturating_add(len as usize);
                if end > rest.len() {
                    return Err(DecodeError::LengthOverflow {
                        len: len as usize,
                        remaining: rest.len() - n,
                        offset: pos,
                    });
                }
                let body = &rest[n..end];
                match std::str::from_utf8(body) {
                    Ok(s) if !s.chars().any(char::is_control) => {
                        println!("{indent}{id}:bytes[{len}] {s:?}")
                    }
                    _ => println!("{indent}{id}:bytes[{len}] {body:02x?}"),
                }
                pos += end;
            }
            Some(wire_type @ (WireType::Fixed32 | WireType::Fixed64)) => {
                return Err(DecodeError::Truncated {
                    wire_type,
                    offset: pos,
                });
            }
            _ => return Err(DecodeError::UnsupportedWireType(raw_type)),
        }
    }
    Ok(())
}

fn main() {
    let config = parse_args();
    let Some(path) = config.path else {
        eprintln!("protolite_dump: missing FILE (try --help)");
        process::exit(1);
    };
    let log = match MessageLog::open_existing(&path) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("protolite_dump: {path}: {e}");
            process::exit(1);
        }
    };

    println!("{path}: {} bytes of {} used", log.len(), log.capacity());
    for (i, record) in log.records().enumerate() {
        println!("#{i} ({} bytes)", record.len());
        if config.raw {
            if let Err(e) = dump_fields(record, "  ") {
                println!("  <malformed: {e}>");
            }
            continue;
        }
        match unpack(&LOOKUP_RESULT, record) {
            Ok(result) => match result.get("person") {
                Ok(Some(person)) => match person.as_message() {
                    Some(p) => {
                        for line in format_person(p).lines() {
                            println!("  {line}");
                        }
                    }
                    None => println!("  Not found."),
                },
                _ => println!("  Not found."),
            },
            Err(e) => println!("  <undecodable: {e}>"),
        }
    }
}
