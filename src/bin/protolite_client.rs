//! Interactive directory lookup client
//!
//! Reads one name per line from stdin and prints what the server knows.
//! With `--log=FILE`, every successful `LookupResult` is also appended to an
//! mmap message log (inspect it with `protolite_dump`).
//!
//! Usage:
//!   cargo run --release --bin protolite_client -- --tcp=localhost:9999

use std::cell::{Cell, RefCell};
use std::io::{self, BufRead, Write};
use std::process;
use std::rc::Rc;

use protolite::core::MessageLog;
use protolite::directory::{format_person, name_query, BY_NAME, DIR_LOOKUP};
use protolite::network::{Address, Client};
use protolite::Message;
use tracing_subscriber::EnvFilter;

const LOG_CAPACITY: usize = 4 * 1024 * 1024;

struct Config {
    address: Option<Address>,
    log_path: Option<String>,
}

fn usage() -> ! {
    println!("protolite_client - query a foo.DirLookup server\n");
    println!("Usage: protolite_client [--tcp=HOST:PORT | --unix=PATH] [OPTIONS]\n");
    println!("Options:");
    println!("      --tcp=HOST:PORT   Connect over TCP");
    println!("      --unix=PATH       Connect to a unix-domain socket");
    println!("      --log=FILE        Append results to an mmap message log");
    println!("  -h, --help            Show this help");
    process::exit(0);
}

fn die(message: &str) -> ! {
    eprintln!("protolite_client: {message}");
    process::exit(1);
}

fn parse_args() -> Config {
    let mut config = Config {
        address: None,
        log_path: None,
    };
    for arg in std::env::args().skip(1) {
        if let Some(name) = arg.strip_prefix("--tcp=") {
            config.address = Some(Address::tcp(name));
        } else if let Some(path) = arg.strip_prefix("--unix=") {
            config.address = Some(Address::local(path));
        } else if let Some(path) = arg.strip_prefix("--log=") {
            config.log_path = Some(path.to_string());
        } else if arg == "--help" || arg == "-h" {
            usage();
        } else {
            die(&format!("unknown argument '{arg}' (try --help)"));
        }
    }
    config
}

fn print_result(result: Option<&Message>) {
    let Some(result) = result else {
        println!("Error processing request.");
        return;
    };
    match result.get("person") {
        Ok(Some(person)) => match person.as_message() {
            Some(p) => print!("{}", format_person(p)),
            None => println!("Not found."),
        },
        _ => println!("Not found."),
    }
}

fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let address = config
        .address
        .ok_or("missing --tcp=HOST:PORT or --unix=PATH")?;
    let log = match &config.log_path {
        Some(path) => Some(Rc::new(RefCell::new(MessageLog::open(path, LOG_CAPACITY)?))),
        None => None,
    };

    let client = Client::new(address, &DIR_LOOKUP, None)?;
    let dispatch = client.dispatch();

    eprint!("Connecting... ");
    dispatch.run_until(|| client.is_connected())?;
    eprintln!("done.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!(">> ");
        io::stderr().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let name = line.trim_end();
        if name.trim().is_empty() {
            continue;
        }

        let done = Rc::new(Cell::new(false));
        let finished = Rc::clone(&done);
        let log = log.clone();
        client.invoke(BY_NAME, &name_query(name), move |result| {
            print_result(result.as_ref());
            if let (Some(log), Some(result)) = (log, result.as_ref()) {
                if log.borrow_mut().append(result).is_none() {
                    eprintln!("protolite_client: message log is full");
                }
            }
            finished.set(true);
        });
        dispatch.run_until(|| done.get())?;
    }

    if let Some(log) = log {
        log.borrow().flush()?;
    }
    Ok(())
}

fn main() {
    let config = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run_client(config) {
        eprintln!("protolite_client: {e}");
        process::exit(1);
    }
}
