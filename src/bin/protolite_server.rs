//! Directory lookup server
//!
//! Serves `foo.DirLookup` from a stanza-format database:
//!
//! ```text
//! dave
//!  id 666
//!  email who@cares.com
//!  mobile (123)123-1234
//! ```
//!
//! Usage:
//!   cargo run --release --bin protolite_server -- --port=9999 --database=people.db

use std::process;

use protolite::directory::Directory;
use protolite::network::{Address, Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Config {
    address: Option<Address>,
    database: Option<String>,
    max_pending: usize,
    verbose: bool,
}

fn usage() -> ! {
    println!("protolite_server - foo.DirLookup over RPC\n");
    println!("Usage: protolite_server [--port=NUM | --unix=PATH] --database=FILE [OPTIONS]\n");
    println!("Options:");
    println!("      --port=NUM          Listen on TCP port NUM");
    println!("      --unix=PATH         Listen on a unix-domain socket");
    println!("      --database=FILE     People database (required)");
    println!("      --max-pending=NUM   Outstanding requests per connection (default: 32)");
    println!("  -v, --verbose           Debug logging");
    println!("  -h, --help              Show this help");
    process::exit(0);
}

fn die(message: &str) -> ! {
    eprintln!("protolite_server: {message}");
    process::exit(1);
}

fn parse_args() -> Config {
    let mut config = Config {
        address: None,
        database: None,
        max_pending: ServerConfig::default().max_pending_requests_per_connection,
        verbose: false,
    };

    for arg in std::env::args().skip(1) {
        if let Some(port) = arg.strip_prefix("--port=") {
            config.address = Some(Address::tcp(port));
        } else if let Some(path) = arg.strip_prefix("--unix=") {
            config.address = Some(Address::local(path));
        } else if let Some(file) = arg.strip_prefix("--database=") {
            config.database = Some(file.to_string());
        } else if let Some(n) = arg.strip_prefix("--max-pending=") {
            config.max_pending = n
                .parse()
                .unwrap_or_else(|_| die(&format!("bad --max-pending value '{n}'")));
        } else {
            match arg.as_str() {
                "--verbose" | "-v" => config.verbose = true,
                "--help" | "-h" => usage(),
                other => die(&format!("unknown argument '{other}' (try --help)")),
            }
        }
    }
    config
}

fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let address = config
        .address
        .ok_or("missing --port=NUM or --unix=PATH")?;
    let database = config.database.ok_or("missing --database=FILE")?;

    let directory = Directory::load(&database)?;
    info!(people = directory.len(), %database, "database loaded");

    let server = Server::bind_with_config(
        &address,
        directory,
        None,
        ServerConfig {
            max_pending_requests_per_connection: config.max_pending,
        },
    )?;
    let dispatch = server.dispatch();
    loop {
        dispatch.run()?;
    }
}

fn main() {
    let config = parse_args();

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_server(config) {
        eprintln!("protolite_server: {e}");
        process::exit(1);
    }
}
