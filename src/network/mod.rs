//! Network Layer: RPC client and server over the dispatch reactor
//!
//! Prinsip desain:
//! - Reactor-confined: sockets and buffers are touched only from
//!   dispatch callbacks on one thread
//! - Per-state data lives in the state enum, not beside it
//! - Every call completes exactly once, with `None` on failure
//!
//! ```text
//!  Client                                   Server
//!  invoke ─► serialize ─► outgoing ──────►  incoming ─► deserialize
//!                                                       └─► Service::invoke
//!  callback ◄─ closure table ◄─ incoming ◄─ outgoing ◄─ Responder
//! ```

mod address;
mod client;
mod closure;
mod request;
mod server;
mod service;
mod stream;

pub use address::{Address, NameResolver, ResolveDone, SystemResolver};
pub use client::{Client, ClientConfig, ClientState, ConnectStatus};
pub use closure::ResponseCallback;
pub use server::{Server, ServerConfig};
pub use service::{RemoteResponder, Responder, Service};
pub use stream::{Listener, Stream};

use std::rc::Rc;

use tracing::error;

use crate::error::ErrorCode;

/// Error hook shared by clients and servers.
pub type ErrorHandler = Rc<dyn Fn(ErrorCode, &str)>;

/// Default hook: log through `tracing`.
pub(crate) fn log_errors(who: &'static str) -> ErrorHandler {
    Rc::new(move |code, message| error!(%code, "{who}: {message}"))
}
