//! protolite - schema-driven TLV codec with a single-threaded RPC runtime
//!
//! Arsitektur:
//! - Codec: descriptor-driven pack/unpack of the varint/tag wire format
//! - Data buffer: fragment chains with O(1) append, discard and splice
//! - Dispatch: one reactor thread multiplexing fds, timers and idles
//! - RPC: fixed-header frames, a reconnecting client, a pending-aware server
//!
//! ```text
//!  ┌──────────┐  ┌──────────┐
//!  │  Client  │  │  Server  │
//!  └────┬─────┘  └────┬─────┘
//!       └──── Protocol ┘ ─────► Codec + DataBuffer
//!                  │
//!               Dispatch (mio)
//! ```

#[cfg(not(unix))]
compile_error!("protolite requires a unix platform");

pub mod codec;
pub mod core;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod protocol;

pub use crate::codec::{pack, packed_size, unpack, Message, MessageDescriptor, Value};
pub use crate::core::DataBuffer;
pub use crate::dispatch::Dispatch;
pub use crate::error::{DecodeError, ErrorCode, MessageError, ProtocolError, RpcError};
pub use crate::network::{Address, Client, Responder, Server, Service};
