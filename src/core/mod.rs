//! Core module: fragmented byte buffers and mmap message log
//!
//! Prinsip desain:
//! - O(1) append/discard: data never moves once appended
//! - Splice, don't copy: whole fragment chains move between buffers
//! - Bounded recycling: freed fragments are reused, up to a small limit

mod data_buffer;
mod fragment;
mod message_log;

pub use data_buffer::{DataBuffer, ReadStatus, MAX_FRAGMENTS_PER_WRITE};
pub use fragment::{cleanup_recycling_bin, recycled_fragments, FRAGMENT_SIZE, MAX_RECYCLED};
pub use message_log::{MessageLog, Records};
