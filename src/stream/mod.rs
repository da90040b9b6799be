//! Stream data model.
//!
//! A stream moves `unregistered -> registered -> open -> closed`, with a
//! sideways transition to `killed` from any post-registered state. `length`
//! only grows; once `closed` no further appends succeed; a killed stream
//! surfaces `Eof::Aborted` to subscribers.

pub mod store;

/// Outcome of a tail read once the writer has nothing more buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eof {
    /// The writer closed normally; no more bytes will ever arrive.
    Normal,
    /// The stream was killed; subscribers should treat this as an abort.
    Aborted,
}

pub use store::{Chunk, StreamReader, StreamStore, StreamWriter};
