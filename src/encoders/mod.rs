//! Reframes the raw byte-append stream as plain text or server-sent events,
//! preserving the Go original's `io.Reader`/`io.Seeker`
//! abstraction (`encoders/encoder.go`, `text.go`, `sse.go`) almost exactly:
//! both encoders wrap an underlying `Read`, track a logical offset, and
//! treat seeking on a non-seekable underlying reader as a pure logical
//! offset advance rather than a physical reposition.

pub mod sse;
pub mod text;

use std::io::{Read, Seek};

pub use sse::SseEncoder;
pub use text::TextEncoder;

/// An encoder both reads framed bytes and tracks/advances a logical offset.
pub trait Encoder: Read + Seek {}

impl<T: Read + Seek> Encoder for T {}
