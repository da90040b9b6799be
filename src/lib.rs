//! Live output-streaming relay: a broker that registers streams, ingests
//! bytes from a single producer, fans out to subscribers, and hands closed
//! streams off to object storage; plus the producer-side resumable uploader
//! and the text/SSE encoders that reframe the byte stream for subscribers.

pub mod encoders;
pub mod error;
pub mod kvstore;
pub mod registry;
pub mod stream;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "tee")]
pub mod uploader;

pub use error::{Error, Result};
pub use kvstore::{InMemoryKvStore, KvStore};
pub use registry::Registry;
pub use stream::{Chunk, StreamReader, StreamStore, StreamWriter};
