//! Crate-wide error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stream not registered")]
    NotRegistered,

    #[error("stream already has an open writer")]
    AlreadyOpen,

    #[error("stream is closed")]
    Closed,

    #[error("stream was killed")]
    Killed,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("transport timed out")]
    TransportTimeout,

    #[error("buffer too small to hold framed output")]
    BufferTooSmall,

    #[error("reached max retries (timed out: {timed_out})")]
    TooManyRetries { timed_out: bool },

    #[error("missing url")]
    MissingUrl,

    #[error("streaming unsupported")]
    StreamingUnsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
