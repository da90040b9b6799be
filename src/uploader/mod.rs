//! Producer-side resumable uploader, split into the transport (disk-backed
//! tee + retry round-tripper) and the runner (child-process lifecycle,
//! signal forwarding, combined stdout/stderr tee). Grounded on
//! `busltee/transport.go` and `busltee/runner.go`.

pub mod runner;
pub mod transport;

pub use runner::{run, Config};
pub use transport::ResumableUploader;
