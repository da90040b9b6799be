//! Stream registration metadata: existence, close, and kill markers.
//!
//! Each attribute lives under its own key in the backing [`KvStore`],
//! mirroring `broker/redis.go`'s `<name>:id` / `<name>:done` / `<name>:kill`
//! scheme: existence of the key encodes the boolean.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::kvstore::KvStore;

/// Registration TTL: an hour.
pub const DEFAULT_REGISTRATION_TTL: Duration = Duration::from_secs(60 * 60);

fn id_key(name: &str) -> String {
    format!("{name}:id")
}

fn done_key(name: &str) -> String {
    format!("{name}:done")
}

fn kill_key(name: &str) -> String {
    format!("{name}:kill")
}

/// Process-wide mapping from stream name to {exists, closed, killed} with
/// TTL expiry, backed by a shared [`KvStore`].
pub struct Registry {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_REGISTRATION_TTL,
        }
    }

    pub fn with_ttl(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Registers `name`. Idempotent within the TTL window: re-registering an
    /// already-registered stream extends its TTL and leaves any accumulated
    /// content untouched: the Go original overwrites the `:id` marker via
    /// `SETEX` and never touches content keys, so re-registration *extends
    /// TTL, preserves content*.
    pub async fn register(&self, name: &str) -> Result<()> {
        self.store.set_ex(&id_key(name), &[], self.ttl).await
    }

    pub async fn is_registered(&self, name: &str) -> Result<bool> {
        self.store.exists(&id_key(name)).await
    }

    pub async fn mark_closed(&self, name: &str) -> Result<()> {
        self.store.set_ex(&done_key(name), &[], self.ttl).await
    }

    pub async fn is_closed(&self, name: &str) -> Result<bool> {
        self.store.exists(&done_key(name)).await
    }

    /// Administrative kill path: exposed here, wired to no dedicated HTTP
    /// route, matching the Go original.
    pub async fn mark_killed(&self, name: &str) -> Result<()> {
        self.store.set_ex(&kill_key(name), &[], self.ttl).await
    }

    pub async fn is_killed(&self, name: &str) -> Result<bool> {
        self.store.exists(&kill_key(name)).await
    }
}
