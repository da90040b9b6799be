//! Append-only byte store with blocking tail reads.
//!
//! Readers are long-poll cursors: each append wakes every reader blocked on
//! that stream, which then reads from its own offset up to the writer's
//! current length. This mirrors `writer.rs`/`reader.rs`'s
//! single-writer-lock-plus-notifier shape (`notifier.rs`), reimplemented
//! over [`tokio::sync::Notify`] for an async broker instead of raw
//! eventfd/inotify IPC, since a single broker process needs no
//! cross-process wake mechanism.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::error::{Error, Result};
use crate::kvstore::KvStore;
use crate::registry::Registry;

/// Content TTL: a minute of idleness.
pub const DEFAULT_CONTENT_TTL: Duration = Duration::from_secs(60);
/// Writer lock lease — renewed on every append so a live writer never loses
/// it, reclaimed automatically if the writer crashes without closing.
const WRITER_LOCK_TTL: Duration = Duration::from_secs(30);

fn content_key(name: &str) -> String {
    format!("{name}:content")
}

fn lock_key(name: &str) -> String {
    format!("{name}:lock")
}

/// Result of one tail-read attempt.
#[derive(Debug)]
pub enum Chunk {
    /// New bytes are available; the reader's offset has advanced.
    Data(Vec<u8>),
    /// No new data yet; emit a zero-byte keep-alive chunk and keep waiting.
    Heartbeat,
    /// The writer closed; no more data will ever arrive.
    EofNormal,
    /// The stream was killed.
    EofAborted,
}

struct StreamWaker {
    notify: Notify,
}

/// Append-only log keyed by stream name, built atop a [`KvStore`].
pub struct StreamStore {
    kv: Arc<dyn KvStore>,
    registry: Arc<Registry>,
    wakers: RwLock<HashMap<String, Arc<StreamWaker>>>,
    content_ttl: Duration,
    heartbeat: Duration,
}

impl StreamStore {
    pub fn new(kv: Arc<dyn KvStore>, registry: Arc<Registry>) -> Self {
        Self {
            kv,
            registry,
            wakers: RwLock::new(HashMap::new()),
            content_ttl: DEFAULT_CONTENT_TTL,
            heartbeat: Duration::from_secs(15),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    async fn waker_for(&self, name: &str) -> Arc<StreamWaker> {
        if let Some(w) = self.wakers.read().await.get(name) {
            return w.clone();
        }
        let mut guard = self.wakers.write().await;
        guard
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(StreamWaker {
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    /// Acquires the advisory single-writer lock and returns a [`StreamWriter`].
    pub async fn open_writer(self: &Arc<Self>, name: &str) -> Result<StreamWriter> {
        if !self.registry.is_registered(name).await? {
            return Err(Error::NotRegistered);
        }
        let acquired = self
            .kv
            .set_nx(&lock_key(name), &[], WRITER_LOCK_TTL)
            .await?;
        if !acquired {
            return Err(Error::AlreadyOpen);
        }
        Ok(StreamWriter {
            store: Arc::clone(self),
            name: name.to_string(),
        })
    }

    /// Current accepted length for `name` (0 if never written to).
    pub async fn length(&self, name: &str) -> Result<u64> {
        self.kv.len(&content_key(name)).await
    }

    /// Opens a tail reader at `from_offset`.
    pub async fn open_reader(
        self: &Arc<Self>,
        name: &str,
        from_offset: u64,
    ) -> Result<StreamReader> {
        if !self.registry.is_registered(name).await? {
            return Err(Error::NotRegistered);
        }
        Ok(StreamReader {
            store: Arc::clone(self),
            name: name.to_string(),
            offset: from_offset,
        })
    }
}

impl StreamStore {
    /// Administrative close used by the DELETE endpoint: marks the stream
    /// closed and force-releases the writer lock regardless of whether an
    /// active publisher currently holds it. A publisher mid-stream will see
    /// its next `append` fail with `Error::Closed` immediately, rather than
    /// `closeStream` itself contending for the lock the way `open_writer`
    /// does.
    pub async fn force_close(&self, name: &str) -> Result<()> {
        self.registry.mark_closed(name).await?;
        self.kv.del(&lock_key(name)).await?;
        let waker = self.waker_for(name).await;
        waker.notify.notify_waiters();
        Ok(())
    }
}

/// A single-writer handle returned by [`StreamStore::open_writer`].
pub struct StreamWriter {
    store: Arc<StreamStore>,
    name: String,
}

impl Drop for StreamWriter {
    /// Releases the writer lock in the background, however this handle is
    /// dropped: a clean `close()`, a producer disconnect, or a publish-side
    /// timeout all end up here. `close()`/`force_close()` already delete the
    /// same key, so this is a redundant, idempotent no-op in those cases —
    /// it only matters for the disconnect/timeout paths that never call
    /// `close()`, where it's what lets the next resume `POST` reacquire the
    /// lock instead of sitting behind a stale 30s lease.
    fn drop(&mut self) {
        let store = Arc::clone(&self.store);
        let name = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = store.kv.del(&lock_key(&name)).await {
                log::warn!("failed to release writer lock on drop name={name} err={e}");
            }
        });
    }
}

impl StreamWriter {
    /// Appends `bytes`, returning the post-write length.
    pub async fn append(&self, bytes: &[u8]) -> Result<u64> {
        if self.store.registry.is_killed(&self.name).await? {
            return Err(Error::Killed);
        }
        if self.store.registry.is_closed(&self.name).await? {
            return Err(Error::Closed);
        }
        let key = content_key(&self.name);
        let n = self.store.kv.append(&key, bytes).await?;
        self.store.kv.touch(&key, self.store.content_ttl).await?;
        // Renew the writer lock lease so a long-running publish never loses it.
        self.store
            .kv
            .touch(&lock_key(&self.name), WRITER_LOCK_TTL)
            .await?;
        let waker = self.store.waker_for(&self.name).await;
        waker.notify.notify_waiters();
        Ok(n)
    }

    /// Closes the stream: marks it closed, releases the writer lock, and
    /// wakes every reader blocked at the tail (they observe EOF-normal).
    pub async fn close(self) -> Result<()> {
        self.store.registry.mark_closed(&self.name).await?;
        self.store.kv.del(&lock_key(&self.name)).await?;
        let waker = self.store.waker_for(&self.name).await;
        waker.notify.notify_waiters();
        Ok(())
    }
}

/// A long-poll tail reader returned by [`StreamStore::open_reader`].
pub struct StreamReader {
    store: Arc<StreamStore>,
    name: String,
    offset: u64,
}

impl StreamReader {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Blocks until more data is available, the stream closes, the stream
    /// is killed, or the heartbeat interval elapses. An initial length
    /// check happens on every call before waiting, so a signal missed
    /// between subscribing and the first read is compensated for.
    pub async fn next_chunk(&mut self) -> Result<Chunk> {
        let key = content_key(&self.name);
        loop {
            let total = self.store.kv.len(&key).await?;
            if self.offset < total {
                let bytes = self.store.kv.get_range(&key, self.offset, total).await?;
                self.offset = total;
                return Ok(Chunk::Data(bytes));
            }

            if self.store.registry.is_killed(&self.name).await? {
                return Ok(Chunk::EofAborted);
            }
            if self.store.registry.is_closed(&self.name).await? {
                return Ok(Chunk::EofNormal);
            }

            let waker = self.store.waker_for(&self.name).await;
            tokio::select! {
                _ = waker.notify.notified() => {}
                _ = tokio::time::sleep(self.store.heartbeat) => {
                    return Ok(Chunk::Heartbeat);
                }
            }
        }
    }
}
