//! Minimal key-value store abstraction.
//!
//! The backing key-value store (a "Redis-shaped store") is treated as an
//! external collaborator whose wire protocol this crate doesn't implement.
//! This module defines the small surface [`Registry`](crate::registry) and
//! [`StreamStore`](crate::stream::store) actually need from it — `SETEX`,
//! `EXISTS`, `GET` and friends, mirrored from `broker/redis.go` in the Go
//! original — and ships an in-memory implementation so the rest of the
//! crate, and its tests, don't depend on a running Redis.
//!
//! A production deployment would plug in a real client (e.g. the `redis`
//! crate's async multiplexed connection) behind the same trait; that impl
//! is not included here since the wire protocol is explicitly unspecified.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

/// The subset of Redis-like operations the broker relies on.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// `SETEX key ttl value` — set with an expiry, overwriting any previous value.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// `SET key value` with no expiry.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `APPEND key value`, returning the new total length.
    async fn append(&self, key: &str, value: &[u8]) -> Result<u64>;

    /// `STRLEN key`.
    async fn len(&self, key: &str) -> Result<u64>;

    /// `GETRANGE key start end` (end-exclusive, unlike Redis's inclusive
    /// `GETRANGE` — chosen to match Rust slicing conventions).
    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>>;

    /// `SETNX key value`, with an accompanying expiry so a crashed holder's
    /// lock is eventually reclaimed. Returns `true` if the lock was
    /// acquired, `false` if another holder already has it live.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// `DEL key`.
    async fn del(&self, key: &str) -> Result<()>;

    /// `EXPIRE key ttl` — refresh a key's idleness TTL without touching its
    /// value. A no-op if the key doesn't exist.
    async fn touch(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// In-process, in-memory `KvStore`. Single broker replica only — there is no
/// cross-process fan-out, unlike a real Redis-backed deployment would give
/// you for free. Good enough for a single broker instance and for tests.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for InMemoryKvStore {
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut guard = self.entries.write().await;
        guard.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut guard = self.entries.write().await;
        guard.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let guard = self.entries.read().await;
        Ok(guard.get(key).map(|e| e.is_live()).unwrap_or(false))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.entries.read().await;
        Ok(guard
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn append(&self, key: &str, value: &[u8]) -> Result<u64> {
        let mut guard = self.entries.write().await;
        let entry = guard.entry(key.to_string()).or_insert(Entry {
            value: Vec::new(),
            expires_at: None,
        });
        entry.value.extend_from_slice(value);
        Ok(entry.value.len() as u64)
    }

    async fn len(&self, key: &str) -> Result<u64> {
        let guard = self.entries.read().await;
        Ok(guard
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.len() as u64)
            .unwrap_or(0))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let guard = self.entries.read().await;
        let Some(entry) = guard.get(key).filter(|e| e.is_live()) else {
            return Ok(Vec::new());
        };
        let start = start.min(entry.value.len() as u64) as usize;
        let end = end.min(entry.value.len() as u64) as usize;
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(entry.value[start..end].to_vec())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut guard = self.entries.write().await;
        if let Some(existing) = guard.get(key) {
            if existing.is_live() {
                return Ok(false);
            }
        }
        guard.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut guard = self.entries.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut guard = self.entries.write().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
