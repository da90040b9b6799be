//! Best-effort async archival of a closed stream's content to object
//! storage. Grounded on `storage/archive_writer.rs` / `storage/tier.rs`'s
//! run-once-per-segment shape: here a closed stream plays the role of a
//! sealed segment, and the destination is a plain HTTP PUT instead of an
//! mmap-backed tiered copy.

use std::sync::Arc;

use super::AppState;

/// Resolves the archival destination for `host`, preferring
/// `<HOST>_STORAGE_BASE_URL` (host uppercased, `.` replaced with `_`) and
/// falling back to `default`. Mirrors `cmd/busl/main_test.go`'s
/// `getStorageBaseURL`.
pub fn resolve_storage_base_url(host: &str, default: Option<&str>) -> Option<String> {
    let env_key = format!(
        "{}_STORAGE_BASE_URL",
        host.to_uppercase().replace('.', "_").replace('-', "_")
    );
    std::env::var(&env_key)
        .ok()
        .or_else(|| default.map(str::to_string))
}

/// Fires the archive off the request path; publish/close must not block the
/// client's response on an object-storage round-trip. `host` is the
/// request's `Host` header, used to resolve a per-host storage override.
pub fn spawn_archival(state: Arc<AppState>, host: String, key: String) {
    tokio::spawn(async move {
        if let Err(e) = archive_one(&state, &host, &key).await {
            log::warn!("archival failed key={key} err={e}");
        }
    });
}

async fn archive_one(state: &AppState, host: &str, key: &str) -> crate::error::Result<()> {
    let Some(base) = resolve_storage_base_url(host, state.config.storage_base_url.as_deref())
    else {
        log::info!("no storage destination configured, skipping archival key={key}");
        return Ok(());
    };

    let content = state.store.length(key).await?;
    if content == 0 {
        log::info!("empty stream, skipping archival key={key}");
        return Ok(());
    }

    let mut reader = state.store.open_reader(key, 0).await?;
    let mut body = Vec::new();
    loop {
        match reader.next_chunk().await? {
            crate::stream::Chunk::Data(bytes) => body.extend_from_slice(&bytes),
            crate::stream::Chunk::Heartbeat => continue,
            crate::stream::Chunk::EofNormal | crate::stream::Chunk::EofAborted => break,
        }
    }

    let url = format!("{}/{}", base.trim_end_matches('/'), key);
    let resp = state.http.put(&url).body(body).send().await?;
    if !resp.status().is_success() {
        return Err(crate::error::Error::StoreUnavailable(format!(
            "archival PUT {url} returned {}",
            resp.status()
        )));
    }
    log::info!("archived key={key} url={url}");
    Ok(())
}
