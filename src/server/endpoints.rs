//! HTTP handlers. Each is a short dispatcher over the registry/StreamStore,
//! matching `server/endpoints.go`'s handler shape.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::TryStreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::error::Error;
use crate::stream::{Chunk, StreamWriter};

use super::archive;
use super::AppState;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// `GET /health` — liveness. Body is the literal string `OK`, not JSON,
/// preserved verbatim from the original's health handler.
pub async fn health() -> &'static str {
    "OK"
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotRegistered => StatusCode::NOT_FOUND,
        Error::AlreadyOpen => StatusCode::CONFLICT,
        Error::Closed | Error::Killed => StatusCode::GONE,
        Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::StreamingUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    log::warn!("request failed status={status} err={err}");
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// `PUT /streams/:key` — create. Authenticates, registers, `201` on success,
/// `503` on any registration failure — the one status this handler maps
/// explicitly, unlike the other handlers' finer-grained status mapping.
pub async fn create_stream(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(expected) = &state.config.credentials {
        let authorized = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {expected}"))
            .unwrap_or(false);
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.registry.register(&key).await {
        Ok(()) => {
            log::info!("stream registered key={key}");
            StatusCode::CREATED.into_response()
        }
        Err(e) => {
            log::warn!("stream registration failed key={key} err={e}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

enum CopyOutcome {
    /// Clean end of body: close the stream.
    Closed,
    /// The producer disconnected mid-stream; absorbed — the client is
    /// expected to resume with a fresh POST.
    Disconnected,
    /// A read/write timeout, distinguished from a plain disconnect so it is
    /// still surfaced as a server error: the publish handler only swallows
    /// `ErrUnexpectedEOF`-shaped disconnects, not timeouts.
    Timeout,
}

/// Copies `body` into `writer`, discarding the first `skip` bytes — the
/// server's side of the resume protocol. A clean `Ok(0)` read means the
/// body ended normally; an `Err` mid-read is the transient disconnect that
/// must be absorbed, not propagated.
async fn copy_with_skip<R: AsyncRead + Unpin>(
    mut body: R,
    writer: &StreamWriter,
    skip: u64,
) -> Result<CopyOutcome, Error> {
    let mut to_skip = skip;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match body.read(&mut buf).await {
            Ok(0) => return Ok(CopyOutcome::Closed),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(CopyOutcome::Timeout),
            Err(_) => return Ok(CopyOutcome::Disconnected),
        };

        let mut chunk = &buf[..n];
        if to_skip > 0 {
            if to_skip as usize >= chunk.len() {
                to_skip -= chunk.len() as u64;
                continue;
            }
            chunk = &chunk[to_skip as usize..];
            to_skip = 0;
        }

        if chunk.is_empty() {
            continue;
        }

        match writer.append(chunk).await {
            Ok(_) => {}
            Err(Error::Closed) | Err(Error::Killed) => return Ok(CopyOutcome::Closed),
            Err(e) => return Err(e),
        }
    }
}

/// `POST /streams/:key` — publish.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let writer = match state.store.open_writer(&key).await {
        Ok(w) => w,
        Err(e) => return error_response(e),
    };

    let already_accepted = state.store.length(&key).await.unwrap_or(0);
    if already_accepted > 0 {
        log::info!("publish resume key={key} skip={already_accepted}");
    }

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&key)
        .to_string();

    let stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = StreamReader::new(stream);

    match copy_with_skip(reader, &writer, already_accepted).await {
        Ok(CopyOutcome::Disconnected) => {
            log::info!("publish disconnected (absorbed) key={key}");
            StatusCode::OK.into_response()
        }
        Ok(CopyOutcome::Timeout) => {
            log::warn!("publish timed out key={key}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Ok(CopyOutcome::Closed) => {
            if let Err(e) = writer.close().await {
                return error_response(e);
            }
            log::info!("publish closed key={key}");
            archive::spawn_archival(state.clone(), host, key);
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// True when the client's `Accept` header asks for SSE framing rather than
/// the raw passthrough.
fn wants_sse(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// `GET /streams/:key` — subscribe. Rejects pre-HTTP/1.1
/// requests: those can't carry a chunked, unbounded-length response, the
/// closest analogue here to the original's "response doesn't implement
/// `http.Flusher`" check. Framing is raw text passthrough by default, or
/// `encoders::sse` framing when the client sends
/// `Accept: text/event-stream`.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    version: Version,
) -> Response {
    if version == Version::HTTP_10 {
        log::warn!("streaming unsupported key={key} version={version:?}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "streaming unsupported").into_response();
    }

    let reader = match state.store.open_reader(&key, 0).await {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    let use_sse = wants_sse(&headers);
    let body_stream = futures_util::stream::unfold((reader, 0u64), move |(mut reader, pos)| async move {
        loop {
            match reader.next_chunk().await {
                Ok(Chunk::Data(bytes)) => {
                    let (out, next_pos) = if use_sse {
                        let framed = crate::encoders::sse::format(pos, &bytes);
                        (Bytes::from(framed), pos + bytes.len() as u64)
                    } else {
                        (Bytes::from(bytes), pos)
                    };
                    return Some((Ok::<Bytes, std::io::Error>(out), (reader, next_pos)));
                }
                Ok(Chunk::Heartbeat) => {
                    let out = if use_sse {
                        Bytes::from_static(b": hb\n\n")
                    } else {
                        Bytes::new()
                    };
                    return Some((Ok(out), (reader, pos)));
                }
                Ok(Chunk::EofNormal) | Ok(Chunk::EofAborted) => return None,
                Err(e) => {
                    log::warn!("subscribe read failed err={e}");
                    return None;
                }
            }
        }
    });

    let content_type = if use_sse { "text/event-stream" } else { "text/plain" };
    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::TRANSFER_ENCODING, "chunked")
        .header(axum::http::header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(body_stream))
        .expect("response with streamed body is well-formed")
}

/// `DELETE /streams/:key` — close. Idempotent: closing an
/// already-closed stream just re-marks it closed and re-releases a lock
/// that's already gone, both harmless no-ops.
pub async fn close_stream(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&key)
        .to_string();

    match state.store.force_close(&key).await {
        Ok(()) => {
            log::info!("stream closed via DELETE key={key}");
            archive::spawn_archival(state.clone(), host, key);
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::InMemoryKvStore;
    use crate::registry::Registry;
    use crate::stream::StreamStore;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    async fn new_store_and_writer(name: &str) -> (Arc<StreamStore>, StreamWriter) {
        let kv: Arc<dyn crate::kvstore::KvStore> = Arc::new(InMemoryKvStore::new());
        let registry = Arc::new(Registry::new(kv.clone()));
        registry.register(name).await.unwrap();
        let store = Arc::new(StreamStore::new(kv, registry));
        let writer = store.open_writer(name).await.unwrap();
        (store, writer)
    }

    #[tokio::test]
    async fn skips_already_accepted_prefix() {
        let (store, writer) = new_store_and_writer("abc").await;
        writer.append(b"hello ").await.unwrap();
        let already_accepted = store.length("abc").await.unwrap();

        let body = Cursor::new(b"hello world".to_vec());
        let outcome = copy_with_skip(body, &writer, already_accepted).await.unwrap();
        assert!(matches!(outcome, CopyOutcome::Closed));
        assert_eq!(store.length("abc").await.unwrap(), b"hello world".len() as u64);
    }

    /// An `AsyncRead` that yields a few bytes then fails, simulating a
    /// producer disconnecting mid-request.
    struct FlakyReader {
        chunks: Vec<Vec<u8>>,
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.chunks.is_empty() {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "peer disconnected",
                )));
            }
            let chunk = self.chunks.remove(0);
            buf.put_slice(&chunk);
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn disconnect_mid_body_is_absorbed_not_errored() {
        let (store, writer) = new_store_and_writer("disc").await;
        let body = FlakyReader {
            chunks: vec![b"partial".to_vec()],
        };
        let outcome = copy_with_skip(body, &writer, 0).await.unwrap();
        assert!(matches!(outcome, CopyOutcome::Disconnected));
        assert_eq!(store.length("disc").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn empty_body_closes_at_length_zero() {
        let (store, writer) = new_store_and_writer("empty").await;
        let body = Cursor::new(Vec::new());
        let outcome = copy_with_skip(body, &writer, 0).await.unwrap();
        assert!(matches!(outcome, CopyOutcome::Closed));
        assert_eq!(store.length("empty").await.unwrap(), 0);
    }
}
