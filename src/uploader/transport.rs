//! Resumable HTTP round-tripper. Ported from `busltee/transport.go`'s
//! `Transport`/`bodyReader`: a disk-backed tee of
//! the outbound body that can replay everything buffered so far, then keep
//! teeing the caller's live stream, on every retried POST.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::error::{Error, Result};

enum ReplayState<R> {
    Replay(tokio::fs::File),
    Live {
        source: Arc<AsyncMutex<R>>,
        sink: tokio::fs::File,
    },
    Done,
}

/// Builds the body stream for one POST attempt: replay everything buffered
/// in `buffer_path` so far, then switch to reading further bytes from the
/// shared live `source`, teeing each one into `buffer_path` as it goes. The
/// live source is wrapped in a mutex shared across every attempt in a
/// session so that, across retries, each of its bytes is read exactly once —
/// replay always comes from the file, never from re-reading `source`.
fn replay_then_tee<R>(
    buffer_path: PathBuf,
    source: Arc<AsyncMutex<R>>,
) -> impl Stream<Item = std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures_util::stream::unfold(None::<ReplayState<R>>, move |state| {
        let buffer_path = buffer_path.clone();
        let source = source.clone();
        async move {
            let mut state = match state {
                Some(s) => s,
                None => match tokio::fs::File::open(&buffer_path).await {
                    Ok(f) => ReplayState::Replay(f),
                    Err(_) => {
                        let sink = match open_append(&buffer_path).await {
                            Ok(f) => f,
                            Err(e) => return Some((Err(e), Some(ReplayState::Done))),
                        };
                        ReplayState::Live { source, sink }
                    }
                },
            };

            loop {
                match &mut state {
                    ReplayState::Replay(file) => {
                        let mut buf = vec![0u8; 64 * 1024];
                        match file.read(&mut buf).await {
                            Ok(0) => {
                                let sink = match open_append(&buffer_path).await {
                                    Ok(f) => f,
                                    Err(e) => return Some((Err(e), Some(ReplayState::Done))),
                                };
                                state = ReplayState::Live {
                                    source: source.clone(),
                                    sink,
                                };
                                continue;
                            }
                            Ok(n) => {
                                buf.truncate(n);
                                return Some((Ok(Bytes::from(buf)), Some(state)));
                            }
                            Err(e) => return Some((Err(e), Some(ReplayState::Done))),
                        }
                    }
                    ReplayState::Live { source, sink } => {
                        let mut guard = source.lock().await;
                        let mut buf = vec![0u8; 64 * 1024];
                        match guard.read(&mut buf).await {
                            Ok(0) => return None,
                            Ok(n) => {
                                drop(guard);
                                buf.truncate(n);
                                if let Err(e) = sink.write_all(&buf).await {
                                    return Some((Err(e), Some(ReplayState::Done)));
                                }
                                if let Err(e) = sink.flush().await {
                                    return Some((Err(e), Some(ReplayState::Done)));
                                }
                                return Some((Ok(Bytes::from(buf)), Some(state)));
                            }
                            Err(e) => return Some((Err(e), Some(ReplayState::Done))),
                        }
                    }
                    ReplayState::Done => return None,
                }
            }
        }
    })
}

async fn open_append(path: &std::path::Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

/// Per-session configuration for a single resumable POST.
pub struct Config {
    pub url: Url,
    /// Per-round-trip retries (`--stream-retry`): how many times a single
    /// POST may be replayed-and-resent before giving up.
    pub max_retries: u32,
    pub sleep: Duration,
    pub insecure: bool,
    pub connect_timeout: Option<Duration>,
    pub request_id: Option<String>,
}

/// Producer-side resumable uploader.
pub struct ResumableUploader {
    client: reqwest::Client,
    config: Config,
}

impl ResumableUploader {
    pub fn new(config: Config) -> Result<Self> {
        if config.url.as_str().is_empty() {
            return Err(Error::MissingUrl);
        }
        let mut builder = reqwest::Client::builder();
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    /// Streams `source` to `self.config.url`, retrying mid-stream failures
    /// by replaying the disk-backed tee buffer and continuing to read
    /// `source` from wherever it left off. Returns once the stream has been
    /// fully sent and acknowledged, or `Error::TooManyRetries` once
    /// `max_retries` is exhausted.
    ///
    /// `source` is shared (not owned) so a caller implementing the outer,
    /// whole-request retry behind the `--retry` flag can pass the same live
    /// reader into a second `upload` call: unread bytes are never lost even
    /// though this call's own disk buffer is fresh each time.
    pub async fn upload<R>(&self, source: Arc<AsyncMutex<R>>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tmp = tempfile::NamedTempFile::new()?;
        let buffer_path = tmp.path().to_path_buf();
        let mut retries = 0u32;

        loop {
            let stream = replay_then_tee(buffer_path.clone(), source.clone());
            let body = reqwest::Body::wrap_stream(stream);
            let mut req = self.client.post(self.config.url.clone()).body(body);
            if let Some(id) = &self.config.request_id {
                req = req.header("Request-Id", id);
            }

            let outcome = req.send().await;
            let should_retry = match &outcome {
                Ok(resp) if resp.status().is_success() => false,
                _ => true,
            };

            if !should_retry {
                log::info!("stream.success");
                return Ok(());
            }

            // A non-success response is a logical rejection, not a transport
            // timeout; only a transport-level error can be one.
            let timed_out = matches!(&outcome, Err(e) if e.is_timeout());

            match &outcome {
                Ok(resp) => log::warn!("stream.error status={}", resp.status()),
                Err(e) => log::warn!("stream.error err={e}"),
            }

            if retries >= self.config.max_retries {
                return Err(Error::TooManyRetries { timed_out });
            }
            retries += 1;
            tokio::time::sleep(self.config.sleep).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn replay_then_tee_serves_buffered_bytes_then_live_source() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(tmp.path(), b"buffered-").await.unwrap();

        let source = Arc::new(AsyncMutex::new(Cursor::new(b"live".to_vec())));
        let stream = replay_then_tee(tmp.path().to_path_buf(), source);
        let collected: Vec<u8> = futures_util::StreamExt::collect::<Vec<_>>(stream)
            .await
            .into_iter()
            .flat_map(|r| r.unwrap().to_vec())
            .collect();
        assert_eq!(collected, b"buffered-live");
    }
}
