//! Producer session: spawns the child command, tees its combined
//! stdout/stderr to both the local terminal and the broker, forwards
//! signals, and retries the whole request on top of the transport's own
//! per-connection retries. Ported from `busltee/runner.go`'s `Run`/`stream`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::Error;

use super::transport::{self, ResumableUploader};

/// Producer-side CLI configuration, mirroring `busltee/runner.go`'s
/// `Config`.
pub struct Config {
    /// `None` when the caller passed an empty/unparsable URL: the child
    /// still runs to completion, but nothing is streamed anywhere.
    pub url: Option<Url>,
    pub args: Vec<String>,
    pub insecure: bool,
    pub timeout: Option<Duration>,
    /// `--retry`: whole-request retries, attempted only when the prior
    /// attempt's failure looks transport-level rather than a permanent
    /// rejection.
    pub retry: u32,
    /// `--stream-retry`: per-connection retries inside one attempt.
    pub stream_retry: u32,
    pub sleep: Duration,
    pub request_id: Option<String>,
}

/// Runs the child process to completion, streaming its output to the
/// broker. Returns the child's exit code, or `1` if it could not be
/// started — mirroring `busltee`'s documented exit code contract.
pub async fn run(config: Config) -> i32 {
    let started = std::time::Instant::now();

    let mut child = match Command::new(&config.args[0])
        .args(&config.args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            log::error!("count#busltee.exec.error=1 error={e}");
            return 1;
        }
    };

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(64);
    let stdout_task = tokio::spawn(tee_to_channel(stdout, tx.clone(), true));
    let stderr_task = tokio::spawn(tee_to_channel(stderr, tx.clone(), false));
    drop(tx);

    let combined = StreamReader::new(ReceiverStream::new(rx));
    let source = Arc::new(AsyncMutex::new(combined));

    let upload_task = tokio::spawn(upload_with_retry(config_to_upload(&config), source));

    forward_signals(child.id());

    let exit_status = child.wait().await;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let upload_result = match tokio::time::timeout(Duration::from_secs(1), upload_task).await {
        Ok(joined) => joined.unwrap_or(Err(Error::TooManyRetries { timed_out: false })),
        Err(_) => {
            log::warn!("count#busltee.exec.upload.timeout=1");
            Err(Error::TooManyRetries { timed_out: true })
        }
    };
    if let Err(e) = upload_result {
        log::warn!("count#busltee.stream.error=1 error={e}");
    }

    log::info!(
        "busltee.run.time time={:.3}",
        started.elapsed().as_secs_f64()
    );

    match exit_status {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            log::error!("count#busltee.exec.error=1 error={e}");
            1
        }
    }
}

struct UploadConfig {
    url: Option<Url>,
    insecure: bool,
    timeout: Option<Duration>,
    retry: u32,
    stream_retry: u32,
    sleep: Duration,
    request_id: Option<String>,
}

fn config_to_upload(config: &Config) -> UploadConfig {
    UploadConfig {
        url: config.url.clone(),
        insecure: config.insecure,
        timeout: config.timeout,
        retry: config.retry,
        stream_retry: config.stream_retry,
        sleep: config.sleep,
        request_id: config.request_id.clone(),
    }
}

/// Whole-request retry loop (`--retry`), wrapping [`ResumableUploader`]'s
/// own per-connection retry (`--stream-retry`). A fresh `ResumableUploader`
/// (and thus a fresh disk buffer) is built per whole-request attempt; the
/// live source is shared across attempts so no producer byte is ever lost
/// or read twice. Only retried when the exhausted inner attempt's last
/// failure was a transport timeout, matching `runner.go`'s `isTimeout`
/// gate: a non-timeout rejection (e.g. an HTTP status the server won't
/// accept) starting a fresh, empty-buffered request from wherever the
/// shared source now sits would desync from however much the server
/// actually stored.
async fn upload_with_retry(
    config: UploadConfig,
    source: Arc<AsyncMutex<StreamReader<ReceiverStream<std::io::Result<Bytes>>, Bytes>>>,
) -> crate::error::Result<()> {
    let Some(url) = config.url.clone() else {
        log::warn!("count#busltee.stream.missingurl");
        return Err(Error::MissingUrl);
    };

    let mut whole_request_retries = 0u32;
    loop {
        let uploader = ResumableUploader::new(transport::Config {
            url: url.clone(),
            max_retries: config.stream_retry,
            sleep: config.sleep,
            insecure: config.insecure,
            connect_timeout: config.timeout,
            request_id: config.request_id.clone(),
        })?;

        match uploader.upload(source.clone()).await {
            Ok(()) => return Ok(()),
            Err(Error::TooManyRetries { timed_out: true })
                if whole_request_retries < config.retry =>
            {
                log::info!("count#busltee.stream.retry");
                whole_request_retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Copies `pipe` into both this process's own stdout/stderr (so the
/// operator still sees live output) and `tx`, the shared combined source
/// the uploader reads from.
async fn tee_to_channel<R: tokio::io::AsyncRead + Unpin>(
    mut pipe: R,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    is_stdout: bool,
) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = &buf[..n];
                let echoed = if is_stdout {
                    tokio::io::stdout().write_all(chunk).await
                } else {
                    tokio::io::stderr().write_all(chunk).await
                };
                if let Err(e) = echoed {
                    log::warn!("local echo failed err={e}");
                }
                if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

/// Forwards SIGINT/SIGTERM received by this process on to the child,
/// mirroring `busltee/runner.go`'s `deliverSignals`.
#[cfg(unix)]
fn forward_signals(child_pid: Option<u32>) {
    use tokio::signal::unix::{signal, SignalKind};

    let Some(pid) = child_pid else { return };
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigint.recv() => unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT); },
            _ = sigterm.recv() => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM); },
        }
    });
}

#[cfg(not(unix))]
fn forward_signals(_child_pid: Option<u32>) {}
