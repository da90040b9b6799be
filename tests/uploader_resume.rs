//! Exercises `ResumableUploader`'s per-connection retry against a server
//! that fails a fixed number of times before accepting the request.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use relaybus::uploader::transport::{Config, ResumableUploader};

struct FlakyState {
    fail_until: usize,
    attempts: AtomicUsize,
}

async fn flaky_handler(
    State(state): State<Arc<FlakyState>>,
    body: axum::body::Bytes,
) -> StatusCode {
    let attempt = state.attempts.fetch_add(1, Ordering::SeqCst);
    assert_eq!(&body[..], b"hello world");
    if attempt < state.fail_until {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn start_flaky_server(fail_until: usize) -> (SocketAddr, Arc<FlakyState>) {
    let state = Arc::new(FlakyState {
        fail_until,
        attempts: AtomicUsize::new(0),
    });
    let router = Router::new()
        .route("/upload", post(flaky_handler))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, state)
}

#[tokio::test]
async fn retries_until_server_accepts() {
    let (addr, state) = start_flaky_server(2).await;
    let url = Url::parse(&format!("http://{addr}/upload")).unwrap();

    let uploader = ResumableUploader::new(Config {
        url,
        max_retries: 5,
        sleep: Duration::from_millis(5),
        insecure: false,
        connect_timeout: None,
        request_id: None,
    })
    .unwrap();

    let source = Arc::new(AsyncMutex::new(std::io::Cursor::new(b"hello world".to_vec())));
    uploader.upload(source).await.unwrap();

    assert_eq!(state.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let (addr, state) = start_flaky_server(100).await;
    let url = Url::parse(&format!("http://{addr}/upload")).unwrap();

    let uploader = ResumableUploader::new(Config {
        url,
        max_retries: 2,
        sleep: Duration::from_millis(5),
        insecure: false,
        connect_timeout: None,
        request_id: None,
    })
    .unwrap();

    let source = Arc::new(AsyncMutex::new(std::io::Cursor::new(b"hello world".to_vec())));
    let result = uploader.upload(source).await;
    assert!(result.is_err());
    assert_eq!(state.attempts.load(Ordering::SeqCst), 3);
}
