//! End-to-end scenarios against a real HTTP server, mirroring the Go
//! original's `httptest.NewServer`-based tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relaybus::kvstore::InMemoryKvStore;
use relaybus::registry::Registry;
use relaybus::server::{self, AppState, Config};
use relaybus::stream::StreamStore;

struct TestServer {
    base_url: String,
    registry: Arc<Registry>,
}

impl TestServer {
    async fn start() -> Self {
        let kv: Arc<dyn relaybus::KvStore> = Arc::new(InMemoryKvStore::new());
        let registry = Arc::new(Registry::new(kv.clone()));
        let store = Arc::new(
            StreamStore::new(kv, registry.clone()).with_heartbeat(Duration::from_millis(200)),
        );
        let state = AppState::new(registry.clone(), store, Config::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let router = server::router(state);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            registry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[tokio::test]
async fn happy_path() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client.put(server.url("/streams/abc")).send().await.unwrap();
    assert_eq!(resp.status(), 201);

    let publish = tokio::spawn({
        let client = client.clone();
        let url = server.url("/streams/abc");
        async move { client.post(url).body("hello world").send().await.unwrap() }
    });

    let subscribe = client.get(server.url("/streams/abc")).send().await.unwrap();
    assert_eq!(subscribe.status(), 200);
    let body = subscribe.text().await.unwrap();
    assert_eq!(body, "hello world");

    let publish_resp = publish.await.unwrap();
    assert_eq!(publish_resp.status(), 200);

    let close = client
        .delete(server.url("/streams/abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(close.status(), 200);

    let after_close = client.get(server.url("/streams/abc")).send().await.unwrap();
    assert_eq!(after_close.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn late_subscriber_sees_prefix_then_live_append() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    client
        .put(server.url("/streams/late"))
        .send()
        .await
        .unwrap();

    let url = server.url("/streams/late");
    let publish_task = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client.post(&url).body("AAABBB").send().await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let subscribe = client.get(server.url("/streams/late")).send().await.unwrap();
    let body = subscribe.text().await.unwrap();
    assert!(body.contains("AAA") || body.contains("AAABBB"));

    publish_task.await.unwrap();
}

#[tokio::test]
async fn two_subscribers_see_same_bytes() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    client
        .put(server.url("/streams/fanout"))
        .send()
        .await
        .unwrap();

    let url = server.url("/streams/fanout");
    let publish_task = tokio::spawn({
        let url = url.clone();
        async move {
            reqwest::Client::new()
                .post(url)
                .body("01234")
                .send()
                .await
                .unwrap()
        }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    let get_url = server.url("/streams/fanout");
    let r1 = reqwest::get(&get_url).await.unwrap().text().await.unwrap();
    let r2 = reqwest::get(&get_url).await.unwrap().text().await.unwrap();
    assert_eq!(r1, r2);

    publish_task.await.unwrap();
}

#[tokio::test]
async fn subscribe_before_publish_exists_is_not_found() {
    let server = TestServer::start().await;
    let resp = reqwest::get(server.url("/streams/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn empty_publish_closes_at_length_zero() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    client
        .put(server.url("/streams/empty"))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(server.url("/streams/empty"))
        .body("")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let subscribe = client
        .get(server.url("/streams/empty"))
        .send()
        .await
        .unwrap();
    assert_eq!(subscribe.text().await.unwrap(), "");
}

#[tokio::test]
async fn sse_accept_header_selects_event_stream_framing() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    client
        .put(server.url("/streams/sse"))
        .send()
        .await
        .unwrap();

    let url = server.url("/streams/sse");
    let publish = tokio::spawn(async move {
        reqwest::Client::new()
            .post(url)
            .body("hello")
            .send()
            .await
            .unwrap()
    });

    let subscribe = client
        .get(server.url("/streams/sse"))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(
        subscribe.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let body = subscribe.text().await.unwrap();
    assert_eq!(body, "id: 5\ndata: hello\n\n");

    publish.await.unwrap();
}

#[tokio::test]
async fn health_check_returns_ok_body() {
    let server = TestServer::start().await;
    let resp = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn kill_terminates_the_subscriber_stream() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    client
        .put(server.url("/streams/killme"))
        .send()
        .await
        .unwrap();

    let url = server.url("/streams/killme");
    let _publish_task = tokio::spawn(async move {
        // Holds the writer lock open; never closes, so only the kill marker
        // (not a normal EOF) can end the subscriber below.
        let _ = reqwest::Client::new()
            .post(url)
            .body(reqwest::Body::wrap_stream(futures_util::stream::pending::<
                Result<bytes::Bytes, std::io::Error>,
            >()))
            .send()
            .await;
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    server.registry.mark_killed("killme").await.unwrap();

    let subscribe = tokio::time::timeout(
        Duration::from_secs(2),
        client.get(server.url("/streams/killme")).send(),
    )
    .await
    .expect("subscribe should terminate promptly on kill")
    .unwrap();
    assert_eq!(subscribe.status(), 200);
    assert_eq!(subscribe.text().await.unwrap(), "");
}

#[tokio::test]
async fn repeated_put_within_ttl_is_idempotent() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let first = client
        .put(server.url("/streams/idempotent"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);
    let second = client
        .put(server.url("/streams/idempotent"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 201);
}
