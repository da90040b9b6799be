use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use relaybus::kvstore::InMemoryKvStore;
use relaybus::registry::Registry;
use relaybus::server::{self, AppState, Config};
use relaybus::stream::StreamStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Shared bearer token required on `PUT /streams/:key`. Leave unset to
    /// allow unauthenticated stream creation.
    #[arg(long)]
    credentials: Option<String>,

    /// Subscriber keep-alive heartbeat, in seconds.
    #[arg(long, default_value_t = 15)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        info!("REDIS_URL configured at {redis_url}, but this build uses an in-process store");
    } else {
        info!("REDIS_URL not set; using in-process store (single replica only)");
    }
    let storage_base_url = std::env::var("STORAGE_BASE_URL").ok();

    let kv: Arc<dyn relaybus::KvStore> = Arc::new(InMemoryKvStore::new());
    let registry = Arc::new(Registry::new(kv.clone()));
    let store = Arc::new(
        StreamStore::new(kv, registry.clone())
            .with_heartbeat(Duration::from_secs(args.heartbeat_secs)),
    );

    let config = Config {
        heartbeat: Duration::from_secs(args.heartbeat_secs),
        credentials: args.credentials,
        storage_base_url,
    };
    let state = AppState::new(registry, store, config);

    info!("starting relaybus-server addr={}", args.addr);
    server::serve(args.addr, state)
        .await
        .context("server exited with an error")?;
    Ok(())
}
