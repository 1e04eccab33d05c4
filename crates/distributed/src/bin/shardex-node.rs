use std::env;
use std::sync::Arc;

use shardex_common::{ExecConfig, Location};
use shardex_distributed::{serve, Node};
use shardex_exchange::TcpChannelFactory;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16_or_default(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let host = env_or_default("SHARDEX_NODE_HOST", "127.0.0.1");
    let port = env_u16_or_default("SHARDEX_NODE_PORT", 7000);
    let bind = env_or_default("SHARDEX_NODE_BIND", &format!("0.0.0.0:{port}"));
    let config = ExecConfig::from_env();

    let location = Location::new(host, port);
    let node = Arc::new(Node::in_memory(location.clone(), Arc::new(TcpChannelFactory), config.clone()));
    let listener = TcpListener::bind(&bind).await?;
    info!(%location, %bind, batch_size_rows = config.batch_size_rows, lock_wait_timeout_ms = config.lock_wait_timeout_ms, "shardex-node starting");

    tokio::select! {
        r = serve(listener, node) => r?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
