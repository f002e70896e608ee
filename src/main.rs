//! Thin bootstrap for the RPC runtime server binary (spec §1 ambient
//! packaging note): parse configuration from the environment, build the
//! method registry, start the server, then block until a shutdown signal
//! arrives.
//!
//! Usage: `rpc-runtime-server`
//! Env: `RPC_LISTEN_ADDR` (default `127.0.0.1:9000`), `RPC_PROTOCOL`
//! (`bin`|`json`, default `bin`), `RPC_MIN_THREADS`, `RPC_MAX_THREADS`.

use rpc_runtime::concurrent::PoolConfig;
use rpc_runtime::error::Result;
use rpc_runtime::reactor::Timespan;
use rpc_runtime::rpc::{ServiceProcedure, ServiceRegistry, WireProtocol};
use rpc_runtime::server::{RpcServerImpl, ServerConfig};
use rpc_runtime::si::SerializationInfo;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Minimal built-in procedure every protocol server exposes, mirroring the
/// `system.*` introspection convention XML-RPC/JSON-RPC servers commonly
/// carry — useful for smoke-testing a freshly started listener.
struct SystemPing;

#[async_trait::async_trait]
impl ServiceProcedure for SystemPing {
    fn name(&self) -> &str {
        "system.ping"
    }

    async fn invoke(&self, _args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
        let mut reply = SerializationInfo::new();
        reply.set_string("pong");
        Ok(reply)
    }
}

fn env_addr(key: &str, default: &str) -> SocketAddr {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or_else(|| default.parse().unwrap())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_protocol(key: &str, default: WireProtocol) -> WireProtocol {
    match env::var(key).ok().as_deref() {
        Some("json") => WireProtocol::Json,
        Some("bin") => WireProtocol::Bin,
        _ => default,
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    rpc_runtime::logging::init();

    let addr = env_addr("RPC_LISTEN_ADDR", "127.0.0.1:9000");
    let protocol = env_protocol("RPC_PROTOCOL", WireProtocol::Bin);
    let min_threads = env_usize("RPC_MIN_THREADS", 2);
    let max_threads = env_usize("RPC_MAX_THREADS", 16).max(min_threads);

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(SystemPing))?;

    let config = ServerConfig {
        protocol,
        pool: PoolConfig { min_threads, max_threads, idle_timeout: Duration::from_secs(30) },
        ..ServerConfig::default()
    };

    let (mut server, mut mode_rx) = RpcServerImpl::new(registry, config);
    tokio::spawn(async move {
        while mode_rx.changed().await.is_ok() {
            let mode = *mode_rx.borrow();
            info!(?mode, "run mode changed");
        }
    });

    server.start(addr).await?;
    info!(%addr, ?protocol, "rpc-runtime-server listening");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight connections");
    server.stop(Timespan::from_secs(10)).await?;

    Ok(())
}
