//! `RpcServerImpl`: listener + worker pool (spec §4.11).
//!
//! Grounded on the teacher's `runtime/runtime.rs` `Runtime` for the overall
//! "own the registry, own the lifecycle, expose start/shutdown" shape —
//! generalized from "tick loops per module" to "one elastic worker pool
//! that serves accepted connections to completion", per spec §4.11's
//! listener-thread-plus-worker-pool architecture.

use crate::concurrent::{ConcurrentProcessor, MessageProcessor, PoolConfig};
use crate::error::{Error, Result};
use crate::net::TcpServer;
use crate::reactor::Timespan;
use crate::rpc::{ServiceRegistry, WireProtocol};
use crate::server::dispatcher::{serve_connection, DispatchConfig};
use crate::server::lifecycle::{RunMode, RunModeSignal};
use async_trait::async_trait;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub protocol: WireProtocol,
    pub backlog: u32,
    pub read_timeout: Timespan,
    pub write_timeout: Timespan,
    pub keep_alive_timeout: Timespan,
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: WireProtocol::Bin,
            backlog: 1024,
            read_timeout: Timespan::from_secs(30),
            write_timeout: Timespan::from_secs(30),
            keep_alive_timeout: Timespan::from_secs(60),
            pool: PoolConfig::default(),
        }
    }
}

/// One accepted connection, handed to a pool worker. A worker occupies
/// itself with exactly one connection until it closes (spec §4.11: "one
/// worker is released to drive the connection state machine until it goes
/// Idle again" — collapsed here to "until it closes", since connection
/// objects in this design aren't handed back to the reactor between
/// messages).
struct ConnectionProcessor {
    registry: Arc<ServiceRegistry>,
    dispatch: DispatchConfig,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageProcessor for ConnectionProcessor {
    type Message = crate::net::TcpSocket;
    type Error = Infallible;

    async fn process(&self, socket: Self::Message) -> std::result::Result<(), Infallible> {
        self.active.fetch_add(1, Ordering::SeqCst);
        serve_connection(socket, self.registry.clone(), self.dispatch).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener + elastic worker pool (spec §4.11). Owns the `ServiceRegistry`
/// lock: registration is only valid while `Stopped`.
pub struct RpcServerImpl {
    registry: Arc<ServiceRegistry>,
    config: ServerConfig,
    mode: RunModeSignal,
    processor: Option<Arc<ConcurrentProcessor<ConnectionProcessor>>>,
    accept_task: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicUsize>,
    local_addr: Option<SocketAddr>,
}

impl RpcServerImpl {
    pub fn new(registry: Arc<ServiceRegistry>, config: ServerConfig) -> (Self, watch::Receiver<RunMode>) {
        let (mode, rx) = RunModeSignal::new();
        (
            Self {
                registry,
                config,
                mode,
                processor: None,
                accept_task: None,
                active_connections: Arc::new(AtomicUsize::new(0)),
                local_addr: None,
            },
            rx,
        )
    }

    pub fn mode(&self) -> RunMode {
        self.mode.current()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind and start accepting connections.
    pub async fn start(&mut self, addr: SocketAddr) -> Result<()> {
        if self.mode() != RunMode::Stopped {
            return Err(Error::System("server must be Stopped before it can start".into()));
        }
        self.mode.set(RunMode::Starting);
        self.registry.lock_for_serving();

        let listener = match TcpServer::bind(addr, self.config.backlog).await {
            Ok(l) => l,
            Err(e) => {
                self.mode.set(RunMode::Failed);
                self.registry.unlock();
                return Err(e);
            }
        };
        self.local_addr = listener.local_addr().ok();

        let dispatch = DispatchConfig {
            protocol: self.config.protocol,
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
            keep_alive_timeout: self.config.keep_alive_timeout,
        };
        let processor = Arc::new(ConcurrentProcessor::new(
            ConnectionProcessor { registry: self.registry.clone(), dispatch, active: self.active_connections.clone() },
            self.config.pool,
        ));

        let accept_task = tokio::spawn(accept_loop(listener, processor.clone()));
        self.processor = Some(processor);
        self.accept_task = Some(accept_task);
        self.mode.set(RunMode::Running);
        Ok(())
    }

    /// Stop accepting new connections, wait up to `deadline` for in-flight
    /// connections to finish, then mark the server Stopped (spec §4.11
    /// "graceful shutdown").
    pub async fn stop(&mut self, deadline: Timespan) -> Result<()> {
        if self.mode() != RunMode::Running {
            return Err(Error::System("server is not Running".into()));
        }
        self.mode.set(RunMode::Terminating);

        if let Some(task) = self.accept_task.take() {
            task.abort();
        }

        let drain_deadline = tokio::time::Instant::now() + std::time::Duration::from(deadline);
        while self.active_connections.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < drain_deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        self.processor = None;
        self.registry.unlock();
        self.mode.set(RunMode::Stopped);
        Ok(())
    }
}

async fn accept_loop(listener: TcpServer, processor: Arc<ConcurrentProcessor<ConnectionProcessor>>) {
    loop {
        match listener.accept().await {
            Ok((socket, _peer)) => processor.submit(socket),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RemoteClient, RemoteProcedure, ServiceProcedure};
    use crate::si::SerializationInfo;
    use tokio::sync::Mutex;

    struct Add;

    #[async_trait]
    impl ServiceProcedure for Add {
        fn name(&self) -> &str {
            "add"
        }

        async fn invoke(&self, args: Vec<SerializationInfo>) -> crate::error::Result<SerializationInfo> {
            let a = args[0].get_value::<i64>().unwrap_or(0);
            let b = args[1].get_value::<i64>().unwrap_or(0);
            let mut result = SerializationInfo::new();
            result.set_signed(a + b);
            Ok(result)
        }
    }

    #[tokio::test]
    async fn starts_serves_and_stops_gracefully() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(Arc::new(Add)).unwrap();

        let (mut server, mut mode_rx) = RpcServerImpl::new(registry, ServerConfig::default());
        server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_eq!(server.mode(), RunMode::Running);
        mode_rx.changed().await.unwrap();

        let addr = server.local_addr().unwrap();
        let socket = crate::net::TcpSocket::connect(addr).await.unwrap();
        let client = Arc::new(Mutex::new(RemoteClient::new(socket, WireProtocol::Bin)));
        let procedure = RemoteProcedure::new(client, "add", Timespan::from_secs(5));

        let mut a = SerializationInfo::new();
        a.set_signed(2);
        let mut b = SerializationInfo::new();
        b.set_signed(3);
        let result = procedure.call(vec![a, b]).await.unwrap();
        assert_eq!(result.get_value::<i64>().unwrap(), 5);

        server.stop(Timespan::from_secs(5)).await.unwrap();
        assert_eq!(server.mode(), RunMode::Stopped);
    }

    #[tokio::test]
    async fn cannot_start_twice_without_stopping() {
        let registry = Arc::new(ServiceRegistry::new());
        let (mut server, _rx) = RpcServerImpl::new(registry, ServerConfig::default());
        server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let err = server.start("127.0.0.1:0".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::System(_)));
        server.stop(Timespan::from_secs(5)).await.unwrap();
    }
}
