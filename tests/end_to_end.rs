//! End-to-end scenarios from spec.md §8 (S1-S6), driven against a real
//! `RpcServerImpl` bound to a loopback TCP port (S1, S3-S6) or against
//! an in-memory duplex pair (S1's XML-RPC-over-HTTP responder, which
//! only needs the HTTP layer, not a full listener).

use rpc_runtime::codec::xml;
use rpc_runtime::error::{Error, Result};
use rpc_runtime::http::{HttpClient, Router};
use rpc_runtime::reactor::Timespan;
use rpc_runtime::rpc::{RemoteClient, RemoteProcedure, ServiceProcedure, ServiceRegistry, WireProtocol, XmlRpcService};
use rpc_runtime::server::{DispatchConfig, RpcServerImpl, ServerConfig};
use rpc_runtime::si::SerializationInfo;
use rpc_runtime::net::TcpSocket;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Add;

#[async_trait::async_trait]
impl ServiceProcedure for Add {
    fn name(&self) -> &str {
        "add"
    }

    async fn invoke(&self, args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
        let a = args[0].get_value::<i64>().unwrap_or(0);
        let b = args[1].get_value::<i64>().unwrap_or(0);
        let mut result = SerializationInfo::new();
        result.set_signed(a + b);
        Ok(result)
    }
}

struct Echo;

#[async_trait::async_trait]
impl ServiceProcedure for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, mut args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
        Ok(args.pop().unwrap_or_default())
    }
}

struct Inc;

#[async_trait::async_trait]
impl ServiceProcedure for Inc {
    fn name(&self) -> &str {
        "inc"
    }

    async fn invoke(&self, args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
        let n = args[0].get_value::<i64>().unwrap_or(0);
        let mut result = SerializationInfo::new();
        result.set_signed(n + 1);
        Ok(result)
    }
}

/// Throws "bad arg" whenever called with a string argument, for S4.
struct Picky;

#[async_trait::async_trait]
impl ServiceProcedure for Picky {
    fn name(&self) -> &str {
        "picky"
    }

    async fn invoke(&self, args: Vec<SerializationInfo>) -> Result<SerializationInfo> {
        if args.first().map(|a| a.get_value::<String>().is_ok()).unwrap_or(false) {
            return Err(Error::Invocation(rpc_runtime::error::Fault::new(
                rpc_runtime::error::Fault::APPLICATION_ERROR,
                "bad arg",
            )));
        }
        Ok(SerializationInfo::new())
    }
}

// S1: XML-RPC add(2, 3) over HTTP.
#[tokio::test]
async fn s1_xml_rpc_add_over_http() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Add)).unwrap();

    let mut router = Router::new();
    router.route_prefix("/RPC2", Arc::new(XmlRpcService::new(registry)));
    let router = Arc::new(router);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let tokio_listener = tokio::net::TcpListener::from_std(listener).unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = tokio_listener.accept().await.unwrap();
            let router = router.clone();
            tokio::spawn(async move {
                let device = rpc_runtime::reactor::AsyncIoDevice::new(socket);
                let _ = rpc_runtime::http::serve_connection(device, &router, Timespan::from_secs(5)).await;
            });
        }
    });

    let body = xml::encode_call(
        "add",
        &{
            let mut a = SerializationInfo::new();
            a.set_signed(2);
            let mut b = SerializationInfo::new();
            b.set_signed(3);
            vec![a, b]
        },
    )
    .unwrap();

    let mut client = HttpClient::connect(addr).await.unwrap();
    let request = http::Request::builder()
        .method("POST")
        .uri("/RPC2")
        .header(http::header::CONTENT_LENGTH, body.len())
        .body(body)
        .unwrap();
    let response = client.execute(request, Timespan::from_secs(5)).await.unwrap();

    match xml::decode_message(response.body()).unwrap() {
        xml::Message::Response(si) => assert_eq!(si.get_value::<i64>().unwrap(), 5),
        other => panic!("expected a methodResponse, got {other:?}"),
    }
}

fn server_config(protocol: WireProtocol) -> ServerConfig {
    ServerConfig {
        protocol,
        read_timeout: Timespan::from_secs(5),
        write_timeout: Timespan::from_secs(5),
        keep_alive_timeout: Timespan::from_millis(200),
        ..ServerConfig::default()
    }
}

async fn start_server(registry: Arc<ServiceRegistry>, protocol: WireProtocol) -> (RpcServerImpl, SocketAddr) {
    let (mut server, _mode_rx) = RpcServerImpl::new(registry, server_config(protocol));
    server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

// S3: JSON-RPC increment.
#[tokio::test]
async fn s3_json_rpc_increment() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Inc)).unwrap();
    let (mut server, addr) = start_server(registry, WireProtocol::Json).await;

    let socket = TcpSocket::connect(addr).await.unwrap();
    let client = Arc::new(Mutex::new(RemoteClient::new(socket, WireProtocol::Json)));
    let procedure = RemoteProcedure::new(client, "inc", Timespan::from_secs(5));

    let mut arg = SerializationInfo::new();
    arg.set_signed(41);
    let result = procedure.call(vec![arg]).await.unwrap();
    assert_eq!(result.get_value::<i64>().unwrap(), 42);

    server.stop(Timespan::from_secs(5)).await.unwrap();
}

// S4: the fault path, once per protocol.
#[tokio::test]
async fn s4_fault_path_xml_rpc() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Picky)).unwrap();
    let mut router = Router::new();
    router.route_prefix("/RPC2", Arc::new(XmlRpcService::new(registry)));
    let router = Arc::new(router);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let tokio_listener = tokio::net::TcpListener::from_std(listener).unwrap();
    tokio::spawn(async move {
        loop {
            let (socket, _) = tokio_listener.accept().await.unwrap();
            let router = router.clone();
            tokio::spawn(async move {
                let device = rpc_runtime::reactor::AsyncIoDevice::new(socket);
                let _ = rpc_runtime::http::serve_connection(device, &router, Timespan::from_secs(5)).await;
            });
        }
    });

    let mut s = SerializationInfo::new();
    s.set_string("oops");
    let body = xml::encode_call("picky", &[s]).unwrap();
    let mut client = HttpClient::connect(addr).await.unwrap();
    let request = http::Request::builder()
        .method("POST")
        .uri("/RPC2")
        .header(http::header::CONTENT_LENGTH, body.len())
        .body(body)
        .unwrap();
    let response = client.execute(request, Timespan::from_secs(5)).await.unwrap();
    match xml::decode_message(response.body()).unwrap() {
        xml::Message::Fault { message, .. } => assert_eq!(message, "bad arg"),
        other => panic!("expected a fault, got {other:?}"),
    }
}

#[tokio::test]
async fn s4_fault_path_json_rpc() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Picky)).unwrap();
    let (mut server, addr) = start_server(registry, WireProtocol::Json).await;

    let socket = TcpSocket::connect(addr).await.unwrap();
    let client = Arc::new(Mutex::new(RemoteClient::new(socket, WireProtocol::Json)));
    let procedure = RemoteProcedure::new(client, "picky", Timespan::from_secs(5));

    let mut s = SerializationInfo::new();
    s.set_string("oops");
    let err = procedure.call(vec![s]).await.unwrap_err();
    match err {
        Error::Invocation(fault) => assert_eq!(fault.message, "bad arg"),
        other => panic!("expected an invocation fault, got {other:?}"),
    }

    server.stop(Timespan::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn s4_fault_path_binary_rpc() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Picky)).unwrap();
    let (mut server, addr) = start_server(registry, WireProtocol::Bin).await;

    let socket = TcpSocket::connect(addr).await.unwrap();
    let client = Arc::new(Mutex::new(RemoteClient::new(socket, WireProtocol::Bin)));
    let procedure = RemoteProcedure::new(client, "picky", Timespan::from_secs(5));

    let mut s = SerializationInfo::new();
    s.set_string("oops");
    let err = procedure.call(vec![s]).await.unwrap_err();
    match err {
        Error::Invocation(fault) => assert_eq!(fault.message, "bad arg"),
        other => panic!("expected an invocation fault, got {other:?}"),
    }

    server.stop(Timespan::from_secs(5)).await.unwrap();
}

// S5: keep-alive pipelining, then an idle connection is closed by
// keepAliveTimeout before a further request is processed (dispatcher.rs
// uses keepAliveTimeout, not readTimeout, to bound the between-messages
// idle wait; readTimeout bounds completing a message already in progress).
#[tokio::test]
async fn s5_pipelined_requests_then_keep_alive_timeout_closes_connection() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Echo)).unwrap();
    let (mut server, addr) = start_server(registry, WireProtocol::Bin).await;

    let socket = TcpSocket::connect(addr).await.unwrap();
    let client = Arc::new(Mutex::new(RemoteClient::new(socket, WireProtocol::Bin)));
    let procedure = RemoteProcedure::new(client.clone(), "echo", Timespan::from_secs(5));

    for word in ["first", "second"] {
        let mut arg = SerializationInfo::new();
        arg.set_string(word);
        let result = procedure.call(vec![arg]).await.unwrap();
        assert_eq!(result.get_value::<String>().unwrap(), word);
    }

    // Idle past the server's 200ms read_timeout with no further request;
    // the server closes the connection and the next call observes EOF.
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let mut arg = SerializationInfo::new();
    arg.set_string("third");
    let err = procedure.call(vec![arg]).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    server.stop(Timespan::from_secs(5)).await.unwrap();
}

// S6: cancellation. `beginExecute` then `cancel()` before the reply
// arrives; `finished` fires once with an I/O error and the socket closes.
#[tokio::test]
async fn s6_cancellation_closes_socket_and_finished_reports_error() {
    let (client_io, _server_io) = tokio::io::duplex(256);
    let client = Arc::new(Mutex::new(RemoteClient::new(
        rpc_runtime::reactor::AsyncIoDevice::new(client_io),
        WireProtocol::Bin,
    )));
    let procedure = RemoteProcedure::new(client.clone(), "echo", Timespan::from_secs(30));

    let mut arg = SerializationInfo::new();
    arg.set_string("hi");
    let pending = procedure.begin(vec![arg]);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    pending.cancel().await;
    let err = pending.finished().await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    let mut again = SerializationInfo::new();
    again.set_string("again");
    let err = client.lock().await.call("echo", vec![again], Timespan::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

// Exercises the raw binary dispatcher's `DispatchConfig` directly, rather
// than through `RpcServerImpl`, covering spec §8 property 6 (keepAliveTimeout
// on an otherwise-idle connection doesn't affect other connections).
#[tokio::test]
async fn keep_alive_timeout_is_per_connection() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(Echo)).unwrap();
    let config = DispatchConfig {
        protocol: WireProtocol::Bin,
        read_timeout: Timespan::from_secs(5),
        write_timeout: Timespan::from_secs(5),
        keep_alive_timeout: Timespan::from_millis(100),
    };

    let (a_client, a_server) = tokio::io::duplex(1024);
    let (b_client, b_server) = tokio::io::duplex(1024);
    tokio::spawn(rpc_runtime::server::serve_connection(
        rpc_runtime::reactor::AsyncIoDevice::new(a_server),
        registry.clone(),
        config,
    ));
    tokio::spawn(rpc_runtime::server::serve_connection(
        rpc_runtime::reactor::AsyncIoDevice::new(b_server),
        registry,
        config,
    ));

    // Connection A goes idle past keep_alive_timeout and is closed by the
    // server; connection B, used immediately, is unaffected.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    let b = Arc::new(Mutex::new(RemoteClient::new(rpc_runtime::reactor::AsyncIoDevice::new(b_client), WireProtocol::Bin)));
    let procedure = RemoteProcedure::new(b, "echo", Timespan::from_secs(5));
    let mut arg = SerializationInfo::new();
    arg.set_string("still alive");
    let result = procedure.call(vec![arg]).await.unwrap();
    assert_eq!(result.get_value::<String>().unwrap(), "still alive");

    drop(a_client);
}
