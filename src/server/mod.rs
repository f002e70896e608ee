//! RPC server: run-mode lifecycle, per-connection dispatcher, and the
//! listener + worker pool that ties them together (spec §4.10/§4.11).

pub mod dispatcher;
pub mod lifecycle;
pub mod rpc_server;

pub use dispatcher::{serve_connection, ConnectionState, DispatchConfig};
pub use lifecycle::{RunMode, RunModeSignal};
pub use rpc_server::{RpcServerImpl, ServerConfig};
