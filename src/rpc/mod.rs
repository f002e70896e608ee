//! RPC client/server glue (spec §4.10): the method dispatch table and the
//! connection-oriented client used by both test code and, inside
//! `server/`, the per-connection dispatcher's reply path.

pub mod client;
pub mod registry;
pub mod xmlrpc;

pub use client::{Pending, RemoteClient, RemoteProcedure, WireProtocol};
pub use registry::{ServiceProcedure, ServiceRegistry};
pub use xmlrpc::XmlRpcService;
