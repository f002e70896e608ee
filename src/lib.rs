//! Multi-protocol RPC runtime: a `SerializationInfo` data model, three wire
//! codecs (XML-RPC, binary RPC, JSON-RPC), a tokio-backed reactor, and the
//! HTTP/TCP transport and RPC server glue built on top of them.

pub mod concurrent;
pub mod error;
pub mod logging;
pub mod si;
pub mod codec;
pub mod reactor;
pub mod net;
pub mod http;
pub mod rpc;
pub mod server;

pub use error::{Error, Fault, Result};
pub use si::SerializationInfo;
