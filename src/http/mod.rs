//! HTTP/1.1 server and client (spec §4.9).

mod body;
mod client;
mod message;
mod server;

pub use body::{encode_chunked, read_content_length, ChunkedBodyReader};
pub use client::{ClientEvent, HttpClient};
pub use message::{body_framing, parse_request, parse_response, BodyFraming, ParsedHeaders};
pub use server::{serve_connection, BasicAuthConfig, Responder, ResponderPool, Router, Service};
