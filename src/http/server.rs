//! HTTP server: routes requests to services by path, drives each
//! service's `Responder` lifecycle, and enforces Basic auth (spec §4.9).

use super::body::{read_content_length, ChunkedBodyReader};
use super::message::{body_framing, parse_request, BodyFraming, ParsedHeaders};
use crate::error::{Error, Result};
use crate::reactor::{IODevice, StreamBuffer, Timespan};
use base64::Engine;
use http::{Request, Response, StatusCode};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;

/// A service-bound credential check for Basic auth (spec §4.9: "Services
/// may mark themselves as requiring basic authentication; failed auth
/// produces `401 Unauthorized` with the service's realm and optional
/// canned body").
pub struct BasicAuthConfig {
    pub realm: String,
    pub body: Option<Vec<u8>>,
    pub check: Arc<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

/// Per-request lifecycle a service drives through its own pool (spec
/// §4.9): `begin_request` sees the parsed head, `read_body` is called
/// once per body chunk as it arrives, `reply` produces the response once
/// the body is fully consumed.
#[async_trait::async_trait]
pub trait Responder: Send {
    async fn begin_request(&mut self, request: &Request<()>) -> Result<()>;
    async fn read_body(&mut self, chunk: &[u8]) -> Result<()>;
    async fn reply(&mut self, request: &Request<()>) -> Result<Response<Vec<u8>>>;
}

/// A routable HTTP service. Responders are created/released through a
/// service-owned pool rather than one per request, mirroring spec §4.9's
/// "creates/releases `Responder` instances via a service-owned pool".
pub trait Service: Send + Sync {
    fn basic_auth(&self) -> Option<&BasicAuthConfig> {
        None
    }

    fn acquire(&self) -> Box<dyn Responder>;

    /// Default pool behaviour: just drop it. Override to actually recycle.
    fn release(&self, _responder: Box<dyn Responder>) {}
}

/// Recycles responders produced by `factory` through a simple free list,
/// the concrete pool most services will want (spec §4.9's "service-owned
/// pool").
pub struct ResponderPool<F> {
    factory: F,
    free: Mutex<Vec<Box<dyn Responder>>>,
    auth: Option<BasicAuthConfig>,
}

impl<F> ResponderPool<F>
where
    F: Fn() -> Box<dyn Responder> + Send + Sync,
{
    pub fn new(factory: F) -> Self {
        Self { factory, free: Mutex::new(Vec::new()), auth: None }
    }

    pub fn with_basic_auth(mut self, auth: BasicAuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl<F> Service for ResponderPool<F>
where
    F: Fn() -> Box<dyn Responder> + Send + Sync,
{
    fn basic_auth(&self) -> Option<&BasicAuthConfig> {
        self.auth.as_ref()
    }

    fn acquire(&self) -> Box<dyn Responder> {
        self.free.lock().pop().unwrap_or_else(&self.factory)
    }

    fn release(&self, responder: Box<dyn Responder>) {
        self.free.lock().push(responder);
    }
}

enum PathMatcher {
    Prefix(String),
    Regex(Regex),
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(p) => path.starts_with(p.as_str()),
            Self::Regex(r) => r.is_match(path),
        }
    }
}

/// Maps request paths to services, longest-prefix-first so a more
/// specific route always wins over a catch-all (mirrors the teacher's
/// `ModuleRegistry` prefix-length-sorted routing table, generalized from
/// command prefixes to URL paths).
#[derive(Default)]
pub struct Router {
    routes: Vec<(PathMatcher, Arc<dyn Service>)>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn route_prefix(&mut self, prefix: impl Into<String>, service: Arc<dyn Service>) {
        self.routes.push((PathMatcher::Prefix(prefix.into()), service));
        self.routes.sort_by(|a, b| matcher_weight(&b.0).cmp(&matcher_weight(&a.0)));
    }

    pub fn route_regex(&mut self, pattern: Regex, service: Arc<dyn Service>) {
        self.routes.push((PathMatcher::Regex(pattern), service));
    }

    fn resolve(&self, path: &str) -> Option<&Arc<dyn Service>> {
        self.routes.iter().find(|(m, _)| m.matches(path)).map(|(_, s)| s)
    }
}

fn matcher_weight(m: &PathMatcher) -> usize {
    match m {
        PathMatcher::Prefix(p) => p.len(),
        PathMatcher::Regex(_) => 0,
    }
}

/// Drives one connection to completion: parse request → route → auth →
/// read body → dispatch → write reply → repeat until the peer closes the
/// connection or asks not to keep it alive.
pub async fn serve_connection<D: IODevice>(
    device: D,
    router: &Router,
    read_timeout: Timespan,
) -> Result<()> {
    let mut stream = StreamBuffer::new(device);
    let mut residual: Vec<u8> = Vec::new();

    loop {
        let Some((request, leftover)) = read_request_head(&mut stream, &mut residual, read_timeout).await? else {
            return Ok(()); // peer closed between requests
        };

        let path = request.uri().path().to_owned();
        let keep_alive = !matches!(
            request.headers().get(http::header::CONNECTION).and_then(|v| v.to_str().ok()),
            Some(v) if v.eq_ignore_ascii_case("close")
        );

        let response = match router.resolve(&path) {
            Some(service) => {
                handle_request(service.as_ref(), request, &mut stream, &leftover, read_timeout).await?
            }
            None => not_found(),
        };

        write_response(&mut stream, &response, read_timeout).await?;
        if !keep_alive {
            return Ok(());
        }
    }
}

async fn read_request_head<D: IODevice>(
    stream: &mut StreamBuffer<D>,
    residual: &mut Vec<u8>,
    deadline: Timespan,
) -> Result<Option<(Request<()>, Vec<u8>)>> {
    loop {
        if let ParsedHeaders::Complete { head, head_len } = parse_request(residual)? {
            let leftover = residual.split_off(head_len);
            residual.clear();
            return Ok(Some((head, leftover)));
        }
        let chunk = stream.fill(deadline).await?;
        if chunk.is_empty() {
            return if residual.is_empty() {
                Ok(None)
            } else {
                Err(Error::Protocol("connection closed mid-request".into()))
            };
        }
        residual.extend_from_slice(chunk);
    }
}

async fn handle_request<D: IODevice>(
    service: &dyn Service,
    request: Request<()>,
    stream: &mut StreamBuffer<D>,
    leftover: &[u8],
    deadline: Timespan,
) -> Result<Response<Vec<u8>>> {
    if let Some(auth) = service.basic_auth() {
        if !check_basic_auth(&request, auth) {
            return Ok(unauthorized(auth));
        }
    }

    let mut responder = service.acquire();
    responder.begin_request(&request).await?;

    let body = match body_framing(request.headers()) {
        BodyFraming::ContentLength(len) => read_content_length(stream, leftover, len, deadline).await?,
        BodyFraming::Chunked => {
            ChunkedBodyReader::new().read_all(stream, leftover, deadline).await?
        }
        BodyFraming::None => leftover.to_vec(),
    };
    if !body.is_empty() {
        responder.read_body(&body).await?;
    }

    let reply = responder.reply(&request).await;
    service.release(responder);
    reply
}

fn check_basic_auth(request: &Request<()>, auth: &BasicAuthConfig) -> bool {
    let Some(value) = request.headers().get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(b64) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(b64) else {
        return false;
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = text.split_once(':') else {
        return false;
    };
    (auth.check)(user, pass)
}

fn unauthorized(auth: &BasicAuthConfig) -> Response<Vec<u8>> {
    let body = auth.body.clone().unwrap_or_default();
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(
            http::header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", auth.realm),
        )
        .header(http::header::CONTENT_LENGTH, body.len())
        .body(body)
        .expect("well-formed 401 response")
}

fn not_found() -> Response<Vec<u8>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(http::header::CONTENT_LENGTH, 0)
        .body(Vec::new())
        .expect("well-formed 404 response")
}

async fn write_response<D: IODevice>(
    stream: &mut StreamBuffer<D>,
    response: &Response<Vec<u8>>,
    deadline: Timespan,
) -> Result<()> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status().as_str(),
        response.status().canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(response.body());

    stream.queue(&out);
    stream.flush_all(deadline).await
}
