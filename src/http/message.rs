//! HTTP/1.1 request/reply parsing (spec §4.9). Message framing is an
//! out-of-scope external collaborator per spec §1 ("consumed as a
//! byte-sink that emits header events") — `httparse` fills that role
//! exactly: it turns a byte buffer into a header event list, nothing more.
//! `http::{Request, Response}` carry the parsed result because the rest of
//! the crate shouldn't hand-roll yet another header map type.

use crate::error::{Error, Result};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

/// Maximum header block `httparse` will scan before giving up. Matches
/// `httparse`'s own recommended default header-count ceiling.
const MAX_HEADERS: usize = 64;

/// Outcome of attempting to parse a header block out of a byte buffer.
pub enum ParsedHeaders<T> {
    /// Not enough bytes yet; keep reading.
    Incomplete,
    /// Header block complete; `head_len` is where the body begins.
    Complete { head: T, head_len: usize },
}

/// Parse an HTTP/1.1 request line + headers from `buf`.
pub fn parse_request(buf: &[u8]) -> Result<ParsedHeaders<Request<()>>> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_storage);
    let status = req
        .parse(buf)
        .map_err(|e| Error::Protocol(format!("malformed HTTP request: {e}")))?;

    let httparse::Status::Complete(head_len) = status else {
        return Ok(ParsedHeaders::Incomplete);
    };

    let method: Method = req
        .method
        .unwrap_or("GET")
        .parse()
        .map_err(|_| Error::Protocol("invalid HTTP method".into()))?;
    let uri: Uri = req
        .path
        .unwrap_or("/")
        .parse()
        .map_err(|_| Error::Protocol("invalid HTTP request target".into()))?;

    let mut builder = Request::builder().method(method).uri(uri).version(Version::HTTP_11);
    for header in req.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    let head = builder
        .body(())
        .map_err(|e| Error::Protocol(format!("invalid HTTP headers: {e}")))?;

    Ok(ParsedHeaders::Complete { head, head_len })
}

/// Parse an HTTP/1.1 status line + headers from `buf`.
pub fn parse_response(buf: &[u8]) -> Result<ParsedHeaders<Response<()>>> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut header_storage);
    let status = resp
        .parse(buf)
        .map_err(|e| Error::Protocol(format!("malformed HTTP response: {e}")))?;

    let httparse::Status::Complete(head_len) = status else {
        return Ok(ParsedHeaders::Incomplete);
    };

    let code = resp.code.unwrap_or(0);
    let status_code =
        StatusCode::from_u16(code).map_err(|_| Error::Protocol(format!("invalid status code {code}")))?;

    let mut builder = Response::builder().status(status_code).version(Version::HTTP_11);
    for header in resp.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    let head = builder
        .body(())
        .map_err(|e| Error::Protocol(format!("invalid HTTP headers: {e}")))?;

    Ok(ParsedHeaders::Complete { head, head_len })
}

/// How the body's length is signaled, per RFC 7230 §3.3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// `Content-Length: N` — read exactly `N` bytes.
    ContentLength(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Neither header present — no body (or body runs until connection
    /// close, which this runtime doesn't support on the server side).
    None,
}

pub fn body_framing(headers: &HeaderMap) -> BodyFraming {
    if headers
        .get(http::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        return BodyFraming::Chunked;
    }
    if let Some(len) = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        return BodyFraming::ContentLength(len);
    }
    BodyFraming::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_request_head() {
        let raw = b"POST /rpc HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        match parse_request(raw).unwrap() {
            ParsedHeaders::Complete { head, head_len } => {
                assert_eq!(head.method(), Method::POST);
                assert_eq!(head.uri().path(), "/rpc");
                assert_eq!(body_framing(head.headers()), BodyFraming::ContentLength(5));
                assert_eq!(&raw[head_len..], b"hello");
            }
            ParsedHeaders::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn reports_incomplete_head() {
        let raw = b"POST /rpc HTTP/1.1\r\nHost: x\r\n";
        assert!(matches!(parse_request(raw).unwrap(), ParsedHeaders::Incomplete));
    }

    #[test]
    fn detects_chunked_framing() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        match parse_response(raw).unwrap() {
            ParsedHeaders::Complete { head, .. } => {
                assert_eq!(body_framing(head.headers()), BodyFraming::Chunked);
            }
            ParsedHeaders::Incomplete => panic!("expected complete parse"),
        }
    }
}
