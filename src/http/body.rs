//! Content-length and chunked-transfer-encoding body framing (spec §4.9,
//! supplemented from original_source's `http/client.cpp`/
//! `json/httpclientimpl.h`, which perform both).

use crate::error::{Error, Result};
use crate::reactor::{IODevice, StreamBuffer, Timespan};

/// Read exactly `len` bytes of body from `buf`, pulling more from `device`
/// as needed. `leftover` is the body bytes already sitting in the read
/// buffer past the header block.
pub async fn read_content_length<D: IODevice>(
    stream: &mut StreamBuffer<D>,
    leftover: &[u8],
    len: usize,
    deadline: Timespan,
) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(len);
    body.extend_from_slice(&leftover[..leftover.len().min(len)]);
    while body.len() < len {
        let chunk = stream.fill(deadline).await?;
        if chunk.is_empty() {
            return Err(Error::Protocol("connection closed mid-body".into()));
        }
        let take = chunk.len().min(len - body.len());
        body.extend_from_slice(&chunk[..take]);
    }
    Ok(body)
}

/// Incrementally decodes `Transfer-Encoding: chunked` framing
/// (RFC 7230 §4.1): `<hex size>\r\n<data>\r\n`, repeated, terminated by a
/// zero-size chunk and a final `\r\n` (trailers are read and discarded).
pub struct ChunkedBodyReader {
    done: bool,
}

impl ChunkedBodyReader {
    pub fn new() -> Self {
        Self { done: false }
    }

    /// Read the whole chunked body to completion.
    pub async fn read_all<D: IODevice>(
        &mut self,
        stream: &mut StreamBuffer<D>,
        leftover: &[u8],
        deadline: Timespan,
    ) -> Result<Vec<u8>> {
        let mut pending = leftover.to_vec();
        let mut body = Vec::new();

        loop {
            while !self.done {
                match self.try_take_chunk(&mut pending)? {
                    Some(data) => body.extend_from_slice(&data),
                    None => break,
                }
            }
            if self.done {
                return Ok(body);
            }
            let chunk = stream.fill(deadline).await?;
            if chunk.is_empty() {
                return Err(Error::Protocol("connection closed mid-chunk".into()));
            }
            pending.extend_from_slice(chunk);
        }
    }

    /// Pull one chunk out of `pending` if a complete `<size>\r\n<data>\r\n`
    /// frame is buffered. Leaves unconsumed bytes in `pending`.
    fn try_take_chunk(&mut self, pending: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
        let Some(line_end) = find_crlf(pending) else {
            return Ok(None);
        };
        let size_line = std::str::from_utf8(&pending[..line_end])
            .map_err(|_| Error::Protocol("invalid chunk size line".into()))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::Protocol(format!("invalid chunk size: {size_str}")))?;

        let data_start = line_end + 2;
        if size == 0 {
            // Zero-size chunk: consume trailers up to the blank line.
            let Some(trailer_end) = find_double_crlf(&pending[data_start..]) else {
                return Ok(None);
            };
            pending.drain(..data_start + trailer_end + 4);
            self.done = true;
            return Ok(Some(Vec::new()));
        }

        let data_end = data_start + size;
        if pending.len() < data_end + 2 {
            return Ok(None);
        }
        let data = pending[data_start..data_end].to_vec();
        pending.drain(..data_end + 2);
        Ok(Some(data))
    }
}

impl Default for ChunkedBodyReader {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Encode `data` as a single chunk plus the terminating zero-chunk, for
/// callers that write a whole body at once.
pub fn encode_chunked(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n0\r\n\r\n");
    out
}
