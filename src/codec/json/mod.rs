//! JSON-RPC codec (spec §4.6).
//!
//! The formatter emits strict JSON by default (open question decision,
//! DESIGN.md): tolerant extensions — `//`/`/* */` comments, single-quoted
//! strings, unquoted object keys, trailing commas — are read-side only. A
//! `plainkey` flag opts the *writer* into unquoted keys explicitly; nothing
//! else about the output grammar bends.

use crate::codec::{Advance, Deserializer, Formatter, ProtoResult, ProtocolError};
use crate::si::{Category, SerializationInfo};
use std::io::{self, Write};

/// Output tuning flags (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct FormatConfig {
    /// Pretty-print with newlines and two-space indents.
    pub beautify: bool,
    /// Emit unquoted object keys when the key is a valid bareword.
    pub plainkey: bool,
    /// Write non-ASCII text as raw UTF-8 instead of `\uXXXX` escapes.
    pub input_utf8: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self { beautify: false, plainkey: false, input_utf8: true }
    }
}

enum Ctx {
    Array { first: bool },
    Object { first: bool },
}

pub struct JsonFormatter<W: Write> {
    out: W,
    stack: Vec<Ctx>,
    pending_key: Option<String>,
    cfg: FormatConfig,
}

impl<W: Write> JsonFormatter<W> {
    pub fn new(out: W, cfg: FormatConfig) -> Self {
        Self { out, stack: Vec::new(), pending_key: None, cfg }
    }

    pub fn compact(out: W) -> Self {
        Self::new(out, FormatConfig::default())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn newline_indent(&mut self) -> io::Result<()> {
        if !self.cfg.beautify {
            return Ok(());
        }
        self.out.write_all(b"\n")?;
        for _ in 0..self.stack.len() {
            self.out.write_all(b"  ")?;
        }
        Ok(())
    }

    fn write_key(&mut self, key: &str) -> io::Result<()> {
        if self.cfg.plainkey && is_bareword(key) {
            self.out.write_all(key.as_bytes())?;
        } else {
            self.out.write_all(escape_json_string(key, self.cfg.input_utf8).as_bytes())?;
        }
        self.out.write_all(if self.cfg.beautify { b": " } else { b":" })
    }

    /// Handles the comma/indent/key bookkeeping that precedes every value;
    /// called by every `add_*`/`begin_*` before it writes its own payload.
    fn enter_value(&mut self) -> io::Result<()> {
        match self.stack.last_mut() {
            Some(Ctx::Array { first }) => {
                if !*first {
                    self.out.write_all(b",")?;
                }
                *first = false;
                self.newline_indent()?;
            }
            Some(Ctx::Object { first }) => {
                if !*first {
                    self.out.write_all(b",")?;
                }
                *first = false;
                self.newline_indent()?;
                let key = self.pending_key.take().unwrap_or_default();
                self.write_key(&key)?;
            }
            None => {}
        }
        Ok(())
    }

    fn write_raw(&mut self, s: &str) -> ProtoResult<()> {
        self.enter_value().and_then(|_| self.out.write_all(s.as_bytes())).map_err(io_err)
    }
}

fn io_err(e: io::Error) -> ProtocolError {
    ProtocolError::Malformed(e.to_string())
}

fn is_bareword(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_json_string(s: &str, input_utf8: bool) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c if !input_utf8 && (c as u32) > 0x7F => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_float(v: f64) -> String {
    let s = v.to_string();
    if s.contains('.') || s.contains('e') || s.contains('E') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

impl<W: Write> Formatter for JsonFormatter<W> {
    fn add_value_bool(&mut self, _name: Option<&str>, _type_name: Option<&str>, v: bool) -> ProtoResult<()> {
        self.write_raw(if v { "true" } else { "false" })
    }

    fn add_value_int(&mut self, _name: Option<&str>, _type_name: Option<&str>, v: i64) -> ProtoResult<()> {
        self.write_raw(&v.to_string())
    }

    fn add_value_unsigned(&mut self, _name: Option<&str>, _type_name: Option<&str>, v: u64) -> ProtoResult<()> {
        self.write_raw(&v.to_string())
    }

    fn add_value_float(&mut self, _name: Option<&str>, _type_name: Option<&str>, v: f64) -> ProtoResult<()> {
        self.write_raw(&format_float(v))
    }

    fn add_value_string(&mut self, _name: Option<&str>, _type_name: Option<&str>, v: &str) -> ProtoResult<()> {
        let escaped = escape_json_string(v, self.cfg.input_utf8);
        self.write_raw(&escaped)
    }

    fn add_value_wstring(&mut self, name: Option<&str>, type_name: Option<&str>, v: &[char]) -> ProtoResult<()> {
        let s: String = v.iter().collect();
        self.add_value_string(name, type_name, &s)
    }

    fn add_null(&mut self, _name: Option<&str>, _type_name: Option<&str>) -> ProtoResult<()> {
        self.write_raw("null")
    }

    fn begin_array(&mut self, _name: Option<&str>, _type_name: Option<&str>) -> ProtoResult<()> {
        self.enter_value().map_err(io_err)?;
        self.out.write_all(b"[").map_err(io_err)?;
        self.stack.push(Ctx::Array { first: true });
        Ok(())
    }

    fn finish_array(&mut self) -> ProtoResult<()> {
        let had_children = match self.stack.pop() {
            Some(Ctx::Array { first }) => !first,
            _ => return Err(ProtocolError::Unbalanced("finish_array without begin_array".into())),
        };
        if had_children {
            self.newline_indent().map_err(io_err)?;
        }
        self.out.write_all(b"]").map_err(io_err)
    }

    fn begin_object(&mut self, _name: Option<&str>, _type_name: Option<&str>) -> ProtoResult<()> {
        self.enter_value().map_err(io_err)?;
        self.out.write_all(b"{").map_err(io_err)?;
        self.stack.push(Ctx::Object { first: true });
        Ok(())
    }

    fn begin_member(&mut self, name: &str) -> ProtoResult<()> {
        self.pending_key = Some(name.to_string());
        Ok(())
    }

    fn finish_member(&mut self) -> ProtoResult<()> {
        Ok(())
    }

    fn finish_object(&mut self) -> ProtoResult<()> {
        let had_children = match self.stack.pop() {
            Some(Ctx::Object { first }) => !first,
            _ => return Err(ProtocolError::Unbalanced("finish_object without begin_object".into())),
        };
        if had_children {
            self.newline_indent().map_err(io_err)?;
        }
        self.out.write_all(b"}").map_err(io_err)
    }

    fn finish(&mut self) -> ProtoResult<()> {
        if !self.stack.is_empty() {
            return Err(ProtocolError::Unbalanced("unterminated container at finish()".into()));
        }
        Ok(())
    }
}

// ---- tolerant parsing ----------------------------------------------------

enum ParseOutcome {
    Incomplete,
    Invalid(ProtocolError),
}

impl From<ProtocolError> for ParseOutcome {
    fn from(e: ProtocolError) -> Self {
        ParseOutcome::Invalid(e)
    }
}

const MAX_DEPTH: usize = 128;

fn skip_ws_and_comments(buf: &[u8], pos: usize) -> Result<usize, ParseOutcome> {
    let mut i = pos;
    loop {
        match buf.get(i) {
            Some(b) if b.is_ascii_whitespace() => i += 1,
            Some(b'/') => match buf.get(i + 1) {
                Some(b'/') => {
                    i += 2;
                    while !matches!(buf.get(i), Some(b'\n') | None) {
                        i += 1;
                    }
                    if buf.get(i).is_none() {
                        return Err(ParseOutcome::Incomplete);
                    }
                }
                Some(b'*') => {
                    i += 2;
                    loop {
                        match (buf.get(i), buf.get(i + 1)) {
                            (Some(b'*'), Some(b'/')) => {
                                i += 2;
                                break;
                            }
                            (Some(_), _) => i += 1,
                            (None, _) => return Err(ParseOutcome::Incomplete),
                        }
                    }
                }
                _ => return Ok(i),
            },
            _ => return Ok(i),
        }
    }
}

fn parse_string(buf: &[u8], pos: usize, quote: u8) -> Result<(String, usize), ParseOutcome> {
    let mut i = pos + 1;
    let mut s = String::new();
    loop {
        let b = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
        if b == quote {
            return Ok((s, i + 1));
        }
        if b == b'\\' {
            let esc = *buf.get(i + 1).ok_or(ParseOutcome::Incomplete)?;
            match esc {
                b'"' => s.push('"'),
                b'\'' => s.push('\''),
                b'\\' => s.push('\\'),
                b'/' => s.push('/'),
                b'b' => s.push('\u{8}'),
                b'f' => s.push('\u{c}'),
                b'n' => s.push('\n'),
                b'r' => s.push('\r'),
                b't' => s.push('\t'),
                b'u' => {
                    let hex = buf.get(i + 2..i + 6).ok_or(ParseOutcome::Incomplete)?;
                    let hex_str = std::str::from_utf8(hex)
                        .map_err(|_| ProtocolError::Malformed("bad \\u escape".into()))?;
                    let cp = u32::from_str_radix(hex_str, 16)
                        .map_err(|_| ProtocolError::Malformed("bad \\u escape".into()))?;
                    s.push(char::from_u32(cp).unwrap_or('\u{fffd}'));
                    i += 4;
                }
                other => return Err(ProtocolError::Malformed(format!("bad escape \\{}", other as char)).into()),
            }
            i += 2;
        } else {
            // decode one UTF-8 scalar starting at i
            let rest = buf.get(i..).ok_or(ParseOutcome::Incomplete)?;
            let ch_len = utf8_char_len(rest[0]);
            let bytes = buf.get(i..i + ch_len).ok_or(ParseOutcome::Incomplete)?;
            let ch = std::str::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("invalid utf-8".into()))?;
            s.push_str(ch);
            i += ch_len;
        }
    }
}

fn utf8_char_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

fn is_bareword_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn parse_key(buf: &[u8], pos: usize) -> Result<(String, usize), ParseOutcome> {
    match buf.get(pos) {
        Some(b'"') => parse_string(buf, pos, b'"'),
        Some(b'\'') => parse_string(buf, pos, b'\''),
        Some(&b) if is_bareword_start(b) => {
            let mut i = pos;
            while matches!(buf.get(i), Some(&b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'$') {
                i += 1;
            }
            if buf.get(i).is_none() {
                return Err(ParseOutcome::Incomplete);
            }
            Ok((String::from_utf8_lossy(&buf[pos..i]).into_owned(), i))
        }
        Some(_) => Err(ProtocolError::Malformed("expected object key".into()).into()),
        None => Err(ParseOutcome::Incomplete),
    }
}

fn parse_number(buf: &[u8], pos: usize) -> Result<(SerializationInfo, usize), ParseOutcome> {
    let mut i = pos;
    let mut is_float = false;
    if matches!(buf.get(i), Some(b'-')) {
        i += 1;
    }
    while matches!(buf.get(i), Some(b) if b.is_ascii_digit()) {
        i += 1;
    }
    if buf.get(i).is_none() {
        return Err(ParseOutcome::Incomplete);
    }
    if matches!(buf.get(i), Some(b'.')) {
        is_float = true;
        i += 1;
        while matches!(buf.get(i), Some(b) if b.is_ascii_digit()) {
            i += 1;
        }
    }
    if matches!(buf.get(i), Some(b'e') | Some(b'E')) {
        is_float = true;
        i += 1;
        if matches!(buf.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        while matches!(buf.get(i), Some(b) if b.is_ascii_digit()) {
            i += 1;
        }
    }
    // A following digit/letter run that extends past `i` would mean we
    // stopped mid-token only because the buffer ended; any terminator
    // byte (`,`, `]`, `}`, whitespace) confirms the number is complete.
    if buf.get(i).is_none() {
        return Err(ParseOutcome::Incomplete);
    }
    let text = std::str::from_utf8(&buf[pos..i]).unwrap();
    let mut si = SerializationInfo::new();
    if is_float {
        let v: f64 = text.parse().map_err(|_| ProtocolError::Malformed(format!("bad number {text}")))?;
        si.set_float(v);
    } else if let Ok(v) = text.parse::<i64>() {
        si.set_signed(v);
    } else if let Ok(v) = text.parse::<u64>() {
        si.set_unsigned(v);
    } else {
        let v: f64 = text.parse().map_err(|_| ProtocolError::Malformed(format!("bad number {text}")))?;
        si.set_float(v);
    }
    Ok((si, i))
}

fn expect_literal(buf: &[u8], pos: usize, lit: &str) -> Result<usize, ParseOutcome> {
    let end = pos + lit.len();
    let slice = buf.get(pos..end).ok_or(ParseOutcome::Incomplete)?;
    if slice == lit.as_bytes() {
        Ok(end)
    } else {
        Err(ProtocolError::Malformed(format!("expected literal {lit}")).into())
    }
}

fn parse_value(buf: &[u8], pos: usize, depth: usize) -> Result<(SerializationInfo, usize), ParseOutcome> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::NestingTooDeep.into());
    }
    let i = skip_ws_and_comments(buf, pos)?;
    match *buf.get(i).ok_or(ParseOutcome::Incomplete)? {
        b'"' => {
            let (s, next) = parse_string(buf, i, b'"')?;
            let mut si = SerializationInfo::new();
            si.set_string(s);
            Ok((si, next))
        }
        b'\'' => {
            let (s, next) = parse_string(buf, i, b'\'')?;
            let mut si = SerializationInfo::new();
            si.set_string(s);
            Ok((si, next))
        }
        b'{' => parse_object(buf, i, depth),
        b'[' => parse_array(buf, i, depth),
        b't' => {
            let next = expect_literal(buf, i, "true")?;
            let mut si = SerializationInfo::new();
            si.set_bool(true);
            Ok((si, next))
        }
        b'f' => {
            let next = expect_literal(buf, i, "false")?;
            let mut si = SerializationInfo::new();
            si.set_bool(false);
            Ok((si, next))
        }
        b'n' => {
            let next = expect_literal(buf, i, "null")?;
            Ok((SerializationInfo::new(), next))
        }
        b'-' | b'0'..=b'9' => parse_number(buf, i),
        other => Err(ProtocolError::Malformed(format!("unexpected byte 0x{other:02x}")).into()),
    }
}

fn parse_object(buf: &[u8], pos: usize, depth: usize) -> Result<(SerializationInfo, usize), ParseOutcome> {
    let mut i = pos + 1;
    let mut si = SerializationInfo::new();
    si.set_category(Category::Object);
    loop {
        i = skip_ws_and_comments(buf, i)?;
        if *buf.get(i).ok_or(ParseOutcome::Incomplete)? == b'}' {
            return Ok((si, i + 1));
        }
        let (key, next) = parse_key(buf, i)?;
        i = skip_ws_and_comments(buf, next)?;
        if *buf.get(i).ok_or(ParseOutcome::Incomplete)? != b':' {
            return Err(ProtocolError::Malformed("expected ':' after object key".into()).into());
        }
        i += 1;
        let (child, next) = parse_value(buf, i, depth + 1)?;
        let slot = si.add_member(key);
        *slot = child;
        i = skip_ws_and_comments(buf, next)?;
        match buf.get(i) {
            Some(b',') => {
                i += 1;
                // trailing comma: peek for '}' after it
                i = skip_ws_and_comments(buf, i)?;
            }
            Some(b'}') => {
                i += 1;
                return Ok((si, i));
            }
            Some(_) => return Err(ProtocolError::Malformed("expected ',' or '}'".into()).into()),
            None => return Err(ParseOutcome::Incomplete),
        }
    }
}

fn parse_array(buf: &[u8], pos: usize, depth: usize) -> Result<(SerializationInfo, usize), ParseOutcome> {
    let mut i = pos + 1;
    let mut si = SerializationInfo::new();
    si.set_category(Category::Array);
    loop {
        i = skip_ws_and_comments(buf, i)?;
        if *buf.get(i).ok_or(ParseOutcome::Incomplete)? == b']' {
            return Ok((si, i + 1));
        }
        let (child, next) = parse_value(buf, i, depth + 1)?;
        let slot = si.add_element();
        *slot = child;
        i = skip_ws_and_comments(buf, next)?;
        match buf.get(i) {
            Some(b',') => {
                i += 1;
                i = skip_ws_and_comments(buf, i)?;
            }
            Some(b']') => {
                i += 1;
                return Ok((si, i));
            }
            Some(_) => return Err(ProtocolError::Malformed("expected ',' or ']'".into()).into()),
            None => return Err(ParseOutcome::Incomplete),
        }
    }
}

/// Byte-driven [`Deserializer`] for one JSON value. Buffers and re-attempts
/// the recursive-descent parse after each byte, same tradeoff as
/// [`crate::codec::bin::BinDeserializer`].
#[derive(Default)]
pub struct JsonDeserializer {
    buf: Vec<u8>,
    result: Option<SerializationInfo>,
}

impl JsonDeserializer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer for JsonDeserializer {
    fn advance(&mut self, byte: u8) -> ProtoResult<Advance> {
        self.buf.push(byte);
        match parse_value(&self.buf, 0, 0) {
            Ok((si, consumed)) => {
                self.result = Some(si);
                if consumed == self.buf.len() {
                    Ok(Advance::Complete)
                } else {
                    Ok(Advance::CompleteAndPutback)
                }
            }
            Err(ParseOutcome::Incomplete) => Ok(Advance::NeedMore),
            Err(ParseOutcome::Invalid(e)) => Err(e),
        }
    }

    fn take(&mut self) -> Option<SerializationInfo> {
        self.buf.clear();
        self.result.take()
    }
}

// ---- JSON-RPC envelopes (HTTP binding and raw-TCP framing) --------------

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request { id: u64, method: String, params: Vec<SerializationInfo> },
    Response { id: u64, result: SerializationInfo },
    Fault { id: u64, code: i32, message: String },
}

pub fn encode_request(id: u64, method: &str, params: &[SerializationInfo], cfg: FormatConfig) -> ProtoResult<Vec<u8>> {
    let mut params_si = SerializationInfo::new();
    params_si.set_category(Category::Array);
    for p in params {
        let slot = params_si.add_element();
        *slot = p.clone();
    }
    let mut envelope = SerializationInfo::new();
    envelope.add_member("id").set_unsigned(id);
    envelope.add_member("method").set_string(method);
    *envelope.add_member("params") = params_si;

    let mut out = Vec::new();
    let mut fmt = JsonFormatter::new(&mut out, cfg);
    crate::codec::Decomposer::decompose(&envelope, &mut fmt)?;
    Ok(out)
}

pub fn encode_response(id: u64, result: &SerializationInfo, cfg: FormatConfig) -> ProtoResult<Vec<u8>> {
    let mut envelope = SerializationInfo::new();
    envelope.add_member("id").set_unsigned(id);
    *envelope.add_member("result") = result.clone();
    envelope.add_member("error");

    let mut out = Vec::new();
    let mut fmt = JsonFormatter::new(&mut out, cfg);
    crate::codec::Decomposer::decompose(&envelope, &mut fmt)?;
    Ok(out)
}

pub fn encode_fault(id: u64, code: i32, message: &str, cfg: FormatConfig) -> ProtoResult<Vec<u8>> {
    let mut envelope = SerializationInfo::new();
    envelope.add_member("id").set_unsigned(id);
    envelope.add_member("result");
    let err = envelope.add_member("error");
    err.add_member("code").set_signed(code as i64);
    err.add_member("message").set_string(message);

    let mut out = Vec::new();
    let mut fmt = JsonFormatter::new(&mut out, cfg);
    crate::codec::Decomposer::decompose(&envelope, &mut fmt)?;
    Ok(out)
}

/// Attempts to decode one JSON-RPC envelope out of the front of `bytes`.
/// `Ok(None)` means the buffer doesn't hold a complete value yet — the
/// raw-TCP streaming case, where envelopes arrive back-to-back with no
/// length prefix and the parser's own completion is the only message
/// boundary.
pub fn try_decode_envelope(bytes: &[u8]) -> ProtoResult<Option<(Envelope, usize)>> {
    let (si, consumed) = match parse_value(bytes, 0, 0) {
        Ok(v) => v,
        Err(ParseOutcome::Incomplete) => return Ok(None),
        Err(ParseOutcome::Invalid(e)) => return Err(e),
    };
    Ok(Some((envelope_from_si(si)?, consumed)))
}

pub fn decode_envelope(bytes: &[u8]) -> ProtoResult<Envelope> {
    match try_decode_envelope(bytes)? {
        Some((envelope, _consumed)) => Ok(envelope),
        None => Err(ProtocolError::Malformed("truncated JSON-RPC envelope".into())),
    }
}

fn envelope_from_si(si: SerializationInfo) -> ProtoResult<Envelope> {
    let id = si.get_member("id").ok().and_then(|m| m.get_value::<u64>().ok()).unwrap_or(0);

    if let Ok(err) = si.get_member("error") {
        if err.category() == Category::Object {
            let code = err.get_member("code").ok().and_then(|m| m.get_value::<i64>().ok()).unwrap_or(0) as i32;
            let message = err.get_member("message").ok().and_then(|m| m.get_value::<String>().ok()).unwrap_or_default();
            return Ok(Envelope::Fault { id, code, message });
        }
    }
    if let Ok(result) = si.get_member("result") {
        return Ok(Envelope::Response { id, result: result.clone() });
    }
    let method = si
        .get_member("method")
        .map_err(|_| ProtocolError::Malformed("JSON-RPC envelope missing method/result/error".into()))?
        .get_value::<String>()
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let params = si
        .get_member("params")
        .map(|p| p.members().cloned().collect())
        .unwrap_or_default();
    Ok(Envelope::Request { id, method, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_compact_object() {
        let mut si = SerializationInfo::new();
        si.add_member("a").set_signed(1);
        si.add_member("b").set_string("x");
        let mut fmt = JsonFormatter::compact(Vec::new());
        crate::codec::Decomposer::decompose(&si, &mut fmt).unwrap();
        assert_eq!(String::from_utf8(fmt.into_inner()).unwrap(), r#"{"a":1,"b":"x"}"#);
    }

    #[test]
    fn formats_beautified_array() {
        let mut si = SerializationInfo::new();
        si.add_element().set_signed(1);
        si.add_element().set_signed(2);
        let cfg = FormatConfig { beautify: true, ..Default::default() };
        let mut fmt = JsonFormatter::new(Vec::new(), cfg);
        crate::codec::Decomposer::decompose(&si, &mut fmt).unwrap();
        assert_eq!(String::from_utf8(fmt.into_inner()).unwrap(), "[\n  1,\n  2\n]");
    }

    #[test]
    fn plainkey_emits_unquoted_identifier_keys() {
        let mut si = SerializationInfo::new();
        si.add_member("name").set_string("x");
        let cfg = FormatConfig { plainkey: true, ..Default::default() };
        let mut fmt = JsonFormatter::new(Vec::new(), cfg);
        crate::codec::Decomposer::decompose(&si, &mut fmt).unwrap();
        assert_eq!(String::from_utf8(fmt.into_inner()).unwrap(), r#"{name:"x"}"#);
    }

    #[test]
    fn tolerant_parser_accepts_comments_and_trailing_commas() {
        let input = br#"{
            // a comment
            a: 1,
            'b': 'hi', /* trailing */
        }"#;
        let mut de = JsonDeserializer::new();
        let mut last = Advance::NeedMore;
        for &b in input.iter() {
            last = de.advance(b).unwrap();
            if last != Advance::NeedMore {
                break;
            }
        }
        assert!(matches!(last, Advance::Complete | Advance::CompleteAndPutback));
        let si = de.take().unwrap();
        assert_eq!(si.get_member("a").unwrap().get_value::<i64>().unwrap(), 1);
        assert_eq!(si.get_member("b").unwrap().get_value::<String>().unwrap(), "hi");
    }

    #[test]
    fn envelope_round_trips_request() {
        let mut arg = SerializationInfo::new();
        arg.set_signed(2);
        let bytes = encode_request(7, "increment", std::slice::from_ref(&arg), FormatConfig::default()).unwrap();
        match decode_envelope(&bytes).unwrap() {
            Envelope::Request { id, method, params } => {
                assert_eq!(id, 7);
                assert_eq!(method, "increment");
                assert_eq!(params[0].get_value::<i64>().unwrap(), 2);
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn envelope_round_trips_fault() {
        let bytes = encode_fault(3, -32601, "method not found", FormatConfig::default()).unwrap();
        match decode_envelope(&bytes).unwrap() {
            Envelope::Fault { id, code, message } => {
                assert_eq!(id, 3);
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            _ => panic!("expected fault"),
        }
    }

    #[test]
    fn try_decode_reports_incomplete_then_completes_with_consumed_length() {
        let bytes = encode_response(1, &{
            let mut si = SerializationInfo::new();
            si.set_string("hi");
            si
        }, FormatConfig::default()).unwrap();

        assert!(try_decode_envelope(&bytes[..bytes.len() - 1]).unwrap().is_none());

        let mut trailing = bytes.clone();
        trailing.extend_from_slice(&encode_fault(2, -32601, "nope", FormatConfig::default()).unwrap());
        let (envelope, consumed) = try_decode_envelope(&trailing).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert!(matches!(envelope, Envelope::Response { .. }));
    }
}
