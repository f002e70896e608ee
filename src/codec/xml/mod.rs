//! XML-RPC codec (spec §4.4) — standard XML-RPC 1.0 vocabulary
//! (`methodCall`/`methodResponse`/`fault`, `<i4>`/`<int>`/`<boolean>`/
//! `<string>`/`<double>`/`<dateTime.iso8601>`/`<base64>`/`<struct>`/
//! `<array>`), written with `quick-xml`.
//!
//! `quick-xml`'s pull-reader is event-based, not byte-at-a-time; rather than
//! fight that, [`XmlDeserializer`] buffers incoming bytes and re-runs the
//! reader over the whole buffer on each `advance()` call, the same
//! incremental-reparse tradeoff [`crate::codec::bin::BinDeserializer`] and
//! [`crate::codec::json::JsonDeserializer`] make. A reader error caused by
//! running out of input before the root element closes means `NeedMore`;
//! any other reader error is a real `ProtocolError::Malformed`.

use crate::codec::{Advance, Deserializer, Formatter, ProtoResult, ProtocolError};
use crate::si::{Category, SerializationInfo};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::io::{self, Write};

/// Maps an SI scalar to its XML-RPC element name. `int` is accepted as an
/// alias of `i4` on read; the formatter always writes `i4`.
const TAG_I4: &str = "i4";
const TAG_INT_ALIAS: &str = "int";
const TAG_BOOLEAN: &str = "boolean";
const TAG_STRING: &str = "string";
const TAG_DOUBLE: &str = "double";
const TAG_NIL: &str = "nil";

fn io_err(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Malformed(e.to_string())
}

pub struct XmlFormatter<W: Write> {
    writer: Writer<W>,
    /// Stack of container kinds plus a pending member name, mirroring the
    /// bin/json formatters' `pending_*` fields.
    stack: Vec<bool>,
    pending_member_name: Option<String>,
}

impl<W: Write> XmlFormatter<W> {
    pub fn new(out: W) -> Self {
        Self { writer: Writer::new(out), stack: Vec::new(), pending_member_name: None }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn start(&mut self, tag: &str, type_name: Option<&str>) -> ProtoResult<()> {
        let mut el = BytesStart::new(tag);
        if let Some(t) = type_name {
            el.push_attribute(("type", t));
        }
        self.writer.write_event(Event::Start(el)).map_err(io_err)
    }

    fn end(&mut self, tag: &str) -> ProtoResult<()> {
        self.writer.write_event(Event::End(BytesEnd::new(tag))).map_err(io_err)
    }

    fn text(&mut self, s: &str) -> ProtoResult<()> {
        self.writer.write_event(Event::Text(BytesText::new(s))).map_err(io_err)
    }

    /// Wraps a scalar leaf in `<value><TAG>text</TAG></value>`, opening
    /// `<member><name>` around it first if we're inside an object.
    fn write_leaf(&mut self, tag: &str, text: &str, type_name: Option<&str>) -> ProtoResult<()> {
        let member = self.pending_member_name.take();
        if let Some(name) = &member {
            self.start("member", None)?;
            self.start("name", None)?;
            self.text(name)?;
            self.end("name")?;
        }
        self.start("value", None)?;
        self.start(tag, type_name)?;
        self.text(text)?;
        self.end(tag)?;
        self.end("value")?;
        if member.is_some() {
            self.end("member")?;
        }
        Ok(())
    }
}

impl<W: Write> Formatter for XmlFormatter<W> {
    fn add_value_bool(&mut self, _name: Option<&str>, type_name: Option<&str>, v: bool) -> ProtoResult<()> {
        self.write_leaf(TAG_BOOLEAN, if v { "1" } else { "0" }, type_name)
    }

    fn add_value_int(&mut self, _name: Option<&str>, type_name: Option<&str>, v: i64) -> ProtoResult<()> {
        self.write_leaf(TAG_I4, &v.to_string(), type_name)
    }

    fn add_value_unsigned(&mut self, _name: Option<&str>, type_name: Option<&str>, v: u64) -> ProtoResult<()> {
        self.write_leaf(TAG_I4, &v.to_string(), type_name)
    }

    fn add_value_float(&mut self, _name: Option<&str>, type_name: Option<&str>, v: f64) -> ProtoResult<()> {
        self.write_leaf(TAG_DOUBLE, &v.to_string(), type_name)
    }

    fn add_value_string(&mut self, _name: Option<&str>, type_name: Option<&str>, v: &str) -> ProtoResult<()> {
        self.write_leaf(TAG_STRING, v, type_name)
    }

    fn add_value_wstring(&mut self, name: Option<&str>, type_name: Option<&str>, v: &[char]) -> ProtoResult<()> {
        let s: String = v.iter().collect();
        self.add_value_string(name, type_name, &s)
    }

    fn add_null(&mut self, _name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()> {
        let member = self.pending_member_name.take();
        if let Some(name) = &member {
            self.start("member", None)?;
            self.start("name", None)?;
            self.text(name)?;
            self.end("name")?;
        }
        self.start("value", None)?;
        self.start(TAG_NIL, type_name)?;
        self.end(TAG_NIL)?;
        self.end("value")?;
        if member.is_some() {
            self.end("member")?;
        }
        Ok(())
    }

    fn begin_array(&mut self, _name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()> {
        let member = self.pending_member_name.take();
        if let Some(name) = &member {
            self.start("member", None)?;
            self.start("name", None)?;
            self.text(name)?;
            self.end("name")?;
        }
        self.start("value", None)?;
        self.start("array", type_name)?;
        self.start("data", None)?;
        self.stack.push(member.is_some());
        Ok(())
    }

    fn finish_array(&mut self) -> ProtoResult<()> {
        let was_member = self.stack.pop().unwrap_or(false);
        self.end("data")?;
        self.end("array")?;
        self.end("value")?;
        if was_member {
            self.end("member")?;
        }
        Ok(())
    }

    fn begin_object(&mut self, _name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()> {
        let member = self.pending_member_name.take();
        if let Some(name) = &member {
            self.start("member", None)?;
            self.start("name", None)?;
            self.text(name)?;
            self.end("name")?;
        }
        self.start("value", None)?;
        self.start("struct", type_name)?;
        // Track whether *this* struct was itself a member value, separately
        // from whether its own children are members (always true for struct).
        self.stack.push(member.is_some());
        Ok(())
    }

    fn begin_member(&mut self, name: &str) -> ProtoResult<()> {
        self.pending_member_name = Some(name.to_string());
        Ok(())
    }

    fn finish_member(&mut self) -> ProtoResult<()> {
        Ok(())
    }

    fn finish_object(&mut self) -> ProtoResult<()> {
        let was_member = self.stack.pop().unwrap_or(false);
        self.end("struct")?;
        self.end("value")?;
        if was_member {
            self.end("member")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> ProtoResult<()> {
        if !self.stack.is_empty() {
            return Err(ProtocolError::Unbalanced("unterminated container at finish()".into()));
        }
        Ok(())
    }
}

// ---- reading --------------------------------------------------------------

fn read_events(xml: &[u8]) -> Result<Vec<Event<'static>>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut events = Vec::new();
    loop {
        let ev = reader.read_event()?;
        let owned = ev.into_owned();
        let done = matches!(owned, Event::Eof);
        // Whitespace-only text between tags (pretty-printed XML) carries no
        // meaning here; drop it so the recursive-descent parser below never
        // has to special-case it between a container's child elements.
        let is_blank_text = matches!(&owned, Event::Text(t) if t.iter().all(u8::is_ascii_whitespace));
        if !is_blank_text {
            events.push(owned);
        }
        if done {
            break;
        }
    }
    Ok(events)
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn type_attr(e: &BytesStart) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find(|a| a.key.as_ref() == b"type").map(|a| {
        String::from_utf8_lossy(&a.value).into_owned()
    })
}

/// Parses one `<value>...</value>` element starting at `events[idx]`
/// (which must be `Start("value")`), returning the built node and the
/// index just past the matching `</value>`.
fn parse_value(events: &[Event<'static>], idx: usize) -> ProtoResult<(SerializationInfo, usize)> {
    let mut i = idx;
    match events.get(i) {
        Some(Event::Start(e)) if tag_name(e) == "value" => i += 1,
        _ => return Err(ProtocolError::Malformed("expected <value>".into())),
    }

    let si = match events.get(i) {
        Some(Event::Text(t)) => {
            let s = t.unescape().map_err(io_err)?.into_owned();
            i += 1;
            let mut si = SerializationInfo::new();
            si.set_string(s);
            si
        }
        Some(Event::End(e)) if tag_name_end(e) == "value" => {
            // <value></value> with no inner tag: empty string, per spec.
            let mut si = SerializationInfo::new();
            si.set_string("");
            si
        }
        Some(Event::Start(e)) => {
            let tag = tag_name(e);
            let type_name = type_attr(e);
            i += 1;
            let mut si = match tag.as_str() {
                t if t == TAG_I4 || t == TAG_INT_ALIAS => {
                    let (text, next) = read_text_until_end(events, i, &tag)?;
                    i = next;
                    let v: i64 = text.trim().parse().map_err(|_| ProtocolError::Malformed("bad int".into()))?;
                    let mut si = SerializationInfo::new();
                    si.set_signed(v);
                    si
                }
                t if t == TAG_BOOLEAN => {
                    let (text, next) = read_text_until_end(events, i, &tag)?;
                    i = next;
                    let mut si = SerializationInfo::new();
                    si.set_bool(text.trim() == "1");
                    si
                }
                t if t == TAG_STRING => {
                    let (text, next) = read_text_until_end(events, i, &tag)?;
                    i = next;
                    let mut si = SerializationInfo::new();
                    si.set_string(text);
                    si
                }
                t if t == TAG_DOUBLE => {
                    let (text, next) = read_text_until_end(events, i, &tag)?;
                    i = next;
                    let v: f64 = text.trim().parse().map_err(|_| ProtocolError::Malformed("bad double".into()))?;
                    let mut si = SerializationInfo::new();
                    si.set_float(v);
                    si
                }
                "dateTime.iso8601" | "base64" => {
                    let (text, next) = read_text_until_end(events, i, &tag)?;
                    i = next;
                    let mut si = SerializationInfo::new();
                    si.set_string(text);
                    si
                }
                t if t == TAG_NIL => {
                    i = expect_end(events, i, &tag)?;
                    SerializationInfo::new()
                }
                "struct" => {
                    let mut si = SerializationInfo::new();
                    si.set_category(Category::Object);
                    loop {
                        match events.get(i) {
                            Some(Event::Start(m)) if tag_name(m) == "member" => {
                                i += 1;
                                let (name, next) = expect_text_element(events, i, "name")?;
                                i = next;
                                let (child, next) = parse_value(events, i)?;
                                i = next;
                                i = expect_end(events, i, "member")?;
                                let slot = si.add_member(name);
                                *slot = child;
                            }
                            Some(Event::End(e)) if tag_name_end(e) == "struct" => {
                                i += 1;
                                break;
                            }
                            _ => return Err(ProtocolError::Malformed("malformed <struct>".into())),
                        }
                    }
                    si
                }
                "array" => {
                    i = expect_start(events, i, "data")?;
                    let mut si = SerializationInfo::new();
                    si.set_category(Category::Array);
                    loop {
                        match events.get(i) {
                            Some(Event::Start(e)) if tag_name(e) == "value" => {
                                let (child, next) = parse_value(events, i)?;
                                i = next;
                                let slot = si.add_element();
                                *slot = child;
                            }
                            Some(Event::End(e)) if tag_name_end(e) == "data" => {
                                i += 1;
                                break;
                            }
                            _ => return Err(ProtocolError::Malformed("malformed <array>".into())),
                        }
                    }
                    i = expect_end(events, i, "array")?;
                    si
                }
                other => return Err(ProtocolError::Malformed(format!("unknown XML-RPC tag <{other}>"))),
            };
            if let Some(t) = type_name {
                si.set_type_name(t);
            }
            si
        }
        _ => return Err(ProtocolError::Malformed("malformed <value>".into())),
    };

    let end_idx = expect_end(events, i, "value")?;
    Ok((si, end_idx))
}

fn tag_name_end(e: &BytesEnd) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn read_text_until_end(events: &[Event<'static>], idx: usize, tag: &str) -> ProtoResult<(String, usize)> {
    match events.get(idx) {
        Some(Event::Text(t)) => {
            let s = t.unescape().map_err(io_err)?.into_owned();
            let next = expect_end(events, idx + 1, tag)?;
            Ok((s, next))
        }
        Some(Event::End(e)) if tag_name_end(e) == tag => Ok((String::new(), idx + 1)),
        _ => Err(ProtocolError::Malformed(format!("expected text inside <{tag}>"))),
    }
}

fn expect_end(events: &[Event<'static>], idx: usize, tag: &str) -> ProtoResult<usize> {
    match events.get(idx) {
        Some(Event::End(e)) if tag_name_end(e) == tag => Ok(idx + 1),
        _ => Err(ProtocolError::Malformed(format!("expected </{tag}>"))),
    }
}

fn expect_start(events: &[Event<'static>], idx: usize, tag: &str) -> ProtoResult<usize> {
    match events.get(idx) {
        Some(Event::Start(e)) if tag_name(e) == tag => Ok(idx + 1),
        _ => Err(ProtocolError::Malformed(format!("expected <{tag}>"))),
    }
}

fn expect_text_element(events: &[Event<'static>], idx: usize, tag: &str) -> ProtoResult<(String, usize)> {
    let idx = expect_start(events, idx, tag)?;
    read_text_until_end(events, idx, tag)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call { method: String, params: Vec<SerializationInfo> },
    Response(SerializationInfo),
    Fault { code: i32, message: String },
}

pub fn decode_message(xml: &[u8]) -> ProtoResult<Message> {
    let events = read_events(xml).map_err(io_err)?;
    let mut i = 0;
    // skip a possible XML decl / prolog events quick-xml already folds in.
    while matches!(events.get(i), Some(Event::Decl(_)) | Some(Event::Comment(_))) {
        i += 1;
    }
    match events.get(i) {
        Some(Event::Start(e)) if tag_name(e) == "methodCall" => {
            i += 1;
            let (method, next) = expect_text_element(&events, i, "methodName")?;
            i = next;
            let mut params = Vec::new();
            if matches!(events.get(i), Some(Event::Start(e)) if tag_name(e) == "params") {
                i += 1;
                while matches!(events.get(i), Some(Event::Start(e)) if tag_name(e) == "param") {
                    i += 1;
                    let (v, next) = parse_value(&events, i)?;
                    i = next;
                    i = expect_end(&events, i, "param")?;
                    params.push(v);
                }
                i = expect_end(&events, i, "params")?;
            }
            Ok(Message::Call { method, params })
        }
        Some(Event::Start(e)) if tag_name(e) == "methodResponse" => {
            i += 1;
            match events.get(i) {
                Some(Event::Start(e)) if tag_name(e) == "params" => {
                    i += 1;
                    i = expect_start(&events, i, "param")?;
                    let (v, next) = parse_value(&events, i)?;
                    i = next;
                    let _ = expect_end(&events, i, "param");
                    Ok(Message::Response(v))
                }
                Some(Event::Start(e)) if tag_name(e) == "fault" => {
                    i += 1;
                    let (v, _next) = parse_value(&events, i)?;
                    let code = v.get_member("faultCode").ok().and_then(|m| m.get_value::<i64>().ok()).unwrap_or(0) as i32;
                    let message =
                        v.get_member("faultString").ok().and_then(|m| m.get_value::<String>().ok()).unwrap_or_default();
                    Ok(Message::Fault { code, message })
                }
                _ => Err(ProtocolError::Malformed("malformed <methodResponse>".into())),
            }
        }
        _ => Err(ProtocolError::Malformed("expected <methodCall> or <methodResponse>".into())),
    }
}

pub fn encode_call(method: &str, params: &[SerializationInfo]) -> ProtoResult<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut w = Writer::new(&mut out);
        w.write_event(Event::Start(BytesStart::new("methodCall"))).map_err(io_err)?;
        w.write_event(Event::Start(BytesStart::new("methodName"))).map_err(io_err)?;
        w.write_event(Event::Text(BytesText::new(method))).map_err(io_err)?;
        w.write_event(Event::End(BytesEnd::new("methodName"))).map_err(io_err)?;
        w.write_event(Event::Start(BytesStart::new("params"))).map_err(io_err)?;
    }
    for p in params {
        out.extend_from_slice(b"<param>");
        {
            let mut fmt = XmlFormatter::new(&mut out);
            crate::codec::Decomposer::decompose(p, &mut fmt)?;
        }
        out.extend_from_slice(b"</param>");
    }
    out.extend_from_slice(b"</params></methodCall>");
    Ok(out)
}

pub fn encode_response(result: &SerializationInfo) -> ProtoResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(b"<methodResponse><params><param>");
    {
        let mut fmt = XmlFormatter::new(&mut out);
        crate::codec::Decomposer::decompose(result, &mut fmt)?;
    }
    out.extend_from_slice(b"</param></params></methodResponse>");
    Ok(out)
}

pub fn encode_fault(code: i32, message: &str) -> ProtoResult<Vec<u8>> {
    let mut fault_si = SerializationInfo::new();
    fault_si.add_member("faultCode").set_signed(code as i64);
    fault_si.add_member("faultString").set_string(message);

    let mut out = Vec::new();
    out.extend_from_slice(b"<methodResponse><fault>");
    {
        let mut fmt = XmlFormatter::new(&mut out);
        crate::codec::Decomposer::decompose(&fault_si, &mut fmt)?;
    }
    out.extend_from_slice(b"</fault></methodResponse>");
    Ok(out)
}

/// Byte-driven [`Deserializer`] for a single `<value>...</value>` element
/// (spec §4.3); top-level `methodCall`/`methodResponse`/`fault` envelopes
/// are handled separately by [`decode_message`], mirroring how
/// [`crate::codec::bin::BinDeserializer`] parses one frame while
/// `bin::decode_message` handles the RPC-level wrapper.
#[derive(Default)]
pub struct XmlDeserializer {
    buf: Vec<u8>,
    result: Option<SerializationInfo>,
}

impl XmlDeserializer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer for XmlDeserializer {
    fn advance(&mut self, byte: u8) -> ProtoResult<Advance> {
        self.buf.push(byte);
        match read_events(&self.buf) {
            Ok(events) => match parse_value(&events, 0) {
                Ok((si, _consumed)) => {
                    self.result = Some(si);
                    Ok(Advance::Complete)
                }
                Err(_) => Ok(Advance::NeedMore),
            },
            Err(_) => Ok(Advance::NeedMore),
        }
    }

    fn take(&mut self) -> Option<SerializationInfo> {
        self.buf.clear();
        self.result.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_method_call() {
        let xml = br#"<?xml version="1.0"?><methodCall><methodName>echo</methodName><params><param><value><string>hi</string></value></param></params></methodCall>"#;
        match decode_message(xml).unwrap() {
            Message::Call { method, params } => {
                assert_eq!(method, "echo");
                assert_eq!(params[0].get_value::<String>().unwrap(), "hi");
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn encode_and_decode_response_round_trip() {
        let mut result = SerializationInfo::new();
        result.set_signed(5);
        let xml = encode_response(&result).unwrap();
        match decode_message(&xml).unwrap() {
            Message::Response(si) => assert_eq!(si.get_value::<i64>().unwrap(), 5),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn encode_and_decode_struct() {
        let mut si = SerializationInfo::new();
        si.add_member("x").set_signed(1);
        si.add_member("y").set_string("z");
        let xml = encode_response(&si).unwrap();
        match decode_message(&xml).unwrap() {
            Message::Response(si) => {
                assert_eq!(si.get_member("x").unwrap().get_value::<i64>().unwrap(), 1);
                assert_eq!(si.get_member("y").unwrap().get_value::<String>().unwrap(), "z");
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn decode_fault() {
        let xml = encode_fault(-32601, "method not found").unwrap();
        match decode_message(&xml).unwrap() {
            Message::Fault { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            _ => panic!("expected fault"),
        }
    }

    #[test]
    fn encode_call_round_trips() {
        let mut a = SerializationInfo::new();
        a.set_signed(2);
        let mut b = SerializationInfo::new();
        b.set_signed(3);
        let xml = encode_call("add", &[a, b]).unwrap();
        match decode_message(&xml).unwrap() {
            Message::Call { method, params } => {
                assert_eq!(method, "add");
                assert_eq!(params.len(), 2);
                assert_eq!(params[0].get_value::<i64>().unwrap(), 2);
                assert_eq!(params[1].get_value::<i64>().unwrap(), 3);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn byte_driven_deserializer_parses_single_value() {
        let mut si = SerializationInfo::new();
        si.set_string("hi");
        let mut fmt = XmlFormatter::new(Vec::new());
        crate::codec::Decomposer::decompose(&si, &mut fmt).unwrap();
        let bytes = fmt.into_inner();

        let mut de = XmlDeserializer::new();
        let mut last = Advance::NeedMore;
        for &b in &bytes {
            last = de.advance(b).unwrap();
        }
        assert_eq!(last, Advance::Complete);
        assert_eq!(de.take().unwrap().get_value::<String>().unwrap(), "hi");
    }
}
