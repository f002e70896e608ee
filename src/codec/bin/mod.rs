//! Binary RPC codec (spec §4.5, §6) — a compact, self-describing,
//! byte-exact framing designed for streaming.
//!
//! Every value is a frame: `<category><name?><type-name?><body><0xFF>`.
//! Object members are prefixed `0x01 <member-name NUL>` instead of carrying
//! their own name field; array elements and request arguments carry an
//! (possibly empty) name field; a response/fault's single top-level result
//! value omits the name field entirely — this matches the worked example
//! in spec §8 S2 byte-for-byte (see DESIGN.md for the open-question note).

use crate::codec::{Advance, Deserializer, Formatter, ProtoResult, ProtocolError};
use crate::si::{Category, SerializationInfo};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

pub const TAG_REQUEST: u8 = 0xC0;
pub const TAG_RESPONSE: u8 = 0xC1;
pub const TAG_FAULT: u8 = 0xC2;
pub const TAG_ONEWAY: u8 = 0xC3;

const CAT_VALUE: u8 = 0;
const CAT_OBJECT: u8 = 1;
const CAT_ARRAY: u8 = 2;
const CAT_REFERENCE: u8 = 3;
const CAT_NULL: u8 = 4;
const END: u8 = 0xFF;

const TYPE_EMPTY: u8 = 0x00;
const TYPE_BOOL: u8 = 0x01;
const TYPE_CHAR: u8 = 0x02;
const TYPE_STRING: u8 = 0x03;
const TYPE_SIGNED_MINIMAL: u8 = 0x04;
const TYPE_LONG_DOUBLE: u8 = 0x05;
const TYPE_BCD_DOUBLE: u8 = 0x06;
const TYPE_BLOB16: u8 = 0x07;
const TYPE_BLOB32: u8 = 0x08;
const TYPE_SIGNED_8: u8 = 0x10;
const TYPE_SIGNED_16: u8 = 0x11;
const TYPE_SIGNED_32: u8 = 0x12;
const TYPE_SIGNED_64: u8 = 0x13;
const TYPE_UNSIGNED_8: u8 = 0x18;
const TYPE_UNSIGNED_16: u8 = 0x19;
const TYPE_UNSIGNED_32: u8 = 0x1A;
const TYPE_UNSIGNED_64: u8 = 0x1B;

const BOOL_FALSE: u8 = 0xF0;
const BOOL_TRUE: u8 = 0xF1;

fn io_err(e: io::Error) -> ProtocolError {
    ProtocolError::Malformed(e.to_string())
}

/// Write-side binary formatter. `omit_top_name` is set for reply/fault
/// result writers (spec §8 S2) — every nested frame still carries its
/// name normally.
pub struct BinFormatter<W: Write> {
    out: W,
    type_dict: Vec<String>,
    stack: Vec<Category>,
    pending_member_name: Option<String>,
    omit_top_name: bool,
}

impl<W: Write> BinFormatter<W> {
    pub fn new(out: W, omit_top_name: bool) -> Self {
        Self { out, type_dict: Vec::new(), stack: Vec::new(), pending_member_name: None, omit_top_name }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes a frame's leading bytes: the pending `0x01 <member-name NUL>`
    /// marker (if any) precedes the category byte, matching the object-body
    /// grammar where a member entry is the marker *followed by* the child's
    /// whole frame; otherwise the category byte comes first and a normal
    /// name field (possibly empty) follows it.
    fn write_frame_head(&mut self, cat: u8, name: Option<&str>) -> io::Result<()> {
        if let Some(member) = self.pending_member_name.take() {
            self.out.write_all(&[0x01])?;
            self.out.write_all(member.as_bytes())?;
            self.out.write_all(&[0])?;
            return self.out.write_all(&[cat]);
        }
        self.out.write_all(&[cat])?;
        if self.stack.is_empty() && self.omit_top_name {
            return Ok(());
        }
        self.out.write_all(name.unwrap_or("").as_bytes())?;
        self.out.write_all(&[0])
    }

    fn write_type_name(&mut self, type_name: Option<&str>) -> io::Result<()> {
        let Some(t) = type_name else { return Ok(()) };
        if let Some(idx) = self.type_dict.iter().position(|x| x == t) {
            if idx < 0x3F {
                return self.out.write_all(&[0xC0 | idx as u8]);
            }
        }
        self.out.write_all(t.as_bytes())?;
        self.out.write_all(&[0])?;
        self.type_dict.push(t.to_string());
        Ok(())
    }

    fn write_leaf(&mut self, name: Option<&str>, type_name: Option<&str>, type_code: u8, payload: &[u8]) -> ProtoResult<()> {
        (|| -> io::Result<()> {
            self.write_frame_head(CAT_VALUE, name)?;
            self.write_type_name(type_name)?;
            self.out.write_all(&[type_code])?;
            self.out.write_all(payload)?;
            self.out.write_all(&[END])
        })()
        .map_err(io_err)
    }
}

fn minimal_signed(v: i64) -> (u8, Vec<u8>) {
    let mut buf = Vec::new();
    if let Ok(v8) = i8::try_from(v) {
        buf.write_i8(v8).unwrap();
        (TYPE_SIGNED_8, buf)
    } else if let Ok(v16) = i16::try_from(v) {
        buf.write_i16::<BigEndian>(v16).unwrap();
        (TYPE_SIGNED_16, buf)
    } else if let Ok(v32) = i32::try_from(v) {
        buf.write_i32::<BigEndian>(v32).unwrap();
        (TYPE_SIGNED_32, buf)
    } else {
        buf.write_i64::<BigEndian>(v).unwrap();
        (TYPE_SIGNED_64, buf)
    }
}

fn minimal_unsigned(v: u64) -> (u8, Vec<u8>) {
    let mut buf = Vec::new();
    if let Ok(v8) = u8::try_from(v) {
        buf.write_u8(v8).unwrap();
        (TYPE_UNSIGNED_8, buf)
    } else if let Ok(v16) = u16::try_from(v) {
        buf.write_u16::<BigEndian>(v16).unwrap();
        (TYPE_UNSIGNED_16, buf)
    } else if let Ok(v32) = u32::try_from(v) {
        buf.write_u32::<BigEndian>(v32).unwrap();
        (TYPE_UNSIGNED_32, buf)
    } else {
        buf.write_u64::<BigEndian>(v).unwrap();
        (TYPE_UNSIGNED_64, buf)
    }
}

impl<W: Write> Formatter for BinFormatter<W> {
    fn add_value_bool(&mut self, name: Option<&str>, type_name: Option<&str>, v: bool) -> ProtoResult<()> {
        self.write_leaf(name, type_name, TYPE_BOOL, &[if v { BOOL_TRUE } else { BOOL_FALSE }])
    }

    fn add_value_int(&mut self, name: Option<&str>, type_name: Option<&str>, v: i64) -> ProtoResult<()> {
        let (code, payload) = minimal_signed(v);
        self.write_leaf(name, type_name, code, &payload)
    }

    fn add_value_unsigned(&mut self, name: Option<&str>, type_name: Option<&str>, v: u64) -> ProtoResult<()> {
        let (code, payload) = minimal_unsigned(v);
        self.write_leaf(name, type_name, code, &payload)
    }

    fn add_value_float(&mut self, name: Option<&str>, type_name: Option<&str>, v: f64) -> ProtoResult<()> {
        // Open question decision (spec §9): formatter always emits 0x05
        // (canonical decimal encoding); 0x06 BCD is decode-only.
        let mut payload = v.to_string().into_bytes();
        payload.push(0);
        self.write_leaf(name, type_name, TYPE_LONG_DOUBLE, &payload)
    }

    fn add_value_string(&mut self, name: Option<&str>, type_name: Option<&str>, v: &str) -> ProtoResult<()> {
        let mut payload = v.as_bytes().to_vec();
        payload.push(0);
        self.write_leaf(name, type_name, TYPE_STRING, &payload)
    }

    fn add_value_wstring(&mut self, name: Option<&str>, type_name: Option<&str>, v: &[char]) -> ProtoResult<()> {
        let s: String = v.iter().collect();
        self.add_value_string(name, type_name, &s)
    }

    fn add_null(&mut self, name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()> {
        (|| -> io::Result<()> {
            self.write_frame_head(CAT_NULL, name)?;
            self.write_type_name(type_name)?;
            self.out.write_all(&[END])
        })()
        .map_err(io_err)
    }

    fn begin_array(&mut self, name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()> {
        (|| -> io::Result<()> {
            self.write_frame_head(CAT_ARRAY, name)?;
            self.write_type_name(type_name)
        })()
        .map_err(io_err)?;
        self.stack.push(Category::Array);
        Ok(())
    }

    fn finish_array(&mut self) -> ProtoResult<()> {
        match self.stack.pop() {
            Some(Category::Array) => {}
            _ => return Err(ProtocolError::Unbalanced("finish_array without begin_array".into())),
        }
        self.out.write_all(&[END]).map_err(io_err)
    }

    fn begin_object(&mut self, name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()> {
        (|| -> io::Result<()> {
            self.write_frame_head(CAT_OBJECT, name)?;
            self.write_type_name(type_name)
        })()
        .map_err(io_err)?;
        self.stack.push(Category::Object);
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
        match self.stack.pop() {
            Some(Category::Object) => {}
            _ => return Err(ProtocolError::Unbalanced("finish_object without begin_object".into())),
        }
        self.out.write_all(&[END]).map_err(io_err)
    }

    fn finish(&mut self) -> ProtoResult<()> {
        if !self.stack.is_empty() {
            return Err(ProtocolError::Unbalanced("unterminated container at finish()".into()));
        }
        Ok(())
    }
}

// ---- parsing ------------------------------------------------------------

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

/// Parses one frame starting at `pos`, returning the node and the new
/// cursor position. `omit_name` mirrors [`BinFormatter::omit_top_name`] for
/// the top-level call, and is also set by the object-member loop (the
/// member name already came from the `0x01` marker, so the child frame
/// carries no separate name field at any depth).
fn parse_frame(buf: &[u8], pos: usize, omit_name: bool, depth: usize, dict: &mut Vec<String>) -> Result<(SerializationInfo, usize), ParseOutcome> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::NestingTooDeep.into());
    }
    let mut i = pos;
    let category = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
    i += 1;

    let mut si = SerializationInfo::new();

    let has_name = !omit_name;
    if has_name {
        let (name, next) = read_cstr(buf, i)?;
        if !name.is_empty() {
            si.set_name(name);
        }
        i = next;
    }

    if category != CAT_REFERENCE {
        let (type_name, next) = read_type_name(buf, i, dict)?;
        if let Some(t) = type_name {
            si.set_type_name(t);
        }
        i = next;
    }

    match category {
        CAT_VALUE => {
            let code = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            i += 1;
            let (scalar_set, next) = read_scalar(buf, i, code, &mut si)?;
            i = next;
            let _ = scalar_set;
            let end = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            if end != END {
                return Err(ProtocolError::Malformed("missing end-of-frame marker".into()).into());
            }
            i += 1;
            // Open question decision (spec §9): Value always carries a
            // non-empty scalar; a typed-but-empty value decodes as Void.
            si.set_category(if si.value().is_empty() { Category::Void } else { Category::Value });
        }
        CAT_NULL => {
            let end = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            if end != END {
                return Err(ProtocolError::Malformed("missing end-of-frame marker".into()).into());
            }
            i += 1;
            si.set_category(Category::Void);
        }
        CAT_ARRAY => {
            si.set_category(Category::Array);
            loop {
                let b = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
                if b == END {
                    i += 1;
                    break;
                }
                let (child, next) = parse_frame(buf, i, false, depth + 1, dict)?;
                i = next;
                let slot = si.add_element();
                *slot = child;
            }
        }
        CAT_OBJECT => {
            si.set_category(Category::Object);
            loop {
                let marker = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
                if marker == END {
                    i += 1;
                    break;
                }
                if marker != 0x01 {
                    return Err(ProtocolError::Malformed(format!("expected member marker, got 0x{marker:02x}")).into());
                }
                i += 1;
                let (member_name, next) = read_cstr(buf, i)?;
                i = next;
                let (mut child, next) = parse_frame(buf, i, true, depth + 1, dict)?;
                i = next;
                child.set_name(member_name.clone());
                let slot = si.add_member(member_name);
                *slot = child;
            }
        }
        CAT_REFERENCE => return Err(ProtocolError::ReferencesUnsupported.into()),
        other => return Err(ProtocolError::UnknownTypeCode(other).into()),
    }

    Ok((si, i))
}

fn read_cstr(buf: &[u8], pos: usize) -> Result<(String, usize), ParseOutcome> {
    let mut i = pos;
    loop {
        let b = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
        if b == 0 {
            let s = String::from_utf8_lossy(&buf[pos..i]).into_owned();
            return Ok((s, i + 1));
        }
        i += 1;
    }
}

fn read_type_name(buf: &[u8], pos: usize, dict: &mut Vec<String>) -> Result<(Option<String>, usize), ParseOutcome> {
    // The type-name field is entirely absent when a node has no user type
    // tag; there is no marker distinguishing "absent" from "present" in
    // isolation, so higher layers that need one always pass a type name
    // through explicitly. Here we only decode a back-reference/literal
    // when the *next* construct requires it, which for this codec is
    // signalled by the caller already knowing whether a type name exists.
    // Binary RPC in this crate therefore treats type-name as present only
    // when a back-reference byte (0xC0..=0xFF minus END) leads.
    if let Some(&b) = buf.get(pos) {
        if (0xC0..0xFF).contains(&b) {
            let idx = (b & 0x3F) as usize;
            let name = dict.get(idx).cloned().ok_or_else(|| {
                ProtocolError::Malformed("type-name dictionary back-reference out of range".into())
            })?;
            return Ok((Some(name), pos + 1));
        }
    }
    Ok((None, pos))
}

fn read_scalar(buf: &[u8], pos: usize, code: u8, si: &mut SerializationInfo) -> Result<(bool, usize), ParseOutcome> {
    let mut i = pos;
    match code {
        TYPE_EMPTY => {}
        TYPE_BOOL => {
            let b = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            i += 1;
            si.set_bool(b == BOOL_TRUE);
        }
        TYPE_CHAR => {
            let b = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            i += 1;
            si.set_string((b as char).to_string());
        }
        TYPE_STRING => {
            let (s, next) = read_cstr(buf, i)?;
            i = next;
            si.set_string(s);
        }
        TYPE_SIGNED_MINIMAL => {
            let sign = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            i += 1;
            let mag = *buf.get(i).ok_or(ParseOutcome::Incomplete)? as i64;
            i += 1;
            si.set_signed(if sign == 0 { mag } else { -mag });
        }
        TYPE_LONG_DOUBLE => {
            let (s, next) = read_cstr(buf, i)?;
            i = next;
            let v: f64 = s.parse().map_err(|_| ProtocolError::Malformed("bad long double".into()))?;
            si.set_float(v);
        }
        TYPE_BCD_DOUBLE => {
            // Legacy decode-only path (spec §9 open question): treat the
            // remaining bytes up to END as an ASCII BCD digit string.
            let (s, next) = read_cstr(buf, i)?;
            i = next;
            let v: f64 = s.parse().unwrap_or(0.0);
            si.set_float(v);
        }
        TYPE_BLOB16 => {
            // Legacy decode-only path (spec §9 open question, parallel to
            // TYPE_BCD_DOUBLE): no Scalar/Formatter arm emits this code, and
            // the payload must be valid UTF-8 or the frame is rejected
            // rather than silently corrupted via lossy replacement.
            let len = (*buf.get(i).ok_or(ParseOutcome::Incomplete)? as usize) << 8
                | (*buf.get(i + 1).ok_or(ParseOutcome::Incomplete)? as usize);
            i += 2;
            let end = i + len;
            let bytes = buf.get(i..end).ok_or(ParseOutcome::Incomplete)?;
            si.set_string(
                String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Malformed("blob payload is not valid UTF-8".into()))?,
            );
            i = end;
        }
        TYPE_BLOB32 => {
            // Legacy decode-only path, see TYPE_BLOB16 above.
            let len = u32::from_be_bytes(
                buf.get(i..i + 4).ok_or(ParseOutcome::Incomplete)?.try_into().unwrap(),
            ) as usize;
            i += 4;
            let end = i + len;
            let bytes = buf.get(i..end).ok_or(ParseOutcome::Incomplete)?;
            si.set_string(
                String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Malformed("blob payload is not valid UTF-8".into()))?,
            );
            i = end;
        }
        TYPE_SIGNED_8 => {
            let v = *buf.get(i).ok_or(ParseOutcome::Incomplete)? as i8;
            i += 1;
            si.set_signed(v as i64);
        }
        TYPE_SIGNED_16 => {
            let v = (&buf[i..]).read_i16::<BigEndian>().map_err(|_| ParseOutcome::Incomplete)?;
            i += 2;
            si.set_signed(v as i64);
        }
        TYPE_SIGNED_32 => {
            let v = (&buf[i..]).read_i32::<BigEndian>().map_err(|_| ParseOutcome::Incomplete)?;
            i += 4;
            si.set_signed(v as i64);
        }
        TYPE_SIGNED_64 => {
            let v = (&buf[i..]).read_i64::<BigEndian>().map_err(|_| ParseOutcome::Incomplete)?;
            i += 8;
            si.set_signed(v);
        }
        TYPE_UNSIGNED_8 => {
            let v = *buf.get(i).ok_or(ParseOutcome::Incomplete)?;
            i += 1;
            si.set_unsigned(v as u64);
        }
        TYPE_UNSIGNED_16 => {
            let v = (&buf[i..]).read_u16::<BigEndian>().map_err(|_| ParseOutcome::Incomplete)?;
            i += 2;
            si.set_unsigned(v as u64);
        }
        TYPE_UNSIGNED_32 => {
            let v = (&buf[i..]).read_u32::<BigEndian>().map_err(|_| ParseOutcome::Incomplete)?;
            i += 4;
            si.set_unsigned(v as u64);
        }
        TYPE_UNSIGNED_64 => {
            let v = (&buf[i..]).read_u64::<BigEndian>().map_err(|_| ParseOutcome::Incomplete)?;
            i += 8;
            si.set_unsigned(v);
        }
        other => return Err(ProtocolError::UnknownTypeCode(other).into()),
    }
    Ok((true, i))
}

/// Byte-driven [`Deserializer`] for a single value/object/array/null
/// frame. Buffers incoming bytes and re-attempts a parse after each one;
/// the parse itself is a bounded-depth recursive descent rather than a
/// literal single-state-per-byte automaton, but the observable contract
/// (feed one byte at a time, `Complete` exactly when one frame is done)
/// matches spec §4.3.
pub struct BinDeserializer {
    buf: Vec<u8>,
    omit_name: bool,
    type_dict: Vec<String>,
    result: Option<SerializationInfo>,
}

impl BinDeserializer {
    pub fn new(omit_name: bool) -> Self {
        Self { buf: Vec::new(), omit_name, type_dict: Vec::new(), result: None }
    }
}

impl Deserializer for BinDeserializer {
    fn advance(&mut self, byte: u8) -> ProtoResult<Advance> {
        self.buf.push(byte);
        let mut dict = self.type_dict.clone();
        match parse_frame(&self.buf, 0, self.omit_name, 0, &mut dict) {
            Ok((si, consumed)) => {
                self.type_dict = dict;
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
        self.type_dict.clear();
        self.result.take()
    }
}

// ---- top-level RPC message framing (spec §4.5 top-level frame) ---------

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request { method: String, args: Vec<SerializationInfo> },
    Response(SerializationInfo),
    Fault { code: i32, message: String },
}

pub fn encode_request(method: &str, args: &[SerializationInfo]) -> ProtoResult<Vec<u8>> {
    let mut out = vec![TAG_REQUEST];
    out.extend_from_slice(method.as_bytes());
    out.push(0);
    for arg in args {
        let mut fmt = BinFormatter::new(&mut out, false);
        crate::codec::Decomposer::decompose(arg, &mut fmt)?;
    }
    out.push(END);
    Ok(out)
}

pub fn encode_response(result: &SerializationInfo) -> ProtoResult<Vec<u8>> {
    let mut out = vec![TAG_RESPONSE];
    {
        let mut fmt = BinFormatter::new(&mut out, true);
        crate::codec::Decomposer::decompose(result, &mut fmt)?;
    }
    out.push(END);
    Ok(out)
}

pub fn encode_fault(code: i32, message: &str) -> ProtoResult<Vec<u8>> {
    let mut fault_si = SerializationInfo::new();
    fault_si.add_member("code").set_signed(code as i64);
    fault_si.add_member("message").set_string(message);
    let mut out = vec![TAG_FAULT];
    {
        let mut fmt = BinFormatter::new(&mut out, true);
        crate::codec::Decomposer::decompose(&fault_si, &mut fmt)?;
    }
    out.push(END);
    Ok(out)
}

/// Attempts to decode one top-level message out of the *front* of `bytes`.
/// Returns `Ok(None)` when the buffer doesn't yet hold a complete message
/// (the raw-TCP streaming case, spec §4.5: "the same envelopes back-to-back
/// without framing"); `Ok(Some((msg, consumed)))` on success, where
/// `consumed` is the number of bytes the message occupied so the caller can
/// drain them and look for the next one.
pub fn try_decode_message(bytes: &[u8]) -> ProtoResult<Option<(Message, usize)>> {
    let Some(&tag) = bytes.first() else { return Ok(None) };
    let mut i = 1;
    match tag {
        TAG_REQUEST => {
            let (method, next) = match read_cstr(bytes, i) {
                Ok(v) => v,
                Err(ParseOutcome::Incomplete) => return Ok(None),
                Err(ParseOutcome::Invalid(e)) => return Err(e),
            };
            i = next;
            let mut args = Vec::new();
            let mut dict = Vec::new();
            loop {
                let Some(&b) = bytes.get(i) else { return Ok(None) };
                if b == END {
                    i += 1;
                    break;
                }
                let (arg, next) = match parse_frame(bytes, i, false, 0, &mut dict) {
                    Ok(v) => v,
                    Err(ParseOutcome::Incomplete) => return Ok(None),
                    Err(ParseOutcome::Invalid(e)) => return Err(e),
                };
                args.push(arg);
                i = next;
            }
            Ok(Some((Message::Request { method, args }, i)))
        }
        TAG_RESPONSE | TAG_FAULT => {
            let mut dict = Vec::new();
            let (si, next) = match parse_frame(bytes, i, true, 0, &mut dict) {
                Ok(v) => v,
                Err(ParseOutcome::Incomplete) => return Ok(None),
                Err(ParseOutcome::Invalid(e)) => return Err(e),
            };
            let Some(&end) = bytes.get(next) else { return Ok(None) };
            if end != END {
                return Err(ProtocolError::Malformed("missing top-level end marker".into()));
            }
            let consumed = next + 1;
            let msg = if tag == TAG_RESPONSE {
                Message::Response(si)
            } else {
                let code = si.get_member("code").ok().and_then(|m| m.get_value::<i64>().ok()).unwrap_or(0) as i32;
                let message = si.get_member("message").ok().and_then(|m| m.get_value::<String>().ok()).unwrap_or_default();
                Message::Fault { code, message }
            };
            Ok(Some((msg, consumed)))
        }
        TAG_ONEWAY => Err(ProtocolError::Malformed("one-way messages are reserved".into())),
        other => Err(ProtocolError::Malformed(format!("unknown top-level tag 0x{other:02x}"))),
    }
}

pub fn decode_message(bytes: &[u8]) -> ProtoResult<Message> {
    match try_decode_message(bytes)? {
        Some((msg, _consumed)) => Ok(msg),
        None => Err(ProtocolError::Malformed("truncated message".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_hi_matches_wire_example() {
        // spec §8 S2: C0 65 63 68 6F 00 00 00 03 68 69 00 FF FF
        let mut arg = SerializationInfo::new();
        arg.set_string("hi");
        let bytes = encode_request("echo", std::slice::from_ref(&arg)).unwrap();
        assert_eq!(
            bytes,
            vec![0xC0, 0x65, 0x63, 0x68, 0x6F, 0x00, 0x00, 0x00, 0x03, 0x68, 0x69, 0x00, 0xFF, 0xFF]
        );
    }

    #[test]
    fn reply_matches_wire_example() {
        // spec §8 S2: C1 00 03 68 69 00 FF FF
        let mut result = SerializationInfo::new();
        result.set_string("hi");
        let bytes = encode_response(&result).unwrap();
        assert_eq!(bytes, vec![0xC1, 0x00, 0x03, 0x68, 0x69, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn decode_round_trips_request() {
        let mut arg = SerializationInfo::new();
        arg.set_signed(3);
        let bytes = encode_request("add", std::slice::from_ref(&arg)).unwrap();
        match decode_message(&bytes).unwrap() {
            Message::Request { method, args } => {
                assert_eq!(method, "add");
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].get_value::<i64>().unwrap(), 3);
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn decode_round_trips_object() {
        let mut obj = SerializationInfo::new();
        obj.add_member("x").set_signed(1);
        obj.add_member("y").set_string("z");
        let bytes = encode_response(&obj).unwrap();
        match decode_message(&bytes).unwrap() {
            Message::Response(si) => {
                assert_eq!(si.get_member("x").unwrap().get_value::<i64>().unwrap(), 1);
                assert_eq!(si.get_member("y").unwrap().get_value::<String>().unwrap(), "z");
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn fault_carries_code_and_message() {
        let bytes = encode_fault(-32601, "bad arg").unwrap();
        match decode_message(&bytes).unwrap() {
            Message::Fault { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "bad arg");
            }
            _ => panic!("expected fault"),
        }
    }

    #[test]
    fn try_decode_reports_incomplete_then_completes_with_consumed_length() {
        let mut result = SerializationInfo::new();
        result.set_string("hi");
        let bytes = encode_response(&result).unwrap();

        assert!(try_decode_message(&bytes[..bytes.len() - 1]).unwrap().is_none());

        let mut trailing = bytes.clone();
        trailing.extend_from_slice(&encode_fault(-32500, "x").unwrap());
        let (msg, consumed) = try_decode_message(&trailing).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert!(matches!(msg, Message::Response(_)));
    }

    #[test]
    fn byte_driven_deserializer_completes_on_final_byte() {
        let mut arg = SerializationInfo::new();
        arg.set_signed(42);
        let mut fmt = BinFormatter::new(Vec::new(), false);
        crate::codec::Decomposer::decompose(&arg, &mut fmt).unwrap();
        let bytes = fmt.into_inner();

        let mut de = BinDeserializer::new(false);
        let mut last = Advance::NeedMore;
        for &b in &bytes {
            last = de.advance(b).unwrap();
        }
        assert_eq!(last, Advance::Complete);
        assert_eq!(de.take().unwrap().get_value::<i64>().unwrap(), 42);
    }
}
