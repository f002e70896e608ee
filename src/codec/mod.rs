//! Formatter/Deserializer abstraction (spec §4.2/§4.3) and the
//! Decomposer/Composer traversal helpers (spec §4.1/§9).
//!
//! Redesign note (spec §9, "deep virtual hierarchies for Formatter/
//! Deserializer"): rather than a base class with virtual dispatch, each
//! protocol implements one flat trait — a capability set, not an
//! inheritance chain.

pub mod bin;
pub mod json;
pub mod xml;

use crate::si::{Category, Scalar, SerializationInfo};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unbalanced formatter calls: {0}")]
    Unbalanced(String),
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("unknown type code: 0x{0:02x}")]
    UnknownTypeCode(u8),
    #[error("references are not supported")]
    ReferencesUnsupported,
    #[error("nesting too deep")]
    NestingTooDeep,
}

pub type ProtoResult<T> = Result<T, ProtocolError>;

/// Write-side abstraction every wire codec implements (spec §4.2).
/// Calls must be balanced (every `begin_*` paired with a matching
/// `finish_*`, LIFO). Implementations may buffer internally but must emit
/// bytes incrementally to the underlying sink.
pub trait Formatter {
    fn add_value_bool(&mut self, name: Option<&str>, type_name: Option<&str>, v: bool) -> ProtoResult<()>;
    fn add_value_int(&mut self, name: Option<&str>, type_name: Option<&str>, v: i64) -> ProtoResult<()>;
    fn add_value_unsigned(&mut self, name: Option<&str>, type_name: Option<&str>, v: u64) -> ProtoResult<()>;
    fn add_value_float(&mut self, name: Option<&str>, type_name: Option<&str>, v: f64) -> ProtoResult<()>;
    fn add_value_string(&mut self, name: Option<&str>, type_name: Option<&str>, v: &str) -> ProtoResult<()>;
    fn add_value_wstring(&mut self, name: Option<&str>, type_name: Option<&str>, v: &[char]) -> ProtoResult<()>;
    fn add_null(&mut self, name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()>;

    fn begin_array(&mut self, name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()>;
    fn finish_array(&mut self) -> ProtoResult<()>;

    fn begin_object(&mut self, name: Option<&str>, type_name: Option<&str>) -> ProtoResult<()>;
    fn begin_member(&mut self, name: &str) -> ProtoResult<()>;
    fn finish_member(&mut self) -> ProtoResult<()>;
    fn finish_object(&mut self) -> ProtoResult<()>;

    /// Flush trailing state. Called once per top-level message.
    fn finish(&mut self) -> ProtoResult<()>;
}

/// Outcome of feeding one byte to a [`Deserializer`] (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    NeedMore,
    Complete,
    /// The byte that ended the value wasn't part of it (e.g. whitespace
    /// terminating a JSON number) and should be re-fed to the next parse.
    CompleteAndPutback,
}

/// Byte-fed state machine that produces a [`SerializationInfo`] (spec §4.3).
pub trait Deserializer {
    /// Feed one byte. Text codecs may decode multi-byte UTF-8 sequences
    /// internally before acting.
    fn advance(&mut self, byte: u8) -> ProtoResult<Advance>;

    /// Take the completed tree after `advance` returned `Complete` (or
    /// `CompleteAndPutback`), resetting internal state so `advance` may be
    /// called again for the next message on the same stream.
    fn take(&mut self) -> Option<SerializationInfo>;
}

/// Walks a `SerializationInfo` and drives a [`Formatter`] (spec §4.1
/// "Decomposer / Composer").
pub struct Decomposer;

impl Decomposer {
    pub fn decompose(si: &SerializationInfo, fmt: &mut dyn Formatter) -> ProtoResult<()> {
        Self::decompose_named(si, si.name(), fmt)?;
        fmt.finish()
    }

    fn decompose_named(si: &SerializationInfo, name: Option<&str>, fmt: &mut dyn Formatter) -> ProtoResult<()> {
        let type_name = si.type_name();
        match si.category() {
            Category::Void => fmt.add_null(name, type_name),
            Category::Value => match si.value() {
                Scalar::Empty => fmt.add_null(name, type_name),
                Scalar::Bool(b) => fmt.add_value_bool(name, type_name, *b),
                Scalar::Signed(i) => fmt.add_value_int(name, type_name, *i),
                Scalar::Unsigned(u) => fmt.add_value_unsigned(name, type_name, *u),
                Scalar::Float(f) => fmt.add_value_float(name, type_name, *f),
                Scalar::NarrowString(s) => fmt.add_value_string(name, type_name, s),
                Scalar::WideString(w) => fmt.add_value_wstring(name, type_name, w),
            },
            Category::Array => {
                fmt.begin_array(name, type_name)?;
                for member in si.members() {
                    Self::decompose_named(member, None, fmt)?;
                }
                fmt.finish_array()
            }
            Category::Object => {
                fmt.begin_object(name, type_name)?;
                for member in si.members() {
                    let member_name = member.name().unwrap_or("");
                    fmt.begin_member(member_name)?;
                    Self::decompose_named(member, None, fmt)?;
                    fmt.finish_member()?;
                }
                fmt.finish_object()
            }
        }
    }
}

/// Receives calls shaped like the [`Formatter`] interface and builds a
/// `SerializationInfo` tree. Every `Deserializer` implementation drives one
/// of these internally as it parses bytes.
#[derive(Default)]
pub struct Composer {
    /// Stack of in-progress containers; the root lives at index 0 once
    /// any `begin_*`/`add_*` call has happened.
    stack: Vec<SerializationInfo>,
    root: Option<SerializationInfo>,
}

impl Composer {
    pub fn new() -> Self {
        Self { stack: Vec::new(), root: None }
    }

    fn emit(&mut self, mut node: SerializationInfo, name: Option<&str>) {
        if let Some(n) = name {
            node.set_name(n);
        }
        if let Some(parent) = self.stack.last_mut() {
            match parent.category() {
                Category::Array => {
                    let slot = parent.add_element();
                    *slot = node;
                }
                Category::Object => {
                    let member_name = node.name().unwrap_or("").to_string();
                    let slot = parent.add_member(member_name);
                    *slot = node;
                }
                _ => unreachable!("container on stack must be Array or Object"),
            }
        } else {
            self.root = Some(node);
        }
    }

    pub fn add_null(&mut self, name: Option<&str>, type_name: Option<&str>) {
        let mut si = SerializationInfo::new();
        if let Some(t) = type_name {
            si.set_type_name(t);
        }
        self.emit(si, name);
    }

    pub fn add_value(&mut self, name: Option<&str>, type_name: Option<&str>, value: Scalar) {
        let mut si = SerializationInfo::new();
        si.set_category(Category::Value);
        match value {
            Scalar::Bool(b) => si.set_bool(b),
            Scalar::Signed(i) => si.set_signed(i),
            Scalar::Unsigned(u) => si.set_unsigned(u),
            Scalar::Float(f) => si.set_float(f),
            Scalar::NarrowString(s) => si.set_string(s),
            Scalar::WideString(w) => si.set_wstring(w),
            Scalar::Empty => {}
        }
        if let Some(t) = type_name {
            si.set_type_name(t);
        }
        self.emit(si, name);
    }

    pub fn begin_array(&mut self, name: Option<&str>, type_name: Option<&str>) {
        let mut si = SerializationInfo::new();
        si.set_category(Category::Array);
        if let Some(t) = type_name {
            si.set_type_name(t);
        }
        if let Some(n) = name {
            si.set_name(n);
        }
        self.stack.push(si);
    }

    pub fn finish_array(&mut self) {
        let node = self.stack.pop().expect("finish_array without matching begin_array");
        let name = node.name().map(|s| s.to_string());
        self.emit(node, name.as_deref());
    }

    pub fn begin_object(&mut self, name: Option<&str>, type_name: Option<&str>) {
        let mut si = SerializationInfo::new();
        si.set_category(Category::Object);
        if let Some(t) = type_name {
            si.set_type_name(t);
        }
        if let Some(n) = name {
            si.set_name(n);
        }
        self.stack.push(si);
    }

    pub fn finish_object(&mut self) {
        let node = self.stack.pop().expect("finish_object without matching begin_object");
        let name = node.name().map(|s| s.to_string());
        self.emit(node, name.as_deref());
    }

    /// True once a root value has been fully composed.
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty() && self.root.is_some()
    }

    pub fn take(&mut self) -> Option<SerializationInfo> {
        self.root.take()
    }
}
