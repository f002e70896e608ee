//! `SerializationInfo` — the intermediate tagged-union tree every codec
//! marshals through (spec §3, §4.1).
//!
//! Redesign note (spec §9): the source represents parent links as raw
//! back-pointers on a reference-counted node. Rust ownership makes that
//! unnecessary — a tree of owned children is enough, since nothing outside
//! a Decomposer/Composer ever needs to walk *up* the tree; `leaveMember`
//! falls out naturally from returning control to the caller that holds the
//! parent `&mut SerializationInfo`.

mod convert;

pub use convert::{ConversionError, FromSi, ToSi};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SiError {
    #[error("member not found: {0}")]
    MemberNotFound(String),
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type SiResult<T> = std::result::Result<T, SiError>;

/// The node's kind. Category may be promoted Void -> Value/Object/Array on
/// first assignment but never changed between non-Void categories without
/// an explicit `clear()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Void,
    Value,
    Object,
    Array,
}

/// The scalar union. A narrow string and a wide string are kept distinct so
/// codecs can round-trip non-ASCII text without lossy recoding (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Empty,
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    /// "long double" — modeled as f64, the widest portable float Rust has.
    Float(f64),
    NarrowString(String),
    WideString(Vec<char>),
}

impl Scalar {
    pub fn is_empty(&self) -> bool {
        matches!(self, Scalar::Empty)
    }
}

/// A node in the SerializationInfo tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializationInfo {
    category: Category,
    name: Option<String>,
    type_name: Option<String>,
    value: Scalar,
    members: Vec<SerializationInfo>,
}

impl Default for SerializationInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializationInfo {
    pub fn new() -> Self {
        Self {
            category: Category::Void,
            name: None,
            type_name: None,
            value: Scalar::Empty,
            members: Vec::new(),
        }
    }

    // ---- selector ----------------------------------------------------

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn set_category(&mut self, c: Category) {
        self.category = c;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, n: impl Into<String>) {
        self.name = Some(n.into());
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn set_type_name(&mut self, t: impl Into<String>) {
        self.type_name = Some(t.into());
    }

    pub fn set_null(&mut self) {
        self.category = Category::Void;
        self.value = Scalar::Empty;
        self.members.clear();
    }

    pub fn clear(&mut self) {
        self.category = Category::Void;
        self.value = Scalar::Empty;
        self.members.clear();
        self.type_name = None;
    }

    pub fn value(&self) -> &Scalar {
        &self.value
    }

    fn promote_value(&mut self) {
        if self.category == Category::Void {
            self.category = Category::Value;
        }
    }

    pub fn set_bool(&mut self, v: bool) {
        self.promote_value();
        self.value = Scalar::Bool(v);
    }

    pub fn set_signed(&mut self, v: i64) {
        self.promote_value();
        self.value = Scalar::Signed(v);
    }

    pub fn set_unsigned(&mut self, v: u64) {
        self.promote_value();
        self.value = Scalar::Unsigned(v);
    }

    pub fn set_float(&mut self, v: f64) {
        self.promote_value();
        self.value = Scalar::Float(v);
    }

    pub fn set_string(&mut self, v: impl Into<String>) {
        self.promote_value();
        self.value = Scalar::NarrowString(v.into());
    }

    pub fn set_wstring(&mut self, v: Vec<char>) {
        self.promote_value();
        self.value = Scalar::WideString(v);
    }

    // ---- members -------------------------------------------------------

    /// Append an Object child (promoting Void -> Object on first call).
    pub fn add_member(&mut self, name: impl Into<String>) -> &mut SerializationInfo {
        if self.category == Category::Void {
            self.category = Category::Object;
        }
        let name = name.into();
        let idx = self.members.iter().position(|m| m.name.as_deref() == Some(name.as_str()));
        if let Some(idx) = idx {
            return &mut self.members[idx];
        }
        let mut child = SerializationInfo::new();
        child.name = Some(name);
        self.members.push(child);
        self.members.last_mut().unwrap()
    }

    /// Append an unnamed Array child (promoting Void -> Array on first call).
    pub fn add_element(&mut self) -> &mut SerializationInfo {
        if self.category == Category::Void {
            self.category = Category::Array;
        }
        self.members.push(SerializationInfo::new());
        self.members.last_mut().unwrap()
    }

    pub fn find_member(&self, name: &str) -> Option<&SerializationInfo> {
        self.members.iter().find(|m| m.name.as_deref() == Some(name))
    }

    pub fn find_member_mut(&mut self, name: &str) -> Option<&mut SerializationInfo> {
        self.members.iter_mut().find(|m| m.name.as_deref() == Some(name))
    }

    pub fn get_member(&self, name: &str) -> SiResult<&SerializationInfo> {
        self.find_member(name).ok_or_else(|| SiError::MemberNotFound(name.to_string()))
    }

    pub fn members(&self) -> impl Iterator<Item = &SerializationInfo> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    // ---- duck-typed conversion ------------------------------------------

    /// Best-effort conversion between scalar arms (spec §4.1 `getValue<T>`).
    pub fn get_value<T: FromSi>(&self) -> Result<T, ConversionError> {
        T::from_si(&self.value)
    }

    pub fn set_value<T: ToSi>(&mut self, v: T) {
        self.promote_value();
        self.value = v.to_si();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_promotes_to_object_on_add_member() {
        let mut si = SerializationInfo::new();
        assert_eq!(si.category(), Category::Void);
        si.add_member("x").set_signed(1);
        assert_eq!(si.category(), Category::Object);
        assert_eq!(si.get_member("x").unwrap().get_value::<i64>().unwrap(), 1);
    }

    #[test]
    fn array_elements_are_unnamed() {
        let mut si = SerializationInfo::new();
        si.add_element().set_signed(1);
        si.add_element().set_signed(2);
        assert_eq!(si.category(), Category::Array);
        assert_eq!(si.len(), 2);
    }

    #[test]
    fn member_not_found_errors() {
        let si = SerializationInfo::new();
        assert!(matches!(si.get_member("nope"), Err(SiError::MemberNotFound(_))));
    }

    #[test]
    fn first_wins_on_duplicate_member_name() {
        let mut si = SerializationInfo::new();
        si.add_member("x").set_signed(1);
        si.add_member("x").set_signed(2);
        assert_eq!(si.len(), 1);
        assert_eq!(si.get_member("x").unwrap().get_value::<i64>().unwrap(), 2);
    }
}
