//! Attribute value types and the local store
//!
//! This module provides the typed side of the projection: the closed kind
//! tag, the sum-type attribute value with its canonical string encoding,
//! and the ResourceData store that adapters read and write.

use crate::error::{ProjectionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Flat attribute bag as accepted and returned by the remote API.
///
/// Absent keys mean "unset", equivalent to the kind's zero value when the
/// bag is decoded through a projection table.
pub type RemoteAttributes = HashMap<String, String>;

/// Kind tag for a projected attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    Bool,
    Int,
    String,
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrKind::Bool => f.write_str("bool"),
            AttrKind::Int => f.write_str("int"),
            AttrKind::String => f.write_str("string"),
        }
    }
}

/// A locally-typed attribute value.
///
/// Each kind has a single canonical string encoding on the remote side:
/// booleans are exactly `"true"`/`"false"`, integers are base-10 strings,
/// strings pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl AttrValue {
    /// The zero value for a kind: `false`, `0` or the empty string.
    pub fn zero(kind: AttrKind) -> Self {
        match kind {
            AttrKind::Bool => AttrValue::Bool(false),
            AttrKind::Int => AttrValue::Int(0),
            AttrKind::String => AttrValue::String(String::new()),
        }
    }

    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Bool(_) => AttrKind::Bool,
            AttrValue::Int(_) => AttrKind::Int,
            AttrValue::String(_) => AttrKind::String,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            AttrValue::Bool(b) => !b,
            AttrValue::Int(i) => *i == 0,
            AttrValue::String(s) => s.is_empty(),
        }
    }

    /// Canonical string encoding for the remote side.
    pub fn encode(&self) -> String {
        match self {
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::String(s) => s.clone(),
        }
    }

    /// Strict parse of a remote string into a value of `kind`.
    ///
    /// Booleans accept exactly `"true"` and `"false"`; integers accept
    /// base-10 strings. Returns None when the raw string does not parse.
    pub fn parse(kind: AttrKind, raw: &str) -> Option<Self> {
        match kind {
            AttrKind::Bool => match raw {
                "true" => Some(AttrValue::Bool(true)),
                "false" => Some(AttrValue::Bool(false)),
                _ => None,
            },
            AttrKind::Int => raw.parse::<i64>().ok().map(AttrValue::Int),
            AttrKind::String => Some(AttrValue::String(raw.to_string())),
        }
    }
}

impl Serialize for AttrValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AttrValue::Bool(b) => serializer.serialize_bool(*b),
            AttrValue::Int(i) => serializer.serialize_i64(*i),
            AttrValue::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct AttrValueVisitor;

        impl<'de> Visitor<'de> for AttrValueVisitor {
            type Value = AttrValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean, an integer or a string")
            }

            fn visit_bool<E>(self, value: bool) -> std::result::Result<AttrValue, E>
            where
                E: de::Error,
            {
                Ok(AttrValue::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> std::result::Result<AttrValue, E>
            where
                E: de::Error,
            {
                Ok(AttrValue::Int(value))
            }

            fn visit_u64<E>(self, value: u64) -> std::result::Result<AttrValue, E>
            where
                E: de::Error,
            {
                i64::try_from(value)
                    .map(AttrValue::Int)
                    .map_err(|_| E::custom("integer attribute out of range"))
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<AttrValue, E>
            where
                E: de::Error,
            {
                Ok(AttrValue::String(value.to_string()))
            }

            fn visit_string<E>(self, value: String) -> std::result::Result<AttrValue, E>
            where
                E: de::Error,
            {
                Ok(AttrValue::String(value))
            }
        }

        deserializer.deserialize_any(AttrValueVisitor)
    }
}

/// Locally-typed attribute store, keyed by local attribute name.
///
/// Absent keys mean "unset": typed getters return the kind's zero value,
/// mirroring how the remote side treats absent attributes. A stored value
/// of the wrong kind is a programming error and reads as TypeMismatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceData {
    values: HashMap<String, AttrValue>,
}

impl ResourceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.values.insert(name.into(), value);
    }

    /// Typed getter; an absent key reads as `false`.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.values.get(name) {
            None => Ok(false),
            Some(AttrValue::Bool(b)) => Ok(*b),
            Some(other) => Err(ProjectionError::TypeMismatch {
                name: name.to_string(),
                expected: AttrKind::Bool,
                actual: other.kind(),
            }),
        }
    }

    /// Typed getter; an absent key reads as `0`.
    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.values.get(name) {
            None => Ok(0),
            Some(AttrValue::Int(i)) => Ok(*i),
            Some(other) => Err(ProjectionError::TypeMismatch {
                name: name.to_string(),
                expected: AttrKind::Int,
                actual: other.kind(),
            }),
        }
    }

    /// Typed getter; an absent key reads as the empty string.
    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.values.get(name) {
            None => Ok(String::new()),
            Some(AttrValue::String(s)) => Ok(s.clone()),
            Some(other) => Err(ProjectionError::TypeMismatch {
                name: name.to_string(),
                expected: AttrKind::String,
                actual: other.kind(),
            }),
        }
    }

    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.set(name, AttrValue::Bool(value));
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.set(name, AttrValue::Int(value));
    }

    pub fn set_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set(name, AttrValue::String(value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// JSON snapshot of the store, for adapters that persist state.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
