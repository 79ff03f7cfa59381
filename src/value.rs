//! Plug values.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hash::{Digest, DigestHasher};

/// The kind of value a plug holds. Fixed when the plug is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// `Value::Bool`
    Bool,
    /// `Value::Int`
    Int,
    /// `Value::Float`
    Float,
    /// `Value::String`
    String,
    /// `Value::IntVec`
    IntVec,
    /// `Value::StringVec`
    StringVec,
}

impl ValueKind {
    /// Discriminator mixed into digests so that equal bit patterns of
    /// different kinds never share a hash.
    pub(crate) fn tag(self) -> u8 {
        match self {
            ValueKind::Bool => 1,
            ValueKind::Int => 2,
            ValueKind::Float => 3,
            ValueKind::String => 4,
            ValueKind::IntVec => 5,
            ValueKind::StringVec => 6,
        }
    }

    /// The default value for this kind.
    pub fn default_value(self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::String => Value::String(Arc::from("")),
            ValueKind::IntVec => Value::IntVec(Arc::from(Vec::new())),
            ValueKind::StringVec => Value::StringVec(Arc::from(Vec::new())),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::IntVec => "int vector",
            ValueKind::StringVec => "string vector",
        };
        f.write_str(name)
    }
}

/// A plug value.
///
/// Clone is cheap: strings and vectors are shared behind `Arc`. Floats
/// compare by bit pattern, the same way they hash: `0.0 != -0.0`, and a NaN
/// equals an identical NaN.
#[derive(Debug, Clone)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A double precision float.
    Float(f64),
    /// A string.
    String(Arc<str>),
    /// A vector of integers.
    IntVec(Arc<[i64]>),
    /// A vector of strings.
    StringVec(Arc<[String]>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::IntVec(a), Value::IntVec(b)) => a == b,
            (Value::StringVec(a), Value::StringVec(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::IntVec(_) => ValueKind::IntVec,
            Value::StringVec(_) => ValueKind::StringVec,
        }
    }

    /// Append this value, including its kind, to a hasher.
    pub fn hash_into(&self, hasher: &mut DigestHasher) {
        hasher.append_tag(self.kind().tag());
        match self {
            Value::Bool(v) => {
                hasher.append_bool(*v);
            }
            Value::Int(v) => {
                hasher.append_i64(*v);
            }
            Value::Float(v) => {
                hasher.append_f64(*v);
            }
            Value::String(v) => {
                hasher.append_str(v);
            }
            Value::IntVec(v) => {
                hasher.append_u64(v.len() as u64);
                for i in v.iter() {
                    hasher.append_i64(*i);
                }
            }
            Value::StringVec(v) => {
                hasher.append_u64(v.len() as u64);
                for s in v.iter() {
                    hasher.append_str(s);
                }
            }
        }
    }

    /// Digest of this value alone.
    pub fn digest(&self) -> Digest {
        let mut hasher = DigestHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    /// Returns the boolean if this is `Value::Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer if this is `Value::Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float if this is `Value::Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string if this is `Value::String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integers if this is `Value::IntVec`.
    pub fn as_int_vec(&self) -> Option<&[i64]> {
        match self {
            Value::IntVec(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the strings if this is `Value::StringVec`.
    pub fn as_string_vec(&self) -> Option<&[String]> {
        match self {
            Value::StringVec(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntVec(Arc::from(v))
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringVec(Arc::from(v))
    }
}
