//! Record values
//!
//! This module provides the in-memory record model handed to the encoder and
//! produced by the decoders, plus scaled decimals.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::crypto::Hash;
use crate::error::FieldError;
use crate::schema::{SchemaNode, WalkContext};

/// A decimal number `mantissa × 10^-scale`
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Decimal {
    /// Unscaled value
    pub mantissa: i64,
    /// Number of decimal places
    pub scale: u32,
}

impl Decimal {
    /// Create a decimal from its parts
    pub fn new(mantissa: i64, scale: u32) -> Self {
        Decimal { mantissa, scale }
    }

    /// Express the same number with `scale` decimal places
    ///
    /// Returns `None` when digits would be lost or the mantissa overflows.
    pub fn rescale(&self, scale: u32) -> Option<Decimal> {
        match scale.cmp(&self.scale) {
            Ordering::Equal => Some(*self),
            Ordering::Greater => {
                let factor = 10i64.checked_pow(scale - self.scale)?;
                Some(Decimal::new(self.mantissa.checked_mul(factor)?, scale))
            }
            Ordering::Less => {
                let factor = 10i64.checked_pow(self.scale - scale)?;
                if self.mantissa % factor != 0 {
                    return None;
                }
                Some(Decimal::new(self.mantissa / factor, scale))
            }
        }
    }

    /// Strip trailing zero decimal places
    pub fn normalize(&self) -> Decimal {
        let mut result = *self;
        while result.scale > 0 && result.mantissa % 10 == 0 {
            result.mantissa /= 10;
            result.scale -= 1;
        }
        result
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.normalize(), other.normalize());
        a.mantissa == b.mantissa && a.scale == b.scale
    }
}

impl Eq for Decimal {}

impl Display for Decimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = format!("{:0>width$}", digits, width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        write!(f, "{}{}.{}", sign, int_part, frac_part)
    }
}

impl Debug for Decimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({})", self)
    }
}

impl FromStr for Decimal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if int_part.is_empty() || !valid(int_part) || !valid(frac_part) {
            return Err(format!("'{}' is not a decimal number", s));
        }

        let digits = format!("{}{}", int_part, frac_part);
        let magnitude: i64 = digits.parse().map_err(|_| format!("'{}' does not fit in 64 bits", s))?;
        let mantissa = if negative { -magnitude } else { magnitude };
        Ok(Decimal::new(mantissa, frac_part.len() as u32))
    }
}

/// Value of a record field
#[derive(Clone, Serialize, Deserialize)]
pub enum Value {
    /// Signed integer
    Int(i64),

    /// Unsigned integer
    UInt(u64),

    /// Floating point
    Float(f64),

    /// Scaled decimal
    Decimal(Decimal),

    /// Text string
    String(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Repeated values
    Array(Vec<Value>),

    /// Named values
    Object(BTreeMap<String, Value>),

    /// Field hidden by a proof
    Redacted,

    /// Field disclosed by its value hash only
    Hashed(Hash),

    /// String disclosed with its hidden parts replaced
    Masked(String),
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "Int({})", v),
            Value::UInt(v) => write!(f, "UInt({})", v),
            Value::Float(v) => write!(f, "Float({})", v),
            Value::Decimal(v) => write!(f, "Decimal({})", v),
            Value::String(v) => write!(f, "String({:?})", v),
            Value::Bytes(v) => write!(f, "Bytes({})", hex::encode(v)),
            Value::Array(v) => f.debug_list().entries(v).finish(),
            Value::Object(v) => f.debug_map().entries(v).finish(),
            Value::Redacted => write!(f, "Redacted"),
            Value::Hashed(h) => write!(f, "Hashed({})", hex::encode(&h[0..4])),
            Value::Masked(v) => write!(f, "Masked({:?})", v),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                u64::try_from(*a).map_or(false, |a| a == *b)
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Redacted, Value::Redacted) => true,
            (Value::Hashed(a), Value::Hashed(b)) => a == b,
            (Value::Masked(a), Value::Masked(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl Value {
    /// Empty object
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Add a field to an object, builder style
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self {
            map.insert(name.to_string(), value.into());
        }
        self
    }

    /// Field of an object
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// Elements of an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Text of a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is a proof marker
    pub fn is_marker(&self) -> bool {
        matches!(self, Value::Redacted | Value::Hashed(_) | Value::Masked(_))
    }

    /// Convert a plain JSON record, `null` object members are treated as absent
    pub fn from_json(json: &JsonValue) -> Result<Value, FieldError> {
        from_json_at(json, "")
    }

    /// Convert to JSON; bytes and hashes become hex strings
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Int(v) => JsonValue::from(*v),
            Value::UInt(v) => JsonValue::from(*v),
            Value::Float(v) => JsonValue::from(*v),
            Value::Decimal(v) => JsonValue::String(v.to_string()),
            Value::String(v) => JsonValue::String(v.clone()),
            Value::Bytes(v) => JsonValue::String(hex::encode(v)),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => {
                JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Value::Redacted => serde_json::json!({ "redacted": true }),
            Value::Hashed(h) => serde_json::json!({ "hashed": hex::encode(h) }),
            Value::Masked(v) => serde_json::json!({ "masked": v }),
        }
    }
}

fn from_json_at(json: &JsonValue, path: &str) -> Result<Value, FieldError> {
    let join = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", path, segment)
        }
    };

    match json {
        JsonValue::Null => Err(FieldError::WrongType { path: path.to_string(), expected: "non-null value" }),
        JsonValue::Bool(_) => Err(FieldError::WrongType { path: path.to_string(), expected: "number or string" }),
        JsonValue::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(Value::UInt(v))
            } else if let Some(v) = n.as_i64() {
                Ok(Value::Int(v))
            } else {
                Ok(Value::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| from_json_at(item, &join(&i.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        JsonValue::Object(map) => {
            let mut out = BTreeMap::new();
            for (key, item) in map {
                if item.is_null() {
                    continue;
                }
                out.insert(key.clone(), from_json_at(item, &join(key))?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Navigates the input record in step with a schema walk
pub(crate) struct ValueCursor<'v> {
    stack: Vec<&'v Value>,
}

impl<'v> ValueCursor<'v> {
    pub(crate) fn new(root: &'v Value) -> Self {
        ValueCursor { stack: vec![root] }
    }

    /// Value of `node` at `ctx`: an element of the enclosing array, or a
    /// member of the enclosing object
    pub(crate) fn lookup(&self, node: &SchemaNode, ctx: &WalkContext<'_>) -> Option<&'v Value> {
        let top = *self.stack.last()?;
        let value = match ctx.path.last() {
            Some(crate::schema::PathSegment::Index(index)) if node.array.is_some() => {
                top.as_array()?.get(*index)?
            }
            _ => top.get(&node.name)?,
        };
        Some(value)
    }

    pub(crate) fn push(&mut self, value: &'v Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) {
        self.stack.pop();
    }
}

enum Frame {
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

/// Assembles nested values in step with a schema walk
pub(crate) struct ValueBuilder {
    frames: Vec<Frame>,
}

impl ValueBuilder {
    pub(crate) fn new() -> Self {
        ValueBuilder { frames: vec![Frame::Object(BTreeMap::new())] }
    }

    /// Store a finished value as a member or as the next element
    pub(crate) fn set(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(Frame::Object(map)) => {
                map.insert(name.to_string(), value);
            }
            Some(Frame::Array(items)) => items.push(value),
            None => {}
        }
    }

    pub(crate) fn begin_object(&mut self) {
        self.frames.push(Frame::Object(BTreeMap::new()));
    }

    pub(crate) fn begin_array(&mut self) {
        self.frames.push(Frame::Array(Vec::new()));
    }

    /// Close the innermost container and store it under `name`
    pub(crate) fn end(&mut self, name: &str) {
        let value = match self.frames.pop() {
            Some(Frame::Object(map)) => Value::Object(map),
            Some(Frame::Array(items)) => Value::Array(items),
            None => return,
        };
        self.set(name, value);
    }

    pub(crate) fn finish(mut self) -> Value {
        match self.frames.drain(..).next() {
            Some(Frame::Object(map)) => Value::Object(map),
            Some(Frame::Array(items)) => Value::Array(items),
            None => Value::object(),
        }
    }
}
