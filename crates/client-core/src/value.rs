//! The [`Value`] type carried as packet data, event arguments and ack arguments.
//!
//! A [`Value`] is a closed sum type: every consumer matches it exhaustively or goes through
//! one of the fallible `as_*` accessors which return a [`ValueError::TypeMismatch`] when the
//! wrong variant is read.
use std::{collections::BTreeMap, fmt, sync::Arc};

use bytes::Bytes;
use serde::{Serialize, Serializer, ser::SerializeMap, ser::SerializeSeq};

use crate::packet::{EnginePacket, SocketPacket};

/// The kind of a [`Value`], used to report type mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    #[allow(missing_docs)]
    None,
    #[allow(missing_docs)]
    Str,
    #[allow(missing_docs)]
    Binary,
    #[allow(missing_docs)]
    Bool,
    #[allow(missing_docs)]
    Int,
    #[allow(missing_docs)]
    Float,
    #[allow(missing_docs)]
    Array,
    #[allow(missing_docs)]
    Object,
    #[allow(missing_docs)]
    Function,
    #[allow(missing_docs)]
    EnginePacket,
    #[allow(missing_docs)]
    SocketPacket,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::None => "none",
            ValueKind::Str => "string",
            ValueKind::Binary => "binary",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Function => "function",
            ValueKind::EnginePacket => "engine.io packet",
            ValueKind::SocketPacket => "socket.io packet",
        };
        f.write_str(name)
    }
}

/// Error returned when a [`Value`] is read as a variant it does not hold.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    /// The value holds another variant.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The requested kind.
        expected: ValueKind,
        /// The kind actually held.
        found: ValueKind,
    },
}

/// A callable value. Used for acknowledgement callbacks.
///
/// Two functions are equal only if they point to the same closure.
#[derive(Clone)]
pub struct Function(Arc<dyn Fn(Vec<Value>) + Send + Sync>);

impl Function {
    /// Wrap a closure.
    pub fn new(f: impl Fn(Vec<Value>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Call the wrapped closure with `args`.
    pub fn call(&self, args: Vec<Value>) {
        (self.0)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function(..)")
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A dynamically typed payload.
///
/// Cloning deep-copies strings, arrays and objects. [`Bytes`] and [`Function`] are reference
/// counted and cloned cheaply.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No value. Serialized as `null`.
    #[default]
    None,
    /// A UTF-8 string.
    Str(String),
    /// A binary buffer.
    Binary(Bytes),
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A string keyed map.
    Object(BTreeMap<String, Value>),
    /// An acknowledgement callback.
    Function(Function),
    /// An engine.io packet.
    EnginePacket(Box<EnginePacket>),
    /// A socket.io packet.
    SocketPacket(Box<SocketPacket>),
}

macro_rules! accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        #[doc = concat!("Borrow the inner value if this is a [`Value::", stringify!($variant), "`].")]
        pub fn $name(&self) -> Result<$ty, ValueError> {
            match self {
                Value::$variant(v) => Ok(v),
                v => Err(v.mismatch(ValueKind::$variant)),
            }
        }
    };
}

impl Value {
    /// The kind of the active variant.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Str(_) => ValueKind::Str,
            Value::Binary(_) => ValueKind::Binary,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Function(_) => ValueKind::Function,
            Value::EnginePacket(_) => ValueKind::EnginePacket,
            Value::SocketPacket(_) => ValueKind::SocketPacket,
        }
    }

    fn mismatch(&self, expected: ValueKind) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Build a [`Value::Function`] from a closure.
    pub fn function(f: impl Fn(Vec<Value>) + Send + Sync + 'static) -> Self {
        Value::Function(Function::new(f))
    }

    /// Returns true if this is [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Returns true if this is [`Value::Binary`].
    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }

    /// Borrow the inner string if this is a [`Value::Str`].
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            v => Err(v.mismatch(ValueKind::Str)),
        }
    }

    accessor!(as_bytes, Binary, &Bytes);
    accessor!(as_array, Array, &Vec<Value>);
    accessor!(as_object, Object, &BTreeMap<String, Value>);
    accessor!(as_function, Function, &Function);

    /// Read the inner bool if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            v => Err(v.mismatch(ValueKind::Bool)),
        }
    }

    /// Read the inner integer if this is a [`Value::Int`].
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            v => Err(v.mismatch(ValueKind::Int)),
        }
    }

    /// Read a number. Integers are widened.
    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            v => Err(v.mismatch(ValueKind::Float)),
        }
    }

    /// Borrow the packet if this is a [`Value::EnginePacket`].
    pub fn as_engine_packet(&self) -> Result<&EnginePacket, ValueError> {
        match self {
            Value::EnginePacket(p) => Ok(p.as_ref()),
            v => Err(v.mismatch(ValueKind::EnginePacket)),
        }
    }

    /// Borrow the packet if this is a [`Value::SocketPacket`].
    pub fn as_socket_packet(&self) -> Result<&SocketPacket, ValueError> {
        match self {
            Value::SocketPacket(p) => Ok(p.as_ref()),
            v => Err(v.mismatch(ValueKind::SocketPacket)),
        }
    }

    /// Take the inner string if this is a [`Value::Str`].
    pub fn into_string(self) -> Result<String, ValueError> {
        match self {
            Value::Str(s) => Ok(s),
            v => Err(v.mismatch(ValueKind::Str)),
        }
    }

    /// Take the inner list if this is a [`Value::Array`].
    pub fn into_array(self) -> Result<Vec<Value>, ValueError> {
        match self {
            Value::Array(a) => Ok(a),
            v => Err(v.mismatch(ValueKind::Array)),
        }
    }

    /// Recursively check if any leaf reachable through arrays and objects is binary.
    pub fn has_binary(&self) -> bool {
        match self {
            Value::Binary(_) => true,
            Value::Array(arr) => arr.iter().any(Value::has_binary),
            Value::Object(map) => map.values().any(Value::has_binary),
            _ => false,
        }
    }

    /// Parse a JSON document into a [`Value`].
    pub fn from_json_str(data: &str) -> Result<Value, serde_json::Error> {
        serde_json::from_str::<serde_json::Value>(data).map(Value::from)
    }

    /// Serialize this value to JSON.
    ///
    /// Functions and packets have no JSON form and are written as `null`.
    /// Binary buffers are written as arrays of bytes.
    pub fn to_json_string(&self) -> String {
        // Our Serialize impl only emits string keys so it cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(s) => serializer.serialize_str(s),
            Value::Binary(b) => serializer.serialize_bytes(b),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Value::Object(obj) => {
                let mut map = serializer.serialize_map(Some(obj.len()))?;
                for (k, v) in obj {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::None | Value::Function(_) | Value::EnginePacket(_) | Value::SocketPacket(_) => {
                serializer.serialize_none()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}
impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}
impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value.into())
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}
impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}
impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Object(value)
    }
}
impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Value::Function(value)
    }
}
impl From<EnginePacket> for Value {
    fn from(value: EnginePacket) -> Self {
        Value::EnginePacket(Box::new(value))
    }
}
impl From<SocketPacket> for Value {
    fn from(value: SocketPacket) -> Self {
        Value::SocketPacket(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessor_type_mismatch() {
        let value = Value::Int(3);
        assert_eq!(value.as_int(), Ok(3));
        assert_eq!(
            value.as_str(),
            Err(ValueError::TypeMismatch {
                expected: ValueKind::Str,
                found: ValueKind::Int
            })
        );
        assert_eq!(value.as_float(), Ok(3.0));
        assert!(Value::None.as_bool().is_err());
    }

    #[test]
    fn has_binary_nested() {
        let mut obj = BTreeMap::new();
        obj.insert("file".to_string(), Value::Binary(Bytes::from_static(&[1, 2])));
        let value = Value::Array(vec!["upload".into(), Value::Array(vec![obj.into()])]);
        assert!(value.has_binary());

        let value = Value::from(json!(["hello", { "a": [1, 2, 3] }]));
        assert!(!value.has_binary());
    }

    #[test]
    fn json_conversion() {
        let value = Value::from(json!(["event", 1, 2.5, null, true, { "key": "val" }]));
        assert_eq!(
            value.to_json_string(),
            r#"["event",1,2.5,null,true,{"key":"val"}]"#
        );
        assert_eq!(
            Value::from_json_str(r#"{"sid":"abc","upgrades":[]}"#).unwrap(),
            Value::from(json!({ "sid": "abc", "upgrades": [] }))
        );
    }

    #[test]
    fn function_as_json_is_null() {
        let value = Value::Array(vec!["ev".into(), Value::function(|_| {})]);
        assert_eq!(value.to_json_string(), r#"["ev",null]"#);
    }

    #[test]
    fn function_equality_is_identity() {
        let f = Function::new(|_| {});
        let g = Function::new(|_| {});
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn clone_is_deep_for_owned_variants() {
        let original = Value::Array(vec!["a".into()]);
        let mut copy = original.clone();
        if let Value::Array(arr) = &mut copy {
            arr.push("b".into());
        }
        assert_eq!(original.as_array().unwrap().len(), 1);
        assert_eq!(copy.as_array().unwrap().len(), 2);
    }
}
