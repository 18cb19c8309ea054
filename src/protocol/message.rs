use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

use crate::errors::FieldError;

/// Kind of a [`Value`], used to report accessor type mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    String,
    Binary,
    Message,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "an integer",
            ValueKind::String => "a string",
            ValueKind::Binary => "binary data",
            ValueKind::Message => "a message",
            ValueKind::List => "a list",
        };
        f.write_str(name)
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    String(String),
    Binary(Bytes),
    Message(Message),
    List(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
            Value::Binary(_) => ValueKind::Binary,
            Value::Message(_) => ValueKind::Message,
            Value::List(_) => ValueKind::List,
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Integer(value as i64)
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
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

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Binary(Bytes::copy_from_slice(value))
    }
}

impl From<Message> for Value {
    fn from(value: Message) -> Self {
        Value::Message(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Vec<Message>> for Value {
    fn from(value: Vec<Message>) -> Self {
        Value::List(value.into_iter().map(Value::Message).collect())
    }
}

/// An HTSP message: a set of uniquely named, typed fields.
///
/// Messages are built mutably before sending and handed to listeners as
/// `&Message` after decoding. Field order carries no meaning, so two
/// messages are equal when they hold the same fields.
///
/// Strict accessors (`get_i64`, `get_str`, ...) fail on a missing field or
/// on a field of another kind. The `*_or` accessors fall back to the given
/// default in both cases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: BTreeMap<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request for the given method.
    pub fn method(name: &str) -> Self {
        Self::new().with("method", name)
    }

    /// Inserts a field and returns the message, for building requests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(key, value);
        self
    }

    /// Inserts a field, returning the value it replaced.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The `method` field, if present and a string.
    pub fn method_name(&self) -> Option<&str> {
        match self.fields.get("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, FieldError> {
        match self.lookup(key)? {
            Value::Integer(value) => Ok(*value),
            other => Err(mismatch(key, ValueKind::Integer, other)),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, FieldError> {
        match self.lookup(key)? {
            Value::String(value) => Ok(value),
            other => Err(mismatch(key, ValueKind::String, other)),
        }
    }

    pub fn get_bin(&self, key: &str) -> Result<&Bytes, FieldError> {
        match self.lookup(key)? {
            Value::Binary(value) => Ok(value),
            other => Err(mismatch(key, ValueKind::Binary, other)),
        }
    }

    pub fn get_message(&self, key: &str) -> Result<&Message, FieldError> {
        match self.lookup(key)? {
            Value::Message(value) => Ok(value),
            other => Err(mismatch(key, ValueKind::Message, other)),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<&[Value], FieldError> {
        match self.lookup(key)? {
            Value::List(value) => Ok(value),
            other => Err(mismatch(key, ValueKind::List, other)),
        }
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        match self.fields.get(key) {
            Some(Value::Integer(value)) => *value,
            _ => default,
        }
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.fields.get(key) {
            Some(Value::String(value)) => value,
            _ => default,
        }
    }

    fn lookup(&self, key: &str) -> Result<&Value, FieldError> {
        self.fields
            .get(key)
            .ok_or_else(|| FieldError::Missing(key.to_owned()))
    }
}

fn mismatch(key: &str, expected: ValueKind, found: &Value) -> FieldError {
    FieldError::TypeMismatch {
        field: key.to_owned(),
        expected,
        found: found.kind(),
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Message {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut message = Message::new();
        for (key, value) in iter {
            message.put(key, value);
        }
        message
    }
}
