//! value representation
//!
//! Variables, inputs and remote state settings share one data model:
//! - null
//! - boolean (true/false)
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving "map"/"dictionary", where the key is of type string)
//!
//! Every value has a string rendering used when it is interpolated into text, see [Value::to_interpolated_string].
//! Lists render as `[a b c]`, objects render as JSON.
use indexmap::IndexMap;
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};
use std::fmt::{Display, Formatter};

pub type Map = IndexMap<String, Value>;

/// All possible value types
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("expression was not fully resolved: {0}")]
    Unresolved(String),
    #[error("object key is not a plain string: {0}")]
    InvalidKey(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// `null` and `""` both count as empty
    pub fn is_empty_string(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Navigate nested objects
    pub fn get_path<'a>(&'a self, path: &[&str]) -> Option<&'a Value> {
        let mut cursor = self;
        for segment in path {
            cursor = cursor.as_object()?.get(*segment)?;
        }
        Some(cursor)
    }

    /// Rendering used when the value is spliced into a larger string
    pub fn to_interpolated_string(&self) -> String {
        self.to_string()
    }

    /// A scalar becomes a single element list, an array of scalars is rendered element-wise
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Value::Null => vec![],
            Value::Array(items) => items.iter().map(Value::to_interpolated_string).collect(),
            other => vec![other.to_interpolated_string()],
        }
    }

    /// Deep merge `other` into `self`
    ///
    /// Objects are merged key by key. For any other combination the value of `other` replaces `self` if
    /// `other_wins` is set.
    pub fn merge(&mut self, other: Value, other_wins: bool) {
        match (self, other) {
            (Value::Object(current), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    match current.get_mut(&key) {
                        Some(existing) => existing.merge(value, other_wins),
                        None => {
                            current.insert(key, value);
                        }
                    }
                }
            }
            (current, incoming) => {
                if other_wins || current.is_null() {
                    *current = incoming;
                }
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(_) => {
                let json = serde_json::to_string(&self.to_json()).map_err(|_| std::fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<hcl::Number> for Value {
    fn from(value: hcl::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        value.as_f64().map(Value::Decimal).unwrap_or(Value::Null)
    }
}

impl TryFrom<hcl::Expression> for Value {
    type Error = ValueError;

    fn try_from(value: hcl::Expression) -> Result<Self, Self::Error> {
        use hcl::Expression;

        Ok(match value {
            Expression::Null => Value::Null,
            Expression::Bool(bool) => bool.into(),
            Expression::Number(num) => num.into(),
            Expression::String(s) => s.into(),
            Expression::Array(array) => Value::Array(
                array
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Expression::Object(object) => Value::Object(
                object
                    .into_iter()
                    .map(|(key, value)| Ok((object_key(key)?, Value::try_from(value)?)))
                    .collect::<Result<_, ValueError>>()?,
            ),
            Expression::Parenthesis(inner) => Value::try_from(*inner)?,
            other => return Err(ValueError::Unresolved(format!("{other:?}"))),
        })
    }
}

fn object_key(key: hcl::ObjectKey) -> Result<String, ValueError> {
    match key {
        hcl::ObjectKey::Identifier(ident) => Ok(ident.to_string()),
        hcl::ObjectKey::Expression(hcl::Expression::String(s)) => Ok(s),
        other => Err(ValueError::InvalidKey(format!("{other:?}"))),
    }
}

impl From<hcl::Value> for Value {
    fn from(value: hcl::Value) -> Value {
        match value {
            hcl::Value::Null => Value::Null,
            hcl::Value::Bool(b) => b.into(),
            hcl::Value::Number(n) => n.into(),
            hcl::Value::String(s) => s.into(),
            hcl::Value::Array(a) => a.into(),
            hcl::Value::Object(o) => Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<Value> for hcl::Value {
    fn from(value: Value) -> hcl::Value {
        match value {
            Value::Null => hcl::Value::Null,
            Value::Boolean(b) => hcl::Value::Bool(b),
            Value::Integer(i) => hcl::Value::Number(hcl::Number::from(i)),
            Value::Decimal(d) => hcl::Number::from_f64(d)
                .map(hcl::Value::Number)
                .unwrap_or(hcl::Value::Null),
            Value::String(s) => hcl::Value::String(s),
            Value::Array(a) => hcl::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => hcl::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => b.into(),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                None => n.as_f64().map(Value::Decimal).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => s.into(),
            serde_json::Value::Array(a) => a.into(),
            serde_json::Value::Object(o) => Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

impl<'de> serde::de::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
