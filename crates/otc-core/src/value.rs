//! dynamically typed attribute values and path access.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// attribute dictionary keyed by top-level attribute name.
pub type AttrMap = BTreeMap<String, Value>;

/// attribute value as exchanged with the host.
///
/// sets are kept ordered so that two equal sets always compare and
/// serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<String, Value>),
}

/// errors produced when converting foreign data into a [`Value`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("unsupported number {0}: only integers are allowed")]
    Float(String),
    #[error("invalid attribute path: {0}")]
    Path(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// iterate the elements of a list or a set.
    pub fn elements(&self) -> Option<Vec<&Value>> {
        match self {
            Value::List(items) => Some(items.iter().collect()),
            Value::Set(items) => Some(items.iter().collect()),
            _ => None,
        }
    }

    /// return a map of plain strings, skipping non-string entries.
    pub fn as_string_map(&self) -> Option<BTreeMap<String, String>> {
        self.as_map().map(|map| {
            map.iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
                .collect()
        })
    }

    /// true for null, empty strings and empty collections.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(value) => value.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Set(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            Value::Bool(_) | Value::Int(_) => false,
        }
    }

    /// convert from json, rejecting fractional numbers.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ValueError> {
        Ok(match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Int(value),
                None => return Err(ValueError::Float(number.to_string())),
            },
            serde_json::Value::String(value) => Value::String(value),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| Ok((key, Value::from_json(value)?)))
                    .collect::<Result<_, ValueError>>()?,
            ),
        })
    }

    /// convert to json; sets become arrays in their canonical order.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Int(value) => serde_json::Value::from(*value),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// resolve a nested path below this value.
    pub fn get_path(&self, path: &AttrPath) -> Option<&Value> {
        let mut current = self;
        for step in &path.steps {
            current = match (step, current) {
                (PathStep::Key(key), Value::Map(map)) => map.get(key)?,
                (PathStep::Index(index), Value::List(items)) => items.get(*index)?,
                (PathStep::Index(index), Value::Set(items)) => items.iter().nth(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(value) => write!(f, "{value:?}"),
            other => write!(f, "{}", other.to_json()),
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

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(value: BTreeMap<String, String>) -> Self {
        Value::Map(
            value
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect(),
        )
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(raw).map_err(serde::de::Error::custom)
    }
}

/// one step of an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// dotted attribute path such as `tags.env` or `members.0.address`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrPath {
    steps: Vec<PathStep>,
}

impl AttrPath {
    /// parse a dotted path; numeric segments index lists.
    pub fn parse(raw: &str) -> Result<Self, ValueError> {
        if raw.is_empty() {
            return Err(ValueError::Path("empty path".to_string()));
        }
        let mut steps = Vec::new();
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(ValueError::Path(raw.to_string()));
            }
            match segment.parse::<usize>() {
                Ok(index) if !steps.is_empty() => steps.push(PathStep::Index(index)),
                _ => steps.push(PathStep::Key(segment.to_string())),
            }
        }
        Ok(Self { steps })
    }

    /// path consisting of a single top-level attribute.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            steps: vec![PathStep::Key(name.into())],
        }
    }

    /// top-level attribute name this path starts with.
    pub fn attribute(&self) -> &str {
        match self.steps.first() {
            Some(PathStep::Key(key)) => key,
            _ => "",
        }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// resolve this path inside an attribute map.
    pub fn lookup<'a>(&self, attrs: &'a AttrMap) -> Option<&'a Value> {
        let (first, rest) = self.steps.split_first()?;
        let PathStep::Key(name) = first else {
            return None;
        };
        let root = attrs.get(name)?;
        root.get_path(&AttrPath {
            steps: rest.to_vec(),
        })
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.steps {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            match step {
                PathStep::Key(key) => f.write_str(key)?,
                PathStep::Index(index) => write!(f, "{index}")?,
            }
        }
        Ok(())
    }
}
