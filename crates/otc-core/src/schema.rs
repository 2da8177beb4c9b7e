//! declarative resource schemas.

use crate::value::{AttrMap, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// attribute value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "element", rename_all = "snake_case")]
pub enum AttrType {
    String,
    Int,
    Bool,
    List(Box<AttrType>),
    Set(Box<AttrType>),
    Map(Box<AttrType>),
}

impl AttrType {
    pub fn list(element: AttrType) -> Self {
        AttrType::List(Box::new(element))
    }

    pub fn set(element: AttrType) -> Self {
        AttrType::Set(Box::new(element))
    }

    pub fn map(element: AttrType) -> Self {
        AttrType::Map(Box::new(element))
    }

    /// label used in diagnostics.
    pub fn label(&self) -> String {
        match self {
            AttrType::String => "string".to_string(),
            AttrType::Int => "int".to_string(),
            AttrType::Bool => "bool".to_string(),
            AttrType::List(element) => format!("list({})", element.label()),
            AttrType::Set(element) => format!("set({})", element.label()),
            AttrType::Map(element) => format!("map({})", element.label()),
        }
    }

    /// whether `value` conforms to this type; null always conforms.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (AttrType::String, Value::String(_)) => true,
            (AttrType::Int, Value::Int(_)) => true,
            (AttrType::Bool, Value::Bool(_)) => true,
            (AttrType::List(element), Value::List(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            (AttrType::Set(element), Value::Set(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            (AttrType::Map(element), Value::Map(map)) => {
                map.values().all(|item| element.accepts(item))
            }
            _ => false,
        }
    }

    /// normalise a decoded value: json arrays become sets where the schema
    /// says so, and numeric strings become ints for int attributes.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (AttrType::Set(element), Value::List(items)) => Value::Set(
                items
                    .into_iter()
                    .map(|item| element.coerce(item))
                    .collect::<BTreeSet<_>>(),
            ),
            (AttrType::List(element), Value::List(items)) => {
                Value::List(items.into_iter().map(|item| element.coerce(item)).collect())
            }
            (AttrType::Map(element), Value::Map(map)) => Value::Map(
                map.into_iter()
                    .map(|(key, item)| (key, element.coerce(item)))
                    .collect(),
            ),
            (AttrType::Int, Value::String(raw)) => match raw.parse::<i64>() {
                Ok(number) => Value::Int(number),
                Err(_) => Value::String(raw),
            },
            (_, value) => value,
        }
    }
}

/// value constraint checked during config validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// string must match the regular expression.
    Regex { pattern: String },
    /// string must be one of the listed values.
    OneOf { values: Vec<String> },
    /// int must be within the inclusive range.
    IntRange { min: i64, max: i64 },
    /// string length must be within the inclusive range.
    StringLength { min: usize, max: usize },
    /// string must be an ipv4/ipv6 network in cidr notation.
    Cidr,
    /// map keys must be non-empty and bounded; values bounded.
    Tags { max_key: usize, max_value: usize },
}

impl Validator {
    pub fn regex(pattern: impl Into<String>) -> Self {
        Validator::Regex {
            pattern: pattern.into(),
        }
    }

    pub fn one_of(values: &[&str]) -> Self {
        Validator::OneOf {
            values: values.iter().map(|value| value.to_string()).collect(),
        }
    }
}

/// schema for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub ty: AttrType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub computed: bool,
    /// a change to this attribute replaces the resource.
    #[serde(default)]
    pub force_new: bool,
    #[serde(default)]
    pub sensitive: bool,
    /// the remote never returns this attribute; state keeps the configured value.
    #[serde(default)]
    pub write_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Attribute {
    fn base(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            write_only: false,
            default: None,
            validators: Vec::new(),
            description: String::new(),
        }
    }

    pub fn required(ty: AttrType) -> Self {
        Self {
            required: true,
            ..Self::base(ty)
        }
    }

    pub fn optional(ty: AttrType) -> Self {
        Self {
            optional: true,
            ..Self::base(ty)
        }
    }

    pub fn computed(ty: AttrType) -> Self {
        Self {
            computed: true,
            ..Self::base(ty)
        }
    }

    /// optional attribute that the remote fills when left unset.
    pub fn optional_computed(ty: AttrType) -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::base(ty)
        }
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// attribute only ever set by the remote side.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// per-operation time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(with = "duration_secs")]
    pub create: Duration,
    #[serde(with = "duration_secs")]
    pub read: Duration,
    #[serde(with = "duration_secs")]
    pub update: Duration,
    #[serde(with = "duration_secs")]
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(10 * 60),
            delete: Duration::from_secs(10 * 60),
        }
    }
}

/// name of the optional attribute carrying user timeout overrides.
pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

impl Timeouts {
    pub fn uniform(budget: Duration) -> Self {
        Self {
            create: budget,
            read: budget,
            update: budget,
            delete: budget,
        }
    }

    /// apply a `timeouts { create = "20m" }` style override map.
    pub fn with_overrides(mut self, attrs: &AttrMap) -> Result<Self, String> {
        let Some(Value::Map(overrides)) = attrs.get(TIMEOUTS_ATTRIBUTE) else {
            return Ok(self);
        };
        for (name, raw) in overrides {
            let Some(raw) = raw.as_str() else {
                return Err(format!("timeouts.{name} must be a duration string"));
            };
            let parsed = parse_duration(raw).map_err(|err| format!("timeouts.{name}: {err}"))?;
            match name.as_str() {
                "create" => self.create = parsed,
                "read" => self.read = parsed,
                "update" => self.update = parsed,
                "delete" => self.delete = parsed,
                other => return Err(format!("unknown timeout {other}")),
            }
        }
        Ok(self)
    }
}

/// parse durations such as `90s`, `10m` or `1h30m`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for ch in raw.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {raw:?}"))?;
        digits.clear();
        total += match ch {
            'h' => amount * 3600,
            'm' => amount * 60,
            's' => amount,
            _ => return Err(format!("invalid duration unit {ch:?} in {raw:?}")),
        };
    }
    if !digits.is_empty() {
        return Err(format!("missing unit in duration {raw:?}"));
    }
    Ok(Duration::from_secs(total))
}

/// full schema for a resource or data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub version: u32,
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ResourceSchema {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            attributes: BTreeMap::new(),
            timeouts: Timeouts::default(),
            description: String::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// coerce raw attribute values into their schema types.
    pub fn coerce(&self, attrs: AttrMap) -> AttrMap {
        attrs
            .into_iter()
            .map(|(name, value)| match self.attributes.get(&name) {
                Some(attribute) => {
                    let coerced = attribute.ty.coerce(value);
                    (name, coerced)
                }
                None => (name, value),
            })
            .collect()
    }

    /// names of attributes flagged write-only.
    pub fn write_only_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, attribute)| attribute.write_only)
            .map(|(name, _)| name.as_str())
    }
}

/// schema document for the whole provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub provider: BTreeMap<String, Attribute>,
    pub resources: BTreeMap<String, ResourceSchema>,
    pub data_sources: BTreeMap<String, ResourceSchema>,
}
