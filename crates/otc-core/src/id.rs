//! composite resource ids such as `pool_id/member_id`.

use crate::value::{AttrMap, Value};
use thiserror::Error;

/// separator between composite id segments.
pub const SEPARATOR: char = '/';

/// errors produced while splitting or joining composite ids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid id {id:?}: expected format {format} ({expected} segments, got {actual})")]
    Arity {
        id: String,
        format: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid id {id:?}: segment {segment} must not be empty")]
    EmptySegment { id: String, segment: String },
    #[error("cannot build id: attribute {0} is not set")]
    MissingAttribute(String),
    #[error("invalid id {id:?}: segment {segment} must not contain '/'")]
    Separator { id: String, segment: String },
}

/// one positional segment of a composite id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub attribute: &'static str,
    pub optional: bool,
}

/// positional layout of a composite id, e.g. `pool_id/member_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPath {
    segments: Vec<Segment>,
}

impl ImportPath {
    /// layout where every segment is mandatory.
    pub fn new(attributes: &[&'static str]) -> Self {
        Self {
            segments: attributes
                .iter()
                .map(|attribute| Segment {
                    attribute: *attribute,
                    optional: false,
                })
                .collect(),
        }
    }

    /// mark a segment as allowed to be empty.
    pub fn optional(mut self, attribute: &str) -> Self {
        for segment in &mut self.segments {
            if segment.attribute == attribute {
                segment.optional = true;
            }
        }
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// human readable layout used in error messages.
    pub fn format(&self) -> String {
        self.segments
            .iter()
            .map(|segment| {
                if segment.optional {
                    format!("[{}]", segment.attribute)
                } else {
                    segment.attribute.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// split an id into named attributes; empty optional segments are omitted.
    pub fn parse(&self, id: &str) -> Result<AttrMap, IdError> {
        let parts: Vec<&str> = id.split(SEPARATOR).collect();
        if parts.len() != self.segments.len() {
            return Err(IdError::Arity {
                id: id.to_string(),
                format: self.format(),
                expected: self.segments.len(),
                actual: parts.len(),
            });
        }
        let mut attrs = AttrMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            if part.is_empty() {
                if segment.optional {
                    continue;
                }
                return Err(IdError::EmptySegment {
                    id: id.to_string(),
                    segment: segment.attribute.to_string(),
                });
            }
            attrs.insert(segment.attribute.to_string(), Value::from(part));
        }
        Ok(attrs)
    }

    /// join named attributes back into a composite id.
    pub fn build(&self, attrs: &AttrMap) -> Result<String, IdError> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let value = attrs
                .get(segment.attribute)
                .and_then(Value::as_str)
                .unwrap_or_default();
            if value.is_empty() && !segment.optional {
                return Err(IdError::MissingAttribute(segment.attribute.to_string()));
            }
            if value.contains(SEPARATOR) {
                return Err(IdError::Separator {
                    id: value.to_string(),
                    segment: segment.attribute.to_string(),
                });
            }
            parts.push(value);
        }
        Ok(parts.join("/"))
    }
}
