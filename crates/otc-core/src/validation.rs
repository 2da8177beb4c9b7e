//! offline validation of resource configuration against its schema.

use crate::schema::{Attribute, ResourceSchema, Timeouts, Validator, TIMEOUTS_ATTRIBUTE};
use crate::value::{AttrMap, Value};
use ipnet::IpNet;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// validation errors emitted for a single configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required attribute {0}")]
    MissingAttribute(String),
    #[error("unsupported attribute {0}")]
    UnknownAttribute(String),
    #[error("attribute {0} is computed and cannot be set")]
    ComputedAttribute(String),
    #[error("invalid type for {attribute}: expected {expected}, got {actual}")]
    InvalidType {
        attribute: String,
        expected: String,
        actual: String,
    },
    #[error("invalid value for {attribute}: {reason}")]
    InvalidValue { attribute: String, reason: String },
    #[error("invalid validator on {attribute}: {reason}")]
    BrokenValidator { attribute: String, reason: String },
}

impl ValidationError {
    /// attribute the error refers to.
    pub fn attribute(&self) -> &str {
        match self {
            ValidationError::MissingAttribute(name)
            | ValidationError::UnknownAttribute(name)
            | ValidationError::ComputedAttribute(name) => name,
            ValidationError::InvalidType { attribute, .. }
            | ValidationError::InvalidValue { attribute, .. }
            | ValidationError::BrokenValidator { attribute, .. } => attribute,
        }
    }
}

/// aggregated validation report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// return true when no errors are present.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// return true when errors are present.
    pub fn is_err(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|err| err.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

/// validate a configuration without touching the network.
pub fn validate_config(schema: &ResourceSchema, config: &AttrMap) -> ValidationReport {
    let mut report = ValidationReport::default();

    for name in config.keys() {
        if name == TIMEOUTS_ATTRIBUTE || schema.attributes.contains_key(name) {
            continue;
        }
        report
            .errors
            .push(ValidationError::UnknownAttribute(name.clone()));
    }

    if let Err(reason) = Timeouts::default().with_overrides(config) {
        report.errors.push(ValidationError::InvalidValue {
            attribute: TIMEOUTS_ATTRIBUTE.to_string(),
            reason,
        });
    }

    for (name, attribute) in &schema.attributes {
        let value = config.get(name).unwrap_or(&Value::Null);
        validate_attribute(name, attribute, value, &mut report);
    }

    report
}

fn validate_attribute(
    name: &str,
    attribute: &Attribute,
    value: &Value,
    report: &mut ValidationReport,
) {
    if value.is_null() {
        if attribute.required {
            report
                .errors
                .push(ValidationError::MissingAttribute(name.to_string()));
        }
        return;
    }
    if attribute.is_computed_only() {
        report
            .errors
            .push(ValidationError::ComputedAttribute(name.to_string()));
        return;
    }
    if !attribute.ty.accepts(value) {
        report.errors.push(ValidationError::InvalidType {
            attribute: name.to_string(),
            expected: attribute.ty.label(),
            actual: value.type_name().to_string(),
        });
        return;
    }
    for validator in &attribute.validators {
        check_validator(name, validator, value, report);
    }
}

fn check_validator(name: &str, validator: &Validator, value: &Value, report: &mut ValidationReport) {
    let invalid = |reason: String| ValidationError::InvalidValue {
        attribute: name.to_string(),
        reason,
    };
    match validator {
        Validator::Regex { pattern } => {
            let regex = match Regex::new(pattern) {
                Ok(regex) => regex,
                Err(err) => {
                    report.errors.push(ValidationError::BrokenValidator {
                        attribute: name.to_string(),
                        reason: err.to_string(),
                    });
                    return;
                }
            };
            if let Some(raw) = value.as_str() {
                if !regex.is_match(raw) {
                    report
                        .errors
                        .push(invalid(format!("{raw:?} does not match {pattern}")));
                }
            }
        }
        Validator::OneOf { values } => {
            if let Some(raw) = value.as_str() {
                if !values.iter().any(|candidate| candidate == raw) {
                    report.errors.push(invalid(format!(
                        "{raw:?} is not one of {}",
                        values.join(", ")
                    )));
                }
            }
        }
        Validator::IntRange { min, max } => {
            if let Some(number) = value.as_int() {
                if number < *min || number > *max {
                    report
                        .errors
                        .push(invalid(format!("{number} is outside {min}..={max}")));
                }
            }
        }
        Validator::StringLength { min, max } => {
            if let Some(raw) = value.as_str() {
                let len = raw.chars().count();
                if len < *min || len > *max {
                    report.errors.push(invalid(format!(
                        "length {len} is outside {min}..={max}"
                    )));
                }
            }
        }
        Validator::Cidr => {
            if let Some(raw) = value.as_str() {
                if raw.parse::<IpNet>().is_err() {
                    report
                        .errors
                        .push(invalid(format!("{raw:?} is not a valid cidr")));
                }
            }
        }
        Validator::Tags { max_key, max_value } => {
            let Some(map) = value.as_map() else {
                return;
            };
            for (key, tag_value) in map {
                if key.is_empty() {
                    report.errors.push(invalid("tag key must not be empty".to_string()));
                } else if key.chars().count() > *max_key {
                    report
                        .errors
                        .push(invalid(format!("tag key {key:?} exceeds {max_key} characters")));
                }
                if let Some(raw) = tag_value.as_str() {
                    if raw.chars().count() > *max_value {
                        report.errors.push(invalid(format!(
                            "tag value for {key:?} exceeds {max_value} characters"
                        )));
                    }
                }
            }
        }
    }
}
