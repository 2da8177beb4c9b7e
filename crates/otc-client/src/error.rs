//! remote error envelopes and their classification.

use otc_core::ErrorKind;
use std::fmt;
use thiserror::Error;

/// error codes the gateways use for throttling regardless of http status.
const THROTTLING_CODES: &[&str] = &["APIGW.0308", "APIGW.0309", "ECS.0605"];

/// failure reported by a remote service or the transport underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    /// service specific error code from the envelope.
    pub code: Option<String>,
    pub message: String,
    pub method: String,
    pub url: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.url.is_empty() {
            write!(f, "{} {}: ", self.method, self.url)?;
        }
        match self.status {
            Some(status) => write!(f, "{} (http {status})", self.kind)?,
            None => write!(f, "{}", self.kind)?,
        }
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// build from a non-success response body.
    pub fn from_response(method: &str, url: &str, status: u16, body: &str) -> Self {
        let (code, message) = parse_envelope(body);
        let message = message.unwrap_or_else(|| body.trim().chars().take(512).collect());
        Self {
            kind: classify_status(status, code.as_deref()),
            status: Some(status),
            code,
            message,
            method: method.to_string(),
            url: url.to_string(),
        }
    }

    /// build from a transport-level failure.
    pub fn from_transport(method: &str, url: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ErrorKind::TransientNet
        } else {
            ErrorKind::Unknown
        };
        Self {
            kind,
            status: err.status().map(|status| status.as_u16()),
            code: None,
            message: err.to_string(),
            method: method.to_string(),
            url: url.to_string(),
        }
    }

    /// synthesised error of the given kind, e.g. for lookups that found nothing.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            code: None,
            message: message.into(),
            method: String::new(),
            url: String::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// map an http status (and envelope code) onto the error taxonomy.
pub fn classify_status(status: u16, code: Option<&str>) -> ErrorKind {
    if let Some(code) = code {
        if THROTTLING_CODES.contains(&code) {
            return ErrorKind::RateLimited;
        }
    }
    match status {
        400 | 422 => ErrorKind::ValidationFailed,
        401 | 403 => ErrorKind::AuthFailed,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::RemoteInternal,
        _ => ErrorKind::Unknown,
    }
}

/// extract `(code, message)` from the envelopes used across services.
pub fn parse_envelope(body: &str) -> (Option<String>, Option<String>) {
    let Ok(raw) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };
    let Some(object) = raw.as_object() else {
        return (None, None);
    };

    if let Some(code) = object.get("error_code") {
        return (
            scalar(code),
            object.get("error_msg").and_then(scalar),
        );
    }
    if let Some(message) = object.get("message") {
        return (object.get("code").and_then(scalar), scalar(message));
    }
    if let Some(error) = object.get("error") {
        if let Some(text) = error.as_str() {
            return (None, Some(text.to_string()));
        }
        return (
            error.get("code").and_then(scalar),
            error.get("message").and_then(scalar),
        );
    }
    if let Some(neutron) = object.get("NeutronError") {
        return (
            neutron.get("type").and_then(scalar),
            neutron.get("message").and_then(scalar),
        );
    }
    if object.len() == 1 {
        if let Some((name, inner)) = object.iter().next() {
            if let Some(message) = inner.get("message").and_then(scalar) {
                let code = inner
                    .get("code")
                    .and_then(scalar)
                    .map(|code| format!("{name}/{code}"))
                    .or_else(|| Some(name.clone()));
                return (code, Some(message));
            }
        }
    }
    (None, None)
}

fn scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// errors raised while configuring or using service clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to initialize {service} client: {reason}")]
    Init { service: String, reason: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid provider configuration: {0}")]
    Config(String),
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Api(err) => err.kind,
            ClientError::Init { .. } => ErrorKind::ClientInitFailed,
            ClientError::Auth(_) => ErrorKind::AuthFailed,
            ClientError::Config(_) => ErrorKind::ValidationFailed,
            ClientError::Decode { .. } => ErrorKind::Unknown,
        }
    }

    pub fn init(service: impl fmt::Display, reason: impl Into<String>) -> Self {
        ClientError::Init {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_status() {
        assert_eq!(classify_status(404, None), ErrorKind::NotFound);
        assert_eq!(classify_status(409, None), ErrorKind::Conflict);
        assert_eq!(classify_status(429, None), ErrorKind::RateLimited);
        assert_eq!(classify_status(503, None), ErrorKind::RemoteInternal);
        assert_eq!(classify_status(400, None), ErrorKind::ValidationFailed);
        assert_eq!(classify_status(418, None), ErrorKind::Unknown);
    }

    #[test]
    fn throttling_codes_win_over_status() {
        assert_eq!(
            classify_status(400, Some("APIGW.0308")),
            ErrorKind::RateLimited
        );
    }

    #[test]
    fn parses_error_code_envelope() {
        let (code, message) =
            parse_envelope(r#"{"error_code":"VPC.0101","error_msg":"vpc not found"}"#);
        assert_eq!(code.as_deref(), Some("VPC.0101"));
        assert_eq!(message.as_deref(), Some("vpc not found"));
    }

    #[test]
    fn parses_nested_error_envelope() {
        let (code, message) =
            parse_envelope(r#"{"error":{"code":"ELB.8902","message":"busy"}}"#);
        assert_eq!(code.as_deref(), Some("ELB.8902"));
        assert_eq!(message.as_deref(), Some("busy"));
    }

    #[test]
    fn parses_neutron_envelope() {
        let (code, message) = parse_envelope(
            r#"{"NeutronError":{"type":"MemberNotFound","message":"no member","detail":""}}"#,
        );
        assert_eq!(code.as_deref(), Some("MemberNotFound"));
        assert_eq!(message.as_deref(), Some("no member"));
    }

    #[test]
    fn parses_single_key_envelope() {
        let (code, message) =
            parse_envelope(r#"{"itemNotFound":{"code":404,"message":"Volume could not be found"}}"#);
        assert_eq!(code.as_deref(), Some("itemNotFound/404"));
        assert_eq!(message.as_deref(), Some("Volume could not be found"));
    }

    #[test]
    fn from_response_falls_back_to_raw_body() {
        let err = ApiError::from_response("GET", "http://x/v1/vpcs/1", 502, "bad gateway\n");
        assert_eq!(err.kind, ErrorKind::RemoteInternal);
        assert_eq!(err.message, "bad gateway");
        assert_eq!(
            err.to_string(),
            "GET http://x/v1/vpcs/1: REMOTE_INTERNAL (http 502): bad gateway"
        );
    }

    #[test]
    fn client_error_kinds() {
        assert_eq!(
            ClientError::init("vpc", "no endpoint").kind(),
            ErrorKind::ClientInitFailed
        );
        assert_eq!(ClientError::Auth("x".into()).kind(), ErrorKind::AuthFailed);
        assert!(ClientError::from(ApiError::not_found("gone")).is_not_found());
    }
}
