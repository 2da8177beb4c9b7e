//! `SDK-HMAC-SHA256` request signing for access key credentials.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const DATE_HEADER: &str = "x-sdk-date";
pub const SECURITY_TOKEN_HEADER: &str = "x-security-token";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

type HmacSha256 = Hmac<Sha256>;

/// signs requests with an access key pair.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    security_token: Option<String>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        security_token: Option<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            security_token,
        }
    }

    /// stamp and sign a request in place; existing signatures are replaced.
    pub fn sign(&self, request: &mut reqwest::Request, now: DateTime<Utc>) -> Result<(), ClientError> {
        let stamp = now.format(DATE_FORMAT).to_string();
        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.insert(HeaderName::from_static(DATE_HEADER), header_value(&stamp)?);
        if let Some(token) = &self.security_token {
            headers.insert(
                HeaderName::from_static(SECURITY_TOKEN_HEADER),
                header_value(token)?,
            );
        }

        let mut signed = BTreeMap::new();
        for (name, value) in request.headers() {
            let value = value
                .to_str()
                .map_err(|err| ClientError::Auth(format!("unsignable header {name}: {err}")))?;
            signed.insert(name.as_str().to_ascii_lowercase(), value.trim().to_string());
        }
        signed.insert("host".to_string(), host_header(request.url()));

        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .unwrap_or_default();
        let canonical = canonical_request(request.method().as_str(), request.url(), &signed, body);
        let signature = self.signature(&stamp, &canonical)?;
        let names = signed.keys().cloned().collect::<Vec<_>>().join(";");
        let authorization = format!(
            "{ALGORITHM} Access={}, SignedHeaders={names}, Signature={signature}",
            self.access_key
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(())
    }

    fn signature(&self, stamp: &str, canonical: &str) -> Result<String, ClientError> {
        let string_to_sign = format!("{ALGORITHM}\n{stamp}\n{}", hex_sha256(canonical.as_bytes()));
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|err| ClientError::Auth(format!("invalid secret key: {err}")))?;
        mac.update(string_to_sign.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// canonical form hashed into the string to sign.
pub fn canonical_request(
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> String {
    let mut lines = vec![
        method.to_string(),
        canonical_uri(url),
        canonical_query(url),
    ];
    let block: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    lines.push(block);
    lines.push(headers.keys().cloned().collect::<Vec<_>>().join(";"));
    lines.push(hex_sha256(body));
    lines.join("\n")
}

fn canonical_uri(url: &Url) -> String {
    let mut uri = url
        .path()
        .split('/')
        .map(|segment| encode(&decode(segment)))
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (encode(&key), encode(&value)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(raw).map_err(|err| ClientError::Auth(format!("invalid header value: {err}")))
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// rfc 3986 encoding, unreserved characters kept.
fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_digit(bytes[index + 1]), hex_digit(bytes[index + 2])) {
                out.push(high << 4 | low);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}
