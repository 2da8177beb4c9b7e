//! provider option sources: explicit maps, files and the environment.

use crate::error::ClientError;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_AUTH_URL: &str = "https://iam.eu-de.otc.t-systems.com/v3";
pub const DEFAULT_REGION: &str = "eu-de";
pub const DEFAULT_CLOUD: &str = "otc.t-systems.com";

/// option name -> environment variables probed for it, first match wins.
const ENV_BINDINGS: &[(&str, &[&str])] = &[
    ("auth_url", &["OS_AUTH_URL"]),
    ("region", &["OS_REGION_NAME", "OS_REGION"]),
    ("domain_name", &["OS_DOMAIN_NAME", "OS_USER_DOMAIN_NAME"]),
    ("domain_id", &["OS_DOMAIN_ID", "OS_USER_DOMAIN_ID"]),
    ("user_name", &["OS_USERNAME", "OS_USER_NAME"]),
    ("password", &["OS_PASSWORD"]),
    ("access_key", &["OS_ACCESS_KEY", "OS_ACCESS_KEY_ID"]),
    ("secret_key", &["OS_SECRET_KEY", "OS_SECRET_ACCESS_KEY"]),
    ("security_token", &["OS_SECURITY_TOKEN"]),
    ("token", &["OS_TOKEN", "OS_AUTH_TOKEN"]),
    ("tenant_name", &["OS_PROJECT_NAME", "OS_TENANT_NAME"]),
    ("project_id", &["OS_PROJECT_ID", "OS_TENANT_ID"]),
    ("insecure", &["OS_INSECURE"]),
    ("cacert_file", &["OS_CACERT"]),
    ("cert", &["OS_CERT"]),
    ("key", &["OS_KEY"]),
];

/// options whose environment value is a boolean flag.
const BOOL_OPTIONS: &[&str] = &["insecure"];

/// raw, layered provider options before they are typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSource {
    values: Map<String, Value>,
}

impl ConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// options handed over explicitly, e.g. by the host's configure call.
    pub fn from_map(values: Map<String, Value>) -> Self {
        let values = values
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        Self { values }
    }

    /// probe the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// probe an arbitrary variable lookup; empty values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut values = Map::new();
        for (option, names) in ENV_BINDINGS {
            let Some(raw) = names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|raw| !raw.is_empty())
            else {
                continue;
            };
            let value = if BOOL_OPTIONS.contains(option) {
                Value::Bool(matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            } else {
                Value::String(raw)
            };
            values.insert(option.to_string(), value);
        }
        Self { values }
    }

    /// load options from a yaml or json file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
        let raw: Value = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("parse json: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("parse yaml: {}", path.display()))?
        };
        match raw {
            Value::Object(values) => Ok(Self::from_map(values)),
            Value::Null => Ok(Self::default()),
            _ => Err(anyhow!("config {} must be a mapping", path.display())),
        }
    }

    /// layer `other` on top of this source; its values win.
    pub fn overlay(mut self, other: ConfigSource) -> Self {
        for (key, value) in other.values {
            self.values.insert(key, value);
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// type the layered values.
    pub fn options(&self) -> Result<ProviderOptions, ClientError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|err| ClientError::Config(err.to_string()))
    }
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_cloud() -> String {
    DEFAULT_CLOUD.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

/// typed provider options.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderOptions {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// dns suffix of the public endpoints.
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default, alias = "username")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// session token accompanying temporary ak/sk credentials.
    #[serde(default)]
    pub security_token: Option<String>,
    /// pre-issued iam token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "project_name")]
    pub tenant_name: Option<String>,
    #[serde(default, alias = "tenant_id")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub cacert_file: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// retries of a retryable failure within one operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// endpoint overrides keyed by catalog type.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            region: default_region(),
            cloud: default_cloud(),
            domain_name: None,
            domain_id: None,
            user_name: None,
            password: None,
            access_key: None,
            secret_key: None,
            security_token: None,
            token: None,
            tenant_name: None,
            project_id: None,
            insecure: false,
            cacert_file: None,
            cert: None,
            key: None,
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            endpoints: BTreeMap::new(),
        }
    }
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("auth_url", &self.auth_url)
            .field("region", &self.region)
            .field("cloud", &self.cloud)
            .field("domain_name", &self.domain_name)
            .field("domain_id", &self.domain_id)
            .field("user_name", &self.user_name)
            .field("password", &redacted(&self.password))
            .field("access_key", &self.access_key)
            .field("secret_key", &redacted(&self.secret_key))
            .field("security_token", &redacted(&self.security_token))
            .field("token", &redacted(&self.token))
            .field("tenant_name", &self.tenant_name)
            .field("project_id", &self.project_id)
            .field("insecure", &self.insecure)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl ProviderOptions {
    /// auth url without a trailing slash.
    pub fn identity_endpoint(&self) -> &str {
        self.auth_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn lookup_maps_env_names_to_options() {
        let source = ConfigSource::from_lookup(lookup(&[
            ("OS_REGION_NAME", "eu-nl"),
            ("OS_TENANT_NAME", "eu-nl_demo"),
            ("OS_INSECURE", "true"),
            ("OS_PASSWORD", ""),
        ]));
        let options = source.options().unwrap();
        assert_eq!(options.region, "eu-nl");
        assert_eq!(options.tenant_name.as_deref(), Some("eu-nl_demo"));
        assert!(options.insecure);
        assert!(options.password.is_none());
    }

    #[test]
    fn first_bound_variable_wins() {
        let source = ConfigSource::from_lookup(lookup(&[
            ("OS_PROJECT_NAME", "primary"),
            ("OS_TENANT_NAME", "fallback"),
        ]));
        assert_eq!(source.get("tenant_name"), Some(&json!("primary")));
    }

    #[test]
    fn overlay_prefers_explicit_values() {
        let env = ConfigSource::from_lookup(lookup(&[("OS_REGION_NAME", "eu-nl")]));
        let explicit = ConfigSource::from_map(
            json!({"region": "eu-de", "token": null})
                .as_object()
                .unwrap()
                .clone(),
        );
        let options = env.overlay(explicit).options().unwrap();
        assert_eq!(options.region, "eu-de");
        assert!(options.token.is_none());
    }

    #[test]
    fn defaults_apply_to_empty_source() {
        let options = ConfigSource::new().options().unwrap();
        assert_eq!(options, ProviderOptions::default());
        assert_eq!(options.identity_endpoint(), DEFAULT_AUTH_URL);
    }

    #[test]
    fn unknown_options_are_rejected() {
        let mut source = ConfigSource::new();
        source.set("regoin", "eu-de");
        let err = source.options().unwrap_err();
        assert!(err.to_string().contains("regoin"));
    }

    #[test]
    fn aliases_are_accepted() {
        let source = ConfigSource::from_map(
            json!({"project_name": "eu-de_x", "tenant_id": "p1", "username": "u"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let options = source.options().unwrap();
        assert_eq!(options.tenant_name.as_deref(), Some("eu-de_x"));
        assert_eq!(options.project_id.as_deref(), Some("p1"));
        assert_eq!(options.user_name.as_deref(), Some("u"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let options = ProviderOptions {
            password: Some("hunter2".to_string()),
            ..ProviderOptions::default()
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn load_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("provider.yaml");
        std::fs::write(
            &path,
            "region: eu-nl\naccess_key: AK\nsecret_key: SK\nendpoints:\n  vpc: http://localhost:9000\n",
        )
        .unwrap();
        let options = ConfigSource::from_file(&path).unwrap().options().unwrap();
        assert_eq!(options.region, "eu-nl");
        assert_eq!(options.endpoints["vpc"], "http://localhost:9000");
    }

    #[test]
    fn load_rejects_non_mapping_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("provider.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(ConfigSource::from_file(&path).is_err());
    }

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _guard = env_lock().lock().unwrap();
        let saved: Vec<(&str, Option<String>)> = ["OS_REGION_NAME", "OS_REGION", "OS_ACCESS_KEY"]
            .into_iter()
            .map(|name| (name, std::env::var(name).ok()))
            .collect();
        std::env::set_var("OS_REGION_NAME", "eu-ch2");
        std::env::remove_var("OS_REGION");
        std::env::set_var("OS_ACCESS_KEY", "AK");

        let source = ConfigSource::from_env();

        for (name, value) in saved {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
        assert_eq!(source.get("region"), Some(&json!("eu-ch2")));
        assert_eq!(source.get("access_key"), Some(&json!("AK")));
    }
}
