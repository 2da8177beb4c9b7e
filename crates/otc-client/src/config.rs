//! resolved provider configuration and the service client cache.

use crate::auth::{Authenticator, Scope};
use crate::client::ServiceClient;
use crate::credentials::Credentials;
use crate::error::ClientError;
use crate::services::{resolve_endpoint, EndpointContext, ServiceScope, ServiceType};
use crate::source::{ConfigSource, ProviderOptions};
use otc_core::{AttrMap, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// attribute resources use to pick a non-default region.
pub const REGION_ATTRIBUTE: &str = "region";

#[derive(Deserialize)]
struct DomainList {
    #[serde(default)]
    domains: Vec<DomainEntry>,
}

#[derive(Deserialize)]
struct DomainEntry {
    id: String,
    #[serde(default)]
    name: String,
}

/// credentials, scoping and the clients built from them.
#[derive(Debug)]
pub struct Config {
    options: ProviderOptions,
    credentials: Credentials,
    http: reqwest::Client,
    auth: Arc<Authenticator>,
    domain_auth: OnceCell<Arc<Authenticator>>,
    regional: Mutex<HashMap<String, Arc<Authenticator>>>,
    clients: Mutex<HashMap<(ServiceType, String), Arc<ServiceClient>>>,
    domain_id: OnceCell<String>,
}

impl Config {
    /// select credentials and build the shared http client; no network yet.
    pub fn new(options: ProviderOptions) -> Result<Self, ClientError> {
        let credentials = Credentials::select(&options)?;
        let http = build_http(&options)?;
        let scope = Scope::Project {
            id: options.project_id.clone().filter(|id| !id.is_empty()),
            name: Some(
                options
                    .tenant_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| options.region.clone()),
            ),
        };
        let auth = Arc::new(Authenticator::new(
            http.clone(),
            options.identity_endpoint(),
            credentials.clone(),
            scope,
            options.domain_id.clone(),
        ));
        debug!(credentials = credentials.label(), region = %options.region, "provider configured");
        Ok(Self {
            options,
            credentials,
            http,
            auth,
            domain_auth: OnceCell::new(),
            regional: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            domain_id: OnceCell::new(),
        })
    }

    pub fn from_source(source: &ConfigSource) -> Result<Self, ClientError> {
        Self::new(source.options()?)
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn default_region(&self) -> &str {
        &self.options.region
    }

    /// run the initial authentication now instead of on first use.
    pub async fn authenticate(&self) -> Result<(), ClientError> {
        self.auth.session().await.map(|_| ())
    }

    /// region declared on a resource, falling back to the provider region.
    pub fn region_of(&self, attrs: &AttrMap) -> String {
        attrs
            .get(REGION_ATTRIBUTE)
            .and_then(Value::as_str)
            .filter(|region| !region.is_empty())
            .unwrap_or(&self.options.region)
            .to_string()
    }

    /// cached client for `service` in `region`, built on first use.
    pub async fn client_for(
        &self,
        service: ServiceType,
        region: &str,
    ) -> Result<Arc<ServiceClient>, ClientError> {
        let key = (service, region.to_string());
        let cached = lock(&self.clients).get(&key).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let auth = self.authenticator_for(service, region).await?;
        let session = auth.session().await?;
        let endpoint = resolve_endpoint(
            service,
            &EndpointContext {
                overrides: &self.options.endpoints,
                catalog: &session.catalog,
                region,
                cloud: &self.options.cloud,
                project_id: session.project_id.as_deref(),
                identity_endpoint: self.options.identity_endpoint(),
            },
        )?;
        debug!(%service, region, %endpoint, "service client built");
        let client = Arc::new(ServiceClient::new(
            service,
            region,
            endpoint,
            session.project_id.clone(),
            auth,
        ));
        let mut clients = lock(&self.clients);
        Ok(clients.entry(key).or_insert(client).clone())
    }

    /// project id used for project scoped calls in `region`.
    pub async fn project_id_for(&self, region: &str) -> Result<String, ClientError> {
        let auth = self.authenticator_for(ServiceType::NetworkV1, region).await?;
        auth.session()
            .await?
            .project_id
            .clone()
            .ok_or_else(|| ClientError::init(region, "no project is resolved for this region"))
    }

    /// domain id, looked up through the identity service when only a name is known.
    pub async fn domain_id(&self) -> Result<String, ClientError> {
        self.domain_id
            .get_or_try_init(|| self.lookup_domain_id())
            .await
            .cloned()
    }

    async fn lookup_domain_id(&self) -> Result<String, ClientError> {
        if let Some(id) = self.options.domain_id.clone().filter(|id| !id.is_empty()) {
            return Ok(id);
        }
        if let Some(id) = self.domain_authenticator().await.session().await?.domain_id.clone() {
            return Ok(id);
        }
        let identity = self
            .client_for(ServiceType::IdentityV3, &self.options.region)
            .await?;
        let list: DomainList = identity.get_json("auth/domains").await?;
        let wanted = self.options.domain_name.as_deref();
        list.domains
            .into_iter()
            .find(|domain| wanted.map_or(true, |name| domain.name == name))
            .map(|domain| domain.id)
            .ok_or_else(|| ClientError::Auth("domain is not visible to these credentials".to_string()))
    }

    async fn authenticator_for(
        &self,
        service: ServiceType,
        region: &str,
    ) -> Result<Arc<Authenticator>, ClientError> {
        match service.spec().scope {
            ServiceScope::Domain => Ok(self.domain_authenticator().await),
            ServiceScope::Project if region == self.options.region => Ok(self.auth.clone()),
            ServiceScope::Project => self.regional_authenticator(service, region),
        }
    }

    async fn domain_authenticator(&self) -> Arc<Authenticator> {
        if !self.credentials.can_rescope() {
            // the token's own scope is the only one available
            return self.auth.clone();
        }
        self
            .domain_auth
            .get_or_init(|| async {
                Arc::new(Authenticator::new(
                    self.http.clone(),
                    self.options.identity_endpoint(),
                    self.credentials.clone(),
                    Scope::Domain,
                    self.options.domain_id.clone(),
                ))
            })
            .await
            .clone()
    }

    fn regional_authenticator(
        &self,
        service: ServiceType,
        region: &str,
    ) -> Result<Arc<Authenticator>, ClientError> {
        if !self.credentials.can_rescope() {
            return Err(ClientError::init(
                service,
                format!("token credentials cannot be scoped to region {region}"),
            ));
        }
        let mut regional = lock(&self.regional);
        if let Some(auth) = regional.get(region) {
            return Ok(auth.clone());
        }
        let auth = Arc::new(self.auth.rescoped(region)?);
        regional.insert(region.to_string(), auth.clone());
        Ok(auth)
    }
}

macro_rules! service_constructors {
    ($($name:ident => $service:ident),* $(,)?) => {
        impl Config {
            $(
                #[doc = concat!("client for [`ServiceType::", stringify!($service), "`].")]
                pub async fn $name(&self, region: &str) -> Result<Arc<ServiceClient>, ClientError> {
                    self.client_for(ServiceType::$service, region).await
                }
            )*
        }
    };
}

service_constructors! {
    identity_v3_client => IdentityV3,
    identity_v30_client => IdentityV30,
    compute_v2_client => ComputeV2,
    compute_v1_client => ComputeV1,
    network_v1_client => NetworkV1,
    network_v2_client => NetworkV2,
    blockstorage_v2_client => BlockStorageV2,
    blockstorage_v3_client => BlockStorageV3,
    elb_v1_client => ElbV1,
    elb_v2_client => ElbV2,
    elb_v3_client => ElbV3,
    cce_v3_client => CceV3,
    cbr_v3_client => CbrV3,
    sfs_v2_client => SfsV2,
    sfs_turbo_v1_client => SfsTurboV1,
    autoscaling_v1_client => AutoscalingV1,
    autoscaling_v2_client => AutoscalingV2,
    vpcep_v1_client => VpcEpV1,
    smn_v2_client => SmnV2,
    dns_v2_client => DnsV2,
    image_v2_client => ImageV2,
    kms_v1_client => KmsV1,
    rds_v3_client => RdsV3,
    dcs_v1_client => DcsV1,
    dms_v1_client => DmsV1,
    nat_v2_client => NatV2,
    cts_v1_client => CtsV1,
    ces_v1_client => CesV1,
    dds_v3_client => DdsV3,
    waf_v1_client => WafV1,
    swr_v2_client => SwrV2,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn build_http(options: &ProviderOptions) -> Result<reqwest::Client, ClientError> {
    let init = |reason: String| ClientError::init("http", reason);
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(options.request_timeout))
        .danger_accept_invalid_certs(options.insecure);
    if let Some(path) = options.cacert_file.as_deref().filter(|path| !path.is_empty()) {
        let pem = fs::read(path).map_err(|err| init(format!("read {path}: {err}")))?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|err| init(format!("parse {path}: {err}")))?;
        builder = builder.add_root_certificate(cert);
    }
    if let (Some(cert), Some(key)) = (options.cert.as_deref(), options.key.as_deref()) {
        let cert = fs::read(cert).map_err(|err| init(format!("read {cert}: {err}")))?;
        let key = fs::read(key).map_err(|err| init(format!("read {key}: {err}")))?;
        let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
            .map_err(|err| init(format!("client certificate: {err}")))?;
        builder = builder.identity(identity);
    }
    builder.build().map_err(|err| init(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use otc_core::ErrorKind;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn password_options(server: &MockServer) -> ProviderOptions {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("vpc".to_string(), server.base_url());
        ProviderOptions {
            auth_url: server.url("/v3"),
            user_name: Some("user".to_string()),
            password: Some("secret".to_string()),
            domain_name: Some("dom".to_string()),
            endpoints,
            ..ProviderOptions::default()
        }
    }

    fn token_response(project: &str) -> serde_json::Value {
        json!({"token": {
            "expires_at": "2999-01-01T00:00:00Z",
            "project": {"id": project, "domain": {"id": "d1"}}
        }})
    }

    #[tokio::test]
    async fn clients_are_cached_per_service_and_region() {
        let server = MockServer::start();
        let grant = server.mock(|when, then| {
            when.method(POST).path("/v3/auth/tokens");
            then.status(201)
                .header("X-Subject-Token", "tok")
                .json_body(token_response("p-de"));
        });
        let config = Config::new(password_options(&server)).unwrap();
        let first = config.network_v1_client("eu-de").await.unwrap();
        let second = config.client_for(ServiceType::NetworkV1, "eu-de").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.endpoint().as_str(), format!("{}/v1/p-de/", server.base_url()));
        grant.assert_hits(1);
    }

    #[tokio::test]
    async fn other_regions_get_their_own_project() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v3/auth/tokens")
                .json_body_partial(r#"{"auth":{"scope":{"project":{"name":"eu-de"}}}}"#);
            then.status(201)
                .header("X-Subject-Token", "tok-de")
                .json_body(token_response("p-de"));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/v3/auth/tokens")
                .json_body_partial(r#"{"auth":{"scope":{"project":{"name":"eu-nl"}}}}"#);
            then.status(201)
                .header("X-Subject-Token", "tok-nl")
                .json_body(token_response("p-nl"));
        });
        let config = Config::new(password_options(&server)).unwrap();
        assert_eq!(config.project_id_for("eu-de").await.unwrap(), "p-de");
        assert_eq!(config.project_id_for("eu-nl").await.unwrap(), "p-nl");
        let nl = config.network_v1_client("eu-nl").await.unwrap();
        assert_eq!(nl.project_id(), Some("p-nl"));
    }

    #[tokio::test]
    async fn token_credentials_cannot_leave_their_region() {
        let options = ProviderOptions {
            token: Some("tok".to_string()),
            ..ProviderOptions::default()
        };
        let config = Config::new(options).unwrap();
        let err = config.network_v1_client("eu-nl").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientInitFailed);
    }

    #[tokio::test]
    async fn failed_authentication_surfaces_auth_failed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v3/auth/tokens");
            then.status(401).json_body(json!({"error": {"code": 401, "message": "bad password"}}));
        });
        let config = Config::new(password_options(&server)).unwrap();
        let err = config.network_v1_client("eu-de").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let err = Config::new(ProviderOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn region_of_prefers_resource_attribute() {
        let options = ProviderOptions {
            token: Some("tok".to_string()),
            ..ProviderOptions::default()
        };
        let config = Config::new(options).unwrap();
        let mut attrs = AttrMap::new();
        assert_eq!(config.region_of(&attrs), "eu-de");
        attrs.insert(REGION_ATTRIBUTE.to_string(), Value::from("eu-nl"));
        assert_eq!(config.region_of(&attrs), "eu-nl");
    }

    #[tokio::test]
    async fn domain_id_comes_from_options_or_token() {
        let server = MockServer::start();
        let grant = server.mock(|when, then| {
            when.method(POST)
                .path("/v3/auth/tokens")
                .json_body_partial(r#"{"auth":{"scope":{"domain":{"name":"dom"}}}}"#);
            then.status(201)
                .header("X-Subject-Token", "tok")
                .json_body(json!({"token": {"expires_at": "2999-01-01T00:00:00Z", "domain": {"id": "d-42"}}}));
        });
        let config = Config::new(password_options(&server)).unwrap();
        assert_eq!(config.domain_id().await.unwrap(), "d-42");
        assert_eq!(config.domain_id().await.unwrap(), "d-42");
        grant.assert_hits(1);

        let preset = Config::new(ProviderOptions {
            domain_id: Some("d-1".to_string()),
            ..password_options(&server)
        })
        .unwrap();
        assert_eq!(preset.domain_id().await.unwrap(), "d-1");
    }
}
