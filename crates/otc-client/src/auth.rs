//! identity negotiation, request authorization and re-authentication.

use crate::catalog::{Catalog, CatalogEntry};
use crate::credentials::{Credentials, DomainRef};
use crate::error::{ApiError, ClientError};
use crate::signer::Signer;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";
pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const DOMAIN_ID_HEADER: &str = "x-domain-id";

/// tokens closer than this to their expiry are refreshed before use.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// what the negotiated session is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Project {
        id: Option<String>,
        name: Option<String>,
    },
    Domain,
}

impl Scope {
    pub fn is_project(&self) -> bool {
        matches!(self, Scope::Project { .. })
    }
}

/// result of one successful authentication.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub catalog: Catalog,
    pub project_id: Option<String>,
    pub domain_id: Option<String>,
    /// bumped on every re-authentication.
    pub generation: u64,
}

impl Session {
    fn expires_soon(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires_at| expires_at - now < ChronoDuration::minutes(REFRESH_MARGIN_MINUTES))
            .unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct TokenEnvelope {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
    project: Option<ProjectRef>,
    domain: Option<IdRef>,
    user: Option<UserRef>,
}

#[derive(Deserialize)]
struct ProjectRef {
    id: String,
    domain: Option<IdRef>,
}

#[derive(Deserialize)]
struct UserRef {
    domain: Option<IdRef>,
}

#[derive(Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

#[derive(Deserialize)]
struct ProjectEntry {
    id: String,
    #[serde(default)]
    domain_id: Option<String>,
}

/// authenticates one scope and authorizes requests made within it.
#[derive(Debug)]
pub struct Authenticator {
    http: reqwest::Client,
    identity_endpoint: String,
    credentials: Credentials,
    scope: Scope,
    domain_id: Option<String>,
    session: Mutex<Option<Arc<Session>>>,
}

impl Authenticator {
    pub fn new(
        http: reqwest::Client,
        identity_endpoint: impl Into<String>,
        credentials: Credentials,
        scope: Scope,
        domain_id: Option<String>,
    ) -> Self {
        Self {
            http,
            identity_endpoint: identity_endpoint.into().trim_end_matches('/').to_string(),
            credentials,
            scope,
            domain_id,
            session: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn identity_endpoint(&self) -> &str {
        &self.identity_endpoint
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// authenticator for another project in the same account.
    pub fn rescoped(&self, project_name: &str) -> Result<Self, ClientError> {
        if !self.credentials.can_rescope() {
            return Err(ClientError::init(
                project_name,
                "token credentials cannot be scoped to another project",
            ));
        }
        Ok(Self::new(
            self.http.clone(),
            self.identity_endpoint.clone(),
            self.credentials.clone(),
            Scope::Project {
                id: None,
                name: Some(project_name.to_string()),
            },
            self.domain_id.clone(),
        ))
    }

    /// current session, authenticating first if needed.
    pub async fn session(&self) -> Result<Arc<Session>, ClientError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            let refreshable = matches!(self.credentials, Credentials::Password { .. });
            if !(refreshable && session.expires_soon(Utc::now())) {
                return Ok(session.clone());
            }
            debug!("token close to expiry, refreshing");
        }
        let generation = guard.as_ref().map(|session| session.generation + 1).unwrap_or(0);
        let session = Arc::new(self.authenticate(generation).await?);
        *guard = Some(session.clone());
        Ok(session)
    }

    /// attach credentials to a request, returning the session generation used.
    pub async fn authorize(&self, request: &mut reqwest::Request) -> Result<u64, ClientError> {
        let session = self.session().await?;
        match &self.credentials {
            Credentials::AkSk {
                access_key,
                secret_key,
                security_token,
            } => {
                let headers = request.headers_mut();
                match (&self.scope, &session.project_id, &session.domain_id) {
                    (Scope::Project { .. }, Some(project_id), _) => {
                        headers.insert(HeaderName::from_static(PROJECT_ID_HEADER), header(project_id)?);
                    }
                    (Scope::Domain, _, Some(domain_id)) => {
                        headers.insert(HeaderName::from_static(DOMAIN_ID_HEADER), header(domain_id)?);
                    }
                    _ => {}
                }
                Signer::new(access_key.clone(), secret_key.clone(), security_token.clone())
                    .sign(request, Utc::now())?;
            }
            Credentials::Token { .. } | Credentials::Password { .. } => {
                let token = session
                    .token
                    .as_deref()
                    .ok_or_else(|| ClientError::Auth("session carries no token".to_string()))?;
                request
                    .headers_mut()
                    .insert(HeaderName::from_static(AUTH_TOKEN_HEADER), header(token)?);
            }
        }
        Ok(session.generation)
    }

    /// renew the session after a 401 seen with `stale_generation`.
    ///
    /// concurrent callers holding the same stale generation renew only once.
    pub async fn reauthenticate(&self, stale_generation: u64) -> Result<(), ClientError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.generation != stale_generation {
                return Ok(());
            }
        }
        let generation = stale_generation + 1;
        let session = match (&self.credentials, guard.as_ref()) {
            (Credentials::Token { .. }, _) => {
                return Err(ClientError::Auth(
                    "token was rejected and cannot be refreshed".to_string(),
                ))
            }
            (Credentials::AkSk { .. }, Some(current)) => Session {
                generation,
                ..Session::clone(current)
            },
            _ => self.authenticate(generation).await?,
        };
        info!(credentials = self.credentials.label(), generation, "re-authenticated");
        *guard = Some(Arc::new(session));
        Ok(())
    }

    async fn authenticate(&self, generation: u64) -> Result<Session, ClientError> {
        let session = match &self.credentials {
            Credentials::Token { token } => self.introspect(token).await?,
            Credentials::Password {
                user_name,
                password,
                domain,
            } => self.password_grant(user_name, password, domain).await?,
            Credentials::AkSk { .. } => self.resolve_aksk_scope().await?,
        };
        debug!(
            credentials = self.credentials.label(),
            project_id = session.project_id.as_deref().unwrap_or(""),
            "authenticated"
        );
        Ok(Session {
            generation,
            ..session
        })
    }

    async fn introspect(&self, token: &str) -> Result<Session, ClientError> {
        let url = format!("{}/auth/tokens", self.identity_endpoint);
        let response = self
            .http
            .get(&url)
            .header(AUTH_TOKEN_HEADER, token)
            .header(SUBJECT_TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|err| ApiError::from_transport("GET", &url, &err))?;
        let body = read_success("GET", &url, response).await?;
        self.session_from_body(Some(token.to_string()), &body)
    }

    async fn password_grant(
        &self,
        user_name: &str,
        password: &str,
        domain: &DomainRef,
    ) -> Result<Session, ClientError> {
        let url = format!("{}/auth/tokens", self.identity_endpoint);
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": user_name,
                            "password": password,
                            "domain": domain_json(domain),
                        }
                    }
                },
                "scope": self.scope_json(domain),
            }
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| ApiError::from_transport("POST", &url, &err))?;
        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = read_success("POST", &url, response).await?;
        let token = token.ok_or_else(|| {
            ClientError::Auth("identity response carries no X-Subject-Token".to_string())
        })?;
        self.session_from_body(Some(token), &body)
    }

    fn scope_json(&self, domain: &DomainRef) -> Json {
        match &self.scope {
            Scope::Project { id: Some(id), .. } => json!({"project": {"id": id}}),
            Scope::Project {
                name: Some(name), ..
            } => json!({"project": {"name": name, "domain": domain_json(domain)}}),
            _ => json!({"domain": domain_json(domain)}),
        }
    }

    fn session_from_body(&self, token: Option<String>, body: &str) -> Result<Session, ClientError> {
        let envelope: TokenEnvelope =
            serde_json::from_str(body).map_err(|source| ClientError::Decode {
                context: "identity token".to_string(),
                source,
            })?;
        let token_body = envelope.token;
        let domain_id = self
            .domain_id
            .clone()
            .or_else(|| token_body.domain.map(|domain| domain.id))
            .or_else(|| {
                token_body
                    .project
                    .as_ref()
                    .and_then(|project| project.domain.as_ref())
                    .map(|domain| domain.id.clone())
            })
            .or_else(|| token_body.user.and_then(|user| user.domain).map(|domain| domain.id));
        Ok(Session {
            token,
            expires_at: token_body.expires_at,
            catalog: Catalog::new(token_body.catalog),
            project_id: token_body.project.map(|project| project.id),
            domain_id,
            generation: 0,
        })
    }

    /// ak/sk sessions carry no token; only the project id must be known.
    async fn resolve_aksk_scope(&self) -> Result<Session, ClientError> {
        let mut session = Session {
            domain_id: self.domain_id.clone(),
            ..Session::default()
        };
        match &self.scope {
            Scope::Project { id: Some(id), .. } => session.project_id = Some(id.clone()),
            Scope::Project {
                name: Some(name), ..
            } => {
                let project = self.lookup_project(name).await?;
                session.project_id = Some(project.id);
                if session.domain_id.is_none() {
                    session.domain_id = project.domain_id;
                }
            }
            _ => {}
        }
        Ok(session)
    }

    async fn lookup_project(&self, name: &str) -> Result<ProjectEntry, ClientError> {
        let Credentials::AkSk {
            access_key,
            secret_key,
            security_token,
        } = &self.credentials
        else {
            return Err(ClientError::Auth("project lookup requires ak/sk".to_string()));
        };
        let mut url = reqwest::Url::parse(&format!("{}/projects", self.identity_endpoint))
            .map_err(|err| ClientError::Config(format!("invalid auth_url: {err}")))?;
        url.query_pairs_mut().append_pair("name", name);
        let url_text = url.to_string();
        let mut request = reqwest::Request::new(reqwest::Method::GET, url);
        Signer::new(access_key.clone(), secret_key.clone(), security_token.clone())
            .sign(&mut request, Utc::now())?;
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| ApiError::from_transport("GET", &url_text, &err))?;
        let body = read_success("GET", &url_text, response).await?;
        let list: ProjectList = serde_json::from_str(&body).map_err(|source| ClientError::Decode {
            context: "project list".to_string(),
            source,
        })?;
        list.projects.into_iter().next().ok_or_else(|| {
            ClientError::Auth(format!("project {name:?} is not visible to these credentials"))
        })
    }
}

fn domain_json(domain: &DomainRef) -> Json {
    match domain {
        DomainRef::Id(id) => json!({"id": id}),
        DomainRef::Name(name) => json!({"name": name}),
    }
}

fn header(raw: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(raw).map_err(|err| ClientError::Auth(format!("invalid header value: {err}")))
}

/// body of a successful response or the classified error.
pub(crate) async fn read_success(
    method: &str,
    url: &str,
    response: reqwest::Response,
) -> Result<String, ClientError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ApiError::from_transport(method, url, &err))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ApiError::from_response(method, url, status.as_u16(), &body).into())
    }
}
