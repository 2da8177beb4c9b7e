//! authenticated http client bound to one service endpoint.

use crate::auth::{read_success, Authenticator};
use crate::error::{ApiError, ClientError};
use crate::services::ServiceType;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// client for one service in one region.
#[derive(Debug)]
pub struct ServiceClient {
    service: ServiceType,
    region: String,
    endpoint: Url,
    project_id: Option<String>,
    http: reqwest::Client,
    auth: Arc<Authenticator>,
}

impl ServiceClient {
    pub fn new(
        service: ServiceType,
        region: impl Into<String>,
        endpoint: Url,
        project_id: Option<String>,
        auth: Arc<Authenticator>,
    ) -> Self {
        Self {
            service,
            region: region.into(),
            endpoint,
            project_id,
            http: auth.http().clone(),
            auth,
        }
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// resolve a path relative to the service endpoint.
    pub fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|err| ClientError::init(self.service, format!("invalid path {path}: {err}")))
    }

    /// send a request, re-authenticating once on 401.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Json>,
    ) -> Result<String, ClientError> {
        let url = self.url(path)?;
        let mut reauthenticated = false;
        loop {
            let mut builder = self.http.request(method.clone(), url.clone());
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let mut request = builder
                .build()
                .map_err(|err| ApiError::from_transport(method.as_str(), url.as_str(), &err))?;
            let generation = self.auth.authorize(&mut request).await?;
            debug!(service = %self.service, %method, %url, "request");

            let response = self
                .http
                .execute(request)
                .await
                .map_err(|err| ApiError::from_transport(method.as_str(), url.as_str(), &err))?;
            if response.status() == StatusCode::UNAUTHORIZED && !reauthenticated {
                debug!(service = %self.service, generation, "unauthorized, re-authenticating");
                self.auth.reauthenticate(generation).await?;
                reauthenticated = true;
                continue;
            }
            return read_success(method.as_str(), url.as_str(), response).await;
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let body = self.send(Method::GET, path, None).await?;
        decode(path, &body)
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Json,
    ) -> Result<T, ClientError> {
        let text = self.send(Method::POST, path, Some(body)).await?;
        decode(path, &text)
    }

    pub async fn put_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Json,
    ) -> Result<T, ClientError> {
        let text = self.send(Method::PUT, path, Some(body)).await?;
        decode(path, &text)
    }

    /// post and ignore whatever body comes back.
    pub async fn post(&self, path: &str, body: &Json) -> Result<(), ClientError> {
        self.send(Method::POST, path, Some(body)).await.map(|_| ())
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.send(Method::DELETE, path, None).await.map(|_| ())
    }
}

/// decode a response body; an empty body decodes as json `null`.
fn decode<T: DeserializeOwned>(context: &str, body: &str) -> Result<T, ClientError> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|source| ClientError::Decode {
        context: context.to_string(),
        source,
    })
}
