//! mock cloud shared by the handler tests.

use httpmock::prelude::*;
use otc_client::{Config, ProviderOptions};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// identity answers token introspection for project `p-1` in domain `d-1`;
/// every service the handlers use is pointed at the same server.
pub(crate) struct MockCloud {
    pub server: MockServer,
    pub config: Arc<Config>,
}

impl MockCloud {
    pub fn start() -> Self {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v3/auth/tokens")
                .header("x-subject-token", "tok");
            then.status(200).json_body(json!({"token": {
                "expires_at": "2999-01-01T00:00:00Z",
                "project": {"id": "p-1", "name": "eu-de", "domain": {"id": "d-1"}}
            }}));
        });
        let endpoints = ["vpc", "network", "volumev2", "elbv2"]
            .iter()
            .map(|service| (service.to_string(), server.base_url()))
            .collect::<BTreeMap<_, _>>();
        let config = Config::new(ProviderOptions {
            auth_url: server.url("/v3"),
            token: Some("tok".to_string()),
            endpoints,
            ..ProviderOptions::default()
        })
        .expect("mock config");
        Self {
            server,
            config: Arc::new(config),
        }
    }
}
