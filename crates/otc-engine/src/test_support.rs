//! shared fixtures for engine tests.

use crate::context::OpContext;
use httpmock::prelude::*;
use otc_client::{Config, ProviderOptions};
use otc_core::Operation;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// token configuration that never touches the network until a client is built.
pub(crate) fn offline_config() -> Arc<Config> {
    let options = ProviderOptions {
        token: Some("tok".to_string()),
        ..ProviderOptions::default()
    };
    Arc::new(Config::new(options).expect("token config"))
}

pub(crate) fn context(operation: Operation, timeout: Duration) -> OpContext {
    OpContext::new(
        offline_config(),
        &CancellationToken::new(),
        operation,
        "otc_test_v1",
        timeout,
    )
}

/// a mock cloud: identity answers token introspection for project `p-1`,
/// every service endpoint is overridden to the same server.
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
                "project": {"id": "p-1", "domain": {"id": "d-1"}}
            }}));
        });
        let endpoints: BTreeMap<String, String> = ["vpc", "network", "volumev2", "elbv2"]
            .iter()
            .map(|service| (service.to_string(), server.base_url()))
            .collect();
        let options = ProviderOptions {
            auth_url: server.url("/v3"),
            token: Some("tok".to_string()),
            endpoints,
            ..ProviderOptions::default()
        };
        let config = Arc::new(Config::new(options).expect("mock config"));
        Self { server, config }
    }
}
