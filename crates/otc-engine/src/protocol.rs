//! json-lines plugin surface over stdio.
//!
//! every input line is `{"id": .., "method": "..", "params": {..}}` and is
//! answered by one `{"id": .., "result": ..}` or `{"id": .., "error": ..}`
//! line. requests run concurrently, so answers may come out of order.

use crate::error::{OperationError, ProviderError};
use crate::provider::Provider;
use otc_core::{AttrMap, ErrorKind, ResourceState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Json,
    method: String,
    #[serde(default)]
    params: Json,
}

/// error payload of a response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ProviderError> for ErrorBody {
    fn from(err: &ProviderError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<&OperationError> for ErrorBody {
    fn from(err: &OperationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigureParams {
    #[serde(default)]
    config: Map<String, Json>,
}

#[derive(Deserialize)]
struct ValidateParams {
    type_name: String,
    #[serde(default)]
    config: AttrMap,
}

#[derive(Deserialize)]
struct PlanParams {
    type_name: String,
    #[serde(default)]
    prior_state: Option<ResourceState>,
    #[serde(default)]
    config: Option<AttrMap>,
}

#[derive(Deserialize)]
struct ApplyParams {
    type_name: String,
    #[serde(default)]
    prior_state: Option<ResourceState>,
    #[serde(default)]
    planned_state: Option<AttrMap>,
}

#[derive(Deserialize)]
struct ReadParams {
    type_name: String,
    current_state: ResourceState,
}

#[derive(Deserialize)]
struct ImportParams {
    type_name: String,
    id: String,
}

fn decode_params<T: DeserializeOwned>(raw: Json) -> Result<T, ProviderError> {
    let raw = if raw.is_null() { json!({}) } else { raw };
    serde_json::from_value(raw)
        .map_err(|err| ProviderError::Validation(format!("invalid params: {err}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<Json, ProviderError> {
    serde_json::to_value(value)
        .map_err(|err| ProviderError::Validation(format!("cannot encode response: {err}")))
}

/// run one request against the provider.
async fn call(provider: &Provider, method: &str, raw: Json) -> Result<Json, ProviderError> {
    match method {
        "GetProviderSchema" => to_json(&provider.schema()),
        "ConfigureProvider" => {
            let params: ConfigureParams = decode_params(raw)?;
            provider.configure(params.config).await?;
            Ok(json!({}))
        }
        "ValidateResourceConfig" => {
            let params: ValidateParams = decode_params(raw)?;
            provider.validate_resource(&params.type_name, &params.config)?;
            Ok(json!({}))
        }
        "ValidateDataSourceConfig" => {
            let params: ValidateParams = decode_params(raw)?;
            provider.validate_data_source(&params.type_name, &params.config)?;
            Ok(json!({}))
        }
        "PlanResourceChange" => {
            let params: PlanParams = decode_params(raw)?;
            let change = provider.plan(
                &params.type_name,
                params.prior_state.as_ref(),
                params.config.as_ref(),
            )?;
            to_json(&change)
        }
        "ApplyResourceChange" => {
            let params: ApplyParams = decode_params(raw)?;
            let outcome = provider
                .apply(&params.type_name, params.prior_state.as_ref(), params.planned_state)
                .await?;
            Ok(json!({
                "new_state": to_json(&outcome.state)?,
                "error": outcome.error.as_ref().map(ErrorBody::from),
            }))
        }
        "ReadResource" => {
            let params: ReadParams = decode_params(raw)?;
            let state = provider.read(&params.type_name, &params.current_state).await?;
            Ok(json!({ "new_state": to_json(&state)? }))
        }
        "ImportResourceState" => {
            let params: ImportParams = decode_params(raw)?;
            let state = provider.import(&params.type_name, &params.id).await?;
            Ok(json!({ "imported": [to_json(&state)?] }))
        }
        "ReadDataSource" => {
            let params: ValidateParams = decode_params(raw)?;
            let state = provider
                .read_data_source(&params.type_name, params.config)
                .await?;
            Ok(json!({ "state": to_json(&state)? }))
        }
        "StopProvider" => {
            provider.stop();
            Ok(json!({}))
        }
        other => Err(ProviderError::UnknownType {
            category: "method",
            name: other.to_string(),
        }),
    }
}

/// answer one input line.
pub async fn handle_line(provider: &Provider, line: &str) -> Json {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "unparseable request");
            let err = ProviderError::Validation(format!("invalid request: {err}"));
            return json!({ "id": Json::Null, "error": ErrorBody::from(&err) });
        }
    };
    debug!(id = %request.id, method = %request.method, "request");
    match call(provider, &request.method, request.params).await {
        Ok(result) => json!({ "id": request.id, "result": result }),
        Err(err) => {
            debug!(id = %request.id, method = %request.method, error = %err, "request failed");
            json!({ "id": request.id, "error": ErrorBody::from(&err) })
        }
    }
}

/// serve requests from `input` until it closes, writing responses to `output`.
pub async fn serve<R, W>(provider: Arc<Provider>, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Json>();
    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = response.to_string();
            line.push('\n');
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
        }
        output.shutdown().await
    });

    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let provider = provider.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let response = handle_line(&provider, &line).await;
            if tx.send(response).is_err() {
                warn!("response writer is gone");
            }
        });
    }
    while tasks.join_next().await.is_some() {}
    drop(tx);
    writer
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}
