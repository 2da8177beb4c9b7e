//! per-operation context handed to resource callbacks.

use crate::error::ProviderError;
use otc_client::{Config, ServiceClient, ServiceType};
use otc_core::Operation;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// typed key of a client cached on the context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub service: ServiceType,
    pub region: String,
}

/// cancellation, deadline, config and cached clients of one operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    config: Arc<Config>,
    cancel: CancellationToken,
    deadline: Instant,
    operation: Operation,
    resource_type: String,
    op_id: Uuid,
    clients: Arc<Mutex<HashMap<ClientKey, Arc<ServiceClient>>>>,
}

impl OpContext {
    /// context whose cancellation is a child of `parent` and whose deadline is `timeout` away.
    pub fn new(
        config: Arc<Config>,
        parent: &CancellationToken,
        operation: Operation,
        resource_type: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            cancel: parent.child_token(),
            deadline: Instant::now() + timeout,
            operation,
            resource_type: resource_type.into(),
            op_id: Uuid::new_v4(),
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// same operation lineage and clients, judged as `operation` with a fresh budget.
    pub fn for_operation(&self, operation: Operation, timeout: Duration) -> Self {
        Self {
            operation,
            deadline: Instant::now() + timeout,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn op_id(&self) -> Uuid {
        self.op_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// budget left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// fail fast when cancelled or past the deadline.
    pub fn check(&self) -> Result<(), ProviderError> {
        self.check_cancelled()?;
        if Instant::now() >= self.deadline {
            return Err(self.deadline_exceeded());
        }
        Ok(())
    }

    /// fail when the host stopped the operation, ignoring the deadline.
    pub fn check_cancelled(&self) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            return Err(self.stopped());
        }
        Ok(())
    }

    /// sleep unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProviderError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.stopped()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// drive `future` until it completes, the context is cancelled or the deadline passes.
    ///
    /// an abandoned future is dropped, which aborts its in-flight request.
    pub async fn run<T, F>(&self, future: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            result = future => result,
            _ = self.cancel.cancelled() => Err(self.stopped()),
            _ = tokio::time::sleep_until(self.deadline) => Err(self.deadline_exceeded()),
        }
    }

    /// client for `service` in `region`, reused across callbacks of this operation.
    pub async fn client(
        &self,
        service: ServiceType,
        region: &str,
    ) -> Result<Arc<ServiceClient>, ProviderError> {
        let key = ClientKey {
            service,
            region: region.to_string(),
        };
        let cached = self.lock_clients().get(&key).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.run(async {
            self.config
                .client_for(service, region)
                .await
                .map_err(ProviderError::from)
        })
        .await?;
        self.lock_clients().insert(key, client.clone());
        Ok(client)
    }

    /// client for `service` in the region the attributes select.
    pub async fn client_for_attrs(
        &self,
        service: ServiceType,
        attrs: &otc_core::AttrMap,
    ) -> Result<Arc<ServiceClient>, ProviderError> {
        let region = self.config.region_of(attrs);
        self.client(service, &region).await
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, HashMap<ClientKey, Arc<ServiceClient>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopped(&self) -> ProviderError {
        ProviderError::Cancelled(format!(
            "{} {} was stopped",
            self.operation, self.resource_type
        ))
    }

    fn deadline_exceeded(&self) -> ProviderError {
        ProviderError::Cancelled(format!(
            "{} {} exceeded its deadline",
            self.operation, self.resource_type
        ))
    }
}
