//! drive resource callbacks through their lifecycle.
//!
//! the dispatcher owns retries, deadlines, soft-delete and the read that
//! follows every create and update. handlers only talk to the remote side.

use crate::context::OpContext;
use crate::data::ResourceData;
use crate::error::{OperationError, ProviderError};
use crate::resource::{DataSource, Resource};
use crate::retry::{RetryPolicy, Step};
use otc_client::{ApiError, Config};
use otc_core::{AttrMap, Operation, ResourceSchema, ResourceState, Timeouts};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// result of an apply: the state to persist, and the error if something failed.
///
/// both can be set, e.g. a create that got an id but never became ready.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub state: Option<ResourceState>,
    pub error: Option<OperationError>,
}

impl ApplyOutcome {
    fn ok(state: Option<ResourceState>) -> Self {
        Self { state, error: None }
    }

    fn failed(state: Option<ResourceState>, error: OperationError) -> Self {
        Self {
            state,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// the new state, or the error when there is one.
    pub fn into_result(self) -> Result<Option<ResourceState>, OperationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.state),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Callback {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

/// lifecycle driver shared by every resource type.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    root: CancellationToken,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// dispatcher whose operations are children of `root`.
    pub fn new(config: Arc<Config>, root: CancellationToken) -> Self {
        let policy = RetryPolicy::default().with_max_attempts(config.options().max_retries);
        Self {
            config,
            root,
            policy,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn context(&self, operation: Operation, type_name: &str, timeout: Duration) -> OpContext {
        OpContext::new(self.config.clone(), &self.root, operation, type_name, timeout)
    }

    /// apply a planned change: create, update or delete depending on what exists.
    pub async fn apply(
        &self,
        resource: &dyn Resource,
        prior: Option<&ResourceState>,
        planned: Option<AttrMap>,
    ) -> ApplyOutcome {
        let prior = prior.filter(|state| state.exists());
        match (prior, planned) {
            (None, None) => ApplyOutcome::ok(None),
            (Some(prior), None) => match self.delete(resource, prior).await {
                Ok(()) => ApplyOutcome::ok(None),
                Err(error) => ApplyOutcome::failed(Some(prior.clone()), error),
            },
            (None, Some(planned)) => self.create(resource, planned).await,
            (Some(prior), Some(planned)) => self.update(resource, prior, planned).await,
        }
    }

    pub async fn create(&self, resource: &dyn Resource, planned: AttrMap) -> ApplyOutcome {
        let schema = resource.schema();
        let type_name = resource.type_name();
        let timeouts = match timeouts_for(&schema, &planned) {
            Ok(timeouts) => timeouts,
            Err(err) => {
                return ApplyOutcome::failed(
                    None,
                    OperationError::new(Operation::Create, type_name, None, err),
                )
            }
        };
        let ctx = self.context(Operation::Create, type_name, timeouts.create);
        let mut data = ResourceData::for_create(planned.clone());

        let created = self
            .drive(resource, Callback::Create, &ctx, &mut data, |result, data| {
                match result {
                    Err(err) if data.id().is_empty() && err.is_retryable(Operation::Create) => {
                        Step::Retry(err)
                    }
                    Err(err) => Step::Fail(err),
                    Ok(()) if data.id().is_empty() => {
                        Step::Fail(ProviderError::MissingId(Operation::Create))
                    }
                    Ok(()) => Step::Done(()),
                }
            })
            .await;
        if let Err(err) = created {
            return self.partial_create(&schema, type_name, data, err);
        }
        info!(op_id = %ctx.op_id(), type_name, id = data.id(), "created");

        let read = ctx.for_operation(Operation::Read, ctx.remaining());
        if let Err(err) = self.read_after_create(resource, &read, &mut data).await {
            return self.partial_create(&schema, type_name, data, err);
        }
        restore_write_only(&schema, &mut data, &planned);
        ApplyOutcome::ok(Some(data.to_state(schema.version)))
    }

    /// state for a create that failed; tainted when the remote object exists.
    fn partial_create(
        &self,
        schema: &ResourceSchema,
        type_name: &str,
        data: ResourceData,
        err: ProviderError,
    ) -> ApplyOutcome {
        let id = data.id().to_string();
        let error = OperationError::new(Operation::Create, type_name, Some(&id), err);
        if id.is_empty() {
            return ApplyOutcome::failed(None, error);
        }
        warn!(type_name, id = %id, error = %error, "create failed after the object exists, marking tainted");
        let mut state = data.to_state(schema.version);
        state.tainted = true;
        ApplyOutcome::failed(Some(state), error)
    }

    /// read right after create; some services answer 404 for a freshly created object.
    async fn read_after_create(
        &self,
        resource: &dyn Resource,
        ctx: &OpContext,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        let saved = data.id().to_string();
        let what = format!("{} {saved}", resource.type_name());
        let mut checks = 0;
        self.drive(resource, Callback::Read, ctx, data, |result, data| {
            match result {
                Ok(()) if !data.id().is_empty() => Step::Done(()),
                Ok(()) => {
                    checks += 1;
                    data.set_id(saved.clone());
                    Step::Retry(ProviderError::Vanished {
                        what: what.clone(),
                        checks,
                    })
                }
                Err(err) if err.is_not_found() || err.is_retryable(Operation::Read) => {
                    data.set_id(saved.clone());
                    Step::Retry(err)
                }
                Err(err) => Step::Fail(err),
            }
        })
        .await
    }

    pub async fn update(
        &self,
        resource: &dyn Resource,
        prior: &ResourceState,
        planned: AttrMap,
    ) -> ApplyOutcome {
        let schema = resource.schema();
        let type_name = resource.type_name();
        let fail = |err: ProviderError| {
            OperationError::new(Operation::Update, type_name, Some(&prior.id), err)
        };
        let timeouts = match timeouts_for(&schema, &planned) {
            Ok(timeouts) => timeouts,
            Err(err) => return ApplyOutcome::failed(Some(prior.clone()), fail(err)),
        };
        let ctx = self.context(Operation::Update, type_name, timeouts.update);
        let mut data = ResourceData::for_update(prior, planned.clone());

        let updated = self
            .drive(resource, Callback::Update, &ctx, &mut data, |result, _| {
                Step::from_result(&ctx, result)
            })
            .await;
        if let Err(err) = updated {
            let refreshed = self.refresh_after_failure(resource, &ctx, prior, timeouts.read).await;
            return ApplyOutcome::failed(refreshed, fail(err));
        }

        let read = ctx.for_operation(Operation::Read, timeouts.read);
        match self.read_with_retry(resource, &read, &mut data).await {
            Ok(()) if data.id().is_empty() => ApplyOutcome::failed(
                None,
                fail(ProviderError::Client(
                    ApiError::not_found("object disappeared during update").into(),
                )),
            ),
            Ok(()) => {
                restore_write_only(&schema, &mut data, &planned);
                info!(op_id = %ctx.op_id(), type_name, id = data.id(), "updated");
                ApplyOutcome::ok(Some(data.to_state(schema.version)))
            }
            Err(err) => {
                let refreshed = self.refresh_after_failure(resource, &ctx, prior, timeouts.read).await;
                ApplyOutcome::failed(refreshed, fail(err))
            }
        }
    }

    /// what the remote looks like after a failed update; prior state if even that fails.
    async fn refresh_after_failure(
        &self,
        resource: &dyn Resource,
        ctx: &OpContext,
        prior: &ResourceState,
        budget: Duration,
    ) -> Option<ResourceState> {
        let schema = resource.schema();
        let read = ctx.for_operation(Operation::Read, budget);
        let mut data = ResourceData::for_state(prior);
        match self.read_with_retry(resource, &read, &mut data).await {
            Ok(()) if data.id().is_empty() => None,
            Ok(()) => {
                restore_write_only(&schema, &mut data, &prior.attributes);
                let mut state = data.to_state(schema.version);
                state.tainted = prior.tainted;
                Some(state)
            }
            Err(err) => {
                warn!(
                    type_name = resource.type_name(),
                    id = %prior.id,
                    error = %err,
                    "refresh after failed update failed"
                );
                Some(prior.clone())
            }
        }
    }

    /// refresh persisted state; `None` means the remote object is gone.
    pub async fn read(
        &self,
        resource: &dyn Resource,
        current: &ResourceState,
    ) -> Result<Option<ResourceState>, OperationError> {
        let schema = resource.schema();
        let type_name = resource.type_name();
        let fail = |err: ProviderError| {
            OperationError::new(Operation::Read, type_name, Some(&current.id), err)
        };
        if !current.exists() {
            return Ok(None);
        }
        let timeouts = timeouts_for(&schema, &current.attributes).map_err(fail)?;
        let ctx = self.context(Operation::Read, type_name, timeouts.read);
        let mut data = ResourceData::for_state(current);
        self.read_with_retry(resource, &ctx, &mut data)
            .await
            .map_err(fail)?;
        if data.id().is_empty() {
            warn!(type_name, id = %current.id, "object not found, removing from state");
            return Ok(None);
        }
        restore_write_only(&schema, &mut data, &current.attributes);
        let mut state = data.to_state(schema.version);
        state.tainted = current.tainted;
        Ok(Some(state))
    }

    /// read with soft-delete: a not-found clears the id instead of failing.
    async fn read_with_retry(
        &self,
        resource: &dyn Resource,
        ctx: &OpContext,
        data: &mut ResourceData,
    ) -> Result<(), ProviderError> {
        self.drive(resource, Callback::Read, ctx, data, |result, data| match result {
            Ok(()) => Step::Done(()),
            Err(err) if err.kind().is_soft_delete(Operation::Read) => {
                data.clear_id();
                Step::Done(())
            }
            Err(err) => Step::from_result(ctx, Err(err)),
        })
        .await
    }

    /// delete; an object that is already gone counts as deleted.
    pub async fn delete(
        &self,
        resource: &dyn Resource,
        prior: &ResourceState,
    ) -> Result<(), OperationError> {
        let schema = resource.schema();
        let type_name = resource.type_name();
        let fail = |err: ProviderError| {
            OperationError::new(Operation::Delete, type_name, Some(&prior.id), err)
        };
        if !prior.exists() {
            return Ok(());
        }
        let timeouts = timeouts_for(&schema, &prior.attributes).map_err(fail)?;
        let ctx = self.context(Operation::Delete, type_name, timeouts.delete);
        let mut data = ResourceData::for_state(prior);
        self.drive(resource, Callback::Delete, &ctx, &mut data, |result, _| match result {
            Err(err) if err.kind().is_soft_delete(Operation::Delete) => {
                info!(type_name, "object already gone");
                Step::Done(())
            }
            result => Step::from_result(&ctx, result),
        })
        .await
        .map_err(fail)?;
        info!(op_id = %ctx.op_id(), type_name, id = %prior.id, "deleted");
        Ok(())
    }

    /// import an existing object by id, then read it.
    pub async fn import(
        &self,
        resource: &dyn Resource,
        id: &str,
    ) -> Result<ResourceState, OperationError> {
        let schema = resource.schema();
        let type_name = resource.type_name();
        let fail = |err: ProviderError| {
            OperationError::new(Operation::Import, type_name, Some(id), err)
        };
        let attrs = match resource.import_path() {
            Some(path) => path.parse(id).map_err(|err| fail(err.into()))?,
            None => AttrMap::new(),
        };
        let ctx = self.context(Operation::Import, type_name, schema.timeouts.read);
        let mut data = ResourceData::for_import(id, attrs);
        self.drive(resource, Callback::Import, &ctx, &mut data, |result, _| {
            Step::from_result(&ctx, result)
        })
        .await
        .map_err(fail)?;

        let read = ctx.for_operation(Operation::Read, schema.timeouts.read);
        self.read_with_retry(resource, &read, &mut data)
            .await
            .map_err(fail)?;
        if data.id().is_empty() {
            return Err(fail(ProviderError::Client(
                ApiError::not_found(format!("cannot import non-existent remote object {id}")).into(),
            )));
        }
        info!(op_id = %ctx.op_id(), type_name, id = data.id(), "imported");
        Ok(data.to_state(schema.version))
    }

    pub async fn read_data_source(
        &self,
        source: &dyn DataSource,
        config: AttrMap,
    ) -> Result<ResourceState, OperationError> {
        let schema = source.schema();
        let type_name = source.type_name();
        let fail = |err: ProviderError| {
            OperationError::new(Operation::Read, type_name, None, err)
        };
        let timeouts = timeouts_for(&schema, &config).map_err(fail)?;
        let ctx = self.context(Operation::Read, type_name, timeouts.read);
        let mut data = ResourceData::for_create(config);
        let mut backoff = self.policy.backoff();
        loop {
            ctx.check_cancelled().map_err(fail)?;
            let result = ctx.run(source.read(&ctx, &mut data)).await;
            match Step::from_result(&ctx, result) {
                Step::Done(()) => break,
                Step::Retry(err) => backoff.wait(&ctx, err).await.map_err(fail)?,
                Step::Fail(err) => return Err(fail(err)),
            }
        }
        Ok(data.to_state(schema.version))
    }

    /// run one callback until `classify` says it is done or failed.
    async fn drive<F>(
        &self,
        resource: &dyn Resource,
        callback: Callback,
        ctx: &OpContext,
        data: &mut ResourceData,
        mut classify: F,
    ) -> Result<(), ProviderError>
    where
        F: FnMut(Result<(), ProviderError>, &mut ResourceData) -> Step<()>,
    {
        let mut backoff = self.policy.backoff();
        loop {
            ctx.check_cancelled()?;
            let call = match callback {
                Callback::Create => resource.create(ctx, data),
                Callback::Read => resource.read(ctx, data),
                Callback::Update => resource.update(ctx, data),
                Callback::Delete => resource.delete(ctx, data),
                Callback::Import => resource.import(ctx, data),
            };
            let result = ctx.run(call).await;
            match classify(result, data) {
                Step::Done(()) => return Ok(()),
                Step::Retry(err) => backoff.wait(ctx, err).await?,
                Step::Fail(err) => return Err(err),
            }
        }
    }
}

/// schema timeouts with the resource's `timeouts` overrides applied.
fn timeouts_for(schema: &ResourceSchema, attrs: &AttrMap) -> Result<Timeouts, ProviderError> {
    schema
        .timeouts
        .with_overrides(attrs)
        .map_err(ProviderError::Validation)
}

/// write-only attributes are never returned by the remote; keep the known values.
fn restore_write_only(schema: &ResourceSchema, data: &mut ResourceData, known: &AttrMap) {
    for name in schema.write_only_attributes() {
        match known.get(name) {
            Some(value) => data.set(name, value.clone()),
            None => data.remove(name),
        }
    }
}
