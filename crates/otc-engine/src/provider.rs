//! the provider as the host sees it: configure once, then per-type operations.

use crate::dispatch::{ApplyOutcome, Dispatcher};
use crate::error::ProviderError;
use crate::planner::{plan_change, PlannedChange};
use crate::resource::Registry;
use otc_client::{Config, ConfigSource};
use otc_core::{validate_config, AttrMap, ProviderSchema, ResourceSchema, ResourceState};
use serde_json::{Map, Value as Json};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// registered handlers plus the configuration they run against.
#[derive(Debug)]
pub struct Provider {
    registry: Registry,
    base: ConfigSource,
    dispatcher: RwLock<Option<Dispatcher>>,
    root: CancellationToken,
}

impl Provider {
    /// provider whose configuration starts from `base` (usually the environment).
    pub fn new(registry: Registry, base: ConfigSource) -> Self {
        Self {
            registry,
            base,
            dispatcher: RwLock::new(None),
            root: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn schema(&self) -> ProviderSchema {
        self.registry.schema()
    }

    /// build and authenticate the configuration; host values win over the base source.
    pub async fn configure(&self, values: Map<String, Json>) -> Result<(), ProviderError> {
        let source = self.base.clone().overlay(ConfigSource::from_map(values));
        let config = Config::from_source(&source)?;
        config.authenticate().await?;
        info!(
            region = config.default_region(),
            credentials = config.credentials().label(),
            "provider configured"
        );
        self.install(Arc::new(config));
        Ok(())
    }

    /// use an already built configuration.
    pub fn install(&self, config: Arc<Config>) {
        let dispatcher = Dispatcher::new(config, self.root.clone());
        *self
            .dispatcher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);
    }

    fn dispatcher(&self) -> Result<Dispatcher, ProviderError> {
        self.dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProviderError::NotConfigured)
    }

    fn resource_schema(&self, type_name: &str) -> Result<ResourceSchema, ProviderError> {
        Ok(self.registry.resource(type_name)?.schema())
    }

    /// offline validation of a resource configuration.
    pub fn validate_resource(&self, type_name: &str, config: &AttrMap) -> Result<(), ProviderError> {
        let schema = self.resource_schema(type_name)?;
        let report = validate_config(&schema, &schema.coerce(config.clone()));
        if report.is_err() {
            return Err(ProviderError::validation(&report));
        }
        Ok(())
    }

    pub fn validate_data_source(&self, type_name: &str, config: &AttrMap) -> Result<(), ProviderError> {
        let schema = self.registry.data_source(type_name)?.schema();
        let report = validate_config(&schema, &schema.coerce(config.clone()));
        if report.is_err() {
            return Err(ProviderError::validation(&report));
        }
        Ok(())
    }

    pub fn plan(
        &self,
        type_name: &str,
        prior: Option<&ResourceState>,
        config: Option<&AttrMap>,
    ) -> Result<PlannedChange, ProviderError> {
        let schema = self.resource_schema(type_name)?;
        if let Some(config) = config {
            self.validate_resource(type_name, config)?;
        }
        Ok(plan_change(&schema, prior, config))
    }

    pub async fn apply(
        &self,
        type_name: &str,
        prior: Option<&ResourceState>,
        planned: Option<AttrMap>,
    ) -> Result<ApplyOutcome, ProviderError> {
        let resource = self.registry.resource(type_name)?;
        let dispatcher = self.dispatcher()?;
        let planned = planned.map(|planned| resource.schema().coerce(planned));
        Ok(dispatcher.apply(resource.as_ref(), prior, planned).await)
    }

    pub async fn read(
        &self,
        type_name: &str,
        current: &ResourceState,
    ) -> Result<Option<ResourceState>, ProviderError> {
        let resource = self.registry.resource(type_name)?;
        let dispatcher = self.dispatcher()?;
        Ok(dispatcher.read(resource.as_ref(), current).await?)
    }

    pub async fn import(&self, type_name: &str, id: &str) -> Result<ResourceState, ProviderError> {
        let resource = self.registry.resource(type_name)?;
        let dispatcher = self.dispatcher()?;
        Ok(dispatcher.import(resource.as_ref(), id).await?)
    }

    pub async fn read_data_source(
        &self,
        type_name: &str,
        config: AttrMap,
    ) -> Result<ResourceState, ProviderError> {
        let source = self.registry.data_source(type_name)?;
        let dispatcher = self.dispatcher()?;
        let config = source.schema().coerce(config);
        Ok(dispatcher.read_data_source(source.as_ref(), config).await?)
    }

    /// cancel every in-flight operation.
    pub fn stop(&self) {
        info!("stop requested, cancelling in-flight operations");
        self.root.cancel();
    }
}
