//! handler contract for resources and data sources.

use crate::context::OpContext;
use crate::data::ResourceData;
use crate::error::ProviderError;
use async_trait::async_trait;
use otc_core::{Attribute, ImportPath, ProviderSchema, ResourceSchema};
use std::collections::BTreeMap;
use std::sync::Arc;

/// lifecycle callbacks of one managed resource type.
///
/// every callback works on [`ResourceData`]; create and update are expected
/// to leave the id set, read clears it when the remote object is gone.
#[async_trait]
pub trait Resource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    /// positional layout of a composite id, for types keyed by several remote ids.
    fn import_path(&self) -> Option<ImportPath> {
        None
    }

    async fn create(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    async fn update(&self, _ctx: &OpContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    /// prepare the attributes the following read needs; the default keeps the id only.
    async fn import(&self, _ctx: &OpContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// read-only lookup exposed as a data source.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;
}

/// resource and data source handlers keyed by type name.
#[derive(Default, Clone)]
pub struct Registry {
    provider: BTreeMap<String, Attribute>,
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// declare the provider-level configuration schema.
    pub fn with_provider_schema(mut self, provider: BTreeMap<String, Attribute>) -> Self {
        self.provider = provider;
        self
    }

    pub fn register(mut self, resource: impl Resource + 'static) -> Self {
        self.resources.insert(resource.type_name(), Arc::new(resource));
        self
    }

    pub fn register_data_source(mut self, source: impl DataSource + 'static) -> Self {
        self.data_sources.insert(source.type_name(), Arc::new(source));
        self
    }

    pub fn resource(&self, type_name: &str) -> Result<Arc<dyn Resource>, ProviderError> {
        self.resources
            .get(type_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownType {
                category: "resource",
                name: type_name.to_string(),
            })
    }

    pub fn data_source(&self, type_name: &str) -> Result<Arc<dyn DataSource>, ProviderError> {
        self.data_sources
            .get(type_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownType {
                category: "data source",
                name: type_name.to_string(),
            })
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }

    pub fn data_source_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.data_sources.keys().copied()
    }

    pub fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            provider: self.provider.clone(),
            resources: self
                .resources
                .iter()
                .map(|(name, resource)| (name.to_string(), resource.schema()))
                .collect(),
            data_sources: self
                .data_sources
                .iter()
                .map(|(name, source)| (name.to_string(), source.schema()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish()
    }
}
