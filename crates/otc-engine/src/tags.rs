//! converge remote tags to the declared map.

use crate::error::ProviderError;
use async_trait::async_trait;
use otc_client::ServiceClient;
use otc_core::{diff_tags, tags_to_map, Tag, TagDiff, TagMap, TagMode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// tag endpoints of one remote object.
#[async_trait]
pub trait TagService: Send + Sync {
    async fn list(&self) -> Result<TagMap, ProviderError>;
    async fn delete(&self, tags: &[Tag]) -> Result<(), ProviderError>;
    async fn create(&self, tags: &[Tag]) -> Result<(), ProviderError>;
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<Tag>,
}

/// the `{path}` / `{path}/action` tag api shared by most services.
#[derive(Debug, Clone)]
pub struct ResourceTags {
    client: Arc<ServiceClient>,
    path: String,
}

impl ResourceTags {
    /// tags below `path`, e.g. `{project_id}/vpcs/{id}/tags` on network v2.
    pub fn new(client: Arc<ServiceClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    async fn act(&self, action: &'static str, tags: &[Tag]) -> Result<(), ProviderError> {
        if tags.is_empty() {
            return Ok(());
        }
        let body = json!({ "action": action, "tags": tags });
        self.client
            .post(&format!("{}/action", self.path), &body)
            .await
            .map_err(ProviderError::from)
    }
}

#[async_trait]
impl TagService for ResourceTags {
    async fn list(&self) -> Result<TagMap, ProviderError> {
        let list: TagList = self.client.get_json(&self.path).await?;
        Ok(tags_to_map(list.tags))
    }

    async fn delete(&self, tags: &[Tag]) -> Result<(), ProviderError> {
        self.act("delete", tags).await
    }

    async fn create(&self, tags: &[Tag]) -> Result<(), ProviderError> {
        self.act("create", tags).await
    }
}

/// bring remote tags in line with `declared`; removals are sent before additions.
///
/// `prior` is the map from the previous state, used to recognise keys this
/// provider owns in [`TagMode::Managed`].
pub async fn reconcile_tags(
    service: &dyn TagService,
    declared: &TagMap,
    prior: &TagMap,
    mode: TagMode,
) -> Result<TagDiff, ProviderError> {
    let current = service.list().await?;
    let diff = diff_tags(&current, declared, prior, mode);
    if diff.is_empty() {
        return Ok(diff);
    }
    debug!(
        delete = diff.to_delete.len(),
        add = diff.to_add.len(),
        "reconciling tags"
    );
    service.delete(&diff.to_delete).await?;
    service.create(&diff.to_add).await?;
    Ok(diff)
}

/// read remote tags, treating a service without tag support as no tags.
pub async fn read_tags(service: &dyn TagService) -> Result<TagMap, ProviderError> {
    match service.list().await {
        Ok(tags) => Ok(tags),
        Err(err) if err.is_not_found() => Ok(TagMap::new()),
        Err(err) => Err(err),
    }
}
