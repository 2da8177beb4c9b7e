//! `otc_blockstorage_volume_v2`: evs volumes on block storage v2.

use crate::common::{self, DELETED};
use async_trait::async_trait;
use otc_client::{ServiceClient, ServiceType};
use otc_core::{
    tags_from_value, AttrType, Attribute, ResourceSchema, TagMap, TagMode, Timeouts, Validator,
    Value,
};
use otc_engine::{
    check_deleted, read_tags, reconcile_tags, OpContext, ProviderError, Resource, ResourceData,
    ResourceTags, WaitForState,
};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const TYPE_NAME: &str = "otc_blockstorage_volume_v2";

const AVAILABLE: &str = "available";
const IN_USE: &str = "in-use";

#[derive(Debug, Clone, Deserialize)]
struct VolumeBody {
    id: String,
    status: String,
    size: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    volume_type: Option<String>,
    #[serde(default)]
    availability_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VolumeEnvelope {
    volume: VolumeBody,
}

fn volume_path(id: &str) -> String {
    format!("volumes/{id}")
}

fn volume_tags(client: &Arc<ServiceClient>, id: &str) -> ResourceTags {
    ResourceTags::new(client.clone(), format!("cloudvolumes/{id}/tags"))
}

fn create_request(data: &ResourceData) -> Result<Json, ProviderError> {
    let size = data
        .get_int("size")
        .ok_or_else(|| ProviderError::Validation("size is required".to_string()))?;
    let mut volume = Map::new();
    volume.insert("size".to_string(), json!(size));
    for name in ["name", "description", "volume_type", "availability_zone"] {
        if let Some(value) = data.get_str(name) {
            volume.insert(name.to_string(), json!(value));
        }
    }
    Ok(json!({ "volume": volume }))
}

/// poll until the volume settles in one of `target`.
async fn wait_for(
    ctx: &OpContext,
    client: &ServiceClient,
    id: &str,
    pending: &[&str],
    target: &[&str],
) -> Result<VolumeBody, ProviderError> {
    let path = volume_path(id);
    let path = path.as_str();
    WaitForState::new(pending, target, ctx.remaining())
        .min_timeout(Duration::from_secs(3))
        .wait(ctx, move || async move {
            let result = client.get_json::<VolumeEnvelope>(path).await;
            common::observe(result.map(|envelope| envelope.volume), |volume| {
                volume.status.clone()
            })
        })
        .await
}

/// block storage volume.
#[derive(Debug, Default)]
pub struct Volume;

#[async_trait]
impl Resource for Volume {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(0)
            .describe("block storage volume")
            .timeouts(Timeouts {
                create: Duration::from_secs(30 * 60),
                delete: Duration::from_secs(30 * 60),
                ..Timeouts::default()
            })
            .attribute(
                "size",
                Attribute::required(AttrType::Int)
                    .validate(Validator::IntRange { min: 10, max: 32768 })
                    .describe("size in GB; can only grow"),
            )
            .attribute("name", Attribute::optional(AttrType::String))
            .attribute("description", Attribute::optional(AttrType::String))
            .attribute(
                "volume_type",
                Attribute::optional_computed(AttrType::String)
                    .force_new()
                    .validate(Validator::one_of(&["SATA", "SAS", "SSD", "GPSSD", "ESSD"])),
            )
            .attribute(
                "availability_zone",
                Attribute::optional_computed(AttrType::String).force_new(),
            )
            .attribute("status", Attribute::computed(AttrType::String))
            .attribute("region", common::region_attribute())
            .attribute("tags", common::tags_attribute())
    }

    async fn create(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::BlockStorageV2, data).await?;
        let created: VolumeEnvelope = client.post_json("volumes", &create_request(data)?).await?;
        data.set_id(created.volume.id.clone());
        info!(id = %created.volume.id, "volume created, waiting for it to become available");

        wait_for(
            ctx,
            &client,
            data.id(),
            &["creating", "downloading"],
            &[AVAILABLE],
        )
        .await?;

        let declared = data.get_tags("tags");
        if !declared.is_empty() {
            let tags = volume_tags(&client, data.id());
            reconcile_tags(&tags, &declared, &TagMap::new(), TagMode::Managed).await?;
        }
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::BlockStorageV2, data).await?;
        let volume = match client
            .get_json::<VolumeEnvelope>(&volume_path(data.id()))
            .await
        {
            Ok(envelope) => envelope.volume,
            Err(err) => return check_deleted(data, err.into(), "volume"),
        };
        data.set("size", volume.size);
        data.set("status", volume.status);
        let optional = [
            ("name", volume.name),
            ("description", volume.description),
            ("volume_type", volume.volume_type),
            ("availability_zone", volume.availability_zone),
        ];
        for (name, value) in optional {
            match value {
                Some(value) => data.set(name, value),
                None => data.remove(name),
            }
        }
        common::set_region(data, &client);

        let tags = read_tags(&volume_tags(&client, data.id())).await?;
        data.set("tags", Value::from(tags));
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::BlockStorageV2, data).await?;
        let id = data.id().to_string();

        if data.has_change("name") || data.has_change("description") {
            let volume = json!({
                "name": data.get_str("name").unwrap_or_default(),
                "description": data.get_str("description").unwrap_or_default(),
            });
            let _: VolumeEnvelope = client
                .put_json(&volume_path(&id), &json!({ "volume": volume }))
                .await?;
        }

        if data.has_change("size") {
            let old = data.get_old("size").and_then(Value::as_int).unwrap_or_default();
            let new = data.get_int("size").unwrap_or_default();
            if new < old {
                return Err(ProviderError::Validation(format!(
                    "volume size can only grow: {old} -> {new}"
                )));
            }
            let body = json!({ "os-extend": { "new_size": new } });
            client.post(&format!("{}/action", volume_path(&id)), &body).await?;
            info!(id = %id, size = new, "volume extend requested");
            wait_for(ctx, &client, &id, &["extending"], &[AVAILABLE, IN_USE]).await?;
        }

        if data.has_change("tags") {
            let prior = tags_from_value(data.get_old("tags"));
            let tags = volume_tags(&client, &id);
            reconcile_tags(&tags, &data.get_tags("tags"), &prior, TagMode::Managed).await?;
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::BlockStorageV2, data).await?;
        let path = volume_path(data.id());
        client.delete(&path).await?;

        let client = client.as_ref();
        let path = path.as_str();
        WaitForState::new(
            &["deleting", "downloading", AVAILABLE],
            &[DELETED],
            ctx.remaining(),
        )
        .min_timeout(Duration::from_secs(3))
        .wait(ctx, move || async move {
            let result = client.get_json::<VolumeEnvelope>(path).await;
            common::observe_deletion(result, |envelope| envelope.volume.status.clone())
        })
        .await
    }
}
