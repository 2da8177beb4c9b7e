//! `otc_vpc_v1`: virtual private clouds on network v1, tags on network v2.

use crate::common::{self, DELETED};
use async_trait::async_trait;
use otc_client::{ServiceClient, ServiceType};
use otc_core::{
    tags_from_value, AttrType, Attribute, ResourceSchema, TagMap, TagMode, Validator, Value,
};
use otc_engine::{
    check_deleted, read_tags, reconcile_tags, DataSource, OpContext, ProviderError, Resource,
    ResourceData, ResourceTags, WaitForState,
};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use std::time::Duration;
use tracing::{debug, info};

pub const TYPE_NAME: &str = "otc_vpc_v1";

const CREATING: &str = "CREATING";
const OK: &str = "OK";

#[derive(Debug, Clone, Deserialize)]
struct VpcBody {
    id: String,
    name: String,
    cidr: String,
    #[serde(default)]
    description: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct VpcEnvelope {
    vpc: VpcBody,
}

#[derive(Debug, Deserialize)]
struct VpcList {
    #[serde(default)]
    vpcs: Vec<VpcBody>,
}

fn vpc_path(id: &str) -> String {
    format!("vpcs/{id}")
}

/// request body from the writable attributes.
fn vpc_request(data: &ResourceData) -> Result<Json, ProviderError> {
    let mut vpc = Map::new();
    vpc.insert("name".to_string(), json!(data.require_str("name")?));
    vpc.insert("cidr".to_string(), json!(data.require_str("cidr")?));
    if let Some(description) = data.get_str("description") {
        vpc.insert("description".to_string(), json!(description));
    }
    Ok(json!({ "vpc": vpc }))
}

fn set_vpc(data: &mut ResourceData, vpc: VpcBody) {
    data.set("name", vpc.name);
    data.set("cidr", vpc.cidr);
    data.set("description", vpc.description);
    data.set("status", vpc.status);
}

async fn vpc_tags(ctx: &OpContext, data: &ResourceData) -> Result<ResourceTags, ProviderError> {
    let client = common::client(ctx, ServiceType::NetworkV2, data).await?;
    let path = format!("{}/vpcs/{}/tags", common::project_id(&client)?, data.id());
    Ok(ResourceTags::new(client, path))
}

/// wait until the vpc leaves `CREATING`.
async fn wait_for_ok(
    ctx: &OpContext,
    client: &ServiceClient,
    id: &str,
) -> Result<VpcBody, ProviderError> {
    let path = vpc_path(id);
    let path = path.as_str();
    WaitForState::new(&[CREATING], &[OK], ctx.remaining())
        .delay(Duration::from_secs(1))
        .min_timeout(Duration::from_secs(3))
        .wait(ctx, move || async move {
            let result = client.get_json::<VpcEnvelope>(path).await;
            common::observe(result.map(|envelope| envelope.vpc), |vpc| vpc.status.clone())
        })
        .await
}

/// virtual private cloud.
#[derive(Debug, Default)]
pub struct Vpc;

#[async_trait]
impl Resource for Vpc {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(0)
            .describe("virtual private cloud")
            .attribute(
                "name",
                Attribute::required(AttrType::String)
                    .validate(Validator::StringLength { min: 1, max: 64 }),
            )
            .attribute(
                "cidr",
                Attribute::required(AttrType::String).validate(Validator::Cidr),
            )
            .attribute("description", Attribute::optional(AttrType::String))
            .attribute("status", Attribute::computed(AttrType::String))
            .attribute("region", common::region_attribute())
            .attribute("tags", common::tags_attribute())
    }

    async fn create(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::NetworkV1, data).await?;
        let created: VpcEnvelope = client.post_json("vpcs", &vpc_request(data)?).await?;
        data.set_id(created.vpc.id.clone());
        info!(id = %created.vpc.id, "vpc created, waiting for it to become available");

        wait_for_ok(ctx, &client, data.id()).await?;

        let declared = data.get_tags("tags");
        if !declared.is_empty() {
            let tags = vpc_tags(ctx, data).await?;
            reconcile_tags(&tags, &declared, &TagMap::new(), TagMode::Managed).await?;
        }
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::NetworkV1, data).await?;
        let vpc = match client.get_json::<VpcEnvelope>(&vpc_path(data.id())).await {
            Ok(envelope) => envelope.vpc,
            Err(err) => return check_deleted(data, err.into(), "vpc"),
        };
        set_vpc(data, vpc);
        common::set_region(data, &client);

        let tags = read_tags(&vpc_tags(ctx, data).await?).await?;
        data.set("tags", Value::from(tags));
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::NetworkV1, data).await?;
        if ["name", "cidr", "description"]
            .iter()
            .any(|name| data.has_change(name))
        {
            let _: VpcEnvelope = client
                .put_json(&vpc_path(data.id()), &vpc_request(data)?)
                .await?;
            wait_for_ok(ctx, &client, data.id()).await?;
        }
        if data.has_change("tags") {
            let prior = tags_from_value(data.get_old("tags"));
            let tags = vpc_tags(ctx, data).await?;
            let diff =
                reconcile_tags(&tags, &data.get_tags("tags"), &prior, TagMode::Managed).await?;
            debug!(
                id = data.id(),
                removed = diff.to_delete.len(),
                added = diff.to_add.len(),
                "vpc tags updated"
            );
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::NetworkV1, data).await?;
        let path = vpc_path(data.id());
        client.delete(&path).await?;

        let client = client.as_ref();
        let path = path.as_str();
        WaitForState::new(&[OK, CREATING], &[DELETED], ctx.remaining())
            .delay(Duration::from_secs(1))
            .min_timeout(Duration::from_secs(3))
            .wait(ctx, move || async move {
                let result = client.get_json::<VpcEnvelope>(path).await;
                common::observe_deletion(result, |envelope| envelope.vpc.status.clone())
            })
            .await
    }
}

/// lookup of an existing vpc by id or name.
#[derive(Debug, Default)]
pub struct VpcLookup;

#[async_trait]
impl DataSource for VpcLookup {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(0)
            .describe("look up a vpc by id or name")
            .attribute("id", Attribute::optional_computed(AttrType::String))
            .attribute("name", Attribute::optional_computed(AttrType::String))
            .attribute("cidr", Attribute::optional_computed(AttrType::String))
            .attribute("description", Attribute::computed(AttrType::String))
            .attribute("status", Attribute::computed(AttrType::String))
            .attribute("region", common::region_attribute())
    }

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::NetworkV1, data).await?;
        let vpc = match data.get_str("id") {
            Some(id) => client.get_json::<VpcEnvelope>(&vpc_path(id)).await?.vpc,
            None => {
                let list: VpcList = client.get_json("vpcs").await?;
                let mut matches: Vec<VpcBody> = list
                    .vpcs
                    .into_iter()
                    .filter(|vpc| data.get_str("name").map_or(true, |name| vpc.name == name))
                    .filter(|vpc| data.get_str("cidr").map_or(true, |cidr| vpc.cidr == cidr))
                    .collect();
                match matches.len() {
                    0 => {
                        return Err(ProviderError::Validation(
                            "your query returned no results, please change your search criteria"
                                .to_string(),
                        ))
                    }
                    1 => matches.remove(0),
                    count => {
                        return Err(ProviderError::Validation(format!(
                            "your query returned {count} results, please narrow your search criteria"
                        )))
                    }
                }
            }
        };
        data.set_id(vpc.id.clone());
        set_vpc(data, vpc);
        common::set_region(data, &client);
        Ok(())
    }
}
