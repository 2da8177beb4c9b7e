//! `otc_lb_member_v2`: backend members of an elb v2 pool.
//!
//! members live below their pool, so the id is `pool_id/member_id`.

use crate::common;
use async_trait::async_trait;
use otc_client::ServiceType;
use otc_core::{AttrType, Attribute, ImportPath, ResourceSchema, Validator};
use otc_engine::{check_deleted, OpContext, ProviderError, Resource, ResourceData};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use tracing::info;

pub const TYPE_NAME: &str = "otc_lb_member_v2";

#[derive(Debug, Deserialize)]
struct MemberBody {
    id: String,
    address: String,
    protocol_port: i64,
    #[serde(default)]
    subnet_id: Option<String>,
    #[serde(default)]
    weight: Option<i64>,
    #[serde(default)]
    name: String,
    #[serde(default = "enabled")]
    admin_state_up: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct MemberEnvelope {
    member: MemberBody,
}

fn import_path() -> ImportPath {
    ImportPath::new(&["pool_id", "member_id"])
}

fn members_path(pool_id: &str) -> String {
    format!("lbaas/pools/{pool_id}/members")
}

fn member_path(data: &ResourceData) -> Result<String, ProviderError> {
    let pool_id = data.require_str("pool_id")?;
    let member_id = data.require_str("member_id")?;
    Ok(format!("{}/{member_id}", members_path(pool_id)))
}

/// load balancer pool member.
#[derive(Debug, Default)]
pub struct LbMember;

#[async_trait]
impl Resource for LbMember {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(0)
            .describe("member of a load balancer pool")
            .attribute("pool_id", Attribute::required(AttrType::String).force_new())
            .attribute("member_id", Attribute::computed(AttrType::String))
            .attribute("address", Attribute::required(AttrType::String).force_new())
            .attribute(
                "protocol_port",
                Attribute::required(AttrType::Int)
                    .force_new()
                    .validate(Validator::IntRange { min: 1, max: 65535 }),
            )
            .attribute("subnet_id", Attribute::required(AttrType::String).force_new())
            .attribute(
                "weight",
                Attribute::optional_computed(AttrType::Int)
                    .validate(Validator::IntRange { min: 0, max: 256 }),
            )
            .attribute("name", Attribute::optional(AttrType::String))
            .attribute(
                "admin_state_up",
                Attribute::optional(AttrType::Bool).default_value(true),
            )
            .attribute("region", common::region_attribute())
    }

    fn import_path(&self) -> Option<ImportPath> {
        Some(import_path())
    }

    async fn create(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::ElbV2, data).await?;
        let mut member = Map::new();
        member.insert("address".to_string(), json!(data.require_str("address")?));
        member.insert("subnet_id".to_string(), json!(data.require_str("subnet_id")?));
        let port = data
            .get_int("protocol_port")
            .ok_or_else(|| ProviderError::Validation("protocol_port is required".to_string()))?;
        member.insert("protocol_port".to_string(), json!(port));
        if let Some(weight) = data.get_int("weight") {
            member.insert("weight".to_string(), json!(weight));
        }
        if let Some(name) = data.get_str("name") {
            member.insert("name".to_string(), json!(name));
        }
        if let Some(up) = data.get_bool("admin_state_up") {
            member.insert("admin_state_up".to_string(), json!(up));
        }

        let path = members_path(data.require_str("pool_id")?);
        let created: MemberEnvelope = client
            .post_json(&path, &json!({ "member": member }))
            .await?;
        data.set("member_id", created.member.id);
        let id = import_path().build(data.attributes())?;
        info!(id = %id, "lb member created");
        data.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::ElbV2, data).await?;
        let member = match client.get_json::<MemberEnvelope>(&member_path(data)?).await {
            Ok(envelope) => envelope.member,
            Err(err) => return check_deleted(data, err.into(), "lb member"),
        };
        data.set("member_id", member.id);
        data.set("address", member.address);
        data.set("protocol_port", member.protocol_port);
        if let Some(subnet_id) = member.subnet_id {
            data.set("subnet_id", subnet_id);
        }
        if let Some(weight) = member.weight {
            data.set("weight", weight);
        }
        data.set("name", member.name);
        data.set("admin_state_up", member.admin_state_up);
        common::set_region(data, &client);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::ElbV2, data).await?;
        let mut member = Map::new();
        if data.has_change("name") {
            member.insert("name".to_string(), json!(data.get_str("name").unwrap_or_default()));
        }
        if data.has_change("weight") {
            member.insert("weight".to_string(), json!(data.get_int("weight")));
        }
        if data.has_change("admin_state_up") {
            let up = data.get_bool("admin_state_up").unwrap_or(true);
            member.insert("admin_state_up".to_string(), json!(up));
        }
        if member.is_empty() {
            return Ok(());
        }
        let _: Json = client
            .put_json(&member_path(data)?, &json!({ "member": member }))
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let client = common::client(ctx, ServiceType::ElbV2, data).await?;
        client.delete(&member_path(data)?).await?;
        Ok(())
    }
}
