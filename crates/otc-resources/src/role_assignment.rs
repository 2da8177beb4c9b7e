//! `otc_identity_role_assignment_v3`: grant a role to a user or group on a domain or project.

use async_trait::async_trait;
use otc_client::{ApiError, ServiceType};
use otc_core::{AttrType, Attribute, ImportPath, ResourceSchema};
use otc_engine::{check_deleted, OpContext, ProviderError, Resource, ResourceData};
use reqwest::Method;
use serde::Deserialize;
use tracing::info;

pub const TYPE_NAME: &str = "otc_identity_role_assignment_v3";

#[derive(Debug, Deserialize)]
struct AssignmentList {
    #[serde(default)]
    role_assignments: Vec<serde_json::Value>,
}

fn import_path() -> ImportPath {
    ImportPath::new(&["domain_id", "project_id", "group_id", "user_id", "role_id"])
        .optional("domain_id")
        .optional("project_id")
        .optional("group_id")
        .optional("user_id")
}

/// where a role is granted and to whom.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Grant {
    scope: (&'static str, String),
    actor: (&'static str, String),
    role_id: String,
}

impl Grant {
    fn from_data(data: &ResourceData) -> Result<Self, ProviderError> {
        let scope = match (data.get_str("domain_id"), data.get_str("project_id")) {
            (Some(domain), None) => ("domain", domain.to_string()),
            (None, Some(project)) => ("project", project.to_string()),
            _ => {
                return Err(ProviderError::Validation(
                    "exactly one of domain_id and project_id must be set".to_string(),
                ))
            }
        };
        let actor = match (data.get_str("group_id"), data.get_str("user_id")) {
            (Some(group), None) => ("group", group.to_string()),
            (None, Some(user)) => ("user", user.to_string()),
            _ => {
                return Err(ProviderError::Validation(
                    "exactly one of group_id and user_id must be set".to_string(),
                ))
            }
        };
        Ok(Self {
            scope,
            actor,
            role_id: data.require_str("role_id")?.to_string(),
        })
    }

    /// `{domains|projects}/{id}/{groups|users}/{id}/roles/{role_id}`
    fn path(&self) -> String {
        format!(
            "{}s/{}/{}s/{}/roles/{}",
            self.scope.0, self.scope.1, self.actor.0, self.actor.1, self.role_id
        )
    }

    fn query(&self) -> String {
        format!(
            "role_assignments?scope.{}.id={}&{}.id={}&role.id={}",
            self.scope.0, self.scope.1, self.actor.0, self.actor.1, self.role_id
        )
    }
}

/// identity role assignment; every attribute forces a new assignment.
#[derive(Debug, Default)]
pub struct RoleAssignment;

#[async_trait]
impl Resource for RoleAssignment {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        let optional = || Attribute::optional(AttrType::String).force_new();
        ResourceSchema::new(0)
            .describe("role granted to a user or group on a domain or project")
            .attribute("domain_id", optional())
            .attribute("project_id", optional())
            .attribute("group_id", optional())
            .attribute("user_id", optional())
            .attribute("role_id", Attribute::required(AttrType::String).force_new())
    }

    fn import_path(&self) -> Option<ImportPath> {
        Some(import_path())
    }

    async fn create(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let grant = Grant::from_data(data)?;
        let client = ctx.client(ServiceType::IdentityV3, ctx.config().default_region()).await?;
        client.send(Method::PUT, &grant.path(), None).await?;
        let id = import_path().build(data.attributes())?;
        info!(id = %id, "role assigned");
        data.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let grant = Grant::from_data(data)?;
        let client = ctx.client(ServiceType::IdentityV3, ctx.config().default_region()).await?;
        let list: AssignmentList = client.get_json(&grant.query()).await?;
        if list.role_assignments.is_empty() {
            let gone = ApiError::not_found(format!("role assignment {} not found", data.id()));
            return check_deleted(data, ProviderError::Client(gone.into()), "role assignment");
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let grant = Grant::from_data(data)?;
        let client = ctx.client(ServiceType::IdentityV3, ctx.config().default_region()).await?;
        client.delete(&grant.path()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCloud;
    use httpmock::prelude::*;
    use otc_core::{AttrMap, ErrorKind, Value};
    use otc_engine::Dispatcher;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn config() -> AttrMap {
        serde_json::from_value(json!({"project_id": "p-9", "user_id": "u-1", "role_id": "r-1"}))
            .unwrap()
    }

    fn assignment_query(when: httpmock::When) -> httpmock::When {
        when.method(GET)
            .path("/v3/role_assignments")
            .query_param("scope.project.id", "p-9")
            .query_param("user.id", "u-1")
            .query_param("role.id", "r-1")
    }

    #[tokio::test]
    async fn assign_read_and_import() {
        let cloud = MockCloud::start();
        let assign = cloud.server.mock(|when, then| {
            when.method(PUT).path("/v3/projects/p-9/users/u-1/roles/r-1");
            then.status(204);
        });
        cloud.server.mock(|when, then| {
            assignment_query(when);
            then.status(200).json_body(json!({"role_assignments": [{
                "role": {"id": "r-1"}, "user": {"id": "u-1"},
                "scope": {"project": {"id": "p-9"}}
            }]}));
        });

        let dispatcher = Dispatcher::new(cloud.config.clone(), CancellationToken::new());
        let created = dispatcher
            .create(&RoleAssignment, config())
            .await
            .into_result()
            .unwrap()
            .unwrap();
        assign.assert();
        assert_eq!(created.id, "/p-9//u-1/r-1");

        let imported = dispatcher
            .import(&RoleAssignment, "/p-9//u-1/r-1")
            .await
            .unwrap();
        assert_eq!(imported.get("project_id"), Some(&Value::from("p-9")));
        assert_eq!(imported.get("domain_id"), None);
        assert_eq!(imported.attributes, created.attributes);
    }

    #[tokio::test]
    async fn revoked_assignment_is_removed_from_state() {
        let cloud = MockCloud::start();
        cloud.server.mock(|when, then| {
            assignment_query(when);
            then.status(200).json_body(json!({"role_assignments": []}));
        });
        let dispatcher = Dispatcher::new(cloud.config.clone(), CancellationToken::new());
        let state = otc_core::ResourceState::new("/p-9//u-1/r-1", config(), 0);
        assert_eq!(dispatcher.read(&RoleAssignment, &state).await.unwrap(), None);
    }

    #[tokio::test]
    async fn scope_and_actor_must_be_unambiguous() {
        let cloud = MockCloud::start();
        let dispatcher = Dispatcher::new(cloud.config.clone(), CancellationToken::new());
        let mut both = config();
        both.insert("domain_id".to_string(), Value::from("d-1"));
        let outcome = dispatcher.create(&RoleAssignment, both).await;
        let err = outcome.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(err.to_string().contains("domain_id and project_id"));
        assert!(outcome.state.is_none());
    }

    #[test]
    fn every_attribute_forces_replacement() {
        let schema = RoleAssignment.schema();
        assert!(schema.attributes.values().all(|attribute| attribute.force_new));
    }
}
