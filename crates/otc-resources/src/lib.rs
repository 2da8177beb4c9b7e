//! resource and data source handlers of the otc provider.

mod common;
pub mod lb_member;
pub mod role_assignment;
pub mod volume;
pub mod vpc;

#[cfg(test)]
mod test_support;

use otc_core::{AttrType, Attribute};
use otc_engine::Registry;
use std::collections::BTreeMap;

pub use lb_member::LbMember;
pub use role_assignment::RoleAssignment;
pub use volume::Volume;
pub use vpc::{Vpc, VpcLookup};

/// provider-level configuration attributes.
fn provider_schema() -> BTreeMap<String, Attribute> {
    let string = || Attribute::optional(AttrType::String);
    let secret = || Attribute::optional(AttrType::String).sensitive();
    [
        ("auth_url", string()),
        ("region", string()),
        ("cloud", string()),
        ("domain_name", string()),
        ("domain_id", string()),
        ("user_name", string()),
        ("password", secret()),
        ("access_key", string()),
        ("secret_key", secret()),
        ("security_token", secret()),
        ("token", secret()),
        ("tenant_name", string()),
        ("project_id", string()),
        ("insecure", Attribute::optional(AttrType::Bool)),
        ("cacert_file", string()),
        ("cert", string()),
        ("key", secret()),
        ("request_timeout", Attribute::optional(AttrType::Int)),
        ("max_retries", Attribute::optional(AttrType::Int)),
        ("endpoints", Attribute::optional(AttrType::map(AttrType::String))),
    ]
    .into_iter()
    .map(|(name, attribute)| (name.to_string(), attribute))
    .collect()
}

/// every handler this provider ships.
pub fn registry() -> Registry {
    Registry::new()
        .with_provider_schema(provider_schema())
        .register(Vpc)
        .register(Volume)
        .register(LbMember)
        .register(RoleAssignment)
        .register_data_source(VpcLookup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_every_type() {
        let registry = registry();
        let schema = registry.schema();
        let resources: Vec<&str> = schema.resources.keys().map(String::as_str).collect();
        assert_eq!(
            resources,
            vec![
                "otc_blockstorage_volume_v2",
                "otc_identity_role_assignment_v3",
                "otc_lb_member_v2",
                "otc_vpc_v1",
            ]
        );
        assert!(schema.data_sources.contains_key("otc_vpc_v1"));
        assert!(schema.provider["password"].sensitive);
    }
}
