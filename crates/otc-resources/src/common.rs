//! pieces every handler needs: region and tag attributes, clients, poll observations.

use otc_client::{ClientError, ServiceClient, ServiceType, REGION_ATTRIBUTE};
use otc_core::{AttrType, Attribute, Validator};
use otc_engine::{Observed, OpContext, ProviderError, ResourceData};
use std::sync::Arc;

/// target state of a deletion wait: the object answers 404.
pub(crate) const DELETED: &str = "deleted";

pub(crate) fn region_attribute() -> Attribute {
    Attribute::optional_computed(AttrType::String)
        .force_new()
        .describe("region of the resource, defaults to the provider region")
}

pub(crate) fn tags_attribute() -> Attribute {
    Attribute::optional(AttrType::map(AttrType::String)).validate(Validator::Tags {
        max_key: 36,
        max_value: 43,
    })
}

/// client for `service` in the region the resource declares.
pub(crate) async fn client(
    ctx: &OpContext,
    service: ServiceType,
    data: &ResourceData,
) -> Result<Arc<ServiceClient>, ProviderError> {
    ctx.client_for_attrs(service, data.attributes()).await
}

pub(crate) fn project_id(client: &ServiceClient) -> Result<&str, ProviderError> {
    client
        .project_id()
        .ok_or_else(|| ClientError::init(client.service(), "no project is in scope").into())
}

/// remember the region a resource lives in.
pub(crate) fn set_region(data: &mut ResourceData, client: &ServiceClient) {
    data.set(REGION_ATTRIBUTE, client.region());
}

/// map a refresh onto a poll observation; 404 means not found.
pub(crate) fn observe<T>(
    result: Result<T, ClientError>,
    status: impl FnOnce(&T) -> String,
) -> Result<Option<Observed<T>>, ProviderError> {
    match result {
        Ok(object) => {
            let state = status(&object);
            Ok(Some(Observed::new(object, state)))
        }
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// like [`observe`], but a 404 is the [`DELETED`] target.
pub(crate) fn observe_deletion<T>(
    result: Result<T, ClientError>,
    status: impl FnOnce(&T) -> String,
) -> Result<Option<Observed<()>>, ProviderError> {
    match result {
        Ok(object) => Ok(Some(Observed::new((), status(&object)))),
        Err(err) if err.is_not_found() => Ok(Some(Observed::new((), DELETED))),
        Err(err) => Err(err.into()),
    }
}
