//! host-side resource state record.

use crate::value::{AttrMap, Value};
use serde::{Deserialize, Serialize};

/// attribute under which the resource id is mirrored.
pub const ID_ATTRIBUTE: &str = "id";

/// per-instance state as persisted by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// remote identifier; empty once the resource is gone.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: AttrMap,
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub tainted: bool,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, attributes: AttrMap, schema_version: u32) -> Self {
        let mut state = Self {
            id: id.into(),
            attributes,
            schema_version,
            tainted: false,
        };
        state.sync_id_attribute();
        state
    }

    /// whether the record still points at a remote object.
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// keep the `id` attribute in step with the id field.
    pub fn sync_id_attribute(&mut self) {
        if self.id.is_empty() {
            self.attributes.remove(ID_ATTRIBUTE);
        } else {
            self.attributes
                .insert(ID_ATTRIBUTE.to_string(), Value::String(self.id.clone()));
        }
    }
}
