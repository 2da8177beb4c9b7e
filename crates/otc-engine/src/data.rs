//! attribute access for resource callbacks.

use crate::error::ProviderError;
use otc_core::{AttrMap, ResourceState, TagMap, Value, ID_ATTRIBUTE};
use tracing::warn;

/// the attributes a callback reads from and writes to.
///
/// `old` is what the host last persisted, `new` is what the callback works
/// towards; reads see `new`, writes land in `new`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    id: String,
    old: AttrMap,
    new: AttrMap,
}

impl ResourceData {
    /// data for a create: nothing exists yet.
    pub fn for_create(planned: AttrMap) -> Self {
        Self {
            id: String::new(),
            old: AttrMap::new(),
            new: planned,
        }
    }

    /// data for a read, delete or refresh of persisted state.
    pub fn for_state(state: &ResourceState) -> Self {
        Self {
            id: state.id.clone(),
            old: state.attributes.clone(),
            new: state.attributes.clone(),
        }
    }

    /// data for an update from `prior` towards `planned`.
    pub fn for_update(prior: &ResourceState, planned: AttrMap) -> Self {
        Self {
            id: prior.id.clone(),
            old: prior.attributes.clone(),
            new: planned,
        }
    }

    /// data for an import: only the id and the attributes split from it.
    pub fn for_import(id: impl Into<String>, attrs: AttrMap) -> Self {
        Self {
            id: id.into(),
            old: AttrMap::new(),
            new: attrs,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// mark the remote object as gone.
    pub fn clear_id(&mut self) {
        self.id.clear();
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.new.get(name).filter(|value| !value.is_null())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// string attribute that must be present.
    pub fn require_str(&self, name: &str) -> Result<&str, ProviderError> {
        self.get_str(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ProviderError::Validation(format!("attribute {name} is required")))
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_tags(&self, name: &str) -> TagMap {
        otc_core::tags_from_value(self.get(name))
    }

    /// value last persisted by the host.
    pub fn get_old(&self, name: &str) -> Option<&Value> {
        self.old.get(name).filter(|value| !value.is_null())
    }

    pub fn get_change(&self, name: &str) -> (Option<&Value>, Option<&Value>) {
        (self.get_old(name), self.get(name))
    }

    pub fn has_change(&self, name: &str) -> bool {
        let (old, new) = self.get_change(name);
        normalized(old) != normalized(new)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.new.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.new.remove(name);
    }

    pub fn attributes(&self) -> &AttrMap {
        &self.new
    }

    pub fn old_attributes(&self) -> &AttrMap {
        &self.old
    }

    /// state record to hand back to the host.
    pub fn to_state(&self, schema_version: u32) -> ResourceState {
        let mut attributes = self.new.clone();
        attributes.remove(ID_ATTRIBUTE);
        ResourceState::new(self.id.clone(), attributes, schema_version)
    }
}

/// treat absent, null and empty collections alike.
fn normalized(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_empty())
}

/// the read idiom: a not-found error clears the id instead of failing.
pub fn check_deleted(
    data: &mut ResourceData,
    err: ProviderError,
    what: &str,
) -> Result<(), ProviderError> {
    if err.is_not_found() {
        warn!(id = data.id(), what, "remote object is gone, removing from state");
        data.clear_id();
        return Ok(());
    }
    Err(err)
}
