//! diff prior state against configuration.

use otc_core::{AttrMap, ResourceSchema, ResourceState, Value, ID_ATTRIBUTE, TIMEOUTS_ATTRIBUTE};
use serde::{Deserialize, Serialize};

/// what applying a planned change will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    Create,
    Update,
    /// delete then create, forced by a `force_new` attribute or a tainted prior.
    Replace,
    Delete,
}

/// attribute-level change for an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub name: String,
    /// value in prior state.
    pub from: Value,
    /// value after apply; null when the remote decides.
    pub to: Value,
    pub force_new: bool,
}

/// planned state plus the changes that lead to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub action: Action,
    /// attributes to apply; `None` for a delete.
    pub planned: Option<AttrMap>,
    pub changes: Vec<AttributeChange>,
    pub requires_replace: Vec<String>,
}

impl PlannedChange {
    fn new(action: Action, planned: Option<AttrMap>) -> Self {
        Self {
            action,
            planned,
            changes: Vec::new(),
            requires_replace: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action == Action::NoOp
    }
}

/// fill defaults from the schema and coerce types.
pub fn apply_defaults(schema: &ResourceSchema, config: &AttrMap) -> AttrMap {
    let mut planned = schema.coerce(config.clone());
    for (name, attribute) in &schema.attributes {
        let absent = planned.get(name).map_or(true, Value::is_null);
        if let (true, Some(default)) = (absent, &attribute.default) {
            planned.insert(name.clone(), default.clone());
        }
    }
    planned
}

/// compute the change that moves `prior` to `config`.
///
/// computed values the configuration leaves open are carried over from
/// prior state, so re-planning an applied configuration yields no changes.
pub fn plan_change(
    schema: &ResourceSchema,
    prior: Option<&ResourceState>,
    config: Option<&AttrMap>,
) -> PlannedChange {
    let prior = prior.filter(|state| state.exists());
    let (prior, config) = match (prior, config) {
        (None, None) => return PlannedChange::new(Action::NoOp, None),
        (Some(_), None) => return PlannedChange::new(Action::Delete, None),
        (None, Some(config)) => {
            return PlannedChange::new(Action::Create, Some(apply_defaults(schema, config)))
        }
        (Some(prior), Some(config)) => (prior, config),
    };

    let mut planned = apply_defaults(schema, config);
    let mut change = PlannedChange::new(Action::NoOp, None);
    for (name, attribute) in &schema.attributes {
        if name == ID_ATTRIBUTE || name == TIMEOUTS_ATTRIBUTE {
            continue;
        }
        let configured = planned.get(name).filter(|value| !value.is_empty()).cloned();
        let before = prior.get(name).filter(|value| !value.is_empty()).cloned();

        if attribute.computed && configured.is_none() {
            if let Some(before) = before {
                planned.insert(name.clone(), before);
            }
            continue;
        }
        if configured == before {
            continue;
        }
        if attribute.force_new {
            change.requires_replace.push(name.clone());
        }
        change.changes.push(AttributeChange {
            name: name.clone(),
            from: before.unwrap_or(Value::Null),
            to: configured.unwrap_or(Value::Null),
            force_new: attribute.force_new,
        });
    }
    planned.insert(ID_ATTRIBUTE.to_string(), Value::from(prior.id.clone()));

    change.action = if prior.tainted || !change.requires_replace.is_empty() {
        Action::Replace
    } else if change.changes.is_empty() {
        Action::NoOp
    } else {
        Action::Update
    };
    change.planned = Some(planned);
    change
}
