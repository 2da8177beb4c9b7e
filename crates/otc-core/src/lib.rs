//! core value model, schemas and shared primitives for the otc provider.

pub mod error;
pub mod id;
pub mod schema;
pub mod state;
pub mod tags;
pub mod validation;
pub mod value;

pub use error::{ErrorKind, Operation};
pub use id::{IdError, ImportPath, Segment};
pub use schema::{
    parse_duration, AttrType, Attribute, ProviderSchema, ResourceSchema, Timeouts, Validator,
    TIMEOUTS_ATTRIBUTE,
};
pub use state::{ResourceState, ID_ATTRIBUTE};
pub use tags::{diff_tags, map_to_tags, tags_from_value, tags_to_map, Tag, TagDiff, TagMap, TagMode};
pub use validation::{validate_config, ValidationError, ValidationReport};
pub use value::{AttrMap, AttrPath, PathStep, Value, ValueError};
