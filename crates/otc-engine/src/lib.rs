//! reconciliation engine: dispatcher, polling, retries, quotas and the plugin surface.

mod context;
mod data;
mod dispatch;
mod error;
mod planner;
mod protocol;
mod provider;
pub mod quota;
mod resource;
mod retry;
mod shared;
mod tags;
mod wait;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;

pub use context::{ClientKey, OpContext};
pub use data::{check_deleted, ResourceData};
pub use dispatch::{ApplyOutcome, Dispatcher};
pub use error::{MultiError, OperationError, ProviderError};
pub use planner::{apply_defaults, plan_change, Action, AttributeChange, PlannedChange};
pub use protocol::{handle_line, serve, ErrorBody};
pub use provider::Provider;
pub use quota::{acquire_many, Booking, Quota, QuotaError, QuotaPermit, QuotaRegistry};
pub use resource::{DataSource, Registry, Resource};
pub use retry::{retry, Backoff, RetryPolicy, Step};
pub use shared::Shared;
pub use tags::{read_tags, reconcile_tags, ResourceTags, TagService};
pub use wait::{Observed, WaitForState};
