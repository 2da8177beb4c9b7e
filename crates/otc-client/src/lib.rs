//! authenticated service clients for open telekom cloud.

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod services;
pub mod signer;
pub mod source;

pub use auth::{Authenticator, Scope, Session};
pub use catalog::{Catalog, CatalogEntry, Endpoint};
pub use client::ServiceClient;
pub use config::{Config, REGION_ATTRIBUTE};
pub use credentials::{Credentials, DomainRef};
pub use error::{classify_status, parse_envelope, ApiError, ClientError};
pub use services::{resolve_endpoint, EndpointContext, ServiceScope, ServiceSpec, ServiceType};
pub use signer::Signer;
pub use source::{ConfigSource, ProviderOptions};
