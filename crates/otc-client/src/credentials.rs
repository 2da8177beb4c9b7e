//! credential group selection.

use crate::error::ClientError;
use crate::source::ProviderOptions;
use std::fmt;
use tracing::warn;

/// the credential group the provider authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// pre-issued iam token.
    Token { token: String },
    /// access key pair, optionally temporary.
    AkSk {
        access_key: String,
        secret_key: String,
        security_token: Option<String>,
    },
    /// user name and password in a domain.
    Password {
        user_name: String,
        password: String,
        domain: DomainRef,
    },
}

/// a domain given by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRef {
    Id(String),
    Name(String),
}

impl Credentials {
    /// pick the highest priority complete group: token, then ak/sk, then password.
    pub fn select(options: &ProviderOptions) -> Result<Self, ClientError> {
        let mut complete = Vec::new();

        if let Some(token) = non_empty(&options.token) {
            complete.push(Credentials::Token {
                token: token.to_string(),
            });
        }
        if let (Some(access_key), Some(secret_key)) =
            (non_empty(&options.access_key), non_empty(&options.secret_key))
        {
            complete.push(Credentials::AkSk {
                access_key: access_key.to_string(),
                secret_key: secret_key.to_string(),
                security_token: non_empty(&options.security_token).map(str::to_string),
            });
        }
        if let (Some(user_name), Some(password), Some(domain)) = (
            non_empty(&options.user_name),
            non_empty(&options.password),
            domain_ref(options),
        ) {
            complete.push(Credentials::Password {
                user_name: user_name.to_string(),
                password: password.to_string(),
                domain,
            });
        }

        let mut groups = complete.into_iter();
        let selected = groups
            .next()
            .ok_or_else(|| ClientError::Auth("no complete credential group".to_string()))?;
        let ignored: Vec<&str> = groups.map(|group| group.label()).collect();
        if !ignored.is_empty() {
            warn!(
                selected = selected.label(),
                ignored = %ignored.join(", "),
                "several credential groups are complete"
            );
        }
        Ok(selected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Credentials::Token { .. } => "token",
            Credentials::AkSk { .. } => "ak/sk",
            Credentials::Password { .. } => "password",
        }
    }

    /// whether a fresh scope can be negotiated for another project.
    pub fn can_rescope(&self) -> bool {
        !matches!(self, Credentials::Token { .. })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
            Credentials::AkSk { access_key, .. } => f
                .debug_struct("AkSk")
                .field("access_key", access_key)
                .finish_non_exhaustive(),
            Credentials::Password {
                user_name, domain, ..
            } => f
                .debug_struct("Password")
                .field("user_name", user_name)
                .field("domain", domain)
                .finish_non_exhaustive(),
        }
    }
}

/// domain of the options, id preferred over name.
pub fn domain_ref(options: &ProviderOptions) -> Option<DomainRef> {
    non_empty(&options.domain_id)
        .map(|id| DomainRef::Id(id.to_string()))
        .or_else(|| non_empty(&options.domain_name).map(|name| DomainRef::Name(name.to_string())))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}
