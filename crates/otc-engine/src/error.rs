//! engine level errors and their mapping onto the shared taxonomy.

use crate::quota::QuotaError;
use otc_client::ClientError;
use otc_core::{ErrorKind, IdError, Operation, ValidationReport};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// aggregate that keeps every constituent cause.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiError<E> {
    errors: Vec<E>,
}

impl<E> MultiError<E> {
    pub fn new(errors: Vec<E>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [single] => write!(f, "1 error occurred: {single}"),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for error in errors {
                    write!(f, "\n\t* {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for MultiError<E> {}

/// failure of a provider operation before it is attributed to a resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("timeout while waiting for state to become {target} (last state: {}, timeout: {timeout:?})", .last_state.as_deref().unwrap_or("none"))]
    PollTimeout {
        target: String,
        last_state: Option<String>,
        timeout: Duration,
    },
    #[error("unexpected state {state:?}, wanted target {target}")]
    UnexpectedState { state: String, target: String },
    #[error("{what} not found after {checks} checks")]
    Vanished { what: String, checks: u32 },
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("invalid configuration: {0}")]
    Validation(String),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("{0} finished without setting an id")]
    MissingId(Operation),
    #[error("provider is not configured")]
    NotConfigured,
    #[error("unknown {category} type {name}")]
    UnknownType { category: &'static str, name: String },
    #[error(transparent)]
    Operation(Box<OperationError>),
    #[error(transparent)]
    Multi(MultiError<ProviderError>),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Client(err) => err.kind(),
            ProviderError::Quota(err) => err.kind(),
            ProviderError::PollTimeout { .. } => ErrorKind::PollTimeout,
            ProviderError::UnexpectedState { .. } => ErrorKind::UnexpectedState,
            ProviderError::Vanished { .. } => ErrorKind::NotFound,
            ProviderError::Cancelled(_) => ErrorKind::Cancelled,
            ProviderError::Validation(_) | ProviderError::Id(_) => ErrorKind::ValidationFailed,
            ProviderError::UnknownType { .. } => ErrorKind::ValidationFailed,
            ProviderError::NotConfigured => ErrorKind::ClientInitFailed,
            ProviderError::MissingId(_) => ErrorKind::Unknown,
            ProviderError::Operation(err) => err.kind(),
            ProviderError::Multi(errors) => errors
                .errors()
                .first()
                .map(ProviderError::kind)
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_retryable(&self, operation: Operation) -> bool {
        self.kind().is_retryable(operation)
    }

    pub fn validation(report: &ValidationReport) -> Self {
        ProviderError::Validation(report.to_string())
    }

    /// combine several failures; a single failure is returned as-is.
    pub fn aggregate(mut errors: Vec<ProviderError>) -> Self {
        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }
        ProviderError::Multi(MultiError::new(errors))
    }
}

/// a provider error attributed to one resource operation.
#[derive(Debug)]
pub struct OperationError {
    pub operation: Operation,
    pub resource_type: String,
    pub id: Option<String>,
    pub source: ProviderError,
}

impl OperationError {
    pub fn new(
        operation: Operation,
        resource_type: impl Into<String>,
        id: Option<&str>,
        source: ProviderError,
    ) -> Self {
        Self {
            operation,
            resource_type: resource_type.into(),
            id: id.filter(|id| !id.is_empty()).map(str::to_string),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.resource_type)?;
        if let Some(id) = &self.id {
            write!(f, " ({id})")?;
        }
        write!(f, ": {}", self.source)
    }
}

impl From<OperationError> for ProviderError {
    fn from(err: OperationError) -> Self {
        ProviderError::Operation(Box::new(err))
    }
}

impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
