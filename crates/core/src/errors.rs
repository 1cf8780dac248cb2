use thiserror::Error;

use crate::attachments::AttachmentError;
use crate::flows::{CascadeStep, FlowTransitionError};
use crate::{domain::quote::QuoteStatus, store::StoreError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid quote transition from {from:?} to {to:?}")]
    InvalidQuoteTransition { from: QuoteStatus, to: QuoteStatus },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{collection} `{id}` not found")]
    NotFound { collection: String, id: String },
    #[error("{collection} quota of {limit} reached")]
    QuotaExceeded { collection: String, limit: u64, hint: String },
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("{collection} `{id}` already exists")]
    Conflict { collection: String, id: String },
    #[error("cascade stopped at `{failed_step}` after {completed:?}: {message}")]
    PartialCascadeFailure { completed: Vec<CascadeStep>, failed_step: CascadeStep, message: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { collection, id } => Self::Conflict { collection, id },
            StoreError::InvalidField(field) => {
                Self::ValidationFailed(format!("invalid field name `{field}`"))
            }
            StoreError::MissingId => Self::ValidationFailed("record is missing an id".to_owned()),
            StoreError::Backend(message) | StoreError::Decode(message) => Self::Persistence(message),
        }
    }
}

impl From<AttachmentError> for ApplicationError {
    fn from(value: AttachmentError) -> Self {
        match value {
            AttachmentError::InvalidPath(path) => {
                Self::ValidationFailed(format!("invalid attachment name `{path}`"))
            }
            AttachmentError::NotFound(path) => {
                Self::NotFound { collection: "attachments".to_owned(), id: path }
            }
            AttachmentError::Io(message) => Self::Persistence(message),
            AttachmentError::Signing(message) => Self::Configuration(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String, limit: u64, hint: String, correlation_id: String },
    #[error("partially completed: {message}")]
    PartialSuccess { message: String, failed_step: CascadeStep, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. } => {
                format!("The request could not be processed: {message}. Check inputs and try again.")
            }
            Self::Forbidden { .. } => {
                "You do not have permission to perform this action. Ask an administrator for access."
                    .to_owned()
            }
            Self::NotFound { .. } => "The requested record does not exist.".to_owned(),
            Self::Conflict { .. } => "A record with the same identity already exists.".to_owned(),
            Self::QuotaExceeded { limit, hint, .. } => {
                format!("Your plan allows {limit} per period and that limit is reached; {hint}.")
            }
            Self::PartialSuccess { failed_step, .. } => failed_step.recovery_hint().to_owned(),
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_owned()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_owned(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::QuotaExceeded { correlation_id, .. }
            | Self::PartialSuccess { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn correlation_id_mut(&mut self) -> &mut String {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::QuotaExceeded { correlation_id, .. }
            | Self::PartialSuccess { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        *mapped.correlation_id_mut() = correlation_id.into();
        mapped
    }

    /// Stable error class used in CLI payloads and logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::ValidationFailed(_) | Self::Domain(_) => "validation",
            Self::Conflict { .. } => "conflict",
            Self::PartialCascadeFailure { .. } => "partial_cascade_failure",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

const UNASSIGNED: &str = "unassigned";

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::ValidationFailed(message) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Unauthorized(message) => Self::Forbidden { message, correlation_id },
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::Conflict { .. } => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::QuotaExceeded { collection, limit, hint } => Self::QuotaExceeded {
                message: format!("{collection} quota of {limit} reached"),
                limit,
                hint,
                correlation_id,
            },
            ApplicationError::PartialCascadeFailure { failed_step, message, .. } => {
                Self::PartialSuccess { message, failed_step, correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
