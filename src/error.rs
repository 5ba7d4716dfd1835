use arrow_schema::ArrowError;
use strum_macros::{Display, EnumDiscriminants};

use crate::import::ImportSummary;
use crate::repository::interface::Error as RepositoryError;

/// Everything that can go wrong while compiling, validating or executing a
/// request. `ErrorKind` is the payload-free discriminant, handy for matching
/// in callers and tests.
#[derive(Debug, thiserror::Error, EnumDiscriminants)]
#[strum_discriminants(name(ErrorKind), derive(Display))]
pub enum Error {
    #[error("Statement rejected by the safety check: {reason}")]
    InjectionRejected { reason: String },

    #[error("Value {value:?} for {field:?} is not a valid {expected}")]
    TypeMismatch {
        field: String,
        expected: String,
        value: String,
    },

    #[error("{reason}")]
    InvalidRequest { reason: String },

    #[error("Field {name:?} does not exist")]
    UnknownField { name: String },

    #[error("Required field {name:?} is missing")]
    MissingRequiredField { name: String },

    #[error("{object} {name:?} already exists")]
    NameCollision { object: &'static str, name: String },

    #[error("{reason}")]
    LimitExceeded { reason: String },

    #[error("{0}")]
    PartialImportFailure(ImportSummary),

    #[error("Backend execution failed: {reason}")]
    BackendExecutionFailure { reason: String },

    #[error("{object} {id} does not exist")]
    NotFound { object: &'static str, id: i64 },

    #[error("{object} {id} is still referenced by {count} flow(s)")]
    StillReferenced {
        object: &'static str,
        id: i64,
        count: i64,
    },

    #[error("Internal catalog error: {0:?}")]
    Catalog(RepositoryError),

    #[error("Error reading or writing a tabular file: {0}")]
    File(#[from] ArrowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.into()
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::InjectionRejected {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn type_mismatch(field: &str, expected: &str, value: impl ToString) -> Self {
        Self::TypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            value: value.to_string(),
        }
    }

    /// Transport and backend-reported failures are the only ones worth
    /// retrying: everything else would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendExecutionFailure { .. })
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        Self::Catalog(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Catalog(RepositoryError::SqlxError(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::BackendExecutionFailure {
            reason: err.to_string(),
        }
    }
}
