use thiserror::Error;

/// Errors produced when validating telemetry records and keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("record carries no ordering time (ERT, SCET, SCLK or LST)")]
    MissingOrderingTime,

    #[error("key component {component} must not be empty")]
    EmptyComponent { component: &'static str },

    #[error("key identifier {key} does not match payload identifier {payload}")]
    IdentifierMismatch { key: String, payload: String },

    #[error("invalid time type: {0}")]
    InvalidTimeType(String),
}

/// Result alias for type-level validation.
pub type TypeResult<T> = Result<T, TypeError>;
