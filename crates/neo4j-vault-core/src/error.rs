use thiserror::Error;

/// Errors raised while decoding or validating connection configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connection_url cannot be empty")]
    EmptyConnectionUrl,

    #[error("{field} must be >= 0")]
    NegativeTimeout { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("connection producer is already initialized")]
    AlreadyInitialized,
}

/// Errors raised while parsing a creation statement.
#[derive(Error, Debug)]
pub enum StatementError {
    #[error("failed to decode creation statement: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("roles array is required in creation statement")]
    MissingRoles,
}
