use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The poll interval must be at least one second.
    #[error("`poll_interval_secs` must be at least 1, got {0}")]
    PollIntervalTooShort(u64),
    /// The fetch timeout cannot be zero.
    #[error("`fetch_timeout_ms` cannot be zero")]
    FetchTimeoutZero,
    #[error("`batch.max_size` cannot be zero")]
    BatchMaxSizeZero,
    #[error("`batch.max_fill_ms` cannot be zero")]
    BatchMaxFillZero,
    /// A required identifier was left empty.
    #[error("`{0}` cannot be empty")]
    EmptyIdentifier(&'static str),
    #[error("the table must declare at least one field")]
    NoFields,
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
    /// The change or primary key column is not part of the declared fields.
    #[error("the {role} column `{column}` is not declared in the table fields")]
    MissingColumn { role: &'static str, column: String },
    #[error("the change column `{0}` must be of type `datetime` or `integer`")]
    InvalidChangeColumnType(String),
    #[error("the primary key column `{0}` must be of type `integer` or `string`")]
    InvalidPrimaryKeyType(String),
    #[error("the primary key column `{0}` must be `required`")]
    NullablePrimaryKey(String),
    #[error("BigQuery service account key file does not exist: {0}")]
    MissingServiceAccountKey(String),
    #[error("`max_staleness_mins` should not exceed 1440 minutes, got {0}")]
    MaxStalenessTooLarge(u16),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
