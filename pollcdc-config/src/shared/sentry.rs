use serde::{Deserialize, Serialize};

/// Sentry error reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// DSN errors are reported to.
    pub dsn: String,
}
