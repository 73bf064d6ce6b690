use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// TLS settings shared by the source and state store connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Checks that certificates are present whenever TLS is enabled.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts a connection configuration into the connect options of a specific driver.
pub trait IntoConnectOptions<Output> {
    /// Connect options without a database selected.
    fn without_db(&self) -> Output;

    /// Connect options for the configured database.
    fn with_db(&self) -> Output;
}

/// Connection to the MySQL database holding the polled table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    /// Name of the database containing the source table.
    pub name: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyIdentifier("source.host"));
        }

        if self.name.is_empty() {
            return Err(ValidationError::EmptyIdentifier("source.name"));
        }

        if self.username.is_empty() {
            return Err(ValidationError::EmptyIdentifier("source.username"));
        }

        self.tls.validate()
    }
}

impl IntoConnectOptions<MySqlConnectOptions> for SourceConfig {
    fn without_db(&self) -> MySqlConnectOptions {
        let ssl_mode = if self.tls.enabled {
            MySqlSslMode::VerifyIdentity
        } else {
            MySqlSslMode::Preferred
        };

        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .ssl_mode(ssl_mode);

        if self.tls.enabled {
            options = options.ssl_ca_from_pem(self.tls.trusted_root_certs.clone().into_bytes());
        }

        if let Some(password) = &self.password {
            options.password(password.expose_secret())
        } else {
            options
        }
    }

    fn with_db(&self) -> MySqlConnectOptions {
        let options: MySqlConnectOptions = self.without_db();
        options.database(&self.name)
    }
}

/// Connection to a Postgres database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyIdentifier("state_store.postgres.host"));
        }

        if self.name.is_empty() {
            return Err(ValidationError::EmptyIdentifier("state_store.postgres.name"));
        }

        self.tls.validate()
    }
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };

        let options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .username(&self.username)
            .port(self.port)
            .ssl_mode(ssl_mode)
            .ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes());

        if let Some(password) = &self.password {
            options.password(password.expose_secret())
        } else {
            options
        }
    }

    fn with_db(&self) -> PgConnectOptions {
        let options: PgConnectOptions = self.without_db();
        options.database(&self.name)
    }
}
