//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables (`SERVER__*`, double-underscore separated to
//! address nested fields).

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address to bind the HTTP listener to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// JWT validation configuration.
    pub jwt: JwtConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// JWT Bearer-token validation configuration.
///
/// Ad hoc: validates a symmetric HS256 secret rather than a full OIDC
/// issuer, since issuance is out of scope here.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 verification secret.
    pub secret: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration (`database_url`, `jwt.secret`) is missing.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
