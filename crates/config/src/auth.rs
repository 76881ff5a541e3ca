//! Authentication configuration.

use secrecy::SecretString;
use serde::Deserialize;

/// Client-facing API key authentication.
///
/// An empty `allowed_keys` list disables client authentication entirely.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientAuthConfig {
    /// API keys accepted from clients on any protocol endpoint.
    pub allowed_keys: Vec<SecretString>,
}

/// Credentials for the external admin surface.
///
/// This process only parses and carries these values; the admin HTTP API that
/// consumes them lives outside this repository.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminAuthConfig {
    /// Admin login name.
    pub username: String,
    /// Bcrypt hash of the admin password.
    pub password_hash: SecretString,
    /// Secret used to sign admin JWTs.
    pub jwt_secret: SecretString,
}
