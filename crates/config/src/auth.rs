//! Client and admin authentication settings.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Client-facing authentication settings.
///
/// An empty `allowed_keys` list disables client authentication entirely;
/// every request is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientAuthConfig {
    /// The set of credentials clients may present.
    pub allowed_keys: Vec<SecretString>,
}

impl ClientAuthConfig {
    /// Whether authentication is enforced at all.
    pub fn enabled(&self) -> bool {
        !self.allowed_keys.is_empty()
    }

    /// Check a presented credential against the allowed set.
    pub fn allows(&self, presented: &str) -> bool {
        self.allowed_keys.iter().any(|key| key.expose_secret() == presented)
    }
}

/// Admin authentication settings.
///
/// The admin HTTP surface lives outside the proxy core; these fields are
/// parsed so a snapshot round-trips the full file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminAuthConfig {
    /// Admin login name.
    pub username: String,
    /// Hash of the admin password.
    pub password_hash: SecretString,
    /// Secret used to sign admin session tokens.
    pub jwt_secret: SecretString,
}
