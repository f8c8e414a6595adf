//! Toolify configuration structures to map the toolify.toml configuration.

#![deny(missing_docs)]

mod auth;
mod features;
mod loader;
mod server;
mod upstream;
mod watcher;

use std::path::Path;

pub use auth::{AdminAuthConfig, ClientAuthConfig};
pub use features::FeaturesConfig;
use serde::Deserialize;
pub use server::ServerConfig;
pub use upstream::{ServiceType, UpstreamService};
pub use watcher::ConfigWatcher;

/// Main configuration structure for the Toolify proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream LLM services in configuration order.
    pub upstream_services: Vec<UpstreamService>,
    /// Client-facing authentication settings.
    pub client_authentication: ClientAuthConfig,
    /// Admin authentication settings. Parsed and carried for the admin
    /// surface; the proxy core consumes none of it.
    pub admin_authentication: Option<AdminAuthConfig>,
    /// Global feature toggles.
    pub features: FeaturesConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration can serve requests.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }

    /// Whether a given upstream should have the tool prompt injected,
    /// resolving the per-service tri-state against the global default.
    pub fn injection_enabled(&self, service: &UpstreamService) -> bool {
        if !self.features.enable_function_calling {
            return false;
        }

        service
            .inject_function_calling
            .unwrap_or(self.features.inject_function_calling)
    }

    /// Whether a given upstream uses the optimized prompt variant.
    pub fn optimized_prompt(&self, service: &UpstreamService) -> bool {
        service.optimize_prompt.unwrap_or(self.features.optimize_prompt)
    }
}
