//! Upstream LLM service configuration.

use std::fmt;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Wire format spoken by an upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// OpenAI Chat Completions.
    Openai,
    /// Anthropic Messages.
    Anthropic,
    /// Google Gemini generateContent.
    Gemini,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Openai => f.write_str("openai"),
            ServiceType::Anthropic => f.write_str("anthropic"),
            ServiceType::Gemini => f.write_str("gemini"),
        }
    }
}

/// One configured upstream LLM service.
///
/// Immutable for the lifetime of a configuration snapshot. An upstream with
/// an empty `api_key` is a valid placeholder; the router skips it at request
/// time unless key passthrough supplies a credential.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamService {
    /// Unique service name, used in logs and error messages.
    pub name: String,
    /// Wire format this upstream speaks.
    pub service_type: ServiceType,
    /// Base URL override. Defaults to the vendor endpoint for the type.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Credential sent upstream.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Routing priority, higher is preferred. Ties resolve in
    /// configuration order.
    #[serde(default)]
    pub priority: i32,
    /// Models this upstream advertises. Empty means wildcard.
    #[serde(default)]
    pub models: Vec<String>,
    /// Client model name to upstream model name rewrites, applied before
    /// matching against `models`.
    #[serde(default)]
    pub model_mapping: IndexMap<String, String>,
    /// Tri-state tool-prompt injection switch. `None` inherits
    /// `features.inject_function_calling`.
    #[serde(default)]
    pub inject_function_calling: Option<bool>,
    /// Tri-state optimized prompt switch. `None` inherits
    /// `features.optimize_prompt`.
    #[serde(default)]
    pub optimize_prompt: Option<bool>,
}

impl UpstreamService {
    /// Apply `model_mapping` to a client-requested model name.
    pub fn map_model<'a>(&'a self, requested: &'a str) -> &'a str {
        self.model_mapping.get(requested).map(String::as_str).unwrap_or(requested)
    }

    /// Whether this upstream advertises the (already mapped) model.
    pub fn serves_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }

    /// Whether a usable credential is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().is_empty())
    }
}
