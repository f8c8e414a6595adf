//! Global feature toggles.

use serde::Deserialize;

/// Global feature toggles.
///
/// Per-service tri-state options on [`crate::UpstreamService`] override the
/// corresponding globals here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesConfig {
    /// Master switch for every form of tool handling. When off, tool
    /// declarations pass through untouched and injection never happens.
    pub enable_function_calling: bool,
    /// Default for upstreams that do not set `inject_function_calling`.
    pub inject_function_calling: bool,
    /// Default for upstreams that do not set `optimize_prompt`.
    pub optimize_prompt: bool,
    /// Forward the client's own credential to upstreams configured without
    /// an `api_key`.
    pub key_passthrough: bool,
    /// Forward unmatched model names verbatim to wildcard upstreams.
    pub model_passthrough: bool,
    /// Log filter applied when the binary gets no `--log` argument.
    pub log_level: Option<String>,
    /// Custom injected-prompt template. `{tools}` is replaced with the
    /// rendered tool list.
    pub prompt_template: Option<String>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enable_function_calling: true,
            inject_function_calling: false,
            optimize_prompt: false,
            key_passthrough: false,
            model_passthrough: false,
            log_level: None,
            prompt_template: None,
        }
    }
}
