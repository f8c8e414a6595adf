use axum::http::HeaderMap;
use secrecy::SecretString;

/// Runtime context carried alongside a decoded request.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    /// The credential the client presented, in whichever header its wire
    /// format uses. Also forwarded upstream under key passthrough.
    pub client_key: Option<SecretString>,
}

/// Pull a bearer token out of the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Credential extraction for OpenAI-format requests.
pub(crate) fn openai_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        client_key: bearer_token(headers).map(SecretString::from),
    }
}

/// Credential extraction for Anthropic-format requests.
pub(crate) fn anthropic_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        client_key: header_value(headers, "x-api-key")
            .or_else(|| bearer_token(headers))
            .map(SecretString::from),
    }
}

/// Credential extraction for Gemini-format requests, which may carry the
/// key as a query parameter.
pub(crate) fn gemini_context(headers: &HeaderMap, query_key: Option<String>) -> RequestContext {
    RequestContext {
        client_key: query_key
            .or_else(|| header_value(headers, "x-goog-api-key"))
            .or_else(|| bearer_token(headers))
            .map(SecretString::from),
    }
}
