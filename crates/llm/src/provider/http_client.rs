use std::time::Duration;

use axum::http;
use reqwest::Client;

/// How long the initial TCP/TLS handshake may take per attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared upstream HTTP client.
///
/// `read_timeout` is the per-request deadline from the configuration: it
/// resets on every received byte, so a long stream stays alive as long as
/// the upstream keeps talking while a silent one is cut off.
pub(crate) fn build_http_client(read_timeout: Duration) -> Client {
    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
        .build()
        .unwrap_or_default()
}
