//! C4: bounded HTTP request with cancellation composition.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct FetchRequest<'a> {
    pub method: reqwest::Method,
    pub url: &'a str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
    pub signal: Option<CancellationToken>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Fetch timeout after {0}ms")]
    Timeout(u128),

    #[error("request was aborted")]
    Aborted,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Composes the caller's cancellation signal with a local timeout signal.
/// When the timeout elapses first, the request fails with a fixed
/// `"Fetch timeout after <ms>ms"` message. When the caller's signal fires
/// first, the caller's abort takes precedence. Either way the composite
/// wait is torn down on exit and never outlives this call.
pub async fn fetch(client: &reqwest::Client, req: FetchRequest<'_>) -> Result<reqwest::Response, FetchError> {
    log::debug!("HTTP {} {}", req.method, req.url);

    let mut builder = client.request(req.method.clone(), req.url);
    for (k, v) in &req.headers {
        builder = builder.header(*k, v);
    }
    if let Some(body) = &req.body {
        builder = builder.json(body);
    }

    let send = builder.send();
    let timeout = req.timeout.unwrap_or(Duration::from_secs(120));
    let timeout_ms = timeout.as_millis();
    let local_timeout = tokio::time::sleep(timeout);

    let result = match &req.signal {
        Some(token) => {
            tokio::select! {
                res = send => res.map_err(FetchError::from),
                _ = local_timeout => Err(FetchError::Timeout(timeout_ms)),
                _ = token.cancelled() => Err(FetchError::Aborted),
            }
        }
        None => {
            tokio::select! {
                res = send => res.map_err(FetchError::from),
                _ = local_timeout => Err(FetchError::Timeout(timeout_ms)),
            }
        }
    };

    match &result {
        Ok(response) => log::debug!("HTTP {} {} -> {}", req.method, req.url, response.status()),
        Err(err) => log::warn!("HTTP {} {} failed: {}", req.method, req.url, err),
    }
    result
}
