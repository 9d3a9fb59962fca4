use axum::http::StatusCode;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Http,
}

/// Transport or API failure from an upstream provider. Adapters never catch
/// or retry these; they propagate to the dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream call failed: {message}")]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            message,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Network, None, message.into())
    }
}

const UPSTREAM_TIMEOUT_MS: u64 = 120_000;

/// POST a JSON body and decode a JSON response body.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> Result<Value, UpstreamCallError> {
    let resp = post_raw(client, url, headers, body).await?;
    let status = resp.status();
    let text = resp.text().await.map_err(|err| {
        UpstreamCallError::new(UpstreamErrorKind::Network, Some(status), err.to_string())
    })?;
    serde_json::from_str(&text).map_err(|err| {
        UpstreamCallError::new(UpstreamErrorKind::Http, Some(status), err.to_string())
    })
}

/// POST a JSON body and hand back the raw response for SSE consumption.
/// Non-2xx statuses are converted to errors carrying the upstream body text.
pub async fn post_raw(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> Result<reqwest::Response, UpstreamCallError> {
    let mut req = client
        .post(url)
        .timeout(std::time::Duration::from_millis(UPSTREAM_TIMEOUT_MS))
        .json(body);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let resp = req
        .send()
        .await
        .map_err(|err| UpstreamCallError::network(err.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(status),
            format!("upstream status {}: {}", status, text),
        ));
    }
    Ok(resp)
}
