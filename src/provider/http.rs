//! Shared HTTP client, SSE parsing, and auth utilities.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{ConvoyError, Result};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> Result<&'static reqwest::Client> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client);
    }
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .pool_max_idle_per_host(10)
        .build()?;
    Ok(SHARED_CLIENT.get_or_init(|| client))
}

/// JSON headers, plus a Bearer token when a key is configured.
pub fn bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// One meaningful SSE line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
}

/// Parse an SSE line; comments, blank lines and non-data fields yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseLine<'_>> {
    let data = line
        .strip_prefix("data:")
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))?;
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    Some(SseLine::Data(data))
}

/// Map a non-success HTTP status into an error.
pub fn status_to_error(status: u16, body: &str) -> ConvoyError {
    let message = extract_error_message(body).unwrap_or_else(|| body.to_string());
    match status {
        401 | 403 => ConvoyError::Authentication(message),
        429 => ConvoyError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => ConvoyError::api(status, message),
    }
}

/// `{"error": {"message": ...}}` or `{"error": "..."}`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}
