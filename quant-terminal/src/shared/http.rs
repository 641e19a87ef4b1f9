//! Helpers shared by the REST clients (backfill, orders, auth)

use serde::Deserialize;
use url::Url;

use super::error::ConfigError;

/// Error payload returned by the trading API: `{"error": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Extract the service's human readable error from a response body
pub fn service_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|e| !e.trim().is_empty())
}

/// Resolve `path` against the API base URL, keeping any base path prefix
pub fn endpoint(base: &Url, path: &str) -> Result<Url, ConfigError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ConfigError::Url(format!("{}: {}", path, e)))
}
