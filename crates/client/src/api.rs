//! HTTP transport and error mapping.

use crate::config::ClientConfig;
use qsync_core::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Credential-bearing client for the remote authority.
///
/// All requests carry the configured bearer credential and are bounded
/// by the configured timeout. Transport failures are mapped into the
/// qsync error taxonomy at this boundary: 401/403 become
/// [`Error::Authentication`], any other non-success response becomes
/// [`Error::Connectivity`] carrying the server-supplied message, and a
/// malformed body becomes [`Error::Decode`].
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client from configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| Error::Config("API key is not a valid header value".to_string()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url,
        })
    }

    /// Send a request and decode the JSON response.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%method, %url, "remote authority request");

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Connectivity(format!("request to {url} timed out"))
            } else {
                Error::Connectivity(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Connectivity(format!("failed to read response body: {e}")))?;

        match status {
            StatusCode::UNAUTHORIZED => {
                Err(Error::Authentication("credential rejected".to_string()))
            }
            StatusCode::FORBIDDEN => {
                Err(Error::Authentication("insufficient privilege".to_string()))
            }
            s if !s.is_success() => Err(Error::Connectivity(server_message(s, &text))),
            _ => Ok(serde_json::from_str(&text)?),
        }
    }
}

/// Extract the server's `error` field when the body carries one.
fn server_message(status: StatusCode, body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("server returned {status}: {}", parsed.error),
        Err(_) if !body.is_empty() => format!("server returned {status}: {body}"),
        Err(_) => format!("server returned {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_prefers_error_field() {
        let msg = server_message(
            StatusCode::BAD_REQUEST,
            r#"{"success": false, "error": "unit not found"}"#,
        );
        assert_eq!(msg, "server returned 400 Bad Request: unit not found");
    }

    #[test]
    fn server_message_falls_back_to_raw_body() {
        let msg = server_message(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(msg, "server returned 502 Bad Gateway: upstream down");

        let msg = server_message(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(msg, "server returned 500 Internal Server Error");
    }
}
