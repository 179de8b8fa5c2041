//! Green Button Connect HTTP collaborators: OAuth token fetch and bulk feed
//! download, with bounded retries.
//!
//! Transport failures (timeout, connect) and 429/5xx responses are retried
//! with exponential backoff up to [`MAX_RETRIES`]; everything else fails the
//! extraction immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::pipeline::EtlError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct GreenButtonClient {
    http: reqwest::Client,
    token_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    client_access_token: Option<String>,
    error: Option<String>,
}

pub(crate) fn is_retriable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(1u32 << (attempt - 1).min(10))
        .min(MAX_BACKOFF)
}

impl GreenButtonClient {
    pub fn new(api: &ApiConfig) -> Result<Self, EtlError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EtlError::Extract(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_url: api.token_url.clone(),
        })
    }

    /// Exchange client credentials for a bearer token.
    pub async fn fetch_access_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String, EtlError> {
        let req = self
            .http
            .post(&self.token_url)
            .basic_auth(client_id, Some(client_secret))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            );
        let resp = self.send_with_retry(req).await?;
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| EtlError::Extract(format!("token response was not valid JSON: {e}")))?;
        if let Some(err) = token.error {
            return Err(EtlError::Extract(format!(
                "token endpoint returned error: {err}"
            )));
        }
        token
            .client_access_token
            .ok_or_else(|| EtlError::Extract("token response carried no client_access_token".into()))
    }

    /// Download one bulk feed, persist it to a dated file under `data_dir`,
    /// and return the path. The run parses from the saved file.
    pub async fn download_feed(
        &self,
        url: &str,
        token: &str,
        data_dir: &Path,
    ) -> Result<PathBuf, EtlError> {
        let req = self.http.get(url).bearer_auth(token);
        let resp = self.send_with_retry(req).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| EtlError::Extract(format!("failed to read feed body: {e}")))?;

        let today = time::OffsetDateTime::now_utc().date();
        let path = data_dir.join(format!("api_response_{today}.xml"));
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| EtlError::Extract(format!("failed to write {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), bytes = body.len(), "saved bulk feed");
        Ok(path)
    }

    async fn send_with_retry(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, EtlError> {
        let mut attempt: u32 = 0;
        loop {
            let this_try = req
                .try_clone()
                .ok_or_else(|| EtlError::Extract("request is not retryable".into()))?;
            let outcome = this_try.send().await;
            let retriable = match &outcome {
                Ok(resp) => is_retriable_status(resp.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            match outcome {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if !(retriable && attempt < MAX_RETRIES) => {
                    return Err(EtlError::Extract(format!(
                        "request to {} failed with status {}",
                        resp.url(),
                        resp.status()
                    )));
                }
                Err(e) if !(retriable && attempt < MAX_RETRIES) => {
                    return Err(EtlError::Extract(format!("request failed: {e}")));
                }
                _ => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    metrics::counter!("green_button_http_retries_total").increment(1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient HTTP failure, retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_parses_and_ignores_extra_fields() {
        let body = r#"{"client_access_token":"abc123","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(token.client_access_token.as_deref(), Some("abc123"));
        assert!(token.error.is_none());
    }

    #[test]
    fn token_response_surfaces_body_level_errors() {
        let body = r#"{"error":"invalid_client"}"#;
        let token: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(token.error.as_deref(), Some("invalid_client"));
        assert!(token.client_access_token.is_none());
    }

    #[test]
    fn server_side_statuses_are_retriable() {
        for code in [429u16, 500, 502, 503, 504] {
            assert!(
                is_retriable_status(StatusCode::from_u16(code).unwrap()),
                "{code} should be retriable"
            );
        }
    }

    #[test]
    fn client_errors_are_not_retriable() {
        for code in [400u16, 401, 403, 404] {
            assert!(!is_retriable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(20), MAX_BACKOFF);
    }
}
