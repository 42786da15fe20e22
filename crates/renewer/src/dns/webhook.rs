//! Generic webhook DNS configurator
//!
//! Delegates record management to a custom HTTP service.
//!
//! # Webhook API
//!
//! ## Create Record
//! ```text
//! POST {url}/records
//! Content-Type: application/json
//!
//! {
//!   "name": "_acme-challenge.example.com.",
//!   "type": "TXT",
//!   "value": "challenge-digest",
//!   "ttl": 60
//! }
//!
//! Response: any 2xx
//! ```
//!
//! ## Delete Record
//! ```text
//! DELETE {url}/records?name={name}&value={value}
//!
//! Response: 2xx, or 404 when the record is already gone
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{DnsConfigurator, DnsError, DnsResult, CHALLENGE_TTL};

/// Webhook DNS configurator for custom integrations
#[derive(Debug)]
pub struct WebhookConfigurator {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    token: Option<String>,
}

impl WebhookConfigurator {
    /// Create a new webhook DNS configurator
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL for the webhook API
    /// * `auth_header` - Optional custom auth header name (e.g., "X-API-Key")
    /// * `token` - Optional token; sent as bearer auth unless `auth_header` is set
    /// * `timeout` - Request timeout
    pub fn new(
        base_url: String,
        auth_header: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DnsError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            auth_header,
            token,
        })
    }

    fn add_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.token) {
            (Some(header), Some(token)) => request.header(header.as_str(), token.as_str()),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> DnsResult<reqwest::Response> {
        let response = self.add_auth(request).send().await.map_err(|e| {
            if e.is_timeout() {
                DnsError::Timeout
            } else {
                DnsError::Request(format!("Webhook request failed: {}", e))
            }
        })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(DnsError::Authentication(
                "Webhook authentication failed".to_string(),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl DnsConfigurator for WebhookConfigurator {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn create_txt_record(&self, name: &str, value: &str) -> DnsResult<()> {
        debug!(record = %name, url = %self.base_url, "Creating TXT record via webhook");

        let request = RecordRequest {
            name,
            record_type: "TXT",
            value,
            ttl: CHALLENGE_TTL,
        };

        let response = self
            .send(
                self.client
                    .post(format!("{}/records", self.base_url))
                    .json(&request),
            )
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::RecordCreation {
                name: name.to_string(),
                message: format!("Webhook returned HTTP {} - {}", status, body),
            });
        }

        debug!(record = %name, "TXT record created via webhook");
        Ok(())
    }

    async fn delete_txt_record(&self, name: &str, value: &str) -> DnsResult<()> {
        debug!(record = %name, url = %self.base_url, "Deleting TXT record via webhook");

        let response = self
            .send(
                self.client
                    .delete(format!("{}/records", self.base_url))
                    .query(&[("name", name), ("value", value)]),
            )
            .await?;

        // Already gone
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(record = %name, "Record already deleted");
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::RecordDeletion {
                name: name.to_string(),
                message: format!("Webhook returned HTTP {} - {}", status, body),
            });
        }

        debug!(record = %name, "TXT record deleted via webhook");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RecordRequest<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    record_type: &'a str,
    value: &'a str,
    ttl: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let configurator = WebhookConfigurator::new(
            "https://example.com/api/".to_string(),
            None,
            None,
            Duration::from_secs(30),
        )
        .unwrap();

        assert_eq!(configurator.base_url, "https://example.com/api");
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(RecordRequest {
            name: "_acme-challenge.example.com.",
            record_type: "TXT",
            value: "digest",
            ttl: CHALLENGE_TTL,
        })
        .unwrap();

        assert_eq!(body["type"], "TXT");
        assert_eq!(body["name"], "_acme-challenge.example.com.");
        assert_eq!(body["ttl"], 60);
    }
}
