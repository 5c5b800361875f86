//! Third-party API clients
//!
//! Thin `reqwest` wrappers for the SaaS services Beacon talks to:
//!
//! - [`OpenAiClient`]: chat completions for AI-assisted drafting
//! - [`AyrshareClient`]: multi-platform social posting
//! - [`LinkedInClient`]: OAuth and direct LinkedIn posting
//! - [`BrevoClient`]: newsletter contacts and campaigns (the ESP)
//! - [`SanityClient`]: blog import from the Sanity content store
//! - [`Mailer`]: transactional email over SMTP
//!
//! Every client is built from its config section even when credentials
//! are missing; calls then fail with [`IntegrationError::NotConfigured`].

pub mod ayrshare;
pub mod brevo;
pub mod linkedin;
pub mod mailer;
pub mod openai;
pub mod sanity;

pub use ayrshare::AyrshareClient;
pub use brevo::{BrevoClient, EspCampaign, EspClient, EspContact};
pub use linkedin::{LinkedInClient, LinkedInToken};
pub use mailer::{EmailSender, Mailer, OutgoingEmail};
pub use openai::OpenAiClient;
pub use sanity::{SanityClient, SanityPost};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{PublishReceipt, SocialPost};

/// Per-request timeout for every outbound API call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when calling a third-party API.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the provider.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Rejected credentials.
    #[error("Unauthorized: invalid or expired credentials")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Failed to parse a response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// SMTP delivery failed.
    #[error("SMTP error: {0}")]
    Smtp(String),

    /// Required credentials are missing from the configuration.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Something that can put a social post live on its platform
#[async_trait]
pub trait SocialPublisher: Send + Sync {
    async fn publish(&self, post: &SocialPost) -> Result<PublishReceipt, IntegrationError>;
}

/// Shared request plumbing: base URL, default headers and uniform
/// status-code handling.
#[derive(Clone)]
pub(crate) struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub(crate) fn new(base_url: &str, headers: HeaderMap) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, IntegrationError> {
        let response = self.client.get(self.url(path)).send().await?;
        handle_response(response).await
    }

    pub(crate) async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, IntegrationError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        handle_response(response).await
    }

    /// POST expecting an empty (usually 204) response
    pub(crate) async fn post_empty<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), IntegrationError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        expect_success(response).await
    }

    pub(crate) async fn put_empty<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), IntegrationError> {
        let response = self.client.put(self.url(path)).json(body).send().await?;
        expect_success(response).await
    }
}

/// Build a header value, reporting bad credentials as a parse error
pub(crate) fn header_value(value: &str) -> Result<HeaderValue, IntegrationError> {
    HeaderValue::from_str(value)
        .map_err(|e| IntegrationError::Parse(format!("Invalid header value: {e}")))
}

pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, IntegrationError> {
    if response.status().is_success() {
        return response
            .json()
            .await
            .map_err(|e| IntegrationError::Parse(format!("Failed to parse response: {e}")));
    }
    Err(parse_error(response).await)
}

pub(crate) async fn expect_success(response: reqwest::Response) -> Result<(), IntegrationError> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(parse_error(response).await)
}

pub(crate) async fn parse_error(response: reqwest::Response) -> IntegrationError {
    let status = response.status().as_u16();

    match status {
        429 => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            IntegrationError::RateLimited(retry_after)
        }
        401 | 403 => IntegrationError::Unauthorized,
        404 => IntegrationError::NotFound(response.url().path().to_string()),
        _ => {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            IntegrationError::Api { status, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let api = HttpApi::new("https://api.example.com/v3/", HeaderMap::new()).unwrap();
        assert_eq!(api.url("/contacts"), "https://api.example.com/v3/contacts");
    }

    #[test]
    fn test_header_value_rejects_newlines() {
        assert!(header_value("Bearer ok").is_ok());
        assert!(matches!(
            header_value("bad\nvalue"),
            Err(IntegrationError::Parse(_))
        ));
    }

    #[test]
    fn test_not_configured_message() {
        let err = IntegrationError::NotConfigured("Brevo");
        assert_eq!(err.to_string(), "Brevo is not configured");
    }
}
