//! Ayrshare client: one API for every supported social network.
//!
//! - Base URL: configurable, default `https://app.ayrshare.com/api`
//! - Authentication: `Authorization: Bearer <key>`

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{header_value, HttpApi, IntegrationError, SocialPublisher};
use crate::config::AyrshareConfig;
use crate::models::{PublishReceipt, SocialPlatform, SocialPost};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRequest<'a> {
    post: &'a str,
    platforms: Vec<&'static str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    media_urls: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    post_ids: Vec<PlatformPost>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformPost {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    post_url: Option<String>,
}

#[derive(Clone)]
pub struct AyrshareClient {
    api: Option<HttpApi>,
}

impl AyrshareClient {
    pub fn new(config: &AyrshareConfig) -> Result<Self, IntegrationError> {
        let api = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let mut headers = HeaderMap::new();
                headers.insert("Authorization", header_value(&format!("Bearer {key}"))?);
                Some(HttpApi::new(&config.base_url, headers)?)
            }
            None => None,
        };
        Ok(Self { api })
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_some()
    }

    /// Ayrshare's identifier for a platform
    fn platform_name(platform: SocialPlatform) -> &'static str {
        platform.as_str()
    }
}

fn receipt_from(response: PostResponse, platform: SocialPlatform) -> Result<PublishReceipt, IntegrationError> {
    if response.status != "success" {
        return Err(IntegrationError::Api {
            status: 200,
            message: format!("Ayrshare rejected the post: {:?}", response.errors),
        });
    }

    let platform_post = response
        .post_ids
        .into_iter()
        .find(|p| p.platform == AyrshareClient::platform_name(platform));

    let (id, url) = match platform_post {
        Some(p) => (p.id.or(response.id), p.post_url),
        None => (response.id, None),
    };

    let external_id =
        id.ok_or_else(|| IntegrationError::Parse("Ayrshare returned no post id".to_string()))?;
    Ok(PublishReceipt { external_id, url })
}

#[async_trait]
impl SocialPublisher for AyrshareClient {
    #[instrument(skip_all, fields(post_id = post.id, platform = %post.platform))]
    async fn publish(&self, post: &SocialPost) -> Result<PublishReceipt, IntegrationError> {
        let api = self
            .api
            .as_ref()
            .ok_or(IntegrationError::NotConfigured("Ayrshare"))?;

        let request = PostRequest {
            post: &post.content,
            platforms: vec![Self::platform_name(post.platform)],
            media_urls: &post.media_urls,
        };
        let response: PostResponse = api.post("/post", &request).await?;
        receipt_from(response, post.platform)
    }
}

impl std::fmt::Debug for AyrshareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AyrshareClient")
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}
