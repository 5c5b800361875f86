//! LinkedIn client: OAuth 2.0 authorization code flow and direct member
//! posting through the UGC Posts API.

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::{handle_response, parse_error, HttpApi, IntegrationError};
use crate::config::LinkedInConfig;
use crate::models::PublishReceipt;

const SCOPES: &str = "openid profile w_member_social";

/// Access token returned by the code exchange
#[derive(Debug, Clone, Deserialize)]
pub struct LinkedInToken {
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
}

#[derive(Debug, Deserialize)]
struct UgcPostResponse {
    #[serde(default)]
    id: Option<String>,
}

struct OAuthApp {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

#[derive(Clone)]
pub struct LinkedInClient {
    api: HttpApi,
    oauth_url: String,
    app: Option<std::sync::Arc<OAuthApp>>,
}

impl LinkedInClient {
    pub fn new(config: &LinkedInConfig) -> Result<Self, IntegrationError> {
        let app = match (&config.client_id, &config.client_secret, &config.redirect_uri) {
            (Some(id), Some(secret), Some(redirect)) if !id.is_empty() => {
                Some(std::sync::Arc::new(OAuthApp {
                    client_id: id.clone(),
                    client_secret: secret.clone(),
                    redirect_uri: redirect.clone(),
                }))
            }
            _ => None,
        };

        Ok(Self {
            api: HttpApi::new(&config.api_url, HeaderMap::new())?,
            oauth_url: config.oauth_url.trim_end_matches('/').to_string(),
            app,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.app.is_some()
    }

    fn app(&self) -> Result<&OAuthApp, IntegrationError> {
        self.app
            .as_deref()
            .ok_or(IntegrationError::NotConfigured("LinkedIn OAuth"))
    }

    /// URL that sends the admin to LinkedIn's consent screen
    pub fn authorization_url(&self, state: &str) -> Result<String, IntegrationError> {
        let app = self.app()?;
        Ok(format!(
            "{}/authorization?response_type=code&client_id={}&redirect_uri={}&state={}&scope={}",
            self.oauth_url,
            urlencoding::encode(&app.client_id),
            urlencoding::encode(&app.redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(SCOPES),
        ))
    }

    /// Trade an authorization code for an access token
    #[instrument(skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<LinkedInToken, IntegrationError> {
        let app = self.app()?;
        let body = format!(
            "grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&client_secret={}",
            urlencoding::encode(code),
            urlencoding::encode(&app.redirect_uri),
            urlencoding::encode(&app.client_id),
            urlencoding::encode(&app.client_secret),
        );

        let response = self
            .api
            .client()
            .post(format!("{}/accessToken", self.oauth_url))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        handle_response(response).await
    }

    /// `urn:li:person:<id>` for the token's owner
    #[instrument(skip_all)]
    pub async fn member_urn(&self, access_token: &str) -> Result<String, IntegrationError> {
        let response = self
            .api
            .client()
            .get(self.api.url("/userinfo"))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        let info: UserInfo = handle_response(response).await?;
        Ok(format!("urn:li:person:{}", info.sub))
    }

    /// Publish a text post as `author_urn`
    #[instrument(skip(self, access_token, text))]
    pub async fn publish_text(
        &self,
        access_token: &str,
        author_urn: &str,
        text: &str,
    ) -> Result<PublishReceipt, IntegrationError> {
        let body = json!({
            "author": author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let response = self
            .api
            .client()
            .post(self.api.url("/ugcPosts"))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(parse_error(response).await);
        }

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body_id = response
            .json::<UgcPostResponse>()
            .await
            .ok()
            .and_then(|r| r.id);

        let external_id = header_id
            .or(body_id)
            .ok_or_else(|| IntegrationError::Parse("LinkedIn returned no post id".to_string()))?;
        let url = Some(format!(
            "https://www.linkedin.com/feed/update/{}",
            external_id
        ));
        Ok(PublishReceipt { external_id, url })
    }
}

impl std::fmt::Debug for LinkedInClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedInClient")
            .field("oauth_url", &self.oauth_url)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> LinkedInClient {
        LinkedInClient::new(&LinkedInConfig {
            client_id: Some("abc123".into()),
            client_secret: Some("shh".into()),
            redirect_uri: Some("https://beacon.example.com/api/admin/social/linkedin/callback".into()),
            ..LinkedInConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let url = configured().authorization_url("state-1").unwrap();
        assert!(url.starts_with("https://www.linkedin.com/oauth/v2/authorization?"));
        assert!(url.contains("client_id=abc123"));
        assert!(url.contains("state=state-1"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fbeacon.example.com"));
        assert!(url.contains("scope=openid%20profile%20w_member_social"));
    }

    #[test]
    fn test_unconfigured_app() {
        let client = LinkedInClient::new(&LinkedInConfig::default()).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.authorization_url("s"),
            Err(IntegrationError::NotConfigured(_))
        ));
    }
}
