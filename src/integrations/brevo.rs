//! Brevo client: newsletter contacts and email campaigns.
//!
//! - Base URL: configurable, default `https://api.brevo.com/v3`
//! - Authentication: `api-key: <key>` header
//!
//! Campaigns go to the configured contact list. Each contact carries an
//! `UNSUBSCRIBE_TOKEN` attribute so campaign footers can link to Beacon's
//! own single-use unsubscribe page.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use super::{handle_response, header_value, parse_error, HttpApi, IntegrationError};
use crate::config::BrevoConfig;
use crate::models::CampaignStats;

/// A subscriber as pushed to the ESP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspContact {
    pub email: String,
    pub name: Option<String>,
    pub unsubscribe_token: Option<String>,
}

/// A campaign as created on the ESP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspCampaign {
    pub name: String,
    pub subject: String,
    pub preview_text: Option<String>,
    pub html: String,
}

/// Email service provider operations used by the newsletter service
#[async_trait]
pub trait EspClient: Send + Sync {
    /// Create or update a contact, returning the provider's contact id
    async fn upsert_contact(&self, contact: &EspContact) -> Result<String, IntegrationError>;

    /// Stop all campaign mail to `email`
    async fn unsubscribe_contact(&self, email: &str) -> Result<(), IntegrationError>;

    /// Create a campaign addressed to the newsletter list
    async fn create_campaign(&self, campaign: &EspCampaign) -> Result<String, IntegrationError>;

    async fn send_campaign(&self, campaign_id: &str) -> Result<(), IntegrationError>;

    async fn campaign_stats(&self, campaign_id: &str) -> Result<CampaignStats, IntegrationError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateContactRequest<'a> {
    email: &'a str,
    attributes: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    list_ids: Vec<i64>,
    update_enabled: bool,
    /// Upserts come from active subscribers, so a re-subscribe lifts the
    /// blacklist set by an earlier unsubscribe
    email_blacklisted: bool,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: serde_json::Value,
}

impl IdResponse {
    fn id_string(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlobalStats {
    #[serde(default)]
    unique_views: i64,
    #[serde(default)]
    unique_clicks: i64,
    #[serde(default)]
    unsubscriptions: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CampaignStatistics {
    #[serde(default)]
    global_stats: GlobalStats,
}

#[derive(Debug, Deserialize)]
struct CampaignDetails {
    #[serde(default)]
    statistics: CampaignStatistics,
}

#[derive(Clone)]
pub struct BrevoClient {
    api: Option<HttpApi>,
    list_id: Option<i64>,
    sender_name: String,
    sender_email: Option<String>,
}

impl BrevoClient {
    pub fn new(config: &BrevoConfig) -> Result<Self, IntegrationError> {
        let api = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let mut headers = HeaderMap::new();
                headers.insert("api-key", header_value(key)?);
                headers.insert("accept", HeaderValue::from_static("application/json"));
                Some(HttpApi::new(&config.base_url, headers)?)
            }
            None => None,
        };
        Ok(Self {
            api,
            list_id: config.list_id,
            sender_name: config.sender_name.clone(),
            sender_email: config.sender_email.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_some()
    }

    fn api(&self) -> Result<&HttpApi, IntegrationError> {
        self.api.as_ref().ok_or(IntegrationError::NotConfigured("Brevo"))
    }

    fn contact_path(email: &str) -> String {
        format!("/contacts/{}", urlencoding::encode(email))
    }
}

fn contact_attributes(contact: &EspContact) -> serde_json::Value {
    let mut attributes = serde_json::Map::new();
    if let Some(name) = &contact.name {
        attributes.insert("FIRSTNAME".into(), json!(name));
    }
    if let Some(token) = &contact.unsubscribe_token {
        attributes.insert("UNSUBSCRIBE_TOKEN".into(), json!(token));
    }
    serde_json::Value::Object(attributes)
}

impl From<CampaignDetails> for CampaignStats {
    fn from(details: CampaignDetails) -> Self {
        let stats = details.statistics.global_stats;
        CampaignStats {
            opens: stats.unique_views,
            clicks: stats.unique_clicks,
            unsubscribes: stats.unsubscriptions,
        }
    }
}

#[async_trait]
impl EspClient for BrevoClient {
    #[instrument(skip_all, fields(email = %contact.email))]
    async fn upsert_contact(&self, contact: &EspContact) -> Result<String, IntegrationError> {
        let api = self.api()?;
        let request = CreateContactRequest {
            email: &contact.email,
            attributes: contact_attributes(contact),
            list_ids: self.list_id.into_iter().collect(),
            update_enabled: true,
            email_blacklisted: false,
        };

        let response = api
            .client()
            .post(api.url("/contacts"))
            .json(&request)
            .send()
            .await?;

        // 204 means an existing contact was updated and no id is returned
        if response.status().as_u16() == 204 {
            let existing: IdResponse = api.get(&Self::contact_path(&contact.email)).await?;
            return Ok(existing.id_string());
        }
        if !response.status().is_success() {
            return Err(parse_error(response).await);
        }
        let created: IdResponse = handle_response(response).await?;
        Ok(created.id_string())
    }

    #[instrument(skip(self))]
    async fn unsubscribe_contact(&self, email: &str) -> Result<(), IntegrationError> {
        self.api()?
            .put_empty(&Self::contact_path(email), &json!({ "emailBlacklisted": true }))
            .await
    }

    #[instrument(skip_all, fields(subject = %campaign.subject))]
    async fn create_campaign(&self, campaign: &EspCampaign) -> Result<String, IntegrationError> {
        let api = self.api()?;
        let list_id = self
            .list_id
            .ok_or(IntegrationError::NotConfigured("Brevo list id"))?;
        let sender_email = self
            .sender_email
            .as_deref()
            .ok_or(IntegrationError::NotConfigured("Brevo sender email"))?;

        let mut body = json!({
            "name": campaign.name,
            "subject": campaign.subject,
            "sender": { "name": self.sender_name, "email": sender_email },
            "htmlContent": campaign.html,
            "recipients": { "listIds": [list_id] },
        });
        if let Some(preview) = &campaign.preview_text {
            body["previewText"] = json!(preview);
        }

        let created: IdResponse = api.post("/emailCampaigns", &body).await?;
        Ok(created.id_string())
    }

    #[instrument(skip(self))]
    async fn send_campaign(&self, campaign_id: &str) -> Result<(), IntegrationError> {
        self.api()?
            .post_empty(&format!("/emailCampaigns/{campaign_id}/sendNow"), &json!({}))
            .await
    }

    #[instrument(skip(self))]
    async fn campaign_stats(&self, campaign_id: &str) -> Result<CampaignStats, IntegrationError> {
        let details: CampaignDetails = self
            .api()?
            .get(&format!("/emailCampaigns/{campaign_id}?statistics=globalStats"))
            .await?;
        Ok(details.into())
    }
}

impl std::fmt::Debug for BrevoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrevoClient")
            .field("list_id", &self.list_id)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_attributes() {
        let attributes = contact_attributes(&EspContact {
            email: "a@example.com".into(),
            name: Some("Ada".into()),
            unsubscribe_token: Some("tok".into()),
        });
        assert_eq!(attributes, json!({"FIRSTNAME": "Ada", "UNSUBSCRIBE_TOKEN": "tok"}));
    }

    #[test]
    fn test_contact_request_clears_blacklist() {
        let request = CreateContactRequest {
            email: "a@example.com",
            attributes: json!({}),
            list_ids: vec![3],
            update_enabled: true,
            email_blacklisted: false,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["emailBlacklisted"], false);
        assert_eq!(body["updateEnabled"], true);
        assert_eq!(body["listIds"], json!([3]));
    }

    #[test]
    fn test_stats_from_details() {
        let details: CampaignDetails = serde_json::from_value(json!({
            "id": 7,
            "statistics": {"globalStats": {"uniqueViews": 120, "uniqueClicks": 30, "unsubscriptions": 2}}
        }))
        .unwrap();
        let stats = CampaignStats::from(details);
        assert_eq!(
            stats,
            CampaignStats {
                opens: 120,
                clicks: 30,
                unsubscribes: 2
            }
        );
    }

    #[test]
    fn test_numeric_and_string_ids() {
        let numeric: IdResponse = serde_json::from_value(json!({"id": 42})).unwrap();
        let text: IdResponse = serde_json::from_value(json!({"id": "abc"})).unwrap();
        assert_eq!(numeric.id_string(), "42");
        assert_eq!(text.id_string(), "abc");
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let client = BrevoClient::new(&BrevoConfig::default()).unwrap();
        assert!(matches!(
            client.send_campaign("1").await,
            Err(IntegrationError::NotConfigured("Brevo"))
        ));
    }

    #[test]
    fn test_contact_path_is_encoded() {
        assert_eq!(
            BrevoClient::contact_path("a+b@example.com"),
            "/contacts/a%2Bb%40example.com"
        );
    }
}
