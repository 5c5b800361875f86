//! OpenAI chat completions client.
//!
//! - Base URL: configurable, default `https://api.openai.com/v1`
//! - Authentication: `Authorization: Bearer <key>`

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::{header_value, HttpApi, IntegrationError};
use crate::config::OpenAiConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiClient {
    api: Option<HttpApi>,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, IntegrationError> {
        let api = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let mut headers = HeaderMap::new();
                headers.insert("Authorization", header_value(&format!("Bearer {key}"))?);
                Some(HttpApi::new(&config.base_url, headers)?)
            }
            None => None,
        };
        Ok(Self {
            api,
            model: config.model.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_some()
    }

    fn api(&self) -> Result<&HttpApi, IntegrationError> {
        self.api
            .as_ref()
            .ok_or(IntegrationError::NotConfigured("OpenAI"))
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, IntegrationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.7,
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response: ChatResponse = self.api()?.post("/chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| IntegrationError::Parse("Completion returned no content".to_string()))
    }

    /// Plain-text completion
    #[instrument(skip_all)]
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, IntegrationError> {
        self.complete(system, user, false).await.map(|s| s.trim().to_string())
    }

    /// JSON-mode completion, parsed into a JSON value
    #[instrument(skip_all)]
    pub async fn chat_json(&self, system: &str, user: &str) -> Result<Value, IntegrationError> {
        let raw = self.complete(system, user, true).await?;
        serde_json::from_str(&raw)
            .map_err(|e| IntegrationError::Parse(format!("Completion was not valid JSON: {e}")))
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.model)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = OpenAiClient::new(&OpenAiConfig::default()).unwrap();
        assert!(!client.is_configured());
        let err = client.chat("system", "user").await.unwrap_err();
        assert!(matches!(err, IntegrationError::NotConfigured("OpenAI")));
    }

    #[test]
    fn test_request_serializes_json_mode() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.7,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
