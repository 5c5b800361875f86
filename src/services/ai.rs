//! AI content generation on top of the OpenAI client

use crate::integrations::{IntegrationError, OpenAiClient};
use crate::models::SocialPlatform;
use crate::services::markdown::truncate_words;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_TOPIC_CHARS: usize = 500;
const MAX_SOURCE_CHARS: usize = 8000;

const BLOG_SYSTEM_PROMPT: &str = "You write blog posts for a company marketing site. \
Reply with a JSON object with the string fields \"title\", \"excerpt\" and \"content\". \
\"excerpt\" is one or two sentences. \"content\" is Markdown without a top-level heading.";

#[derive(Debug, thiserror::Error)]
pub enum AiServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("External service error: {0}")]
    External(#[from] IntegrationError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlogDraftRequest {
    pub topic: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlogDraft {
    pub title: String,
    pub excerpt: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialCopyRequest {
    pub source_text: String,
    pub platform: SocialPlatform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocialCopy {
    pub platform: SocialPlatform,
    pub content: String,
}

pub struct AiService {
    client: OpenAiClient,
}

impl AiService {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    pub async fn generate_blog_draft(
        &self,
        request: BlogDraftRequest,
    ) -> Result<BlogDraft, AiServiceError> {
        let prompt = blog_prompt(&request)?;
        let reply = self.client.chat_json(BLOG_SYSTEM_PROMPT, &prompt).await?;
        let draft = parse_blog_draft(&reply)?;
        tracing::info!(title = %draft.title, "Generated blog draft");
        Ok(draft)
    }

    pub async fn generate_social_copy(
        &self,
        request: SocialCopyRequest,
    ) -> Result<SocialCopy, AiServiceError> {
        let source = request.source_text.trim();
        if source.is_empty() {
            return Err(AiServiceError::ValidationError(
                "Source text cannot be empty".to_string(),
            ));
        }
        let limit = request.platform.char_limit();
        let system = format!(
            "You write {} posts for a company. Keep it under {} characters, \
             write in plain text and add at most three hashtags. Reply with the post only.",
            request.platform, limit
        );
        let source = truncate_words(source, MAX_SOURCE_CHARS);
        let reply = self.client.chat(&system, &source).await?;

        Ok(SocialCopy {
            platform: request.platform,
            content: fit_to_platform(&reply, request.platform),
        })
    }
}

fn blog_prompt(request: &BlogDraftRequest) -> Result<String, AiServiceError> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(AiServiceError::ValidationError(
            "Topic cannot be empty".to_string(),
        ));
    }
    if topic.chars().count() > MAX_TOPIC_CHARS {
        return Err(AiServiceError::ValidationError(format!(
            "Topic must be at most {} characters",
            MAX_TOPIC_CHARS
        )));
    }

    let mut prompt = format!("Topic: {}", topic);
    let keywords: Vec<&str> = request
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if !keywords.is_empty() {
        prompt.push_str(&format!("\nKeywords: {}", keywords.join(", ")));
    }
    let tone = request
        .tone
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("professional");
    prompt.push_str(&format!("\nTone: {}", tone));
    Ok(prompt)
}

fn parse_blog_draft(reply: &Value) -> Result<BlogDraft, IntegrationError> {
    let field = |name: &str| -> Result<String, IntegrationError> {
        reply
            .get(name)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IntegrationError::Parse(format!("Draft is missing \"{}\"", name)))
    };
    Ok(BlogDraft {
        title: field("title")?,
        excerpt: field("excerpt").unwrap_or_default(),
        content: field("content")?,
    })
}

/// Strip wrapping quotes models like to add, then cut to the platform limit
fn fit_to_platform(reply: &str, platform: SocialPlatform) -> String {
    let text = reply.trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .trim();
    truncate_words(text, platform.char_limit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenAiConfig;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_blog_prompt_includes_keywords_and_default_tone() {
        let prompt = blog_prompt(&BlogDraftRequest {
            topic: "  Shipping faster  ".into(),
            keywords: vec!["ci".into(), " ".into(), "deploys".into()],
            tone: None,
        })
        .unwrap();
        assert_eq!(prompt, "Topic: Shipping faster\nKeywords: ci, deploys\nTone: professional");
    }

    #[test]
    fn test_blog_prompt_rejects_empty_topic() {
        let result = blog_prompt(&BlogDraftRequest {
            topic: "   ".into(),
            keywords: vec![],
            tone: Some("playful".into()),
        });
        assert!(matches!(result, Err(AiServiceError::ValidationError(_))));
    }

    #[test]
    fn test_parse_blog_draft() {
        let draft = parse_blog_draft(&json!({
            "title": " Hello ",
            "content": "Body",
        }))
        .unwrap();
        assert_eq!(draft.title, "Hello");
        assert_eq!(draft.excerpt, "");
        assert_eq!(draft.content, "Body");

        let missing = parse_blog_draft(&json!({"title": "No body"}));
        assert!(matches!(missing, Err(IntegrationError::Parse(_))));
    }

    #[test]
    fn test_fit_to_platform_strips_quotes() {
        assert_eq!(
            fit_to_platform("\"Big news today\"\n", SocialPlatform::Linkedin),
            "Big news today"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_client_reports_not_configured() {
        let service = AiService::new(OpenAiClient::new(&OpenAiConfig::default()).unwrap());
        assert!(!service.is_configured());

        let result = service
            .generate_social_copy(SocialCopyRequest {
                source_text: "Launch day".into(),
                platform: SocialPlatform::Twitter,
            })
            .await;
        assert!(matches!(
            result,
            Err(AiServiceError::External(IntegrationError::NotConfigured(_)))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_social_copy_fits_twitter(text in "[a-z ]{0,600}") {
            let fitted = fit_to_platform(&text, SocialPlatform::Twitter);
            prop_assert!(fitted.chars().count() <= SocialPlatform::Twitter.char_limit());
        }
    }
}
