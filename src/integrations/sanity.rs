//! Sanity content store client, used to import blog posts.
//!
//! Posts are fetched with a GROQ query and their Portable Text bodies are
//! converted to Markdown so they flow through the normal blog pipeline.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use super::{header_value, HttpApi, IntegrationError};
use crate::config::SanityConfig;

const POSTS_QUERY: &str = r#"*[_type == "post" && defined(slug.current)] | order(publishedAt desc){
  title,
  "slug": slug.current,
  excerpt,
  publishedAt,
  "author": author->name,
  "categories": categories[]->title,
  "coverImage": mainImage.asset->url,
  body
}"#;

/// A post document as returned by the import query
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanityPost {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub cover_image: Option<String>,
    /// Portable Text blocks
    #[serde(default)]
    pub body: Value,
}

impl SanityPost {
    pub fn markdown(&self) -> String {
        portable_text_to_markdown(&self.body)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    result: T,
}

#[derive(Clone)]
pub struct SanityClient {
    api: Option<HttpApi>,
    dataset: String,
}

impl SanityClient {
    pub fn new(config: &SanityConfig) -> Result<Self, IntegrationError> {
        let api = match config.project_id.as_deref().filter(|p| !p.is_empty()) {
            Some(project) => {
                let mut headers = HeaderMap::new();
                if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
                    headers.insert("Authorization", header_value(&format!("Bearer {token}"))?);
                }
                let base = format!(
                    "https://{}.api.sanity.io/v{}",
                    project,
                    config.api_version.trim_start_matches('v')
                );
                Some(HttpApi::new(&base, headers)?)
            }
            None => None,
        };
        Ok(Self {
            api,
            dataset: config.dataset.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_some()
    }

    #[instrument(skip(self))]
    pub async fn fetch_posts(&self) -> Result<Vec<SanityPost>, IntegrationError> {
        let api = self
            .api
            .as_ref()
            .ok_or(IntegrationError::NotConfigured("Sanity"))?;
        let path = format!(
            "/data/query/{}?query={}",
            self.dataset,
            urlencoding::encode(POSTS_QUERY)
        );
        let response: QueryResponse<Vec<SanityPost>> = api.get(&path).await?;
        Ok(response.result)
    }
}

impl std::fmt::Debug for SanityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanityClient")
            .field("dataset", &self.dataset)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

/// Convert Portable Text blocks into Markdown.
///
/// Handles headings, blockquotes, bullet and numbered lists, the
/// `strong`/`em`/`code` decorators and link annotations. Unknown block
/// types are skipped.
pub fn portable_text_to_markdown(body: &Value) -> String {
    let Some(blocks) = body.as_array() else {
        return body.as_str().unwrap_or_default().to_string();
    };

    let mut out: Vec<String> = Vec::new();
    let mut in_list = false;

    for block in blocks {
        if block.get("_type").and_then(Value::as_str) != Some("block") {
            continue;
        }
        let text = render_spans(block);
        let list_item = block.get("listItem").and_then(Value::as_str);

        let line = match list_item {
            Some("number") => format!("1. {text}"),
            Some(_) => format!("- {text}"),
            None => match block.get("style").and_then(Value::as_str).unwrap_or("normal") {
                "h1" => format!("# {text}"),
                "h2" => format!("## {text}"),
                "h3" => format!("### {text}"),
                "h4" => format!("#### {text}"),
                "blockquote" => format!("> {text}"),
                _ => text,
            },
        };

        // list items stay on consecutive lines, everything else is a paragraph
        let continues_list = list_item.is_some() && in_list;
        in_list = list_item.is_some();
        if continues_list {
            if let Some(last) = out.last_mut() {
                last.push('\n');
                last.push_str(&line);
                continue;
            }
        }
        out.push(line);
    }

    out.join("\n\n")
}

fn render_spans(block: &Value) -> String {
    let links: Vec<(&str, &str)> = block
        .get("markDefs")
        .and_then(Value::as_array)
        .map(|defs| {
            defs.iter()
                .filter_map(|d| {
                    let key = d.get("_key")?.as_str()?;
                    let href = d.get("href")?.as_str()?;
                    Some((key, href))
                })
                .collect()
        })
        .unwrap_or_default();

    let children = block.get("children").and_then(Value::as_array);
    let mut text = String::new();

    for child in children.into_iter().flatten() {
        let mut span = child
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if span.is_empty() {
            continue;
        }

        let marks = child.get("marks").and_then(Value::as_array);
        for mark in marks.into_iter().flatten().filter_map(Value::as_str) {
            span = match mark {
                "strong" => format!("**{span}**"),
                "em" => format!("*{span}*"),
                "code" => format!("`{span}`"),
                key => match links.iter().find(|(k, _)| *k == key) {
                    Some((_, href)) => format!("[{span}]({href})"),
                    None => span,
                },
            };
        }
        text.push_str(&span);
    }

    text
}
