//! FAQ entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Faq {
    pub id: i64,
    pub slug: String,
    pub question: String,
    /// Markdown answer
    pub answer: String,
    pub category: Option<String>,
    pub sort_order: i32,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFaqInput {
    pub question: String,
    pub answer: String,
    /// Generated from the question when empty
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_published")]
    pub is_published: bool,
}

fn default_published() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFaqInput {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub sort_order: Option<i32>,
    pub is_published: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_faqs_are_published_by_default() {
        let input: CreateFaqInput =
            serde_json::from_str(r#"{"question":"Why?","answer":"Because."}"#).unwrap();
        assert!(input.is_published);
        assert_eq!(input.sort_order, 0);
    }
}
