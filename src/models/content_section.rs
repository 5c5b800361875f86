//! Editable blocks of marketing copy (hero, features, testimonials) grouped by page

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSection {
    pub id: i64,
    pub slug: String,
    /// Page the section belongs to (`home`, `pricing`, ...)
    pub page_slug: String,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Free-form structured data for the template (cards, links, images)
    pub data: Value,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContentSectionInput {
    pub slug: String,
    pub page_slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateContentSectionInput {
    pub slug: Option<String>,
    pub page_slug: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<Value>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}
