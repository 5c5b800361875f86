//! Theme engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Parse or render failure, with the full cause chain
    #[error("Template error: {0}")]
    TemplateError(String),
}
