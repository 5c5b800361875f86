//! Theme engine
//!
//! Renders the public HTML pages with Tera.
//! - Built-in templates are embedded into the binary from `templates/`
//! - An optional override directory replaces templates by name
//! - Every render gets the standard site variables

use anyhow::{Context, Result};
use rust_embed::RustEmbed;
use std::error::Error as StdError;
use std::fs;
use std::path::Path;
use tera::{Context as TeraContext, Tera};

use crate::config::SiteConfig;

mod error;

pub use error::ThemeError;

/// Templates compiled into the binary
#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
struct EmbeddedTemplates;

/// Theme engine for rendering templates
pub struct ThemeEngine {
    tera: Tera,
    site: SiteConfig,
}

impl ThemeEngine {
    /// Load the embedded templates, then any `.html` files found under
    /// `override_path`, which win on name clashes.
    pub fn new(site: SiteConfig, override_path: Option<&Path>) -> Result<Self> {
        let mut templates: Vec<(String, String)> = Vec::new();
        for name in EmbeddedTemplates::iter() {
            let file = EmbeddedTemplates::get(&name)
                .ok_or_else(|| ThemeError::NotFound(name.to_string()))?;
            let content = String::from_utf8(file.data.into_owned())
                .with_context(|| format!("Template {} is not UTF-8", name))?;
            templates.push((name.to_string(), content));
        }

        if let Some(dir) = override_path {
            if dir.is_dir() {
                let mut overrides = Vec::new();
                collect_templates_from_dir(dir, dir, &mut overrides)?;
                tracing::info!(count = overrides.len(), path = %dir.display(), "Loaded template overrides");
                for (name, content) in overrides {
                    templates.retain(|(existing, _)| *existing != name);
                    templates.push((name, content));
                }
            } else {
                tracing::warn!(path = %dir.display(), "Template override directory not found, using built-in templates");
            }
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(templates)
            .map_err(|e| ThemeError::TemplateError(describe(&e)))?;

        Ok(Self { tera, site })
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|t| t == name)
    }

    /// Render a template as-is
    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String, ThemeError> {
        self.tera.render(template, context).map_err(|e| {
            ThemeError::TemplateError(format!("Failed to render '{}': {}", template, describe(&e)))
        })
    }

    /// Render with `site_name`, `site_description`, `base_url`, `request_path`
    /// and `year` added to `context`
    pub fn render_page(
        &self,
        template: &str,
        mut context: TeraContext,
        request_path: &str,
    ) -> Result<String, ThemeError> {
        context.insert("site_name", &self.site.name);
        context.insert("site_description", &self.site.description);
        context.insert("base_url", &self.site.base_url);
        context.insert("request_path", request_path);
        context.insert("year", &chrono::Utc::now().format("%Y").to_string());
        self.render(template, &context)
    }
}

/// Flatten a Tera error and its causes into one message
fn describe(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        message.push_str(&format!("\n  Caused by: {}", s));
        source = s.source();
    }
    message
}

fn collect_templates_from_dir(
    base_path: &Path,
    current_path: &Path,
    templates: &mut Vec<(String, String)>,
) -> Result<()> {
    for entry in fs::read_dir(current_path)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_templates_from_dir(base_path, &path, templates)?;
        } else if path.extension().is_some_and(|ext| ext == "html") {
            let relative_path = path
                .strip_prefix(base_path)
                .map_err(|_| ThemeError::TemplateError("Failed to get relative path".to_string()))?;
            let name = relative_path.to_string_lossy().replace('\\', "/");
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read template: {:?}", path))?;
            templates.push((name, content));
        }
    }
    Ok(())
}
