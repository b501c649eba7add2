//! View engine
//!
//! Page templates rendered with Tera. The templates under `templates/` are
//! compiled into the binary; a directory configured in `views.path` may
//! override any of them by file name.

use anyhow::{Context, Result};
use chrono::Datelike;
use rust_embed::RustEmbed;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context as TeraContext, Tera};

use crate::config::SiteConfig;
use crate::models::{CurrentUser, DEFAULT_STYLE};

mod error;

pub use error::ViewError;

/// Templates shipped with the binary
#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
#[include = "**/*.html"]
struct EmbeddedTemplates;

/// Renders page templates
pub struct ViewEngine {
    tera: Tera,
    override_path: Option<PathBuf>,
}

impl ViewEngine {
    /// Load the embedded templates, then the overrides from `override_path`
    pub fn new(override_path: Option<&Path>) -> Result<Self> {
        let mut engine = Self {
            tera: Tera::default(),
            override_path: override_path.map(Path::to_path_buf),
        };
        engine.reload_templates()?;
        Ok(engine)
    }

    /// Re-read every template
    pub fn reload_templates(&mut self) -> Result<()> {
        let mut templates: BTreeMap<String, String> = BTreeMap::new();

        for name in EmbeddedTemplates::iter() {
            let Some(file) = EmbeddedTemplates::get(&name) else {
                continue;
            };
            let content = String::from_utf8(file.data.into_owned())
                .map_err(|e| ViewError::TemplateError(format!("{} is not UTF-8: {}", name, e)))?;
            templates.insert(name.to_string(), content);
        }

        if let Some(path) = &self.override_path {
            if path.is_dir() {
                collect_templates_from_dir(path, path, &mut templates)?;
            } else {
                tracing::warn!("View override directory {:?} does not exist", path);
            }
        }

        // Base templates go in first so children can extend them
        let mut ordered: Vec<(String, String)> = templates.into_iter().collect();
        ordered.sort_by_key(|(name, _)| !is_base_template(name));

        let mut tera = Tera::default();
        for (name, content) in ordered {
            tera.add_raw_template(&name, &content)
                .map_err(|e| ViewError::TemplateError(format!("Failed to add template {}: {}", name, e)))?;
        }
        tera.build_inheritance_chains()
            .map_err(|e| ViewError::TemplateError(format!("Failed to build template inheritance: {}", e)))?;

        tracing::debug!("Loaded {} view templates", tera.get_template_names().count());
        self.tera = tera;
        Ok(())
    }

    pub fn has_template(&self, template: &str) -> bool {
        self.tera.get_template_names().any(|name| name == template)
    }

    /// Render a template with context
    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String> {
        if !self.has_template(template) {
            return Err(ViewError::NotFound(template.to_string()).into());
        }

        self.tera.render(template, context).map_err(|e| {
            let mut error_msg = format!("Failed to render '{}': {}", template, e);
            let mut source = e.source();
            while let Some(s) = source {
                error_msg.push_str(&format!("\n  Caused by: {}", s));
                source = s.source();
            }
            ViewError::TemplateError(error_msg).into()
        })
    }

    /// Render a page with the site variables every layout needs
    pub fn render_page(&self, template: &str, context: &TeraContext, site: &SiteVars) -> Result<String> {
        let mut full_context = context.clone();
        full_context.insert("main_url", &site.main_url);
        full_context.insert("secure_main_url", &site.secure_main_url);
        full_context.insert("current_user", &site.current_user);
        full_context.insert("style", &site.style);
        full_context.insert("year", &site.year);

        self.render(template, &full_context)
    }

    /// Render the `error` view; never fails
    pub fn render_error(&self, status: u16, code: &str, message: &str, site: &SiteVars) -> String {
        let mut context = TeraContext::new();
        context.insert("status", &status);
        context.insert("code", code);
        context.insert("message", message);

        match self.render_page("error.html", &context, site) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Failed to render error template: {:#}", e);
                simple_error_page(status, message)
            }
        }
    }
}

fn is_base_template(name: &str) -> bool {
    name == "base.html" || name.ends_with("/base.html")
}

fn collect_templates_from_dir(
    base_path: &Path,
    current_path: &Path,
    templates: &mut BTreeMap<String, String>,
) -> Result<()> {
    for entry in fs::read_dir(current_path).map_err(ViewError::from)? {
        let path = entry.map_err(ViewError::from)?.path();

        if path.is_dir() {
            collect_templates_from_dir(base_path, &path, templates)?;
        } else if path.extension().is_some_and(|ext| ext == "html") {
            let relative_path = path
                .strip_prefix(base_path)
                .map_err(|_| ViewError::TemplateError("Failed to get relative path".to_string()))?;
            let template_name = relative_path.to_string_lossy().replace('\\', "/");

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read template: {:?}", path))?;
            templates.insert(template_name, content);
        }
    }

    Ok(())
}

/// Last resort when even the error template cannot be rendered
fn simple_error_page(status: u16, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Error {}</title></head>
<body><h1>Error {}</h1><p>{}</p></body>
</html>"#,
        status,
        status,
        tera::escape_html(message)
    )
}

/// Variables shared by every page
#[derive(Debug, Clone, Serialize)]
pub struct SiteVars {
    pub main_url: String,
    pub secure_main_url: String,
    pub current_user: Option<CurrentUser>,
    /// Stylesheet from the visitor's profile
    pub style: String,
    /// Current year (for copyright)
    pub year: i32,
}

impl SiteVars {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            main_url: site.main_url.clone(),
            secure_main_url: site.secure_main_url(),
            current_user: None,
            style: DEFAULT_STYLE.to_string(),
            year: chrono::Utc::now().year(),
        }
    }
}
