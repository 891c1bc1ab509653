//! Body template rendering.
//!
//! A renderer is a pure function of the template string and the data
//! document. Two engines ship: [`IdentityRenderer`], which returns the
//! template unchanged, and [`PlaceholderRenderer`], which substitutes
//! `{{ dotted.path }}` references.
//!
//! HTML bodies go through [`TemplateRenderer::render_html`], which
//! HTML-escapes substituted values; the template text itself is trusted
//! and never escaped.

use std::sync::Arc;

use serde_json::Value;

use crate::config::TemplateEngine;
use crate::error::Result;

/// Renders a template against a JSON data document.
///
/// Implementations must be deterministic, free of side effects, and must
/// return a template without placeholders unchanged.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &Value) -> Result<String>;

    /// Render an HTML template. Substituted values must be HTML-escaped.
    fn render_html(&self, template: &str, data: &Value) -> Result<String> {
        self.render(template, data)
    }
}

/// Returns the template verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRenderer;

impl TemplateRenderer for IdentityRenderer {
    fn render(&self, template: &str, _data: &Value) -> Result<String> {
        Ok(template.to_string())
    }
}

/// Substitutes `{{ path }}` placeholders from the data document.
///
/// - `path` is a dot-separated list of object keys or array indices
///   (`user.name`, `items.0.title`); surrounding whitespace is ignored.
/// - Strings are inserted as-is, `null` as the empty string, other
///   values as compact JSON. In HTML templates the inserted text is
///   escaped.
/// - Placeholders that do not resolve, and an unterminated `{{`, are
///   left in the output verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, data: &Value) -> Result<String> {
        Ok(substitute(template, data, false))
    }

    fn render_html(&self, template: &str, data: &Value) -> Result<String> {
        Ok(substitute(template, data, true))
    }
}

fn substitute(template: &str, data: &Value, escape_html: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let raw = &rest[open..open + 2 + close + 2];
        match lookup(data, after_open[..close].trim()) {
            Some(value) if escape_html => {
                out.push_str(&html_escape::encode_quoted_attribute(&stringify(value)))
            }
            Some(value) => out.push_str(&stringify(value)),
            None => out.push_str(raw),
        }
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(data, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Construct the renderer for a configured engine.
pub fn renderer_for(engine: TemplateEngine) -> Arc<dyn TemplateRenderer> {
    match engine {
        TemplateEngine::Identity => Arc::new(IdentityRenderer),
        TemplateEngine::Placeholder => Arc::new(PlaceholderRenderer),
    }
}
