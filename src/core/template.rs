// src/core/template.rs
//
// Placeholder template engine for prompt content.
//
// Templates are plain text with `{{name}}` placeholders. The engine extracts
// the referenced names, validates placeholder syntax (with line positions for
// malformed ones), and renders in a single pass so substituted values are
// never re-substituted.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::core::tool::ToolArgs;
use crate::error::{ResolveError, ResolveResult};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").unwrap();
    static ref IDENT_RE: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// Extract the set of placeholder names referenced by a template, unique and
/// in first-appearance order.
pub fn extract_template_inputs(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Check that every placeholder in the template is well-formed: opened with
/// `{{`, closed with `}}`, and containing a single identifier.
pub fn validate_template(node: &str, template: &str) -> ResolveResult<()> {
    let mut offset = 0;
    while let Some(start) = template[offset..].find("{{") {
        let open = offset + start;
        let Some(close) = template[open..].find("}}") else {
            return Err(syntax_error(
                node,
                template,
                open,
                "unexpected end of template, expected end of placeholder '}}'".to_string(),
            ));
        };
        let inner = template[open + 2..open + close].trim();
        if inner.is_empty() {
            return Err(syntax_error(node, template, open, "empty placeholder".to_string()));
        }
        if !IDENT_RE.is_match(inner) {
            let message = match inner.split_whitespace().nth(1) {
                Some(extra) => format!("expected end of placeholder, got '{}'", extra),
                None => format!("invalid placeholder '{}'", inner),
            };
            return Err(syntax_error(node, template, open, message));
        }
        offset = open + close + 2;
    }
    Ok(())
}

/// Render placeholders in a single pass. Unknown placeholders are kept
/// unchanged; values render through their Display form.
pub fn render_template(template: &str, inputs: &ToolArgs) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        if let Some(end) = rest[start..].find("}}") {
            let raw = &rest[start..start + end + 2];
            let key = raw[2..raw.len() - 2].trim();
            match inputs.get(key) {
                Some(value) => rendered.push_str(&value.to_string()),
                None => rendered.push_str(raw),
            }
            rest = &rest[start + end + 2..];
        } else {
            rendered.push_str(&rest[start..]);
            rest = "";
        }
    }
    rendered.push_str(rest);
    rendered
}

fn syntax_error(node: &str, template: &str, offset: usize, message: String) -> ResolveError {
    ResolveError::TemplateSyntax {
        node: node.to_string(),
        line: template[..offset].matches('\n').count() + 1,
        message,
    }
}
