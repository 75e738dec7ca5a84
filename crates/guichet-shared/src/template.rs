//! Template variable extraction and rendering.
//!
//! Bodies contain `{{variableName}}` tokens.  Extraction is a flat regex
//! scan, rendering is literal single-pass substitution.  There is no
//! control flow, and substituted values are never re-scanned, so a value
//! that itself contains braces stays inert.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{BindingSource, Contact, VariableBinding};
use crate::segment::FieldRef;

static VAR_PATTERN: OnceLock<Regex> = OnceLock::new();

fn var_pattern() -> &'static Regex {
    VAR_PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("variable pattern is valid")
    })
}

/// Distinct variable names in `body`, in order of first appearance.
pub fn extract_variables(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in var_pattern().captures_iter(body) {
        let name = &cap[1];
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}

/// Replaces every `{{var}}` token with its value.  Variables without a
/// value render as the empty string.
pub fn render(body: &str, values: &HashMap<String, String>) -> String {
    var_pattern()
        .replace_all(body, |caps: &regex::Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Resolves a step's or campaign's bindings against one recipient,
/// producing the value map handed to [`render`].  A contact-field binding
/// whose field is absent on the contact resolves to the empty string.
pub fn resolve_bindings(
    mappings: &[VariableBinding],
    contact: &Contact,
) -> HashMap<String, String> {
    mappings
        .iter()
        .map(|m| {
            let value = match &m.source {
                BindingSource::ContactField(field) => FieldRef::resolve(field)
                    .get(contact)
                    .unwrap_or_default()
                    .to_string(),
                BindingSource::Fixed(v) => v.clone(),
            };
            (m.var.clone(), value)
        })
        .collect()
}
