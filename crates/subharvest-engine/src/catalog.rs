//! GraphQL query catalog.
//!
//! Templates are registered per (kind, endpoint) with a `"default"`
//! fallback; lookup falls through exact match, substring containment in
//! either direction, then the default entry. Registration derives a
//! paginated variant carrying `{FIRST}` and `{CURSOR}` placeholders that
//! [`QueryCatalog::render`] fills in.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use subharvest_types::{Endpoint, QueryKind};

/// Endpoint key that matches any deployment without a dedicated template.
pub const DEFAULT_ENDPOINT: &str = "default";

static FIRST_ARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"first:\s*\d+").expect("valid first-argument regex"));

/// Immutable-after-build registry of query templates.
#[derive(Debug, Default)]
pub struct QueryCatalog {
    base: HashMap<String, HashMap<String, String>>,
    paginated: HashMap<String, HashMap<String, String>>,
}

impl QueryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template for a (kind, endpoint) pair and derive its
    /// paginated variant.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        endpoint: impl Into<String>,
        template: impl Into<String>,
    ) {
        let kind = kind.into();
        let endpoint = endpoint.into();
        let template = template.into();
        let paginated = derive_paginated(&template, &kind);

        self.paginated
            .entry(kind.clone())
            .or_default()
            .insert(endpoint.clone(), paginated);
        self.base
            .entry(kind.clone())
            .or_default()
            .insert(endpoint.clone(), template);
        tracing::debug!(kind, endpoint, "registered query template");
    }

    /// Register the fallback template for a kind.
    pub fn register_default(&mut self, kind: impl Into<String>, template: impl Into<String>) {
        self.register(kind, DEFAULT_ENDPOINT, template);
    }

    /// Append `_meta { deployment }` to every base template that lacks it,
    /// re-deriving the paginated variants.
    pub fn add_meta_field(&mut self) {
        let mut updates: Vec<(String, String, String)> = Vec::new();
        for (kind, variants) in &self.base {
            for (endpoint, template) in variants {
                if template.contains("_meta") {
                    continue;
                }
                if let Some(brace) = template.rfind('}') {
                    let mut amended = String::with_capacity(template.len() + 32);
                    amended.push_str(&template[..brace]);
                    amended.push_str("\n  _meta {\n    deployment\n  }\n");
                    amended.push_str(&template[brace..]);
                    updates.push((kind.clone(), endpoint.clone(), amended));
                }
            }
        }
        for (kind, endpoint, template) in updates {
            self.register(kind, endpoint, template);
        }
    }

    /// Resolve the base template for a (kind, endpoint) pair.
    #[must_use]
    pub fn base(&self, kind: &QueryKind, endpoint: &Endpoint) -> Option<&str> {
        lookup(&self.base, kind, endpoint)
    }

    /// Resolve the paginated template for a (kind, endpoint) pair.
    #[must_use]
    pub fn paginated(&self, kind: &QueryKind, endpoint: &Endpoint) -> Option<&str> {
        lookup(&self.paginated, kind, endpoint)
    }

    /// Fill `{FIRST}` and `{CURSOR}` placeholders.
    ///
    /// A non-empty cursor becomes the `id_gt` where-clause fragment; an
    /// empty cursor erases the placeholder.
    #[must_use]
    pub fn render(template: &str, cursor: &str, first: usize) -> String {
        let rendered = template.replace("{FIRST}", &first.to_string());
        if cursor.is_empty() {
            rendered.replace("{CURSOR}", "")
        } else {
            rendered.replace(
                "{CURSOR}",
                &format!(", where: {{id_gt: \"{cursor}\"}}"),
            )
        }
    }
}

fn lookup<'a>(
    templates: &'a HashMap<String, HashMap<String, String>>,
    kind: &QueryKind,
    endpoint: &Endpoint,
) -> Option<&'a str> {
    let variants = templates.get(kind.as_str())?;
    if let Some(template) = variants.get(endpoint.as_str()) {
        return Some(template);
    }
    // Shortened and fully-qualified deployment ids should find each other.
    for (candidate, template) in variants {
        if candidate == DEFAULT_ENDPOINT {
            continue;
        }
        if endpoint.as_str().contains(candidate.as_str()) || candidate.contains(endpoint.as_str()) {
            return Some(template);
        }
    }
    variants.get(DEFAULT_ENDPOINT).map(String::as_str)
}

/// Derive a paginated template from a base template.
fn derive_paginated(template: &str, kind: &str) -> String {
    if template.contains("{FIRST}") {
        return template.to_owned();
    }
    if FIRST_ARG_RE.is_match(template) {
        return FIRST_ARG_RE
            .replace(template, "first: {FIRST}{CURSOR}")
            .into_owned();
    }
    let call = format!("{kind}(");
    if template.contains(&call) {
        return template.replacen(&call, &format!("{kind}(first: {{FIRST}}{{CURSOR}}, "), 1);
    }
    let bare = format!("{kind} {{");
    if template.contains(&bare) {
        return template.replacen(&bare, &format!("{kind}(first: {{FIRST}}{{CURSOR}}) {{"), 1);
    }
    tracing::warn!(kind, "could not derive paginated template");
    template.to_owned()
}
