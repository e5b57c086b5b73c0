use std::collections::BTreeMap;

use tracing::debug;

use crate::api::WikiAccess;
use crate::parser::Document;
use crate::titles::{Namespace, canonical_title};

/// Alias title -> canonical title, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectTable {
    aliases: BTreeMap<String, String>,
}

impl RedirectTable {
    /// Parse the redirect configuration page. Every non-empty line that does not
    /// start with `<` is a `|`-separated list whose first entry is canonical.
    pub fn from_config_text(text: &str) -> Self {
        let mut aliases = BTreeMap::new();
        for line in text.lines() {
            if line.is_empty() || line.starts_with('<') {
                continue;
            }
            let tokens = line
                .split('|')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .collect::<Vec<_>>();
            let Some(canonical) = tokens.first() else {
                continue;
            };
            for token in &tokens {
                aliases.insert((*token).to_string(), (*canonical).to_string());
            }
            // Lookups happen on wiki-canonicalized titles, so index that form as well.
            for token in &tokens {
                aliases
                    .entry(canonical_title(token, Namespace::Template))
                    .or_insert_with(|| (*canonical).to_string());
            }
        }
        Self { aliases }
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Follow aliases to a fixed point so that resolving a canonical title is a no-op.
    pub fn resolve(&self, title: &str) -> Option<&str> {
        let mut current = self.aliases.get(title)?;
        for _ in 0..self.aliases.len() {
            match self.aliases.get(current.as_str()) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        Some(current.as_str())
    }

    /// Canonical identity of a raw template title.
    pub fn normalize<A: WikiAccess + ?Sized>(&self, raw_title: &str, wiki: &A) -> String {
        let resolved = wiki.resolve_canonical_title(raw_title, Namespace::Template);
        match self.resolve(&resolved) {
            Some(canonical) => canonical.to_string(),
            None => resolved,
        }
    }

    /// Rewrite the title of every template in the tree, nested ones included.
    pub fn normalize_document<A: WikiAccess + ?Sized>(&self, document: &mut Document, wiki: &A) {
        let mut renamed = 0usize;
        for id in document.all_templates() {
            let template = document.template_mut(id);
            let canonical = self.normalize(&template.raw_title, wiki);
            if canonical != template.raw_title {
                renamed += 1;
            }
            template.title = canonical;
        }
        debug!(renamed, "normalized template titles");
    }
}
