use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

/// One regex removal applied to raw page text before parsing.
#[derive(Debug, Clone)]
pub struct StripPass {
    pub name: &'static str,
    pattern: Regex,
}

/// Ordered removal of constructs that must not reach the destination page.
/// Marker calls are removed first, by brace-balanced matching.
#[derive(Debug, Clone)]
pub struct Stripper {
    marker: Option<Regex>,
    passes: Vec<StripPass>,
}

const FIXED_PASSES: &[(&str, &str)] = &[
    ("comments", r"(?s)<!--.*?-->"),
    ("categories", r"(?i)\n?\[\[(Category:).*?\]\]"),
    ("headers", r"\n?==.*?==\n?"),
    ("captions", r#"(?si)\{\|\s*?class="wikitable.+?\|\}"#),
    ("bots", r"(?si)\{\{(bots|nobots).*?\}\}"),
];

impl Stripper {
    /// `marker_aliases` are the names (without namespace) under which the transfer
    /// marker template can be invoked. The marker pass runs first.
    pub fn new(marker_aliases: &[String]) -> Result<Self> {
        let marker = if marker_aliases.is_empty() {
            None
        } else {
            let pattern = marker_pattern(marker_aliases);
            Some(
                Regex::new(&pattern)
                    .with_context(|| format!("invalid marker pattern: {pattern}"))?,
            )
        };
        let mut passes = Vec::with_capacity(FIXED_PASSES.len());
        for &(name, pattern) in FIXED_PASSES {
            passes.push(StripPass {
                name,
                pattern: Regex::new(pattern)
                    .with_context(|| format!("invalid {name} strip pattern"))?,
            });
        }
        Ok(Self { marker, passes })
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.marker
            .iter()
            .map(|_| "marker")
            .chain(self.passes.iter().map(|pass| pass.name))
            .collect()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut current = match &self.marker {
            Some(marker) => {
                let next = remove_marker_calls(marker, text);
                if next.len() != text.len() {
                    debug!(
                        pass = "marker",
                        removed_bytes = text.len() - next.len(),
                        "strip pass"
                    );
                }
                next
            }
            None => text.to_string(),
        };
        for pass in &self.passes {
            let next = pass.pattern.replace_all(&current, "").into_owned();
            if next.len() != current.len() {
                debug!(
                    pass = pass.name,
                    removed_bytes = current.len() - next.len(),
                    "strip pass"
                );
            }
            current = next;
        }
        current
    }
}

/// Case-insensitive pattern matching `{{` followed by any alias. Spaces in an
/// alias also match underscores. The call's extent is found by brace counting.
pub fn marker_pattern(aliases: &[String]) -> String {
    let alternatives = aliases
        .iter()
        .map(|alias| {
            alias
                .split([' ', '_'])
                .filter(|word| !word.is_empty())
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[ _]+")
        })
        .filter(|alternative| !alternative.is_empty())
        .collect::<Vec<_>>();
    format!(r"(?i)\{{\{{({})", alternatives.join("|"))
}

/// Remove every marker call together with any templates nested inside it. An
/// unclosed call is left in place for the parser to report.
fn remove_marker_calls(marker: &Regex, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut search = 0;
    while let Some(found) = marker.find_at(text, search) {
        match balanced_end(text, found.start()) {
            Some(end) => {
                out.push_str(&text[copied..found.start()]);
                copied = end;
                search = end;
            }
            None => search = found.end(),
        }
    }
    out.push_str(&text[copied..]);
    out
}

/// Byte offset just past the `}}` matching the `{{` at `start`. Triple-brace
/// parameters close on `}}}`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut frames: Vec<bool> = Vec::new();
    let mut index = start;
    while index < bytes.len() {
        let rest = &bytes[index..];
        if rest.starts_with(b"{{") {
            let triple = rest.starts_with(b"{{{");
            frames.push(triple);
            index += if triple { 3 } else { 2 };
        } else if rest.starts_with(b"}}") {
            let triple = frames.pop().unwrap_or(false);
            index += if triple && rest.starts_with(b"}}}") { 3 } else { 2 };
            if frames.is_empty() {
                return Some(index);
            }
        } else {
            index += 1;
        }
    }
    None
}
