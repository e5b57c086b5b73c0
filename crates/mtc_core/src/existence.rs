use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use tracing::debug;

use crate::api::WikiAccess;
use crate::parser::Document;
use crate::titles::Namespace;

/// Canonical template title -> exists on the destination wiki. Entries are only
/// ever added, and only for titles that were actually queried.
#[derive(Debug, Default)]
pub struct ExistenceCache {
    entries: RwLock<BTreeMap<String, bool>>,
}

impl ExistenceCache {
    pub fn get(&self, title: &str) -> Option<bool> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(title)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct titles from `titles` with no cached answer, in first-seen order.
    pub fn missing<'a, I>(&self, titles: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = BTreeSet::new();
        titles
            .into_iter()
            .filter(|title| !entries.contains_key(*title) && seen.insert(*title))
            .map(str::to_string)
            .collect()
    }

    /// Insert answers for titles not cached yet. Existing entries are never
    /// overwritten. Returns how many entries were added.
    pub fn record(&self, results: BTreeMap<String, bool>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0usize;
        for (title, exists) in results {
            if let std::collections::btree_map::Entry::Vacant(slot) = entries.entry(title) {
                slot.insert(exists);
                added += 1;
            }
        }
        added
    }

    /// Query the destination for every uncached title in one batched call.
    pub fn refresh<'a, A, I>(&self, destination: &mut A, titles: I) -> Result<usize>
    where
        A: WikiAccess + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let missing = self.missing(titles);
        if missing.is_empty() {
            debug!("existence cache satisfied every title");
            return Ok(0);
        }
        let results = destination.exists_batch(&missing, Namespace::Template)?;
        let answered = results.len();
        let added = self.record(results);
        debug!(
            queried = missing.len(),
            answered, added, "existence cache refreshed"
        );
        Ok(added)
    }

    /// Drop every live template whose title is cached as absent. Returns the
    /// titles that were dropped.
    pub fn filter_document(&self, document: &mut Document) -> Vec<String> {
        let mut dropped = Vec::new();
        for id in document.all_templates() {
            if !document.is_live(id) {
                continue;
            }
            let title = &document.template(id).title;
            if self.get(title) == Some(false) {
                dropped.push(title.clone());
                document.drop_template(id);
            }
        }
        dropped
    }
}
