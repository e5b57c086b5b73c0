use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use rand::Rng;
use tracing::{debug, info};

use crate::api::WikiAccess;
use crate::candidate::{CandidateState, Rejection, TransferCandidate, TransferOptions};
use crate::error::CandidateError;
use crate::titles::{Namespace, ensure_namespace};

/// Category lists loaded from the source wiki's configuration pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityLists {
    pub blacklist: BTreeSet<String>,
    pub whitelist: BTreeSet<String>,
}

impl EligibilityLists {
    /// First reason the category set disqualifies a file. The blacklist wins
    /// over the whitelist.
    pub fn check(&self, categories: &[String]) -> Option<Rejection> {
        if let Some(category) = categories
            .iter()
            .find(|category| self.blacklist.contains(*category))
        {
            return Some(Rejection::Blacklisted {
                category: category.clone(),
            });
        }
        if !categories
            .iter()
            .any(|category| self.whitelist.contains(category))
        {
            return Some(Rejection::NotWhitelisted);
        }
        None
    }
}

pub struct CandidateBuilder<'a> {
    pub lists: &'a EligibilityLists,
    pub own_work_category: &'a str,
    pub max_name_attempts: usize,
}

impl CandidateBuilder<'_> {
    /// Turn requested source titles into candidates, one per distinct title in
    /// input order. Ineligible titles come back rejected; titles for which no
    /// free destination name was found come back failed.
    pub fn build<S, D, R>(
        &self,
        source: &mut S,
        destination: &mut D,
        titles: &[String],
        options: &TransferOptions,
        rng: &mut R,
    ) -> Result<Vec<TransferCandidate>>
    where
        S: WikiAccess + ?Sized,
        D: WikiAccess + ?Sized,
        R: Rng + ?Sized,
    {
        let titles = distinct_file_titles(titles);
        let mut candidates = titles
            .iter()
            .map(|title| TransferCandidate::new(title.clone(), options))
            .collect::<Vec<_>>();
        if titles.is_empty() {
            return Ok(candidates);
        }

        let categories = source.get_categories(&titles)?;
        let duplicates = source.get_shared_duplicates(&titles)?;

        for candidate in &mut candidates {
            let title = candidate.source_title.clone();
            let title = title.as_str();
            let Some(file_categories) = categories.get(title) else {
                candidate.reject(Rejection::Missing);
                debug!(title, "rejected: missing on source");
                continue;
            };
            if let Some(shared) = duplicates.get(title).filter(|shared| !shared.is_empty()) {
                candidate.reject(Rejection::SharedDuplicate {
                    duplicates: shared.clone(),
                });
                debug!(title, "rejected: duplicate already shared");
                continue;
            }
            if !options.ignore_filter
                && let Some(rejection) = self.lists.check(file_categories)
            {
                debug!(title, ?rejection, "rejected by category lists");
                candidate.reject(rejection);
                continue;
            }
            candidate.own_work = file_categories
                .iter()
                .any(|category| category == self.own_work_category);
            candidate.advance(CandidateState::Eligible);
        }

        self.resolve_names(destination, &mut candidates, rng)?;

        info!(
            requested = candidates.len(),
            named = candidates
                .iter()
                .filter(|candidate| candidate.state == CandidateState::NameResolved)
                .count(),
            rejected = candidates
                .iter()
                .filter(|candidate| candidate.rejection().is_some())
                .count(),
            "transfer candidates built"
        );
        Ok(candidates)
    }

    fn resolve_names<D, R>(
        &self,
        destination: &mut D,
        candidates: &mut [TransferCandidate],
        rng: &mut R,
    ) -> Result<()>
    where
        D: WikiAccess + ?Sized,
        R: Rng + ?Sized,
    {
        let eligible = candidates
            .iter()
            .filter(|candidate| candidate.state == CandidateState::Eligible)
            .map(|candidate| candidate.source_title.clone())
            .collect::<Vec<_>>();
        if eligible.is_empty() {
            return Ok(());
        }
        let taken = destination.exists_batch(&eligible, Namespace::File)?;

        let mut assigned = BTreeSet::new();
        for candidate in candidates
            .iter_mut()
            .filter(|candidate| candidate.state == CandidateState::Eligible)
        {
            let title = candidate.source_title.clone();
            if !is_taken(&taken, &title) && !assigned.contains(&title) {
                assigned.insert(title.clone());
                candidate.destination_title = Some(title);
                candidate.advance(CandidateState::NameResolved);
                continue;
            }

            match self.find_free_name(destination, &title, &assigned, rng)? {
                Some(name) => {
                    debug!(source = %title, destination = %name, "renamed to avoid collision");
                    assigned.insert(name.clone());
                    candidate.destination_title = Some(name);
                    candidate.advance(CandidateState::NameResolved);
                }
                None => candidate.fail(CandidateError::NameResolution {
                    title,
                    attempts: self.max_name_attempts,
                }),
            }
        }
        Ok(())
    }

    fn find_free_name<D, R>(
        &self,
        destination: &mut D,
        title: &str,
        assigned: &BTreeSet<String>,
        rng: &mut R,
    ) -> Result<Option<String>>
    where
        D: WikiAccess + ?Sized,
        R: Rng + ?Sized,
    {
        for _ in 0..self.max_name_attempts {
            let name = numbered_variant(title, rng.gen_range(0..=1000));
            if assigned.contains(&name) {
                continue;
            }
            let probe = destination.exists_batch(std::slice::from_ref(&name), Namespace::File)?;
            if !is_taken(&probe, &name) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }
}

/// `title` with ` <number>` inserted before its extension, or appended when it
/// has none.
pub fn numbered_variant(title: &str, number: u32) -> String {
    match title.rfind('.') {
        Some(dot) => format!("{} {number}{}", &title[..dot], &title[dot..]),
        None => format!("{title} {number}"),
    }
}

fn is_taken(results: &BTreeMap<String, bool>, title: &str) -> bool {
    results.get(title).copied().unwrap_or(false)
}

fn distinct_file_titles(titles: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    titles
        .iter()
        .map(|title| ensure_namespace(title, Namespace::File))
        .filter(|title| seen.insert(title.clone()))
        .collect()
}
