use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use crate::api::{ImageRevision, WikiAccess};
use crate::titles::Namespace;

/// In-memory wiki used by unit tests. Every trait call counts as one request.
#[derive(Debug, Default)]
pub(crate) struct MockWiki {
    pub page_texts: BTreeMap<String, String>,
    pub categories: BTreeMap<String, Vec<String>>,
    pub image_history: BTreeMap<String, Vec<ImageRevision>>,
    pub existing_templates: BTreeSet<String>,
    pub existing_files: BTreeSet<String>,
    /// Titles an existence query leaves out of its answer.
    pub unanswered: BTreeSet<String>,
    pub links: BTreeMap<String, Vec<String>>,
    pub shared_duplicates: BTreeMap<String, Vec<String>>,
    pub backlinks: BTreeMap<String, Vec<String>>,
    pub failing_pages: BTreeSet<String>,
    pub existence_queries: Vec<Vec<String>>,
    pub request_count: usize,
}

impl WikiAccess for MockWiki {
    fn get_page_text(&mut self, title: &str) -> Result<String> {
        self.request_count += 1;
        if self.failing_pages.contains(title) {
            bail!("connection reset while fetching {title}");
        }
        match self.page_texts.get(title) {
            Some(text) => Ok(text.clone()),
            None => bail!("page text missing in API response: {title}"),
        }
    }

    fn get_categories(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        self.request_count += 1;
        Ok(titles
            .iter()
            .filter_map(|title| {
                self.categories
                    .get(title)
                    .map(|categories| (title.clone(), categories.clone()))
            })
            .collect())
    }

    fn get_image_history(&mut self, title: &str) -> Result<Vec<ImageRevision>> {
        self.request_count += 1;
        Ok(self.image_history.get(title).cloned().unwrap_or_default())
    }

    fn exists_batch(
        &mut self,
        titles: &[String],
        namespace: Namespace,
    ) -> Result<BTreeMap<String, bool>> {
        self.request_count += 1;
        self.existence_queries.push(titles.to_vec());
        let existing = match namespace {
            Namespace::Template => &self.existing_templates,
            Namespace::File => &self.existing_files,
            other => bail!("unexpected existence namespace {}", other.as_str()),
        };
        Ok(titles
            .iter()
            .filter(|title| !self.unanswered.contains(*title))
            .map(|title| (title.clone(), existing.contains(title)))
            .collect())
    }

    fn get_links_on_page(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        self.request_count += 1;
        Ok(titles
            .iter()
            .filter_map(|title| self.links.get(title).map(|links| (title.clone(), links.clone())))
            .collect())
    }

    fn get_shared_duplicates(
        &mut self,
        titles: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        self.request_count += 1;
        Ok(titles
            .iter()
            .filter_map(|title| {
                self.shared_duplicates
                    .get(title)
                    .map(|duplicates| (title.clone(), duplicates.clone()))
            })
            .collect())
    }

    fn what_links_here(&mut self, title: &str) -> Result<Vec<String>> {
        self.request_count += 1;
        Ok(self.backlinks.get(title).cloned().unwrap_or_default())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
