use anyhow::Result;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::{ImageRevision, WikiAccess};
use crate::candidate::{CandidateState, Rejection, TransferCandidate, TransferOptions};
use crate::compose::{Composer, PageFacts};
use crate::config::MtcConfig;
use crate::eligibility::CandidateBuilder;
use crate::error::CandidateError;
use crate::existence::ExistenceCache;
use crate::parser::Document;
use crate::startup::TransferSettings;
use crate::strip::Stripper;
use crate::transform::apply_rules;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub source_title: String,
    pub destination_title: String,
    pub generated_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTitle {
    pub title: String,
    #[serde(flatten)]
    pub rejection: Rejection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTitle {
    pub title: String,
    pub error: CandidateError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub records: Vec<TransferRecord>,
    pub rejected: Vec<RejectedTitle>,
    pub failures: Vec<FailedTitle>,
    pub source_requests: usize,
    pub destination_requests: usize,
}

impl TransferReport {
    pub fn from_candidates(candidates: &[TransferCandidate]) -> Self {
        let mut report = Self::default();
        for candidate in candidates {
            match &candidate.state {
                CandidateState::Composed => {
                    if let (Some(destination_title), Some(generated_text)) =
                        (&candidate.destination_title, &candidate.generated_text)
                    {
                        report.records.push(TransferRecord {
                            source_title: candidate.source_title.clone(),
                            destination_title: destination_title.clone(),
                            generated_text: generated_text.clone(),
                        });
                    }
                }
                CandidateState::Rejected { rejection } => report.rejected.push(RejectedTitle {
                    title: candidate.source_title.clone(),
                    rejection: rejection.clone(),
                }),
                CandidateState::Failed { error } => report.failures.push(FailedTitle {
                    title: candidate.source_title.clone(),
                    error: error.clone(),
                }),
                _ => {}
            }
        }
        report
    }
}

/// Everything a batch needs besides the two wikis. Built once per process; the
/// existence cache inside it grows across batches.
#[derive(Debug)]
pub struct TransferContext {
    pub settings: TransferSettings,
    pub cache: ExistenceCache,
    stripper: Stripper,
    composer: Composer,
    own_work_category: String,
    tracking_category: String,
    max_name_attempts: usize,
}

/// Per-candidate state carried from parsing to composition.
struct Prepared {
    index: usize,
    document: Document,
    history: Vec<ImageRevision>,
    uploader: String,
}

impl TransferContext {
    pub fn new(settings: TransferSettings, config: &MtcConfig) -> Result<Self> {
        let stripper = Stripper::new(&settings.marker_aliases)?;
        Ok(Self {
            settings,
            cache: ExistenceCache::default(),
            stripper,
            composer: Composer::new()?,
            own_work_category: config.own_work_category().to_string(),
            tracking_category: config.tracking_category().to_string(),
            max_name_attempts: config.max_name_attempts(),
        })
    }

    pub fn build_candidates<S, D, R>(
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
        let builder = CandidateBuilder {
            lists: &self.settings.lists,
            own_work_category: &self.own_work_category,
            max_name_attempts: self.max_name_attempts,
        };
        builder.build(source, destination, titles, options, rng)
    }

    /// Build candidates for `titles` and generate text for every eligible one.
    pub fn run<S, D, R>(
        &self,
        source: &mut S,
        destination: &mut D,
        titles: &[String],
        options: &TransferOptions,
        rng: &mut R,
    ) -> Result<TransferReport>
    where
        S: WikiAccess + ?Sized,
        D: WikiAccess + ?Sized,
        R: Rng + ?Sized,
    {
        let source_before = source.request_count();
        let destination_before = destination.request_count();

        let mut candidates = self.build_candidates(source, destination, titles, options, rng)?;
        self.generate(source, destination, &mut candidates)?;

        let mut report = TransferReport::from_candidates(&candidates);
        report.source_requests = source.request_count() - source_before;
        report.destination_requests = destination.request_count() - destination_before;
        info!(
            composed = report.records.len(),
            rejected = report.rejected.len(),
            failed = report.failures.len(),
            source_requests = report.source_requests,
            destination_requests = report.destination_requests,
            "transfer batch finished"
        );
        Ok(report)
    }

    /// Generate destination text for every candidate with a resolved name.
    /// Per-candidate faults mark only that candidate failed; a failed batched
    /// existence query aborts the whole batch.
    pub fn generate<S, D>(
        &self,
        source: &mut S,
        destination: &mut D,
        candidates: &mut [TransferCandidate],
    ) -> Result<()>
    where
        S: WikiAccess + ?Sized,
        D: WikiAccess + ?Sized,
    {
        let mut prepared = Vec::new();
        for (index, candidate) in candidates.iter_mut().enumerate() {
            if candidate.state != CandidateState::NameResolved {
                continue;
            }
            match self.prepare(source, candidate, index) {
                Ok(item) => prepared.push(item),
                Err(error) => {
                    warn!(title = %candidate.source_title, %error, "candidate failed");
                    candidate.fail(error);
                }
            }
        }

        let titles = prepared
            .iter()
            .flat_map(|item| {
                item.document
                    .all_templates()
                    .into_iter()
                    .map(move |id| item.document.template(id).title.clone())
            })
            .collect::<Vec<_>>();
        self.cache
            .refresh(destination, titles.iter().map(String::as_str))?;

        for mut item in prepared {
            let candidate = &mut candidates[item.index];
            self.cache.filter_document(&mut item.document);
            candidate.advance(CandidateState::ExistenceFiltered);

            let outcome = apply_rules(&mut item.document, &item.uploader);
            candidate.advance(CandidateState::Transformed);

            let tracking_category = candidate
                .tracking_category
                .then_some(self.tracking_category.as_str());
            let facts = PageFacts {
                source_title: &candidate.source_title,
                uploader: &item.uploader,
                own_work: candidate.own_work,
                history: &item.history,
                categories: &candidate.categories,
                tracking_category,
            };
            let text = self
                .composer
                .compose(&mut item.document, outcome.information, &facts);
            candidate.generated_text = Some(text);
            candidate.advance(CandidateState::Composed);
        }
        Ok(())
    }

    fn prepare<S>(
        &self,
        source: &mut S,
        candidate: &mut TransferCandidate,
        index: usize,
    ) -> Result<Prepared, CandidateError>
    where
        S: WikiAccess + ?Sized,
    {
        let title = candidate.source_title.clone();
        let text = source
            .get_page_text(&title)
            .map_err(|error| CandidateError::fetch(&error))?;
        let history = source
            .get_image_history(&title)
            .map_err(|error| CandidateError::fetch(&error))?;
        // The wiki lists revisions newest first, so the original uploader is last.
        let uploader = history
            .last()
            .map(|revision| revision.user.clone())
            .ok_or_else(|| CandidateError::MissingMetadata(format!("no upload history for {title}")))?;

        let mut document = Document::parse(&self.stripper.apply(&text))?;
        candidate.advance(CandidateState::Parsed);

        self.settings.redirects.normalize_document(&mut document, &*source);
        candidate.advance(CandidateState::Normalized);

        Ok(Prepared {
            index,
            document,
            history,
            uploader,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::eligibility::EligibilityLists;
    use crate::redirects::RedirectTable;
    use crate::testing::MockWiki;

    const SCENARIO_TEXT: &str = "{{Copy to Wikimedia Commons}}\n{{Information|Description=Test photo|Date=2020-01-01}}\n{{Self|Cc-by-sa-4.0}}\n[[Category:Test]]";

    fn settings() -> TransferSettings {
        TransferSettings {
            lists: EligibilityLists {
                blacklist: BTreeSet::from(["Category:Non-free images".to_string()]),
                whitelist: BTreeSet::from(["Category:Self-published work".to_string()]),
            },
            redirects: RedirectTable::from_config_text("Self|Self2\nInformation|Info\n"),
            marker_aliases: vec!["Copy to Wikimedia Commons".to_string()],
        }
    }

    fn context() -> TransferContext {
        TransferContext::new(settings(), &MtcConfig::default()).expect("context")
    }

    fn upload(user: &str, comment: &str) -> ImageRevision {
        ImageRevision {
            timestamp: Utc
                .with_ymd_and_hms(2020, 1, 1, 12, 0, 0)
                .single()
                .expect("timestamp"),
            user: user.to_string(),
            width: 640,
            height: 480,
            comment: comment.to_string(),
        }
    }

    fn add_file(wiki: &mut MockWiki, title: &str, text: &str) {
        wiki.page_texts.insert(title.to_string(), text.to_string());
        wiki.categories.insert(
            title.to_string(),
            vec![
                "Category:Test".to_string(),
                "Category:Self-published work".to_string(),
            ],
        );
        wiki.image_history
            .insert(title.to_string(), vec![upload("Alice", "Initial upload")]);
    }

    fn wikis() -> (MockWiki, MockWiki) {
        let mut source = MockWiki::default();
        add_file(&mut source, "File:Example.jpg", SCENARIO_TEXT);
        let mut destination = MockWiki::default();
        destination.existing_templates.extend([
            "Information".to_string(),
            "Self".to_string(),
        ]);
        (source, destination)
    }

    fn run(
        context: &TransferContext,
        source: &mut MockWiki,
        destination: &mut MockWiki,
        titles: &[&str],
    ) -> TransferReport {
        let titles = titles.iter().map(|title| title.to_string()).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(42);
        context
            .run(source, destination, &titles, &TransferOptions::default(), &mut rng)
            .expect("run")
    }

    #[test]
    fn end_to_end_scenario_is_byte_exact() {
        let context = context();
        let (mut source, mut destination) = wikis();
        let report = run(&context, &mut source, &mut destination, &["File:Example.jpg"]);

        let expected = concat!(
            "== {{int:filedesc}} ==\n",
            "{{Information\n",
            "|description=Test photo\n",
            "|source={{Own work by original uploader}}\n",
            "|date=2020-01-01\n",
            "|author=[[w:User:Alice|Alice]]\n",
            "|permission=\n",
            "|other_versions=\n",
            "}}\n",
            "\n== {{int:license-header}} ==\n",
            "{{Self|Cc-by-sa-4.0|author={{User at project|Alice|w|en}}}}\n",
            "\n== {{Original upload log}} ==\n",
            "{{Original file page|en.wikipedia|Example.jpg}}\n",
            "{| class=\"wikitable\"\n",
            "! {{int:filehist-datetime}} !! {{int:filehist-dimensions}} !! {{int:filehist-user}} !! {{int:filehist-comment}}",
            "\n|-\n| 2020-01-01T12:00:00Z || 640 × 480 || [[w:User:Alice|Alice]] || ''<nowiki>Initial upload</nowiki>''",
            "\n|}\n",
            "\n{{Subst:Unc}}",
        );
        assert_eq!(
            report.records,
            vec![TransferRecord {
                source_title: "File:Example.jpg".to_string(),
                destination_title: "File:Example.jpg".to_string(),
                generated_text: expected.to_string(),
            }]
        );
        assert!(report.rejected.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn absent_templates_are_dropped_and_aliases_resolved() {
        let context = context();
        let (mut source, mut destination) = wikis();
        add_file(
            &mut source,
            "File:Local.png",
            "{{Info|Description=Map}}\n{{Self2|GFDL}}\n{{Local license}}",
        );
        let report = run(&context, &mut source, &mut destination, &["File:Local.png"]);

        let text = &report.records[0].generated_text;
        assert!(text.contains("|description=Map\n"));
        assert!(text.contains("{{Self|GFDL|author={{User at project|Alice|w|en}}}}\n"));
        assert!(!text.contains("Local license"));
        assert_eq!(context.cache.get("Local license"), Some(false));
    }

    #[test]
    fn marker_with_nested_parameter_and_repeated_information() {
        let context = context();
        let (mut source, mut destination) = wikis();
        add_file(
            &mut source,
            "File:Nested.jpg",
            "{{Copy to Wikimedia Commons|reason={{PAGENAME}}}}\n{{Information|Description=first}}\n{{Information|Description=second}}\n{{Self|Cc-by-sa-4.0}}",
        );
        let report = run(&context, &mut source, &mut destination, &["File:Nested.jpg"]);

        assert!(report.failures.is_empty());
        let text = &report.records[0].generated_text;
        assert!(text.contains("|description=second\n"));
        assert!(text.contains(
            "== {{int:license-header}} ==\n{{Information|Description=first}}\n{{Self|Cc-by-sa-4.0|author={{User at project|Alice|w|en}}}}\n"
        ));
        assert!(!text.contains("PAGENAME"));
    }

    #[test]
    fn uploader_is_the_oldest_revision_author() {
        let context = context();
        let (mut source, mut destination) = wikis();
        source.image_history.insert(
            "File:Example.jpg".to_string(),
            vec![upload("Bob", "Cropped"), upload("Alice", "Initial upload")],
        );
        let report = run(&context, &mut source, &mut destination, &["File:Example.jpg"]);
        let text = &report.records[0].generated_text;
        assert!(text.contains("{{User at project|Alice|w|en}}"));
        assert!(text.contains("[[w:User:Bob|Bob]] || ''<nowiki>Cropped</nowiki>''"));
    }

    #[test]
    fn failures_stay_with_their_candidate() {
        let context = context();
        let (mut source, mut destination) = wikis();
        add_file(&mut source, "File:Broken.jpg", "{{Information|Description=oops");
        add_file(&mut source, "File:Offline.jpg", "text");
        source.failing_pages.insert("File:Offline.jpg".to_string());
        add_file(&mut source, "File:NoHistory.jpg", "text");
        source.image_history.remove("File:NoHistory.jpg");

        let report = run(
            &context,
            &mut source,
            &mut destination,
            &[
                "File:Broken.jpg",
                "File:Example.jpg",
                "File:Offline.jpg",
                "File:NoHistory.jpg",
            ],
        );

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].source_title, "File:Example.jpg");
        assert_eq!(report.failures.len(), 3);
        assert!(matches!(report.failures[0].error, CandidateError::Markup(_)));
        assert!(matches!(report.failures[1].error, CandidateError::Fetch(_)));
        assert!(matches!(
            report.failures[2].error,
            CandidateError::MissingMetadata(_)
        ));
    }

    #[test]
    fn batches_share_one_existence_query() {
        let context = context();
        let (mut source, mut destination) = wikis();
        add_file(&mut source, "File:Second.jpg", "{{Self|Cc-by-4.0}}\n{{Extra}}");
        run(
            &context,
            &mut source,
            &mut destination,
            &["File:Example.jpg", "File:Second.jpg"],
        );

        let template_queries = destination
            .existence_queries
            .iter()
            .filter(|titles| titles.iter().all(|title| !title.starts_with("File:")))
            .collect::<Vec<_>>();
        assert_eq!(template_queries.len(), 1);
        assert_eq!(
            template_queries[0],
            &vec!["Information".to_string(), "Self".to_string(), "Extra".to_string()]
        );
    }

    #[test]
    fn cache_is_monotone_across_batches() {
        let context = context();
        let (mut source, mut destination) = wikis();
        run(&context, &mut source, &mut destination, &["File:Example.jpg"]);
        let cached = context.cache.len();
        let queries = destination.existence_queries.len();

        // A later answer must not flip what is already cached.
        destination.existing_templates.clear();
        let report = run(&context, &mut source, &mut destination, &["File:Example.jpg"]);

        assert_eq!(context.cache.len(), cached);
        assert_eq!(context.cache.get("Self"), Some(true));
        // Only the destination file-name probe runs again.
        assert_eq!(destination.existence_queries.len(), queries + 1);
        assert!(report.records[0].generated_text.contains("{{Self|"));
    }

    #[test]
    fn identical_inputs_give_identical_reports() {
        let first = {
            let context = context();
            let (mut source, mut destination) = wikis();
            destination.existing_files.insert("File:Example.jpg".to_string());
            run(&context, &mut source, &mut destination, &["File:Example.jpg"])
        };
        let second = {
            let context = context();
            let (mut source, mut destination) = wikis();
            destination.existing_files.insert("File:Example.jpg".to_string());
            run(&context, &mut source, &mut destination, &["File:Example.jpg"])
        };
        assert_eq!(first, second);
        assert_ne!(first.records[0].destination_title, "File:Example.jpg");
    }

    #[test]
    fn tracking_and_extra_categories_are_appended() {
        let context = context();
        let (mut source, mut destination) = wikis();
        let options = TransferOptions {
            ignore_filter: false,
            tracking_category: true,
            categories: vec!["Birds".to_string()],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let report = context
            .run(
                &mut source,
                &mut destination,
                &["File:Example.jpg".to_string()],
                &options,
                &mut rng,
            )
            .expect("run");
        assert!(
            report.records[0]
                .generated_text
                .ends_with("\n|}\n\n[[Category:Birds]]\n[[Category:Uploaded with MTC!]]")
        );
    }

    #[test]
    fn report_serializes_records_and_reasons() {
        let context = context();
        let (mut source, mut destination) = wikis();
        source.categories.insert(
            "File:Blocked.jpg".to_string(),
            vec!["Category:Non-free images".to_string()],
        );
        let report = run(
            &context,
            &mut source,
            &mut destination,
            &["File:Example.jpg", "File:Blocked.jpg"],
        );
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["records"][0]["destination_title"], "File:Example.jpg");
        assert_eq!(value["rejected"][0]["title"], "File:Blocked.jpg");
        assert_eq!(value["rejected"][0]["reason"], "blacklisted");
    }
}
