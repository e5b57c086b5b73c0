use anyhow::{Context, Result};
use regex::Regex;

use crate::api::ImageRevision;
use crate::parser::{Document, TemplateId};
use crate::titles::{Namespace, ensure_namespace, strip_namespace};

pub const SUMMARY_HEADER: &str = "== {{int:filedesc}} ==\n";
pub const LICENSE_HEADER: &str = "\n== {{int:license-header}} ==\n";
pub const UPLOAD_LOG_HEADER: &str = "\n== {{Original upload log}} ==\n";
pub const UPLOAD_LOG_TABLE_HEAD: &str = "{| class=\"wikitable\"\n! {{int:filehist-datetime}} !! {{int:filehist-dimensions}} !! {{int:filehist-user}} !! {{int:filehist-comment}}";
pub const UNCATEGORIZED: &str = "\n{{Subst:Unc}}";
pub const OWN_WORK_SOURCE: &str = "{{Own work by original uploader}}";

/// Facts about one file that feed the generated page besides its parsed text.
#[derive(Debug, Clone)]
pub struct PageFacts<'a> {
    pub source_title: &'a str,
    pub uploader: &'a str,
    pub own_work: bool,
    /// Newest first.
    pub history: &'a [ImageRevision],
    pub categories: &'a [String],
    /// Appended as a category link when set.
    pub tracking_category: Option<&'a str>,
}

/// Assembles destination page text from a transformed document.
#[derive(Debug, Clone)]
pub struct Composer {
    links: Regex,
    doubled_prefix: Regex,
    blank_runs: Regex,
}

impl Composer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            links: Regex::new(r"\[\[(.+?\]\])").context("invalid link pattern")?,
            doubled_prefix: Regex::new(r"(?i)\[\[(w::|w:w:)")
                .context("invalid interwiki prefix pattern")?,
            blank_runs: Regex::new(r"\n{3,}").context("invalid blank line pattern")?,
        })
    }

    /// Every remaining top-level template moves into the license section and is
    /// dropped; whatever text is left becomes part of the description.
    pub fn compose(
        &self,
        document: &mut Document,
        information: Option<TemplateId>,
        facts: &PageFacts<'_>,
    ) -> String {
        let mut license = String::from(LICENSE_HEADER);
        for id in document.top_level() {
            license.push_str(&document.render_template(id));
            license.push('\n');
            document.drop_template(id);
        }

        let summary = self.summary(document, information, facts);
        let text = format!("{summary}{license}");
        let text = self.links.replace_all(&text, "[[w:$1");
        let text = self.doubled_prefix.replace_all(&text, "[[w:");
        let mut text = self.blank_runs.replace_all(&text, "\n").into_owned();

        text.push_str(&upload_log(facts));
        text.push_str(&category_section(facts.categories));
        if let Some(category) = facts.tracking_category {
            text.push_str(&format!("\n[[{}]]", ensure_namespace(category, Namespace::Category)));
        }
        text
    }

    fn summary(
        &self,
        document: &Document,
        information: Option<TemplateId>,
        facts: &PageFacts<'_>,
    ) -> String {
        let field = |key: &str, default: &str| fuzzy_param(document, information, key, default);
        let own_work_author = format!("[[User:{0}|{0}]]", facts.uploader);

        let description = field("Description", "") + document.render().trim();
        let source = field("Source", if facts.own_work { OWN_WORK_SOURCE } else { "" });
        let date = field("Date", "");
        let author = field(
            "Author",
            if facts.own_work { own_work_author.as_str() } else { "" },
        );
        let permission = field("Permission", "");
        let other_versions = field("Other_versions", "");

        format!(
            "{SUMMARY_HEADER}{{{{Information\n|description={description}\n|source={}\n|date={}\n|author={}\n|permission={}\n|other_versions={}\n}}}}\n",
            source.trim(),
            date.trim(),
            author.trim(),
            permission.trim(),
            other_versions.trim(),
        )
    }
}

/// Value of `key` on the Information template, trying the key as given, then
/// lower-cased, then lower-cased with underscores as spaces.
pub fn fuzzy_param(
    document: &Document,
    information: Option<TemplateId>,
    key: &str,
    default: &str,
) -> String {
    let Some(id) = information else {
        return default.to_string();
    };
    let lower = key.to_lowercase();
    let spaced = lower.replace('_', " ");
    [key, lower.as_str(), spaced.as_str()]
        .into_iter()
        .find_map(|candidate| document.param_text(id, candidate))
        .unwrap_or_else(|| default.to_string())
}

fn upload_log(facts: &PageFacts<'_>) -> String {
    let mut log = format!(
        "{UPLOAD_LOG_HEADER}{{{{Original file page|en.wikipedia|{}}}}}\n{UPLOAD_LOG_TABLE_HEAD}",
        strip_namespace(facts.source_title)
    );
    for revision in facts.history {
        let comment = revision.comment.replace('\n', " ").replace("  ", " ");
        log.push_str(&format!(
            "\n|-\n| {} || {} × {} || [[w:User:{user}|{user}]] || ''<nowiki>{comment}</nowiki>''",
            revision.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            revision.width,
            revision.height,
            user = revision.user,
        ));
    }
    log.push_str("\n|}\n");
    log
}

fn category_section(categories: &[String]) -> String {
    if categories.is_empty() {
        return UNCATEGORIZED.to_string();
    }
    categories
        .iter()
        .map(|category| format!("\n[[{}]]", ensure_namespace(category, Namespace::Category)))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::transform::apply_rules;

    fn revision(user: &str, comment: &str) -> ImageRevision {
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

    #[test]
    fn fuzzy_lookup_prefers_exact_then_lowercase_then_spaced() {
        let document = Document::parse(
            "{{Information|Other_versions=exact|other_versions=lower|other versions=spaced}}",
        )
        .expect("parse");
        let id = document.top_level()[0];
        assert_eq!(fuzzy_param(&document, Some(id), "Other_versions", "d"), "exact");

        let document =
            Document::parse("{{Information|other_versions=lower|other versions=spaced}}").expect("parse");
        let id = document.top_level()[0];
        assert_eq!(fuzzy_param(&document, Some(id), "Other_versions", "d"), "lower");

        let document = Document::parse("{{Information|other versions=spaced}}").expect("parse");
        let id = document.top_level()[0];
        assert_eq!(fuzzy_param(&document, Some(id), "Other_versions", "d"), "spaced");

        assert_eq!(fuzzy_param(&document, None, "Other_versions", "d"), "d");
        assert_eq!(fuzzy_param(&document, Some(id), "Date", "d"), "d");
    }

    #[test]
    fn composes_sections_in_fixed_order() {
        let mut document = Document::parse(
            "{{Information|Description=A [[cat]].|Date=2020}}\n{{Self|Cc-by-sa-4.0}}\nExtra note.",
        )
        .expect("parse");
        let outcome = apply_rules(&mut document, "Alice");
        let history = [revision("Alice", "Initial\nupload  with   spaces")];
        let categories = vec!["Cats".to_string(), "Category:Pets".to_string()];
        let facts = PageFacts {
            source_title: "File:Cat.jpg",
            uploader: "Alice",
            own_work: true,
            history: &history,
            categories: &categories,
            tracking_category: Some("Category:Uploaded with MTC!"),
        };

        let text = Composer::new()
            .expect("composer")
            .compose(&mut document, outcome.information, &facts);

        let expected = concat!(
            "== {{int:filedesc}} ==\n",
            "{{Information\n",
            "|description=A [[w:cat]].Extra note.\n",
            "|source={{Own work by original uploader}}\n",
            "|date=2020\n",
            "|author=[[w:User:Alice|Alice]]\n",
            "|permission=\n",
            "|other_versions=\n",
            "}}\n",
            "\n== {{int:license-header}} ==\n",
            "{{Self|Cc-by-sa-4.0|author={{User at project|Alice|w|en}}}}\n",
            "\n== {{Original upload log}} ==\n",
            "{{Original file page|en.wikipedia|Cat.jpg}}\n",
            "{| class=\"wikitable\"\n",
            "! {{int:filehist-datetime}} !! {{int:filehist-dimensions}} !! {{int:filehist-user}} !! {{int:filehist-comment}}",
            "\n|-\n| 2020-01-01T12:00:00Z || 640 × 480 || [[w:User:Alice|Alice]] || ''<nowiki>Initial upload with  spaces</nowiki>''",
            "\n|}\n",
            "\n[[Category:Cats]]",
            "\n[[Category:Pets]]",
            "\n[[Category:Uploaded with MTC!]]",
        );
        assert_eq!(text, expected);
        assert!(document.top_level().is_empty());
    }

    #[test]
    fn uncategorized_files_get_the_unc_marker() {
        let mut document = Document::parse("plain text").expect("parse");
        let history = [revision("Bob", "")];
        let facts = PageFacts {
            source_title: "File:Plain.png",
            uploader: "Bob",
            own_work: false,
            history: &history,
            categories: &[],
            tracking_category: None,
        };
        let text = Composer::new()
            .expect("composer")
            .compose(&mut document, None, &facts);
        assert!(text.starts_with(
            "== {{int:filedesc}} ==\n{{Information\n|description=plain text\n|source=\n|date=\n|author=\n"
        ));
        assert!(text.ends_with("\n|}\n\n{{Subst:Unc}}"));
        assert!(!text.contains("Uploaded with MTC!"));
    }

    #[test]
    fn interwiki_prefix_is_not_doubled() {
        let mut document = Document::parse("See [[w:Foo]], [[:Bar]] and [[W:Baz]].").expect("parse");
        let history = [revision("Bob", "x")];
        let facts = PageFacts {
            source_title: "File:Links.png",
            uploader: "Bob",
            own_work: false,
            history: &history,
            categories: &[],
            tracking_category: None,
        };
        let text = Composer::new()
            .expect("composer")
            .compose(&mut document, None, &facts);
        assert!(text.contains("|description=See [[w:Foo]], [[w:Bar]] and [[w:Baz]].\n"));
    }

    #[test]
    fn blank_line_runs_collapse() {
        let mut document = Document::parse("one\n\n\n\ntwo").expect("parse");
        let history = [revision("Bob", "x")];
        let facts = PageFacts {
            source_title: "File:Gaps.png",
            uploader: "Bob",
            own_work: false,
            history: &history,
            categories: &[],
            tracking_category: None,
        };
        let text = Composer::new()
            .expect("composer")
            .compose(&mut document, None, &facts);
        assert!(text.contains("|description=one\ntwo\n"));
    }
}
