use tracing::debug;

use crate::parser::{Document, TemplateId};

pub const INFORMATION: &str = "Information";

type Rule = fn(&mut Document, TemplateId, &str);

/// Rewrites keyed by canonical template title. Titles not listed pass through.
const RULES: &[(&str, Rule)] = &[
    ("Self", attribute_self),
    ("PD-self", pd_self),
    ("GFDL-self-with-disclaimers", gfdl_self_with_disclaimers),
    ("GFDL-self", gfdl_self),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    /// The Information template that was set aside, already dropped from the tree.
    pub information: Option<TemplateId>,
    pub rewritten: usize,
}

/// Reference to the uploader's account on the source wiki.
pub fn uploader_attribution(uploader: &str) -> String {
    format!("{{{{User at project|{uploader}|w|en}}}}")
}

/// Apply the rule table to every live template, nested ones included. The
/// last Information template is set aside and dropped; earlier ones are kept as
/// ordinary templates.
pub fn apply_rules(document: &mut Document, uploader: &str) -> TransformOutcome {
    let mut outcome = TransformOutcome::default();
    for id in document.all_templates() {
        let title = document.template(id).title.clone();
        if title == INFORMATION {
            outcome.information = Some(id);
            continue;
        }
        if let Some((_, rule)) = RULES.iter().find(|(name, _)| *name == title) {
            rule(document, id, uploader);
            outcome.rewritten += 1;
            debug!(template = %title, renamed_to = %document.template(id).title, "template rewritten");
        }
    }
    if let Some(id) = outcome.information {
        document.drop_template(id);
    }
    outcome
}

fn attribute_self(document: &mut Document, id: TemplateId, uploader: &str) {
    let template = document.template_mut(id);
    if !template.has("author") {
        template.set("author", uploader_attribution(uploader));
    }
}

fn pd_self(document: &mut Document, id: TemplateId, uploader: &str) {
    rename_with_uploader(document, id, "PD-user-en", uploader);
}

fn gfdl_self_with_disclaimers(document: &mut Document, id: TemplateId, uploader: &str) {
    rename_with_uploader(document, id, "GFDL-user-en-with-disclaimers", uploader);
}

fn rename_with_uploader(document: &mut Document, id: TemplateId, title: &str, uploader: &str) {
    let template = document.template_mut(id);
    template.title = title.to_string();
    template.set("1", uploader);
}

fn gfdl_self(document: &mut Document, id: TemplateId, uploader: &str) {
    let template = document.template_mut(id);
    template.title = "GFDL-self-en".to_string();
    template.set("author", uploader_attribution(uploader));
}
