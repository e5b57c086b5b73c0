use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::api::WikiAccess;
use crate::config::MtcConfig;
use crate::eligibility::EligibilityLists;
use crate::redirects::RedirectTable;
use crate::titles::{Namespace, ensure_namespace, strip_namespace};

/// Immutable inputs read from the source wiki once per process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSettings {
    pub lists: EligibilityLists,
    pub redirects: RedirectTable,
    /// Names the marker template is invoked under, canonical name last.
    pub marker_aliases: Vec<String>,
}

pub fn load_transfer_settings<A>(source: &mut A, config: &MtcConfig) -> Result<TransferSettings>
where
    A: WikiAccess + ?Sized,
{
    let config_page = config.config_page();
    let blacklist_page = format!("{config_page}/Blacklist");
    let whitelist_page = format!("{config_page}/Whitelist");
    let links = source
        .get_links_on_page(&[blacklist_page.clone(), whitelist_page.clone()])
        .context("failed to load eligibility lists")?;
    let Some(blacklist) = links.get(&blacklist_page) else {
        bail!("configuration page does not exist: {blacklist_page}");
    };
    let Some(whitelist) = links.get(&whitelist_page) else {
        bail!("configuration page does not exist: {whitelist_page}");
    };
    let lists = EligibilityLists {
        blacklist: blacklist.iter().cloned().collect(),
        whitelist: whitelist.iter().cloned().collect(),
    };

    let redirects_page = format!("{config_page}/Redirects");
    let redirects = RedirectTable::from_config_text(
        &source
            .get_page_text(&redirects_page)
            .with_context(|| format!("failed to load {redirects_page}"))?,
    );

    let marker = config.marker_template();
    let marker_title = ensure_namespace(marker, Namespace::Template);
    let mut seen = BTreeSet::new();
    let mut marker_aliases = source
        .what_links_here(&marker_title)
        .with_context(|| format!("failed to list redirects to {marker_title}"))?
        .iter()
        .map(|title| strip_namespace(title).to_string())
        .filter(|alias| seen.insert(alias.clone()))
        .collect::<Vec<_>>();
    let canonical = strip_namespace(&marker_title).to_string();
    if seen.insert(canonical.clone()) {
        marker_aliases.push(canonical);
    }

    info!(
        blacklist = lists.blacklist.len(),
        whitelist = lists.whitelist.len(),
        redirects = redirects.len(),
        marker_aliases = marker_aliases.len(),
        "transfer settings loaded"
    );
    Ok(TransferSettings {
        lists,
        redirects,
        marker_aliases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWiki;

    fn configured_source() -> MockWiki {
        let mut wiki = MockWiki::default();
        wiki.links.insert(
            "Wikipedia:MTC!/Blacklist".to_string(),
            vec!["Category:Non-free images".to_string()],
        );
        wiki.links.insert(
            "Wikipedia:MTC!/Whitelist".to_string(),
            vec![
                "Category:Self-published work".to_string(),
                "Category:Public domain images".to_string(),
            ],
        );
        wiki.page_texts.insert(
            "Wikipedia:MTC!/Redirects".to_string(),
            "<pre>\nSelf|Self2\nInformation|Info\n".to_string(),
        );
        wiki.backlinks.insert(
            "Template:Copy to Wikimedia Commons".to_string(),
            vec![
                "Template:Move to Commons".to_string(),
                "Template:CTWC".to_string(),
            ],
        );
        wiki
    }

    #[test]
    fn loads_lists_redirects_and_marker_aliases() {
        let mut wiki = configured_source();
        let settings = load_transfer_settings(&mut wiki, &MtcConfig::default()).expect("load");

        assert!(settings.lists.blacklist.contains("Category:Non-free images"));
        assert_eq!(settings.lists.whitelist.len(), 2);
        assert_eq!(settings.redirects.resolve("Self2"), Some("Self"));
        assert_eq!(
            settings.marker_aliases,
            vec![
                "Move to Commons".to_string(),
                "CTWC".to_string(),
                "Copy to Wikimedia Commons".to_string()
            ]
        );
        assert_eq!(wiki.request_count, 3);
    }

    #[test]
    fn missing_list_page_is_an_error() {
        let mut wiki = configured_source();
        wiki.links.remove("Wikipedia:MTC!/Whitelist");
        let error = load_transfer_settings(&mut wiki, &MtcConfig::default()).expect_err("must fail");
        assert!(error.to_string().contains("Wikipedia:MTC!/Whitelist"));
    }

    #[test]
    fn missing_redirect_page_is_an_error() {
        let mut wiki = configured_source();
        wiki.page_texts.clear();
        let error = load_transfer_settings(&mut wiki, &MtcConfig::default()).expect_err("must fail");
        assert!(format!("{error:#}").contains("Wikipedia:MTC!/Redirects"));
    }
}
