use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::MtcConfig;
use crate::titles::{Namespace, canonical_title, ensure_namespace, qualify_title};

const TITLES_PER_REQUEST: usize = 50;

/// One entry of a file's upload history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRevision {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub width: u32,
    pub height: u32,
    pub comment: String,
}

/// Read access to one wiki. Batched calls return an entry per title the wiki
/// answered for; absent keys mean "missing".
pub trait WikiAccess {
    fn get_page_text(&mut self, title: &str) -> Result<String>;
    fn get_categories(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>>;
    /// Revisions newest first, as the wiki reports them.
    fn get_image_history(&mut self, title: &str) -> Result<Vec<ImageRevision>>;
    fn exists_batch(
        &mut self,
        titles: &[String],
        namespace: Namespace,
    ) -> Result<BTreeMap<String, bool>>;
    fn get_links_on_page(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>>;
    fn get_shared_duplicates(
        &mut self,
        titles: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>>;
    /// Redirects pointing at `title`.
    fn what_links_here(&mut self, title: &str) -> Result<Vec<String>>;
    fn request_count(&self) -> usize;

    fn resolve_canonical_title(&self, title: &str, namespace: Namespace) -> String {
        canonical_title(title, namespace)
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn source(config: &MtcConfig) -> Self {
        Self::from_env_with_defaults(config.source_api_url(), config.user_agent(&config.source))
    }

    pub fn destination(config: &MtcConfig) -> Self {
        Self::from_env_with_defaults(
            config.destination_api_url(),
            config.user_agent(&config.destination),
        )
    }

    fn from_env_with_defaults(api_url: String, user_agent: String) -> Self {
        Self {
            api_url,
            user_agent,
            timeout_ms: env_value_u64("MTC_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("MTC_RATE_LIMIT_READ_MS", 300),
            max_retries: env_value_usize("MTC_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("MTC_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid MediaWiki API URL: {}", self.config.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("MediaWiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    /// Runs a `prop=` query over `titles` in chunks, following continuation, and
    /// hands every returned page to `visit` together with the title as requested
    /// (before the wiki normalized it).
    fn query_pages<F>(
        &mut self,
        titles: &[String],
        base_params: &[(&str, String)],
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&str, PageItem),
    {
        for batch in titles.chunks(TITLES_PER_REQUEST) {
            let mut continuation: BTreeMap<String, String> = BTreeMap::new();
            loop {
                let response = {
                    let mut params = base_params.to_vec();
                    params.push(("titles", batch.join("|")));
                    for (key, value) in &continuation {
                        params.push((key.as_str(), value.clone()));
                    }
                    self.request_json_get(&params)?
                };
                let parsed: QueryResponse = serde_json::from_value(response)
                    .context("failed to decode page query API response")?;
                let aliases = requested_title_map(&parsed.query.normalized);
                for page in parsed.query.pages {
                    let requested = aliases
                        .get(&page.title)
                        .cloned()
                        .unwrap_or_else(|| page.title.clone());
                    visit(&requested, page);
                }

                continuation = continuation_params(parsed.continuation);
                if continuation.is_empty() {
                    break;
                }
            }
        }
        Ok(())
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_read_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl WikiAccess for MediaWikiClient {
    fn get_page_text(&mut self, title: &str) -> Result<String> {
        let params = [
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ];
        let mut content = None;
        self.query_pages(&[title.to_string()], &params, |_, page| {
            if page.missing.unwrap_or(false) {
                return;
            }
            content = page
                .revisions
                .into_iter()
                .next()
                .and_then(|revision| revision.slots)
                .and_then(|slots| slots.main)
                .map(|slot| slot.content);
        })?;
        content.ok_or_else(|| anyhow::anyhow!("page text missing in API response: {title}"))
    }

    fn get_categories(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let params = [
            ("action", "query".to_string()),
            ("prop", "categories".to_string()),
            ("cllimit", "max".to_string()),
        ];
        let mut output: BTreeMap<String, Vec<String>> = BTreeMap::new();
        self.query_pages(titles, &params, |requested, page| {
            if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
                return;
            }
            output
                .entry(requested.to_string())
                .or_default()
                .extend(page.categories.into_iter().map(|item| item.title));
        })?;
        Ok(output)
    }

    fn get_image_history(&mut self, title: &str) -> Result<Vec<ImageRevision>> {
        let params = [
            ("action", "query".to_string()),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "timestamp|user|comment|size".to_string()),
            ("iilimit", "max".to_string()),
        ];
        let mut raw = Vec::new();
        self.query_pages(&[title.to_string()], &params, |_, page| {
            raw.extend(page.imageinfo);
        })?;

        let mut revisions = Vec::with_capacity(raw.len());
        for item in raw {
            let timestamp = DateTime::parse_from_rfc3339(&item.timestamp)
                .with_context(|| format!("invalid imageinfo timestamp: {}", item.timestamp))?
                .with_timezone(&Utc);
            revisions.push(ImageRevision {
                timestamp,
                user: item.user.unwrap_or_default(),
                width: item.width,
                height: item.height,
                comment: item.comment.unwrap_or_default(),
            });
        }
        Ok(revisions)
    }

    fn exists_batch(
        &mut self,
        titles: &[String],
        namespace: Namespace,
    ) -> Result<BTreeMap<String, bool>> {
        let requested_by_qualified = qualified_titles(titles, namespace);
        let qualified = requested_by_qualified.keys().cloned().collect::<Vec<_>>();
        let params = [("action", "query".to_string()), ("prop", "info".to_string())];

        let mut output = BTreeMap::new();
        self.query_pages(&qualified, &params, |api_title, page| {
            let Some(requested) = requested_by_qualified.get(api_title) else {
                return;
            };
            let exists = !page.missing.unwrap_or(false) && !page.invalid.unwrap_or(false);
            output.insert(requested.clone(), exists);
        })?;
        debug!(
            requested = titles.len(),
            answered = output.len(),
            namespace = namespace.as_str(),
            "existence query"
        );
        Ok(output)
    }

    fn get_links_on_page(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let params = [
            ("action", "query".to_string()),
            ("prop", "links".to_string()),
            ("pllimit", "max".to_string()),
        ];
        let mut output: BTreeMap<String, Vec<String>> = BTreeMap::new();
        self.query_pages(titles, &params, |requested, page| {
            if page.missing.unwrap_or(false) {
                return;
            }
            output
                .entry(requested.to_string())
                .or_default()
                .extend(page.links.into_iter().map(|item| item.title));
        })?;
        Ok(output)
    }

    fn get_shared_duplicates(
        &mut self,
        titles: &[String],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let params = [
            ("action", "query".to_string()),
            ("prop", "duplicatefiles".to_string()),
            ("dflimit", "max".to_string()),
        ];
        let mut output: BTreeMap<String, Vec<String>> = BTreeMap::new();
        self.query_pages(titles, &params, |requested, page| {
            if page.missing.unwrap_or(false) {
                return;
            }
            output.entry(requested.to_string()).or_default().extend(
                page.duplicatefiles
                    .into_iter()
                    .filter(|item| item.shared.unwrap_or(false))
                    .map(|item| ensure_namespace(&item.name.replace('_', " "), Namespace::File)),
            );
        })?;
        Ok(output)
    }

    fn what_links_here(&mut self, title: &str) -> Result<Vec<String>> {
        let mut titles = BTreeSet::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "backlinks".to_string()),
                ("bltitle", title.to_string()),
                ("blfilterredir", "redirects".to_string()),
                ("bllimit", "max".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("blcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode backlinks API response")?;
            for item in parsed.query.backlinks {
                titles.insert(item.title);
            }

            continue_token = parsed
                .continuation
                .and_then(|cont| cont.get("blcontinue").and_then(value_to_param));
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles.into_iter().collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Query title for each requested title, keyed by the query title.
fn qualified_titles(titles: &[String], namespace: Namespace) -> BTreeMap<String, String> {
    titles
        .iter()
        .map(|title| (qualify_title(title, namespace), title.clone()))
        .collect()
}

fn requested_title_map(normalized: &[NormalizedItem]) -> BTreeMap<String, String> {
    normalized
        .iter()
        .map(|item| (item.to.clone(), item.from.clone()))
        .collect()
}

fn continuation_params(continuation: Option<BTreeMap<String, Value>>) -> BTreeMap<String, String> {
    continuation
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value_to_param(&value).map(|value| (key, value)))
        .collect()
}

fn value_to_param(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    normalized: Vec<NormalizedItem>,
    #[serde(default)]
    pages: Vec<PageItem>,
    #[serde(default)]
    backlinks: Vec<TitleItem>,
}

#[derive(Debug, Deserialize)]
struct NormalizedItem {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct TitleItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
    #[serde(default)]
    categories: Vec<TitleItem>,
    #[serde(default)]
    links: Vec<TitleItem>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
    #[serde(default)]
    duplicatefiles: Vec<DuplicateFileItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    timestamp: String,
    user: Option<String>,
    comment: Option<String>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct DuplicateFileItem {
    name: String,
    shared: Option<bool>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn existence_titles_keep_foreign_namespaces() {
        let titles = vec!["Self".to_string(), "User:Alice/sig".to_string()];
        let qualified = qualified_titles(&titles, Namespace::Template);
        assert_eq!(
            qualified.get("Template:Self").map(String::as_str),
            Some("Self")
        );
        assert_eq!(
            qualified.get("User:Alice/sig").map(String::as_str),
            Some("User:Alice/sig")
        );
        assert!(!qualified.contains_key("Template:User:Alice/sig"));
    }

    #[test]
    fn query_response_decodes_pages_and_continuation() {
        let payload = json!({
            "continue": {"clcontinue": "123|Birds", "continue": "||"},
            "query": {
                "normalized": [{"fromencoded": false, "from": "File:a.jpg", "to": "File:A.jpg"}],
                "pages": [
                    {
                        "pageid": 1,
                        "ns": 6,
                        "title": "File:A.jpg",
                        "categories": [{"ns": 14, "title": "Category:Birds"}]
                    },
                    {"ns": 6, "title": "File:Gone.jpg", "missing": true}
                ]
            }
        });
        let parsed: QueryResponse = serde_json::from_value(payload).expect("decode");
        let aliases = requested_title_map(&parsed.query.normalized);
        assert_eq!(aliases.get("File:A.jpg").map(String::as_str), Some("File:a.jpg"));
        assert_eq!(parsed.query.pages.len(), 2);
        assert_eq!(parsed.query.pages[0].categories[0].title, "Category:Birds");
        assert_eq!(parsed.query.pages[1].missing, Some(true));

        let continuation = continuation_params(parsed.continuation);
        assert_eq!(
            continuation.get("clcontinue").map(String::as_str),
            Some("123|Birds")
        );
        assert_eq!(continuation.get("continue").map(String::as_str), Some("||"));
    }

    #[test]
    fn imageinfo_and_duplicates_decode() {
        let payload = json!({
            "query": {
                "pages": [{
                    "ns": 6,
                    "title": "File:A.jpg",
                    "imageinfo": [{
                        "timestamp": "2020-01-01T12:00:00Z",
                        "user": "Alice",
                        "comment": "Initial upload",
                        "width": 640,
                        "height": 480
                    }],
                    "duplicatefiles": [
                        {"name": "B.jpg", "user": "Bob", "timestamp": "2020-01-02T00:00:00Z", "shared": true},
                        {"name": "C.jpg", "user": "Carol", "timestamp": "2020-01-03T00:00:00Z"}
                    ]
                }]
            }
        });
        let parsed: QueryResponse = serde_json::from_value(payload).expect("decode");
        let page = &parsed.query.pages[0];
        assert_eq!(page.imageinfo[0].width, 640);
        assert_eq!(page.imageinfo[0].user.as_deref(), Some("Alice"));
        let shared = page
            .duplicatefiles
            .iter()
            .filter(|item| item.shared.unwrap_or(false))
            .count();
        assert_eq!(shared, 1);
    }

    #[test]
    fn retryable_statuses_match_transient_failures() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn default_canonical_resolution_strips_template_namespace() {
        struct Offline;
        impl WikiAccess for Offline {
            fn get_page_text(&mut self, _title: &str) -> Result<String> {
                bail!("offline")
            }
            fn get_categories(
                &mut self,
                _titles: &[String],
            ) -> Result<BTreeMap<String, Vec<String>>> {
                bail!("offline")
            }
            fn get_image_history(&mut self, _title: &str) -> Result<Vec<ImageRevision>> {
                bail!("offline")
            }
            fn exists_batch(
                &mut self,
                _titles: &[String],
                _namespace: Namespace,
            ) -> Result<BTreeMap<String, bool>> {
                bail!("offline")
            }
            fn get_links_on_page(
                &mut self,
                _titles: &[String],
            ) -> Result<BTreeMap<String, Vec<String>>> {
                bail!("offline")
            }
            fn get_shared_duplicates(
                &mut self,
                _titles: &[String],
            ) -> Result<BTreeMap<String, Vec<String>>> {
                bail!("offline")
            }
            fn what_links_here(&mut self, _title: &str) -> Result<Vec<String>> {
                bail!("offline")
            }
            fn request_count(&self) -> usize {
                0
            }
        }

        assert_eq!(
            Offline.resolve_canonical_title("Template:gfdl-self", Namespace::Template),
            "Gfdl-self"
        );
    }
}
