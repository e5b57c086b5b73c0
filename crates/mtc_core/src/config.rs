use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "mtc/0.2";
pub const DEFAULT_SOURCE_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const DEFAULT_DESTINATION_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_CONFIG_PAGE: &str = "Wikipedia:MTC!";
pub const DEFAULT_MARKER_TEMPLATE: &str = "Copy to Wikimedia Commons";
pub const DEFAULT_OWN_WORK_CATEGORY: &str = "Category:Self-published work";
pub const DEFAULT_TRACKING_CATEGORY: &str = "Category:Uploaded with MTC!";
pub const DEFAULT_MAX_NAME_ATTEMPTS: usize = 20;
pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".mtc/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MtcConfig {
    #[serde(default)]
    pub source: WikiSection,
    #[serde(default)]
    pub destination: WikiSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TransferSection {
    pub config_page: Option<String>,
    pub marker_template: Option<String>,
    pub own_work_category: Option<String>,
    pub tracking_category: Option<String>,
    pub max_name_attempts: Option<usize>,
}

impl MtcConfig {
    /// Resolve the source API URL: env MTC_SOURCE_API_URL > config > default.
    pub fn source_api_url(&self) -> String {
        env_override("MTC_SOURCE_API_URL")
            .or_else(|| self.source.api_url.clone())
            .unwrap_or_else(|| DEFAULT_SOURCE_API_URL.to_string())
    }

    /// Resolve the destination API URL: env MTC_DESTINATION_API_URL > config > default.
    pub fn destination_api_url(&self) -> String {
        env_override("MTC_DESTINATION_API_URL")
            .or_else(|| self.destination.api_url.clone())
            .unwrap_or_else(|| DEFAULT_DESTINATION_API_URL.to_string())
    }

    /// Resolve a user agent for one side: env MTC_USER_AGENT > section > DEFAULT_USER_AGENT.
    pub fn user_agent(&self, section: &WikiSection) -> String {
        env_override("MTC_USER_AGENT")
            .or_else(|| section.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn config_page(&self) -> &str {
        self.transfer
            .config_page
            .as_deref()
            .unwrap_or(DEFAULT_CONFIG_PAGE)
    }

    pub fn marker_template(&self) -> &str {
        self.transfer
            .marker_template
            .as_deref()
            .unwrap_or(DEFAULT_MARKER_TEMPLATE)
    }

    pub fn own_work_category(&self) -> &str {
        self.transfer
            .own_work_category
            .as_deref()
            .unwrap_or(DEFAULT_OWN_WORK_CATEGORY)
    }

    pub fn tracking_category(&self) -> &str {
        self.transfer
            .tracking_category
            .as_deref()
            .unwrap_or(DEFAULT_TRACKING_CATEGORY)
    }

    pub fn max_name_attempts(&self) -> usize {
        self.transfer
            .max_name_attempts
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_NAME_ATTEMPTS)
    }
}

/// Load and parse an MtcConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MtcConfig> {
    if !config_path.exists() {
        return Ok(MtcConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MtcConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
