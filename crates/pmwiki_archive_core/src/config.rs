use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::extract::DEFAULT_CONTENT_ELEMENT_ID;

pub const DEFAULT_USER_AGENT: &str = "pmwiki-archive/0.1";
pub const DEFAULT_LOGIN_PATH: &str = "Main/LoginPage";
pub const DEFAULT_PREVIEW_AUTHOR: &str = "pmwiki-archive";
pub const DEFAULT_PREVIEW_LABEL: &str = "Preview";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub convert: ConvertSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub login_path: Option<String>,
    /// Author recorded on the preview submissions used to render old revisions.
    pub preview_author: Option<String>,
    pub preview_label: Option<String>,
    pub content_element_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConvertSection {
    pub source_dir: Option<String>,
    pub output_dir: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub ignored_names: Vec<String>,
    pub start_offset: Option<usize>,
}

impl WikiConfig {
    /// Resolve the wiki base URL: env WIKI_URL > config > None.
    pub fn wiki_url(&self) -> Option<String> {
        env_override("WIKI_URL").or_else(|| self.wiki.url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve preview author: env WIKI_PREVIEW_AUTHOR > config > DEFAULT_PREVIEW_AUTHOR.
    pub fn preview_author(&self) -> String {
        env_override("WIKI_PREVIEW_AUTHOR")
            .or_else(|| self.wiki.preview_author.clone())
            .unwrap_or_else(|| DEFAULT_PREVIEW_AUTHOR.to_string())
    }

    pub fn preview_label(&self) -> &str {
        self.wiki
            .preview_label
            .as_deref()
            .unwrap_or(DEFAULT_PREVIEW_LABEL)
    }

    pub fn content_element_id(&self) -> &str {
        self.wiki
            .content_element_id
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_ELEMENT_ID)
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# pmwiki-archive configuration\n\n[wiki]\n# url = \"https://wiki.example.org/wiki/\"\n# login_path = \"{DEFAULT_LOGIN_PATH}\"\n# user_agent = \"{DEFAULT_USER_AGENT}\"\n# preview_author = \"{DEFAULT_PREVIEW_AUTHOR}\"\n# preview_label = \"{DEFAULT_PREVIEW_LABEL}\"\n# content_element_id = \"{DEFAULT_CONTENT_ELEMENT_ID}\"\n\n[convert]\n# source_dir = \"wiki.d\"\n# output_dir = \"converted\"\nnamespaces = [\"Main\"]\nignored_names = [\"RecentChanges\", \"GroupAttributes\"]\n# start_offset = 0\n"
    )
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
