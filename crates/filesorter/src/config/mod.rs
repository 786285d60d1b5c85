//! Settings snapshot consumed by the orchestrator.
//!
//! The host application owns settings persistence; the core only reads an
//! immutable snapshot per run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration directory.
const CONFIG_DIR_ENV: &str = "AI_FILE_SORTER_CONFIG_DIR";

/// Which model backend serves categorization requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmChoice {
    #[default]
    Local,
    RemoteOpenAi,
    RemoteGemini,
    RemoteCustom,
}

impl LlmChoice {
    pub fn is_remote(self) -> bool {
        !matches!(self, LlmChoice::Local)
    }

    pub fn is_local(self) -> bool {
        matches!(self, LlmChoice::Local)
    }
}

/// Language the model should use for category labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryLanguage {
    #[default]
    English,
    French,
    German,
    Spanish,
    Italian,
    Portuguese,
}

impl CategoryLanguage {
    /// English display name used inside prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            CategoryLanguage::English => "English",
            CategoryLanguage::French => "French",
            CategoryLanguage::German => "German",
            CategoryLanguage::Spanish => "Spanish",
            CategoryLanguage::Italian => "Italian",
            CategoryLanguage::Portuguese => "Portuguese",
        }
    }
}

/// A user-defined OpenAI-compatible endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomApiEndpoint {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl CustomApiEndpoint {
    /// An endpoint is usable once it knows where to connect and which model
    /// to ask for. Some servers run without authentication, so the key is
    /// optional.
    pub fn is_valid(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.model.trim().is_empty()
    }
}

/// Immutable per-run settings snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm_choice: LlmChoice,
    #[serde(default)]
    pub use_whitelist: bool,
    #[serde(default)]
    pub allowed_categories: Vec<String>,
    #[serde(default)]
    pub allowed_subcategories: Vec<String>,
    #[serde(default)]
    pub category_language: CategoryLanguage,
    #[serde(default)]
    pub include_subdirectories: bool,
    #[serde(default = "default_true")]
    pub use_consistency_hints: bool,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default)]
    pub active_custom_api_id: String,
    #[serde(default)]
    pub custom_api_endpoints: Vec<CustomApiEndpoint>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_choice: LlmChoice::Local,
            use_whitelist: false,
            allowed_categories: Vec::new(),
            allowed_subcategories: Vec::new(),
            category_language: CategoryLanguage::English,
            include_subdirectories: false,
            use_consistency_hints: true,
            openai_api_key: String::new(),
            gemini_api_key: String::new(),
            active_custom_api_id: String::new(),
            custom_api_endpoints: Vec::new(),
        }
    }
}

impl Settings {
    /// Looks up the active custom endpoint record, if any.
    pub fn find_custom_api_endpoint(&self, id: &str) -> Option<&CustomApiEndpoint> {
        if id.is_empty() {
            return None;
        }
        self.custom_api_endpoints
            .iter()
            .find(|endpoint| endpoint.id == id)
    }

    /// The active custom endpoint, when `llm_choice` is `RemoteCustom`.
    pub fn active_custom_endpoint(&self) -> Option<&CustomApiEndpoint> {
        self.find_custom_api_endpoint(&self.active_custom_api_id)
    }
}

/// Resolves the configuration directory: the `AI_FILE_SORTER_CONFIG_DIR`
/// override when set, otherwise `fallback`.
pub fn resolve_config_dir(fallback: &Path) -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback.to_path_buf())
}
