// src/config.rs
use crate::error::Result;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fmt, fs};
use tracing::{debug, info, warn};

pub const APP_DIR: &str = "fanout-chat";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    HuggingFace,
    Pollinations,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::Groq,
        ProviderKind::HuggingFace,
        ProviderKind::Pollinations,
    ];

    pub fn get_provider_name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Groq => "Groq",
            ProviderKind::HuggingFace => "HuggingFace",
            ProviderKind::Pollinations => "Pollinations",
        }
    }

    pub fn get_provider_config_name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Pollinations => "pollinations",
        }
    }

    /// Environment variable holding the pinned default key, if the provider takes one.
    pub fn get_provider_api_key_name(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            ProviderKind::Pollinations => None,
        }
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.get_provider_config_name() == name || (name == "hf" && *kind == ProviderKind::HuggingFace))
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_provider_name())
    }
}

/// How successful responses are turned into display markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarkupMode {
    /// Pipe Markdown through the `glow` terminal renderer.
    Glow,
    /// Convert Markdown to escaped HTML.
    Html,
    /// Print the text untouched.
    Plain,
}

/// One output region bound to a single provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub id: String,
    pub label: String,
    pub provider: ProviderKind,
    pub model: String,
    /// A missing credential for a required slot aborts the whole dispatch.
    #[serde(default)]
    pub required: bool,
}

impl SlotConfig {
    pub fn new(id: &str, label: &str, provider: ProviderKind, model: &str, required: bool) -> Self {
        SlotConfig {
            id: id.to_string(),
            label: label.to_string(),
            provider,
            model: model.to_string(),
            required,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // General
    pub slots: Vec<SlotConfig>,
    pub temperature: f32,
    pub markup: MarkupMode,
    /// Drop settlements from a dispatch older than the slot's latest one.
    pub discard_stale_results: bool,

    // Gemini specific
    pub gemini_api_key: Option<String>,
    pub gemini_api_base_url: String,

    // Groq Specific
    pub groq_api_key: Option<String>,
    pub groq_api_base_url: String,

    // Hugging Face Specific
    pub huggingface_api_key: Option<String>,
    pub huggingface_api_base_url: String,

    // Pollinations (no auth)
    pub pollinations_api_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            slots: vec![
                SlotConfig::new("gemini", "Gemini Pro", ProviderKind::Gemini, "gemini-pro", true),
                SlotConfig::new("groq1", "Llama 3.3 (Smart)", ProviderKind::Groq, "llama-3.3-70b-versatile", false),
                SlotConfig::new("groq2", "Llama 3.1 (Fast)", ProviderKind::Groq, "llama-3.1-8b-instant", false),
            ],
            temperature: 0.7,
            markup: MarkupMode::Glow,
            discard_stale_results: false,
            // Gemini
            gemini_api_key: None,
            gemini_api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            // Groq
            groq_api_key: None,
            groq_api_base_url: "https://api.groq.com/openai/v1".to_string(),
            // Hugging Face
            huggingface_api_key: None,
            huggingface_api_base_url: "https://api-inference.huggingface.co".to_string(),
            // Pollinations
            pollinations_api_base_url: "https://text.pollinations.ai".to_string(),
        }
    }
}

pub fn app_config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

impl Config {
    /// Defaults, then the config file (explicit path or the default location), then env vars.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = app_config_dir().join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    debug!(?default_path, "No config file found, using defaults");
                    Config::default()
                }
            }
        };

        config.apply_env(|name| env::var(name).ok());
        config.validate()?;

        info!(slots = config.slots.len(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(?path, "Loaded config file");
        Ok(config)
    }

    /// Environment variables override whatever key the file pinned.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for provider in ProviderKind::ALL {
            let Some(var) = provider.get_provider_api_key_name() else {
                continue;
            };
            let Some(key) = lookup(var).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            match provider {
                ProviderKind::Gemini => self.gemini_api_key = Some(key),
                ProviderKind::Groq => self.groq_api_key = Some(key),
                ProviderKind::HuggingFace => self.huggingface_api_key = Some(key),
                ProviderKind::Pollinations => {}
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.slots.is_empty() {
            return Err(anyhow!("Configuration must define at least one slot"));
        }
        let mut seen = std::collections::HashSet::new();
        for slot in &self.slots {
            if slot.id.trim().is_empty() {
                return Err(anyhow!("Slot ids must not be empty"));
            }
            if !seen.insert(slot.id.as_str()) {
                return Err(anyhow!("Duplicate slot id '{}'", slot.id));
            }
            if slot.model.trim().is_empty() {
                warn!("Slot '{}' has an empty model name", slot.id);
            }
        }
        Ok(())
    }

    /// Operator-pinned default key for a provider (config file or env).
    pub fn pinned_key(&self, provider: ProviderKind) -> Option<&str> {
        let key = match provider {
            ProviderKind::Gemini => self.gemini_api_key.as_deref(),
            ProviderKind::Groq => self.groq_api_key.as_deref(),
            ProviderKind::HuggingFace => self.huggingface_api_key.as_deref(),
            ProviderKind::Pollinations => None,
        };
        key.filter(|k| !k.trim().is_empty())
    }

    pub fn base_url(&self, provider: ProviderKind) -> &str {
        let url = match provider {
            ProviderKind::Gemini => &self.gemini_api_base_url,
            ProviderKind::Groq => &self.groq_api_base_url,
            ProviderKind::HuggingFace => &self.huggingface_api_base_url,
            ProviderKind::Pollinations => &self.pollinations_api_base_url,
        };
        url.trim_end_matches('/')
    }

    pub fn slot(&self, id: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Point every provider at one base URL (mock servers, proxies).
    #[cfg(test)]
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.gemini_api_base_url = url.to_string();
        self.groq_api_base_url = url.to_string();
        self.huggingface_api_base_url = url.to_string();
        self.pollinations_api_base_url = url.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_mirror_three_slot_layout() {
        let config = Config::default();
        let ids: Vec<&str> = config.slots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["gemini", "groq1", "groq2"]);
        assert!(config.slots[0].required);
        assert!(!config.slots[1].required);
        assert_eq!(config.temperature, 0.7);
        assert!(!config.discard_stale_results);
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "slots": [
                    {"id": "main", "label": "Pollinations", "provider": "pollinations", "model": "openai", "required": true},
                    {"id": "fast", "label": "Fast", "provider": "groq", "model": "llama-3.1-8b-instant"}
                ],
                "markup": "plain"
            }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.slots.len(), 2);
        assert_eq!(config.slots[0].provider, ProviderKind::Pollinations);
        assert!(!config.slots[1].required);
        assert_eq!(config.markup, MarkupMode::Plain);
        assert_eq!(config.groq_api_base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn load_reads_explicit_file_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"slots": [{"id": "solo", "label": "Solo", "provider": "pollinations", "model": "openai"}]}"#,
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        let ids: Vec<&str> = config.slots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["solo"]);

        fs::write(&path, r#"{"slots": []}"#).unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn env_overrides_pinned_file_keys() {
        let mut config = Config {
            groq_api_key: Some("gsk_from_file".to_string()),
            gemini_api_key: Some("AIza_from_file".to_string()),
            ..Config::default()
        };
        let env: HashMap<&str, &str> = [
            ("GROQ_API_KEY", "gsk_from_env"),
            ("GEMINI_API_KEY", "  "),
            ("HUGGINGFACE_API_KEY", "hf_from_env"),
        ]
        .into();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.pinned_key(ProviderKind::HuggingFace), Some("hf_from_env"));

        assert_eq!(config.pinned_key(ProviderKind::Groq), Some("gsk_from_env"));
        assert_eq!(config.pinned_key(ProviderKind::Gemini), Some("AIza_from_file"));
        assert_eq!(config.pinned_key(ProviderKind::Pollinations), None);
    }

    #[test]
    fn duplicate_slot_ids_are_rejected() {
        let mut config = Config::default();
        config.slots[2].id = "groq1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!(ProviderKind::from_config_name("GROQ"), Some(ProviderKind::Groq));
        assert_eq!(ProviderKind::from_config_name("hf"), Some(ProviderKind::HuggingFace));
        assert_eq!(ProviderKind::from_config_name("ollama"), None);
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let config = Config::default().with_base_url("http://127.0.0.1:9999/");
        assert_eq!(config.base_url(ProviderKind::Gemini), "http://127.0.0.1:9999");
    }
}
