// src/credentials.rs

use crate::config::{app_config_dir, Config, ProviderKind};
use crate::error::Result;
use anyhow::{anyhow, Context};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

const CREDENTIALS_FILE: &str = "credentials.json";

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Saved,
    Pinned,
}

/// Provider keys saved by the user, persisted as a flat JSON object
/// (`{"gemini_key": "...", "groq_key": "..."}`).
///
/// A store without a backing file (no config dir, unreadable path) still
/// works for the current session; saves report the persistence failure.
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, String>>,
}

/// Storage key for a provider, `None` for providers that take no credential.
pub fn storage_key(provider: ProviderKind) -> Option<&'static str> {
    match provider {
        ProviderKind::Gemini => Some("gemini_key"),
        ProviderKind::Groq => Some("groq_key"),
        ProviderKind::HuggingFace => Some("huggingface_key"),
        ProviderKind::Pollinations => None,
    }
}

pub fn default_credentials_path() -> PathBuf {
    app_config_dir().join(CREDENTIALS_FILE)
}

impl CredentialStore {
    pub fn open(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => {
                    debug!(?path, count = entries.len(), "Loaded saved credentials");
                    entries
                }
                Err(e) => {
                    warn!(?path, error = %e, "Credential file is corrupt; starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(?path, error = %e, "Credential file unreadable; starting empty");
                BTreeMap::new()
            }
        };
        CredentialStore {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
        }
    }

    /// Session-only store.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        CredentialStore {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Saved key for a provider; empty strings count as absent.
    pub fn get(&self, provider: ProviderKind) -> Option<String> {
        let key = storage_key(provider)?;
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }

    /// Overwrites the saved key and persists synchronously.
    /// An empty value clears the entry. The in-memory value is kept even
    /// when writing the file fails.
    pub fn set(&self, provider: ProviderKind, value: &str) -> Result<()> {
        let key = storage_key(provider).ok_or_else(|| anyhow!("{} does not use an API key", provider))?;
        let snapshot = {
            let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
            let value = value.trim();
            if value.is_empty() {
                entries.remove(key);
            } else {
                entries.insert(key.to_string(), value.to_string());
            }
            entries.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow!("No credential file available; key kept for this session only"))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let body = serde_json::to_string_pretty(entries).context("Failed to serialize credentials")?;
        fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(?path, "Credentials saved");
        Ok(())
    }

    /// Saved credential first, then the operator-pinned default.
    pub fn resolve(&self, provider: ProviderKind, config: &Config) -> Option<(String, CredentialSource)> {
        self.get(provider)
            .map(|k| (k, CredentialSource::Saved))
            .or_else(|| config.pinned_key(provider).map(|k| (k.to_string(), CredentialSource::Pinned)))
    }
}

/// `gsk_abc...wxyz` style masking for display.
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
