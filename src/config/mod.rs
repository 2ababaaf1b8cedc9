//! Configuration system (layered: code > env > config file).

pub mod settings;

pub use settings::{EngineSettings, RemoteServerConfig};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::error::{ConvoyError, Result};

/// Per-provider credentials handed to the provider adapter with each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Layered configuration for convoy.
///
/// Resolution order: values set in code win over environment variables,
/// which win over the TOML config file.
#[derive(Debug, Clone, Default)]
pub struct ConvoyConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    pub settings: EngineSettings,
    pub remote_servers: Vec<RemoteServerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    engine: EngineSettings,
    providers: HashMap<String, ProviderSection>,
    remote_servers: Vec<RemoteServerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderSection {
    api_key: Option<String>,
    base_url: Option<String>,
}

const API_KEY_ENV: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "openai"),
    ("OPENROUTER_API_KEY", "openrouter"),
    ("GEMINI_API_KEY", "gemini"),
    ("GOOGLE_API_KEY", "gemini"),
    ("OPENAI_COMPAT_API_KEY", "openai-compatible"),
];

const BASE_URL_ENV: &[(&str, &str)] = &[
    ("OPENAI_BASE_URL", "openai"),
    ("OPENROUTER_BASE_URL", "openrouter"),
    ("OPENAI_COMPAT_BASE_URL", "openai-compatible"),
];

impl ConvoyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::new(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from environment variables only (OPENAI_API_KEY, CONVOY_* etc.).
    pub fn from_env() -> Self {
        let mut config = Self::new();
        config.apply_env();
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConvoyError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw)
            .map_err(|e| ConvoyError::Configuration(format!("invalid config file: {e}")))?;
        let config = Self {
            settings: file.engine,
            remote_servers: file.remote_servers,
            ..Self::default()
        };
        for (provider, section) in file.providers {
            if let Some(key) = section.api_key {
                config.set_api_key(&provider, key);
            }
            if let Some(url) = section.base_url {
                config.set_base_url(&provider, url);
            }
        }
        Ok(config)
    }

    fn apply_env(&mut self) {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        for (env_var, provider) in API_KEY_ENV {
            if let Ok(key) = std::env::var(env_var) {
                self.set_api_key(provider, key);
            }
        }
        for (env_var, provider) in BASE_URL_ENV {
            if let Ok(url) = std::env::var(env_var) {
                self.set_base_url(provider, url);
            }
        }
        self.settings.apply_env();
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        let mut keys = self.api_keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(provider.to_string(), key);
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.read().ok()?.get(provider).cloned()
    }

    pub fn has_api_key(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        let mut urls = self.base_urls.write().unwrap_or_else(|e| e.into_inner());
        urls.insert(provider.to_string(), url);
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.read().ok()?.get(provider).cloned()
    }

    pub fn credentials(&self, provider: &str) -> Credentials {
        Credentials {
            api_key: self.get_api_key(provider),
            base_url: self.get_base_url(provider),
        }
    }
}

/// `CONVOY_CONFIG`, else `config.toml` in the platform config directory.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONVOY_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("dev", "convoy", "convoy")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn toml_file_populates_providers_and_servers() {
        let config = ConvoyConfig::from_toml_str(
            r#"
            [engine]
            max_agent_iterations = 12
            confirmation_timeout_secs = 90

            [providers.openrouter]
            api_key = "sk-or"
            base_url = "https://openrouter.test/api/v1"

            [[remote_servers]]
            name = "files"
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
            "#,
        )
        .unwrap();

        assert_eq!(config.settings.max_agent_iterations, 12);
        assert_eq!(config.settings.max_chat_iterations, 5);
        assert_eq!(
            config.credentials("openrouter"),
            Credentials {
                api_key: Some("sk-or".into()),
                base_url: Some("https://openrouter.test/api/v1".into()),
            }
        );
        assert_eq!(config.remote_servers.len(), 1);
        assert_eq!(config.remote_servers[0].args.len(), 3);
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = ConvoyConfig::from_toml_str("engine = [").unwrap_err();
        assert!(matches!(err, ConvoyError::Configuration(_)));
    }
}
