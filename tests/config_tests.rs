//! Tests for the layered configuration.

use std::sync::{Mutex, OnceLock};

use pretty_assertions::assert_eq;

use convoy::config::{ConvoyConfig, EngineSettings};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 12] = [
    "OPENAI_API_KEY",
    "OPENROUTER_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "OPENAI_COMPAT_API_KEY",
    "OPENAI_BASE_URL",
    "OPENROUTER_BASE_URL",
    "OPENAI_COMPAT_BASE_URL",
    "CONVOY_MAX_AGENT_ITERATIONS",
    "CONVOY_MAX_CHAT_ITERATIONS",
    "CONVOY_CONFIRMATION_TIMEOUT_SECS",
    "CONVOY_CONFIG",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn config_set_get_api_key() {
    let config = ConvoyConfig::new();
    config.set_api_key("openai", "sk-test-123".to_string());
    assert_eq!(config.get_api_key("openai"), Some("sk-test-123".to_string()));
    assert_eq!(config.get_api_key("openrouter"), None);
    assert!(config.has_api_key("openai"));
}

#[test]
fn credentials_combine_key_and_base_url() {
    let config = ConvoyConfig::new();
    config.set_api_key("openai-compatible", "k".into());
    config.set_base_url("openai-compatible", "http://localhost:1234/v1".into());
    let creds = config.credentials("openai-compatible");
    assert_eq!(creds.api_key.as_deref(), Some("k"));
    assert_eq!(creds.base_url.as_deref(), Some("http://localhost:1234/v1"));
}

#[test]
fn clones_share_credentials() {
    let config = ConvoyConfig::new();
    let clone = config.clone();
    config.set_api_key("gemini", "g".into());
    assert_eq!(clone.get_api_key("gemini").as_deref(), Some("g"));
}

#[test]
fn env_supplies_keys_and_limits() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    std::env::set_var("OPENROUTER_API_KEY", "sk-or-env");
    std::env::set_var("GOOGLE_API_KEY", "g-env");
    std::env::set_var("CONVOY_MAX_AGENT_ITERATIONS", "40");
    std::env::set_var("CONVOY_MAX_CHAT_ITERATIONS", "not-a-number");
    std::env::set_var("CONVOY_CONFIRMATION_TIMEOUT_SECS", "120");

    let config = ConvoyConfig::from_env();
    assert_eq!(config.get_api_key("openrouter").as_deref(), Some("sk-or-env"));
    assert_eq!(config.get_api_key("gemini").as_deref(), Some("g-env"));
    assert_eq!(config.settings.max_iterations(true), 40);
    assert_eq!(config.settings.max_iterations(false), 5);
    assert_eq!(
        config.settings.confirmation_timeout(),
        Some(std::time::Duration::from_secs(120))
    );
}

#[test]
fn env_overrides_config_file() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [engine]
        max_agent_iterations = 8

        [providers.openai]
        api_key = "from-file"
        base_url = "http://file.test/v1"
        "#,
    )
    .unwrap();
    std::env::set_var("CONVOY_CONFIG", &path);
    std::env::set_var("OPENAI_API_KEY", "from-env");

    let config = ConvoyConfig::load().unwrap();
    assert_eq!(config.get_api_key("openai").as_deref(), Some("from-env"));
    assert_eq!(
        config.get_base_url("openai").as_deref(),
        Some("http://file.test/v1")
    );
    assert_eq!(config.settings.max_agent_iterations, 8);
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("CONVOY_CONFIG", dir.path().join("absent.toml"));

    let config = ConvoyConfig::load().unwrap();
    assert_eq!(config.settings, EngineSettings::default());
    assert!(config.remote_servers.is_empty());
}
