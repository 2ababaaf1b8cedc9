//! Engine tuning knobs and remote server definitions.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_AGENT_ITERATIONS: usize = 25;
pub const DEFAULT_MAX_CHAT_ITERATIONS: usize = 5;
pub const DEFAULT_TEXT_FLUSH_MS: u64 = 50;
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 30;

/// Loop limits and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Iteration bound when agent mode is on.
    pub max_agent_iterations: usize,
    /// Iteration bound in plain chat mode.
    pub max_chat_iterations: usize,
    pub text_flush_interval_ms: u64,
    /// `None` waits for the user indefinitely.
    pub confirmation_timeout_secs: Option<u64>,
    pub shell_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_agent_iterations: DEFAULT_MAX_AGENT_ITERATIONS,
            max_chat_iterations: DEFAULT_MAX_CHAT_ITERATIONS,
            text_flush_interval_ms: DEFAULT_TEXT_FLUSH_MS,
            confirmation_timeout_secs: None,
            shell_timeout_secs: DEFAULT_SHELL_TIMEOUT_SECS,
        }
    }
}

impl EngineSettings {
    pub fn max_iterations(&self, agent_enabled: bool) -> usize {
        let bound = if agent_enabled {
            self.max_agent_iterations
        } else {
            self.max_chat_iterations
        };
        bound.max(1)
    }

    pub fn text_flush_interval(&self) -> Duration {
        Duration::from_millis(self.text_flush_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    pub(crate) fn apply_env(&mut self) {
        if let Some(v) = env_parse("CONVOY_MAX_AGENT_ITERATIONS") {
            self.max_agent_iterations = v;
        }
        if let Some(v) = env_parse("CONVOY_MAX_CHAT_ITERATIONS") {
            self.max_chat_iterations = v;
        }
        if let Some(v) = env_parse("CONVOY_TEXT_FLUSH_MS") {
            self.text_flush_interval_ms = v;
        }
        if let Some(v) = env_parse("CONVOY_CONFIRMATION_TIMEOUT_SECS") {
            self.confirmation_timeout_secs = Some(v);
        }
        if let Some(v) = env_parse("CONVOY_SHELL_TIMEOUT_SECS") {
            self.shell_timeout_secs = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// A remote tool server launched as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}
