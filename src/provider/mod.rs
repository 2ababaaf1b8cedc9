//! Provider adapter interface and registry.

pub mod http;
pub mod openai_compatible;

pub use openai_compatible::OpenAiCompatibleProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::Credentials;
use crate::error::{ConvoyError, Result};
use crate::tools::ToolDefinition;
use crate::types::{Attachment, GenerationSettings, Message, Role, ToolCall, Usage};

/// How a provider relates to tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Plain API: tools are offered by us and executed locally.
    Api,
    /// The backend runs its own tools and reports them for display only.
    Passthrough,
}

/// A message in the provider-neutral request transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ProviderMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            text: text.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }
}

impl From<&Message> for ProviderMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            attachments: message.attachments.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
            tool_name: message.tool_name.clone(),
        }
    }
}

/// One call to a provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolDefinition>,
    pub credentials: Credentials,
    pub settings: GenerationSettings,
}

/// Final result of one streamed provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// Streaming events produced by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    /// A tool call began streaming (display only).
    ToolCallStarted { id: String, name: String },
    /// More argument text for a streaming tool call (display only).
    ToolCallArgumentsDelta { id: String, delta: String },
    /// A completed tool use reported by a passthrough backend.
    CliToolUse(ToolCall),
    Done(ProviderResponse),
}

/// A model backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Registry key, e.g. "openai".
    fn provider_name(&self) -> &str;

    fn kind(&self) -> ProviderKind {
        ProviderKind::Api
    }

    /// Send a request and stream back events. The stream must end with
    /// [`StreamEvent::Done`] on success.
    async fn stream_message(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Provider adapters keyed by provider name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled OpenAI-compatible endpoints.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiCompatibleProvider::openai()));
        registry.register(Arc::new(OpenAiCompatibleProvider::openrouter()));
        registry.register(Arc::new(OpenAiCompatibleProvider::gemini()));
        registry.register(Arc::new(OpenAiCompatibleProvider::new(
            "openai-compatible",
            None,
        )));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers
            .insert(provider.provider_name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ModelProvider>> {
        self.providers.get(name).cloned().ok_or_else(|| {
            ConvoyError::Configuration(format!("No provider registered for '{name}'"))
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}
