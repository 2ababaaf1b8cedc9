//! Remote tool servers (Model Context Protocol).
//!
//! [`RemoteToolService`] is the seam to one server; [`RemoteToolHub`] owns
//! every connected service, caches their tool lists, and renders call
//! results as tool output text.

#[cfg(feature = "mcp")]
pub mod client;

#[cfg(feature = "mcp")]
pub use client::McpToolService;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConvoyError, Result};
use crate::tools::{ToolDefinition, ToolOutput};

/// A tool as advertised by a remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// One content item of a remote call result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteContent {
    Text(String),
    /// Non-text content (image, audio, blob); only its kind is kept.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteCallResult {
    pub content: Vec<RemoteContent>,
    pub is_error: bool,
}

impl RemoteCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![RemoteContent::Text(text.into())],
            is_error: false,
        }
    }

    /// Text parts joined by newlines; non-text parts become placeholders.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .map(|item| match item {
                RemoteContent::Text(text) => text.clone(),
                RemoteContent::Other(kind) => format!("[{kind} content]"),
            })
            .collect();
        if parts.is_empty() {
            return "(no content)".to_string();
        }
        parts.join("\n")
    }
}

/// Connection to a single remote tool server.
#[async_trait]
pub trait RemoteToolService: Send + Sync {
    fn server_name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn list_tools(&self) -> Result<Vec<RemoteToolSchema>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<RemoteCallResult>;

    async fn disconnect(&self) -> Result<()>;
}

/// Registry of connected remote services and their discovered tools.
#[derive(Default)]
pub struct RemoteToolHub {
    services: RwLock<Vec<Arc<dyn RemoteToolService>>>,
    tools: RwLock<HashMap<String, Vec<ToolDefinition>>>,
}

impl std::fmt::Debug for RemoteToolHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteToolHub")
            .field("servers", &self.server_names())
            .finish()
    }
}

impl RemoteToolHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a service, discover its tools, and start offering them.
    ///
    /// Returns the number of tools discovered. A service with the same
    /// server name replaces the previous one.
    pub async fn add_service(&self, service: Arc<dyn RemoteToolService>) -> Result<usize> {
        let server = service.server_name().to_string();
        service.connect().await?;
        let discovered = service.list_tools().await?;
        let definitions: Vec<ToolDefinition> = discovered
            .into_iter()
            .map(|tool| {
                ToolDefinition::remote(
                    &server,
                    tool.name,
                    tool.description.unwrap_or_default(),
                    tool.input_schema,
                )
            })
            .collect();
        let count = definitions.len();

        let replaced = {
            let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
            let previous = services
                .iter()
                .position(|s| s.server_name() == server)
                .map(|idx| services.remove(idx));
            services.push(service);
            previous
        };
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server.clone(), definitions);

        if let Some(previous) = replaced {
            if let Err(err) = previous.disconnect().await {
                tracing::warn!(server = %server, error = %err, "failed to disconnect replaced server");
            }
        }
        tracing::info!(server = %server, tools = count, "remote tool server connected");
        Ok(count)
    }

    /// Re-list a connected server's tools.
    pub async fn refresh(&self, server: &str) -> Result<usize> {
        let service = self.service(server)?;
        let definitions: Vec<ToolDefinition> = service
            .list_tools()
            .await?
            .into_iter()
            .map(|tool| {
                ToolDefinition::remote(
                    server,
                    tool.name,
                    tool.description.unwrap_or_default(),
                    tool.input_schema,
                )
            })
            .collect();
        let count = definitions.len();
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server.to_string(), definitions);
        Ok(count)
    }

    pub async fn remove_service(&self, server: &str) -> Result<()> {
        let removed = {
            let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
            services
                .iter()
                .position(|s| s.server_name() == server)
                .map(|idx| services.remove(idx))
        };
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server);
        match removed {
            Some(service) => service.disconnect().await,
            None => Ok(()),
        }
    }

    pub async fn disconnect_all(&self) {
        let services: Vec<_> = {
            let mut guard = self.services.write().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        self.tools.write().unwrap_or_else(|e| e.into_inner()).clear();
        for service in services {
            if let Err(err) = service.disconnect().await {
                tracing::warn!(server = service.server_name(), error = %err, "disconnect failed");
            }
        }
    }

    pub fn server_names(&self) -> Vec<String> {
        self.services
            .read()
            .map(|s| s.iter().map(|svc| svc.server_name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Cached tools across all servers, in server registration order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        self.server_names()
            .iter()
            .filter_map(|server| tools.get(server))
            .flat_map(|defs| defs.iter().cloned())
            .collect()
    }

    /// Call a remote tool. Every failure is folded into an error output.
    pub async fn call_tool(&self, server: &str, name: &str, arguments: &str) -> ToolOutput {
        let service = match self.service(server) {
            Ok(service) => service,
            Err(err) => return ToolOutput::error(err),
        };
        let arguments = match parse_arguments(arguments) {
            Ok(arguments) => arguments,
            Err(err) => return ToolOutput::error(err),
        };

        match service.call_tool(name, arguments).await {
            Ok(result) if result.is_error => ToolOutput::error(result.render()),
            Ok(result) => ToolOutput::ok(result.render()),
            Err(err) => {
                tracing::debug!(server, tool_name = name, error = %err, "remote tool call failed");
                ToolOutput::error(err)
            }
        }
    }

    fn service(&self, server: &str) -> Result<Arc<dyn RemoteToolService>> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.server_name() == server)
            .cloned()
            .ok_or_else(|| ConvoyError::remote(server, "server is not connected"))
    }
}

/// Remote arguments must be a JSON object; empty input means no arguments.
fn parse_arguments(raw: &str) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => Ok(Some(map)),
        Ok(serde_json::Value::Null) => Ok(None),
        Ok(other) => Err(ConvoyError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
        Err(e) => Err(ConvoyError::InvalidArgument(format!(
            "tool arguments must be valid JSON: {e}"
        ))),
    }
}
