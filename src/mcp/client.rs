//! Stdio MCP server connection backed by rmcp.

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ResourceContents},
    service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceError, ServiceExt},
    transport::TokioChildProcess,
};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::RemoteServerConfig;
use crate::error::{ConvoyError, Result};

use super::{RemoteCallResult, RemoteContent, RemoteToolSchema, RemoteToolService};

type DynClientService = Box<dyn DynService<RoleClient>>;
type McpRunningService = RunningService<RoleClient, DynClientService>;

/// A remote tool server spawned as a child process and spoken to over stdio.
pub struct McpToolService {
    config: RemoteServerConfig,
    session: Mutex<Option<McpRunningService>>,
}

impl McpToolService {
    pub fn new(config: RemoteServerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn not_connected(&self) -> ConvoyError {
        ConvoyError::remote(&self.config.name, "server is not connected")
    }
}

#[async_trait]
impl RemoteToolService for McpToolService {
    fn server_name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.is_closed()) {
            return Ok(());
        }

        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args).envs(&self.config.env);
        let transport = TokioChildProcess::new(command).map_err(|e| {
            ConvoyError::remote(&self.config.name, format!("failed to spawn server: {e}"))
        })?;

        let running = ClientInfo::default()
            .into_dyn()
            .serve(transport)
            .await
            .map_err(|e| map_client_initialize_error(&self.config.name, e))?;
        *session = Some(running);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RemoteToolSchema>> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or_else(|| self.not_connected())?;

        let tools = match session.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => {
                session
                    .list_tools(None)
                    .await
                    .map_err(|e| map_service_error(&self.config.name, "list_tools", e))?
                    .tools
            }
            Err(e) => return Err(map_service_error(&self.config.name, "list_tools", e)),
        };

        Ok(tools
            .into_iter()
            .map(|tool| RemoteToolSchema {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<RemoteCallResult> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or_else(|| self.not_connected())?;

        let result = session
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error(&self.config.name, "call_tool", e))?;

        Ok(map_call_result(result))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session
            .cancel()
            .await
            .map(|_| ())
            .map_err(|e| ConvoyError::remote(&self.config.name, format!("shutdown failed: {e}")))
    }
}

fn map_content(item: &Content) -> RemoteContent {
    if let Some(text) = item.as_text() {
        return RemoteContent::Text(text.text.clone());
    }
    if let Some(resource) = item.as_resource() {
        if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
            return RemoteContent::Text(text.clone());
        }
        return RemoteContent::Other("resource".into());
    }
    if item.as_image().is_some() {
        return RemoteContent::Other("image".into());
    }
    RemoteContent::Other("binary".into())
}

fn map_call_result(result: CallToolResult) -> RemoteCallResult {
    let mut content: Vec<RemoteContent> = result.content.iter().map(map_content).collect();
    if content.is_empty() {
        if let Some(structured) = result.structured_content.as_ref() {
            content.push(RemoteContent::Text(structured.to_string()));
        }
    }
    RemoteCallResult {
        content,
        is_error: result.is_error.unwrap_or(false),
    }
}

fn map_client_initialize_error(server: &str, error: ClientInitializeError) -> ConvoyError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("connection closed during initialize: {context}")
        }
        ClientInitializeError::JsonRpcError(error) => format!(
            "initialize JSON-RPC error {}: {}",
            error.code.0, error.message
        ),
        other => format!("initialize failed: {other}"),
    };
    ConvoyError::remote(server, message)
}

fn map_service_error(server: &str, context: &str, error: ServiceError) -> ConvoyError {
    let message = match error {
        ServiceError::McpError(error) => {
            format!("{context}: MCP error {}: {}", error.code.0, error.message)
        }
        ServiceError::TransportClosed => format!("{context}: transport closed"),
        ServiceError::UnexpectedResponse => format!("{context}: unexpected response"),
        ServiceError::Timeout { timeout } => {
            format!("{context}: timed out after {}ms", timeout.as_millis())
        }
        other => format!("{context}: {other}"),
    };
    ConvoyError::remote(server, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn call_result_keeps_text_and_error_flag() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "tool failed at runtime" }],
            "isError": true
        }))
        .unwrap();
        let mapped = map_call_result(result);
        assert!(mapped.is_error);
        assert_eq!(mapped.render(), "tool failed at runtime");
    }

    #[test]
    fn structured_content_is_used_when_no_content_items() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [],
            "structuredContent": { "temp": 21 }
        }))
        .unwrap();
        assert_eq!(map_call_result(result).render(), r#"{"temp":21}"#);
    }

    #[test]
    fn service_errors_name_the_server() {
        let err = map_service_error(
            "weather",
            "call_tool",
            ServiceError::Timeout {
                timeout: Duration::from_millis(2750),
            },
        );
        assert_eq!(
            err.to_string(),
            "Remote tool server 'weather': call_tool: timed out after 2750ms"
        );
    }

    #[tokio::test]
    async fn calls_before_connect_fail() {
        let service = McpToolService::new(RemoteServerConfig {
            name: "files".into(),
            command: "does-not-matter".into(),
            args: Vec::new(),
            env: Default::default(),
        });
        let err = service.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }
}
