//! Built-in tool execution seam.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

use super::arguments::BuiltinCall;

/// Text result of one tool call as recorded in the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Rendered as `"Error: {message}"`.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Error: {message}"),
            is_error: true,
        }
    }

    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(text) => Self::ok(text),
            Err(err) => Self::error(err),
        }
    }
}

/// Executes built-in tool calls against the local machine.
///
/// The returned string is the tool result shown to the model. An `Err` is
/// rendered as an `"Error: ..."` tool result by the caller, so it never ends
/// the conversation.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &BuiltinCall, working_directory: Option<&Path>)
        -> Result<String>;
}
