//! Typed arguments for built-in tool calls.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConvoyError, Result};
use crate::types::ToolCall;

use super::definition::BuiltinTool;

/// A built-in tool call with validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinCall {
    ReadFile { path: String },
    ListDirectory { path: Option<String> },
    SearchFiles { pattern: String, path: Option<String> },
    WriteFile { path: String, content: String },
    EditFile { path: String, old_string: String, new_string: String },
    RunCommand { command: String },
    WebFetch { url: String },
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct OptionalPathArgs {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct SearchArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    old_string: String,
    new_string: String,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct UrlArgs {
    url: String,
}

impl BuiltinCall {
    /// Parse and validate a model-produced call against a built-in tool.
    pub fn parse(call: &ToolCall) -> Result<Self> {
        let tool = BuiltinTool::from_name(&call.name)
            .ok_or_else(|| ConvoyError::tool(&call.name, format!("Unknown tool: {}", call.name)))?;
        let value = call.arguments_value().map_err(|e| {
            ConvoyError::tool(&call.name, format!("Invalid arguments for {}: {e}", call.name))
        })?;

        let parsed = match tool {
            BuiltinTool::ReadFile => {
                let a: PathArgs = decode(tool, value)?;
                BuiltinCall::ReadFile { path: a.path }
            }
            BuiltinTool::ListDirectory => {
                let a: OptionalPathArgs = decode(tool, value)?;
                BuiltinCall::ListDirectory { path: a.path }
            }
            BuiltinTool::SearchFiles => {
                let a: SearchArgs = decode(tool, value)?;
                BuiltinCall::SearchFiles {
                    pattern: a.pattern,
                    path: a.path,
                }
            }
            BuiltinTool::WriteFile => {
                let a: WriteArgs = decode(tool, value)?;
                BuiltinCall::WriteFile {
                    path: a.path,
                    content: a.content,
                }
            }
            BuiltinTool::EditFile => {
                let a: EditArgs = decode(tool, value)?;
                if a.old_string.is_empty() {
                    return Err(ConvoyError::tool(
                        tool.name(),
                        "Invalid arguments for edit_file: old_string must not be empty",
                    ));
                }
                BuiltinCall::EditFile {
                    path: a.path,
                    old_string: a.old_string,
                    new_string: a.new_string,
                }
            }
            BuiltinTool::RunCommand => {
                let a: CommandArgs = decode(tool, value)?;
                BuiltinCall::RunCommand { command: a.command }
            }
            BuiltinTool::WebFetch => {
                let a: UrlArgs = decode(tool, value)?;
                BuiltinCall::WebFetch { url: a.url }
            }
        };

        if let Some(path) = parsed.target_path() {
            if path.trim().is_empty() {
                return Err(ConvoyError::tool(
                    tool.name(),
                    format!("Invalid arguments for {}: path must not be empty", tool.name()),
                ));
            }
        }
        Ok(parsed)
    }

    pub fn tool(&self) -> BuiltinTool {
        match self {
            BuiltinCall::ReadFile { .. } => BuiltinTool::ReadFile,
            BuiltinCall::ListDirectory { .. } => BuiltinTool::ListDirectory,
            BuiltinCall::SearchFiles { .. } => BuiltinTool::SearchFiles,
            BuiltinCall::WriteFile { .. } => BuiltinTool::WriteFile,
            BuiltinCall::EditFile { .. } => BuiltinTool::EditFile,
            BuiltinCall::RunCommand { .. } => BuiltinTool::RunCommand,
            BuiltinCall::WebFetch { .. } => BuiltinTool::WebFetch,
        }
    }

    pub fn tool_name(&self) -> &'static str {
        self.tool().name()
    }

    /// The single file this call is about, when it has one.
    pub fn target_path(&self) -> Option<&str> {
        match self {
            BuiltinCall::ReadFile { path }
            | BuiltinCall::WriteFile { path, .. }
            | BuiltinCall::EditFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The single file this call mutates, when it has one.
    pub fn mutated_path(&self) -> Option<&str> {
        match self {
            BuiltinCall::WriteFile { path, .. } | BuiltinCall::EditFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// One-line human summary used in confirmation prompts.
    pub fn summary(&self) -> String {
        match self {
            BuiltinCall::ReadFile { path } => format!("Read {path}"),
            BuiltinCall::ListDirectory { path } => {
                format!("List {}", path.as_deref().unwrap_or("."))
            }
            BuiltinCall::SearchFiles { pattern, .. } => format!("Search for \"{pattern}\""),
            BuiltinCall::WriteFile { path, content } => {
                format!("Write {} bytes to {path}", content.len())
            }
            BuiltinCall::EditFile { path, .. } => format!("Edit {path}"),
            BuiltinCall::RunCommand { command } => format!("Run `{command}`"),
            BuiltinCall::WebFetch { url } => format!("Fetch {url}"),
        }
    }
}

fn decode<T: DeserializeOwned>(tool: BuiltinTool, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        ConvoyError::tool(
            tool.name(),
            format!("Invalid arguments for {}: {e}", tool.name()),
        )
    })
}

/// Resolve a tool path: absolute paths are used as-is, relative paths join the
/// working directory when one is set.
pub fn resolve_path(path: &str, working_directory: Option<&Path>) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match working_directory {
        Some(dir) => dir.join(candidate),
        None => candidate.to_path_buf(),
    }
}
