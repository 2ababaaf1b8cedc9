//! Tool definitions offered to the model.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Server name attached to every tool implemented in-process.
pub const BUILTIN_SERVER: &str = "builtin";

/// Where a tool is implemented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    BuiltIn,
    Remote,
    /// Executed by the provider backend itself; only displayed locally.
    Passthrough,
}

/// A callable tool as offered to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
    pub origin: ToolOrigin,
    pub server_name: String,
}

impl ToolDefinition {
    pub fn remote(
        server_name: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            origin: ToolOrigin::Remote,
            server_name: server_name.into(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.server_name == BUILTIN_SERVER
    }
}

/// The tools implemented in-process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinTool {
    ReadFile,
    ListDirectory,
    SearchFiles,
    WriteFile,
    EditFile,
    RunCommand,
    WebFetch,
}

impl BuiltinTool {
    /// The tool offered even when agent mode is off.
    pub const DEFAULT: BuiltinTool = BuiltinTool::WebFetch;

    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Mutates the filesystem or runs arbitrary commands.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            BuiltinTool::WriteFile | BuiltinTool::EditFile | BuiltinTool::RunCommand
        )
    }

    /// Tools offered in agent mode.
    pub fn agent_tools() -> impl Iterator<Item = BuiltinTool> {
        BuiltinTool::iter()
    }

    pub fn definition(self) -> ToolDefinition {
        let (description, parameters) = match self {
            BuiltinTool::ReadFile => (
                "Read a text file. Relative paths resolve against the working directory.",
                SchemaBuilder::new()
                    .string("path", "Path to the file to read", true)
                    .build(),
            ),
            BuiltinTool::ListDirectory => (
                "List the entries of a directory.",
                SchemaBuilder::new()
                    .string("path", "Directory to list (defaults to the working directory)", false)
                    .build(),
            ),
            BuiltinTool::SearchFiles => (
                "Search file contents recursively for a literal pattern.",
                SchemaBuilder::new()
                    .string("pattern", "Text to search for", true)
                    .string("path", "Directory or file to search (defaults to the working directory)", false)
                    .build(),
            ),
            BuiltinTool::WriteFile => (
                "Create or overwrite a file with the given content.",
                SchemaBuilder::new()
                    .string("path", "Path of the file to write", true)
                    .string("content", "Full file content", true)
                    .build(),
            ),
            BuiltinTool::EditFile => (
                "Replace one exact occurrence of old_string with new_string in a file.",
                SchemaBuilder::new()
                    .string("path", "Path of the file to edit", true)
                    .string("old_string", "Exact text to replace; must occur exactly once", true)
                    .string("new_string", "Replacement text", true)
                    .build(),
            ),
            BuiltinTool::RunCommand => (
                "Run a shell command in the working directory and return its output.",
                SchemaBuilder::new()
                    .string("command", "Shell command to execute", true)
                    .build(),
            ),
            BuiltinTool::WebFetch => (
                "Fetch a URL over HTTP(S) and return the response body as text.",
                SchemaBuilder::new()
                    .string("url", "Absolute http or https URL", true)
                    .build(),
            ),
        };
        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
            origin: ToolOrigin::BuiltIn,
            server_name: BUILTIN_SERVER.to_string(),
        }
    }
}

/// Minimal JSON Schema object builder for built-in tool parameters.
struct SchemaBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    fn new() -> Self {
        Self {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    fn string(mut self, name: &str, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            serde_json::json!({ "type": "string", "description": description }),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    fn build(self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_set_is_write_edit_run() {
        let destructive: Vec<_> = BuiltinTool::iter()
            .filter(|t| t.is_destructive())
            .map(BuiltinTool::name)
            .collect();
        assert_eq!(destructive, vec!["write_file", "edit_file", "run_command"]);
    }

    #[test]
    fn names_round_trip_through_strum() {
        for tool in BuiltinTool::iter() {
            assert_eq!(BuiltinTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(BuiltinTool::from_name("rm_rf"), None);
    }

    #[test]
    fn definitions_are_builtin_objects() {
        let def = BuiltinTool::EditFile.definition();
        assert!(def.is_builtin());
        assert_eq!(def.origin, ToolOrigin::BuiltIn);
        assert_eq!(def.parameters["type"], "object");
        assert_eq!(
            def.parameters["required"],
            serde_json::json!(["path", "old_string", "new_string"])
        );
    }
}
