//! Per-iteration tool set assembly.

use std::collections::HashSet;

use crate::provider::ProviderKind;

use super::definition::{BuiltinTool, ToolDefinition};

/// The tools offered to the model for one iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSet {
    definitions: Vec<ToolDefinition>,
}

impl ToolSet {
    /// Build the tool set for an iteration.
    ///
    /// Passthrough providers get nothing. Otherwise remote tools are offered
    /// alongside either every built-in tool (agent mode) or only the default
    /// tool. A remote tool whose name collides with a built-in is dropped.
    pub fn snapshot(
        provider_kind: ProviderKind,
        agent_enabled: bool,
        remote_tools: &[ToolDefinition],
    ) -> Self {
        if provider_kind == ProviderKind::Passthrough {
            return Self::default();
        }

        let builtins: Vec<ToolDefinition> = if agent_enabled {
            BuiltinTool::agent_tools().map(BuiltinTool::definition).collect()
        } else {
            vec![BuiltinTool::DEFAULT.definition()]
        };

        let reserved: HashSet<String> = builtins.iter().map(|d| d.name.clone()).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut definitions = Vec::with_capacity(remote_tools.len() + builtins.len());

        for tool in remote_tools {
            if reserved.contains(&tool.name) {
                tracing::warn!(
                    tool_name = %tool.name,
                    server = %tool.server_name,
                    "remote tool shadows a built-in tool; not offering it"
                );
                continue;
            }
            if !seen.insert(tool.name.clone()) {
                tracing::warn!(
                    tool_name = %tool.name,
                    server = %tool.server_name,
                    "duplicate remote tool name; keeping the first server's definition"
                );
                continue;
            }
            definitions.push(tool.clone());
        }
        definitions.extend(builtins);
        Self { definitions }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn into_definitions(self) -> Vec<ToolDefinition> {
        self.definitions
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Server name for a tool name, or "" when the tool was not offered.
    pub fn origin_of(&self, name: &str) -> &str {
        self.get(name).map(|d| d.server_name.as_str()).unwrap_or("")
    }
}
