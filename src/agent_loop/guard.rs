//! Repeated tool-call detection.

use crate::types::ToolCall;

/// Message written when the model asks for the same calls twice in a row.
pub const REPEATED_CALL_MESSAGE: &str =
    "Stopped: the model repeated the same tool call.";

/// Serialized identity of a batch of tool calls: `name:arguments` joined by `|`.
pub fn loop_signature(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|c| format!("{}:{}", c.name, c.arguments))
        .collect::<Vec<_>>()
        .join("|")
}

/// Remembers the previous iteration's signature.
#[derive(Debug, Default)]
pub struct LoopGuard {
    previous: Option<String>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this batch; returns `true` when it exactly repeats the last one.
    pub fn is_repeat(&mut self, calls: &[ToolCall]) -> bool {
        let signature = loop_signature(calls);
        if self.previous.as_deref() == Some(signature.as_str()) {
            return true;
        }
        self.previous = Some(signature);
        false
    }
}
