//! Conversation message types.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Unique message identifier.
pub type MessageId = Uuid;

/// Role of a message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// File or image attached to a user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

impl Attachment {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Decode the payload as UTF-8 text, if it is text.
    pub fn decoded_text(&self) -> Option<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .ok()?;
        String::from_utf8(bytes).ok()
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Serialized JSON arguments exactly as the model produced them.
    pub arguments: String,
    /// Origin of the tool; empty until resolved against the offered tool set.
    #[serde(default)]
    pub server_name: String,
    /// Opaque provider token that must be echoed back verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            server_name: String::new(),
            thought_signature: None,
        }
    }

    pub fn with_thought_signature(mut self, signature: impl Into<String>) -> Self {
        self.thought_signature = Some(signature.into());
        self
    }

    /// Parse the argument payload into a JSON value. Empty input is an empty object.
    pub fn arguments_value(&self) -> serde_json::Result<serde_json::Value> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// A message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
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
    #[serde(default)]
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let mut message = Self::new(Role::User, text);
        message.attachments = attachments;
        message
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn tool_result(call: &ToolCall, text: impl Into<String>, is_error: bool) -> Self {
        let mut message = Self::new(Role::Tool, text);
        message.tool_call_id = Some(call.id.clone());
        message.tool_name = Some(call.name.clone());
        message.is_error = is_error;
        message
    }

    /// An assistant message that carries neither text nor tool calls.
    pub fn is_empty_assistant(&self) -> bool {
        self.role == Role::Assistant && self.text.is_empty() && self.tool_calls.is_empty()
    }
}
