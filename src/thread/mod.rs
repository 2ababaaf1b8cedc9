//! Conversation threads and their single-writer store.

pub mod store;

pub use store::ThreadStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_loop::UndoLedger;
use crate::types::{Message, MessageId, ModelRef, Usage};

pub type ThreadId = Uuid;

/// One conversation and everything the engine tracks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub model: ModelRef,
    pub messages: Vec<Message>,
    pub agent_enabled: bool,
    pub working_directory: Option<PathBuf>,
    /// Destructive built-in tools run without asking.
    pub dangerous_mode: bool,
    pub custom_system_prompt: Option<String>,
    pub usage: Usage,
    /// Last human-readable failure or anomaly.
    pub status_message: Option<String>,
    pub undo: UndoLedger,
}

impl Thread {
    pub fn new(model: ModelRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            messages: Vec::new(),
            agent_enabled: false,
            working_directory: None,
            dangerous_mode: false,
            custom_system_prompt: None,
            usage: Usage::default(),
            status_message: None,
            undo: UndoLedger::new(),
        }
    }

    pub fn with_agent(mut self, working_directory: Option<PathBuf>) -> Self {
        self.agent_enabled = true;
        self.working_directory = working_directory;
        self
    }

    pub fn with_dangerous_mode(mut self, enabled: bool) -> Self {
        self.dangerous_mode = enabled;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_system_prompt = Some(prompt.into());
        self
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Partial update of a thread's mode flags. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadSettings {
    pub model: Option<ModelRef>,
    pub agent_enabled: Option<bool>,
    pub working_directory: Option<Option<PathBuf>>,
    pub dangerous_mode: Option<bool>,
    pub custom_system_prompt: Option<Option<String>>,
}

impl ThreadSettings {
    pub fn apply(self, thread: &mut Thread) {
        if let Some(model) = self.model {
            thread.model = model;
        }
        if let Some(agent) = self.agent_enabled {
            thread.agent_enabled = agent;
        }
        if let Some(dir) = self.working_directory {
            thread.working_directory = dir;
        }
        if let Some(dangerous) = self.dangerous_mode {
            thread.dangerous_mode = dangerous;
        }
        if let Some(prompt) = self.custom_system_prompt {
            thread.custom_system_prompt = prompt;
        }
    }
}
