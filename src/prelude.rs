//! Convenience re-exports for common use.

pub use crate::agent_loop::{
    ConfirmationPreview, PendingConfirmation, RunEvent, RunEventPayload, RunEventSink, RunResult,
    RunStatus, UndoEntry,
};
pub use crate::config::{ConvoyConfig, EngineSettings};
pub use crate::engine::{ChatEngine, StartOutcome};
pub use crate::error::{ConvoyError, Result};
pub use crate::provider::{ModelProvider, ProviderKind, ProviderRegistry};
pub use crate::thread::{Thread, ThreadId, ThreadSettings};
pub use crate::types::{GenerationSettings, Message, ModelRef, Role, ToolCall, Usage};
