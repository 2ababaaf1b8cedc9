//! Agent loop: runs, events, confirmations, undo.

pub mod batching;
pub mod confirmation;
pub mod events;
pub mod guard;
pub mod projector;
pub mod runner;
pub mod types;
pub mod undo;

pub use batching::TextBatcher;
pub use confirmation::{
    ConfirmationGate, ConfirmationId, ConfirmationPreview, ConfirmationTicket, PendingConfirmation,
};
pub use events::{RunEvent, RunEventPayload, RunEventSink, RunEventStream};
pub use guard::{loop_signature, LoopGuard, REPEATED_CALL_MESSAGE};
pub use projector::{project, system_prompt, INTERRUPTED_RESULT};
pub use runner::{LoopRunner, RunHandle, RunRequest, Runner};
pub use types::*;
pub use undo::{
    capture_before, finalize, unrestorable_notice, BeforeState, BulkRevertReport, Capture,
    UndoEntry, UndoEntryId, UndoLedger, UNREADABLE_PLACEHOLDER,
};
