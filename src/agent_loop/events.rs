//! Run event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::thread::ThreadId;
use crate::types::{MessageId, ToolCall};

use super::confirmation::{ConfirmationId, PendingConfirmation};
use super::types::{LoopState, RunId, RunResult};
use super::undo::UndoEntry;

/// Callback used for streaming run events.
pub type RunEventSink = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Stream category for events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventStream {
    Lifecycle,
    Assistant,
    Tool,
    Approval,
    Undo,
    System,
}

/// Concrete event payloads emitted by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventPayload {
    StateChanged {
        state: LoopState,
        iteration: usize,
    },
    /// A flushed batch of streamed text, already applied to the message.
    TextDelta {
        message_id: MessageId,
        text: String,
    },
    ToolCallStarted {
        call_id: String,
        name: String,
    },
    ToolCallArgumentsDelta {
        call_id: String,
        delta: String,
    },
    CliToolUse {
        call: ToolCall,
    },
    ConfirmationRequired {
        confirmation: PendingConfirmation,
    },
    ConfirmationResolved {
        id: ConfirmationId,
        approved: bool,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        text: String,
        is_error: bool,
    },
    UndoRecorded {
        entry: UndoEntry,
    },
    Status {
        message: String,
    },
    Finished {
        result: RunResult,
    },
}

impl RunEventPayload {
    pub fn stream(&self) -> RunEventStream {
        match self {
            RunEventPayload::StateChanged { .. } | RunEventPayload::Finished { .. } => {
                RunEventStream::Lifecycle
            }
            RunEventPayload::TextDelta { .. } => RunEventStream::Assistant,
            RunEventPayload::ToolCallStarted { .. }
            | RunEventPayload::ToolCallArgumentsDelta { .. }
            | RunEventPayload::CliToolUse { .. }
            | RunEventPayload::ToolResult { .. } => RunEventStream::Tool,
            RunEventPayload::ConfirmationRequired { .. }
            | RunEventPayload::ConfirmationResolved { .. } => RunEventStream::Approval,
            RunEventPayload::UndoRecorded { .. } => RunEventStream::Undo,
            RunEventPayload::Status { .. } => RunEventStream::System,
        }
    }
}

/// Envelope for streaming run events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub run_id: RunId,
    pub thread_id: ThreadId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: RunEventStream,
    pub payload: RunEventPayload,
}

pub(crate) struct RunEventEmitter {
    run_id: RunId,
    thread_id: ThreadId,
    seq: AtomicU64,
    sink: Option<RunEventSink>,
}

impl RunEventEmitter {
    pub(crate) fn new(run_id: RunId, thread_id: ThreadId, sink: Option<RunEventSink>) -> Self {
        Self {
            run_id,
            thread_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub(crate) fn emit(&self, payload: RunEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(RunEvent {
            run_id: self.run_id,
            thread_id: self.thread_id,
            seq,
            timestamp: Utc::now(),
            stream: payload.stream(),
            payload,
        });
    }

    pub(crate) fn state(&self, state: LoopState, iteration: usize) {
        self.emit(RunEventPayload::StateChanged { state, iteration });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[test]
    fn sequence_numbers_increase_from_one() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: RunEventSink = {
            let seen = seen.clone();
            Arc::new(move |event: RunEvent| seen.lock().unwrap().push(event))
        };
        let emitter = RunEventEmitter::new(Uuid::new_v4(), Uuid::new_v4(), Some(sink));
        emitter.state(LoopState::Requesting, 1);
        emitter.emit(RunEventPayload::Status {
            message: "hi".into(),
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(seen[0].stream, RunEventStream::Lifecycle);
        assert_eq!(seen[1].stream, RunEventStream::System);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let payload = RunEventPayload::ToolCallStarted {
            call_id: "c1".into(),
            name: "read_file".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "tool_call_started");
        assert_eq!(value["name"], "read_file");
    }
}
