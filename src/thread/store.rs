//! Actor that owns every thread.
//!
//! All state mutation, whether from a running loop or from the UI, goes
//! through one task that processes [`ThreadCommand`]s in order. Handles are
//! cheap to clone.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::agent_loop::{BulkRevertReport, UndoEntry, UndoEntryId};
use crate::error::{ConvoyError, Result};
use crate::types::{Message, MessageId, ToolCall, Usage};

use super::{Thread, ThreadId, ThreadSettings};

const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands processed by the store task.
enum ThreadCommand {
    Create {
        thread: Thread,
        reply: Reply<ThreadId>,
    },
    Snapshot {
        thread_id: ThreadId,
        reply: Reply<Thread>,
    },
    List {
        reply: Reply<Vec<ThreadId>>,
    },
    Remove {
        thread_id: ThreadId,
        reply: Reply<Thread>,
    },
    AppendMessage {
        thread_id: ThreadId,
        message: Message,
        reply: Reply<MessageId>,
    },
    AppendText {
        thread_id: ThreadId,
        message_id: MessageId,
        text: String,
        reply: Reply<()>,
    },
    SetText {
        thread_id: ThreadId,
        message_id: MessageId,
        text: String,
        reply: Reply<()>,
    },
    SetToolCalls {
        thread_id: ThreadId,
        message_id: MessageId,
        calls: Vec<ToolCall>,
        reply: Reply<()>,
    },
    PushToolCall {
        thread_id: ThreadId,
        message_id: MessageId,
        call: ToolCall,
        reply: Reply<()>,
    },
    DeleteMessage {
        thread_id: ThreadId,
        message_id: MessageId,
        reply: Reply<Message>,
    },
    TruncateFrom {
        thread_id: ThreadId,
        message_id: MessageId,
        reply: Reply<Vec<Message>>,
    },
    RecordUsage {
        thread_id: ThreadId,
        usage: Usage,
        reply: Reply<()>,
    },
    SetStatus {
        thread_id: ThreadId,
        status: Option<String>,
        reply: Reply<()>,
    },
    UpdateSettings {
        thread_id: ThreadId,
        settings: ThreadSettings,
        reply: Reply<()>,
    },
    PushUndo {
        thread_id: ThreadId,
        entry: UndoEntry,
        reply: Reply<()>,
    },
    UndoHistory {
        thread_id: ThreadId,
        reply: Reply<Vec<UndoEntry>>,
    },
    Revert {
        thread_id: ThreadId,
        entry_id: UndoEntryId,
        reply: Reply<UndoEntry>,
    },
    RevertAll {
        thread_id: ThreadId,
        reply: Reply<BulkRevertReport>,
    },
    ClearUndo {
        thread_id: ThreadId,
        reply: Reply<()>,
    },
}

/// Handle to the store task.
#[derive(Debug, Clone)]
pub struct ThreadStore {
    tx: mpsc::Sender<ThreadCommand>,
}

impl ThreadStore {
    /// Spawn the store task on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(StoreTask::default().run(rx));
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> ThreadCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn create(&self, thread: Thread) -> Result<ThreadId> {
        self.request(|reply| ThreadCommand::Create { thread, reply })
            .await
    }

    /// A copy of the thread as it is right now.
    pub async fn snapshot(&self, thread_id: ThreadId) -> Result<Thread> {
        self.request(|reply| ThreadCommand::Snapshot { thread_id, reply })
            .await
    }

    pub async fn list(&self) -> Result<Vec<ThreadId>> {
        self.request(|reply| ThreadCommand::List { reply }).await
    }

    pub async fn remove(&self, thread_id: ThreadId) -> Result<Thread> {
        self.request(|reply| ThreadCommand::Remove { thread_id, reply })
            .await
    }

    pub async fn append_message(&self, thread_id: ThreadId, message: Message) -> Result<MessageId> {
        self.request(|reply| ThreadCommand::AppendMessage {
            thread_id,
            message,
            reply,
        })
        .await
    }

    pub async fn append_text(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> Result<()> {
        let text = text.into();
        self.request(|reply| ThreadCommand::AppendText {
            thread_id,
            message_id,
            text,
            reply,
        })
        .await
    }

    pub async fn set_text(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> Result<()> {
        let text = text.into();
        self.request(|reply| ThreadCommand::SetText {
            thread_id,
            message_id,
            text,
            reply,
        })
        .await
    }

    pub async fn set_tool_calls(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
        calls: Vec<ToolCall>,
    ) -> Result<()> {
        self.request(|reply| ThreadCommand::SetToolCalls {
            thread_id,
            message_id,
            calls,
            reply,
        })
        .await
    }

    pub async fn push_tool_call(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
        call: ToolCall,
    ) -> Result<()> {
        self.request(|reply| ThreadCommand::PushToolCall {
            thread_id,
            message_id,
            call,
            reply,
        })
        .await
    }

    pub async fn delete_message(&self, thread_id: ThreadId, message_id: MessageId) -> Result<Message> {
        self.request(|reply| ThreadCommand::DeleteMessage {
            thread_id,
            message_id,
            reply,
        })
        .await
    }

    /// Remove `message_id` and everything after it.
    pub async fn truncate_from(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
    ) -> Result<Vec<Message>> {
        self.request(|reply| ThreadCommand::TruncateFrom {
            thread_id,
            message_id,
            reply,
        })
        .await
    }

    /// Add a provider's report to the thread's running totals.
    pub async fn record_usage(&self, thread_id: ThreadId, usage: Usage) -> Result<()> {
        self.request(|reply| ThreadCommand::RecordUsage {
            thread_id,
            usage,
            reply,
        })
        .await
    }

    pub async fn set_status(&self, thread_id: ThreadId, status: Option<String>) -> Result<()> {
        self.request(|reply| ThreadCommand::SetStatus {
            thread_id,
            status,
            reply,
        })
        .await
    }

    pub async fn update_settings(&self, thread_id: ThreadId, settings: ThreadSettings) -> Result<()> {
        self.request(|reply| ThreadCommand::UpdateSettings {
            thread_id,
            settings,
            reply,
        })
        .await
    }

    pub async fn push_undo(&self, thread_id: ThreadId, entry: UndoEntry) -> Result<()> {
        self.request(|reply| ThreadCommand::PushUndo {
            thread_id,
            entry,
            reply,
        })
        .await
    }

    pub async fn undo_history(&self, thread_id: ThreadId) -> Result<Vec<UndoEntry>> {
        self.request(|reply| ThreadCommand::UndoHistory { thread_id, reply })
            .await
    }

    pub async fn revert(&self, thread_id: ThreadId, entry_id: UndoEntryId) -> Result<UndoEntry> {
        self.request(|reply| ThreadCommand::Revert {
            thread_id,
            entry_id,
            reply,
        })
        .await
    }

    pub async fn revert_all(&self, thread_id: ThreadId) -> Result<BulkRevertReport> {
        self.request(|reply| ThreadCommand::RevertAll { thread_id, reply })
            .await
    }

    pub async fn clear_undo(&self, thread_id: ThreadId) -> Result<()> {
        self.request(|reply| ThreadCommand::ClearUndo { thread_id, reply })
            .await
    }
}

fn closed() -> ConvoyError {
    ConvoyError::InvalidState("thread store has shut down".into())
}

#[derive(Default)]
struct StoreTask {
    threads: HashMap<ThreadId, Thread>,
    order: Vec<ThreadId>,
}

impl StoreTask {
    async fn run(mut self, mut rx: mpsc::Receiver<ThreadCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        tracing::debug!(threads = self.threads.len(), "thread store stopped");
    }

    async fn handle(&mut self, command: ThreadCommand) {
        match command {
            ThreadCommand::Create { thread, reply } => {
                let id = thread.id;
                if self.threads.insert(id, thread).is_none() {
                    self.order.push(id);
                }
                let _ = reply.send(Ok(id));
            }
            ThreadCommand::Snapshot { thread_id, reply } => {
                let _ = reply.send(self.thread(thread_id).cloned());
            }
            ThreadCommand::List { reply } => {
                let _ = reply.send(Ok(self.order.clone()));
            }
            ThreadCommand::Remove { thread_id, reply } => {
                let removed = self.threads.remove(&thread_id).ok_or_else(|| unknown(thread_id));
                self.order.retain(|id| *id != thread_id);
                let _ = reply.send(removed);
            }
            ThreadCommand::AppendMessage {
                thread_id,
                message,
                reply,
            } => {
                let result = self.thread_mut(thread_id).map(|t| {
                    let id = message.id;
                    t.messages.push(message);
                    id
                });
                let _ = reply.send(result);
            }
            ThreadCommand::AppendText {
                thread_id,
                message_id,
                text,
                reply,
            } => {
                let result = self
                    .message_mut(thread_id, message_id)
                    .map(|m| m.text.push_str(&text));
                let _ = reply.send(result);
            }
            ThreadCommand::SetText {
                thread_id,
                message_id,
                text,
                reply,
            } => {
                let result = self.message_mut(thread_id, message_id).map(|m| m.text = text);
                let _ = reply.send(result);
            }
            ThreadCommand::SetToolCalls {
                thread_id,
                message_id,
                calls,
                reply,
            } => {
                let result = self
                    .message_mut(thread_id, message_id)
                    .map(|m| m.tool_calls = calls);
                let _ = reply.send(result);
            }
            ThreadCommand::PushToolCall {
                thread_id,
                message_id,
                call,
                reply,
            } => {
                let result = self
                    .message_mut(thread_id, message_id)
                    .map(|m| m.tool_calls.push(call));
                let _ = reply.send(result);
            }
            ThreadCommand::DeleteMessage {
                thread_id,
                message_id,
                reply,
            } => {
                let result = self.thread_mut(thread_id).and_then(|t| {
                    let idx = position(t, message_id)?;
                    Ok(t.messages.remove(idx))
                });
                let _ = reply.send(result);
            }
            ThreadCommand::TruncateFrom {
                thread_id,
                message_id,
                reply,
            } => {
                let result = self.thread_mut(thread_id).and_then(|t| {
                    let idx = position(t, message_id)?;
                    Ok(t.messages.split_off(idx))
                });
                let _ = reply.send(result);
            }
            ThreadCommand::RecordUsage {
                thread_id,
                usage,
                reply,
            } => {
                let result = self.thread_mut(thread_id).map(|t| t.usage.merge(&usage));
                let _ = reply.send(result);
            }
            ThreadCommand::SetStatus {
                thread_id,
                status,
                reply,
            } => {
                let result = self.thread_mut(thread_id).map(|t| t.status_message = status);
                let _ = reply.send(result);
            }
            ThreadCommand::UpdateSettings {
                thread_id,
                settings,
                reply,
            } => {
                let result = self.thread_mut(thread_id).map(|t| settings.apply(t));
                let _ = reply.send(result);
            }
            ThreadCommand::PushUndo {
                thread_id,
                entry,
                reply,
            } => {
                let result = self.thread_mut(thread_id).map(|t| t.undo.push(entry));
                let _ = reply.send(result);
            }
            ThreadCommand::UndoHistory { thread_id, reply } => {
                let result = self.thread(thread_id).map(|t| t.undo.entries().to_vec());
                let _ = reply.send(result);
            }
            ThreadCommand::Revert {
                thread_id,
                entry_id,
                reply,
            } => {
                let result = match self.thread_mut(thread_id) {
                    Ok(t) => t.undo.revert(entry_id).await.cloned(),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            ThreadCommand::RevertAll { thread_id, reply } => {
                let result = match self.thread_mut(thread_id) {
                    Ok(t) => Ok(t.undo.revert_all().await),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            ThreadCommand::ClearUndo { thread_id, reply } => {
                let result = self.thread_mut(thread_id).map(|t| t.undo.clear());
                let _ = reply.send(result);
            }
        }
    }

    fn thread(&self, id: ThreadId) -> Result<&Thread> {
        self.threads.get(&id).ok_or_else(|| unknown(id))
    }

    fn thread_mut(&mut self, id: ThreadId) -> Result<&mut Thread> {
        self.threads.get_mut(&id).ok_or_else(|| unknown(id))
    }

    fn message_mut(&mut self, thread_id: ThreadId, message_id: MessageId) -> Result<&mut Message> {
        self.thread_mut(thread_id)?
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ConvoyError::InvalidArgument(format!("unknown message {message_id}")))
    }
}

fn position(thread: &Thread, message_id: MessageId) -> Result<usize> {
    thread
        .messages
        .iter()
        .position(|m| m.id == message_id)
        .ok_or_else(|| ConvoyError::InvalidArgument(format!("unknown message {message_id}")))
}

fn unknown(id: ThreadId) -> ConvoyError {
    ConvoyError::InvalidArgument(format!("unknown thread {id}"))
}
