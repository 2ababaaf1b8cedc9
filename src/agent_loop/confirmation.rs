//! User confirmation for destructive tool calls.
//!
//! A gate holds at most one outstanding request. The waiting loop suspends
//! on a oneshot receiver; the UI resolves it exactly once through
//! [`ConfirmationGate::resolve`]. Later or stale resolutions are ignored.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::error::{ConvoyError, Result};
use crate::tools::BuiltinCall;

pub type ConfirmationId = Uuid;

/// Tool-specific material shown alongside the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationPreview {
    Diff {
        path: String,
        old: String,
        new: String,
    },
    FileContent {
        path: String,
        content: String,
    },
    Command {
        command: String,
    },
    None,
}

impl ConfirmationPreview {
    pub fn for_call(call: &BuiltinCall) -> Self {
        match call {
            BuiltinCall::EditFile {
                path,
                old_string,
                new_string,
            } => Self::Diff {
                path: path.clone(),
                old: old_string.clone(),
                new: new_string.clone(),
            },
            BuiltinCall::WriteFile { path, content } => Self::FileContent {
                path: path.clone(),
                content: content.clone(),
            },
            BuiltinCall::RunCommand { command } => Self::Command {
                command: command.clone(),
            },
            _ => Self::None,
        }
    }
}

/// A destructive call waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: ConfirmationId,
    pub tool_name: String,
    #[serde(skip)]
    pub call: Option<BuiltinCall>,
    pub summary: String,
    pub preview: ConfirmationPreview,
    pub working_directory: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn new(call: &BuiltinCall, working_directory: Option<&Path>) -> Self {
        let mut summary = call.summary();
        if let Some(dir) = working_directory {
            summary.push_str(&format!(" in {}", dir.display()));
        }
        Self {
            id: Uuid::new_v4(),
            tool_name: call.tool_name().to_string(),
            call: Some(call.clone()),
            summary,
            preview: ConfirmationPreview::for_call(call),
            working_directory: working_directory.map(Path::to_path_buf),
            created_at: Utc::now(),
        }
    }
}

struct Slot {
    pending: PendingConfirmation,
    responder: oneshot::Sender<bool>,
}

/// Single-slot confirmation rendezvous for one thread.
pub struct ConfirmationGate {
    slot: Mutex<Option<Slot>>,
    pending_tx: watch::Sender<Option<PendingConfirmation>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate")
            .field("pending", &self.pending().map(|p| p.id))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ConfirmationGate {
    /// `timeout: None` waits indefinitely; an elapsed timeout counts as denial.
    pub fn new(timeout: Option<Duration>) -> Self {
        let (pending_tx, _) = watch::channel(None);
        Self {
            slot: Mutex::new(None),
            pending_tx,
            timeout,
        }
    }

    /// Ask the user and wait. Fails if another request is already outstanding.
    pub async fn request(
        &self,
        call: &BuiltinCall,
        working_directory: Option<&Path>,
    ) -> Result<bool> {
        Ok(self.begin(call, working_directory)?.decision().await)
    }

    /// Publish a request without waiting yet.
    ///
    /// Dropping the ticket (or the future from [`ConfirmationTicket::decision`])
    /// withdraws the request.
    pub fn begin(
        &self,
        call: &BuiltinCall,
        working_directory: Option<&Path>,
    ) -> Result<ConfirmationTicket<'_>> {
        let pending = PendingConfirmation::new(call, working_directory);
        let (responder, decision) = oneshot::channel();
        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Err(ConvoyError::InvalidState(
                    "a confirmation is already pending for this thread".into(),
                ));
            }
            *slot = Some(Slot {
                pending: pending.clone(),
                responder,
            });
        }
        self.pending_tx.send_replace(Some(pending.clone()));
        Ok(ConfirmationTicket {
            _withdraw: WithdrawOnDrop {
                gate: self,
                id: pending.id,
            },
            pending,
            decision,
            timeout: self.timeout,
        })
    }

    /// Resolve the outstanding request. Returns `false` when `id` is not the
    /// pending request (already resolved, withdrawn, or unknown).
    pub fn resolve(&self, id: ConfirmationId, approved: bool) -> bool {
        let slot = {
            let mut guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(slot) if slot.pending.id == id => guard.take(),
                _ => None,
            }
        };
        let Some(slot) = slot else {
            return false;
        };
        self.pending_tx.send_replace(None);
        slot.responder.send(approved).is_ok()
    }

    pub fn pending(&self) -> Option<PendingConfirmation> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.pending.clone())
    }

    /// Observe the pending request as it appears and clears.
    pub fn subscribe(&self) -> watch::Receiver<Option<PendingConfirmation>> {
        self.pending_tx.subscribe()
    }

    fn withdraw(&self, id: ConfirmationId) {
        let mut guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|s| s.pending.id == id) {
            guard.take();
            drop(guard);
            self.pending_tx.send_replace(None);
        }
    }
}

/// An outstanding request; resolves to the user's answer.
pub struct ConfirmationTicket<'a> {
    pending: PendingConfirmation,
    decision: oneshot::Receiver<bool>,
    timeout: Option<Duration>,
    _withdraw: WithdrawOnDrop<'a>,
}

impl ConfirmationTicket<'_> {
    pub fn pending(&self) -> &PendingConfirmation {
        &self.pending
    }

    pub async fn decision(self) -> bool {
        let id = self.pending.id;
        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.decision).await {
                Ok(answer) => answer,
                Err(_) => {
                    tracing::warn!(confirmation_id = %id, "confirmation timed out; treating as denied");
                    return false;
                }
            },
            None => self.decision.await,
        };
        answer.unwrap_or(false)
    }
}

struct WithdrawOnDrop<'a> {
    gate: &'a ConfirmationGate,
    id: ConfirmationId,
}

impl Drop for WithdrawOnDrop<'_> {
    fn drop(&mut self) {
        self.gate.withdraw(self.id);
    }
}
