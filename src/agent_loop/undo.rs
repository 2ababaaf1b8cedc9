//! Reversible snapshots of file mutations made by built-in tools.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConvoyError, Result};
use crate::tools::{resolve_path, BuiltinCall};

/// Placeholder stored when the post-execution content cannot be decoded.
pub const UNREADABLE_PLACEHOLDER: &str = "(binary or unreadable)";

pub type UndoEntryId = Uuid;

/// File state captured immediately before a mutating call runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeforeState {
    pub tool_name: String,
    pub relative_path: String,
    pub full_path: PathBuf,
    /// `None` when the file did not exist.
    pub previous_content: Option<String>,
}

/// One reversible filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: UndoEntryId,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub relative_path: String,
    pub full_path: PathBuf,
    pub previous_content: Option<String>,
    pub new_content: String,
    pub summary: String,
    pub is_reverted: bool,
}

/// Outcome of snapshotting a call's target before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// The call has no single-file target.
    NotApplicable,
    /// The target exists but cannot be read back as text, so it cannot be restored.
    Unrestorable { relative_path: String },
    Ready(BeforeState),
}

impl Capture {
    pub fn ready(self) -> Option<BeforeState> {
        match self {
            Capture::Ready(state) => Some(state),
            _ => None,
        }
    }
}

/// Notice shown when a mutation will leave no undo entry.
pub fn unrestorable_notice(relative_path: &str) -> String {
    format!("{relative_path} is not a readable text file; this change cannot be undone")
}

/// Snapshot the target of a mutating call.
pub async fn capture_before(call: &BuiltinCall, working_directory: Option<&Path>) -> Capture {
    let Some(relative_path) = call.mutated_path() else {
        return Capture::NotApplicable;
    };
    let full_path = resolve_path(relative_path, working_directory);
    let unrestorable = || Capture::Unrestorable {
        relative_path: relative_path.to_string(),
    };

    let previous_content = match tokio::fs::read(&full_path).await {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                tracing::debug!(path = %full_path.display(), "not snapshotting binary file");
                return unrestorable();
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %full_path.display(), error = %e, "cannot snapshot file before mutation");
            return unrestorable();
        }
    };

    Capture::Ready(BeforeState {
        tool_name: call.tool_name().to_string(),
        relative_path: relative_path.to_string(),
        full_path,
        previous_content,
    })
}

/// Read the target back after the call and build the ledger entry.
pub async fn finalize(before: BeforeState, call: &BuiltinCall) -> UndoEntry {
    let new_content = tokio::fs::read_to_string(&before.full_path)
        .await
        .unwrap_or_else(|_| UNREADABLE_PLACEHOLDER.to_string());

    let path = &before.relative_path;
    let summary = match (call, &before.previous_content) {
        (BuiltinCall::WriteFile { .. }, None) => format!("Created {path}"),
        (BuiltinCall::WriteFile { .. }, Some(_)) => format!("Overwrote {path}"),
        (BuiltinCall::EditFile { .. }, previous) => {
            let before_lines = previous.as_deref().map(line_count).unwrap_or(0);
            format!(
                "Edited {path}: {before_lines} → {} lines",
                line_count(&new_content)
            )
        }
        _ => format!("{} on {path}", before.tool_name),
    };

    UndoEntry {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        tool_name: before.tool_name,
        relative_path: before.relative_path,
        full_path: before.full_path,
        previous_content: before.previous_content,
        new_content,
        summary,
        is_reverted: false,
    }
}

fn line_count(text: &str) -> usize {
    text.lines().count()
}

/// Outcome of a bulk revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRevertReport {
    pub reverted: usize,
    pub failed: usize,
}

/// Per-thread list of undo entries, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLedger {
    entries: Vec<UndoEntry>,
}

impl UndoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[UndoEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Restore one entry. Already-reverted entries are left alone.
    pub async fn revert(&mut self, id: UndoEntryId) -> Result<&UndoEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ConvoyError::InvalidArgument(format!("unknown undo entry {id}")))?;

        if !self.entries[idx].is_reverted {
            restore(&self.entries[idx]).await?;
            self.entries[idx].is_reverted = true;
        }
        Ok(&self.entries[idx])
    }

    /// Revert every pending entry, newest first.
    pub async fn revert_all(&mut self) -> BulkRevertReport {
        let mut report = BulkRevertReport::default();
        for entry in self.entries.iter_mut().rev() {
            if entry.is_reverted {
                continue;
            }
            match restore(entry).await {
                Ok(()) => {
                    entry.is_reverted = true;
                    report.reverted += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        path = %entry.full_path.display(),
                        error = %err,
                        "failed to revert undo entry"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

async fn restore(entry: &UndoEntry) -> Result<()> {
    match &entry.previous_content {
        Some(content) => {
            if let Some(parent) = entry.full_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            tokio::fs::write(&entry.full_path, content).await?;
        }
        None => match tokio::fs::remove_file(&entry.full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
