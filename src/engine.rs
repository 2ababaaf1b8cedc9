//! Composition root: threads, runs, confirmations and undo behind one handle.
//!
//! A thread admits one live run. Operations that would race a running loop
//! (sending, retrying, deleting messages, changing settings, reverting) are
//! refused with [`ConvoyError::InvalidState`] until the run finishes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::agent_loop::{
    BulkRevertReport, ConfirmationGate, ConfirmationId, LoopRunner, PendingConfirmation,
    RunEventSink, RunHandle, RunRequest, RunResult, Runner, UndoEntry, UndoEntryId,
};
use crate::config::ConvoyConfig;
use crate::error::{ConvoyError, Result};
use crate::mcp::RemoteToolHub;
use crate::provider::ProviderRegistry;
use crate::thread::{Thread, ThreadId, ThreadSettings, ThreadStore};
use crate::tools::ToolExecutor;
use crate::types::{GenerationSettings, Message, MessageId, Role};

/// Result of asking for a run.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(RunHandle),
    /// A run was already active; nothing new was started.
    AlreadyRunning(RunHandle),
}

impl StartOutcome {
    pub fn handle(&self) -> &RunHandle {
        match self {
            StartOutcome::Started(handle) | StartOutcome::AlreadyRunning(handle) => handle,
        }
    }

    pub fn started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Front door of the engine.
pub struct ChatEngine {
    config: Arc<ConvoyConfig>,
    store: ThreadStore,
    runner: Arc<dyn Runner>,
    remote: Arc<RemoteToolHub>,
    runs: Mutex<HashMap<ThreadId, RunHandle>>,
    gates: std::sync::Mutex<HashMap<ThreadId, Arc<ConfirmationGate>>>,
    generation: GenerationSettings,
    event_sink: Option<RunEventSink>,
}

impl ChatEngine {
    /// Engine with the default providers, local tools and no remote servers.
    pub fn new(config: ConvoyConfig) -> Self {
        Self::with_providers(config, ProviderRegistry::with_defaults())
    }

    pub fn with_providers(config: ConvoyConfig, providers: ProviderRegistry) -> Self {
        let config = Arc::new(config);
        let store = ThreadStore::spawn();
        let remote = Arc::new(RemoteToolHub::new());
        let runner = LoopRunner::new(
            store.clone(),
            Arc::new(providers),
            config.clone(),
            remote.clone(),
        );
        Self::from_parts(config, store, Arc::new(runner), remote)
    }

    /// Same as [`ChatEngine::with_providers`] but with a custom tool executor.
    pub fn with_executor(
        config: ConvoyConfig,
        providers: ProviderRegistry,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let config = Arc::new(config);
        let store = ThreadStore::spawn();
        let remote = Arc::new(RemoteToolHub::new());
        let runner = LoopRunner::new(
            store.clone(),
            Arc::new(providers),
            config.clone(),
            remote.clone(),
        )
        .with_executor(executor);
        Self::from_parts(config, store, Arc::new(runner), remote)
    }

    pub fn from_parts(
        config: Arc<ConvoyConfig>,
        store: ThreadStore,
        runner: Arc<dyn Runner>,
        remote: Arc<RemoteToolHub>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            remote,
            runs: Mutex::new(HashMap::new()),
            gates: std::sync::Mutex::new(HashMap::new()),
            generation: GenerationSettings::default(),
            event_sink: None,
        }
    }

    pub fn with_generation(mut self, generation: GenerationSettings) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_event_sink(mut self, sink: RunEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ConvoyConfig {
        &self.config
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn remote(&self) -> &Arc<RemoteToolHub> {
        &self.remote
    }

    /// Connect every configured remote tool server. Failures are logged and
    /// skipped; returns the number of tools discovered.
    #[cfg(feature = "mcp")]
    pub async fn connect_remote_servers(&self) -> usize {
        let mut total = 0;
        for server in &self.config.remote_servers {
            let service = Arc::new(crate::mcp::McpToolService::new(server.clone()));
            match self.remote.add_service(service).await {
                Ok(count) => total += count,
                Err(err) => {
                    tracing::warn!(server = %server.name, error = %err, "remote tool server unavailable")
                }
            }
        }
        total
    }

    pub async fn create_thread(&self, thread: Thread) -> Result<ThreadId> {
        self.store.create(thread).await
    }

    pub async fn thread(&self, thread_id: ThreadId) -> Result<Thread> {
        self.store.snapshot(thread_id).await
    }

    pub async fn remove_thread(&self, thread_id: ThreadId) -> Result<Thread> {
        let mut runs = self.lock_idle(thread_id).await?;
        runs.remove(&thread_id);
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&thread_id);
        self.store.remove(thread_id).await
    }

    /// Append a user message and start a run.
    pub async fn send_message(&self, thread_id: ThreadId, message: Message) -> Result<StartOutcome> {
        let mut runs = self.lock_idle(thread_id).await?;
        self.store.append_message(thread_id, message).await?;
        self.start_locked(&mut runs, thread_id).await
    }

    /// Start a run unless one is already active on the thread.
    pub async fn start_run(&self, thread_id: ThreadId) -> Result<StartOutcome> {
        let mut runs = self.runs.lock().await;
        if let Some(handle) = active(&runs, thread_id) {
            tracing::debug!(%thread_id, run_id = %handle.run_id(), "run already active");
            return Ok(StartOutcome::AlreadyRunning(handle.clone()));
        }
        self.start_locked(&mut runs, thread_id).await
    }

    /// Start a run while the caller holds the run table and has checked it is idle.
    async fn start_locked(
        &self,
        runs: &mut HashMap<ThreadId, RunHandle>,
        thread_id: ThreadId,
    ) -> Result<StartOutcome> {
        let mut request =
            RunRequest::new(thread_id, self.gate(thread_id)).with_generation(self.generation.clone());
        if let Some(sink) = &self.event_sink {
            request = request.with_event_sink(sink.clone());
        }
        let handle = self.runner.start(request).await?;
        runs.insert(thread_id, handle.clone());
        Ok(StartOutcome::Started(handle))
    }

    /// Drop trailing assistant and tool messages after the last user turn and run again.
    pub async fn retry(&self, thread_id: ThreadId) -> Result<StartOutcome> {
        let mut runs = self.lock_idle(thread_id).await?;
        let thread = self.store.snapshot(thread_id).await?;
        let last_user = thread
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| ConvoyError::InvalidState("nothing to retry".into()))?;
        if let Some(next) = thread.messages.get(last_user + 1) {
            self.store.truncate_from(thread_id, next.id).await?;
        }
        self.start_locked(&mut runs, thread_id).await
    }

    pub async fn is_running(&self, thread_id: ThreadId) -> bool {
        active(&*self.runs.lock().await, thread_id).is_some()
    }

    pub async fn run_handle(&self, thread_id: ThreadId) -> Option<RunHandle> {
        self.runs.lock().await.get(&thread_id).cloned()
    }

    /// Cancel the thread's active run. Returns `false` when nothing was running.
    pub async fn cancel(&self, thread_id: ThreadId) -> bool {
        match active(&*self.runs.lock().await, thread_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Wait for the thread's most recent run, if there was one.
    pub async fn wait(&self, thread_id: ThreadId) -> Option<RunResult> {
        let handle = self.run_handle(thread_id).await?;
        Some(handle.wait().await)
    }

    pub fn pending_confirmation(&self, thread_id: ThreadId) -> Option<PendingConfirmation> {
        self.existing_gate(thread_id).and_then(|g| g.pending())
    }

    pub fn subscribe_confirmations(
        &self,
        thread_id: ThreadId,
    ) -> watch::Receiver<Option<PendingConfirmation>> {
        self.gate(thread_id).subscribe()
    }

    /// Answer a pending confirmation. Stale or repeated answers return `false`.
    pub fn resolve_confirmation(
        &self,
        thread_id: ThreadId,
        id: ConfirmationId,
        approved: bool,
    ) -> bool {
        self.existing_gate(thread_id)
            .is_some_and(|g| g.resolve(id, approved))
    }

    pub async fn delete_message(&self, thread_id: ThreadId, message_id: MessageId) -> Result<Message> {
        let _runs = self.lock_idle(thread_id).await?;
        self.store.delete_message(thread_id, message_id).await
    }

    pub async fn update_settings(&self, thread_id: ThreadId, settings: ThreadSettings) -> Result<()> {
        let _runs = self.lock_idle(thread_id).await?;
        self.store.update_settings(thread_id, settings).await
    }

    pub async fn undo_history(&self, thread_id: ThreadId) -> Result<Vec<UndoEntry>> {
        self.store.undo_history(thread_id).await
    }

    pub async fn revert(&self, thread_id: ThreadId, entry_id: UndoEntryId) -> Result<UndoEntry> {
        let _runs = self.lock_idle(thread_id).await?;
        self.store.revert(thread_id, entry_id).await
    }

    pub async fn revert_all(&self, thread_id: ThreadId) -> Result<BulkRevertReport> {
        let _runs = self.lock_idle(thread_id).await?;
        self.store.revert_all(thread_id).await
    }

    pub async fn clear_undo(&self, thread_id: ThreadId) -> Result<()> {
        self.store.clear_undo(thread_id).await
    }

    /// Cancel every run, wait for them, then disconnect remote servers.
    pub async fn shutdown(&self) {
        let handles: Vec<RunHandle> = self.runs.lock().await.values().cloned().collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            handle.wait().await;
        }
        self.remote.disconnect_all().await;
    }

    /// Lock the run table, refusing if the thread has a live run. Holding the
    /// guard keeps a run from starting until the caller's mutation is done.
    async fn lock_idle(
        &self,
        thread_id: ThreadId,
    ) -> Result<MutexGuard<'_, HashMap<ThreadId, RunHandle>>> {
        let runs = self.runs.lock().await;
        if active(&runs, thread_id).is_some() {
            return Err(ConvoyError::InvalidState(format!(
                "thread {thread_id} has an active run"
            )));
        }
        Ok(runs)
    }

    fn gate(&self, thread_id: ThreadId) -> Arc<ConfirmationGate> {
        let timeout = self.config.settings.confirmation_timeout();
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(thread_id)
            .or_insert_with(|| Arc::new(ConfirmationGate::new(timeout)))
            .clone()
    }

    fn existing_gate(&self, thread_id: ThreadId) -> Option<Arc<ConfirmationGate>> {
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&thread_id)
            .cloned()
    }
}

fn active(runs: &HashMap<ThreadId, RunHandle>, thread_id: ThreadId) -> Option<&RunHandle> {
    runs.get(&thread_id).filter(|h| !h.is_finished())
}
