//! Runner for the agent loop.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConvoyConfig, Credentials, EngineSettings};
use crate::error::{ConvoyError, Result};
use crate::mcp::RemoteToolHub;
use crate::provider::{
    ModelProvider, ProviderKind, ProviderRegistry, ProviderRequest, ProviderResponse, StreamEvent,
};
use crate::thread::{Thread, ThreadId, ThreadStore};
use crate::tools::{BuiltinCall, LocalToolExecutor, ToolExecutor, ToolOutput, ToolSet, BUILTIN_SERVER};
use crate::types::{GenerationSettings, Message, MessageId, ToolCall};

use super::batching::TextBatcher;
use super::confirmation::ConfirmationGate;
use super::events::{RunEventEmitter, RunEventPayload, RunEventSink};
use super::guard::{LoopGuard, REPEATED_CALL_MESSAGE};
use super::projector::project;
use super::types::{
    LoopState, RunId, RunResult, RunStatus, DENIED_MESSAGE, MAX_ITERATIONS_MESSAGE,
    NO_RESPONSE_MESSAGE, STOPPED_MESSAGE,
};
use super::undo::{capture_before, finalize, unrestorable_notice, Capture};

/// Request payload to start a run on one thread.
#[derive(Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub thread_id: ThreadId,
    pub gate: Arc<ConfirmationGate>,
    pub generation: GenerationSettings,
    pub event_sink: Option<RunEventSink>,
}

impl RunRequest {
    pub fn new(thread_id: ThreadId, gate: Arc<ConfirmationGate>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            thread_id,
            gate,
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
}

/// Handle for an in-flight run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: RunId,
    thread_id: ThreadId,
    cancel: CancellationToken,
    result_rx: watch::Receiver<Option<RunResult>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Request cancellation. Repeated calls have no further effect.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.result_rx.borrow().is_some()
    }

    pub fn result(&self) -> Option<RunResult> {
        self.result_rx.borrow().clone()
    }

    pub async fn wait(&self) -> RunResult {
        let mut rx = self.result_rx.clone();
        let finished = rx.wait_for(Option::is_some).await.map(|r| r.clone());
        match finished {
            Ok(Some(result)) => result,
            _ => RunResult::failed(0, "run task ended without reporting a result"),
        }
    }
}

/// Runner trait for executing agent loop requests.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn start(&self, request: RunRequest) -> Result<RunHandle>;
}

/// Default agent-loop runner (tool loop + confirmations + undo + event stream).
#[derive(Clone)]
pub struct LoopRunner {
    store: ThreadStore,
    providers: Arc<ProviderRegistry>,
    config: Arc<ConvoyConfig>,
    executor: Arc<dyn ToolExecutor>,
    remote: Arc<RemoteToolHub>,
}

impl LoopRunner {
    pub fn new(
        store: ThreadStore,
        providers: Arc<ProviderRegistry>,
        config: Arc<ConvoyConfig>,
        remote: Arc<RemoteToolHub>,
    ) -> Self {
        let executor = Arc::new(LocalToolExecutor::new(&config.settings));
        Self {
            store,
            providers,
            config,
            executor,
            remote,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

#[async_trait]
impl Runner for LoopRunner {
    async fn start(&self, request: RunRequest) -> Result<RunHandle> {
        let thread = self.store.snapshot(request.thread_id).await?;
        let provider = self.providers.get(&thread.model.provider)?;
        let cancel = CancellationToken::new();
        let (result_tx, result_rx) = watch::channel(None);

        let run = RunLoop {
            thread_id: request.thread_id,
            store: self.store.clone(),
            credentials: self.config.credentials(&thread.model.provider),
            max_iterations: self.config.settings.max_iterations(thread.agent_enabled),
            settings: self.config.settings.clone(),
            provider,
            generation: request.generation,
            executor: self.executor.clone(),
            remote: self.remote.clone(),
            gate: request.gate,
            emitter: RunEventEmitter::new(request.run_id, request.thread_id, request.event_sink),
            cancel: cancel.clone(),
        };

        tracing::info!(
            run_id = %request.run_id,
            thread_id = %request.thread_id,
            model = %thread.model,
            agent = thread.agent_enabled,
            "run start"
        );
        tokio::spawn(async move {
            let result = run.run().await;
            result_tx.send_replace(Some(result));
        });

        Ok(RunHandle {
            run_id: request.run_id,
            thread_id: request.thread_id,
            cancel,
            result_rx,
        })
    }
}

enum Flow<T> {
    Continue(T),
    Cancelled,
}

struct StreamedTurn {
    response: ProviderResponse,
    has_text: bool,
    cli_calls: usize,
}

struct RunLoop {
    thread_id: ThreadId,
    store: ThreadStore,
    provider: Arc<dyn ModelProvider>,
    credentials: Credentials,
    settings: EngineSettings,
    max_iterations: usize,
    generation: GenerationSettings,
    executor: Arc<dyn ToolExecutor>,
    remote: Arc<RemoteToolHub>,
    gate: Arc<ConfirmationGate>,
    emitter: RunEventEmitter,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn run(self) -> RunResult {
        let mut iterations = 0usize;
        let result = match self.drive(&mut iterations).await {
            Ok(status) => RunResult::new(status, iterations),
            Err(err) => {
                tracing::warn!(thread_id = %self.thread_id, error = %err, "run failed");
                if let Err(e) = self.store.set_status(self.thread_id, Some(err.to_string())).await {
                    tracing::warn!(error = %e, "could not record run failure");
                }
                RunResult::failed(iterations, err.to_string())
            }
        };

        self.emitter.state(result.status.into(), iterations);
        self.emitter.emit(RunEventPayload::Finished {
            result: result.clone(),
        });
        tracing::info!(
            thread_id = %self.thread_id,
            status = ?result.status,
            iterations,
            "run finished"
        );
        result
    }

    async fn drive(&self, iterations: &mut usize) -> Result<RunStatus> {
        let mut guard = LoopGuard::new();
        let kind = self.provider.kind();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }
            *iterations += 1;
            let iteration = *iterations;
            self.emitter.state(LoopState::Requesting, iteration);

            let thread = self.store.snapshot(self.thread_id).await?;
            let remote_tools = self.remote.tool_definitions();
            let tools = ToolSet::snapshot(kind, thread.agent_enabled, &remote_tools);
            let request = ProviderRequest {
                model_id: thread.model.model_id.clone(),
                messages: project(&thread, kind),
                tools: tools.definitions().to_vec(),
                credentials: self.credentials.clone(),
                settings: self.generation.clone(),
            };
            let message_id = self
                .store
                .append_message(self.thread_id, Message::assistant(""))
                .await?;

            let turn = match self.stream_response(&request, message_id, iteration).await? {
                Flow::Continue(turn) => turn,
                Flow::Cancelled => {
                    self.mark_stopped(message_id).await?;
                    return Ok(RunStatus::Cancelled);
                }
            };
            self.emitter.state(LoopState::Deciding, iteration);

            let StreamedTurn {
                response,
                mut has_text,
                cli_calls,
            } = turn;
            if debug_enabled() {
                tracing::debug!(
                    thread_id = %self.thread_id,
                    iteration,
                    tool_calls = response.tool_calls.len(),
                    cli_calls,
                    text_len = response.text.len(),
                    "iteration complete"
                );
            }
            if let Some(usage) = response.usage.clone() {
                self.store.record_usage(self.thread_id, usage).await?;
            }
            if !has_text && !response.text.is_empty() {
                self.store
                    .set_text(self.thread_id, message_id, response.text.clone())
                    .await?;
                has_text = true;
            }

            if kind == ProviderKind::Passthrough {
                if !response.tool_calls.is_empty() {
                    self.store
                        .set_tool_calls(self.thread_id, message_id, response.tool_calls)
                        .await?;
                } else if !has_text && cli_calls == 0 {
                    self.no_response(message_id).await?;
                }
                return Ok(RunStatus::Done);
            }

            if response.tool_calls.is_empty() {
                if !has_text {
                    self.no_response(message_id).await?;
                }
                return Ok(RunStatus::Done);
            }

            if guard.is_repeat(&response.tool_calls) {
                tracing::warn!(thread_id = %self.thread_id, iteration, "repeated tool calls; stopping");
                self.append_notice(message_id, REPEATED_CALL_MESSAGE).await?;
                self.status(REPEATED_CALL_MESSAGE).await?;
                return Ok(RunStatus::Done);
            }

            let calls: Vec<ToolCall> = response
                .tool_calls
                .into_iter()
                .map(|mut call| {
                    call.server_name = tools.origin_of(&call.name).to_string();
                    call
                })
                .collect();
            self.store
                .set_tool_calls(self.thread_id, message_id, calls.clone())
                .await?;

            self.emitter.state(LoopState::ExecutingTools, iteration);
            for call in &calls {
                if self.cancel.is_cancelled() {
                    self.mark_stopped(message_id).await?;
                    return Ok(RunStatus::Cancelled);
                }
                let output = match self.execute_call(call, &thread, iteration).await? {
                    Flow::Continue(output) => output,
                    Flow::Cancelled => {
                        self.mark_stopped(message_id).await?;
                        return Ok(RunStatus::Cancelled);
                    }
                };
                if self.cancel.is_cancelled() {
                    self.mark_stopped(message_id).await?;
                    return Ok(RunStatus::Cancelled);
                }

                self.emitter.emit(RunEventPayload::ToolResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    text: output.text.clone(),
                    is_error: output.is_error,
                });
                self.store
                    .append_message(
                        self.thread_id,
                        Message::tool_result(call, output.text, output.is_error),
                    )
                    .await?;
            }

            if iteration >= self.max_iterations {
                tracing::warn!(thread_id = %self.thread_id, iteration, "iteration limit reached");
                self.status(MAX_ITERATIONS_MESSAGE).await?;
                return Ok(RunStatus::MaxIterationsReached);
            }
        }
    }

    async fn stream_response(
        &self,
        request: &ProviderRequest,
        message_id: MessageId,
        iteration: usize,
    ) -> Result<Flow<StreamedTurn>> {
        self.emitter.state(LoopState::Streaming, iteration);
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
            opened = self.provider.stream_message(request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return Err(self.provider_failure(message_id, err).await),
        };

        let mut batcher = TextBatcher::new(self.settings.text_flush_interval());
        let mut streamed = String::new();
        let mut cli_calls = 0usize;

        let response = loop {
            let deadline = batcher.deadline();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.flush(&mut batcher, message_id).await?;
                    return Ok(Flow::Cancelled);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush(&mut batcher, message_id).await?;
                }
                event = stream.next() => match event {
                    None => {
                        tracing::warn!(
                            provider = self.provider.provider_name(),
                            "stream ended without a final response"
                        );
                        self.flush(&mut batcher, message_id).await?;
                        break ProviderResponse {
                            text: streamed.clone(),
                            ..Default::default()
                        };
                    }
                    Some(Err(err)) => {
                        self.flush(&mut batcher, message_id).await?;
                        return Err(self.provider_failure(message_id, err).await);
                    }
                    Some(Ok(StreamEvent::TextDelta(text))) => {
                        streamed.push_str(&text);
                        batcher.push(&text);
                    }
                    Some(Ok(StreamEvent::ToolCallStarted { id, name })) => {
                        self.flush(&mut batcher, message_id).await?;
                        self.emitter.emit(RunEventPayload::ToolCallStarted { call_id: id, name });
                    }
                    Some(Ok(StreamEvent::ToolCallArgumentsDelta { id, delta })) => {
                        self.flush(&mut batcher, message_id).await?;
                        self.emitter.emit(RunEventPayload::ToolCallArgumentsDelta {
                            call_id: id,
                            delta,
                        });
                    }
                    Some(Ok(StreamEvent::CliToolUse(call))) => {
                        self.flush(&mut batcher, message_id).await?;
                        self.store
                            .push_tool_call(self.thread_id, message_id, call.clone())
                            .await?;
                        cli_calls += 1;
                        self.emitter.emit(RunEventPayload::CliToolUse { call });
                    }
                    Some(Ok(StreamEvent::Done(response))) => {
                        self.flush(&mut batcher, message_id).await?;
                        break response;
                    }
                },
            }
        };

        Ok(Flow::Continue(StreamedTurn {
            response,
            has_text: !streamed.is_empty(),
            cli_calls,
        }))
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        thread: &Thread,
        iteration: usize,
    ) -> Result<Flow<ToolOutput>> {
        let working_directory = thread.working_directory.as_deref();

        if call.server_name == BUILTIN_SERVER {
            let parsed = match BuiltinCall::parse(call) {
                Ok(parsed) => parsed,
                Err(err) => return Ok(Flow::Continue(ToolOutput::error(err))),
            };
            if !parsed.tool().is_destructive() {
                return Ok(self.run_builtin(&parsed, working_directory).await);
            }

            if !thread.dangerous_mode {
                match self.confirm(&parsed, working_directory, iteration).await? {
                    Flow::Continue(true) => {}
                    Flow::Continue(false) => {
                        return Ok(Flow::Continue(ToolOutput::ok(DENIED_MESSAGE)));
                    }
                    Flow::Cancelled => return Ok(Flow::Cancelled),
                }
                self.emitter.state(LoopState::ExecutingTools, iteration);
            }

            let before = match capture_before(&parsed, working_directory).await {
                Capture::Ready(state) => Some(state),
                Capture::Unrestorable { relative_path } => {
                    let message = unrestorable_notice(&relative_path);
                    tracing::warn!(%relative_path, tool_name = parsed.tool_name(), "mutation will not be undoable");
                    self.emitter.emit(RunEventPayload::Status { message });
                    None
                }
                Capture::NotApplicable => None,
            };
            let flow = self.run_builtin(&parsed, working_directory).await;
            if let (Some(before), Flow::Continue(output)) = (before, &flow) {
                if !output.is_error {
                    let entry = finalize(before, &parsed).await;
                    self.store.push_undo(self.thread_id, entry.clone()).await?;
                    self.emitter.emit(RunEventPayload::UndoRecorded { entry });
                }
            }
            return Ok(flow);
        }

        if call.server_name.is_empty() {
            return Ok(Flow::Continue(ToolOutput::error(format!(
                "Unknown tool: {}",
                call.name
            ))));
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(Flow::Cancelled),
            output = self.remote.call_tool(&call.server_name, &call.name, &call.arguments) => {
                Ok(Flow::Continue(output))
            }
        }
    }

    async fn confirm(
        &self,
        call: &BuiltinCall,
        working_directory: Option<&Path>,
        iteration: usize,
    ) -> Result<Flow<bool>> {
        let ticket = self.gate.begin(call, working_directory)?;
        let id = ticket.pending().id;
        self.emitter.state(LoopState::AwaitingConfirmation, iteration);
        self.emitter.emit(RunEventPayload::ConfirmationRequired {
            confirmation: ticket.pending().clone(),
        });

        let approved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
            approved = ticket.decision() => approved,
        };
        tracing::debug!(confirmation_id = %id, approved, tool_name = call.tool_name(), "confirmation resolved");
        self.emitter
            .emit(RunEventPayload::ConfirmationResolved { id, approved });
        Ok(Flow::Continue(approved))
    }

    async fn run_builtin(
        &self,
        call: &BuiltinCall,
        working_directory: Option<&Path>,
    ) -> Flow<ToolOutput> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Cancelled,
            result = self.executor.execute(call, working_directory) => {
                Flow::Continue(ToolOutput::from_result(result))
            }
        }
    }

    async fn flush(&self, batcher: &mut TextBatcher, message_id: MessageId) -> Result<()> {
        let Some(text) = batcher.take() else {
            return Ok(());
        };
        self.store
            .append_text(self.thread_id, message_id, text.clone())
            .await?;
        self.emitter
            .emit(RunEventPayload::TextDelta { message_id, text });
        Ok(())
    }

    async fn message_text_is_empty(&self, message_id: MessageId) -> Result<bool> {
        let thread = self.store.snapshot(self.thread_id).await?;
        Ok(thread
            .message(message_id)
            .map_or(true, |m| m.text.is_empty()))
    }

    /// Give a cancelled message its fallback text if nothing arrived.
    async fn mark_stopped(&self, message_id: MessageId) -> Result<()> {
        if self.message_text_is_empty(message_id).await? {
            self.store
                .set_text(self.thread_id, message_id, STOPPED_MESSAGE)
                .await?;
        }
        Ok(())
    }

    /// Write `notice` on its own paragraph after any existing text.
    async fn append_notice(&self, message_id: MessageId, notice: &str) -> Result<()> {
        if self.message_text_is_empty(message_id).await? {
            self.store.set_text(self.thread_id, message_id, notice).await
        } else {
            self.store
                .append_text(self.thread_id, message_id, format!("\n\n{notice}"))
                .await
        }
    }

    async fn no_response(&self, message_id: MessageId) -> Result<()> {
        self.store
            .set_text(self.thread_id, message_id, NO_RESPONSE_MESSAGE)
            .await?;
        self.status(NO_RESPONSE_MESSAGE).await
    }

    async fn status(&self, message: &str) -> Result<()> {
        self.store
            .set_status(self.thread_id, Some(message.to_string()))
            .await?;
        self.emitter.emit(RunEventPayload::Status {
            message: message.to_string(),
        });
        Ok(())
    }

    async fn provider_failure(&self, message_id: MessageId, err: ConvoyError) -> ConvoyError {
        tracing::warn!(
            provider = self.provider.provider_name(),
            error = %err,
            "provider request failed"
        );
        if let Err(e) = self
            .append_notice(message_id, &format!("Error: {err}"))
            .await
        {
            tracing::warn!(error = %e, "could not record provider failure on message");
        }
        err
    }
}

/// Extra loop tracing, enabled with `CONVOY_DEBUG=1`.
pub(crate) fn debug_enabled() -> bool {
    matches!(std::env::var("CONVOY_DEBUG").as_deref(), Ok("1"))
}
