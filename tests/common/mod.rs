//! Shared test helpers: scripted provider, counting executor, fake remote server.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Notify;

use convoy::agent_loop::{PendingConfirmation, RunEvent, RunEventPayload, RunEventSink, RunResult};
use convoy::config::ConvoyConfig;
use convoy::engine::ChatEngine;
use convoy::error::{ConvoyError, Result};
use convoy::mcp::{RemoteCallResult, RemoteToolSchema, RemoteToolService};
use convoy::provider::{
    ModelProvider, ProviderKind, ProviderRegistry, ProviderRequest, ProviderResponse, StreamEvent,
};
use convoy::thread::{Thread, ThreadId};
use convoy::tools::{BuiltinCall, LocalToolExecutor, ToolExecutor};
use convoy::types::{ModelRef, ToolCall, Usage};

pub const PROVIDER: &str = "scripted";

/// What the provider does on one request.
pub enum Turn {
    Events(Vec<StreamEvent>),
    /// Emit these events, then never finish.
    Hang(Vec<StreamEvent>),
    Fail(ConvoyError),
}

type TurnFn = Box<dyn Fn(usize) -> Turn + Send + Sync>;

/// A provider that replays queued turns and records every request.
pub struct ScriptedProvider {
    kind: ProviderKind,
    turns: Mutex<VecDeque<Turn>>,
    fallback: Option<TurnFn>,
    requests: Mutex<Vec<ProviderRequest>>,
    hold: Option<Arc<Notify>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            kind: ProviderKind::Api,
            turns: Mutex::new(turns.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            hold: None,
        }
    }

    /// Produce every turn from the request index.
    pub fn repeating(f: impl Fn(usize) -> Turn + Send + Sync + 'static) -> Self {
        Self {
            fallback: Some(Box::new(f)),
            ..Self::new(Vec::new())
        }
    }

    pub fn passthrough(mut self) -> Self {
        self.kind = ProviderKind::Passthrough;
        self
    }

    /// Delay the first event of every turn until `notify` fires.
    pub fn held_by(mut self, notify: Arc<Notify>) -> Self {
        self.hold = Some(notify);
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn stream_message(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let turn = self.turns.lock().unwrap().pop_front();
        let turn = match (turn, &self.fallback) {
            (Some(turn), _) => turn,
            (None, Some(f)) => f(index),
            (None, None) => Turn::Events(text_turn(&["script exhausted"])),
        };

        let (events, hang) = match turn {
            Turn::Events(events) => (events, false),
            Turn::Hang(events) => (events, true),
            Turn::Fail(err) => return Err(err),
        };
        let events = stream::iter(events.into_iter().map(Ok));
        let body: BoxStream<'static, Result<StreamEvent>> = if hang {
            events.chain(stream::pending()).boxed()
        } else {
            events.boxed()
        };

        match self.hold.clone() {
            Some(notify) => Ok(stream::once(async move { notify.notified().await })
                .filter_map(|_| async { None::<Result<StreamEvent>> })
                .chain(body)
                .boxed()),
            None => Ok(body),
        }
    }
}

pub fn text_turn(parts: &[&str]) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = parts
        .iter()
        .map(|p| StreamEvent::TextDelta(p.to_string()))
        .collect();
    events.push(StreamEvent::Done(ProviderResponse {
        text: parts.concat(),
        tool_calls: Vec::new(),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 3,
            total_tokens: 13,
            reasoning_tokens: None,
        }),
    }));
    events
}

pub fn tool_turn(calls: Vec<ToolCall>) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = calls
        .iter()
        .map(|c| StreamEvent::ToolCallStarted {
            id: c.id.clone(),
            name: c.name.clone(),
        })
        .collect();
    events.push(StreamEvent::Done(ProviderResponse {
        text: String::new(),
        tool_calls: calls,
        usage: None,
    }));
    events
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, arguments.to_string())
}

/// Executor that counts calls and either runs them locally or answers "ok".
pub struct CountingExecutor {
    calls: AtomicUsize,
    local: Option<LocalToolExecutor>,
}

impl CountingExecutor {
    pub fn local() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            local: Some(LocalToolExecutor::default()),
        })
    }

    pub fn stub() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            local: None,
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.count() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("executor was never called")
    }
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, call: &BuiltinCall, working_directory: Option<&Path>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.local {
            Some(local) => local.execute(call, working_directory).await,
            None => Ok("ok".to_string()),
        }
    }
}

/// In-process remote server with one `lookup` tool.
pub struct FakeRemote {
    pub name: String,
    pub fail: bool,
    pub calls: Mutex<Vec<Option<serde_json::Map<String, serde_json::Value>>>>,
}

impl FakeRemote {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RemoteToolService for FakeRemote {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RemoteToolSchema>> {
        Ok(vec![RemoteToolSchema {
            name: "lookup".into(),
            description: Some("Look up a term".into()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "term": { "type": "string" } }
            }),
        }])
    }

    async fn call_tool(
        &self,
        _name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<RemoteCallResult> {
        self.calls.lock().unwrap().push(arguments.clone());
        if self.fail {
            return Err(ConvoyError::remote(&self.name, "connection reset"));
        }
        let term = arguments
            .and_then(|a| a.get("term").and_then(|t| t.as_str().map(str::to_owned)))
            .unwrap_or_default();
        Ok(RemoteCallResult::text(format!("definition of {term}")))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub engine: ChatEngine,
    pub provider: Arc<ScriptedProvider>,
    pub executor: Arc<CountingExecutor>,
    pub events: Arc<Mutex<Vec<RunEvent>>>,
}

impl Harness {
    pub fn new(provider: ScriptedProvider, executor: Arc<CountingExecutor>) -> Self {
        Self::with_config(provider, executor, ConvoyConfig::new())
    }

    pub fn with_config(
        provider: ScriptedProvider,
        executor: Arc<CountingExecutor>,
        mut config: ConvoyConfig,
    ) -> Self {
        config.settings.text_flush_interval_ms = 5;
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink: RunEventSink = {
            let events = events.clone();
            Arc::new(move |event: RunEvent| events.lock().unwrap().push(event))
        };
        let engine = ChatEngine::with_executor(config, registry, executor.clone()).with_event_sink(sink);
        Self {
            engine,
            provider,
            executor,
            events,
        }
    }

    pub async fn chat_thread(&self) -> ThreadId {
        self.engine
            .create_thread(Thread::new(ModelRef::new(PROVIDER, "test-model")))
            .await
            .unwrap()
    }

    pub async fn agent_thread(&self, dir: &Path) -> ThreadId {
        self.engine
            .create_thread(
                Thread::new(ModelRef::new(PROVIDER, "test-model")).with_agent(Some(dir.to_path_buf())),
            )
            .await
            .unwrap()
    }

    pub async fn wait(&self, thread: ThreadId) -> RunResult {
        tokio::time::timeout(Duration::from_secs(10), self.engine.wait(thread))
            .await
            .expect("run did not finish in time")
            .expect("no run recorded for thread")
    }

    pub async fn next_confirmation(&self, thread: ThreadId) -> PendingConfirmation {
        let mut rx = self.engine.subscribe_confirmations(thread);
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(pending) = rx.borrow_and_update().clone() {
                    return pending;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("no confirmation requested")
    }

    /// Poll the recorded events until one matches.
    pub async fn wait_for_event(&self, pred: impl Fn(&RunEventPayload) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !self.events().iter().any(|e| pred(&e.payload)) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("event never arrived")
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}
