#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use kb_domain::config::{Config, ModelFamily, ToolProtocol};
use kb_domain::error::{Error, Result};
use kb_domain::stream::{BoxStream, StreamEvent, Usage};
use kb_domain::tool::Message;
use kb_gateway::runtime::{AskStream, BackendRegistry, ModelBackend};
use kb_gateway::state::AppState;
use kb_memory::{MemoryHit, MemoryProvider, MemoryRecord, MemorySearchRequest};
use kb_observability::{TraceEnd, TraceHandle, TraceStart, Tracer};
use kb_providers::{ChatRequest, LlmProvider, ProviderRegistry};
use kb_sessions::{ConversationStore, FileConversationStore};
use kb_tools::{Tool, ToolRegistry};

pub const SEP: &str = "\n\n---\n\n";

// ── Model fakes ─────────────────────────────────────────────────────

/// One scripted model response.
pub enum Round {
    Events(Vec<StreamEvent>),
    /// Events, then a stream that never yields again.
    Stall(Vec<StreamEvent>),
    /// The call itself fails.
    Fail(String),
}

pub fn tokens(chunks: &[&str]) -> Round {
    let mut events: Vec<StreamEvent> = chunks
        .iter()
        .map(|t| StreamEvent::Token { text: t.to_string() })
        .collect();
    events.push(done());
    Round::Events(events)
}

pub fn tool_call(call_id: &str, name: &str, arguments: Value) -> Round {
    Round::Events(vec![
        StreamEvent::ToolCallStarted { call_id: call_id.into(), tool_name: name.into() },
        StreamEvent::ToolCallFinished {
            call_id: call_id.into(),
            tool_name: name.into(),
            arguments,
        },
        StreamEvent::Done { usage: None, finish_reason: Some("tool_calls".into()) },
    ])
}

pub fn done() -> StreamEvent {
    StreamEvent::Done {
        usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
        finish_reason: Some("stop".into()),
    }
}

/// Sets its flag when dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Poll `flag` for up to two seconds.
pub async fn wait_for(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Plays back scripted rounds in order and records every request.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    /// Set once a stalled stream has been dropped by its consumer.
    pub stall_dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
            stall_dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().unwrap().push(req);
        let round = self.rounds.lock().unwrap().pop_front();
        match round {
            Some(Round::Events(events)) => {
                Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
            }
            Some(Round::Stall(events)) => {
                let guard = DropFlag(self.stall_dropped.clone());
                Ok(Box::pin(async_stream::stream! {
                    let _guard = guard;
                    for event in events {
                        yield Ok(event);
                    }
                    futures_util::future::pending::<()>().await;
                }))
            }
            Some(Round::Fail(message)) => {
                Err(Error::Provider { provider: "scripted".into(), message })
            }
            None => Err(Error::Provider { provider: "scripted".into(), message: "script exhausted".into() }),
        }
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }
}

/// Answers every request with `answer to <last user text>` in two chunks.
pub struct EchoProvider;

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let input = last_user_text(&req.messages);
        let events = vec![
            Ok(StreamEvent::Token { text: "answer to ".into() }),
            Ok(StreamEvent::Token { text: input }),
            Ok(done()),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    fn provider_id(&self) -> &str {
        "echo"
    }

    fn default_model(&self) -> &str {
        "echo-1"
    }
}

pub fn last_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == kb_domain::tool::Role::User)
        .map(|m| m.content.extract_all_text())
        .unwrap_or_default()
}

// ── Tools ───────────────────────────────────────────────────────────

/// Records its calls and answers `result of <name>`, or fails.
pub struct CountingTool {
    name: String,
    fail: bool,
    pub calls: Mutex<Vec<Value>>,
}

impl CountingTool {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.into(), fail: false, calls: Mutex::new(Vec::new()) })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.into(), fail: true, calls: Mutex::new(Vec::new()) })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        self.calls.lock().unwrap().push(arguments);
        if self.fail {
            return Err(Error::Tool { tool: self.name.clone(), message: "index offline".into() });
        }
        Ok(Value::String(format!("result of {}", self.name)))
    }
}

/// Never finishes; sets `dropped` when its execution is abandoned.
pub struct BlockingTool {
    pub started: Arc<AtomicBool>,
    pub dropped: Arc<AtomicBool>,
}

impl BlockingTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "slow_search"
    }

    fn description(&self) -> &str {
        "Test tool that never returns."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: Value) -> Result<Value> {
        let _guard = DropFlag(self.dropped.clone());
        self.started.store(true, Ordering::SeqCst);
        futures_util::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

// ── Collaborator fakes ──────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingMemory {
    pub writes: Mutex<Vec<MemoryRecord>>,
}

impl RecordingMemory {
    pub fn writes(&self) -> Vec<MemoryRecord> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MemoryProvider for RecordingMemory {
    async fn write(&self, record: MemoryRecord) -> Result<()> {
        self.writes.lock().unwrap().push(record);
        Ok(())
    }

    async fn search(&self, _req: MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct RecordingTracer {
    pub started: Mutex<Vec<TraceStart>>,
    pub ended: Mutex<Vec<TraceEnd>>,
    pub flushes: Mutex<usize>,
}

#[async_trait]
impl Tracer for RecordingTracer {
    async fn begin(&self, start: TraceStart) -> Result<TraceHandle> {
        self.started.lock().unwrap().push(start);
        Ok(TraceHandle::new())
    }

    async fn update(&self, _handle: &TraceHandle, end: TraceEnd) -> Result<()> {
        self.ended.lock().unwrap().push(end);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }
}

/// A store whose writes always fail.
pub struct BrokenStore;

#[async_trait]
impl ConversationStore for BrokenStore {
    async fn select(
        &self,
        _id: kb_domain::conversation::ConversationId,
        _owner: Option<&str>,
    ) -> Result<Option<kb_domain::conversation::ConversationRecord>> {
        Ok(None)
    }

    async fn update_messages(
        &self,
        _id: kb_domain::conversation::ConversationId,
        _messages: &[kb_domain::conversation::PersistedTurn],
    ) -> Result<()> {
        Err(Error::Persistence("database unavailable".into()))
    }

    async fn upsert(&self, _record: &kb_domain::conversation::ConversationRecord) -> Result<()> {
        Err(Error::Persistence("database unavailable".into()))
    }

    fn kind(&self) -> &'static str {
        "broken"
    }
}

// ── State assembly ──────────────────────────────────────────────────

pub struct Harness {
    pub state: AppState,
    pub store: Arc<FileConversationStore>,
    pub memory: Arc<RecordingMemory>,
    pub tracer: Arc<RecordingTracer>,
}

pub struct HarnessBuilder {
    provider: Arc<dyn LlmProvider>,
    protocol: ToolProtocol,
    family: ModelFamily,
    tools: Vec<Arc<dyn Tool>>,
    config: Config,
    store: Option<Arc<dyn ConversationStore>>,
    file_store: Arc<FileConversationStore>,
}

impl HarnessBuilder {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            protocol: ToolProtocol::Native,
            family: ModelFamily::Anthropic,
            tools: Vec::new(),
            config: Config::default(),
            store: None,
            file_store: Arc::new(FileConversationStore::in_memory()),
        }
    }

    pub fn inline(mut self) -> Self {
        self.protocol = ToolProtocol::InlineMarkup;
        self.family = ModelFamily::OpenAi;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn max_tool_loops(mut self, n: usize) -> Self {
        self.config.llm.max_tool_loops = n;
        self
    }

    pub fn file_store(mut self, store: FileConversationStore) -> Self {
        self.file_store = Arc::new(store);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness {
        let mut providers = ProviderRegistry::default();
        providers.insert(self.provider.clone());

        let mut backends = BackendRegistry::new("test");
        backends.insert(ModelBackend {
            selector: "test".into(),
            family: self.family,
            protocol: self.protocol,
            provider: self.provider.clone(),
            model: self.provider.default_model().to_string(),
        });

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool);
        }

        let memory = Arc::new(RecordingMemory::default());
        let tracer = Arc::new(RecordingTracer::default());
        let store: Arc<dyn ConversationStore> = match self.store {
            Some(store) => store,
            None => self.file_store.clone(),
        };

        Harness {
            state: AppState {
                config: Arc::new(self.config),
                providers: Arc::new(providers),
                backends: Arc::new(backends),
                store,
                memory: memory.clone(),
                tracer: tracer.clone(),
                tools: Arc::new(tools),
            },
            store: self.file_store,
            memory,
            tracer,
        }
    }
}

// ── Stream helpers ──────────────────────────────────────────────────

/// Everything a caller saw: text chunks in order and the terminal error.
pub struct Collected {
    pub chunks: Vec<String>,
    pub error: Option<Error>,
}

impl Collected {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }

    /// Answer text without the trailing marker.
    pub fn answer(&self) -> String {
        let n = self.chunks.len().saturating_sub(1);
        self.chunks[..n].concat()
    }

    pub fn marker(&self) -> Value {
        let last = self.chunks.last().expect("no chunks");
        serde_json::from_str(last).expect("last chunk is not the marker")
    }
}

pub async fn collect(mut stream: AskStream) -> Collected {
    let mut chunks = Vec::new();
    let mut error = None;
    while let Some(chunk) = stream.chunks.recv().await {
        match chunk {
            Ok(text) => chunks.push(text),
            Err(e) => error = Some(e),
        }
    }
    Collected { chunks, error }
}
