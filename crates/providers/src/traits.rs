use kb_domain::error::Result;
use kb_domain::stream::{BoxStream, StreamEvent};
use kb_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// System instruction first, then history, then the new user turn
    /// (plus any tool round-trips appended by the agent loop).
    pub messages: Vec<Message>,
    /// Native tool declarations. Empty for inline-markup backends.
    pub tools: Vec<ToolDefinition>,
    /// `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// When `None`, the provider uses its default model.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model backend adapter implements.
///
/// Adapters translate [`ChatRequest`] into their wire format and normalise
/// the streamed response into [`StreamEvent`]s. Native tool calls must be
/// surfaced as a complete `ToolCallFinished` event before `Done`.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and return a stream of events. Errors before the first
    /// byte (auth, HTTP status) are returned directly.
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;

    /// Model used when the request names none.
    fn default_model(&self) -> &str;
}
