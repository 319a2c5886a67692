use ah_domain::capability::ProviderFamily;
use ah_domain::error::Result;
use ah_domain::message::{Message, ToolDefinition};
use ah_domain::BoxStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / stream types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming request.
///
/// This is the full extent of request shaping the core performs: model,
/// messages, tools, and the thinking budget derived from capabilities.
/// Everything else (auth, retry, endpoint selection) belongs to the
/// transport implementation.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    /// Transport-level provider instance id.
    pub provider_id: String,
    pub model: String,
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_output_tokens: Option<u32>,
    /// Reasoning budget in tokens. `None` disables the thinking field.
    pub thinking_budget: Option<u32>,
}

/// An open provider stream: raw bytes plus the family tag that selects
/// the normalizer state machine.
pub struct ProviderStream {
    pub family: ProviderFamily,
    pub bytes: BoxStream<'static, Result<bytes::Bytes>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The seam to the raw provider HTTP/SDK layer.
///
/// Implementations own authentication, endpoint routing, and transport
/// retry. The core only consumes the byte stream and the family tag.
#[async_trait::async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Open a streaming completion request.
    async fn open_stream(&self, request: &ProviderRequest) -> Result<ProviderStream>;
}
