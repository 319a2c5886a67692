/// Shared error type used across all ActivityHub crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("validation: {0}")]
    Validation(String),

    #[error("prompt routing failed: {0}")]
    PromptRoutingFailed(String),

    #[error("no default prompt template is configured")]
    PromptNotConfigured,

    #[error("handoff cycle: role {0} already visited in this request")]
    HandoffCycle(String),

    #[error("handoff depth exceeded (max {0})")]
    HandoffDepthExceeded(u32),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for the client-facing error frame.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::Provider { .. } => "PROVIDER_STREAM_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::PromptRoutingFailed(_) => "PROMPT_ROUTING_FAILED",
            Error::PromptNotConfigured => "PROMPT_NOT_CONFIGURED",
            Error::HandoffCycle(_) => "HANDOFF_CYCLE",
            Error::HandoffDepthExceeded(_) => "HANDOFF_DEPTH_EXCEEDED",
            Error::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Error::Cancelled => "CLIENT_CANCELLED",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_for_routing_errors() {
        assert_eq!(
            Error::PromptRoutingFailed("x".into()).code(),
            "PROMPT_ROUTING_FAILED"
        );
        assert_eq!(Error::PromptNotConfigured.code(), "PROMPT_NOT_CONFIGURED");
    }

    #[test]
    fn provider_error_display_includes_provider() {
        let e = Error::Provider {
            provider: "anthropic".into(),
            message: "boom".into(),
        };
        assert_eq!(e.to_string(), "provider anthropic: boom");
    }
}
