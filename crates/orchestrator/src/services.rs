//! The explicit service bundle handed to the orchestrator.
//!
//! No ambient globals: everything the turn loop reaches — capability
//! registry, prompt router, provider transport, tool registry, session
//! store — is injected here once at construction.

use std::sync::Arc;

use ah_capabilities::CapabilityRegistry;
use ah_domain::config::RuntimeOptions;
use ah_prompts::PromptRouter;
use ah_providers::ProviderTransport;
use ah_store::SessionStore;
use ah_tools::ToolRegistry;

pub struct Services {
    pub capabilities: Arc<CapabilityRegistry>,
    pub router: Arc<PromptRouter>,
    pub transport: Arc<dyn ProviderTransport>,
    pub tools: Arc<ToolRegistry>,
    pub store: Arc<dyn SessionStore>,
    pub options: RuntimeOptions,
}
