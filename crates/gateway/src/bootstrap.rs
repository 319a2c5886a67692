//! Service wiring.
//!
//! Builds the explicit [`Services`] bundle from the gateway config:
//! capability registry, prompt router over the config-backed template
//! repository, HTTP provider transport, tool registry with built-ins,
//! and the local JSONL session store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ah_capabilities::CapabilityRegistry;
use ah_domain::error::{Error, Result};
use ah_orchestrator::{CancelMap, ConversationOrchestrator, Services};
use ah_prompts::local::LocalTemplateRepository;
use ah_prompts::{PromptRouter, RouterConfig};
use ah_providers::http::{EndpointConfig, HttpTransport};
use ah_store::LocalSessionStore;
use ah_tools::ToolRegistry;

use crate::config::GatewayConfig;
use crate::state::AppState;

pub fn build_state(config: GatewayConfig) -> Result<AppState> {
    let config = Arc::new(config);

    // ── Provider transport ─────────────────────────────────────────
    let mut endpoints = HashMap::new();
    for (id, ep) in &config.providers {
        let api_key = match &ep.api_key_env {
            Some(var) => std::env::var(var).map_err(|_| {
                Error::Config(format!("provider {id}: env var {var} is not set"))
            })?,
            None => String::new(),
        };
        endpoints.insert(
            id.clone(),
            EndpointConfig {
                family: ep.family,
                base_url: ep.base_url.clone(),
                api_key,
            },
        );
    }
    let transport = Arc::new(HttpTransport::new(endpoints)?);

    // ── Prompt routing ─────────────────────────────────────────────
    let repo = Arc::new(LocalTemplateRepository::new(
        config.templates.clone(),
        config.assignments.clone(),
        config.users.clone(),
    ));
    let router_config = RouterConfig {
        mode: config.options.semantic_routing,
        search_timeout: Duration::from_millis(config.options.semantic_search_timeout_ms),
        admin_groups: HashSet::from_iter(config.admin_groups.iter().cloned()),
        ..Default::default()
    };
    // Local mode runs without a vector index; platform deployments wire
    // their embedder + index here.
    let router = Arc::new(PromptRouter::new(repo, router_config));

    // ── Tools ──────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    ah_tools::builtin::register_builtins(&tools);

    // ── Store ──────────────────────────────────────────────────────
    let sessions_dir = config.state_dir().join("sessions");
    let store = Arc::new(LocalSessionStore::new(&sessions_dir)?);
    tracing::info!(dir = %sessions_dir.display(), "session store ready");

    let services = Arc::new(Services {
        capabilities: Arc::new(CapabilityRegistry::new()),
        router,
        transport,
        tools,
        store,
        options: config.options.clone(),
    });

    Ok(AppState {
        config,
        orchestrator: Arc::new(ConversationOrchestrator::new(services.clone())),
        services,
        cancel_map: Arc::new(CancelMap::new()),
    })
}
