use std::sync::Arc;

use ah_orchestrator::{CancelMap, ConversationOrchestrator, Services};

use crate::config::GatewayConfig;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub services: Arc<Services>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub cancel_map: Arc<CancelMap>,
}
