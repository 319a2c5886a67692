//! Message persistence façade.
//!
//! The orchestrator persists chat messages only through this narrow
//! trait. Platform mode injects a relational implementation; local mode
//! uses the append-only JSONL store in [`local`]. Persistence never
//! happens on the event-emission path — writes arrive via the fanout's
//! lossy persistence subscriber.

pub mod local;
pub mod memory;

use ah_domain::error::Result;
use ah_domain::message::ChatMessage;

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Append one message to a session's history.
    async fn append(&self, message: &ChatMessage) -> Result<()>;

    /// Load a session's full history, oldest first.
    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// Known session ids, sorted.
    async fn list_sessions(&self) -> Result<Vec<String>>;
}

pub use local::LocalSessionStore;
pub use memory::InMemorySessionStore;
