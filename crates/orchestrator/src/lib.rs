//! Conversation orchestration.
//!
//! One orchestrator task per inbound request owns the activity session
//! and drives the turn loop: resolve the prompt, open the provider
//! stream, feed raw events through the normalizer, fan canonical events
//! out, dispatch tool calls in parallel, follow multi-model handoffs,
//! and finalize.

pub mod cancel;
pub mod handoff;
pub mod services;
pub mod turn;

pub use cancel::CancelMap;
pub use services::Services;
pub use turn::{ActivityRequest, ConversationOrchestrator};
