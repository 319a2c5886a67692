//! Provider wire protocols.
//!
//! The transport seam delivers raw bytes; this crate owns everything on
//! top of them: SSE framing, per-family request shaping, and the
//! normalizer state machines that translate divergent provider event
//! streams into the canonical [`ah_domain::event::ActivityEvent`]
//! vocabulary.

pub mod http;
pub mod normalizer;
pub mod shape;
pub mod sse;
pub mod transport;

pub use transport::{ProviderRequest, ProviderStream, ProviderTransport};
