//! System prompt routing.
//!
//! Chooses the system prompt for each request: administrator gate first,
//! then semantic similarity over the user-scoped template index, then
//! explicit assignments, then the default template. The admin gate and
//! the admin-category filter are security boundaries, not preferences.

pub mod cache;
pub mod local;
pub mod repository;
pub mod router;
pub mod template;

pub use repository::{Embedder, SemanticHit, TemplateRepository, VectorIndex};
pub use router::{PromptRouter, PromptSource, ResolvedPrompt, RouterConfig};
pub use template::{PromptAssignment, PromptTemplate, UserProfile};
