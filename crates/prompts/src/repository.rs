//! Repository seams for prompt routing.
//!
//! The router reaches the relational store, the embedding model, and the
//! vector store only through these narrow traits. Platform mode injects
//! client-pool-backed implementations; local mode uses
//! [`crate::local::LocalTemplateRepository`].

use ah_domain::error::Result;

use crate::template::{PromptAssignment, PromptTemplate, UserProfile};

/// Template and assignment storage.
#[async_trait::async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn user_profile(&self, user_id: &str) -> Result<UserProfile>;

    /// Active template with the given name, if any.
    async fn template_by_name(&self, name: &str) -> Result<Option<PromptTemplate>>;

    async fn template_by_id(&self, id: &str) -> Result<Option<PromptTemplate>>;

    /// Assignments scoped to this user, any order.
    async fn user_assignments(&self, user_id: &str) -> Result<Vec<PromptAssignment>>;

    /// Assignments scoped to any of these groups, any order.
    async fn group_assignments(&self, groups: &[String]) -> Result<Vec<PromptAssignment>>;

    /// The single active default template, if configured.
    async fn default_template(&self) -> Result<Option<PromptTemplate>>;
}

/// Text embedding seam.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One semantic search hit over the user-scoped template collection.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub template_id: String,
    pub name: String,
    pub category: String,
    /// Cosine similarity in [0, 1].
    pub similarity: f32,
}

/// Vector similarity search over the per-user memory-enriched index.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k hits for the embedding, most similar first.
    async fn search(&self, user_id: &str, embedding: &[f32], k: usize) -> Result<Vec<SemanticHit>>;
}
