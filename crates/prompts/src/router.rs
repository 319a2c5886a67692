//! Prompt resolution.
//!
//! Strictly ordered, short-circuiting on the first hit:
//!
//! 1. administrator gate — admins always get the "Admin Mode" template;
//! 2. semantic routing over the user-scoped index, with admin-category
//!    hits filtered out regardless of similarity;
//! 3. most recent explicit user assignment;
//! 4. most recent group assignment (tie-break `assigned_at` DESC);
//! 5. the default template — its absence is `PROMPT_NOT_CONFIGURED`.
//!
//! When semantic routing is `required`, a failure in step 2 never falls
//! through: silent fallback could route a user to a prompt they are not
//! entitled to use.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ah_domain::config::SemanticRoutingMode;
use ah_domain::error::{Error, Result};

use crate::cache::{message_hash, PromptCache};
use crate::repository::{Embedder, TemplateRepository, VectorIndex};
use crate::template::{PromptAssignment, PromptTemplate, ADMIN_TEMPLATE_NAME};

/// Which step of the resolution produced the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSource {
    Admin,
    Semantic,
    User,
    Group,
    Default,
}

#[derive(Debug, Clone)]
pub struct ResolvedPrompt {
    pub content: String,
    pub template: Option<PromptTemplate>,
    pub source: PromptSource,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mode: SemanticRoutingMode,
    pub search_timeout: Duration,
    /// Closed set of administrator group names.
    pub admin_groups: HashSet<String>,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub cache_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: SemanticRoutingMode::Enabled,
            search_timeout: Duration::from_secs(5),
            admin_groups: HashSet::from(["admins".to_string()]),
            similarity_threshold: 0.6,
            top_k: 3,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PromptRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PromptRouter {
    repo: Arc<dyn TemplateRepository>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
    cache: PromptCache,
    config: RouterConfig,
}

impl PromptRouter {
    pub fn new(repo: Arc<dyn TemplateRepository>, config: RouterConfig) -> Self {
        let cache = PromptCache::new(config.cache_ttl);
        Self {
            repo,
            embedder: None,
            index: None,
            cache,
            config,
        }
    }

    pub fn with_semantic(
        mut self,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    /// Resolve the system prompt for a request.
    pub async fn resolve(
        &self,
        user_id: &str,
        message: Option<&str>,
        groups: Option<&[String]>,
    ) -> Result<ResolvedPrompt> {
        let profile = self.repo.user_profile(user_id).await?;
        let mut all_groups: Vec<String> = profile.groups.clone();
        if let Some(extra) = groups {
            for g in extra {
                if !all_groups.contains(g) {
                    all_groups.push(g.clone());
                }
            }
        }

        // ── 1. Administrator gate ──────────────────────────────────
        let is_admin =
            profile.is_admin || all_groups.iter().any(|g| self.config.admin_groups.contains(g));
        if is_admin {
            let template = self
                .repo
                .template_by_name(ADMIN_TEMPLATE_NAME)
                .await?
                .filter(|t| t.is_active)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "administrator gate requires an active '{ADMIN_TEMPLATE_NAME}' template"
                    ))
                })?;
            tracing::debug!(user = user_id, "prompt resolved via admin gate");
            return Ok(ResolvedPrompt {
                content: template.content.clone(),
                template: Some(template),
                source: PromptSource::Admin,
            });
        }

        // ── Cache + single-flight around steps 2–5 ─────────────────
        let hash = message_hash(message.unwrap_or(""));
        if let Some(hit) = self.cache.get(user_id, &hash) {
            return Ok(hit);
        }
        let guard = self.cache.flight_guard(user_id, &hash);
        let _flight = guard.lock().await;
        if let Some(hit) = self.cache.get(user_id, &hash) {
            return Ok(hit);
        }

        let resolved = self.resolve_uncached(user_id, message, &all_groups).await?;
        self.cache.insert(user_id, &hash, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_uncached(
        &self,
        user_id: &str,
        message: Option<&str>,
        groups: &[String],
    ) -> Result<ResolvedPrompt> {
        // ── 2. Semantic routing ────────────────────────────────────
        // Required mode with no message still falls through: there is
        // no semantic decision to get wrong without something to embed.
        if self.config.mode != SemanticRoutingMode::Disabled {
            if let Some(message) = message {
                match self.semantic_lookup(user_id, message).await {
                    Ok(Some(resolved)) => return Ok(resolved),
                    Ok(None) => {}
                    Err(e) => {
                        if self.config.mode == SemanticRoutingMode::Required {
                            return Err(match e {
                                Error::PromptRoutingFailed(_) => e,
                                other => Error::PromptRoutingFailed(other.to_string()),
                            });
                        }
                        tracing::warn!(
                            user = user_id,
                            error = %e,
                            "semantic routing failed, falling through to assignments"
                        );
                    }
                }
            }
        }

        // ── 3. User assignment ─────────────────────────────────────
        let user_assignments = self.repo.user_assignments(user_id).await?;
        if let Some(resolved) = self
            .newest_assigned_template(user_assignments, PromptSource::User)
            .await?
        {
            return Ok(resolved);
        }

        // ── 4. Group assignment ────────────────────────────────────
        if !groups.is_empty() {
            let group_assignments = self.repo.group_assignments(groups).await?;
            if let Some(resolved) = self
                .newest_assigned_template(group_assignments, PromptSource::Group)
                .await?
            {
                return Ok(resolved);
            }
        }

        // ── 5. Default ─────────────────────────────────────────────
        let template = self
            .repo
            .default_template()
            .await?
            .filter(|t| t.is_active && !t.is_admin())
            .ok_or(Error::PromptNotConfigured)?;
        Ok(ResolvedPrompt {
            content: template.content.clone(),
            template: Some(template),
            source: PromptSource::Default,
        })
    }

    /// Step 2 body: embed, search, filter, fetch. `Ok(None)` means no
    /// eligible hit; errors are classified by the caller per mode.
    async fn semantic_lookup(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<Option<ResolvedPrompt>> {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            // No vector index wired. Required mode treats that as a
            // routing failure; enabled mode just skips the step.
            if self.config.mode == SemanticRoutingMode::Required {
                return Err(Error::PromptRoutingFailed(
                    "semantic routing required but no vector index is wired".into(),
                ));
            }
            return Ok(None);
        };

        let deadline = self.config.search_timeout;
        let search = async {
            let embedding = embedder.embed(message).await?;
            index.search(user_id, &embedding, self.config.top_k).await
        };
        let hits = tokio::time::timeout(deadline, search)
            .await
            .map_err(|_| Error::Timeout("semantic search".into()))??;

        // Defense in depth: drop admin-category hits even when they are
        // the closest match, and re-check on the fetched template in
        // case the index metadata is stale.
        for hit in hits {
            if hit.similarity < self.config.similarity_threshold {
                continue;
            }
            if hit.category == crate::template::ADMIN_CATEGORY {
                tracing::warn!(
                    user = user_id,
                    template = %hit.name,
                    similarity = hit.similarity,
                    "admin template surfaced by semantic search, filtered"
                );
                continue;
            }
            let Some(template) = self.repo.template_by_id(&hit.template_id).await? else {
                continue;
            };
            if !template.is_active || template.is_admin() {
                continue;
            }
            tracing::debug!(
                user = user_id,
                template = %template.name,
                similarity = hit.similarity,
                "prompt resolved via semantic routing"
            );
            return Ok(Some(ResolvedPrompt {
                content: template.content.clone(),
                template: Some(template),
                source: PromptSource::Semantic,
            }));
        }
        Ok(None)
    }

    /// Most recent assignment whose template is active and non-admin.
    async fn newest_assigned_template(
        &self,
        mut assignments: Vec<PromptAssignment>,
        source: PromptSource,
    ) -> Result<Option<ResolvedPrompt>> {
        assignments.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
        for assignment in assignments {
            let Some(template) = self.repo.template_by_id(&assignment.template_id).await? else {
                continue;
            };
            if !template.is_active || template.is_admin() {
                continue;
            }
            return Ok(Some(ResolvedPrompt {
                content: template.content.clone(),
                template: Some(template),
                source,
            }));
        }
        Ok(None)
    }

    // ── Invalidation hooks ─────────────────────────────────────────

    /// Any template changed: every cached entry is stale.
    pub fn on_template_updated(&self) {
        self.cache.invalidate_all();
    }

    /// An assignment changed for one user.
    pub fn on_assignment_updated(&self, user_id: &str) {
        self.cache.invalidate_user(user_id);
    }

    /// The default template changed: every user's entry is stale.
    pub fn on_default_changed(&self) {
        self.cache.invalidate_all();
    }
}
