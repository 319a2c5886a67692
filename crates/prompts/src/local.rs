//! Config-backed template repository for local mode.
//!
//! Templates, assignments, and user profiles live in the gateway's TOML
//! config; this repository serves them from memory. Platform mode swaps
//! in a relational implementation behind the same trait.

use std::collections::HashMap;

use parking_lot::RwLock;

use ah_domain::error::Result;

use crate::repository::TemplateRepository;
use crate::template::{PromptAssignment, PromptTemplate, UserProfile};

#[derive(Default)]
pub struct LocalTemplateRepository {
    templates: RwLock<Vec<PromptTemplate>>,
    assignments: RwLock<Vec<PromptAssignment>>,
    users: RwLock<HashMap<String, UserProfile>>,
}

impl LocalTemplateRepository {
    pub fn new(
        templates: Vec<PromptTemplate>,
        assignments: Vec<PromptAssignment>,
        users: Vec<UserProfile>,
    ) -> Self {
        Self {
            templates: RwLock::new(templates),
            assignments: RwLock::new(assignments),
            users: RwLock::new(
                users
                    .into_iter()
                    .map(|u| (u.user_id.clone(), u))
                    .collect(),
            ),
        }
    }

    /// Upsert a template (administrative surface and tests).
    pub fn put_template(&self, template: PromptTemplate) {
        let mut templates = self.templates.write();
        if let Some(slot) = templates.iter_mut().find(|t| t.id == template.id) {
            *slot = template;
        } else {
            templates.push(template);
        }
    }

    pub fn put_assignment(&self, assignment: PromptAssignment) {
        self.assignments.write().push(assignment);
    }

    pub fn put_user(&self, profile: UserProfile) {
        self.users.write().insert(profile.user_id.clone(), profile);
    }
}

#[async_trait::async_trait]
impl TemplateRepository for LocalTemplateRepository {
    async fn user_profile(&self, user_id: &str) -> Result<UserProfile> {
        Ok(self
            .users
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserProfile {
                user_id: user_id.to_string(),
                is_admin: false,
                groups: Vec::new(),
            }))
    }

    async fn template_by_name(&self, name: &str) -> Result<Option<PromptTemplate>> {
        Ok(self
            .templates
            .read()
            .iter()
            .find(|t| t.name == name && t.is_active)
            .cloned())
    }

    async fn template_by_id(&self, id: &str) -> Result<Option<PromptTemplate>> {
        Ok(self.templates.read().iter().find(|t| t.id == id).cloned())
    }

    async fn user_assignments(&self, user_id: &str) -> Result<Vec<PromptAssignment>> {
        Ok(self
            .assignments
            .read()
            .iter()
            .filter(|a| a.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn group_assignments(&self, groups: &[String]) -> Result<Vec<PromptAssignment>> {
        Ok(self
            .assignments
            .read()
            .iter()
            .filter(|a| {
                a.group_id
                    .as_ref()
                    .map(|g| groups.contains(g))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn default_template(&self) -> Result<Option<PromptTemplate>> {
        Ok(self
            .templates
            .read()
            .iter()
            .find(|t| t.is_default && t.is_active)
            .cloned())
    }
}
