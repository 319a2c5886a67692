use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Template category marking administrator-only prompts. Load-bearing
/// security metadata: templates so categorized must never be selected
/// for a non-administrator user by any code path.
pub const ADMIN_CATEGORY: &str = "admin";

/// Name of the template the administrator gate resolves to.
pub const ADMIN_TEMPLATE_NAME: &str = "Admin Mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerScope {
    Global,
    Group,
    User,
}

/// A stored system-prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_scope")]
    pub owner_scope: OwnerScope,
}

fn default_true() -> bool {
    true
}
fn default_scope() -> OwnerScope {
    OwnerScope::Global
}

impl PromptTemplate {
    pub fn is_admin(&self) -> bool {
        self.category == ADMIN_CATEGORY
    }
}

/// An explicit template assignment to a user or a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptAssignment {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub template_id: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

/// What the admin gate needs to know about a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}
