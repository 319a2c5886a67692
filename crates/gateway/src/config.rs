//! Gateway configuration.
//!
//! One TOML file configures the listen address, the state directory,
//! the runtime options (§ configuration knobs), provider endpoints, and
//! the local-mode prompt data (templates, assignments, user profiles).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use ah_domain::capability::ProviderFamily;
use ah_domain::config::RuntimeOptions;
use ah_domain::error::{Error, Result};
use ah_prompts::{PromptAssignment, PromptTemplate, UserProfile};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen: String,
    /// Where local-mode session logs live. Defaults to
    /// `<data_dir>/activityhub`.
    pub state_dir: Option<PathBuf>,
    pub default_model: String,
    pub options: RuntimeOptions,
    /// Closed administrator-group set for the prompt router's gate.
    pub admin_groups: Vec<String>,
    pub templates: Vec<PromptTemplate>,
    pub assignments: Vec<PromptAssignment>,
    pub users: Vec<UserProfile>,
    pub providers: HashMap<String, ProviderEndpoint>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            state_dir: None,
            default_model: default_model(),
            options: RuntimeOptions::default(),
            admin_groups: vec!["admins".into()],
            templates: Vec::new(),
            assignments: Vec::new(),
            users: Vec::new(),
            providers: HashMap::new(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8787".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

/// One configured provider endpoint. The API key is read from the
/// named environment variable at bootstrap — keys never live in the
/// config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoint {
    pub family: ProviderFamily,
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("reading {}: {e}", path.display()))
        })?;
        let config: GatewayConfig =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Boot-time validation. A missing default template is fatal to
    /// warmup — the system refuses to guess a prompt at request time.
    pub fn validate(&self) -> Result<()> {
        let defaults = self
            .templates
            .iter()
            .filter(|t| t.is_default && t.is_active)
            .count();
        match defaults {
            0 => Err(Error::PromptNotConfigured),
            1 => Ok(()),
            n => Err(Error::Config(format!(
                "{n} templates are marked default+active; at most one is allowed"
            ))),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("activityhub")
        })
    }
}
