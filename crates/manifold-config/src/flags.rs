use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Vector-similarity routing for the `$smart` scope
///
/// When disabled, `$smart` resolves to nothing and the vector index is not
/// maintained.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartRoutingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Model identifier passed to the embedder
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Embedder endpoint; defaults to the OpenAI API
    #[serde(default)]
    pub api_url: Option<Url>,
    /// Embedder credential
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// File path for the persisted embedding rows; in-memory when unset
    #[serde(default)]
    pub vector_path: Option<PathBuf>,
}

impl Default for SmartRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            embed_model: default_embed_model(),
            api_url: None,
            api_key: None,
            vector_path: None,
        }
    }
}

fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Scope resolution policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// When false, the global scope is refused for non-admins
    #[serde(default = "default_true")]
    pub allow_global: bool,
    /// Group used when a session names no scope
    #[serde(default)]
    pub default_group: Option<String>,
    /// Principal ids granted admin visibility
    #[serde(default)]
    pub admins: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            allow_global: true,
            default_group: None,
            admins: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
