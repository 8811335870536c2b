//! Configuration for the upstream OpenAI-compatible accounts this gateway
//! dispatches to, and the downstream API keys allowed to call it.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// LLM gateway configuration: the `[llm]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Whether the `/v1/messages` endpoint is served at all.
    pub enabled: bool,

    /// Path the Anthropic-compatible messages endpoint is mounted at.
    pub path: String,

    /// Upstream request timeout, in seconds.
    pub request_timeout_secs: u64,

    /// Upstream OpenAI-compatible accounts, keyed by account id.
    pub accounts: BTreeMap<String, AccountConfig>,

    /// Downstream API keys accepted on incoming requests, keyed by key id.
    pub api_keys: BTreeMap<String, ApiKeyConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/v1/messages".to_string(),
            request_timeout_secs: 600,
            accounts: BTreeMap::new(),
            api_keys: BTreeMap::new(),
        }
    }
}

/// A single upstream OpenAI-compatible account the dispatcher can select.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    /// Bearer credential sent as `Authorization: Bearer <api_key>` upstream.
    pub api_key: SecretString,

    /// Base URL; `/chat/completions` is appended by the upstream client.
    pub base_api: Url,

    /// Overrides the default `User-Agent` sent upstream.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Per-account HTTP(S) proxy.
    #[serde(default)]
    pub proxy: Option<Url>,
}

/// A downstream API key accepted on `/v1/messages`, with its grants.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    /// The credential itself, compared against the caller's bearer token.
    pub key: SecretString,

    /// Permissions granted to this key. Empty means no access at all.
    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// If non-empty, only these model names may be requested with this key.
    #[serde(default)]
    pub model_restrictions: Vec<String>,
}

/// Permission grants recognized on a downstream API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Access to the OpenAI-backed messages dispatch path.
    Openai,
    /// Access to every protocol this gateway serves.
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_config_deserializes_with_default_grants() {
        let key: ApiKeyConfig = toml::from_str(
            r#"
            key = "sk-test"
            "#,
        )
        .unwrap();
        assert!(key.permissions.is_empty());
        assert!(key.model_restrictions.is_empty());
    }
}
