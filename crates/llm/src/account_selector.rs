//! Resolves which configured upstream account a dispatch attempt should use
//! (spec.md §6's `AccountSelector` contract).

use std::{
    collections::BTreeMap,
    sync::{Arc, atomic::AtomicUsize},
};

use async_trait::async_trait;
use config::AccountConfig;
use rate_limit::RateLimitTracker;
use secrecy::SecretString;
use url::Url;

use crate::error::DispatchError;

/// Resolved upstream credentials and endpoint for one dispatch attempt.
#[derive(Debug, Clone)]
pub(crate) struct SelectedAccount {
    pub account_id: String,
    pub api_key: SecretString,
    pub base_api: Url,
    pub user_agent: Option<String>,
    pub proxy: Option<Url>,
}

impl SelectedAccount {
    fn from_config(account_id: &str, config: &AccountConfig) -> Self {
        Self {
            account_id: account_id.to_string(),
            api_key: config.api_key.clone(),
            base_api: config.base_api.clone(),
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
        }
    }
}

/// Chooses an upstream account to dispatch a request to, and re-resolves one
/// by id for the refetch-once-on-invalid-credentials path (spec.md §4.4 step 4).
#[async_trait]
pub(crate) trait AccountSelector: Send + Sync {
    async fn select(&self, api_key: &str, session_hint: &str, model: &str) -> Result<SelectedAccount, DispatchError>;

    async fn get_by_id(&self, account_id: &str) -> Result<SelectedAccount, DispatchError>;
}

/// Round-robins over the accounts configured in `[llm.accounts]`, skipping
/// any the rate-limit tracker currently flags (spec.md §6).
///
/// `api_key` and `model` are accepted to satisfy the external contract but
/// unused for selection: this gateway has no per-key or per-model account
/// affinity, every account is an undifferentiated OpenAI-compatible backend.
pub(crate) struct ConfiguredAccountSelector {
    accounts: BTreeMap<String, AccountConfig>,
    rate_limits: Arc<RateLimitTracker>,
    cursor: AtomicUsize,
}

impl ConfiguredAccountSelector {
    pub fn new(accounts: BTreeMap<String, AccountConfig>, rate_limits: Arc<RateLimitTracker>) -> Self {
        Self {
            accounts,
            rate_limits,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AccountSelector for ConfiguredAccountSelector {
    async fn select(&self, _api_key: &str, _session_hint: &str, _model: &str) -> Result<SelectedAccount, DispatchError> {
        let ids: Vec<&String> = self.accounts.keys().collect();
        if ids.is_empty() {
            return Err(DispatchError::NoAccount);
        }

        let start = self.cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % ids.len();

        for offset in 0..ids.len() {
            let id = ids[(start + offset) % ids.len()];
            if !self.rate_limits.is_rate_limited(id) {
                return Ok(SelectedAccount::from_config(id, &self.accounts[id]));
            }
        }

        log::warn!("every configured account is currently rate-limited");
        Err(DispatchError::NoAccount)
    }

    async fn get_by_id(&self, account_id: &str) -> Result<SelectedAccount, DispatchError> {
        self.accounts
            .get(account_id)
            .map(|config| SelectedAccount::from_config(account_id, config))
            .ok_or(DispatchError::MisconfiguredAccount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(base: &str) -> AccountConfig {
        toml::from_str(&format!(r#"api_key = "sk-test"
base_api = "{base}"
"#))
        .unwrap()
    }

    #[tokio::test]
    async fn select_errors_with_no_configured_accounts() {
        let selector = ConfiguredAccountSelector::new(BTreeMap::new(), Arc::new(RateLimitTracker::new()));
        let result = selector.select("key", "session", "gpt-4o").await;
        assert!(matches!(result, Err(DispatchError::NoAccount)));
    }

    #[tokio::test]
    async fn select_skips_rate_limited_accounts() {
        let mut accounts = BTreeMap::new();
        accounts.insert("acct_a".to_string(), account("https://a.example.com/v1"));
        accounts.insert("acct_b".to_string(), account("https://b.example.com/v1"));

        let rate_limits = Arc::new(RateLimitTracker::new());
        rate_limits.mark_rate_limited(
            "acct_a",
            rate_limit::RateLimitKind::Requests,
            "hash",
            std::time::Duration::from_secs(60),
        );

        let selector = ConfiguredAccountSelector::new(accounts, rate_limits);
        for _ in 0..4 {
            let selected = selector.select("key", "session", "gpt-4o").await.unwrap();
            assert_eq!(selected.account_id, "acct_b");
        }
    }

    #[tokio::test]
    async fn get_by_id_rejects_unknown_account() {
        let selector = ConfiguredAccountSelector::new(BTreeMap::new(), Arc::new(RateLimitTracker::new()));
        let result = selector.get_by_id("missing").await;
        assert!(matches!(result, Err(DispatchError::MisconfiguredAccount)));
    }
}
