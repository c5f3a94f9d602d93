use std::sync::Arc;

use rand::seq::SliceRandom;
use sipfork_sip_core::{CallView, SipUri};
use tracing::debug;

use crate::account::{Account, AccountPool};
use crate::config::{AccountToUseConfig, FindBy};
use crate::error::Result;
use crate::template::Template;

/// Picks the account a provider bridges a call with
pub enum AccountSelectionStrategy {
    /// Uniform pick among the available accounts of the pool
    Random { pool: Arc<AccountPool> },
    /// Look the call up in the pool by alias or URI
    FindInPool {
        pool: Arc<AccountPool>,
        source: Template,
        by: FindBy,
    },
}

impl AccountSelectionStrategy {
    pub fn from_config(config: &AccountToUseConfig, pool: Arc<AccountPool>) -> Result<Self> {
        match config {
            AccountToUseConfig::Random => Ok(AccountSelectionStrategy::Random { pool }),
            AccountToUseConfig::FindInPool { source, by } => Ok(AccountSelectionStrategy::FindInPool {
                pool,
                source: Template::compile_call_only(source)?,
                by: *by,
            }),
        }
    }

    pub fn account_pool(&self) -> &Arc<AccountPool> {
        match self {
            AccountSelectionStrategy::Random { pool } | AccountSelectionStrategy::FindInPool { pool, .. } => pool,
        }
    }

    pub fn choose_account_for_this_call(&self, call: &dyn CallView) -> Option<Arc<Account>> {
        match self {
            AccountSelectionStrategy::Random { pool } => {
                let available: Vec<Arc<Account>> = pool
                    .snapshot()
                    .iter()
                    .filter(|(_, account)| account.is_available())
                    .map(|(_, account)| account.clone())
                    .collect();
                available.choose(&mut rand::thread_rng()).cloned()
            }
            AccountSelectionStrategy::FindInPool { pool, source, by } => {
                let key = match source.render(call, None).and_then(|s| SipUri::parse(&s).map_err(Into::into)) {
                    Ok(key) => key,
                    Err(e) => {
                        debug!("Lookup key '{}' not applicable to call {}: {}", source, call.call_id(), e);
                        return None;
                    }
                };
                match by {
                    FindBy::Alias => pool.get_account_by_alias(&key),
                    FindBy::Uri => pool.get_account_by_uri(&key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PoolSettings;
    use crate::config::StaticAccountConfig;
    use sipfork_sip_core::IncomingCall;

    async fn pool(max_calls: u32) -> Arc<AccountPool> {
        let settings = PoolSettings {
            outbound_proxy: None,
            registration_required: false,
            max_calls_per_line: max_calls,
        };
        let pool = Arc::new(AccountPool::new("p", settings, None));
        let entries: Vec<StaticAccountConfig> = ["sip:a@provider.com", "sip:b@provider.com"]
            .iter()
            .map(|uri| StaticAccountConfig {
                uri: uri.to_string(),
                alias: Some(uri.replace("provider.com", "example.org")),
                user_id: None,
                secret_type: None,
                secret: None,
                outbound_proxy: None,
            })
            .collect();
        pool.reload_static(&entries).await.unwrap();
        pool
    }

    fn call(from: &str, to: &str) -> IncomingCall {
        IncomingCall::new("c", SipUri::parse(from).unwrap(), SipUri::parse(to).unwrap())
    }

    #[tokio::test]
    async fn random_skips_full_accounts() {
        let pool = pool(1).await;
        let strategy = AccountSelectionStrategy::Random { pool: pool.clone() };
        let a = pool.get_account_by_uri(&SipUri::parse("sip:a@provider.com").unwrap()).unwrap();
        assert!(a.take_slot());

        for _ in 0..10 {
            let chosen = strategy.choose_account_for_this_call(&call("sip:x@y.org", "sip:z@y.org")).unwrap();
            assert_eq!(chosen.uri().to_string(), "sip:b@provider.com");
        }
        let b = strategy.choose_account_for_this_call(&call("sip:x@y.org", "sip:z@y.org")).unwrap();
        assert!(b.take_slot());
        assert!(strategy.choose_account_for_this_call(&call("sip:x@y.org", "sip:z@y.org")).is_none());
    }

    #[tokio::test]
    async fn find_in_pool_by_alias_and_uri() {
        let pool = pool(1).await;
        let by_alias = AccountSelectionStrategy::from_config(
            &AccountToUseConfig::FindInPool { source: "{from}".into(), by: FindBy::Alias },
            pool.clone(),
        )
        .unwrap();
        let by_uri = AccountSelectionStrategy::from_config(
            &AccountToUseConfig::FindInPool { source: "{to}".into(), by: FindBy::Uri },
            pool.clone(),
        )
        .unwrap();

        let outbound = call("sip:a@example.org;user=phone", "sip:+331234@example.org");
        assert_eq!(by_alias.choose_account_for_this_call(&outbound).unwrap().uri().to_string(), "sip:a@provider.com");
        assert!(by_uri.choose_account_for_this_call(&outbound).is_none());

        let inbound = call("sip:+331234@provider.com", "sip:b@provider.com");
        assert_eq!(by_uri.choose_account_for_this_call(&inbound).unwrap().uri().to_string(), "sip:b@provider.com");
        assert!(Arc::ptr_eq(by_uri.account_pool(), &pool));
    }
}
