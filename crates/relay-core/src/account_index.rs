use crate::{AccountProvider, Platform};
use std::collections::HashMap;
use std::sync::Arc;

/// A refreshable view over the account pool, grouped the ways the
/// scheduler needs to narrow a candidate set: by platform, by the
/// account's own wire-protocol type, and by type prefix (e.g. selecting
/// every `claude-*` account regardless of auth scheme).
pub struct AccountIndex {
    accounts: Vec<Arc<dyn AccountProvider>>,
    by_platform: HashMap<Platform, Vec<Arc<dyn AccountProvider>>>,
    by_type: HashMap<String, Vec<Arc<dyn AccountProvider>>>,
}

impl AccountIndex {
    pub fn new(accounts: Vec<Arc<dyn AccountProvider>>) -> Self {
        let mut index = Self {
            accounts,
            by_platform: HashMap::new(),
            by_type: HashMap::new(),
        };
        index.refresh();
        index
    }

    /// Rebuilds the grouped views from the current account list. Cheap
    /// enough to call whenever accounts are hot-reloaded; does not touch
    /// the accounts themselves.
    pub fn refresh(&mut self) {
        self.by_platform.clear();
        self.by_type.clear();

        for account in &self.accounts {
            self.by_platform
                .entry(account.platform())
                .or_default()
                .push(account.clone());
            self.by_type
                .entry(account.account_type().to_string())
                .or_default()
                .push(account.clone());
        }
    }

    pub fn all(&self) -> &[Arc<dyn AccountProvider>] {
        &self.accounts
    }

    pub fn by_platform(&self, platform: Platform) -> &[Arc<dyn AccountProvider>] {
        self.by_platform
            .get(&platform)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn by_type(&self, account_type: &str) -> &[Arc<dyn AccountProvider>] {
        self.by_type
            .get(account_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn by_type_prefix(&self, prefix: &str) -> Vec<Arc<dyn AccountProvider>> {
        self.by_type
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .flat_map(|(_, v)| v.iter().cloned())
            .collect()
    }
}
