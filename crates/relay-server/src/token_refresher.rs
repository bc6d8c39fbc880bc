use relay_core::AccountProvider;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Proactively refreshes OAuth-backed accounts whose token is nearing expiry
/// so a request never pays for the refresh round-trip itself. Accounts cache
/// their own token and refresh lazily in `get_credentials`, so this is a
/// latency optimization, not a correctness requirement.
pub struct TokenRefresher {
    accounts: Vec<Arc<dyn AccountProvider>>,
    interval: Duration,
    threshold: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
    force_rx: mpsc::UnboundedReceiver<String>,
    handle: TokenRefresherHandle,
}

/// Cloneable handle that lets an admin endpoint request an out-of-band
/// refresh for a specific account without waiting for the next tick.
#[derive(Clone)]
pub struct TokenRefresherHandle {
    force_tx: mpsc::UnboundedSender<String>,
}

impl TokenRefresherHandle {
    #[allow(dead_code)] // Reserved for an admin ForceRefresh endpoint, not yet exposed over HTTP
    pub fn force_refresh(&self, account_id: &str) {
        let _ = self.force_tx.send(account_id.to_string());
    }
}

impl TokenRefresher {
    pub fn new(accounts: Vec<Arc<dyn AccountProvider>>, interval: Duration, threshold: Duration) -> Self {
        let oauth_accounts = accounts
            .into_iter()
            .filter(|a| a.account_type().contains("oauth"))
            .collect();
        let (force_tx, force_rx) = mpsc::unbounded_channel();
        Self {
            accounts: oauth_accounts,
            interval,
            threshold,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            force_rx,
            handle: TokenRefresherHandle { force_tx },
        }
    }

    #[allow(dead_code)] // Reserved for an admin ForceRefresh endpoint, not yet exposed over HTTP
    pub fn handle(&self) -> TokenRefresherHandle {
        self.handle.clone()
    }

    /// Spawns the refresh in the background and returns immediately; a
    /// second call for the same account while one is already running is a
    /// no-op, so the per-account in-flight set is the only thing guarding
    /// against duplicate refreshes started from this refresher.
    fn spawn_refresh(&self, account: Arc<dyn AccountProvider>) {
        let account_id = account.id().to_string();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(account_id.clone()) {
                debug!(account_id = %account_id, "Refresh already in flight, skipping");
                return;
            }
        }

        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            match account.get_credentials().await {
                Ok(_) => debug!(account_id = %account_id, "Refreshed OAuth token"),
                Err(e) => warn!(account_id = %account_id, error = %e, "Failed to refresh OAuth token"),
            }
            in_flight.lock().unwrap().remove(&account_id);
        });
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for account in &self.accounts {
                        if !account.is_available() {
                            continue;
                        }
                        let due = account
                            .token_expires_in()
                            .map(|remaining| remaining <= self.threshold)
                            .unwrap_or(false);
                        if due {
                            self.spawn_refresh(account.clone());
                        }
                    }
                }
                Some(account_id) = self.force_rx.recv() => {
                    if let Some(account) = self.accounts.iter().find(|a| a.id() == account_id) {
                        self.spawn_refresh(account.clone());
                    } else {
                        warn!(account_id = %account_id, "ForceRefresh requested for unknown or non-OAuth account");
                    }
                }
            }
        }
    }
}
