use crate::db::{self, DbPool};
use parking_lot::RwLock;
use rand::Rng;
use relay_core::{generate_session_hash, AccountIndex, AccountProvider, Platform, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Splits a `"type,model"` model-address string into the forced account
/// type (if any) and the actual model name, e.g. `"bedrock,claude-3-5-sonnet"`
/// -> `(Some("bedrock"), "claude-3-5-sonnet")`. A model name with no comma
/// carries no type override.
fn parse_model_address(model: &str) -> (Option<&str>, &str) {
    match model.split_once(',') {
        Some((ty, actual)) if !ty.is_empty() => (Some(ty), actual),
        _ => (None, model),
    }
}

/// Applies the model-mapping and allowed-models eligibility rule to a single
/// candidate: a mapping with no matching source key disqualifies the
/// candidate outright; a non-empty allow-list requires a prefix match on the
/// (possibly remapped) model name.
fn model_eligible(account: &dyn AccountProvider, actual_model: &str) -> bool {
    let check_model = if let Some(mapping) = account.model_mapping() {
        let lower = actual_model.to_lowercase();
        match mapping
            .0
            .iter()
            .find(|(src, _)| lower.starts_with(&src.to_lowercase()))
        {
            Some((_, target)) => target.clone(),
            None => return false,
        }
    } else {
        actual_model.to_string()
    };

    match account.allowed_models() {
        Some(allowed) if !allowed.is_empty() => allowed
            .iter()
            .any(|entry| check_model.starts_with(entry.as_str())),
        _ => true,
    }
}

/// Picks one account from `candidates` with probability proportional to
/// `priority * weight`; falls back to a uniform pick when every share is
/// zero (e.g. an account reporting priority 0).
fn weighted_pick(candidates: &[Arc<dyn AccountProvider>]) -> Arc<dyn AccountProvider> {
    let shares: Vec<u64> = candidates
        .iter()
        .map(|a| a.priority() as u64 * a.weight() as u64)
        .collect();
    let total: u64 = shares.iter().sum();

    let mut rng = rand::thread_rng();

    if total == 0 {
        let idx = rng.gen_range(0..candidates.len());
        return candidates[idx].clone();
    }

    let mut roll = rng.gen_range(0..total);
    for (account, share) in candidates.iter().zip(shares.iter()) {
        if roll < *share {
            return account.clone();
        }
        roll -= share;
    }

    candidates[candidates.len() - 1].clone()
}

pub struct AccountCooldown {
    until: Instant,
    #[allow(dead_code)] // Reserved for future logging/debugging
    reason: String,
}

pub struct AccountUsage {
    last_used: Instant,
    request_count: u64,
}

pub struct UnifiedScheduler {
    accounts: Vec<Arc<dyn AccountProvider>>,
    index: RwLock<AccountIndex>,
    db_pool: DbPool,
    cooldowns: RwLock<HashMap<String, AccountCooldown>>,
    usage: RwLock<HashMap<String, AccountUsage>>,
    sticky_ttl: Duration,
    renewal_threshold: Duration,
    unavailable_cooldown: Duration,
}

impl UnifiedScheduler {
    pub fn new(
        accounts: Vec<Arc<dyn AccountProvider>>,
        sticky_ttl_secs: u64,
        renewal_threshold_secs: u64,
        unavailable_cooldown_secs: u64,
        db_pool: DbPool,
    ) -> Self {
        let index = RwLock::new(AccountIndex::new(accounts.clone()));
        Self {
            accounts,
            index,
            db_pool,
            cooldowns: RwLock::new(HashMap::new()),
            usage: RwLock::new(HashMap::new()),
            sticky_ttl: Duration::from_secs(sticky_ttl_secs),
            renewal_threshold: Duration::from_secs(renewal_threshold_secs),
            unavailable_cooldown: Duration::from_secs(unavailable_cooldown_secs),
        }
    }

    /// Rebuilds the platform/type-grouped account snapshot. Called after
    /// cooldown cleanup so a scheduled refresh is never more than a cleanup
    /// tick stale; cheap relative to the request path since it only touches
    /// the fixed account list, not per-request state.
    pub fn refresh_index(&self) {
        self.index.write().refresh();
    }

    pub fn mark_account_rate_limited(&self, account_id: &str, retry_after_secs: u64) {
        let mut cooldowns = self.cooldowns.write();
        let until = Instant::now() + Duration::from_secs(retry_after_secs);
        cooldowns.insert(
            account_id.to_string(),
            AccountCooldown {
                until,
                reason: "rate_limited".to_string(),
            },
        );
        info!(
            account_id = account_id,
            retry_after_secs = retry_after_secs,
            "Account marked as rate limited"
        );
    }

    pub fn mark_account_overloaded(&self, account_id: &str, minutes: u64) {
        let mut cooldowns = self.cooldowns.write();
        let until = Instant::now() + Duration::from_secs(minutes * 60);
        cooldowns.insert(
            account_id.to_string(),
            AccountCooldown {
                until,
                reason: "overloaded".to_string(),
            },
        );
        info!(
            account_id = account_id,
            minutes = minutes,
            "Account marked as overloaded"
        );
    }

    pub fn mark_account_unavailable(&self, account_id: &str, reason: &str) {
        let mut cooldowns = self.cooldowns.write();
        let until = Instant::now() + self.unavailable_cooldown;
        cooldowns.insert(
            account_id.to_string(),
            AccountCooldown {
                until,
                reason: reason.to_string(),
            },
        );
        warn!(
            account_id = account_id,
            reason = reason,
            cooldown_seconds = self.unavailable_cooldown.as_secs(),
            "Account marked as unavailable"
        );
    }

    fn is_account_in_cooldown(&self, account_id: &str) -> bool {
        let cooldowns = self.cooldowns.read();
        if let Some(cooldown) = cooldowns.get(account_id) {
            if Instant::now() < cooldown.until {
                return true;
            }
        }
        false
    }

    fn record_account_used(&self, account_id: &str) {
        let mut usage = self.usage.write();
        let entry = usage.entry(account_id.to_string()).or_insert(AccountUsage {
            last_used: Instant::now(),
            request_count: 0,
        });
        entry.last_used = Instant::now();
        entry.request_count += 1;
    }

    pub async fn select_account(
        &self,
        platform: Platform,
        request_body: &serde_json::Value,
    ) -> Result<Arc<dyn AccountProvider>> {
        self.select_account_excluding(platform, request_body, &HashSet::new(), None)
            .await
    }

    pub async fn select_account_excluding(
        &self,
        platform: Platform,
        request_body: &serde_json::Value,
        excluded: &HashSet<String>,
        session_id_header: Option<&str>,
    ) -> Result<Arc<dyn AccountProvider>> {
        let session_hash = generate_session_hash(request_body, session_id_header);

        if let Some(ref hash) = session_hash {
            if let Some(account) = self.get_sticky_account(hash, platform, excluded).await {
                debug!(session_hash = %hash, account_id = account.id(), "Using sticky session account");
                self.record_account_used(account.id());
                return Ok(account);
            }
        }

        let requested_model = request_body.get("model").and_then(|v| v.as_str());
        let account = self.select_available_account(platform, requested_model, excluded)?;

        if let Some(hash) = session_hash {
            self.set_sticky_session(&hash, account.id()).await;
            debug!(session_hash = %hash, account_id = account.id(), "Created new sticky session");
        }

        info!(
            account_id = account.id(),
            account_name = account.name(),
            priority = account.priority(),
            platform = ?platform,
            "Selected account for request"
        );

        self.record_account_used(account.id());
        Ok(account)
    }

    async fn get_sticky_account(
        &self,
        session_hash: &str,
        platform: Platform,
        excluded: &HashSet<String>,
    ) -> Option<Arc<dyn AccountProvider>> {
        // Query database for sticky session
        let session = match db::get_sticky_session(&self.db_pool, session_hash).await {
            Ok(Some(s)) => s,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, session_hash = %session_hash, "Failed to get sticky session");
                return None;
            }
        };

        let (account_id, remaining_secs) = session;

        // Check if account is excluded or in cooldown
        if excluded.contains(&account_id) {
            return None;
        }
        if self.is_account_in_cooldown(&account_id) {
            return None;
        }

        // Find the account
        let account = self.accounts.iter().find(|a| {
            a.id() == account_id && a.platform() == platform && a.is_available()
        })?;

        // Smart renewal: only renew if remaining time < threshold
        if remaining_secs < self.renewal_threshold.as_secs() as i64 {
            let ttl = self.sticky_ttl.as_secs() as i64;
            if let Err(e) =
                db::upsert_sticky_session(&self.db_pool, session_hash, &account_id, ttl).await
            {
                warn!(error = %e, session_hash = %session_hash, "Failed to renew sticky session");
            } else {
                debug!(session_hash = %session_hash, "Renewed sticky session");
            }
        }

        Some(account.clone())
    }

    async fn set_sticky_session(&self, session_hash: &str, account_id: &str) {
        let ttl = self.sticky_ttl.as_secs() as i64;
        if let Err(e) =
            db::upsert_sticky_session(&self.db_pool, session_hash, account_id, ttl).await
        {
            warn!(error = %e, session_hash = %session_hash, "Failed to set sticky session");
        }
    }

    /// Resolves the candidate set named by the request's model address
    /// (`"type,model"` forcing an account type/family, plain model deriving
    /// candidates from `platform`), applies the model-mapping/allowed-models
    /// eligibility filter, then picks among what's left with probability
    /// proportional to `priority * weight`. Falls back to a uniform pick
    /// across all candidates when every share is zero.
    fn select_available_account(
        &self,
        platform: Platform,
        requested_model: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<Arc<dyn AccountProvider>> {
        let (requested_type, actual_model) = match requested_model {
            Some(model) => parse_model_address(model),
            None => (None, ""),
        };

        let resolve = |index: &AccountIndex| -> Vec<Arc<dyn AccountProvider>> {
            match requested_type {
                Some(ty) if ty.contains('-') => index.by_type(ty).to_vec(),
                // No hyphen: the caller named a variant family (e.g. "bedrock"
                // in "claude-bedrock") rather than a full account_type string.
                Some(ty) => index
                    .all()
                    .iter()
                    .filter(|a| a.account_type().split('-').any(|part| part == ty))
                    .cloned()
                    .collect(),
                None => index.by_platform(platform).to_vec(),
            }
        };

        let mut candidates = resolve(&self.index.read());

        if candidates.is_empty() && requested_type.is_some() {
            self.refresh_index();
            candidates = resolve(&self.index.read());
        }

        let available: Vec<_> = candidates
            .into_iter()
            .filter(|a| {
                a.is_available()
                    && !excluded.contains(a.id())
                    && !self.is_account_in_cooldown(a.id())
                    && (actual_model.is_empty() || model_eligible(a.as_ref(), actual_model))
                    // Accounts requiring an explicit type (e.g. the OpenAI Responses /
                    // Codex family) are never picked up implicitly by a bare platform lookup.
                    && (requested_type.is_some() || a.account_type() != "openai-responses")
            })
            .collect();

        if available.is_empty() {
            warn!(platform = ?platform, "No available accounts for platform");
            return Err(relay_core::RelayError::NoAccount(platform));
        }

        Ok(weighted_pick(&available))
    }

    pub fn cleanup_expired_cooldowns(&self) {
        let now = Instant::now();
        let mut cooldowns = self.cooldowns.write();
        let before = cooldowns.len();
        cooldowns.retain(|_, cooldown| now < cooldown.until);
        let removed = before - cooldowns.len();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired account cooldowns");
        }
        drop(cooldowns);
        self.refresh_index();
    }

    #[allow(dead_code)] // Reserved for admin API
    pub fn get_accounts_by_platform(&self, platform: Platform) -> Vec<Arc<dyn AccountProvider>> {
        self.accounts
            .iter()
            .filter(|a| a.platform() == platform)
            .cloned()
            .collect()
    }

    #[allow(dead_code)] // Reserved for admin API
    pub fn get_all_accounts(&self) -> &[Arc<dyn AccountProvider>] {
        &self.accounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{Credentials, ProxyConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockAccount {
        id: String,
        name: String,
        platform: Platform,
        priority: u32,
        available: AtomicBool,
        account_type: String,
    }

    impl MockAccount {
        fn new(id: &str, platform: Platform, priority: u32) -> Self {
            Self {
                id: id.to_string(),
                name: format!("Mock {}", id),
                platform,
                priority,
                available: AtomicBool::new(true),
                account_type: "default".to_string(),
            }
        }

        fn with_type(mut self, account_type: &str) -> Self {
            self.account_type = account_type.to_string();
            self
        }
    }

    #[async_trait]
    impl AccountProvider for MockAccount {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn platform(&self) -> Platform {
            self.platform
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn get_credentials(&self) -> relay_core::Result<Credentials> {
            Ok(Credentials::ApiKey("test-key".to_string()))
        }

        fn proxy_config(&self) -> Option<&ProxyConfig> {
            None
        }

        fn mark_unavailable(&self, _duration: Duration, _reason: &str) {
            self.available.store(false, Ordering::SeqCst);
        }

        fn mark_available(&self) {
            self.available.store(true, Ordering::SeqCst);
        }

        fn account_type(&self) -> &str {
            &self.account_type
        }
    }

    async fn setup_test_db() -> DbPool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let path_str = path.to_str().unwrap().to_string();
        std::mem::forget(dir);
        db::init_database(&path_str).await.unwrap()
    }

    async fn setup_scheduler() -> (UnifiedScheduler, DbPool) {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> = vec![
            Arc::new(MockAccount::new("acc1", Platform::Claude, 100)),
            Arc::new(MockAccount::new("acc2", Platform::Claude, 50)),
        ];
        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool.clone());
        (scheduler, pool)
    }

    // ========================================================================
    // Existing tests (adapted)
    // ========================================================================

    #[tokio::test]
    async fn test_scheduler_creation_with_custom_cooldown() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> =
            vec![Arc::new(MockAccount::new("test-1", Platform::Claude, 100))];

        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 1800, pool);

        assert_eq!(scheduler.sticky_ttl, Duration::from_secs(3600));
        assert_eq!(scheduler.renewal_threshold, Duration::from_secs(300));
        assert_eq!(scheduler.unavailable_cooldown, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_mark_account_unavailable_uses_configured_cooldown() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> =
            vec![Arc::new(MockAccount::new("test-1", Platform::Claude, 100))];

        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 5, pool);

        scheduler.mark_account_unavailable("test-1", "test_reason");

        assert!(scheduler.is_account_in_cooldown("test-1"));

        let cooldowns = scheduler.cooldowns.read();
        let cooldown = cooldowns.get("test-1").unwrap();
        let remaining = cooldown.until.duration_since(Instant::now());
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_mark_account_rate_limited() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> =
            vec![Arc::new(MockAccount::new("test-1", Platform::Claude, 100))];

        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);

        scheduler.mark_account_rate_limited("test-1", 60);

        assert!(scheduler.is_account_in_cooldown("test-1"));

        let cooldowns = scheduler.cooldowns.read();
        let cooldown = cooldowns.get("test-1").unwrap();
        assert_eq!(cooldown.reason, "rate_limited");
    }

    #[tokio::test]
    async fn test_mark_account_overloaded() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> =
            vec![Arc::new(MockAccount::new("test-1", Platform::Claude, 100))];

        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);

        scheduler.mark_account_overloaded("test-1", 5);

        assert!(scheduler.is_account_in_cooldown("test-1"));

        let cooldowns = scheduler.cooldowns.read();
        let cooldown = cooldowns.get("test-1").unwrap();
        assert_eq!(cooldown.reason, "overloaded");
    }

    #[tokio::test]
    async fn test_cooldown_cleanup() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> =
            vec![Arc::new(MockAccount::new("test-1", Platform::Claude, 100))];

        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 0, pool);

        scheduler.mark_account_unavailable("test-1", "test_reason");

        std::thread::sleep(Duration::from_millis(10));

        scheduler.cleanup_expired_cooldowns();

        let cooldowns = scheduler.cooldowns.read();
        assert!(cooldowns.is_empty());
    }

    #[tokio::test]
    async fn test_account_not_selected_during_cooldown() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> = vec![
            Arc::new(MockAccount::new("test-1", Platform::Claude, 100)),
            Arc::new(MockAccount::new("test-2", Platform::Claude, 50)),
        ];

        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);

        scheduler.mark_account_unavailable("test-1", "test_reason");

        let request_body = serde_json::json!({});
        let selected = scheduler
            .select_account(Platform::Claude, &request_body)
            .await
            .unwrap();

        assert_eq!(selected.id(), "test-2");
    }

    // ========================================================================
    // New database integration tests
    // ========================================================================

    #[tokio::test]
    async fn test_sticky_session_persisted_to_db() {
        let (scheduler, pool) = setup_scheduler().await;
        let body = serde_json::json!({"system": "test system prompt"});

        // First selection creates sticky session
        let account1 = scheduler
            .select_account(Platform::Claude, &body)
            .await
            .unwrap();

        // Verify session persisted to database
        let session_hash = generate_session_hash(&body, None).unwrap();
        let db_session = db::get_sticky_session(&pool, &session_hash).await.unwrap();
        assert!(db_session.is_some());
        assert_eq!(db_session.unwrap().0, account1.id());
    }

    #[tokio::test]
    async fn test_sticky_session_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let path_str = path.to_str().unwrap().to_string();
        std::mem::forget(dir);

        let body = serde_json::json!({"system": "test"});

        // First "run"
        let first_account_id = {
            let pool = db::init_database(&path_str).await.unwrap();
            let accounts: Vec<Arc<dyn AccountProvider>> =
                vec![Arc::new(MockAccount::new("acc1", Platform::Claude, 100))];
            let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);
            let account = scheduler
                .select_account(Platform::Claude, &body)
                .await
                .unwrap();
            account.id().to_string()
        };

        // Simulate restart with new scheduler, same database
        let pool = db::init_database(&path_str).await.unwrap();
        let accounts: Vec<Arc<dyn AccountProvider>> = vec![
            Arc::new(MockAccount::new("acc1", Platform::Claude, 100)),
            Arc::new(MockAccount::new("acc2", Platform::Claude, 50)),
        ];
        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);

        // Should return same account (restored from database)
        let account = scheduler
            .select_account(Platform::Claude, &body)
            .await
            .unwrap();
        assert_eq!(account.id(), first_account_id);
    }

    #[tokio::test]
    async fn test_smart_renewal() {
        let (scheduler, pool) = setup_scheduler().await;
        let body = serde_json::json!({"system": "test"});
        let session_hash = generate_session_hash(&body, None).unwrap();

        // Insert a session about to expire (100 seconds remaining, threshold is 300)
        db::upsert_sticky_session(&pool, &session_hash, "acc1", 100)
            .await
            .unwrap();

        // Select account should trigger renewal
        scheduler
            .select_account(Platform::Claude, &body)
            .await
            .unwrap();

        // Verify renewed (new remaining time should be ~3600)
        let session = db::get_sticky_session(&pool, &session_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(
            session.1 > 3500,
            "Session should be renewed, got {} seconds",
            session.1
        );
    }

    #[tokio::test]
    async fn test_no_renewal_when_not_needed() {
        let (scheduler, pool) = setup_scheduler().await;
        let body = serde_json::json!({"system": "test"});
        let session_hash = generate_session_hash(&body, None).unwrap();

        // Insert a session with plenty of time (3000 seconds, threshold is 300)
        db::upsert_sticky_session(&pool, &session_hash, "acc1", 3000)
            .await
            .unwrap();

        // Select account should NOT trigger renewal
        scheduler
            .select_account(Platform::Claude, &body)
            .await
            .unwrap();

        // Verify NOT renewed (remaining time should still be ~3000, not ~3600)
        let session = db::get_sticky_session(&pool, &session_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(
            session.1 < 3100 && session.1 > 2900,
            "Session should NOT be renewed, got {} seconds",
            session.1
        );
    }

    // ========================================================================
    // Model addressing / AccountIndex
    // ========================================================================

    #[test]
    fn parses_type_and_model_from_comma_address() {
        let (ty, model) = parse_model_address("bedrock,claude-3-5-sonnet");
        assert_eq!(ty, Some("bedrock"));
        assert_eq!(model, "claude-3-5-sonnet");
    }

    #[test]
    fn plain_model_carries_no_type_override() {
        let (ty, model) = parse_model_address("claude-3-5-sonnet");
        assert_eq!(ty, None);
        assert_eq!(model, "claude-3-5-sonnet");
    }

    #[tokio::test]
    async fn model_address_narrows_candidates_to_matching_account_type() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> = vec![
            Arc::new(MockAccount::new("oauth-1", Platform::Claude, 100).with_type("claude-oauth")),
            Arc::new(MockAccount::new("bedrock-1", Platform::Claude, 100).with_type("claude-bedrock")),
        ];
        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);

        let body = serde_json::json!({"model": "bedrock,claude-3-5-sonnet"});
        let selected = scheduler
            .select_account(Platform::Claude, &body)
            .await
            .unwrap();

        assert_eq!(selected.id(), "bedrock-1");
    }

    #[tokio::test]
    async fn unmatched_model_address_yields_no_account() {
        let pool = setup_test_db().await;
        let accounts: Vec<Arc<dyn AccountProvider>> =
            vec![Arc::new(MockAccount::new("oauth-1", Platform::Claude, 100).with_type("claude-oauth"))];
        let scheduler = UnifiedScheduler::new(accounts, 3600, 300, 3600, pool);

        let body = serde_json::json!({"model": "bedrock,claude-3-5-sonnet"});
        let result = scheduler.select_account(Platform::Claude, &body).await;

        assert!(result.is_err());
    }
}
