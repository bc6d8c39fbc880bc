use std::collections::HashMap;
use std::sync::RwLock;

/// Non-blocking admission counters keyed by an arbitrary id (account id or
/// tenant/api-key hash). `acquire` returns `false` instead of waiting when
/// the configured limit is already held, so callers can fail fast and try
/// another account rather than queue.
pub struct ConcurrencyGate {
    limits: RwLock<HashMap<String, u32>>,
    default_limit: Option<u32>,
    inflight: RwLock<HashMap<String, u32>>,
}

impl ConcurrencyGate {
    pub fn new(limits: HashMap<String, u32>) -> Self {
        Self {
            limits: RwLock::new(limits),
            default_limit: None,
            inflight: RwLock::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// A gate where every key not explicitly configured falls back to
    /// `default_limit` instead of being admitted unconditionally. Used for
    /// per-tenant admission, where keys (tenant api-key hashes) are not
    /// known ahead of time.
    pub fn with_default_limit(default_limit: u32) -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            default_limit: Some(default_limit),
            inflight: RwLock::new(HashMap::new()),
        }
    }

    /// Attempts to reserve one slot for `key`. Keys with no configured
    /// limit and no default are always admitted.
    pub fn acquire(&self, key: &str) -> bool {
        let limit = match self.limits.read().unwrap().get(key).copied() {
            Some(limit) => limit,
            None => match self.default_limit {
                Some(limit) => limit,
                None => return true,
            },
        };

        let mut inflight = self.inflight.write().unwrap();
        let current = inflight.get(key).copied().unwrap_or(0);
        if current >= limit {
            return false;
        }
        inflight.insert(key.to_string(), current + 1);
        true
    }

    pub fn release(&self, key: &str) {
        let mut inflight = self.inflight.write().unwrap();
        if let Some(count) = inflight.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn in_flight(&self, key: &str) -> u32 {
        self.inflight.read().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn set_limit(&self, key: String, limit: u32) {
        self.limits.write().unwrap().insert(key, limit);
    }

    pub fn reset(&self) {
        self.inflight.write().unwrap().clear();
    }
}

/// RAII guard releasing a [`ConcurrencyGate`] slot when dropped, so a
/// request that errors or panics mid-flight doesn't leak admission.
pub struct ConcurrencyPermit<'a> {
    gate: &'a ConcurrencyGate,
    key: String,
}

impl<'a> ConcurrencyPermit<'a> {
    pub fn try_acquire(gate: &'a ConcurrencyGate, key: &str) -> Option<Self> {
        if gate.acquire(key) {
            Some(Self {
                gate,
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for ConcurrencyPermit<'_> {
    fn drop(&mut self) {
        self.gate.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_key_is_unconditionally_admitted() {
        let gate = ConcurrencyGate::empty();
        for _ in 0..10 {
            assert!(gate.acquire("tenant-a"));
        }
    }

    #[test]
    fn default_limit_caps_unconfigured_keys() {
        let gate = ConcurrencyGate::with_default_limit(2);
        assert!(gate.acquire("tenant-a"));
        assert!(gate.acquire("tenant-a"));
        assert!(!gate.acquire("tenant-a"));
        assert_eq!(gate.in_flight("tenant-a"), 2);
    }

    #[test]
    fn release_frees_a_slot() {
        let gate = ConcurrencyGate::with_default_limit(1);
        assert!(gate.acquire("acc-1"));
        assert!(!gate.acquire("acc-1"));
        gate.release("acc-1");
        assert!(gate.acquire("acc-1"));
    }

    #[test]
    fn permit_releases_on_drop() {
        let gate = ConcurrencyGate::with_default_limit(1);
        {
            let _permit = ConcurrencyPermit::try_acquire(&gate, "acc-1").unwrap();
            assert!(ConcurrencyPermit::try_acquire(&gate, "acc-1").is_none());
        }
        assert!(ConcurrencyPermit::try_acquire(&gate, "acc-1").is_some());
    }

    #[test]
    fn explicit_limit_overrides_default() {
        let gate = ConcurrencyGate::with_default_limit(1);
        gate.set_limit("acc-1".to_string(), 3);
        assert!(gate.acquire("acc-1"));
        assert!(gate.acquire("acc-1"));
        assert!(gate.acquire("acc-1"));
        assert!(!gate.acquire("acc-1"));
    }
}
