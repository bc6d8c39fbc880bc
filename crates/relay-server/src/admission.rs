use relay_core::ConcurrencyGate;
use std::sync::Arc;

/// Owned counterpart to `relay_core::ConcurrencyPermit` — ties the slot to
/// an `Arc<ConcurrencyGate>` rather than a borrow, so it can be moved into
/// a spawned task that outlives the handler holding the route state.
pub struct TenantPermit {
    gate: Arc<ConcurrencyGate>,
    key: String,
}

impl TenantPermit {
    pub fn try_acquire(gate: Arc<ConcurrencyGate>, key: &str) -> Option<Self> {
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

impl Drop for TenantPermit {
    fn drop(&mut self) {
        self.gate.release(&self.key);
    }
}
