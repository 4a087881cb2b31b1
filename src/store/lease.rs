//! Lease-based single-flight lock, keyed by incident id.
//!
//! The orchestrator must hold a live lease to mutate an incident. Leases
//! expire on their own, so a crashed holder never wedges the incident: a
//! later acquire simply reclaims the expired entry.

use crate::error::PipelineError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Proof of lease ownership. Renew/release calls with a stale token (the
/// lease expired and someone else reacquired) are rejected.
#[derive(Debug, Clone)]
pub struct LeaseToken {
    pub incident_id: String,
    id: u64,
}

struct LeaseEntry {
    id: u64,
    expires_at: Instant,
}

#[derive(Clone, Default)]
pub struct LeaseMap {
    inner: Arc<Mutex<HashMap<String, LeaseEntry>>>,
    counter: Arc<AtomicU64>,
}

impl LeaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the single-flight lease for an incident, or `LockBusy` if a
    /// live lease already exists.
    pub fn acquire(&self, incident_id: &str, ttl: Duration) -> Result<LeaseToken, PipelineError> {
        let mut map = self.inner.lock().expect("lease map poisoned");
        let now = Instant::now();
        if let Some(entry) = map.get(incident_id) {
            if entry.expires_at > now {
                return Err(PipelineError::LockBusy(incident_id.to_string()));
            }
        }
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        map.insert(incident_id.to_string(), LeaseEntry { id, expires_at: now + ttl });
        Ok(LeaseToken { incident_id: incident_id.to_string(), id })
    }

    /// Extend a held lease. Returns false if the token no longer owns it.
    pub fn renew(&self, token: &LeaseToken, ttl: Duration) -> bool {
        let mut map = self.inner.lock().expect("lease map poisoned");
        match map.get_mut(&token.incident_id) {
            Some(entry) if entry.id == token.id => {
                entry.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        }
    }

    /// Release unconditionally drops the entry if the token still owns it.
    pub fn release(&self, token: &LeaseToken) {
        let mut map = self.inner.lock().expect("lease map poisoned");
        if map.get(&token.incident_id).map(|e| e.id) == Some(token.id) {
            map.remove(&token.incident_id);
        }
    }

    /// True while the token still owns a live lease. False once the lease
    /// expired or another holder reacquired it; the caller must stop
    /// mutating the incident at that point.
    pub fn is_held(&self, token: &LeaseToken) -> bool {
        let map = self.inner.lock().expect("lease map poisoned");
        map.get(&token.incident_id)
            .map(|e| e.id == token.id && e.expires_at > Instant::now())
            .unwrap_or(false)
    }

    pub fn is_locked(&self, incident_id: &str) -> bool {
        let map = self.inner.lock().expect("lease map poisoned");
        map.get(incident_id)
            .map(|e| e.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_while_lease_live() {
        let leases = LeaseMap::new();
        let token = leases.acquire("inc-1", Duration::from_secs(30)).unwrap();
        assert!(matches!(
            leases.acquire("inc-1", Duration::from_secs(30)),
            Err(PipelineError::LockBusy(_))
        ));
        leases.release(&token);
        assert!(leases.acquire("inc-1", Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn leases_are_per_incident() {
        let leases = LeaseMap::new();
        let _a = leases.acquire("inc-1", Duration::from_secs(30)).unwrap();
        assert!(leases.acquire("inc-2", Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let leases = LeaseMap::new();
        let stale = leases.acquire("inc-1", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let fresh = leases.acquire("inc-1", Duration::from_secs(30)).unwrap();
        // The stale token lost ownership: renew and release must not touch
        // the new holder's lease.
        assert!(!leases.renew(&stale, Duration::from_secs(30)));
        leases.release(&stale);
        assert!(leases.is_locked("inc-1"));
        leases.release(&fresh);
        assert!(!leases.is_locked("inc-1"));
    }

    #[test]
    fn is_held_tracks_expiry_and_takeover() {
        let leases = LeaseMap::new();
        let stale = leases.acquire("inc-1", Duration::from_millis(5)).unwrap();
        assert!(leases.is_held(&stale));
        std::thread::sleep(Duration::from_millis(15));
        // Expired but not yet reacquired: still not held.
        assert!(!leases.is_held(&stale));

        let fresh = leases.acquire("inc-1", Duration::from_secs(30)).unwrap();
        assert!(!leases.is_held(&stale));
        assert!(leases.is_held(&fresh));
    }

    #[test]
    fn renew_extends_the_ttl() {
        let leases = LeaseMap::new();
        let token = leases.acquire("inc-1", Duration::from_millis(20)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(leases.renew(&token, Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        // Without the renewal this would have expired by now.
        assert!(leases.is_locked("inc-1"));
    }
}
