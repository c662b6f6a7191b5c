//! Exclusive, sticky leasing of login credentials.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::wire::UserIdentity;

/// Pool of configured credentials. At most one downloader holds a given
/// identity at any instant; a downloader asking twice gets the same pair
/// back. When the idle set runs dry it is refilled from the configured
/// list, so identities are shared over time but never simultaneously.
#[derive(Debug)]
pub struct IdentityPool {
    configured: Vec<UserIdentity>,
    idle: VecDeque<UserIdentity>,
    assigned: HashMap<String, UserIdentity>,
}

impl IdentityPool {
    #[must_use]
    pub fn new(configured: Vec<UserIdentity>) -> Self {
        let idle = configured.iter().cloned().collect();
        Self {
            configured,
            idle,
            assigned: HashMap::new(),
        }
    }

    /// Lease an identity to `downloader`. Idempotent for a holder; refills
    /// the idle set from configuration when it runs dry. Returns `None`
    /// only when no identities are configured at all.
    pub fn request(&mut self, downloader: &str) -> Option<UserIdentity> {
        if let Some(held) = self.assigned.get(downloader) {
            return Some(held.clone());
        }
        if self.idle.is_empty() {
            if self.configured.is_empty() {
                return None;
            }
            debug!("identity pool empty, refilling from configuration");
            self.idle.extend(self.configured.iter().cloned());
        }
        let identity = self.idle.pop_front()?;
        self.assigned
            .insert(downloader.to_string(), identity.clone());
        Some(identity)
    }

    /// Give an identity back. Fails when `downloader` does not hold
    /// exactly this identity.
    pub fn resign(&mut self, identity: &UserIdentity, downloader: &str) -> bool {
        match self.assigned.get(downloader) {
            Some(held) if held == identity => {
                self.assigned.remove(downloader);
                self.idle.push_back(identity.clone());
                true
            }
            _ => false,
        }
    }

    /// Reclaim whatever `downloader` held. Called on unregister.
    pub fn reclaim(&mut self, downloader: &str) {
        if let Some(identity) = self.assigned.remove(downloader) {
            debug!("reclaimed identity {} from {downloader}", identity.name);
            self.idle.push_back(identity);
        }
    }

    /// The identity currently held by `downloader`, if any.
    #[must_use]
    pub fn held_by(&self, downloader: &str) -> Option<&UserIdentity> {
        self.assigned.get(downloader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(names: &[&str]) -> IdentityPool {
        IdentityPool::new(
            names
                .iter()
                .map(|n| UserIdentity::new(*n, format!("{n}-pwd")))
                .collect(),
        )
    }

    #[test]
    fn leases_are_exclusive_until_resigned() {
        let mut pool = pool_of(&["a", "b"]);

        let w0 = pool.request("w0").unwrap();
        let w1 = pool.request("w1").unwrap();
        assert_ne!(w0, w1);

        // Sticky: asking again returns the held pair.
        assert_eq!(pool.request("w0").unwrap(), w0);

        // Pool is empty, so a third worker triggers a refill and may share
        // a credential over time with w0 or w1.
        let w2 = pool.request("w2").unwrap();
        assert!(w2 == w0 || w2 == w1);
    }

    #[test]
    fn resign_requires_ownership() {
        let mut pool = pool_of(&["a"]);
        let held = pool.request("w0").unwrap();

        assert!(!pool.resign(&held, "w1"));
        assert!(!pool.resign(&UserIdentity::new("x", "y"), "w0"));
        assert!(pool.resign(&held, "w0"));

        // Second resign of the same pair fails: nothing is held anymore.
        assert!(!pool.resign(&held, "w0"));
    }

    #[test]
    fn reclaim_returns_identity_to_idle() {
        let mut pool = pool_of(&["a"]);
        let held = pool.request("w0").unwrap();
        pool.reclaim("w0");
        assert!(pool.held_by("w0").is_none());

        // The reclaimed pair is eligible for the next requester without a
        // refill.
        assert_eq!(pool.request("w1").unwrap(), held);
    }

    #[test]
    fn empty_configuration_yields_none() {
        let mut pool = IdentityPool::new(Vec::new());
        assert!(pool.request("w0").is_none());
    }
}
