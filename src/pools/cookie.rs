//! Cycling dispensation of session cookies.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::wire::Cookie;

/// Cookies arrive in batches from the external login tool and are handed
/// out one at a time. When the idle set empties it is refilled from the
/// by-user map, so a cookie may serve many downloaders over time. The
/// sentinel pair is returned only while the map itself is empty.
#[derive(Debug, Default)]
pub struct CookiePool {
    idle: VecDeque<Cookie>,
    by_user: HashMap<String, Cookie>,
}

impl CookiePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispense one cookie, cycling through the by-user map on exhaustion.
    pub fn request(&mut self) -> Cookie {
        if let Some(cookie) = self.idle.pop_front() {
            return cookie;
        }
        if self.by_user.is_empty() {
            return Cookie::sentinel();
        }
        debug!(
            "cookie idle set empty, refilling {} from the by-user map",
            self.by_user.len()
        );
        self.idle.extend(self.by_user.values().cloned());
        self.idle.pop_front().unwrap_or_else(Cookie::sentinel)
    }

    /// Replace the idle set with `batch` and fold it into the by-user map,
    /// last write per user winning.
    pub fn submit(&mut self, batch: Vec<Cookie>) {
        self.idle = batch.iter().cloned().collect();
        for cookie in batch {
            self.by_user.insert(cookie.user.clone(), cookie);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_until_first_submit() {
        let mut pool = CookiePool::new();
        assert!(pool.request().is_sentinel());

        pool.submit(vec![Cookie::new("u1", "c1")]);
        assert!(!pool.request().is_sentinel());
    }

    #[test]
    fn cookies_cycle_through_the_map() {
        let mut pool = CookiePool::new();
        pool.submit(vec![Cookie::new("u1", "c1"), Cookie::new("u2", "c2")]);

        let first = pool.request();
        let second = pool.request();
        assert_ne!(first.user, second.user);

        // Idle exhausted; the third request refills from the map.
        let third = pool.request();
        assert!(third.user == "u1" || third.user == "u2");
        assert!(!third.is_sentinel());
    }

    #[test]
    fn resubmission_wins_per_user() {
        let mut pool = CookiePool::new();
        pool.submit(vec![Cookie::new("u1", "old")]);
        pool.submit(vec![Cookie::new("u1", "new")]);

        assert_eq!(pool.request().cookie, "new");
        // Refill path sees the updated value too.
        assert_eq!(pool.request().cookie, "new");
    }
}
