//! Cache Entry Types

use std::time::{Duration, Instant};

/// A cached value with its time-to-live.
///
/// Entries are replaced whole on write and never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[inline]
    pub fn into_value(self) -> V {
        self.value
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Expired once `ttl` has fully elapsed since creation.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.age())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_not_expired() {
        let entry = CacheEntry::new(42, Duration::from_secs(60));
        assert!(!entry.is_expired());
        assert_eq!(*entry.value(), 42);
        assert!(entry.remaining_ttl() <= Duration::from_secs(60));
    }

    #[test]
    fn test_entry_expired() {
        let entry = CacheEntry::new("v", Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_entry_clone_keeps_creation_time() {
        let entry = CacheEntry::new(String::from("x"), Duration::from_secs(1));
        let cloned = entry.clone();
        assert_eq!(entry.created_at(), cloned.created_at());
        assert_eq!(cloned.into_value(), "x");
    }
}
