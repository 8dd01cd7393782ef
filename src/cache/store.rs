//! TTL calculation cache
//!
//! Concurrent map from [`CacheKey`] to a cloned value. Expiry is lazy: an
//! expired entry is evicted by the lookup that finds it (counted as a miss)
//! or by [`CalculationCache::purge_expired`].
//!
//! Invalidations also bump generation counters (per student, per academic
//! year, and a global epoch). A computation snapshots the [`Generation`] of
//! its key before reading its inputs and stores through
//! [`CalculationCache::set_if_current`], so a result read before a write
//! cannot land after the invalidation that write triggered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::metrics::{CacheMetrics, CacheStats};
use super::CacheConfig;
use crate::domain::{AcademicYearId, StudentId};

/// Invalidation counters observed for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    student: u64,
    academic_year: u64,
}

/// In-memory TTL cache for calculation results.
pub struct CalculationCache<V> {
    entries: DashMap<CacheKey, CacheEntry<V>>,
    config: CacheConfig,
    metrics: CacheMetrics,
    /// Bumped by clears and predicate/key invalidations
    epoch: AtomicU64,
    student_generations: DashMap<StudentId, u64>,
    year_generations: DashMap<AcademicYearId, u64>,
    /// Conditional writes hold it shared, generation bumps exclusively
    write_gate: RwLock<()>,
}

impl<V: Clone> CalculationCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            metrics: CacheMetrics::new(),
            epoch: AtomicU64::new(0),
            student_generations: DashMap::new(),
            year_generations: DashMap::new(),
            write_gate: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if !self.config.enabled {
            self.metrics.record_miss();
            return None;
        }

        // The map guard is released before an expired entry is removed.
        let lookup = self.entries.get(key).map(|guard| {
            let entry: &CacheEntry<V> = guard.value();
            (!entry.is_expired()).then(|| entry.value().clone())
        });

        match lookup {
            Some(Some(value)) => {
                self.metrics.record_hit();
                trace!(key = %key, "cache hit");
                Some(value)
            }
            Some(None) => {
                if self.entries.remove_if(key, |_, e| e.is_expired()).is_some() {
                    self.metrics.record_expirations(1);
                }
                self.metrics.record_miss();
                debug!(key = %key, "cache entry expired");
                None
            }
            None => {
                self.metrics.record_miss();
                trace!(key = %key, "cache miss");
                None
            }
        }
    }

    /// Store a value with the configured default TTL.
    pub fn set(&self, key: CacheKey, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Store a value, replacing any previous entry for the key.
    pub fn set_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "cache set");
        self.entries.insert(key, CacheEntry::new(value, ttl));
        self.metrics.record_write();
    }

    /// Snapshot the invalidation counters that cover `key`.
    pub fn generation(&self, key: &CacheKey) -> Generation {
        let student = key
            .student_id()
            .and_then(|id| self.student_generations.get(id).map(|g| *g))
            .unwrap_or(0);
        let academic_year = key
            .academic_year_id()
            .and_then(|id| self.year_generations.get(id).map(|g| *g))
            .unwrap_or(0);

        Generation {
            epoch: self.epoch.load(Ordering::Acquire),
            student,
            academic_year,
        }
    }

    /// Store a value computed from inputs read at `generation`.
    ///
    /// Returns `false` without writing when an invalidation covering the
    /// key happened since the snapshot was taken.
    pub fn set_if_current(&self, key: CacheKey, value: V, generation: Generation) -> bool {
        if !self.config.enabled {
            return false;
        }

        let _gate = self.write_gate.read();
        if self.generation(&key) != generation {
            debug!(key = %key, "discarding result computed before an invalidation");
            return false;
        }
        self.set(key, value);
        true
    }

    /// Drop every entry whose parameters reference `student_id`.
    pub fn invalidate_student(&self, student_id: &StudentId) -> usize {
        {
            let _gate = self.write_gate.write();
            *self
                .student_generations
                .entry(student_id.clone())
                .or_insert(0) += 1;
        }
        let removed = self.remove_where(|key| key.references_student(student_id));
        debug!(student_id = %student_id, removed, "invalidated student cache entries");
        removed
    }

    /// Drop every entry whose parameters reference `academic_year_id`.
    pub fn invalidate_academic_year(&self, academic_year_id: &AcademicYearId) -> usize {
        {
            let _gate = self.write_gate.write();
            *self
                .year_generations
                .entry(academic_year_id.clone())
                .or_insert(0) += 1;
        }
        let removed = self.remove_where(|key| key.references_academic_year(academic_year_id));
        debug!(
            academic_year_id = %academic_year_id,
            removed,
            "invalidated academic year cache entries"
        );
        removed
    }

    /// Drop a single entry.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        self.bump_epoch();
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.metrics.record_invalidations(1);
        }
        removed
    }

    /// Drop every entry whose key matches `predicate`.
    ///
    /// The predicate cannot be mapped to a scope, so every in-flight
    /// conditional write is discarded.
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        self.bump_epoch();
        self.remove_where(predicate)
    }

    fn bump_epoch(&self) {
        let _gate = self.write_gate.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            if predicate(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        self.metrics.record_invalidations(removed);
        removed
    }

    /// Drop everything.
    pub fn clear(&self) -> usize {
        self.bump_epoch();
        let removed = self.entries.len();
        self.entries.clear();
        self.metrics.record_invalidations(removed);
        removed
    }

    /// Evict expired entries.
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0usize;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                purged += 1;
                false
            } else {
                true
            }
        });
        if purged > 0 {
            self.metrics.record_expirations(purged);
            debug!(purged, "purged expired cache entries");
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let mut live = 0usize;
        let mut expired = 0usize;
        for entry in self.entries.iter() {
            if entry.is_expired() {
                expired += 1;
            } else {
                live += 1;
            }
        }

        CacheStats {
            hits: self.metrics.hits(),
            misses: self.metrics.misses(),
            hit_rate: self.metrics.hit_rate(),
            entry_count: live,
            expired_entries: expired,
            writes: self.metrics.writes(),
            invalidations: self.metrics.invalidations(),
        }
    }

    /// Zero counters; entries are untouched.
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for CalculationCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
