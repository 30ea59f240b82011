//! In-memory result caches.
//!
//! Results are keyed by [`canonical_key`] and expire after a TTL chosen by
//! request category. Nothing is persisted; a restart starts cold.

mod fingerprint;
mod key;

pub use fingerprint::FingerprintTracker;
pub use key::canonical_key;

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Request types whose analytics results change only with the data files.
pub const STATIC_ANALYTICS_TYPES: [&str; 4] = [
    "summary",
    "carrier_summary",
    "carrier_zone_summary",
    "distributions",
];

pub const DEFAULT_STATIC_TTL: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_DYNAMIC_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_PREDICTION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Inserts between sweeps of unread expired entries.
pub const PURGE_INTERVAL: usize = 64;

/// How long an entry lives, by category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Same TTL for every category.
    Uniform(Duration),
    /// `static_ttl` for the listed categories, `default_ttl` for the rest.
    Tiered {
        static_types: HashSet<String>,
        static_ttl: Duration,
        default_ttl: Duration,
    },
}

impl TtlPolicy {
    pub fn uniform(ttl: Duration) -> Self {
        Self::Uniform(ttl)
    }

    pub fn tiered<I, S>(static_types: I, static_ttl: Duration, default_ttl: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tiered {
            static_types: static_types.into_iter().map(Into::into).collect(),
            static_ttl,
            default_ttl,
        }
    }

    /// Analytics lane defaults: 4h for static summaries, 30min otherwise.
    pub fn analytics() -> Self {
        Self::tiered(STATIC_ANALYTICS_TYPES, DEFAULT_STATIC_TTL, DEFAULT_DYNAMIC_TTL)
    }

    /// Prediction lane default: 24h.
    pub fn predictions() -> Self {
        Self::uniform(DEFAULT_PREDICTION_TTL)
    }

    pub fn ttl_for(&self, category: &str) -> Duration {
        match self {
            Self::Uniform(ttl) => *ttl,
            Self::Tiered {
                static_types,
                static_ttl,
                default_ttl,
            } => {
                if static_types.contains(category) {
                    *static_ttl
                } else {
                    *default_ttl
                }
            }
        }
    }
}

/// A cached result. Never modified after insertion.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: Instant,
    pub category: String,
}

impl CacheEntry {
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cache statistics for the admin report.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub keys: Vec<String>,
}

/// Key → result map with per-category expiry.
///
/// Expired entries are removed lazily when read, every
/// [`PURGE_INTERVAL`] inserts, or eagerly through
/// [`purge_expired`](Self::purge_expired) and [`clear`](Self::clear).
#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    policy: TtlPolicy,
    hits: u64,
    misses: u64,
    inserts_since_purge: usize,
}

impl ResultCache {
    pub fn new(policy: TtlPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
            hits: 0,
            misses: 0,
            inserts_since_purge: 0,
        }
    }

    /// Look up a live entry.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live_at(now) => {
                self.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result, replacing any previous entry for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: Value, category: &str) {
        self.set_at(key, value, category, Instant::now());
    }

    pub fn set_at(&mut self, key: impl Into<String>, value: Value, category: &str, now: Instant) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            expires_at: now + self.policy.ttl_for(category),
            category: category.to_string(),
        };
        self.entries.insert(key, entry);

        self.inserts_since_purge += 1;
        if self.inserts_since_purge >= PURGE_INTERVAL {
            self.purge_expired_at(now);
        }
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Drop entries that have expired. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&mut self, now: Instant) -> usize {
        self.inserts_since_purge = 0;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live_at(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits,
            misses: self.misses,
            keys: self.keys(),
        }
    }
}
