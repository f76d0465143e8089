//! Last-good value store keyed by `(category, request key)`.
//!
//! Reads classify an entry by age:
//!
//! | Age | Lookup |
//! |-----|--------|
//! | `age <= ttl` | [`CacheLookup::Fresh`] |
//! | `ttl < age <= max_age` | [`CacheLookup::Stale`] |
//! | `age > max_age` or absent | [`CacheLookup::Miss`] |

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::config::duration_secs;
use crate::domain::FeedValue;
use crate::source::{Category, SourceId};
use crate::ValidationError;

/// Identity of one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub category: Category,
    pub key: String,
}

impl CacheKey {
    pub fn new(category: Category, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.key)
    }
}

/// Freshness window of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
    #[serde(rename = "max_age_secs", with = "duration_secs")]
    pub max_age: Duration,
}

impl CachePolicy {
    pub const fn new(ttl: Duration, max_age: Duration) -> Self {
        Self { ttl, max_age }
    }

    pub const fn default_for(category: Category) -> Self {
        let (ttl, max_age) = match category {
            Category::MarketPrice => (60, 300),
            Category::Ohlc => (300, 1800),
            Category::News => (600, 3600),
            Category::Sentiment => (1800, 7200),
            Category::OnChain | Category::WhaleTracking => (120, 900),
        };
        Self::new(Duration::from_secs(ttl), Duration::from_secs(max_age))
    }
}

/// Per-category policies; categories without an override use the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachePolicies(BTreeMap<Category, CachePolicy>);

impl CachePolicies {
    pub fn with_policy(mut self, category: Category, policy: CachePolicy) -> Self {
        self.0.insert(category, policy);
        self
    }

    pub fn for_category(&self, category: Category) -> CachePolicy {
        self.0
            .get(&category)
            .copied()
            .unwrap_or_else(|| CachePolicy::default_for(category))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (category, policy) in &self.0 {
            if policy.ttl.is_zero() {
                return Err(ValidationError::ZeroConfigValue {
                    field: "cache.ttl_secs",
                });
            }
            if policy.max_age < policy.ttl {
                return Err(ValidationError::InvalidCachePolicy {
                    category: *category,
                });
            }
        }
        Ok(())
    }
}

/// One stored value. Entries are replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    #[serde(skip)]
    pub key: CacheKey,
    pub value: FeedValue,
    #[serde(skip)]
    pub fetched_at: Instant,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at_utc: OffsetDateTime,
    pub source: SourceId,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: FeedValue, source: SourceId) -> Self {
        Self {
            key,
            value,
            fetched_at: Instant::now(),
            fetched_at_utc: OffsetDateTime::now_utc(),
            source,
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(Arc<CacheEntry>),
    Stale { entry: Arc<CacheEntry>, age: Duration },
    Miss,
}

impl CacheLookup {
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub const fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Thread-safe response cache.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    policies: CachePolicies,
    inner: Arc<tokio::sync::RwLock<HashMap<CacheKey, Arc<CacheEntry>>>>,
}

impl ResponseCache {
    pub fn new(policies: CachePolicies) -> Self {
        Self {
            policies,
            inner: Arc::default(),
        }
    }

    pub fn policy(&self, category: Category) -> CachePolicy {
        self.policies.for_category(category)
    }

    pub async fn get(&self, key: &CacheKey) -> CacheLookup {
        let store = self.inner.read().await;
        let Some(entry) = store.get(key) else {
            return CacheLookup::Miss;
        };

        let policy = self.policy(key.category);
        let age = entry.age();
        if age <= policy.ttl {
            CacheLookup::Fresh(Arc::clone(entry))
        } else if age <= policy.max_age {
            CacheLookup::Stale {
                entry: Arc::clone(entry),
                age,
            }
        } else {
            CacheLookup::Miss
        }
    }

    /// Stores a freshly fetched value and returns the entry now held for the key.
    pub async fn put(&self, key: CacheKey, value: FeedValue, source: SourceId) -> Arc<CacheEntry> {
        self.insert(CacheEntry::new(key, value, source)).await
    }

    /// Stores `entry` unless the key already holds a newer one.
    pub async fn insert(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let mut store = self.inner.write().await;
        if let Some(current) = store.get(&entry.key) {
            if current.fetched_at > entry.fetched_at {
                return Arc::clone(current);
            }
        }
        let entry = Arc::new(entry);
        store.insert(entry.key.clone(), Arc::clone(&entry));
        entry
    }

    /// Drops entries older than their category's max age; returns how many.
    pub async fn purge_expired(&self) -> usize {
        let mut store = self.inner.write().await;
        let before = store.len();
        store.retain(|key, entry| entry.age() <= self.policies.for_category(key.category).max_age);
        before - store.len()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Number of entries, including ones past their max age not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
