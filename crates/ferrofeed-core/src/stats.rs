use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::source::Category;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Counters {
    total_requests: u64,
    cache_hits: u64,
    live_served: u64,
    stale_served: u64,
    exhausted: u64,
    /// Attempts needed by live-served resolves.
    depth: BTreeMap<usize, u64>,
}

impl Counters {
    fn merge(&mut self, other: &Self) {
        self.total_requests += other.total_requests;
        self.cache_hits += other.cache_hits;
        self.live_served += other.live_served;
        self.stale_served += other.stale_served;
        self.exhausted += other.exhausted;
        for (depth, count) in &other.depth {
            *self.depth.entry(*depth).or_default() += count;
        }
    }
}

/// Resolve counters, for one category or all of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub live_served: u64,
    pub stale_served: u64,
    pub exhausted: u64,
    pub cache_hit_rate: f64,
    /// Number of live-served resolves keyed by the attempts they needed.
    pub fallback_depth_histogram: BTreeMap<usize, u64>,
}

/// Observability counters maintained by the orchestrator.
#[derive(Debug, Default)]
pub struct ResolveStats {
    by_category: Mutex<BTreeMap<Category, Counters>>,
}

impl ResolveStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self, category: Category) {
        self.update(category, |counters| counters.cache_hits += 1);
    }

    pub fn record_live(&self, category: Category, attempts: usize) {
        self.update(category, |counters| {
            counters.live_served += 1;
            *counters.depth.entry(attempts).or_default() += 1;
        });
    }

    pub fn record_stale(&self, category: Category) {
        self.update(category, |counters| counters.stale_served += 1);
    }

    pub fn record_exhausted(&self, category: Category) {
        self.update(category, |counters| counters.exhausted += 1);
    }

    pub fn snapshot(&self, category: Option<Category>) -> StatsSnapshot {
        let by_category = self
            .by_category
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut totals = Counters::default();
        match category {
            Some(category) => {
                if let Some(counters) = by_category.get(&category) {
                    totals.merge(counters);
                }
            }
            None => by_category.values().for_each(|counters| totals.merge(counters)),
        }

        let cache_hit_rate = if totals.total_requests == 0 {
            0.0
        } else {
            totals.cache_hits as f64 / totals.total_requests as f64
        };

        StatsSnapshot {
            category,
            total_requests: totals.total_requests,
            cache_hits: totals.cache_hits,
            live_served: totals.live_served,
            stale_served: totals.stale_served,
            exhausted: totals.exhausted,
            cache_hit_rate,
            fallback_depth_histogram: totals.depth,
        }
    }

    fn update(&self, category: Category, apply: impl FnOnce(&mut Counters)) {
        let mut by_category = self
            .by_category
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counters = by_category.entry(category).or_default();
        counters.total_requests += 1;
        apply(counters);
    }
}
