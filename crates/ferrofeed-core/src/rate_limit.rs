use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::catalog::{RateLimitQuota, SourceCatalog};
use crate::source::SourceId;

#[derive(Debug)]
struct RateLimitWindow {
    window_start: Instant,
    count: u32,
    limit: u32,
    period: Duration,
}

impl RateLimitWindow {
    fn new(quota: RateLimitQuota, now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            limit: quota.limit,
            period: Duration::from_secs(quota.period_secs),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.period
    }

    fn used(&self, now: Instant) -> u32 {
        if self.expired(now) {
            0
        } else {
            self.count
        }
    }

    fn roll(&mut self, now: Instant) {
        if self.expired(now) {
            self.window_start = now;
            self.count = 0;
        }
    }

    fn resize(&mut self, quota: RateLimitQuota) {
        self.limit = quota.limit;
        self.period = Duration::from_secs(quota.period_secs);
        self.count = self.count.min(self.limit);
    }
}

/// Per-source fixed-window call counters. Sources without a quota are unlimited.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    windows: RwLock<HashMap<SourceId, Arc<Mutex<RateLimitWindow>>>>,
}

impl RateLimitTracker {
    pub fn new(catalog: &SourceCatalog) -> Self {
        let tracker = Self::default();
        tracker.resize(catalog);
        tracker
    }

    /// Whether a call could be dispatched now. Does not count anything.
    pub fn allow(&self, id: &SourceId) -> bool {
        match self.window(id) {
            Some(window) => {
                let window = window.lock().unwrap_or_else(PoisonError::into_inner);
                window.used(Instant::now()) < window.limit
            }
            None => true,
        }
    }

    /// Counts one dispatched call; refuses without counting when the window is full.
    pub fn consume(&self, id: &SourceId) -> bool {
        let Some(window) = self.window(id) else {
            return true;
        };
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.roll(Instant::now());
        if window.count >= window.limit {
            tracing::debug!(source = %id, limit = window.limit, "rate limit window exhausted");
            return false;
        }
        window.count += 1;
        true
    }

    /// Calls left in the current window; `None` for unlimited sources.
    pub fn remaining(&self, id: &SourceId) -> Option<u32> {
        self.window(id).map(|window| {
            let window = window.lock().unwrap_or_else(PoisonError::into_inner);
            window.limit.saturating_sub(window.used(Instant::now()))
        })
    }

    /// Time until the current window rolls over, if the source is limited.
    pub fn resets_in(&self, id: &SourceId) -> Option<Duration> {
        self.window(id).map(|window| {
            let window = window.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if window.expired(now) {
                Duration::ZERO
            } else {
                window
                    .period
                    .saturating_sub(now.saturating_duration_since(window.window_start))
            }
        })
    }

    /// Aligns windows with the catalog's quotas. Counts in the current window are
    /// kept (clamped to the new limit); sources that lost their quota become unlimited.
    pub fn resize(&self, catalog: &SourceCatalog) {
        let now = Instant::now();
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|id, _| catalog.get(id).is_some_and(|d| d.rate_limit.is_some()));

        for descriptor in catalog.iter() {
            let Some(quota) = descriptor.rate_limit else {
                continue;
            };
            match windows.get(&descriptor.id) {
                Some(window) => window
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .resize(quota),
                None => {
                    windows.insert(
                        descriptor.id.clone(),
                        Arc::new(Mutex::new(RateLimitWindow::new(quota, now))),
                    );
                }
            }
        }
    }

    fn window(&self, id: &SourceId) -> Option<Arc<Mutex<RateLimitWindow>>> {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(Arc::clone)
    }
}
