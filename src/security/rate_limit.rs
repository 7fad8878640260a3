//! Fixed-window rate limiting per subject and route class.
//!
//! The window arithmetic lives on [`RateLimitWindow`]; a [`WindowStore`]
//! only has to apply it atomically per key. [`InMemoryWindowStore`] does so
//! under the owning `DashMap` shard lock, which serializes concurrent hits
//! for the same key without a global mutex.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::WindowConfig;
use crate::observability::metrics;
use crate::security::clock::Clock;

/// Rate-limit class chosen by the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    Default,
    Strict,
    Webhook,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Default => "default",
            RouteClass::Strict => "strict",
            RouteClass::Webhook => "webhook",
        }
    }
}

/// Counter key: who is being limited, and on which class of route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub subject: String,
    pub class: RouteClass,
}

impl WindowKey {
    pub fn new(subject: impl Into<String>, class: RouteClass) -> Self {
        Self {
            subject: subject.into(),
            class,
        }
    }
}

/// Outcome of a single `check_and_consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Time until the current window resets; set only on denial.
    pub retry_after_ms: Option<u64>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
        }
    }

    fn deny(retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            retry_after_ms: Some(retry_after_ms),
        }
    }
}

/// Counter state for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_start_ms: u64,
    pub request_count: u32,
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitWindow {
    /// Opens a window whose first request is the current one.
    pub fn open(now_ms: u64, config: &WindowConfig) -> Self {
        Self {
            window_start_ms: now_ms,
            request_count: 1,
            window_ms: config.window_ms,
            max_requests: config.max_requests,
        }
    }

    /// A window ending exactly at `now` is expired.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= self.window_ms
    }

    /// Counts one request against this window.
    pub fn record_hit(&mut self, now_ms: u64, config: &WindowConfig) -> RateDecision {
        if self.is_expired(now_ms) {
            *self = Self::open(now_ms, config);
            return RateDecision::allow();
        }

        self.request_count = self.request_count.saturating_add(1);
        if self.request_count <= self.max_requests {
            RateDecision::allow()
        } else {
            let resets_at = self.window_start_ms.saturating_add(self.window_ms);
            RateDecision::deny(resets_at.saturating_sub(now_ms).max(1))
        }
    }
}

/// Storage for rate-limit windows.
///
/// Implementations must apply [`RateLimitWindow::record_hit`] atomically per
/// key. An external counter service can implement this for multi-instance
/// deployments.
pub trait WindowStore: Send + Sync {
    fn consume(&self, key: WindowKey, now_ms: u64, config: &WindowConfig) -> RateDecision;

    /// Drops windows that have fully elapsed. Returns how many were removed.
    fn purge_expired(&self, now_ms: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local window store.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<WindowKey, RateLimitWindow>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn consume(&self, key: WindowKey, now_ms: u64, config: &WindowConfig) -> RateDecision {
        match self.windows.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().record_hit(now_ms, config),
            Entry::Vacant(entry) => {
                entry.insert(RateLimitWindow::open(now_ms, config));
                RateDecision::allow()
            }
        }
    }

    fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now_ms));
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// Rate limiter shared by all request handlers.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Counts one request for `subject` on `class` and decides whether it may proceed.
    pub fn check_and_consume(
        &self,
        subject: &str,
        class: RouteClass,
        config: &WindowConfig,
    ) -> RateDecision {
        let now = self.clock.now_ms();
        let decision = self
            .store
            .consume(WindowKey::new(subject, class), now, config);

        if !decision.allowed {
            tracing::warn!(
                subject = %subject,
                route_class = class.as_str(),
                retry_after_ms = ?decision.retry_after_ms,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(class.as_str());
        }
        decision
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now_ms())
    }

    pub fn tracked_windows(&self) -> usize {
        self.store.len()
    }

    /// Periodically purges expired windows until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.tracked_windows(), "Purged expired rate-limit windows");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
