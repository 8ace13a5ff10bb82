//! Per-tenant sliding-window admission gate.
//!
//! Each tenant owns a deque of admission instants behind its own mutex; the
//! tenant map is only write-locked the first time a tenant is seen, so tenants
//! never wait on each other. State is process-local.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use jobq_common::AdmissionConfig;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Submissions accepted per window.
    pub max_requests: usize,
    /// Sliding window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl From<&AdmissionConfig> for RateLimitConfig {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            max_requests: config.rate_limit,
            window: config.rate_window(),
        }
    }
}

type TenantWindow = Arc<Mutex<VecDeque<Instant>>>;

/// Per-tenant rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<String, TenantWindow>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    async fn window(&self, tenant_id: &str) -> TenantWindow {
        if let Some(window) = self.windows.read().await.get(tenant_id) {
            return window.clone();
        }
        self.windows
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    fn evict(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) > length {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit one submission for `tenant_id` if the window has room.
    pub async fn allow(&self, tenant_id: &str) -> bool {
        let window = self.window(tenant_id).await;
        let mut admitted = window.lock().await;
        let now = Instant::now();

        Self::evict(&mut admitted, now, self.config.window);

        if admitted.len() >= self.config.max_requests {
            tracing::debug!(tenant_id, in_window = admitted.len(), "Rate limit reached");
            return false;
        }

        admitted.push_back(now);
        true
    }

    /// Submissions `tenant_id` may still make in the current window.
    pub async fn remaining(&self, tenant_id: &str) -> usize {
        let Some(window) = self.windows.read().await.get(tenant_id).cloned() else {
            return self.config.max_requests;
        };
        let mut admitted = window.lock().await;
        Self::evict(&mut admitted, Instant::now(), self.config.window);
        self.config.max_requests.saturating_sub(admitted.len())
    }

    /// Drop tenants whose window has emptied. Returns how many were dropped.
    pub async fn cleanup(&self) -> usize {
        let mut windows = self.windows.write().await;
        let before = windows.len();
        let now = Instant::now();
        let length = self.config.window;

        windows.retain(|_, window| {
            // A window some `allow` has already looked up is kept
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let Ok(mut admitted) = window.try_lock() else {
                return true;
            };
            Self::evict(&mut admitted, now, length);
            !admitted.is_empty()
        });

        before - windows.len()
    }

    /// Get the number of tracked tenants.
    pub async fn tenant_count(&self) -> usize {
        self.windows.read().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
