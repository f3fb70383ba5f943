//! RPC endpoint pool with per-endpoint health.
//!
//! Calls go to the healthiest endpoint, preferring the one that served the
//! last successful request. Health is plain data on each endpoint, so callers
//! can report it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Health counters of one endpoint.
#[derive(Debug, Default)]
pub struct EndpointHealth {
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

/// Point-in-time copy of [`EndpointHealth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    /// Endpoint URL
    pub url: String,
    /// Failures since the last success
    pub consecutive_failures: u64,
    /// Failures since startup
    pub total_failures: u64,
    /// Successes since startup
    pub total_successes: u64,
}

/// A pool entry: an endpoint client plus its health.
#[derive(Debug)]
pub struct Endpoint<C> {
    url: String,
    client: C,
    health: EndpointHealth,
}

impl<C> Endpoint<C> {
    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Endpoint client.
    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Ordered set of endpoints.
#[derive(Debug)]
pub struct EndpointPool<C> {
    endpoints: Vec<Endpoint<C>>,
    preferred: AtomicUsize,
}

impl<C> EndpointPool<C> {
    /// Create a pool from `(url, client)` pairs. Order sets tie-break priority.
    pub fn new(endpoints: impl IntoIterator<Item = (String, C)>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|(url, client)| Endpoint {
                    url,
                    client,
                    health: EndpointHealth::default(),
                })
                .collect(),
            preferred: AtomicUsize::new(0),
        }
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Pick the endpoint for the next call: the preferred one unless another
    /// has fewer consecutive failures. Scanning starts after the preferred
    /// endpoint so failures rotate through the pool.
    pub fn select(&self) -> Option<(usize, &Endpoint<C>)> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }
        let preferred = self.preferred.load(Ordering::Relaxed) % len;

        let mut best = preferred;
        let mut best_failures = self.failures_of(preferred);
        for offset in 1..len {
            let idx = (preferred + offset) % len;
            let failures = self.failures_of(idx);
            if failures < best_failures {
                best = idx;
                best_failures = failures;
            }
        }
        Some((best, &self.endpoints[best]))
    }

    /// Record a successful call.
    pub fn record_success(&self, idx: usize) {
        if let Some(endpoint) = self.endpoints.get(idx) {
            endpoint.health.consecutive_failures.store(0, Ordering::Relaxed);
            endpoint.health.total_successes.fetch_add(1, Ordering::Relaxed);
            self.preferred.store(idx, Ordering::Relaxed);
        }
    }

    /// Record a failed call and move the preference to the next endpoint.
    pub fn record_failure(&self, idx: usize) {
        if let Some(endpoint) = self.endpoints.get(idx) {
            endpoint.health.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            endpoint.health.total_failures.fetch_add(1, Ordering::Relaxed);
            self.preferred
                .store((idx + 1) % self.endpoints.len(), Ordering::Relaxed);
        }
    }

    /// Health of every endpoint.
    pub fn status(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .map(|e| EndpointStatus {
                url: e.url.clone(),
                consecutive_failures: e.health.consecutive_failures.load(Ordering::Relaxed),
                total_failures: e.health.total_failures.load(Ordering::Relaxed),
                total_successes: e.health.total_successes.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn failures_of(&self, idx: usize) -> u64 {
        self.endpoints[idx]
            .health
            .consecutive_failures
            .load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> EndpointPool<()> {
        EndpointPool::new(
            ["https://a.example", "https://b.example", "https://c.example"]
                .into_iter()
                .map(|url| (url.to_string(), ())),
        )
    }

    #[test]
    fn test_select_prefers_first_healthy() {
        let pool = pool();
        let (idx, endpoint) = pool.select().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(endpoint.url(), "https://a.example");
    }

    #[test]
    fn test_failure_rotates_to_next_endpoint() {
        let pool = pool();
        pool.record_failure(0);
        assert_eq!(pool.select().unwrap().0, 1);

        pool.record_failure(1);
        assert_eq!(pool.select().unwrap().0, 2);

        pool.record_failure(2);
        // All have failed once; rotation continues from the preferred slot.
        assert_eq!(pool.select().unwrap().0, 0);
    }

    #[test]
    fn test_success_resets_failures_and_sticks() {
        let pool = pool();
        pool.record_failure(0);
        pool.record_failure(0);
        pool.record_success(1);
        assert_eq!(pool.select().unwrap().0, 1);

        let status = pool.status();
        assert_eq!(status[0].consecutive_failures, 2);
        assert_eq!(status[0].total_failures, 2);
        assert_eq!(status[1].total_successes, 1);
        assert_eq!(status[1].consecutive_failures, 0);
    }

    #[test]
    fn test_empty_pool() {
        let pool: EndpointPool<()> = EndpointPool::new(Vec::new());
        assert!(pool.select().is_none());
    }
}
