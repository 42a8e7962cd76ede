//! Pool configuration: frozen after construction, normalized exactly
//! once by [`PoolConfig::normalize`].

use std::time::Duration;

/// Configuration for a [`crate::pool::Pool`]. Malformed or missing
/// numeric fields fall back to documented defaults rather than panicking
/// — callers assembling options from loosely-typed sources (CLI flags,
/// config files) get clamped, not rejected.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub max_waiting_clients: Option<usize>,
    pub priority_range: usize,
    pub fifo: bool,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub acquire_timeout: Option<Duration>,
    pub destroy_timeout: Option<Duration>,
    pub eviction_run_interval: Option<Duration>,
    pub num_tests_per_eviction_run: usize,
    pub soft_idle_timeout: Option<Duration>,
    pub idle_timeout: Duration,
    pub autostart: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: 1,
            max_waiting_clients: None,
            priority_range: 1,
            fifo: true,
            test_on_borrow: false,
            test_on_return: false,
            acquire_timeout: None,
            destroy_timeout: None,
            eviction_run_interval: None,
            num_tests_per_eviction_run: 3,
            soft_idle_timeout: None,
            idle_timeout: Duration::from_millis(30_000),
            autostart: true,
        }
    }
}

impl PoolConfig {
    /// Builder seed for a pool bounded at `max` resources, `min` defaulted
    /// to 0. Mirrors the `bounded`/`unbounded` constructors used
    /// throughout this workspace's other pool configs.
    pub fn bounded(max: usize) -> Self {
        Self { max: max.max(1), ..Default::default() }
    }

    #[must_use]
    pub fn with_min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    #[must_use]
    pub fn with_max_waiting_clients(mut self, n: usize) -> Self {
        self.max_waiting_clients = Some(n);
        self
    }

    #[must_use]
    pub fn with_priority_range(mut self, n: usize) -> Self {
        self.priority_range = n.max(1);
        self
    }

    #[must_use]
    pub fn with_fifo(mut self, fifo: bool) -> Self {
        self.fifo = fifo;
        self
    }

    #[must_use]
    pub fn with_test_on_borrow(mut self, on: bool) -> Self {
        self.test_on_borrow = on;
        self
    }

    #[must_use]
    pub fn with_test_on_return(mut self, on: bool) -> Self {
        self.test_on_return = on;
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, d: Duration) -> Self {
        self.acquire_timeout = Some(d);
        self
    }

    #[must_use]
    pub fn with_destroy_timeout(mut self, d: Duration) -> Self {
        self.destroy_timeout = Some(d);
        self
    }

    #[must_use]
    pub fn with_eviction_run_interval(mut self, d: Duration) -> Self {
        self.eviction_run_interval = Some(d);
        self
    }

    #[must_use]
    pub fn with_num_tests_per_eviction_run(mut self, n: usize) -> Self {
        self.num_tests_per_eviction_run = n;
        self
    }

    #[must_use]
    pub fn with_soft_idle_timeout(mut self, d: Duration) -> Self {
        self.soft_idle_timeout = Some(d);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, d: Duration) -> Self {
        self.idle_timeout = d;
        self
    }

    #[must_use]
    pub fn with_autostart(mut self, on: bool) -> Self {
        self.autostart = on;
        self
    }

    /// `max` clamps to at least 1, `min` clamps down to `max` if it
    /// overshoots. Called once by [`crate::pool::Pool::new`]; the
    /// returned config is what the pool actually runs with.
    pub fn normalize(mut self) -> Self {
        self.max = self.max.max(1);
        if self.min > self.max {
            self.min = self.max;
        }
        self.priority_range = self.priority_range.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_max_one_min_zero() {
        let c = PoolConfig::default().normalize();
        assert_eq!(c.max, 1);
        assert_eq!(c.min, 0);
    }

    #[test]
    fn min_clamps_down_to_max() {
        let c = PoolConfig { min: 5, max: 3, ..Default::default() }.normalize();
        assert_eq!(c.max, 3);
        assert_eq!(c.min, 3);
    }

    #[test]
    fn zero_max_clamps_to_one() {
        let c = PoolConfig { max: 0, ..Default::default() }.normalize();
        assert_eq!(c.max, 1);
    }
}
