//! The idle-eviction predicate: a pure function of configuration and
//! observed idle time, independently testable without a running pool or
//! a clock mock.

use std::time::Duration;

use crate::config::PoolConfig;

/// Decides whether a resource that has been idle for `idle_for` should be
/// evicted, given how many resources are currently available.
///
/// Soft-idle eviction only fires while the available set has more than
/// `min` spares; hard-idle eviction fires regardless, on the assumption
/// that the pool will top back up to `min` afterwards.
pub fn evict(config: &PoolConfig, idle_for: Duration, available_count: usize) -> bool {
    if let Some(soft) = config.soft_idle_timeout {
        if idle_for > soft && available_count > config.min {
            return true;
        }
    }
    idle_for > config.idle_timeout
}
