//! Pool-level observability hooks.
//!
//! A listener is registered once at construction and lives as long as
//! the pool does — no weak references, no self-unregistration. Every
//! error a listener would see is also emitted through `tracing`, so
//! observability doesn't depend on a listener being registered at all.

use crate::error::BoxError;

pub trait PoolListener: Send + Sync {
    fn on_factory_create_error(&self, _err: &BoxError) {}
    fn on_factory_destroy_error(&self, _err: &BoxError) {}
}

/// Default listener: does nothing beyond the `tracing` emission the pool
/// always performs.
pub struct NoopListener;

impl PoolListener for NoopListener {}
