//! Pool error taxonomy.
//!
//! Covers rejections returned directly to a caller. Factory failures
//! encountered during the pool's own bookkeeping (creation retries,
//! background destroys) never reach a caller this way — they go through
//! [`crate::events::PoolListener`] and `tracing` instead, so one bad
//! resource can't fail an unrelated acquire.

use std::error::Error as StdError;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is draining")]
    PoolDraining,

    #[error("max waitingClients count exceeded")]
    MaxWaitersExceeded,

    #[error("acquire timed out")]
    AcquireTimeout,

    #[error("resource is not in this pool")]
    ResourceNotInPool,

    #[error("destroy timed out")]
    DestroyTimeout,
}

pub type PoolResult<T> = Result<T, PoolError>;
