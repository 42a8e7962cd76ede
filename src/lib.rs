//! A generic async resource pool.
//!
//! Multiplexes a bounded set of expensive, asynchronously constructed
//! resources among concurrent callers with priority+FIFO fairness, idle
//! eviction, graceful drain/clear shutdown, and per-operation timeouts.
//! The concrete resource type and its construction/teardown are supplied
//! by implementing [`Factory`].

pub mod config;
pub mod error;
pub mod events;
pub mod evictor;
pub mod factory;
pub mod list;
pub mod pool;
pub mod priority;
pub mod request;
pub mod resource;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use events::PoolListener;
pub use factory::Factory;
pub use pool::{Pool, PooledGuard};
pub use resource::ResourceId;
