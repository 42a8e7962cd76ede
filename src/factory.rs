//! The factory contract supplied by the caller. A resource type `T` is
//! entirely opaque to the pool; the factory is its only source of truth
//! for creation, teardown and liveness.

use async_trait::async_trait;

use crate::error::BoxError;

/// Creates, validates and destroys resources of type `T`. Implementors
/// must be reentrant: the pool may call `create` or `destroy` while a
/// previous call of the same kind is still in flight.
#[async_trait]
pub trait Factory<T>: Send + Sync + 'static {
    async fn create(&self) -> Result<T, BoxError>;

    async fn destroy(&self, obj: T) -> Result<(), BoxError>;

    /// Optional liveness check. `Ok(false)` (not an error) means the
    /// resource failed validation and should be destroyed rather than
    /// handed out or returned to the available set.
    async fn validate(&self, _obj: &mut T) -> Result<bool, BoxError> {
        Ok(true)
    }
}
