//! A single pooled resource: the user's value plus lifecycle state and
//! timestamps. Owned exclusively by the pool from creation to
//! destruction; clients only ever see the inner value through a guard.

use std::time::Instant;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Idle,
    Allocated,
    Validation,
    Returning,
    Invalid,
}

/// Opaque identity for a pooled resource, stable for its whole lifetime.
/// Lets the pool track a resource by identity rather than equality —
/// `obj` itself need not be `Eq`/`Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(Uuid);

impl ResourceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

pub struct PooledResource<T> {
    pub id: ResourceId,
    pub obj: T,
    pub state: ResourceState,
    pub created_at: Instant,
    pub last_borrow: Option<Instant>,
    pub last_return: Option<Instant>,
    pub last_idle: Instant,
}

impl<T> PooledResource<T> {
    pub fn new(obj: T) -> Self {
        let now = Instant::now();
        Self {
            id: ResourceId::new(),
            obj,
            state: ResourceState::Idle,
            created_at: now,
            last_borrow: None,
            last_return: None,
            last_idle: now,
        }
    }

    pub fn allocate(&mut self) {
        self.state = ResourceState::Allocated;
        self.last_borrow = Some(Instant::now());
    }

    pub fn deallocate(&mut self) {
        self.state = ResourceState::Idle;
        let now = Instant::now();
        self.last_return = Some(now);
        self.last_idle = now;
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_idle.elapsed()
    }
}
