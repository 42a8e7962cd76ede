//! The pool orchestrator: the public surface plus the dispense algorithm
//! that matches waiting requests against available and newly created
//! resources.
//!
//! Concurrency model: all bookkeeping lives behind one
//! [`std::sync::Mutex`], following the single-critical-section pattern
//! used by `bikeshedder-deadpool`'s managed pool. Every mutation of
//! `Inner` happens inside a lock acquisition that never crosses an
//! `.await` point; calls into the factory (`create`/`destroy`/`validate`)
//! are always made with the lock released, and their results are posted
//! back under a fresh lock acquisition.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{BoxError, PoolError, PoolResult};
use crate::events::{NoopListener, PoolListener};
use crate::evictor;
use crate::factory::Factory;
use crate::list::Deque;
use crate::priority::{Handle, PriorityQueue};
use crate::request::{new_request, ResourceRequest};
use crate::resource::{PooledResource, ResourceId, ResourceState};

#[derive(Debug)]
struct DestroyTimeoutError;

impl std::fmt::Display for DestroyTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "destroy timed out")
    }
}

impl std::error::Error for DestroyTimeoutError {}

type Waiter<T> = ResourceRequest<PooledResource<T>>;

struct Inner<T> {
    available: Deque<PooledResource<T>>,
    waiters: PriorityQueue<Waiter<T>>,
    loans: HashMap<ResourceId, Arc<Notify>>,
    all_count: usize,
    creating: usize,
    in_test_borrow: usize,
    in_test_return: usize,
    evict_cursor: Option<crate::list::NodeId>,
    draining: bool,
    started: bool,
    dispensing: bool,
}

impl<T> Inner<T> {
    fn new(priority_range: usize) -> Self {
        Self {
            available: Deque::new(),
            waiters: PriorityQueue::new(priority_range),
            loans: HashMap::new(),
            all_count: 0,
            creating: 0,
            in_test_borrow: 0,
            in_test_return: 0,
            evict_cursor: None,
            draining: false,
            started: false,
            dispensing: false,
        }
    }
}

struct Shared<T, F: Factory<T>> {
    inner: Mutex<Inner<T>>,
    factory: F,
    config: PoolConfig,
    listener: Arc<dyn PoolListener>,
}

/// A generic, priority-aware async resource pool.
///
/// Cloning a `Pool` is cheap — it shares the same underlying state — and
/// is how the pool hands a handle to its own background tasks (eviction,
/// catch-up creation, RAII returns).
pub struct Pool<T, F: Factory<T>> {
    shared: Arc<Shared<T, F>>,
}

impl<T, F: Factory<T>> Clone for Pool<T, F> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Send + 'static, F: Factory<T>> Pool<T, F> {
    pub fn new(factory: F, config: PoolConfig) -> PoolResult<Self> {
        Self::with_listener(factory, config, Arc::new(NoopListener))
    }

    pub fn with_listener(
        factory: F,
        config: PoolConfig,
        listener: Arc<dyn PoolListener>,
    ) -> PoolResult<Self> {
        let config = config.normalize();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::new(config.priority_range)),
            factory,
            config,
            listener,
        });
        let pool = Self { shared };
        if pool.shared.config.autostart {
            pool.start_sync();
        }
        Ok(pool)
    }

    fn start_sync(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.started {
            return;
        }
        inner.started = true;
        drop(inner);
        spawn_evictor(&self.shared);
        spawn_ensure_minimum(&self.shared);
    }

    pub async fn start(&self) {
        self.start_sync();
    }

    /// Acquires a resource at the given priority (`None` maps to the
    /// highest-priority slot). Lower numbers are served first; equal
    /// priorities are served FIFO.
    pub async fn acquire(&self, priority: Option<i64>) -> PoolResult<PooledGuard<T, F>> {
        self.start_sync();

        let (waiter, awaiting) = new_request::<PooledResource<T>>();
        let settled = awaiting.settled_signal();
        let handle: Handle = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.draining {
                return Err(PoolError::PoolDraining);
            }
            if let Some(max_waiting) = self.shared.config.max_waiting_clients {
                let spare =
                    self.shared.config.max.saturating_sub(inner.all_count + inner.creating);
                if spare < 1 && inner.available.is_empty() && inner.waiters.len() >= max_waiting {
                    return Err(PoolError::MaxWaitersExceeded);
                }
            }
            let handle = inner.waiters.enqueue(waiter, priority);
            dispatch_locked(&mut inner, &self.shared.config);
            handle
        };
        trigger_dispense(&self.shared);

        let resource = match self.shared.config.acquire_timeout {
            Some(d) => match time::timeout(d, awaiting.receiver).await {
                Ok(Ok(resource)) => resource,
                Ok(Err(_)) => return Err(PoolError::AcquireTimeout),
                Err(_) => {
                    let mut inner = self.shared.inner.lock().unwrap();
                    inner.waiters.remove(handle);
                    drop(inner);
                    settled.notify_one();
                    return Err(PoolError::AcquireTimeout);
                }
            },
            None => match awaiting.receiver.await {
                Ok(resource) => resource,
                Err(_) => return Err(PoolError::AcquireTimeout),
            },
        };

        Ok(PooledGuard { pool: self.clone(), resource: Some(resource) })
    }

    /// Returns a resource to the pool. Rejects with
    /// [`PoolError::ResourceNotInPool`] if the guard's resource is not
    /// currently on loan from this pool (e.g. it came from a different
    /// `Pool` instance).
    pub async fn release(&self, guard: PooledGuard<T, F>) -> PoolResult<()> {
        let id = guard.id();
        let present = self.shared.inner.lock().unwrap().loans.contains_key(&id);
        if !present {
            // Leave the guard intact: it belongs to whichever pool actually
            // loaned it out, and its own Drop impl will return it there.
            return Err(PoolError::ResourceNotInPool);
        }
        let resource = guard.take_resource();
        self.return_resource(resource).await;
        Ok(())
    }

    pub async fn destroy(&self, guard: PooledGuard<T, F>) -> PoolResult<()> {
        let id = guard.id();
        let present = self.shared.inner.lock().unwrap().loans.contains_key(&id);
        if !present {
            return Err(PoolError::ResourceNotInPool);
        }
        let resource = guard.take_resource();
        let settled = {
            let mut inner = self.shared.inner.lock().unwrap();
            let settled = inner.loans.remove(&id).ok_or(PoolError::ResourceNotInPool)?;
            inner.all_count -= 1;
            settled
        };
        destroy_resource(&self.shared, resource).await;
        settled.notify_one();
        ensure_minimum(&self.shared).await;
        trigger_dispense(&self.shared);
        Ok(())
    }

    async fn return_resource(&self, mut resource: PooledResource<T>) {
        let id = resource.id;
        let settled = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.loans.remove(&id)
        };
        let Some(settled) = settled else {
            return;
        };

        if self.shared.config.test_on_return {
            let ok = self.shared.factory.validate(&mut resource.obj).await.unwrap_or(false);
            if !ok {
                {
                    let mut inner = self.shared.inner.lock().unwrap();
                    inner.all_count -= 1;
                }
                destroy_resource(&self.shared, resource).await;
                settled.notify_one();
                ensure_minimum(&self.shared).await;
                trigger_dispense(&self.shared);
                return;
            }
        }

        resource.deallocate();
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if self.shared.config.fifo {
                inner.available.push_back(resource);
            } else {
                inner.available.push_front(resource);
            }
            dispatch_locked(&mut inner, &self.shared.config);
        }
        settled.notify_one();
        trigger_dispense(&self.shared);
    }

    /// Runs `body` against a borrowed resource, releasing it on success
    /// and destroying it on failure — the `use()` operation from the
    /// external interface (renamed to avoid the `use` keyword).
    pub async fn run<U, Fut>(
        &self,
        priority: Option<i64>,
        body: impl FnOnce(&mut T) -> Fut,
    ) -> PoolResult<U>
    where
        Fut: Future<Output = PoolResult<U>>,
    {
        let mut guard = self.acquire(priority).await?;
        match body(&mut guard).await {
            Ok(value) => {
                self.release(guard).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.destroy(guard).await;
                Err(e)
            }
        }
    }

    pub fn is_borrowed(&self, id: ResourceId) -> bool {
        self.shared.inner.lock().unwrap().loans.contains_key(&id)
    }

    /// Stops accepting new work and waits for every outstanding loan to
    /// settle. Implemented per the tail-waiter heuristic: since `acquire`
    /// already refuses new waiters once draining begins, waiting for the
    /// most-recently-enqueued waiter to settle implies every
    /// higher-priority waiter ahead of it settled first.
    pub async fn drain(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.draining = true;
        }
        let tail_settle = {
            let inner = self.shared.inner.lock().unwrap();
            inner.waiters.tail().map(|w| w.settled.clone())
        };
        if let Some(settle) = tail_settle {
            settle.notified().await;
        }
        let loan_settles: Vec<Arc<Notify>> = {
            let inner = self.shared.inner.lock().unwrap();
            inner.loans.values().cloned().collect()
        };
        for settle in loan_settles {
            settle.notified().await;
        }
    }

    /// Destroys every resource still sitting idle in the pool. Assumes
    /// `drain()` (or equivalent) has already ensured no loans remain.
    pub async fn clear(&self) {
        loop {
            let creating = self.shared.inner.lock().unwrap().creating;
            if creating == 0 {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }

        let to_destroy: Vec<PooledResource<T>> = {
            let mut inner = self.shared.inner.lock().unwrap();
            let mut v = Vec::new();
            while let Some(r) = inner.available.pop_front() {
                v.push(r);
            }
            inner.all_count -= v.len();
            v
        };

        let handles: Vec<_> = to_destroy
            .into_iter()
            .map(|r| {
                let shared = self.shared.clone();
                tokio::spawn(async move { destroy_resource(&shared, r).await })
            })
            .collect();
        for h in handles {
            let _ = h.await;
        }
    }

    /// Resolves once at least `min` resources are available, polling at
    /// a coarse interval.
    pub async fn ready(&self) {
        loop {
            {
                let inner = self.shared.inner.lock().unwrap();
                if inner.available.len() >= self.shared.config.min {
                    return;
                }
            }
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn size(&self) -> usize {
        let inner = self.shared.inner.lock().unwrap();
        inner.all_count + inner.creating
    }

    pub fn available(&self) -> usize {
        self.shared.inner.lock().unwrap().available.len()
    }

    pub fn borrowed(&self) -> usize {
        self.shared.inner.lock().unwrap().loans.len()
    }

    pub fn pending(&self) -> usize {
        self.shared.inner.lock().unwrap().waiters.len()
    }

    pub fn max(&self) -> usize {
        self.shared.config.max
    }

    pub fn min(&self) -> usize {
        self.shared.config.min
    }

    pub fn spare_resource_capacity(&self) -> usize {
        let inner = self.shared.inner.lock().unwrap();
        self.shared.config.max.saturating_sub(inner.all_count + inner.creating)
    }
}

/// RAII handle to a borrowed resource. Returns itself to the pool on
/// drop unless consumed by an explicit [`Pool::release`] or
/// [`Pool::destroy`] call.
pub struct PooledGuard<T: Send + 'static, F: Factory<T>> {
    pool: Pool<T, F>,
    resource: Option<PooledResource<T>>,
}

impl<T: Send + 'static, F: Factory<T>> std::fmt::Debug for PooledGuard<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledGuard").field("id", &self.id()).finish()
    }
}

impl<T: Send + 'static, F: Factory<T>> PooledGuard<T, F> {
    pub fn id(&self) -> ResourceId {
        self.resource.as_ref().expect("guard resource taken").id
    }

    fn take_resource(mut self) -> PooledResource<T> {
        self.resource.take().expect("guard resource already taken")
    }
}

impl<T: Send + 'static, F: Factory<T>> std::ops::Deref for PooledGuard<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource.as_ref().expect("guard resource taken").obj
    }
}

impl<T: Send + 'static, F: Factory<T>> std::ops::DerefMut for PooledGuard<T, F> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource.as_mut().expect("guard resource taken").obj
    }
}

impl<T: Send + 'static, F: Factory<T>> Drop for PooledGuard<T, F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.return_resource(resource).await });
        }
    }
}

/// Matches directly available resources to waiting requests. Never
/// touches the factory; the shortfall (if any) is handled by the caller
/// via [`trigger_dispense`]. When `test_on_borrow` is set, direct
/// dispatch is skipped entirely — every handout must pass through
/// [`do_validate`] first.
fn dispatch_locked<T>(inner: &mut Inner<T>, config: &PoolConfig) {
    if config.test_on_borrow {
        return;
    }
    while !inner.waiters.is_empty() {
        let Some(resource) = inner.available.pop_front() else {
            break;
        };
        let Some(waiter) = inner.waiters.dequeue() else {
            inner.available.push_front(resource);
            break;
        };
        if !dispatch_one(inner, resource, waiter) {
            break;
        }
    }
}

/// Hands `resource` to `waiter`. Returns `false` if the waiter had
/// already timed out (raced with dispatch): per the dispatch contract,
/// the resource goes back to available and the caller stops this pass.
fn dispatch_one<T>(inner: &mut Inner<T>, mut resource: PooledResource<T>, waiter: Waiter<T>) -> bool {
    resource.allocate();
    let id = resource.id;
    let settled = waiter.settled;
    match waiter.resolve.send(resource) {
        Ok(()) => {
            inner.loans.insert(id, Arc::new(Notify::new()));
            settled.notify_one();
            true
        }
        Err(mut returned) => {
            returned.deallocate();
            inner.available.push_front(returned);
            false
        }
    }
}

enum DispenseAction<T> {
    Create,
    Validate(PooledResource<T>),
}

fn try_reserve_create_for_shortfall<T>(inner: &mut Inner<T>, config: &PoolConfig) -> bool {
    let potentially_allocable =
        inner.available.len() + inner.in_test_borrow + inner.in_test_return + inner.creating;
    if inner.waiters.len() <= potentially_allocable {
        return false;
    }
    let spare = config.max.saturating_sub(inner.all_count + inner.creating);
    if spare == 0 {
        return false;
    }
    inner.creating += 1;
    true
}

fn trigger_dispense<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    let mut inner = shared.inner.lock().unwrap();
    if inner.dispensing || inner.waiters.is_empty() || inner.draining {
        return;
    }
    inner.dispensing = true;
    drop(inner);
    let shared = shared.clone();
    tokio::spawn(async move {
        redispense_async(&shared).await;
        shared.inner.lock().unwrap().dispensing = false;
    });
}

async fn redispense_async<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    loop {
        let action = {
            let mut inner = shared.inner.lock().unwrap();
            dispatch_locked(&mut inner, &shared.config);
            if inner.waiters.is_empty() || inner.draining {
                None
            } else if shared.config.test_on_borrow {
                if let Some(resource) = inner.available.pop_front() {
                    inner.in_test_borrow += 1;
                    Some(DispenseAction::Validate(resource))
                } else if try_reserve_create_for_shortfall(&mut inner, &shared.config) {
                    Some(DispenseAction::Create)
                } else {
                    None
                }
            } else if try_reserve_create_for_shortfall(&mut inner, &shared.config) {
                Some(DispenseAction::Create)
            } else {
                None
            }
        };
        match action {
            None => break,
            Some(DispenseAction::Create) => do_create(shared).await,
            Some(DispenseAction::Validate(resource)) => do_validate(shared, resource).await,
        }
    }
}

async fn do_create<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    match shared.factory.create().await {
        Ok(obj) => {
            let resource = PooledResource::new(obj);
            debug!(id = ?resource.id, "resource created");
            let mut inner = shared.inner.lock().unwrap();
            inner.creating -= 1;
            inner.all_count += 1;
            inner.available.push_back(resource);
            dispatch_locked(&mut inner, &shared.config);
        }
        Err(e) => {
            warn!(error = %e, "factory create failed");
            shared.listener.on_factory_create_error(&e);
            let mut inner = shared.inner.lock().unwrap();
            inner.creating -= 1;
        }
    }
}

async fn do_validate<T: Send + 'static, F: Factory<T>>(
    shared: &Arc<Shared<T, F>>,
    mut resource: PooledResource<T>,
) {
    resource.state = ResourceState::Validation;
    let ok = shared.factory.validate(&mut resource.obj).await.unwrap_or(false);
    let to_destroy = {
        let mut inner = shared.inner.lock().unwrap();
        inner.in_test_borrow -= 1;
        if ok {
            resource.state = ResourceState::Idle;
            if let Some(waiter) = inner.waiters.dequeue() {
                dispatch_one(&mut inner, resource, waiter);
            } else {
                inner.available.push_front(resource);
            }
            None
        } else {
            inner.all_count -= 1;
            Some(resource)
        }
    };
    if let Some(resource) = to_destroy {
        destroy_resource(shared, resource).await;
        ensure_minimum(shared).await;
    }
}

async fn ensure_minimum<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    loop {
        let reserved = {
            let mut inner = shared.inner.lock().unwrap();
            if inner.draining {
                false
            } else {
                let total = inner.all_count + inner.creating;
                if total < shared.config.min {
                    inner.creating += 1;
                    true
                } else {
                    false
                }
            }
        };
        if !reserved {
            break;
        }
        do_create(shared).await;
    }
}

async fn destroy_resource<T: Send + 'static, F: Factory<T>>(
    shared: &Arc<Shared<T, F>>,
    mut resource: PooledResource<T>,
) {
    resource.state = ResourceState::Invalid;
    debug!(id = ?resource.id, "destroying resource");
    let obj = resource.obj;
    // Spawned rather than awaited in place so that a timeout only makes
    // the pool stop waiting on the result — the underlying destroy call
    // keeps running to completion in the background instead of being
    // cancelled.
    let task_shared = shared.clone();
    let join = tokio::spawn(async move { task_shared.factory.destroy(obj).await });
    let result: Result<(), BoxError> = match shared.config.destroy_timeout {
        Some(d) => match time::timeout(d, join).await {
            Ok(Ok(r)) => r,
            Ok(Err(_join_err)) => Err(Box::new(DestroyTimeoutError) as BoxError),
            Err(_elapsed) => {
                warn!("destroy timed out");
                Err(Box::new(DestroyTimeoutError) as BoxError)
            }
        },
        None => match join.await {
            Ok(r) => r,
            Err(_join_err) => Ok(()),
        },
    };
    if let Err(e) = result {
        warn!(error = %e, "factory destroy failed");
        shared.listener.on_factory_destroy_error(&e);
    }
}

fn spawn_ensure_minimum<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    let shared = shared.clone();
    tokio::spawn(async move { ensure_minimum(&shared).await });
}

fn spawn_evictor<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    let Some(interval) = shared.config.eviction_run_interval else {
        return;
    };
    let shared = shared.clone();
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if shared.inner.lock().unwrap().draining {
                break;
            }
            run_eviction_tick(&shared).await;
        }
    });
}

async fn run_eviction_tick<T: Send + 'static, F: Factory<T>>(shared: &Arc<Shared<T, F>>) {
    let to_destroy: Vec<PooledResource<T>> = {
        let mut inner = shared.inner.lock().unwrap();
        let tests = shared.config.num_tests_per_eviction_run.min(inner.available.len());
        let mut to_destroy = Vec::new();
        let mut cursor = inner.available.cursor_from(inner.evict_cursor);
        let mut count = 0;
        while count < tests {
            if cursor.is_exhausted() {
                cursor = inner.available.cursor();
                if cursor.is_exhausted() {
                    break;
                }
            }
            let id = cursor.current().unwrap();
            let available_count = inner.available.len();
            let should_evict = inner
                .available
                .get(id)
                .map(|r| evictor::evict(&shared.config, r.idle_for(), available_count))
                .unwrap_or(false);
            if should_evict {
                if let Some(resource) = cursor.remove_current(inner.available.list_mut()) {
                    to_destroy.push(resource);
                }
            } else {
                cursor.advance(inner.available.list());
            }
            count += 1;
        }
        inner.evict_cursor = cursor.current();
        inner.all_count -= to_destroy.len();
        to_destroy
    };
    for resource in to_destroy {
        destroy_resource(shared, resource).await;
    }
    ensure_minimum(shared).await;
}
