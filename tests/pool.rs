//! Scenario tests mirroring the pool's external contract: priority
//! ordering, idle eviction, drain/clear shutdown, creation retries,
//! invalid release, and both flavors of timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use respool::error::BoxError;
use respool::{Factory, Pool, PoolConfig, PoolError, PoolListener};

/// A trivial resource factory handing out increasing integers, with
/// knobs for simulating slow or failing creation/destruction.
struct CounterFactory {
    next_id: AtomicUsize,
    fail_first_n_creates: AtomicUsize,
    create_delay: Duration,
    destroy_delay: Duration,
}

impl CounterFactory {
    fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
            fail_first_n_creates: AtomicUsize::new(0),
            create_delay: Duration::ZERO,
            destroy_delay: Duration::ZERO,
        }
    }

    fn failing(n: usize) -> Self {
        Self { fail_first_n_creates: AtomicUsize::new(n), ..Self::new() }
    }

    fn slow_create(delay: Duration) -> Self {
        Self { create_delay: delay, ..Self::new() }
    }

    fn slow_destroy(delay: Duration) -> Self {
        Self { destroy_delay: delay, ..Self::new() }
    }
}

#[async_trait]
impl Factory<usize> for CounterFactory {
    async fn create(&self) -> Result<usize, BoxError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let remaining = self.fail_first_n_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first_n_creates.fetch_sub(1, Ordering::SeqCst);
            return Err("simulated create failure".into());
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _obj: usize) -> Result<(), BoxError> {
        if !self.destroy_delay.is_zero() {
            tokio::time::sleep(self.destroy_delay).await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct CountingListener {
    create_errors: AtomicUsize,
    destroy_errors: AtomicUsize,
}

impl PoolListener for CountingListener {
    fn on_factory_create_error(&self, _err: &BoxError) {
        self.create_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_factory_destroy_error(&self, _err: &BoxError) {
        self.destroy_errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn basic_acquire_release_round_trip() {
    let pool = Pool::new(CounterFactory::new(), PoolConfig::bounded(2)).unwrap();
    let guard = pool.acquire(None).await.unwrap();
    assert_eq!(*guard, 0);
    assert_eq!(pool.borrowed(), 1);
    pool.release(guard).await.unwrap();
    assert_eq!(pool.borrowed(), 0);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn priority_ordering_serves_lower_slot_first() {
    let config = PoolConfig::bounded(1).with_priority_range(2);
    let pool = Pool::new(CounterFactory::new(), config).unwrap();

    let seq = Arc::new(AtomicUsize::new(0));
    let completions: Arc<Mutex<Vec<(i64, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let priority = if i < 10 { 1 } else { 0 };
        let pool = pool.clone();
        let seq = seq.clone();
        let completions = completions.clone();
        handles.push(tokio::spawn(async move {
            let guard = pool.acquire(Some(priority)).await.unwrap();
            pool.release(guard).await.unwrap();
            let n = seq.fetch_add(1, Ordering::SeqCst);
            completions.lock().unwrap().push((priority, n));
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), 20);
    let last_p0 = completions.iter().filter(|(p, _)| *p == 0).map(|(_, n)| *n).max().unwrap();
    let last_p1 = completions.iter().filter(|(p, _)| *p == 1).map(|(_, n)| *n).max().unwrap();
    assert!(last_p0 <= last_p1, "priority 0 waiters must all finish before priority 1 waiters");
}

#[tokio::test]
async fn idle_resources_are_evicted_and_replaced() {
    let config = PoolConfig::bounded(2)
        .with_min(2)
        .with_idle_timeout(Duration::from_millis(50))
        .with_eviction_run_interval(Duration::from_millis(10));
    let pool = Pool::new(CounterFactory::new(), config).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    let guard = pool.acquire(None).await.unwrap();
    assert!(*guard >= 2, "expected a replacement resource, got id {}", *guard);
}

#[tokio::test]
async fn drain_then_clear_then_acquire_rejects() {
    let config = PoolConfig::bounded(2);
    let pool = Pool::new(CounterFactory::new(), config).unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let guard = pool.acquire(None).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            pool.release(guard).await.unwrap();
        }));
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.drain().await;
    pool.clear().await;

    for h in handles {
        let _ = h.await;
    }

    match pool.acquire(None).await {
        Err(PoolError::PoolDraining) => {}
        other => panic!("expected PoolDraining, got {other:?}"),
    }
}

#[tokio::test]
async fn creation_retries_until_factory_succeeds() {
    let listener = Arc::new(CountingListener::default());
    let pool = Pool::with_listener(
        CounterFactory::failing(4),
        PoolConfig::bounded(1),
        listener.clone(),
    )
    .unwrap();

    let guard = pool.acquire(None).await.unwrap();
    assert_eq!(*guard, 0);
    assert_eq!(listener.create_errors.load(Ordering::SeqCst), 4);
    assert_eq!(pool.pending(), 0);
}

#[tokio::test]
async fn release_into_wrong_pool_is_rejected_and_resource_survives() {
    let pool_a = Pool::new(CounterFactory::new(), PoolConfig::bounded(1)).unwrap();
    let pool_b = Pool::new(CounterFactory::new(), PoolConfig::bounded(1)).unwrap();

    let guard = pool_a.acquire(None).await.unwrap();
    assert_eq!(pool_a.borrowed(), 1);

    let err = pool_b.release(guard).await.unwrap_err();
    assert!(matches!(err, PoolError::ResourceNotInPool));

    // pool_a's bookkeeping is untouched by the failed cross-pool release.
    assert_eq!(pool_a.borrowed(), 1);
    assert_eq!(pool_a.available(), 0);
}

#[tokio::test]
async fn acquire_times_out_when_factory_is_slow() {
    let config = PoolConfig::bounded(1).with_acquire_timeout(Duration::from_millis(20));
    let pool = Pool::new(CounterFactory::slow_create(Duration::from_millis(100)), config).unwrap();

    let err = pool.acquire(None).await.unwrap_err();
    assert!(matches!(err, PoolError::AcquireTimeout));

    pool.drain().await;
    pool.clear().await;
}

#[tokio::test]
async fn destroy_timeout_is_reported_as_an_event() {
    let config = PoolConfig::bounded(1).with_destroy_timeout(Duration::from_millis(20));
    let listener = Arc::new(CountingListener::default());
    let pool = Pool::with_listener(
        CounterFactory::slow_destroy(Duration::from_millis(100)),
        config,
        listener.clone(),
    )
    .unwrap();

    let guard = pool.acquire(None).await.unwrap();
    pool.destroy(guard).await.unwrap();

    assert_eq!(listener.destroy_errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_max_waiting_clients_rejects_once_full() {
    let config = PoolConfig::bounded(2).with_max_waiting_clients(0);
    let pool = Pool::new(CounterFactory::new(), config).unwrap();

    let _g1 = pool.acquire(None).await.unwrap();
    let _g2 = pool.acquire(None).await.unwrap();

    let err = pool.acquire(None).await.unwrap_err();
    assert!(matches!(err, PoolError::MaxWaitersExceeded));
    assert_eq!(err.to_string(), "max waitingClients count exceeded");
}
