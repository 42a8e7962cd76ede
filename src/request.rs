//! A value-or-timeout promise: the waiting half of an `acquire()` call.
//!
//! This replaces the Deferred/promise-coroutine pattern with an explicit
//! completion channel plus a settlement notifier, per the design note
//! that a compare-and-set state machine is the natural translation of
//! PENDING → FULFILLED/REJECTED in a language with real sum types.

use std::sync::Arc;

use tokio::sync::{oneshot, Notify};

/// The pool's half of a pending request: a one-shot resolver plus a
/// settlement signal drain() can watch without consuming the resolver.
pub struct ResourceRequest<T> {
    pub(crate) resolve: oneshot::Sender<T>,
    pub(crate) settled: Arc<Notify>,
}

/// The caller's half: what `acquire()` actually awaits.
pub struct Awaiting<T> {
    pub(crate) receiver: oneshot::Receiver<T>,
    pub(crate) settled: Arc<Notify>,
}

/// Creates a linked pair: the pool enqueues the `ResourceRequest`, the
/// caller awaits the `Awaiting`.
pub fn new_request<T>() -> (ResourceRequest<T>, Awaiting<T>) {
    let (tx, rx) = oneshot::channel();
    let settled = Arc::new(Notify::new());
    (
        ResourceRequest { resolve: tx, settled: settled.clone() },
        Awaiting { receiver: rx, settled },
    )
}

impl<T> Awaiting<T> {
    pub fn settled_signal(&self) -> Arc<Notify> {
        self.settled.clone()
    }
}
