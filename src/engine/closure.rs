// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-run completion handle.
//!
//! A run resolves through two gates. The **finish** gate opens once the
//! result is known: either every requested slot published (code 0) or the
//! first error sealed the run. The **flush** gate opens when no operator
//! invocations remain in flight, which is what makes teardown safe while
//! stragglers from a failed run drain. The callback cell is a three-state
//! machine (empty, installed, sealed); sealing is what makes the first
//! error win and the user callback fire exactly once.
//!
//! Both counters start at one: the run itself holds a baseline token that
//! [`ClosureContext::launch`] releases after activation, so a slot that
//! publishes mid-activation cannot finish the run before every requested
//! slot is bound.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::watch;

use crate::engine::lock;
use crate::engine::slot::Slot;
use crate::errors::codes;
use crate::observability::messages::engine::{ClosureFinished, UnfinishedData};
use crate::traits::executor::GraphExecutor;

/// User callback invoked once the run finishes.
pub type ClosureCallback = Box<dyn FnOnce(Closure) + Send + 'static>;

enum CallbackCell {
    Empty,
    Installed(ClosureCallback),
    Sealed,
}

pub struct ClosureContext {
    executor: Arc<dyn GraphExecutor>,
    error_code: AtomicI32,
    callback: StdMutex<CallbackCell>,
    waiting_data: AtomicI64,
    waiting_vertices: AtomicI64,
    finish_tx: watch::Sender<bool>,
    finish_rx: watch::Receiver<bool>,
    flush_tx: watch::Sender<bool>,
    flush_rx: watch::Receiver<bool>,
    deferred: StdMutex<Option<ClosureCallback>>,
    waiting_slots: StdMutex<Vec<Arc<Slot>>>,
}

impl ClosureContext {
    pub(crate) fn new(executor: Arc<dyn GraphExecutor>) -> Arc<Self> {
        let (finish_tx, finish_rx) = watch::channel(false);
        let (flush_tx, flush_rx) = watch::channel(false);
        Arc::new(ClosureContext {
            executor,
            error_code: AtomicI32::new(codes::SUCCESS),
            callback: StdMutex::new(CallbackCell::Empty),
            waiting_data: AtomicI64::new(1),
            waiting_vertices: AtomicI64::new(1),
            finish_tx,
            finish_rx,
            flush_tx,
            flush_rx,
            deferred: StdMutex::new(None),
            waiting_slots: StdMutex::new(Vec::new()),
        })
    }

    /// Seals the run with `code` if it is not already sealed; the first
    /// caller wins. An installed callback is dispatched through the
    /// executor, falling back to the flush phase when dispatch fails.
    pub(crate) fn finish(self: &Arc<Self>, code: i32) {
        if let Some(installed) = self.mark_finished(code) {
            if let Some(callback) = installed {
                self.dispatch(callback);
            }
        }
    }

    /// Returns `None` when already sealed, otherwise the callback that was
    /// installed (if any). The error code and finish gate are settled under
    /// the cell lock so a sealed observer always sees the final code.
    fn mark_finished(&self, code: i32) -> Option<Option<ClosureCallback>> {
        let mut cell = lock(&self.callback);
        if matches!(*cell, CallbackCell::Sealed) {
            return None;
        }
        let prior = std::mem::replace(&mut *cell, CallbackCell::Sealed);
        self.error_code.store(code, Ordering::Relaxed);
        let _ = self.finish_tx.send(true);
        tracing::debug!("{}", ClosureFinished { code });
        match prior {
            CallbackCell::Installed(callback) => Some(Some(callback)),
            _ => Some(None),
        }
    }

    fn dispatch(self: &Arc<Self>, callback: ClosureCallback) {
        if let Err(callback) = self.executor.submit_callback(self.clone(), callback) {
            tracing::warn!("callback dispatch failed, deferring to flush");
            *lock(&self.deferred) = Some(callback);
        }
    }

    /// Runs a callback against this context; executors call this from the
    /// task they scheduled for it.
    pub fn run_callback(self: &Arc<Self>, callback: ClosureCallback) {
        callback(Closure::new(self.clone()));
    }

    /// Releases the baseline tokens held during activation. Called once the
    /// initial drain completed; from here on the counters alone decide when
    /// the run finishes and flushes.
    pub(crate) fn launch(self: &Arc<Self>) {
        self.data_published();
        self.vertex_retired();
    }

    pub(crate) fn depend_data_add(&self) {
        self.waiting_data.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn add_waiting_slot(&self, slot: Arc<Slot>) {
        lock(&self.waiting_slots).push(slot);
    }

    /// One requested slot published; the last one finishes the run with
    /// success.
    pub(crate) fn data_published(self: &Arc<Self>) {
        if self.waiting_data.fetch_sub(1, Ordering::AcqRel) - 1 == 0 {
            self.finish(codes::SUCCESS);
        }
    }

    pub(crate) fn depend_vertex_add(&self) {
        self.waiting_vertices.fetch_add(1, Ordering::AcqRel);
    }

    /// One operator invocation retired. When the last vertex retires with
    /// the run still unsealed, the requested data is unreachable: seal with
    /// an error and log the dependency frontier. Either way the flush gate
    /// opens and any deferred callback runs.
    pub(crate) fn vertex_retired(self: &Arc<Self>) {
        if self.waiting_vertices.fetch_sub(1, Ordering::AcqRel) - 1 == 0 {
            if let Some(installed) = self.mark_finished(codes::UNFINISHED) {
                self.log_unfinished_data();
                if let Some(callback) = installed {
                    self.dispatch(callback);
                }
            }
            let deferred = lock(&self.deferred).take();
            let _ = self.flush_tx.send(true);
            if let Some(callback) = deferred {
                self.run_callback(callback);
            }
        }
    }

    pub(crate) fn on_finish(self: &Arc<Self>, callback: ClosureCallback) {
        let run_now = {
            let mut cell = lock(&self.callback);
            match &*cell {
                CallbackCell::Sealed => Some(callback),
                _ => {
                    *cell = CallbackCell::Installed(callback);
                    None
                }
            }
        };
        if let Some(callback) = run_now {
            self.run_callback(callback);
        }
    }

    pub(crate) fn finished(&self) -> bool {
        *self.finish_rx.borrow()
    }

    pub(crate) fn error_code(&self) -> i32 {
        self.error_code.load(Ordering::Relaxed)
    }

    pub(crate) async fn get(&self) -> i32 {
        let mut rx = self.finish_rx.clone();
        let _ = rx.wait_for(|finished| *finished).await;
        self.error_code()
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.flush_rx.clone();
        let _ = rx.wait_for(|flushed| *flushed).await;
    }

    /// Walks upward from each unready requested slot to find the frontier:
    /// slots whose producer has every dependency ready yet never published,
    /// and roots nobody produces.
    fn log_unfinished_data(&self) {
        let mut pending: Vec<Arc<Slot>> = lock(&self.waiting_slots)
            .iter()
            .filter(|slot| !slot.ready())
            .cloned()
            .collect();
        let mut checked: HashSet<usize> = HashSet::new();
        let mut culprits: Vec<String> = Vec::new();

        while let Some(slot) = pending.pop() {
            if slot.ready() {
                continue;
            }
            let producer = match slot.producer() {
                Some(producer) => producer,
                None => {
                    culprits.push(format!("{} (no producer)", slot.name()));
                    continue;
                }
            };
            let mut dependencies_ready = true;
            for dependency in producer.dependencies() {
                if let Some(condition) = dependency.condition() {
                    if !condition.ready() {
                        dependencies_ready = false;
                        if checked.insert(condition.index()) {
                            pending.push(condition.clone());
                        }
                        continue;
                    }
                }
                if !dependency.target().ready() {
                    dependencies_ready = false;
                    if checked.insert(dependency.target().index()) {
                        pending.push(dependency.target().clone());
                    }
                }
            }
            if dependencies_ready {
                culprits.push(slot.name().to_string());
            }
        }
        tracing::warn!("{}", UnfinishedData { slots: &culprits });
    }
}

/// The user-facing completion handle returned by `Graph::run`.
///
/// `get` resolves when the result is known; `wait` additionally waits for
/// every in-flight operator to retire. The installed callback runs exactly
/// once, after finish and possibly before flush.
pub struct Closure {
    context: Arc<ClosureContext>,
}

impl Closure {
    pub(crate) fn new(context: Arc<ClosureContext>) -> Self {
        Closure { context }
    }

    pub fn finished(&self) -> bool {
        self.context.finished()
    }

    /// Awaits the finish gate and returns the run's error code; zero is
    /// success.
    pub async fn get(&self) -> i32 {
        self.context.get().await
    }

    /// Awaits the flush gate: no operator invocations remain in flight.
    pub async fn wait(&self) {
        self.context.wait().await
    }

    pub fn error_code(&self) -> i32 {
        self.context.error_code()
    }

    /// Installs a callback to run once the closure finishes. If the run
    /// already finished, the callback runs inline.
    pub fn on_finish<F>(&self, callback: F)
    where
        F: FnOnce(Closure) + Send + 'static,
    {
        self.context.on_finish(Box::new(callback));
    }
}

impl Clone for Closure {
    fn clone(&self) -> Self {
        Closure {
            context: self.context.clone(),
        }
    }
}
