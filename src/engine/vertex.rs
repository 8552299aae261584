// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Vertices: operator invocation sites with their wired edges.
//!
//! A vertex owns its dependency edges and references its emit slots. At run
//! time it is activated at most once, counts down its unresolved edges with
//! an atomic, and is invoked when the count reaches zero. Trivial vertices
//! run inline in whichever thread resolved their last edge; everything else
//! is handed to the executor with a [`VertexClosure`] token that keeps the
//! run's vertex accounting balanced no matter how the operator exits.

use std::any::Any as StdAny;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, OnceLock, Weak};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::engine::closure::ClosureContext;
use crate::engine::dependency::{Dependency, EssentialLevel};
use crate::engine::graph::GraphContexts;
use crate::engine::lock;
use crate::engine::slot::Slot;
use crate::errors::codes;
use crate::observability::messages::engine::{EssentialDependencyMissing, VertexDone};
use crate::traits::executor::GraphExecutor;
use crate::traits::operator::Operator;

/// Type-erased per-vertex or per-graph payload storage.
pub type ContextStorage = Option<Box<dyn StdAny + Send + Sync>>;

/// Owned read access to a context payload.
pub type ContextRef<T> = OwnedRwLockReadGuard<ContextStorage, T>;

/// Owned write access to a context payload.
pub type ContextMut<T> = tokio::sync::OwnedRwLockMappedWriteGuard<ContextStorage, T>;

pub(crate) fn context_read<T: 'static>(cell: &Arc<RwLock<ContextStorage>>) -> Option<ContextRef<T>> {
    let guard = cell.clone().try_read_owned().ok()?;
    OwnedRwLockReadGuard::try_map(guard, |payload| payload.as_ref()?.downcast_ref::<T>()).ok()
}

pub(crate) fn context_write<T: Default + Send + Sync + 'static>(
    cell: &Arc<RwLock<ContextStorage>>,
) -> Option<ContextMut<T>> {
    let mut guard = cell.clone().try_write_owned().ok()?;
    if guard.as_ref().map_or(true, |payload| !payload.is::<T>()) {
        *guard = Some(Box::new(T::default()));
    }
    OwnedRwLockWriteGuard::try_map(guard, |payload| payload.as_mut()?.downcast_mut::<T>()).ok()
}

/// Scoped token accounting for one operator invocation. Created when a
/// vertex is dispatched; its drop retires the vertex on the closure, so the
/// pending-vertex count stays balanced even when an operator bails out
/// early. A nonzero code reported through `done` terminates the run.
pub struct VertexClosure {
    closure: Option<Arc<ClosureContext>>,
    vertex: usize,
}

impl VertexClosure {
    pub(crate) fn new(closure: Arc<ClosureContext>, vertex: &Vertex) -> Self {
        closure.depend_vertex_add();
        VertexClosure {
            closure: Some(closure),
            vertex: vertex.index(),
        }
    }

    pub fn done(&mut self, code: i32) {
        if let Some(closure) = self.closure.take() {
            tracing::debug!("{}", VertexDone { vertex: self.vertex, code });
            if code != codes::SUCCESS {
                closure.finish(code);
            }
            closure.vertex_retired();
        }
    }
}

impl Drop for VertexClosure {
    fn drop(&mut self) {
        self.done(codes::SUCCESS);
    }
}

pub struct Vertex {
    index: usize,
    name: String,
    operator: Arc<dyn Operator>,
    option: Option<Arc<dyn StdAny + Send + Sync>>,
    executor: Arc<dyn GraphExecutor>,

    dependencies: Vec<Arc<Dependency>>,
    emits: Vec<Arc<Slot>>,
    dependency_names: Arc<HashMap<String, usize>>,
    emit_names: Arc<HashMap<String, usize>>,
    anonymous_dependency_offset: usize,
    anonymous_emit_offset: usize,

    context: Arc<RwLock<ContextStorage>>,
    graph_contexts: OnceLock<Arc<GraphContexts>>,
    trivial: AtomicBool,

    activated: AtomicBool,
    waiting: AtomicI64,
    closure: StdMutex<Option<Arc<ClosureContext>>>,
    collector: StdMutex<Option<Vec<Arc<Vertex>>>>,
    run_log: StdMutex<String>,
}

impl Vertex {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_cyclic<F>(
        index: usize,
        name: String,
        operator: Arc<dyn Operator>,
        option: Option<Arc<dyn StdAny + Send + Sync>>,
        executor: Arc<dyn GraphExecutor>,
        dependency_names: Arc<HashMap<String, usize>>,
        emit_names: Arc<HashMap<String, usize>>,
        anonymous_dependency_offset: usize,
        anonymous_emit_offset: usize,
        emits: Vec<Arc<Slot>>,
        make_dependencies: F,
    ) -> Arc<Self>
    where
        F: FnOnce(&Weak<Vertex>) -> Vec<Arc<Dependency>>,
    {
        Arc::new_cyclic(|weak| Vertex {
            index,
            name,
            operator,
            option,
            executor,
            dependencies: make_dependencies(weak),
            emits,
            dependency_names,
            emit_names,
            anonymous_dependency_offset,
            anonymous_emit_offset,
            context: Arc::new(RwLock::new(None)),
            graph_contexts: OnceLock::new(),
            trivial: AtomicBool::new(false),
            activated: AtomicBool::new(false),
            waiting: AtomicI64::new(0),
            closure: StdMutex::new(None),
            collector: StdMutex::new(None),
            run_log: StdMutex::new(String::new()),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Named dependency lookup; best practice is resolving once in `setup`
    /// and caching the handle in the vertex context.
    pub fn named_dependency(&self, name: &str) -> Option<Arc<Dependency>> {
        let index = *self.dependency_names.get(name)?;
        self.dependencies.get(index).cloned()
    }

    /// Anonymous dependency by declaration order.
    pub fn anonymous_dependency(&self, index: usize) -> Option<Arc<Dependency>> {
        self.dependencies
            .get(self.anonymous_dependency_offset + index)
            .cloned()
    }

    pub fn anonymous_dependency_size(&self) -> usize {
        self.dependencies.len() - self.anonymous_dependency_offset
    }

    pub fn dependencies(&self) -> &[Arc<Dependency>] {
        &self.dependencies
    }

    pub fn named_emit(&self, name: &str) -> Option<Arc<Slot>> {
        let index = *self.emit_names.get(name)?;
        self.emits.get(index).cloned()
    }

    pub fn anonymous_emit(&self, index: usize) -> Option<Arc<Slot>> {
        self.emits.get(self.anonymous_emit_offset + index).cloned()
    }

    pub fn anonymous_emit_size(&self) -> usize {
        self.emits.len() - self.anonymous_emit_offset
    }

    pub fn emits(&self) -> &[Arc<Slot>] {
        &self.emits
    }

    /// Read-only operator configuration set on the vertex spec.
    pub fn option<T: 'static>(&self) -> Option<&T> {
        self.option.as_ref()?.downcast_ref::<T>()
    }

    /// Per-vertex scratch payload, scoped to one graph instance and kept
    /// across runs. Single-threaded within a run.
    pub fn context<T: 'static>(&self) -> Option<ContextRef<T>> {
        context_read(&self.context)
    }

    pub fn context_mut<T: Default + Send + Sync + 'static>(&self) -> Option<ContextMut<T>> {
        context_write(&self.context)
    }

    /// Seeds the vertex context with a prepared payload, replacing whatever
    /// was there. Intended for `setup`.
    pub fn init_context<T: Send + Sync + 'static>(&self, payload: T) -> bool {
        match self.context.try_write() {
            Ok(mut guard) => {
                *guard = Some(Box::new(payload));
                true
            }
            Err(_) => false,
        }
    }

    /// Graph-wide read-only context, seeded through the graph before runs.
    pub fn graph_context<T: 'static>(&self) -> Option<ContextRef<T>> {
        context_read(self.graph_contexts.get()?.read_only())
    }

    /// Graph-wide mutable context.
    pub fn graph_context_mut<T: Default + Send + Sync + 'static>(&self) -> Option<ContextMut<T>> {
        context_write(self.graph_contexts.get()?.mutable())
    }

    /// Marks the operator cheap enough to run inline on the invoking thread
    /// instead of going through the executor.
    pub fn set_trivial(&self, trivial: bool) {
        self.trivial.store(trivial, Ordering::Relaxed);
    }

    pub fn is_trivial(&self) -> bool {
        self.trivial.load(Ordering::Relaxed)
    }

    pub fn activated(&self) -> bool {
        self.activated.load(Ordering::Relaxed)
    }

    /// Appends to the vertex run log, collected graph-wide after the run.
    /// Cleared on reset.
    pub fn log_append(&self, message: &str) {
        lock(&self.run_log).push_str(message);
    }

    pub fn log_snapshot(&self) -> String {
        lock(&self.run_log).clone()
    }

    pub(crate) fn closure(&self) -> Option<Arc<ClosureContext>> {
        lock(&self.closure).clone()
    }

    pub(crate) fn set_graph_contexts(&self, contexts: Arc<GraphContexts>) {
        let _ = self.graph_contexts.set(contexts);
    }

    pub(crate) fn setup(self: &Arc<Self>) -> i32 {
        self.operator.setup(self)
    }

    pub(crate) fn reset(self: &Arc<Self>) {
        self.activated.store(false, Ordering::Relaxed);
        self.waiting.store(0, Ordering::Relaxed);
        *lock(&self.closure) = None;
        *lock(&self.collector) = None;
        lock(&self.run_log).clear();
        for dependency in &self.dependencies {
            dependency.reset();
        }
        self.operator.reset(self);
    }

    /// Activates the vertex once per run: record the closure, start waiting
    /// on every edge, and settle the count of edges that were already
    /// satisfied. Vertices with nothing left to wait on land in `runnable`.
    pub(crate) fn activate(
        self: &Arc<Self>,
        pending: &mut Vec<Arc<Slot>>,
        runnable: &mut Vec<Arc<Vertex>>,
        closure: &Arc<ClosureContext>,
    ) -> Result<(), i32> {
        if self
            .activated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return Ok(());
        }
        tracing::trace!(vertex = self.index, "activating vertex");
        *lock(&self.closure) = Some(closure.clone());

        let edge_count = self.dependencies.len() as i64;
        if edge_count == 0 {
            runnable.push(self.clone());
            return Ok(());
        }
        self.waiting.store(edge_count, Ordering::Relaxed);

        let code = self.operator.on_activate(self);
        if code != codes::SUCCESS {
            tracing::warn!(vertex = self.index, code, "on_activate rejected activation");
            return Err(code);
        }

        let mut satisfied = 0;
        for dependency in &self.dependencies {
            satisfied += dependency.activate(pending)?;
        }
        if satisfied > 0 {
            let post = self.waiting.fetch_sub(satisfied, Ordering::AcqRel) - satisfied;
            if post <= 0 {
                runnable.push(self.clone());
            }
        }
        Ok(())
    }

    /// One edge resolved; true when it was the last one.
    pub(crate) fn dependency_resolved(&self) -> bool {
        self.waiting.fetch_sub(1, Ordering::AcqRel) - 1 == 0
    }

    pub(crate) fn inline_collector(&self) -> MutexGuard<'_, Option<Vec<Arc<Vertex>>>> {
        lock(&self.collector)
    }

    fn begin_inline_collect(&self) {
        *lock(&self.collector) = Some(Vec::new());
    }

    fn finish_inline_collect(&self, runnable: &mut Vec<Arc<Vertex>>) {
        if let Some(pending) = lock(&self.collector).take() {
            runnable.extend(pending);
        }
    }

    /// Dispatches the vertex once all edges resolved. Applies the essential
    /// policy, then runs trivial operators inline (collecting follow-on
    /// runnables for the caller's drain loop) and submits everything else to
    /// the executor.
    pub(crate) fn invoke(self: &Arc<Self>, runnable: &mut Vec<Arc<Vertex>>) {
        let closure = match self.closure() {
            Some(closure) => closure,
            None => return,
        };

        let mut skip = false;
        for dependency in &self.dependencies {
            let missing = !dependency.ready() || dependency.is_empty();
            if !missing {
                continue;
            }
            match dependency.essential_level() {
                EssentialLevel::Required => {
                    tracing::warn!(
                        "{}",
                        EssentialDependencyMissing {
                            vertex: self.index,
                            slot: dependency.target().name(),
                        }
                    );
                    closure.finish(codes::ESSENTIAL_MISSING);
                    return;
                }
                EssentialLevel::SkipIfEmpty => skip = true,
                EssentialLevel::Optional => {}
            }
        }

        if skip {
            tracing::trace!(vertex = self.index, "skipping vertex, publishing empty emits");
            self.begin_inline_collect();
            for emit in &self.emits {
                emit.release_empty();
            }
            self.finish_inline_collect(runnable);
            return;
        }

        if self.is_trivial() {
            tracing::trace!(vertex = self.index, "running trivial vertex inline");
            self.begin_inline_collect();
            let mut token = VertexClosure::new(closure, self);
            let code = self.operator.process(self);
            token.done(code);
            self.finish_inline_collect(runnable);
        } else {
            tracing::trace!(vertex = self.index, "submitting vertex to executor");
            let token = VertexClosure::new(closure, self);
            self.executor.submit_vertex(self.clone(), token);
        }
    }

    /// Entry point used by executors: drives the async operator form and
    /// reports its code through the token.
    pub async fn run(self: Arc<Self>, mut token: VertexClosure) {
        let operator = self.operator.clone();
        let code = operator.process_async(self.clone()).await;
        token.done(code);
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies.len())
            .field("emits", &self.emits.len())
            .finish()
    }
}
