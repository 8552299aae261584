// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Executable graph instances.
//!
//! A graph is an immutable wiring plus mutable per-run state. `run` walks
//! backward from the requested slots, activating every producer the request
//! transitively needs, then drains the initially runnable vertices; from
//! there execution is driven entirely by slot publications. The same graph
//! can be reset and rerun, and several graphs can be built from one
//! finished builder.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::engine::closure::{Closure, ClosureContext};
use crate::engine::slot::Slot;
use crate::engine::vertex::{
    context_read, context_write, ContextMut, ContextRef, ContextStorage, Vertex,
};
use crate::observability::messages::engine::RunRequested;
use crate::traits::executor::GraphExecutor;

/// Graph-wide payloads shared with every vertex: a read-only context seeded
/// before runs and a mutable context operators may update.
#[derive(Default)]
pub struct GraphContexts {
    read_only: Arc<RwLock<ContextStorage>>,
    mutable: Arc<RwLock<ContextStorage>>,
}

impl GraphContexts {
    pub(crate) fn read_only(&self) -> &Arc<RwLock<ContextStorage>> {
        &self.read_only
    }

    pub(crate) fn mutable(&self) -> &Arc<RwLock<ContextStorage>> {
        &self.mutable
    }
}

pub struct Graph {
    executor: Arc<dyn GraphExecutor>,
    vertices: Vec<Arc<Vertex>>,
    slots: Vec<Arc<Slot>>,
    slots_by_name: HashMap<String, usize>,
    contexts: Arc<GraphContexts>,
}

impl Graph {
    pub(crate) fn new(
        executor: Arc<dyn GraphExecutor>,
        vertices: Vec<Arc<Vertex>>,
        slots: Vec<Arc<Slot>>,
        slots_by_name: HashMap<String, usize>,
        contexts: Arc<GraphContexts>,
    ) -> Self {
        Graph {
            executor,
            vertices,
            slots,
            slots_by_name,
            contexts,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Finds a slot by its symbolic name, for presetting values or
    /// requesting outputs.
    pub fn find_slot(&self, name: &str) -> Option<Arc<Slot>> {
        self.slots_by_name
            .get(name)
            .and_then(|index| self.slots.get(*index))
            .cloned()
    }

    pub fn for_each_vertex<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Vertex>),
    {
        for vertex in &self.vertices {
            f(vertex);
        }
    }

    /// Seeds the read-only graph context available to operators.
    pub fn set_context<T: Send + Sync + 'static>(&self, value: T) {
        if let Ok(mut guard) = self.contexts.read_only().try_write() {
            *guard = Some(Box::new(value));
        }
    }

    pub fn context<T: 'static>(&self) -> Option<ContextRef<T>> {
        context_read(self.contexts.read_only())
    }

    pub fn mutable_context<T: Default + Send + Sync + 'static>(&self) -> Option<ContextMut<T>> {
        context_write(self.contexts.mutable())
    }

    /// Evaluates the graph for the given requested slots and returns the
    /// run's closure. Slots that are already published are not waited on.
    /// The run is asynchronous; the closure resolves when every requested
    /// slot published or an error sealed it.
    ///
    /// A graph must not be rerun before `reset`, and `reset` must not race
    /// a run in flight.
    pub fn run(&self, requested: &[Arc<Slot>]) -> Closure {
        tracing::debug!(
            "{}",
            RunRequested {
                slots: requested.len(),
            }
        );
        let context = ClosureContext::new(self.executor.clone());
        let mut runnable: Vec<Arc<Vertex>> = Vec::new();
        for slot in requested {
            if !slot.bind(&context) {
                continue;
            }
            if let Err(code) = slot.recursive_activate(&mut runnable, &context) {
                tracing::warn!(slot = %slot.name(), code, "activation failed");
                context.finish(code);
                context.launch();
                return Closure::new(context);
            }
        }

        while let Some(vertex) = runnable.pop() {
            vertex.invoke(&mut runnable);
        }
        context.launch();
        Closure::new(context)
    }

    /// Concatenates every non-empty vertex run log, in vertex order. Useful
    /// for attaching per-run operator notes to request logs.
    pub fn collect_run_logs(&self) -> String {
        let mut collected = String::new();
        for vertex in &self.vertices {
            let log = vertex.log_snapshot();
            if !log.is_empty() {
                collected.push_str(&log);
            }
        }
        collected
    }

    /// Clears all per-run state while keeping wiring, contexts, and value
    /// storage. Must not be called while a run is in flight.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.reset();
        }
        for vertex in &self.vertices {
            vertex.reset();
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("vertices", &self.vertices.len())
            .field("slots", &self.slots.len())
            .finish()
    }
}
