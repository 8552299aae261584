use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::vertex::Vertex;

/// The operator contract realized by every computation wired into a graph.
///
/// Operators are stateless across runs in principle: one instance may serve
/// many vertices and be invoked concurrently, so implementations must be
/// reentrant. Per-invocation state belongs in the vertex context, set up
/// once in `setup`.
///
/// All hooks report failure through nonzero codes, which terminate the
/// build (`setup`) or the run (everything else). Expected, in-band failures
/// should publish empty emits instead of returning an error.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Called exactly once per built vertex. Declare slot types and
    /// channels, validate arity, mark the vertex trivial, and prepare the
    /// vertex context here.
    fn setup(&self, vertex: &Arc<Vertex>) -> i32 {
        let _ = vertex;
        0
    }

    /// Called when the vertex is activated, before it starts waiting on its
    /// edges. Forwarding operators mirror downstream mutability demand onto
    /// their upstream dependencies here.
    fn on_activate(&self, vertex: &Arc<Vertex>) -> i32 {
        let _ = vertex;
        0
    }

    /// Synchronous computation. This is the form the trivial fast path runs
    /// inline, and the default async form delegates here.
    fn process(&self, vertex: &Arc<Vertex>) -> i32 {
        let _ = vertex;
        0
    }

    /// Asynchronous computation for operators that await. The default
    /// delegates to the synchronous form. Operators needing detached
    /// completion can spawn and await their own tasks.
    async fn process_async(&self, vertex: Arc<Vertex>) -> i32 {
        self.process(&vertex)
    }

    /// Called during `Graph::reset` to clear per-run operator state.
    fn reset(&self, vertex: &Arc<Vertex>) {
        let _ = vertex;
    }
}
