use std::sync::Arc;

use crate::engine::closure::{ClosureCallback, ClosureContext};
use crate::engine::vertex::{Vertex, VertexClosure};

/// Pluggable scheduler for operator invocations and closure callbacks.
///
/// The engine hands over a vertex together with its accounting token; the
/// executor must eventually drive [`Vertex::run`] with it. Trivial vertices
/// bypass the executor entirely.
pub trait GraphExecutor: Send + Sync {
    fn submit_vertex(&self, vertex: Arc<Vertex>, token: VertexClosure);

    /// Schedules a user finish callback. Returning the callback signals
    /// dispatch failure; the closure then runs it during the flush phase.
    fn submit_callback(
        &self,
        context: Arc<ClosureContext>,
        callback: ClosureCallback,
    ) -> Result<(), ClosureCallback>;
}
