//! Reference executor on the tokio runtime.
//!
//! Non-trivial vertices and closure callbacks are spawned as tasks, so
//! operators may suspend on `tokio::sync` primitives without parking an OS
//! thread. Trivial vertices never reach the executor; the engine runs them
//! inline on the invoking thread.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::engine::closure::{ClosureCallback, ClosureContext};
use crate::engine::vertex::{Vertex, VertexClosure};
use crate::traits::executor::GraphExecutor;

pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Binds to the current runtime; `None` outside of one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(|handle| TokioExecutor { handle })
    }

    pub fn with_handle(handle: Handle) -> Self {
        TokioExecutor { handle }
    }
}

impl GraphExecutor for TokioExecutor {
    fn submit_vertex(&self, vertex: Arc<Vertex>, token: VertexClosure) {
        self.handle.spawn(vertex.run(token));
    }

    fn submit_callback(
        &self,
        context: Arc<ClosureContext>,
        callback: ClosureCallback,
    ) -> Result<(), ClosureCallback> {
        self.handle.spawn(async move {
            context.run_callback(callback);
        });
        Ok(())
    }
}
