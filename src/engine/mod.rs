// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod channel;
pub mod closure;
pub mod dependency;
pub mod executor;
pub mod graph;
pub mod slot;
pub mod value;
pub mod vertex;

#[cfg(test)]
mod integration_tests;

pub use channel::{Channel, ChannelConsumer, ChannelPublisher, InputChannel, MutableInputChannel, OutputChannel};
pub use closure::{Closure, ClosureCallback, ClosureContext};
pub use dependency::{Dependency, EssentialLevel};
pub use executor::TokioExecutor;
pub use graph::Graph;
pub use slot::{Committer, OutputData, Slot};
pub use value::{AnyValue, Scalar, SharedValue, SlotValue, ValueMut, ValueRef};
pub use vertex::{Vertex, VertexClosure};

/// Poison-tolerant mutex lock.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
