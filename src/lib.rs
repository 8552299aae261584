// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Trellis: a dataflow graph execution engine.
//!
//! Applications wire computation as a DAG of operator vertices connected
//! through named data slots, then evaluate arbitrary subsets of the graph
//! on demand. Activation walks backward from the requested slots using
//! lock-free edge-triggered counters, execution fans ready vertices out
//! across a tokio-backed worker pool (trivial operators run inline), and a
//! per-run closure resolves exactly once with the result.

pub mod builder;       // wiring specs, linking, operator registry
pub mod engine;        // slots, edges, vertices, graph, closure, channels
pub mod errors;        // build errors and runtime error codes
pub mod interface;     // declarative operator IO macro
pub mod observability; // structured log messages
pub mod traits;        // operator and executor contracts
