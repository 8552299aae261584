// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors surfaced by the build/link phase.
//!
//! Runtime failures never use these types; they travel as `i32` error codes
//! through the closure (see [`crate::errors::codes`]).

use thiserror::Error;

/// Structural errors detected while linking a builder or materializing a
/// graph from it.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Two vertices both declared an emit to the same slot.
    #[error("slot '{slot}' already produced by vertex[{previous}], conflicting emit from vertex[{vertex}]")]
    DuplicateProducer {
        slot: String,
        vertex: usize,
        previous: usize,
    },

    /// A vertex referenced an operator name the registry does not know.
    #[error("vertex[{vertex}] references unknown operator '{name}'")]
    UnknownOperator { vertex: usize, name: String },

    /// A vertex was added without an operator instance or name.
    #[error("vertex[{vertex}] has no operator bound")]
    MissingOperator { vertex: usize },

    /// An operator's `setup` hook rejected the wiring.
    #[error("operator setup failed for vertex[{vertex}] with code {code}")]
    OperatorSetup { vertex: usize, code: i32 },

    /// Conflicting `declare_type` calls were recorded on a slot.
    #[error("conflicting type declarations on slot '{slot}'")]
    TypeConflict { slot: String },

    /// `build` was called before `finish` linked the wiring.
    #[error("builder has not been finished")]
    NotFinished,

    /// No executor was configured and no tokio runtime is reachable for the
    /// default one.
    #[error("no executor configured and no tokio runtime is available")]
    NoExecutor,
}
