// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for activation, publication, and completion events.

use std::fmt::{Display, Formatter};

/// A run was requested for a set of slots.
pub struct RunRequested {
    pub slots: usize,
}

impl Display for RunRequested {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "running graph for {} requested slots", self.slots)
    }
}

/// Conflicting `declare_type` calls on one slot; fails the build.
pub struct TypeDeclarationConflict<'a> {
    pub slot: &'a str,
    pub declared: &'a str,
    pub previous: &'a str,
}

impl Display for TypeDeclarationConflict<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "slot '{}' declared as {} conflicting with previous declaration {}",
            self.slot, self.declared, self.previous
        )
    }
}

/// A slot was released twice in one run; this is a wiring bug.
pub struct DoubleRelease<'a> {
    pub slot: &'a str,
}

impl Display for DoubleRelease<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot '{}' released twice in one run", self.slot)
    }
}

/// A dependency could not acquire its target with the declared mutability.
pub struct MutabilityConflict<'a> {
    pub slot: &'a str,
    pub mutable: bool,
}

impl Display for MutabilityConflict<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.mutable {
            write!(
                f,
                "slot '{}' cannot be acquired mutably, another dependency already reads it",
                self.slot
            )
        } else {
            write!(
                f,
                "slot '{}' cannot be acquired, another dependency already mutates it",
                self.slot
            )
        }
    }
}

/// A required dependency was empty or unestablished at invoke time.
pub struct EssentialDependencyMissing<'a> {
    pub vertex: usize,
    pub slot: &'a str,
}

impl Display for EssentialDependencyMissing<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vertex[{}] required dependency on slot '{}' is empty, failing the run",
            self.vertex, self.slot
        )
    }
}

/// An operator invocation retired with a result code.
pub struct VertexDone {
    pub vertex: usize,
    pub code: i32,
}

impl Display for VertexDone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "vertex[{}] done with code {}", self.vertex, self.code)
    }
}

/// The run sealed with a result code.
pub struct ClosureFinished {
    pub code: i32,
}

impl Display for ClosureFinished {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "closure finished with code {}", self.code)
    }
}

/// All vertices retired while requested slots stayed unpublished. Lists the
/// frontier slots the diagnostic walk identified as likely culprits.
pub struct UnfinishedData<'a> {
    pub slots: &'a [String],
}

impl Display for UnfinishedData<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.slots.is_empty() {
            write!(f, "all vertices finished but requested data is not ready")
        } else {
            write!(
                f,
                "all vertices finished but requested data is not ready, unsatisfied at: {}",
                self.slots.join(", ")
            )
        }
    }
}
