// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for builder linking and graph materialization.

use std::fmt::{Display, Formatter};

/// A symbolic slot name received its stable index.
pub struct SlotIndexAssigned<'a> {
    pub slot: &'a str,
    pub index: usize,
}

impl Display for SlotIndexAssigned<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot '{}' assigned index {}", self.slot, self.index)
    }
}

/// Linking finished for the whole builder.
pub struct LinkFinished<'a> {
    pub builder: &'a str,
    pub vertices: usize,
    pub slots: usize,
}

impl Display for LinkFinished<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "builder '{}' linked with {} vertices and {} slots",
            self.builder, self.vertices, self.slots
        )
    }
}

/// A graph instance was materialized from a finished builder.
pub struct GraphBuilt {
    pub vertices: usize,
    pub slots: usize,
}

impl Display for GraphBuilt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "graph built with {} vertices and {} slots",
            self.vertices, self.slots
        )
    }
}
