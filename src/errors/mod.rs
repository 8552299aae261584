// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod build;

pub use build::BuildError;

/// Runtime error codes carried by the closure. Zero is success; operators
/// may also surface their own nonzero codes, which win over these when they
/// reach the closure first.
pub mod codes {
    pub const SUCCESS: i32 = 0;

    /// All vertices retired while requested slots were still unpublished.
    pub const UNFINISHED: i32 = -1;

    /// Activation reached a slot that no vertex produces.
    pub const NO_PRODUCER: i32 = -2;

    /// A dependency could not acquire its target with the declared
    /// mutability (a mutable reader already exists, or a mutable acquire
    /// found existing readers).
    pub const MUTABILITY_CONFLICT: i32 = -3;

    /// A required (essential level 2) dependency was empty or never
    /// established at invoke time.
    pub const ESSENTIAL_MISSING: i32 = -4;
}
