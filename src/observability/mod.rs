// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structured message types for engine diagnostics.
//!
//! Every diagnostic the engine emits through `tracing` goes through a
//! message struct with a `Display` implementation, keeping log wording in
//! one place instead of scattering format strings through the hot paths.
//!
//! Messages are organized by phase:
//! * `messages::link` - builder linking and graph materialization
//! * `messages::engine` - activation, publication, and completion events

pub mod messages;
