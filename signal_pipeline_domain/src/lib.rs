// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Pipeline Domain
//!
//! The domain layer of the signal pipeline engine: the stage contract, the
//! data model, the snapshot formats, and the error taxonomy. It is pure
//! business logic (no I/O, no logging, no async runtime) so every consumer
//! (the engine crate, host bindings, tests) builds on the same invariants.
//!
//! ## Module Structure
//!
//! - [`entities`]: `StageKind` (the registered stage identifiers),
//!   `StageMode`, `StageParameters`, and `ProcessingMetrics`
//! - [`value_objects`]: `SampleBuffer` (interleaved multi-channel samples),
//!   `ProcessOptions`, `StageState`/`ChannelState` (the serializable state
//!   tree), and `PipelineSnapshot` with both snapshot codecs
//! - [`services`]: the unified [`StageService`] trait every stage implements
//! - [`error`]: the [`PipelineError`] taxonomy
//!
//! ## Core Invariants
//!
//! 1. Streaming (`moving`) stages are chunk-size agnostic: processing
//!    `A ++ B` equals processing `A` then `B`.
//! 2. `batch` stages reset state at every call entry.
//! 3. Each stage observes the channel count its predecessor produced.
//! 4. Moving-mode state size is bounded by configuration, never by chunk
//!    size.
//! 5. A snapshot loaded into an identically-constructed pipeline restores
//!    bit-for-bit numeric behavior.

pub mod entities;
pub mod error;
pub mod services;
pub mod value_objects;

// Re-export commonly used types for convenient access
pub use entities::{ParameterValue, ProcessingMetrics, StageKind, StageMode, StageParameters};
pub use error::PipelineError;
pub use services::{BlockContext, StageOutput, StageService};
pub use value_objects::{
    ChannelState, PipelineSnapshot, ProcessOptions, SampleBuffer, SnapshotFormat, StageSnapshot,
    StageState, MAGIC_BYTES,
};
