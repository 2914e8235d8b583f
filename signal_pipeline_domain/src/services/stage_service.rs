// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Service Trait
//!
//! This module defines the unified contract that ALL pipeline stages
//! implement, whether they are running statistics, filters, resamplers,
//! spectral transforms, or adaptive filters.
//!
//! ## The Contract
//!
//! - **Block processing**: `process_block` receives the executor's working
//!   buffer plus a `BlockContext` and owns its inner loop. Per-sample virtual
//!   dispatch is avoided by construction: the executor calls each stage once
//!   per chunk.
//! - **Shape negotiation**: a stage either transforms in place
//!   (`StageOutput::InPlace`) or hands back a new buffer with its channel
//!   count (`StageOutput::Resized`). The executor never aliases input and
//!   output within one stage call.
//! - **Streaming equivalence**: in `moving` mode, processing `A ++ B` must
//!   equal processing `A` then `B` on the same stage, up to floating-point
//!   determinism. In `batch` mode every call is self-contained and state is
//!   reset at entry.
//! - **State discipline**: `snapshot_state` is read-only; `restore_state`
//!   validates shape (and any cheap derived invariants, such as running sums
//!   recomputed from stored rings) before installing anything; `reset`
//!   restores the freshly-constructed state while keeping parameters.
//!
//! ## Why One Unified Trait?
//!
//! Separate traits per stage family would force the executor into dispatch
//! logic that grows with every new kind. One trait keeps the executor
//! oblivious: it moves buffers, tracks channel counts, and snapshots state
//! around each call, nothing else.
//!
//! ## Thread Safety
//!
//! Implementations are `Send` so whole pipelines can move across threads.
//! They are deliberately **not** required to be `Sync`: a pipeline instance
//! is externally single-threaded, and stages own their state exclusively.

use crate::entities::{StageKind, StageParameters};
use crate::value_objects::StageState;
use crate::PipelineError;

/// Per-call context handed to every stage.
///
/// `channels` is the channel count of the working buffer as produced by the
/// previous stage, not the pipeline's input channel count. `timestamps` is
/// present only for stages that declare `consumes_timestamps()`.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub channels: usize,
    pub sample_rate: f64,
    pub timestamps: Option<&'a [f32]>,
}

impl<'a> BlockContext<'a> {
    pub fn new(channels: usize, sample_rate: f64) -> Self {
        Self {
            channels,
            sample_rate,
            timestamps: None,
        }
    }

    pub fn with_timestamps(mut self, timestamps: &'a [f32]) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    /// Frames in a buffer of `len` samples under this context's channel
    /// count, verifying divisibility.
    pub fn frames_in(&self, len: usize) -> Result<usize, PipelineError> {
        if self.channels == 0 {
            return Err(PipelineError::ChannelMismatch(
                "Channel count must be positive".to_string(),
            ));
        }
        if len % self.channels != 0 {
            return Err(PipelineError::ShapeMismatch(format!(
                "Buffer length {} is not divisible by channel count {}",
                len, self.channels
            )));
        }
        Ok(len / self.channels)
    }
}

/// Result of one stage call: the buffer-shape decision the executor acts
/// on.
#[derive(Debug)]
pub enum StageOutput {
    /// The stage overwrote the working buffer in place; frame and channel
    /// counts are unchanged.
    InPlace,
    /// The stage produced a new buffer, possibly with different frame and/or
    /// channel counts. The executor adopts it as the working buffer.
    Resized { samples: Vec<f32>, channels: usize },
}

impl StageOutput {
    /// Convenience constructor for frame-resizing stages that keep their
    /// channel count.
    pub fn resized(samples: Vec<f32>, channels: usize) -> Self {
        StageOutput::Resized { samples, channels }
    }
}

/// Unified trait that all pipeline stages implement.
pub trait StageService: Send {
    /// The registered kind of this stage (its stable snapshot identifier).
    fn kind(&self) -> StageKind;

    /// Processes one chunk.
    ///
    /// The stage may mutate `samples` in place and return
    /// `StageOutput::InPlace`, or build a new buffer and return
    /// `StageOutput::Resized`. An empty input must produce an empty output
    /// (stages may still buffer nothing and update nothing).
    ///
    /// # Errors
    ///
    /// Shape violations (wrong channel count, missing timestamps) and
    /// processing failures. On error the executor restores this stage's
    /// state from the snapshot it took at call entry, so implementations
    /// need not unwind partial mutations themselves.
    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError>;

    /// Channel count this stage produces for a given input channel count.
    ///
    /// Used by the executor for shape accounting before output exists.
    fn output_channels(&self, input_channels: usize) -> usize {
        input_channels
    }

    /// Whether this stage consumes the paired timestamp stream.
    fn consumes_timestamps(&self) -> bool {
        false
    }

    /// The structural parameters checked on snapshot load.
    fn structural_parameters(&self) -> StageParameters;

    /// Captures the complete mutable state. Read-only.
    fn snapshot_state(&self) -> StageState;

    /// Validates and installs previously captured state.
    ///
    /// Implementations check structural shape against their parameters and
    /// recompute cheap derived invariants (e.g. running sums from stored
    /// rings) before installing anything.
    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError>;

    /// Resets state to the freshly-constructed condition, keeping
    /// parameters.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_in_checks_divisibility() {
        let ctx = BlockContext::new(2, 1000.0);
        assert_eq!(ctx.frames_in(6).unwrap(), 3);
        assert!(ctx.frames_in(5).is_err());
    }

    #[test]
    fn test_context_timestamps_attach() {
        let ts = [0.0f32, 0.001, 0.002];
        let ctx = BlockContext::new(1, 1000.0).with_timestamps(&ts);
        assert_eq!(ctx.timestamps.unwrap().len(), 3);
    }
}
