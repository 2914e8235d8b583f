// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Executor
//!
//! Runs the stage list left-to-right over one chunk. The executor owns the
//! working buffer and moves it between stages; a stage either overwrites it
//! in place or hands back a replacement (`StageOutput::Resized`), in which
//! case the retired allocation is kept as scratch and reused for the next
//! chunk; the executor never holds more than two buffers.
//!
//! Responsibilities:
//!
//! - **Channel accounting**: each stage sees the channel count its
//!   predecessor produced, never the pipeline's input channel count.
//! - **Timestamp routing**: the paired timestamp buffer reaches only stages
//!   that declare `consumes_timestamps()`; after the first consumer the
//!   stream is uniformly spaced and the timestamps are spent.
//! - **State rollback**: each stage's state is snapshotted at call entry
//!   and restored on error, so a failed `process` never leaves a partially
//!   updated stage behind.
//! - **Timing**: per-stage wall time lands in `ProcessingMetrics`.

use std::time::Instant;

use tracing::debug;

use signal_pipeline_domain::{
    BlockContext, PipelineError, ProcessOptions, ProcessingMetrics, StageOutput, StageService,
};

/// Single-chunk executor with a reusable scratch allocation.
pub(crate) struct Executor {
    scratch: Vec<f32>,
}

impl Executor {
    pub(crate) fn new() -> Self {
        Self { scratch: Vec::new() }
    }

    /// Processes one chunk through `stages`, returning the output samples
    /// and their channel count.
    pub(crate) fn run(
        &mut self,
        stages: &mut [Box<dyn StageService>],
        metrics: &mut ProcessingMetrics,
        input: &[f32],
        opts: &ProcessOptions,
        timestamps: Option<&[f32]>,
    ) -> Result<(Vec<f32>, usize), PipelineError> {
        let mut working = std::mem::take(&mut self.scratch);
        working.clear();
        working.extend_from_slice(input);

        let mut channels = opts.channels();
        let mut timestamps = timestamps;

        for (index, stage) in stages.iter_mut().enumerate() {
            let mut ctx = BlockContext::new(channels, opts.sample_rate());
            let wants_timestamps = stage.consumes_timestamps();
            if wants_timestamps {
                if let Some(ts) = timestamps {
                    ctx = ctx.with_timestamps(ts);
                }
            }

            // Pre-call snapshot: on error the stage is rolled back so no
            // partial state commit is observable.
            let guard = stage.snapshot_state();
            let input_channels = channels;
            let input_len = working.len();
            let started = Instant::now();

            match stage.process_block(&mut working, &ctx) {
                Ok(StageOutput::InPlace) => {}
                Ok(StageOutput::Resized {
                    samples,
                    channels: new_channels,
                }) => {
                    if new_channels == 0 {
                        return Err(PipelineError::internal_error(format!(
                            "Stage '{}' produced a zero channel count",
                            stage.kind()
                        )));
                    }
                    let retired = std::mem::replace(&mut working, samples);
                    self.scratch = retired;
                    channels = new_channels;
                }
                Err(err) => {
                    stage.restore_state(&guard).map_err(|restore_err| {
                        PipelineError::internal_error(format!(
                            "Stage '{}' failed ({}) and could not be rolled back: {}",
                            stage.kind(),
                            err,
                            restore_err
                        ))
                    })?;
                    return Err(err);
                }
            }

            // The shape contract the stage declared must match what it
            // actually produced (invariant: downstream stages observe the
            // produced channel count)
            let declared = stage.output_channels(input_channels);
            if declared != channels {
                return Err(PipelineError::internal_error(format!(
                    "Stage '{}' declared {} output channels but produced {}",
                    stage.kind(),
                    declared,
                    channels
                )));
            }

            let elapsed = started.elapsed();
            metrics.record_stage_elapsed(index, elapsed);
            debug!(
                stage = %stage.kind(),
                index,
                input_len,
                output_len = working.len(),
                channels,
                elapsed_us = elapsed.as_micros() as u64,
                "stage processed"
            );

            if wants_timestamps {
                timestamps = None;
            }
        }

        Ok((working, channels))
    }
}
