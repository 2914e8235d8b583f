// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Tap stage: a zero-transformation observer.
//!
//! The tap hands the current working buffer and channel count to a caller
//! callback and passes the stream through untouched. It carries no state;
//! the callback itself is a live object and is not part of snapshots.

use std::sync::Arc;

use signal_pipeline_domain::{
    BlockContext, PipelineError, StageKind, StageOutput, StageParameters, StageService, StageState,
};

/// Observer invoked with `(samples, channels)` for every chunk.
pub type TapCallback = Arc<dyn Fn(&[f32], usize) + Send + Sync>;

/// Configuration for [`TapStage`].
#[derive(Clone)]
pub struct TapConfig {
    pub callback: TapCallback,
}

impl std::fmt::Debug for TapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapConfig").finish_non_exhaustive()
    }
}

/// Pass-through observer stage.
pub struct TapStage {
    callback: TapCallback,
}

impl TapStage {
    pub fn new(config: TapConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            callback: config.callback,
        })
    }
}

impl StageService for TapStage {
    fn kind(&self) -> StageKind {
        StageKind::Tap
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        (self.callback)(samples, ctx.channels);
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
    }

    fn restore_state(&mut self, _state: &StageState) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) {}
}
