// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Pure amplitude stages: rectification and gain.
//!
//! Both are stateless in-place transforms; they chain with anything.

use signal_pipeline_domain::{
    BlockContext, PipelineError, StageKind, StageOutput, StageParameters, StageService, StageState,
};

/// Rectification flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RectifyMode {
    /// Absolute value.
    #[default]
    Full,
    /// `max(x, 0)`.
    Half,
}

impl std::fmt::Display for RectifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RectifyMode::Full => write!(f, "full"),
            RectifyMode::Half => write!(f, "half"),
        }
    }
}

/// Configuration for [`RectifyStage`].
#[derive(Debug, Clone, Default)]
pub struct RectifyConfig {
    pub mode: RectifyMode,
}

/// Full- or half-wave rectifier.
pub struct RectifyStage {
    mode: RectifyMode,
}

impl RectifyStage {
    pub fn new(config: RectifyConfig) -> Result<Self, PipelineError> {
        Ok(Self { mode: config.mode })
    }
}

impl StageService for RectifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Rectify
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        match self.mode {
            RectifyMode::Full => {
                for sample in samples.iter_mut() {
                    *sample = sample.abs();
                }
            }
            RectifyMode::Half => {
                for sample in samples.iter_mut() {
                    *sample = sample.max(0.0);
                }
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_text("mode", &self.mode.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
    }

    fn restore_state(&mut self, _state: &StageState) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) {}
}

/// Configuration for [`AmplifyStage`].
#[derive(Debug, Clone)]
pub struct AmplifyConfig {
    /// Linear gain factor.
    pub factor: f64,
}

/// Constant-gain stage.
pub struct AmplifyStage {
    factor: f64,
}

impl AmplifyStage {
    pub fn new(config: AmplifyConfig) -> Result<Self, PipelineError> {
        if !config.factor.is_finite() {
            return Err(PipelineError::InvalidParameter(format!(
                "Gain factor must be finite, got {}",
                config.factor
            )));
        }
        Ok(Self { factor: config.factor })
    }
}

impl StageService for AmplifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Amplify
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        let factor = self.factor as f32;
        for sample in samples.iter_mut() {
            *sample *= factor;
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_float("factor", self.factor)
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
    }

    fn restore_state(&mut self, _state: &StageState) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) {}
}
