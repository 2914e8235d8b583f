// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Matrix Transform Stages
//!
//! Application stages for pretrained spatial transforms: PCA, ICA,
//! whitening, and CSP. Training lives with the caller; these stages only
//! apply a fixed `numChannels × numComponents` column-major matrix after
//! subtracting a mean vector, frame by frame.
//!
//! When `numComponents < numChannels` the pipeline convention is to keep
//! the input channel count and zero-fill the trailing channels rather than
//! shrink the stream, so downstream stages keep a stable layout.

use signal_pipeline_domain::{
    BlockContext, PipelineError, StageKind, StageOutput, StageParameters, StageService, StageState,
};

use crate::numerics::linalg::mat_vec_col_major;

/// Configuration shared by the matrix-transform stages.
#[derive(Debug, Clone)]
pub struct MatrixTransformConfig {
    /// Column-major `num_channels × num_components` transform.
    pub matrix: Vec<f32>,
    /// Per-channel mean subtracted before projection; empty means zero.
    pub mean: Vec<f32>,
    pub num_channels: usize,
    /// Component count (`numFilters` for CSP).
    pub num_components: usize,
}

/// Mean-center-then-project stage.
pub struct MatrixTransformStage {
    kind: StageKind,
    matrix: Vec<f32>,
    mean: Vec<f32>,
    num_channels: usize,
    num_components: usize,
    centered: Vec<f32>,
    projected: Vec<f32>,
}

impl MatrixTransformStage {
    fn build(kind: StageKind, config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        if config.num_channels == 0 {
            return Err(PipelineError::InvalidParameter(
                "Number of channels must be positive".to_string(),
            ));
        }
        if config.num_components == 0 || config.num_components > config.num_channels {
            return Err(PipelineError::InvalidParameter(format!(
                "Number of components must lie in 1..={}, got {}",
                config.num_channels, config.num_components
            )));
        }
        if config.matrix.len() != config.num_channels * config.num_components {
            return Err(PipelineError::InvalidParameter(format!(
                "Matrix length {} does not equal numChannels * numComponents = {}",
                config.matrix.len(),
                config.num_channels * config.num_components
            )));
        }
        let mean = if config.mean.is_empty() {
            vec![0.0; config.num_channels]
        } else if config.mean.len() == config.num_channels {
            config.mean
        } else {
            return Err(PipelineError::InvalidParameter(format!(
                "Mean vector length {} does not equal numChannels {}",
                config.mean.len(),
                config.num_channels
            )));
        };
        Ok(Self {
            kind,
            matrix: config.matrix,
            mean,
            num_channels: config.num_channels,
            num_components: config.num_components,
            centered: vec![0.0; config.num_channels],
            projected: vec![0.0; config.num_components],
        })
    }

    pub fn pca(config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::PcaTransform, config)
    }

    pub fn ica(config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::IcaTransform, config)
    }

    pub fn whitening(config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::WhiteningTransform, config)
    }

    pub fn csp(config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::CspTransform, config)
    }
}

impl StageService for MatrixTransformStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        if ctx.channels != self.num_channels {
            return Err(PipelineError::ChannelMismatch(format!(
                "Stage '{}' expects {} channels, got {}",
                self.kind, self.num_channels, ctx.channels
            )));
        }
        for frame in 0..frames {
            let base = frame * self.num_channels;
            for channel in 0..self.num_channels {
                self.centered[channel] = samples[base + channel] - self.mean[channel];
            }
            mat_vec_col_major(
                &self.matrix,
                self.num_channels,
                self.num_components,
                &self.centered,
                &mut self.projected,
            );
            samples[base..base + self.num_components].copy_from_slice(&self.projected);
            for slot in &mut samples[base + self.num_components..base + self.num_channels] {
                *slot = 0.0;
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        let component_key = if self.kind == StageKind::CspTransform {
            "numFilters"
        } else {
            "numComponents"
        };
        StageParameters::new()
            .with_integer("numChannels", self.num_channels as i64)
            .with_integer(component_key, self.num_components as i64)
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
    }

    fn restore_state(&mut self, _state: &StageState) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) {}
}
