// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Discrete calculus stages: first difference and leaky integration.
//!
//! Both are streaming stages whose per-channel state is a single sample;
//! state persists across chunks so concatenated processing matches
//! single-shot processing exactly.

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

use super::verify_channel_binding;

/// First difference: `y[n] = x[n] - x[n-1]`, with `prev` starting at 0.
pub struct DifferentiatorStage {
    prev: Vec<f32>,
    bound_channels: Option<usize>,
}

impl DifferentiatorStage {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            prev: Vec::new(),
            bound_channels: None,
        })
    }
}

impl StageService for DifferentiatorStage {
    fn kind(&self) -> StageKind {
        StageKind::Differentiator
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
        if self.prev.len() != ctx.channels {
            self.prev = vec![0.0; ctx.channels];
            self.bound_channels = Some(ctx.channels);
        }
        let channels = ctx.channels;
        let frames = samples.len() / channels;
        for frame in 0..frames {
            for channel in 0..channels {
                let index = frame * channels + channel;
                let x = samples[index];
                samples[index] = x - self.prev[channel];
                self.prev[channel] = x;
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for &prev in &self.prev {
            state = state.with_channel(ChannelState::new().with_scalar("prev", prev as f64));
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        let mut prev = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            prev.push(state.channel(index)?.scalar("prev")? as f32);
        }
        self.bound_channels = if prev.is_empty() { None } else { Some(prev.len()) };
        self.prev = prev;
        Ok(())
    }

    fn reset(&mut self) {
        self.prev.clear();
        self.bound_channels = None;
    }
}

/// Configuration for [`IntegratorStage`].
#[derive(Debug, Clone)]
pub struct IntegratorConfig {
    /// Leak factor in `[0, 1]`; 1 is a perfect accumulator.
    pub alpha: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

/// Leaky integrator: `y[n] = α·y[n-1] + x[n]`.
pub struct IntegratorStage {
    alpha: f64,
    y_prev: Vec<f32>,
    bound_channels: Option<usize>,
}

impl IntegratorStage {
    pub fn new(config: IntegratorConfig) -> Result<Self, PipelineError> {
        if !config.alpha.is_finite() || !(0.0..=1.0).contains(&config.alpha) {
            return Err(PipelineError::InvalidParameter(format!(
                "Integrator alpha must lie in [0, 1], got {}",
                config.alpha
            )));
        }
        Ok(Self {
            alpha: config.alpha,
            y_prev: Vec::new(),
            bound_channels: None,
        })
    }
}

impl StageService for IntegratorStage {
    fn kind(&self) -> StageKind {
        StageKind::Integrator
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
        if self.y_prev.len() != ctx.channels {
            self.y_prev = vec![0.0; ctx.channels];
            self.bound_channels = Some(ctx.channels);
        }
        let channels = ctx.channels;
        let frames = samples.len() / channels;
        for frame in 0..frames {
            for channel in 0..channels {
                let index = frame * channels + channel;
                let y = (self.alpha * self.y_prev[channel] as f64 + samples[index] as f64) as f32;
                self.y_prev[channel] = y;
                samples[index] = y;
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_float("alpha", self.alpha)
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for &y in &self.y_prev {
            state = state.with_channel(ChannelState::new().with_scalar("yPrev", y as f64));
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        let mut y_prev = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            y_prev.push(state.channel(index)?.scalar("yPrev")? as f32);
        }
        self.bound_channels = if y_prev.is_empty() { None } else { Some(y_prev.len()) };
        self.y_prev = y_prev;
        Ok(())
    }

    fn reset(&mut self) {
        self.y_prev.clear();
        self.bound_channels = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: &mut dyn StageService, input: &[f32], channels: usize) -> Vec<f32> {
        let mut samples = input.to_vec();
        let ctx = BlockContext::new(channels, 1000.0);
        stage.process_block(&mut samples, &ctx).unwrap();
        samples
    }

    /// Differentiating the triangular numbers recovers 1..=5.
    #[test]
    fn test_differentiator_fresh_state() {
        let mut stage = DifferentiatorStage::new().unwrap();
        let out = run(&mut stage, &[1.0, 3.0, 6.0, 10.0, 15.0], 1);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_differentiator_streams_across_chunks() {
        let mut stage = DifferentiatorStage::new().unwrap();
        let first = run(&mut stage, &[1.0, 3.0], 1);
        let second = run(&mut stage, &[6.0, 10.0], 1);
        assert_eq!(first, vec![1.0, 2.0]);
        assert_eq!(second, vec![3.0, 4.0]); // 6 - 3 carried across the chunk seam
    }

    #[test]
    fn test_integrator_accumulates() {
        let mut stage = IntegratorStage::new(IntegratorConfig::default()).unwrap();
        let out = run(&mut stage, &[1.0, 1.0, 1.0, 1.0], 1);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_leaky_integrator() {
        let mut stage = IntegratorStage::new(IntegratorConfig { alpha: 0.5 }).unwrap();
        let out = run(&mut stage, &[1.0, 0.0, 0.0], 1);
        assert_eq!(out, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_integrator_rejects_out_of_range_alpha() {
        assert!(IntegratorStage::new(IntegratorConfig { alpha: -0.1 }).is_err());
        assert!(IntegratorStage::new(IntegratorConfig { alpha: 1.1 }).is_err());
    }

    #[test]
    fn test_differentiator_then_integrator_identity() {
        let input: Vec<f32> = (0..32).map(|i| ((i * 11 % 7) as f32) - 3.0).collect();
        let mut diff = DifferentiatorStage::new().unwrap();
        let mut int = IntegratorStage::new(IntegratorConfig::default()).unwrap();
        let differentiated = run(&mut diff, &input, 1);
        let restored = run(&mut int, &differentiated, 1);
        for (a, b) in input.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut stage = DifferentiatorStage::new().unwrap();
        run(&mut stage, &[5.0, 9.0], 1);
        let state = stage.snapshot_state();
        let mut restored = DifferentiatorStage::new().unwrap();
        restored.restore_state(&state).unwrap();
        assert_eq!(run(&mut restored, &[12.0], 1), run(&mut stage, &[12.0], 1));
    }
}
