// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Adaptive Filter Stages
//!
//! LMS/NLMS and RLS adaptive filters with the two-channel convention:
//! channel 0 carries the reference input `x`, channel 1 the desired signal
//! `d`. Each frame updates the filter and writes the error `e = d - ŷ` to
//! both output channels.
//!
//! The filter state (weights, tap delay line, and the RLS inverse
//! correlation matrix) is a single unit, serialized as one channel cell in
//! the snapshot tree.

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

/// Regularizer added to the input power in the NLMS step size.
const NLMS_EPSILON: f64 = 1e-8;

fn require_two_channels(kind: StageKind, channels: usize) -> Result<(), PipelineError> {
    if channels != 2 {
        return Err(PipelineError::ChannelMismatch(format!(
            "Stage '{}' requires exactly 2 channels (reference, desired), got {}",
            kind, channels
        )));
    }
    Ok(())
}

/// Configuration for [`LmsFilterStage`].
#[derive(Debug, Clone)]
pub struct LmsFilterConfig {
    pub num_taps: usize,
    /// Step size μ in `(0, 1]`.
    pub learning_rate: f64,
    /// Normalize the step by the tap-vector power (NLMS).
    pub normalized: bool,
    /// Leakage in `[0, 1)`; 0 disables the leak.
    pub lambda: f64,
}

impl Default for LmsFilterConfig {
    fn default() -> Self {
        Self {
            num_taps: 8,
            learning_rate: 0.1,
            normalized: false,
            lambda: 0.0,
        }
    }
}

/// (N)LMS adaptive filter.
pub struct LmsFilterStage {
    config: LmsFilterConfig,
    weights: Vec<f32>,
    taps: Vec<f32>,
}

impl LmsFilterStage {
    pub fn new(config: LmsFilterConfig) -> Result<Self, PipelineError> {
        if config.num_taps == 0 {
            return Err(PipelineError::InvalidParameter(
                "Number of taps must be positive".to_string(),
            ));
        }
        if !config.learning_rate.is_finite()
            || config.learning_rate <= 0.0
            || config.learning_rate > 1.0
        {
            return Err(PipelineError::InvalidParameter(format!(
                "Learning rate must lie in (0, 1], got {}",
                config.learning_rate
            )));
        }
        if !config.lambda.is_finite() || !(0.0..1.0).contains(&config.lambda) {
            return Err(PipelineError::InvalidParameter(format!(
                "Leakage lambda must lie in [0, 1), got {}",
                config.lambda
            )));
        }
        let taps = config.num_taps;
        Ok(Self {
            config,
            weights: vec![0.0; taps],
            taps: vec![0.0; taps],
        })
    }
}

impl StageService for LmsFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::LmsFilter
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        require_two_channels(self.kind(), ctx.channels)?;

        let mu = self.config.learning_rate;
        let leak = 1.0 - mu * self.config.lambda;
        for frame in 0..frames {
            let x = samples[frame * 2];
            let d = samples[frame * 2 + 1];

            // Shift the delay line, newest first
            for i in (1..self.taps.len()).rev() {
                self.taps[i] = self.taps[i - 1];
            }
            self.taps[0] = x;

            let mut y = 0.0f64;
            let mut power = 0.0f64;
            for (w, t) in self.weights.iter().zip(&self.taps) {
                y += *w as f64 * *t as f64;
                power += *t as f64 * *t as f64;
            }
            let e = d as f64 - y;

            let step = if self.config.normalized {
                mu / (NLMS_EPSILON + power)
            } else {
                mu
            };
            for (w, t) in self.weights.iter_mut().zip(&self.taps) {
                *w = (leak * *w as f64 + step * e * *t as f64) as f32;
            }

            samples[frame * 2] = e as f32;
            samples[frame * 2 + 1] = e as f32;
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("numTaps", self.config.num_taps as i64)
            .with_float("learningRate", self.config.learning_rate)
            .with_flag("normalized", self.config.normalized)
            .with_float("lambda", self.config.lambda)
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new().with_channel(
            ChannelState::new()
                .with_buffer("weights", self.weights.clone())
                .with_buffer("delayLine", self.taps.clone()),
        )
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if state.channel_count() == 0 {
            self.reset();
            return Ok(());
        }
        let cell = state.channel(0)?;
        self.weights = cell.buffer_with_len("weights", self.config.num_taps)?.to_vec();
        self.taps = cell.buffer_with_len("delayLine", self.config.num_taps)?.to_vec();
        Ok(())
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.taps.iter_mut().for_each(|t| *t = 0.0);
    }
}

/// Configuration for [`RlsFilterStage`].
#[derive(Debug, Clone)]
pub struct RlsFilterConfig {
    pub num_taps: usize,
    /// Forgetting factor in `(0, 1]`.
    pub lambda: f64,
    /// Initial inverse-correlation scale; `P(0) = I / delta`.
    pub delta: f64,
}

impl Default for RlsFilterConfig {
    fn default() -> Self {
        Self {
            num_taps: 8,
            lambda: 0.99,
            delta: 0.01,
        }
    }
}

/// RLS adaptive filter using the Sherman-Morrison update of the inverse
/// correlation matrix.
pub struct RlsFilterStage {
    config: RlsFilterConfig,
    weights: Vec<f32>,
    taps: Vec<f32>,
    /// Row-major `numTaps × numTaps` inverse correlation matrix.
    p_matrix: Vec<f32>,
}

impl RlsFilterStage {
    pub fn new(config: RlsFilterConfig) -> Result<Self, PipelineError> {
        if config.num_taps == 0 {
            return Err(PipelineError::InvalidParameter(
                "Number of taps must be positive".to_string(),
            ));
        }
        if !config.lambda.is_finite() || config.lambda <= 0.0 || config.lambda > 1.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Forgetting factor must lie in (0, 1], got {}",
                config.lambda
            )));
        }
        if !config.delta.is_finite() || config.delta <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Delta must be positive, got {}",
                config.delta
            )));
        }
        let taps = config.num_taps;
        let mut stage = Self {
            config,
            weights: vec![0.0; taps],
            taps: vec![0.0; taps],
            p_matrix: vec![0.0; taps * taps],
        };
        stage.init_p();
        Ok(stage)
    }

    fn init_p(&mut self) {
        let n = self.config.num_taps;
        self.p_matrix.iter_mut().for_each(|v| *v = 0.0);
        let diagonal = (1.0 / self.config.delta) as f32;
        for i in 0..n {
            self.p_matrix[i * n + i] = diagonal;
        }
    }
}

impl StageService for RlsFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::RlsFilter
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        require_two_channels(self.kind(), ctx.channels)?;

        let n = self.config.num_taps;
        let lambda = self.config.lambda;
        let mut pi = vec![0.0f64; n];
        let mut gain = vec![0.0f64; n];

        for frame in 0..frames {
            let x = samples[frame * 2];
            let d = samples[frame * 2 + 1];

            for i in (1..n).rev() {
                self.taps[i] = self.taps[i - 1];
            }
            self.taps[0] = x;

            // pi = P·x
            for i in 0..n {
                let mut acc = 0.0f64;
                for j in 0..n {
                    acc += self.p_matrix[i * n + j] as f64 * self.taps[j] as f64;
                }
                pi[i] = acc;
            }
            // k = pi / (lambda + xᵀ·pi)
            let mut denom = lambda;
            for i in 0..n {
                denom += self.taps[i] as f64 * pi[i];
            }
            for i in 0..n {
                gain[i] = pi[i] / denom;
            }

            let mut y = 0.0f64;
            for i in 0..n {
                y += self.weights[i] as f64 * self.taps[i] as f64;
            }
            let e = d as f64 - y;

            for i in 0..n {
                self.weights[i] = (self.weights[i] as f64 + gain[i] * e) as f32;
            }
            // P = (P - k·piᵀ) / lambda
            for i in 0..n {
                for j in 0..n {
                    let updated = (self.p_matrix[i * n + j] as f64 - gain[i] * pi[j]) / lambda;
                    self.p_matrix[i * n + j] = updated as f32;
                }
            }

            samples[frame * 2] = e as f32;
            samples[frame * 2 + 1] = e as f32;
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("numTaps", self.config.num_taps as i64)
            .with_float("lambda", self.config.lambda)
            .with_float("delta", self.config.delta)
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new().with_channel(
            ChannelState::new()
                .with_buffer("weights", self.weights.clone())
                .with_buffer("delayLine", self.taps.clone())
                .with_buffer("pMatrix", self.p_matrix.clone()),
        )
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if state.channel_count() == 0 {
            self.reset();
            return Ok(());
        }
        let n = self.config.num_taps;
        let cell = state.channel(0)?;
        self.weights = cell.buffer_with_len("weights", n)?.to_vec();
        self.taps = cell.buffer_with_len("delayLine", n)?.to_vec();
        self.p_matrix = cell.buffer_with_len("pMatrix", n * n)?.to_vec();
        Ok(())
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.taps.iter_mut().for_each(|t| *t = 0.0);
        self.init_p();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: &mut dyn StageService, input: &[f32]) -> Vec<f32> {
        let mut samples = input.to_vec();
        let ctx = BlockContext::new(2, 1000.0);
        stage.process_block(&mut samples, &ctx).unwrap();
        samples
    }

    /// Interleave a reference and desired signal into the 2-channel layout.
    fn interleave(x: &[f32], d: &[f32]) -> Vec<f32> {
        x.iter().zip(d).flat_map(|(&a, &b)| [a, b]).collect()
    }

    #[test]
    fn test_lms_rejects_bad_params() {
        assert!(LmsFilterStage::new(LmsFilterConfig { num_taps: 0, ..Default::default() }).is_err());
        assert!(LmsFilterStage::new(LmsFilterConfig { learning_rate: 0.0, ..Default::default() }).is_err());
        assert!(LmsFilterStage::new(LmsFilterConfig { learning_rate: 1.5, ..Default::default() }).is_err());
        assert!(LmsFilterStage::new(LmsFilterConfig { lambda: 1.0, ..Default::default() }).is_err());
        assert!(RlsFilterStage::new(RlsFilterConfig { lambda: 0.0, ..Default::default() }).is_err());
        assert!(RlsFilterStage::new(RlsFilterConfig { delta: 0.0, ..Default::default() }).is_err());
    }

    #[test]
    fn test_two_channel_contract() {
        let mut stage = LmsFilterStage::new(LmsFilterConfig::default()).unwrap();
        let mut samples = vec![0.0; 9];
        let ctx = BlockContext::new(3, 1000.0);
        let err = stage.process_block(&mut samples, &ctx).unwrap_err();
        assert!(err.to_string().contains("exactly 2 channels"));
    }

    /// With d = x delayed-by-zero (identity system), NLMS must converge so
    /// the error magnitude falls well below the signal level.
    #[test]
    fn test_nlms_converges_on_identity_system() {
        let mut stage = LmsFilterStage::new(LmsFilterConfig {
            num_taps: 4,
            learning_rate: 0.5,
            normalized: true,
            lambda: 0.0,
        })
        .unwrap();
        let x: Vec<f32> = (0..800).map(|i| ((i * 37 % 19) as f32 - 9.0) / 9.0).collect();
        let d = x.clone();
        let out = run(&mut stage, &interleave(&x, &d));

        let early: f32 = out[..40].iter().step_by(2).map(|e| e * e).sum();
        let late: f32 = out[out.len() - 40..].iter().step_by(2).map(|e| e * e).sum();
        assert!(late < early / 10.0, "error must shrink: early {} late {}", early, late);
    }

    /// RLS identifies a short FIR system: d[n] = 0.5·x[n] - 0.3·x[n-1].
    #[test]
    fn test_rls_identifies_fir_system() {
        let mut stage = RlsFilterStage::new(RlsFilterConfig {
            num_taps: 2,
            lambda: 0.999,
            delta: 0.01,
        })
        .unwrap();
        let x: Vec<f32> = (0..600).map(|i| ((i * 53 % 23) as f32 - 11.0) / 11.0).collect();
        let mut d = vec![0.0f32; x.len()];
        for i in 0..x.len() {
            let prev = if i > 0 { x[i - 1] } else { 0.0 };
            d[i] = 0.5 * x[i] - 0.3 * prev;
        }
        run(&mut stage, &interleave(&x, &d));
        assert!((stage.weights[0] - 0.5).abs() < 0.01, "{:?}", stage.weights);
        assert!((stage.weights[1] + 0.3).abs() < 0.01, "{:?}", stage.weights);
    }

    #[test]
    fn test_error_copied_to_both_channels() {
        let mut stage = LmsFilterStage::new(LmsFilterConfig::default()).unwrap();
        let out = run(&mut stage, &[1.0, 2.0, 0.5, -1.0]);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[2], out[3]);
    }

    #[test]
    fn test_lms_split_equivalence() {
        let x: Vec<f32> = (0..100).map(|i| ((i * 7 % 13) as f32 - 6.0) / 6.0).collect();
        let d: Vec<f32> = x.iter().map(|v| 0.8 * v).collect();
        let input = interleave(&x, &d);

        let config = LmsFilterConfig {
            num_taps: 3,
            learning_rate: 0.2,
            normalized: true,
            lambda: 0.01,
        };
        let mut whole = LmsFilterStage::new(config.clone()).unwrap();
        let expected = run(&mut whole, &input);

        let mut split = LmsFilterStage::new(config).unwrap();
        let mut actual = run(&mut split, &input[..40]);
        actual.extend(run(&mut split, &input[40..]));
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_rls_snapshot_roundtrip() {
        let config = RlsFilterConfig::default();
        let x: Vec<f32> = (0..60).map(|i| (i as f32 * 0.3).sin()).collect();
        let d: Vec<f32> = x.iter().map(|v| v * 0.5).collect();
        let input = interleave(&x, &d);

        let mut stage = RlsFilterStage::new(config.clone()).unwrap();
        run(&mut stage, &input);
        let state = stage.snapshot_state();

        let mut restored = RlsFilterStage::new(config).unwrap();
        restored.restore_state(&state).unwrap();
        let next = interleave(&[0.1, 0.2], &[0.05, 0.1]);
        assert_eq!(run(&mut stage, &next), run(&mut restored, &next));
    }

    #[test]
    fn test_reset_reinitializes_p() {
        let mut stage = RlsFilterStage::new(RlsFilterConfig {
            num_taps: 2,
            lambda: 0.99,
            delta: 0.5,
        })
        .unwrap();
        run(&mut stage, &[1.0, 1.0, 0.5, 0.2]);
        stage.reset();
        assert_eq!(stage.p_matrix, vec![2.0, 0.0, 0.0, 2.0]);
        assert_eq!(stage.weights, vec![0.0, 0.0]);
    }
}
