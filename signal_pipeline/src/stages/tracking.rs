// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Kalman Filter Stage
//!
//! Per-channel constant-velocity Kalman tracker. Each channel is an
//! independent `[position, velocity]` state observed through its sample
//! value; the stage requires `channels == dimensions` so configuration
//! mistakes surface as shape errors rather than silent mistracking.
//!
//! The discrete model per step `dt = 1/sampleRate`:
//!
//! ```text
//! F = [1 dt; 0 1]     H = [1 0]
//! Q = q·[dt³/3 dt²/2; dt²/2 dt]     R = r
//! ```

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

/// Configuration for [`KalmanFilterStage`].
#[derive(Debug, Clone)]
pub struct KalmanFilterConfig {
    /// Number of tracked dimensions; must equal the stream channel count.
    pub dimensions: usize,
    /// Process (model) noise intensity `q`.
    pub process_noise: f64,
    /// Measurement noise variance `r`.
    pub measurement_noise: f64,
}

impl Default for KalmanFilterConfig {
    fn default() -> Self {
        Self {
            dimensions: 1,
            process_noise: 1e-3,
            measurement_noise: 1e-2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KalmanCell {
    position: f64,
    velocity: f64,
    p00: f64,
    p01: f64,
    p10: f64,
    p11: f64,
    initialized: bool,
}

impl Default for KalmanCell {
    fn default() -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            p00: 1.0,
            p01: 0.0,
            p10: 0.0,
            p11: 1.0,
            initialized: false,
        }
    }
}

/// Constant-velocity Kalman tracker.
pub struct KalmanFilterStage {
    config: KalmanFilterConfig,
    cells: Vec<KalmanCell>,
}

impl KalmanFilterStage {
    pub fn new(config: KalmanFilterConfig) -> Result<Self, PipelineError> {
        if config.dimensions == 0 {
            return Err(PipelineError::InvalidParameter(
                "Kalman dimensions must be positive".to_string(),
            ));
        }
        if !config.process_noise.is_finite() || config.process_noise <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Process noise must be positive, got {}",
                config.process_noise
            )));
        }
        if !config.measurement_noise.is_finite() || config.measurement_noise <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Measurement noise must be positive, got {}",
                config.measurement_noise
            )));
        }
        let dimensions = config.dimensions;
        Ok(Self {
            config,
            cells: vec![KalmanCell::default(); dimensions],
        })
    }

    fn step(cell: &mut KalmanCell, z: f64, dt: f64, q: f64, r: f64) -> f64 {
        if !cell.initialized {
            cell.position = z;
            cell.velocity = 0.0;
            cell.initialized = true;
            return z;
        }

        // Predict
        let position = cell.position + cell.velocity * dt;
        let velocity = cell.velocity;
        let p00 = cell.p00 + dt * (cell.p10 + cell.p01) + dt * dt * cell.p11 + q * dt * dt * dt / 3.0;
        let p01 = cell.p01 + dt * cell.p11 + q * dt * dt / 2.0;
        let p10 = cell.p10 + dt * cell.p11 + q * dt * dt / 2.0;
        let p11 = cell.p11 + q * dt;

        // Update
        let innovation = z - position;
        let s = p00 + r;
        let k0 = p00 / s;
        let k1 = p10 / s;
        cell.position = position + k0 * innovation;
        cell.velocity = velocity + k1 * innovation;
        cell.p00 = (1.0 - k0) * p00;
        cell.p01 = (1.0 - k0) * p01;
        cell.p10 = p10 - k1 * p00;
        cell.p11 = p11 - k1 * p01;

        cell.position
    }
}

impl StageService for KalmanFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::KalmanFilter
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        if ctx.channels != self.config.dimensions {
            return Err(PipelineError::ChannelMismatch(format!(
                "Kalman filter tracks {} dimensions but received {} channels",
                self.config.dimensions, ctx.channels
            )));
        }
        let dt = 1.0 / ctx.sample_rate;
        let q = self.config.process_noise;
        let r = self.config.measurement_noise;
        let channels = ctx.channels;
        for frame in 0..frames {
            for (channel, cell) in self.cells.iter_mut().enumerate() {
                let index = frame * channels + channel;
                samples[index] = Self::step(cell, samples[index] as f64, dt, q, r) as f32;
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("dimensions", self.config.dimensions as i64)
            .with_float("processNoise", self.config.process_noise)
            .with_float("measurementNoise", self.config.measurement_noise)
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for cell in &self.cells {
            state = state.with_channel(
                ChannelState::new()
                    .with_scalar("position", cell.position)
                    .with_scalar("velocity", cell.velocity)
                    .with_scalar("p00", cell.p00)
                    .with_scalar("p01", cell.p01)
                    .with_scalar("p10", cell.p10)
                    .with_scalar("p11", cell.p11)
                    .with_counter("initialized", u64::from(cell.initialized)),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if state.channel_count() == 0 {
            self.reset();
            return Ok(());
        }
        if state.channel_count() != self.config.dimensions {
            return Err(PipelineError::StateLoad(format!(
                "Kalman state has {} channel cells, expected {}",
                state.channel_count(),
                self.config.dimensions
            )));
        }
        let mut cells = Vec::with_capacity(self.config.dimensions);
        for index in 0..state.channel_count() {
            let channel = state.channel(index)?;
            cells.push(KalmanCell {
                position: channel.scalar("position")?,
                velocity: channel.scalar("velocity")?,
                p00: channel.scalar("p00")?,
                p01: channel.scalar("p01")?,
                p10: channel.scalar("p10")?,
                p11: channel.scalar("p11")?,
                initialized: channel.counter("initialized")? != 0,
            });
        }
        self.cells = cells;
        Ok(())
    }

    fn reset(&mut self) {
        self.cells = vec![KalmanCell::default(); self.config.dimensions];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: &mut KalmanFilterStage, input: &[f32], channels: usize) -> Vec<f32> {
        let mut samples = input.to_vec();
        let ctx = BlockContext::new(channels, 100.0);
        stage.process_block(&mut samples, &ctx).unwrap();
        samples
    }

    #[test]
    fn test_config_validation() {
        assert!(KalmanFilterStage::new(KalmanFilterConfig { dimensions: 0, ..Default::default() }).is_err());
        assert!(KalmanFilterStage::new(KalmanFilterConfig { process_noise: 0.0, ..Default::default() }).is_err());
        assert!(KalmanFilterStage::new(KalmanFilterConfig { measurement_noise: -1.0, ..Default::default() }).is_err());
    }

    #[test]
    fn test_dimension_channel_contract() {
        let mut stage = KalmanFilterStage::new(KalmanFilterConfig {
            dimensions: 2,
            ..Default::default()
        })
        .unwrap();
        let mut samples = vec![0.0; 3];
        let ctx = BlockContext::new(3, 100.0);
        assert!(stage.process_block(&mut samples, &ctx).is_err());
    }

    #[test]
    fn test_first_sample_initializes() {
        let mut stage = KalmanFilterStage::new(KalmanFilterConfig::default()).unwrap();
        let out = run(&mut stage, &[5.0], 1);
        assert_eq!(out, vec![5.0]);
    }

    /// Tracking a constant level: the filtered output converges to it.
    #[test]
    fn test_tracks_constant_level() {
        let mut stage = KalmanFilterStage::new(KalmanFilterConfig::default()).unwrap();
        let input = vec![3.0f32; 200];
        let out = run(&mut stage, &input, 1);
        assert!((out[199] - 3.0).abs() < 1e-3);
    }

    /// Tracking a ramp: after convergence the velocity estimate follows it.
    #[test]
    fn test_tracks_ramp() {
        let mut stage = KalmanFilterStage::new(KalmanFilterConfig {
            dimensions: 1,
            process_noise: 1e-2,
            measurement_noise: 1e-2,
        })
        .unwrap();
        let input: Vec<f32> = (0..300).map(|i| i as f32 * 0.1).collect();
        let out = run(&mut stage, &input, 1);
        let tail_error = (out[299] - 29.9).abs();
        assert!(tail_error < 0.5, "lagging too far: {}", tail_error);
        assert!(stage.cells[0].velocity > 0.0, "velocity estimate must be positive");
    }

    /// Smoothing: filtered output of a noisy constant has lower variance
    /// than the measurements.
    #[test]
    fn test_smooths_noise() {
        let mut stage = KalmanFilterStage::new(KalmanFilterConfig {
            dimensions: 1,
            process_noise: 1e-4,
            measurement_noise: 1.0,
        })
        .unwrap();
        // Deterministic pseudo-noise around 1.0
        let input: Vec<f32> = (0..400)
            .map(|i| 1.0 + ((i * 31 % 17) as f32 - 8.0) / 40.0)
            .collect();
        let out = run(&mut stage, &input, 1);
        let late = &out[200..];
        let in_late = &input[200..];
        let var = |xs: &[f32]| {
            let mean: f32 = xs.iter().sum::<f32>() / xs.len() as f32;
            xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / xs.len() as f32
        };
        assert!(var(late) < var(in_late) / 4.0);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut stage = KalmanFilterStage::new(KalmanFilterConfig::default()).unwrap();
        run(&mut stage, &[1.0, 2.0, 3.0], 1);
        let state = stage.snapshot_state();

        let mut restored = KalmanFilterStage::new(KalmanFilterConfig::default()).unwrap();
        restored.restore_state(&state).unwrap();
        assert_eq!(run(&mut stage, &[4.0], 1), run(&mut restored, &[4.0], 1));
    }
}
