// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Running-Statistic Stages
//!
//! The windowed statistics family (movingAverage, rms, meanAbsoluteValue,
//! variance, zScoreNormalize) plus the cumulative and exponential moving
//! averages.
//!
//! Windowed stages keep, per channel, a ring of the last `windowSize`
//! inputs together with a running sum and running sum-of-squares, giving
//! O(1) updates per sample. In `moving` mode the ring persists across
//! chunks; in `batch` mode the statistic is computed over the whole buffer
//! and broadcast to every output sample of the channel (except
//! zScoreNormalize, which normalizes each sample against the whole-buffer
//! statistics).
//!
//! On snapshot restore the running sums are recomputed from the stored ring
//! and compared against the stored scalars within float-rounding tolerance;
//! a mismatch is a fatal load error ("Running sum validation failed"). This
//! catches tampering and migration bugs where ring contents drift away from
//! their accumulators.

use std::collections::VecDeque;

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageMode, StageOutput, StageParameters,
    StageService, StageState,
};

use super::{verify_channel_binding, WindowSpec};

/// Recompute tolerance: float rounding of a `len`-term accumulation at the
/// observed magnitude.
fn recompute_tolerance(len: usize, magnitude: f64) -> f64 {
    (len as f64 + 1.0) * f32::EPSILON as f64 * (1.0 + magnitude)
}

// ---------------------------------------------------------------------------
// Windowed statistics (movingAverage / rms / meanAbsoluteValue / variance /
// zScoreNormalize)
// ---------------------------------------------------------------------------

/// Which statistic a [`WindowedStatisticStage`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statistic {
    Mean,
    RootMeanSquare,
    MeanAbsolute,
    Variance,
    ZScore,
}

/// Configuration shared by the windowed-statistic stages.
#[derive(Debug, Clone)]
pub struct WindowedStatisticConfig {
    pub mode: StageMode,
    /// Required in `moving` mode; ignored in `batch` mode.
    pub window: Option<WindowSpec>,
    /// Needed only when `window` is a duration.
    pub sample_rate: Option<f64>,
}

impl Default for WindowedStatisticConfig {
    fn default() -> Self {
        Self {
            mode: StageMode::Moving,
            window: None,
            sample_rate: None,
        }
    }
}

/// Per-channel ring + running accumulators.
#[derive(Debug, Clone, Default)]
struct WindowCell {
    ring: VecDeque<f32>,
    running_sum: f64,
    running_sum_sq: f64,
}

impl WindowCell {
    /// Pushes one value (already rectified for meanAbsoluteValue), evicting
    /// the oldest when the ring is at capacity.
    fn push(&mut self, value: f32, window_size: usize) {
        if self.ring.len() == window_size {
            if let Some(old) = self.ring.pop_front() {
                self.running_sum -= old as f64;
                self.running_sum_sq -= old as f64 * old as f64;
            }
        }
        self.ring.push_back(value);
        self.running_sum += value as f64;
        self.running_sum_sq += value as f64 * value as f64;
    }

    fn fill(&self) -> usize {
        self.ring.len()
    }
}

/// Windowed running-statistic stage.
pub struct WindowedStatisticStage {
    kind: StageKind,
    statistic: Statistic,
    mode: StageMode,
    window_size: usize,
    cells: Vec<WindowCell>,
    bound_channels: Option<usize>,
}

impl WindowedStatisticStage {
    fn build(
        kind: StageKind,
        statistic: Statistic,
        config: WindowedStatisticConfig,
    ) -> Result<Self, PipelineError> {
        let window_size = match config.mode {
            StageMode::Moving => {
                let spec = config.window.ok_or_else(|| {
                    PipelineError::MissingParameter(format!(
                        "Stage '{}' in moving mode requires windowSize or windowDuration",
                        kind
                    ))
                })?;
                spec.resolve(config.sample_rate)?
            }
            // Batch mode works over the whole buffer; no ring is kept.
            StageMode::Batch => 0,
        };
        Ok(Self {
            kind,
            statistic,
            mode: config.mode,
            window_size,
            cells: Vec::new(),
            bound_channels: None,
        })
    }

    pub fn moving_average(config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::MovingAverage, Statistic::Mean, config)
    }

    pub fn rms(config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::Rms, Statistic::RootMeanSquare, config)
    }

    pub fn mean_absolute_value(config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::MeanAbsoluteValue, Statistic::MeanAbsolute, config)
    }

    pub fn variance(config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::Variance, Statistic::Variance, config)
    }

    pub fn z_score_normalize(config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::ZScoreNormalize, Statistic::ZScore, config)
    }

    fn ensure_cells(&mut self, channels: usize) {
        if self.cells.len() != channels {
            self.cells = vec![WindowCell::default(); channels];
            self.bound_channels = Some(channels);
        }
    }

    /// Statistic of a cell after the current sample has been pushed.
    fn emit(&self, cell: &WindowCell, current: f32) -> f32 {
        let fill = cell.fill() as f64;
        match self.statistic {
            Statistic::Mean | Statistic::MeanAbsolute => (cell.running_sum / fill) as f32,
            Statistic::RootMeanSquare => (cell.running_sum_sq / fill).sqrt() as f32,
            Statistic::Variance => {
                let mean = cell.running_sum / fill;
                let variance = (cell.running_sum_sq / fill - mean * mean).max(0.0);
                variance as f32
            }
            Statistic::ZScore => {
                let mean = cell.running_sum / fill;
                let variance = (cell.running_sum_sq / fill - mean * mean).max(0.0);
                let std = variance.sqrt();
                if std > 0.0 {
                    ((current as f64 - mean) / std) as f32
                } else {
                    0.0
                }
            }
        }
    }

    fn process_moving(&mut self, samples: &mut [f32], channels: usize) {
        let frames = samples.len() / channels;
        for frame in 0..frames {
            for channel in 0..channels {
                let index = frame * channels + channel;
                let x = samples[index];
                let pushed = if self.statistic == Statistic::MeanAbsolute {
                    x.abs()
                } else {
                    x
                };
                let window = self.window_size;
                self.cells[channel].push(pushed, window);
                samples[index] = self.emit(&self.cells[channel], x);
            }
        }
    }

    fn process_batch(&self, samples: &mut [f32], channels: usize) {
        let frames = samples.len() / channels;
        if frames == 0 {
            return;
        }
        for channel in 0..channels {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for frame in 0..frames {
                let x = samples[frame * channels + channel] as f64;
                sum += if self.statistic == Statistic::MeanAbsolute {
                    x.abs()
                } else {
                    x
                };
                sum_sq += x * x;
            }
            let n = frames as f64;
            let mean = sum / n;
            match self.statistic {
                Statistic::Mean | Statistic::MeanAbsolute => {
                    let value = mean as f32;
                    for frame in 0..frames {
                        samples[frame * channels + channel] = value;
                    }
                }
                Statistic::RootMeanSquare => {
                    let value = (sum_sq / n).sqrt() as f32;
                    for frame in 0..frames {
                        samples[frame * channels + channel] = value;
                    }
                }
                Statistic::Variance => {
                    let value = (sum_sq / n - mean * mean).max(0.0) as f32;
                    for frame in 0..frames {
                        samples[frame * channels + channel] = value;
                    }
                }
                Statistic::ZScore => {
                    let std = (sum_sq / n - mean * mean).max(0.0).sqrt();
                    for frame in 0..frames {
                        let index = frame * channels + channel;
                        samples[index] = if std > 0.0 {
                            ((samples[index] as f64 - mean) / std) as f32
                        } else {
                            0.0
                        };
                    }
                }
            }
        }
    }
}

impl StageService for WindowedStatisticStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        match self.mode {
            StageMode::Moving => {
                verify_channel_binding(self.kind, self.bound_channels, ctx.channels)?;
                self.ensure_cells(ctx.channels);
                self.process_moving(samples, ctx.channels);
            }
            StageMode::Batch => {
                if ctx.channels == 0 {
                    return Err(PipelineError::ChannelMismatch(format!(
                        "Stage '{}' received a zero channel count",
                        self.kind
                    )));
                }
                self.process_batch(samples, ctx.channels);
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        let params = StageParameters::new().with_text("mode", &self.mode.to_string());
        match self.mode {
            StageMode::Moving => params.with_integer("windowSize", self.window_size as i64),
            StageMode::Batch => params,
        }
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for cell in &self.cells {
            state = state.with_channel(
                ChannelState::new()
                    .with_scalar("runningSum", cell.running_sum)
                    .with_scalar("runningSumOfSquares", cell.running_sum_sq)
                    .with_counter("fill", cell.fill() as u64)
                    .with_buffer("window", cell.ring.iter().copied().collect()),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if self.mode == StageMode::Batch {
            // Batch stages are stateless between calls.
            self.cells.clear();
            self.bound_channels = None;
            return Ok(());
        }
        let mut cells = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let channel = state.channel(index)?;
            let window = channel.buffer("window")?;
            if window.len() > self.window_size {
                return Err(PipelineError::StateLoad(format!(
                    "State buffer 'window' has length {}, exceeds window size {}",
                    window.len(),
                    self.window_size
                )));
            }
            let fill = channel.counter("fill")? as usize;
            if fill != window.len() {
                return Err(PipelineError::StateLoad(format!(
                    "Fill count {} does not match stored window length {}",
                    fill,
                    window.len()
                )));
            }

            let stored_sum = channel.scalar("runningSum")?;
            let stored_sum_sq = channel.scalar("runningSumOfSquares")?;
            let mut recomputed_sum = 0.0f64;
            let mut recomputed_sum_sq = 0.0f64;
            let mut magnitude = 0.0f64;
            for &value in window {
                recomputed_sum += value as f64;
                recomputed_sum_sq += value as f64 * value as f64;
                magnitude += (value as f64).abs();
            }
            if (recomputed_sum - stored_sum).abs() > recompute_tolerance(window.len(), magnitude) {
                return Err(PipelineError::StateValidation(format!(
                    "Running sum validation failed: stored {}, recomputed {}",
                    stored_sum, recomputed_sum
                )));
            }
            if (recomputed_sum_sq - stored_sum_sq).abs()
                > recompute_tolerance(window.len(), recomputed_sum_sq)
            {
                return Err(PipelineError::StateValidation(format!(
                    "Running sum of squares validation failed: stored {}, recomputed {}",
                    stored_sum_sq, recomputed_sum_sq
                )));
            }

            cells.push(WindowCell {
                ring: window.iter().copied().collect(),
                running_sum: stored_sum,
                running_sum_sq: stored_sum_sq,
            });
        }
        self.bound_channels = if cells.is_empty() { None } else { Some(cells.len()) };
        self.cells = cells;
        Ok(())
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.bound_channels = None;
    }
}

// ---------------------------------------------------------------------------
// Cumulative moving average
// ---------------------------------------------------------------------------

/// Configuration for [`CumulativeMovingAverageStage`].
#[derive(Debug, Clone, Default)]
pub struct CumulativeMovingAverageConfig {
    pub mode: StageMode,
}

#[derive(Debug, Clone, Copy, Default)]
struct CmaCell {
    sum: f64,
    count: u64,
}

/// Cumulative moving average: `cma[n] = (sum + x[n]) / (count + 1)`.
pub struct CumulativeMovingAverageStage {
    mode: StageMode,
    cells: Vec<CmaCell>,
    bound_channels: Option<usize>,
}

impl CumulativeMovingAverageStage {
    pub fn new(config: CumulativeMovingAverageConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            mode: config.mode,
            cells: Vec::new(),
            bound_channels: None,
        })
    }

    fn run(cells: &mut [CmaCell], samples: &mut [f32], channels: usize) {
        let frames = samples.len() / channels;
        for frame in 0..frames {
            for (channel, cell) in cells.iter_mut().enumerate() {
                let index = frame * channels + channel;
                let x = samples[index] as f64;
                let cma = (cell.sum + x) / (cell.count as f64 + 1.0);
                cell.sum += x;
                cell.count += 1;
                samples[index] = cma as f32;
            }
        }
    }
}

impl StageService for CumulativeMovingAverageStage {
    fn kind(&self) -> StageKind {
        StageKind::CumulativeMovingAverage
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        match self.mode {
            StageMode::Moving => {
                verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
                if self.cells.len() != ctx.channels {
                    self.cells = vec![CmaCell::default(); ctx.channels];
                    self.bound_channels = Some(ctx.channels);
                }
                Self::run(&mut self.cells, samples, ctx.channels);
            }
            StageMode::Batch => {
                if ctx.channels == 0 {
                    return Err(PipelineError::ChannelMismatch(
                        "Cumulative moving average received a zero channel count".to_string(),
                    ));
                }
                let mut scratch = vec![CmaCell::default(); ctx.channels];
                Self::run(&mut scratch, samples, ctx.channels);
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_text("mode", &self.mode.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for cell in &self.cells {
            state = state.with_channel(
                ChannelState::new()
                    .with_scalar("sum", cell.sum)
                    .with_counter("count", cell.count),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if self.mode == StageMode::Batch {
            self.cells.clear();
            self.bound_channels = None;
            return Ok(());
        }
        let mut cells = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let channel = state.channel(index)?;
            cells.push(CmaCell {
                sum: channel.scalar("sum")?,
                count: channel.counter("count")?,
            });
        }
        self.bound_channels = if cells.is_empty() { None } else { Some(cells.len()) };
        self.cells = cells;
        Ok(())
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.bound_channels = None;
    }
}

// ---------------------------------------------------------------------------
// Exponential moving average
// ---------------------------------------------------------------------------

/// Configuration for [`ExponentialMovingAverageStage`].
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverageConfig {
    /// Smoothing factor in `(0, 1]`.
    pub alpha: f64,
    pub mode: StageMode,
}

#[derive(Debug, Clone, Copy, Default)]
struct EmaCell {
    y_prev: f32,
    initialized: bool,
}

/// First-order exponential smoother: `y[n] = α·x[n] + (1-α)·y[n-1]`,
/// seeded with `y[0] = x[0]`.
pub struct ExponentialMovingAverageStage {
    alpha: f64,
    mode: StageMode,
    cells: Vec<EmaCell>,
    bound_channels: Option<usize>,
}

impl ExponentialMovingAverageStage {
    pub fn new(config: ExponentialMovingAverageConfig) -> Result<Self, PipelineError> {
        if !config.alpha.is_finite() || config.alpha <= 0.0 || config.alpha > 1.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Alpha must lie in (0, 1], got {}",
                config.alpha
            )));
        }
        Ok(Self {
            alpha: config.alpha,
            mode: config.mode,
            cells: Vec::new(),
            bound_channels: None,
        })
    }

    fn run(alpha: f64, cells: &mut [EmaCell], samples: &mut [f32], channels: usize) {
        let frames = samples.len() / channels;
        for frame in 0..frames {
            for (channel, cell) in cells.iter_mut().enumerate() {
                let index = frame * channels + channel;
                let x = samples[index];
                let y = if cell.initialized {
                    (alpha * x as f64 + (1.0 - alpha) * cell.y_prev as f64) as f32
                } else {
                    cell.initialized = true;
                    x
                };
                cell.y_prev = y;
                samples[index] = y;
            }
        }
    }
}

impl StageService for ExponentialMovingAverageStage {
    fn kind(&self) -> StageKind {
        StageKind::ExponentialMovingAverage
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        match self.mode {
            StageMode::Moving => {
                verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
                if self.cells.len() != ctx.channels {
                    self.cells = vec![EmaCell::default(); ctx.channels];
                    self.bound_channels = Some(ctx.channels);
                }
                Self::run(self.alpha, &mut self.cells, samples, ctx.channels);
            }
            StageMode::Batch => {
                if ctx.channels == 0 {
                    return Err(PipelineError::ChannelMismatch(
                        "Exponential moving average received a zero channel count".to_string(),
                    ));
                }
                let mut scratch = vec![EmaCell::default(); ctx.channels];
                Self::run(self.alpha, &mut scratch, samples, ctx.channels);
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_float("alpha", self.alpha)
            .with_text("mode", &self.mode.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for cell in &self.cells {
            state = state.with_channel(
                ChannelState::new()
                    .with_scalar("yPrev", cell.y_prev as f64)
                    .with_counter("initialized", u64::from(cell.initialized)),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if self.mode == StageMode::Batch {
            self.cells.clear();
            self.bound_channels = None;
            return Ok(());
        }
        let mut cells = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let channel = state.channel(index)?;
            cells.push(EmaCell {
                y_prev: channel.scalar("yPrev")? as f32,
                initialized: channel.counter("initialized")? != 0,
            });
        }
        self.bound_channels = if cells.is_empty() { None } else { Some(cells.len()) };
        self.cells = cells;
        Ok(())
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.bound_channels = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moving(window: usize) -> WindowedStatisticConfig {
        WindowedStatisticConfig {
            mode: StageMode::Moving,
            window: Some(WindowSpec::Samples(window)),
            sample_rate: None,
        }
    }

    fn batch() -> WindowedStatisticConfig {
        WindowedStatisticConfig {
            mode: StageMode::Batch,
            window: None,
            sample_rate: None,
        }
    }

    fn run(stage: &mut dyn StageService, input: &[f32], channels: usize) -> Vec<f32> {
        let mut samples = input.to_vec();
        let ctx = BlockContext::new(channels, 1000.0);
        match stage.process_block(&mut samples, &ctx).unwrap() {
            StageOutput::InPlace => samples,
            StageOutput::Resized { samples, .. } => samples,
        }
    }

    /// MovingAverage(3) over [1..5]: warm-up divisors, then the sliding window.
    #[test]
    fn test_moving_average_window_3() {
        let mut stage = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        let out = run(&mut stage, &[1.0, 2.0, 3.0, 4.0, 5.0], 1);
        assert_eq!(out, vec![1.0, 1.5, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_rms_window_3() {
        let mut stage = WindowedStatisticStage::rms(moving(3)).unwrap();
        let out = run(&mut stage, &[3.0, 4.0, 0.0, 6.0, 8.0], 1);
        let expected = [3.0, 3.5355339, 2.8867513, 4.1633320, 5.7735027];
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_variance_batch_broadcast() {
        let mut stage = WindowedStatisticStage::variance(batch()).unwrap();
        let out = run(&mut stage, &[1.0, 2.0, 3.0, 4.0, 5.0], 1);
        assert_eq!(out, vec![2.0; 5]);
    }

    #[test]
    fn test_mean_absolute_value_is_nonnegative() {
        let mut stage = WindowedStatisticStage::mean_absolute_value(moving(4)).unwrap();
        let out = run(&mut stage, &[-1.0, 2.0, -3.0, 4.0, -5.0], 1);
        assert!(out.iter().all(|&v| v >= 0.0));
        assert!((out[1] - 1.5).abs() < 1e-6); // mean(|-1|, |2|)
    }

    #[test]
    fn test_zscore_of_constant_input_is_zero() {
        let mut stage = WindowedStatisticStage::z_score_normalize(moving(4)).unwrap();
        let out = run(&mut stage, &[2.0, 2.0, 2.0, 2.0], 1);
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_multi_channel_independence() {
        let mut stage = WindowedStatisticStage::moving_average(moving(2)).unwrap();
        // ch0: 1, 3, 5  /  ch1: 10, 30, 50
        let out = run(&mut stage, &[1.0, 10.0, 3.0, 30.0, 5.0, 50.0], 2);
        assert_eq!(out, vec![1.0, 10.0, 2.0, 20.0, 4.0, 40.0]);
    }

    /// Streaming two chunks must match the single-chunk result exactly.
    #[test]
    fn test_moving_chunk_split_equivalence() {
        let input: Vec<f32> = (0..40).map(|i| ((i * 17 % 23) as f32) - 11.0).collect();
        let mut whole = WindowedStatisticStage::rms(moving(5)).unwrap();
        let expected = run(&mut whole, &input, 1);

        let mut split = WindowedStatisticStage::rms(moving(5)).unwrap();
        let mut actual = run(&mut split, &input[..13], 1);
        actual.extend(run(&mut split, &input[13..], 1));
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_snapshot_roundtrip_continues_stream() {
        let input: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut original = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        run(&mut original, &input[..10], 1);
        let state = original.snapshot_state();

        let mut restored = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        restored.restore_state(&state).unwrap();

        let from_original = run(&mut original, &input[10..], 1);
        let from_restored = run(&mut restored, &input[10..], 1);
        assert_eq!(from_original, from_restored);
    }

    /// A tampered running sum must be rejected by the recompute check.
    #[test]
    fn test_tampered_running_sum_rejected() {
        let mut stage = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        run(&mut stage, &[1.0, 2.0, 3.0, 4.0], 1);
        let mut state = stage.snapshot_state();
        if let Some(channel) = state.channels.get_mut(0) {
            channel.scalars.insert("runningSum".to_string(), 999.0);
        }
        let mut fresh = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        let err = fresh.restore_state(&state).unwrap_err();
        assert!(err.to_string().contains("Running sum validation failed"), "{}", err);
    }

    #[test]
    fn test_tampered_sum_of_squares_rejected() {
        let mut stage = WindowedStatisticStage::rms(moving(3)).unwrap();
        run(&mut stage, &[1.0, 2.0, 3.0], 1);
        let mut state = stage.snapshot_state();
        if let Some(channel) = state.channels.get_mut(0) {
            channel.scalars.insert("runningSumOfSquares".to_string(), -1.0);
        }
        let mut fresh = WindowedStatisticStage::rms(moving(3)).unwrap();
        let err = fresh.restore_state(&state).unwrap_err();
        assert!(
            err.to_string().contains("Running sum of squares validation failed"),
            "{}",
            err
        );
    }

    #[test]
    fn test_window_duration_resolution() {
        let config = WindowedStatisticConfig {
            mode: StageMode::Moving,
            window: Some(WindowSpec::Duration(0.003)),
            sample_rate: Some(1000.0),
        };
        let stage = WindowedStatisticStage::moving_average(config).unwrap();
        let params = stage.structural_parameters();
        assert_eq!(
            params.get("windowSize"),
            Some(&signal_pipeline_domain::ParameterValue::Integer(3))
        );
    }

    #[test]
    fn test_moving_requires_window() {
        let config = WindowedStatisticConfig {
            mode: StageMode::Moving,
            window: None,
            sample_rate: None,
        };
        assert!(WindowedStatisticStage::moving_average(config).is_err());
    }

    #[test]
    fn test_cumulative_moving_average_stream() {
        let mut stage =
            CumulativeMovingAverageStage::new(CumulativeMovingAverageConfig::default()).unwrap();
        let out = run(&mut stage, &[10.0, 20.0, 30.0, 40.0, 50.0], 1);
        assert_eq!(out, vec![10.0, 15.0, 20.0, 25.0, 30.0]);
        let next = run(&mut stage, &[60.0], 1);
        assert_eq!(next, vec![35.0]);
    }

    #[test]
    fn test_cma_batch_resets_each_call() {
        let mut stage = CumulativeMovingAverageStage::new(CumulativeMovingAverageConfig {
            mode: StageMode::Batch,
        })
        .unwrap();
        let first = run(&mut stage, &[10.0, 20.0], 1);
        let second = run(&mut stage, &[10.0, 20.0], 1);
        assert_eq!(first, second);
        assert_eq!(first, vec![10.0, 15.0]);
    }

    #[test]
    fn test_ema_alpha_half() {
        let mut stage = ExponentialMovingAverageStage::new(ExponentialMovingAverageConfig {
            alpha: 0.5,
            mode: StageMode::Moving,
        })
        .unwrap();
        let out = run(&mut stage, &[1.0, 2.0, 3.0, 4.0, 5.0], 1);
        assert_eq!(out, vec![1.0, 1.5, 2.25, 3.125, 4.0625]);
    }

    #[test]
    fn test_ema_rejects_bad_alpha() {
        for alpha in [0.0, -0.5, 1.5, f64::NAN] {
            assert!(ExponentialMovingAverageStage::new(ExponentialMovingAverageConfig {
                alpha,
                mode: StageMode::Moving,
            })
            .is_err());
        }
    }

    #[test]
    fn test_channel_count_change_rejected_in_moving_mode() {
        let mut stage = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        run(&mut stage, &[1.0, 2.0], 2);
        let mut samples = vec![1.0, 2.0, 3.0];
        let ctx = BlockContext::new(3, 1000.0);
        assert!(stage.process_block(&mut samples, &ctx).is_err());
    }

    #[test]
    fn test_empty_input_is_noop() {
        let mut stage = WindowedStatisticStage::moving_average(moving(3)).unwrap();
        let out = run(&mut stage, &[], 1);
        assert!(out.is_empty());
        // State untouched: the next call still warms up from scratch
        let out = run(&mut stage, &[4.0], 1);
        assert_eq!(out, vec![4.0]);
    }
}
