// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Detection Stages
//!
//! Peak detection, clip detection, and the SNR estimator.
//!
//! `peakDetection` emits a same-shape indicator stream: 1.0 where the input
//! is a local maximum that clears the threshold and survives
//! `minPeakDistance` suppression. The tie rule: the earlier peak wins
//! unless a later candidate is strictly higher, in which case the earlier
//! suppression is rescinded (within the current output buffer; a peak
//! already emitted in a previous chunk cannot be unmarked). A candidate
//! formed by the final sample of a chunk is confirmed by the first sample
//! of the next chunk and marked at the head of that chunk's output.
//!
//! Moving mode supports `windowSize = 3` only; larger odd sizes are
//! accepted with a warning and evaluated as 3.

use tracing::warn;

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageMode, StageOutput, StageParameters,
    StageService, StageState,
};

use super::{verify_channel_binding, WindowSpec};

/// Domain a peak detector operates on. The arithmetic is identical; the
/// parameter records whether indices are time samples or spectrum bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakDomain {
    #[default]
    Time,
    Frequency,
}

impl std::fmt::Display for PeakDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeakDomain::Time => write!(f, "time"),
            PeakDomain::Frequency => write!(f, "frequency"),
        }
    }
}

/// Configuration for [`PeakDetectionStage`].
#[derive(Debug, Clone)]
pub struct PeakDetectionConfig {
    /// Minimum value a sample must reach to count as a peak.
    pub threshold: f64,
    pub mode: StageMode,
    pub domain: PeakDomain,
    /// Odd, >= 3. Moving mode evaluates 3 regardless (warned).
    pub window_size: usize,
    /// Minimum index distance between reported peaks.
    pub min_peak_distance: usize,
}

impl Default for PeakDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            mode: StageMode::Moving,
            domain: PeakDomain::Time,
            window_size: 3,
            min_peak_distance: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PeakCell {
    prev1: f32,
    prev2: f32,
    samples_seen: u64,
    /// Samples remaining before another peak may be reported.
    cooldown: u64,
    /// Value of the peak that armed the cooldown (for the rescind rule).
    last_peak_value: f32,
}

/// Local-maximum indicator stage.
pub struct PeakDetectionStage {
    config: PeakDetectionConfig,
    cells: Vec<PeakCell>,
    bound_channels: Option<usize>,
}

impl PeakDetectionStage {
    pub fn new(config: PeakDetectionConfig) -> Result<Self, PipelineError> {
        if !config.threshold.is_finite() || config.threshold < 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Peak threshold must be >= 0, got {}",
                config.threshold
            )));
        }
        if config.window_size < 3 || config.window_size % 2 == 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Peak window size must be odd and >= 3, got {}",
                config.window_size
            )));
        }
        if config.min_peak_distance < 1 {
            return Err(PipelineError::InvalidParameter(
                "Minimum peak distance must be >= 1".to_string(),
            ));
        }
        if config.mode == StageMode::Moving && config.window_size != 3 {
            warn!(
                window_size = config.window_size,
                "moving-mode peak detection supports windowSize 3; larger windows are evaluated as 3"
            );
        }
        Ok(Self {
            config,
            cells: Vec::new(),
            bound_channels: None,
        })
    }

    fn process_moving(&mut self, samples: &mut [f32], channels: usize) {
        let frames = samples.len() / channels;
        let threshold = self.config.threshold as f32;
        let distance = self.config.min_peak_distance as u64;

        for channel in 0..channels {
            // Index of the most recent peak within this output buffer, for
            // the rescind rule; peaks from earlier chunks are final.
            let mut last_peak_slot: Option<usize> = None;
            for frame in 0..frames {
                let index = frame * channels + channel;
                let x = samples[index];
                let cell = &self.cells[channel];

                let mut is_peak = false;
                if cell.samples_seen >= 2
                    && cell.prev1 > cell.prev2
                    && cell.prev1 >= x
                    && cell.prev1 >= threshold
                {
                    if cell.cooldown == 0 {
                        is_peak = true;
                    } else if cell.prev1 > cell.last_peak_value {
                        // Strictly higher: rescind the previous suppression
                        if let Some(slot) = last_peak_slot {
                            samples[slot] = 0.0;
                        }
                        is_peak = true;
                    }
                }

                // The candidate is the previous sample; its output slot is
                // one frame back (or the head of this buffer when the
                // candidate formed at the previous chunk's tail).
                samples[index] = 0.0;
                if is_peak {
                    let cell_value = self.cells[channel].prev1;
                    let slot = if frame > 0 { index - channels } else { index };
                    samples[slot] = 1.0;
                    last_peak_slot = Some(slot);
                    let cell = &mut self.cells[channel];
                    cell.cooldown = distance;
                    cell.last_peak_value = cell_value;
                }

                let cell = &mut self.cells[channel];
                if cell.cooldown > 0 {
                    cell.cooldown -= 1;
                }
                cell.prev2 = cell.prev1;
                cell.prev1 = x;
                cell.samples_seen += 1;
            }
        }
    }

    fn process_batch(&self, samples: &mut [f32], channels: usize) {
        let frames = samples.len() / channels;
        let threshold = self.config.threshold as f32;
        let radius = self.config.window_size / 2;
        let distance = self.config.min_peak_distance;

        for channel in 0..channels {
            let column: Vec<f32> = (0..frames)
                .map(|frame| samples[frame * channels + channel])
                .collect();

            // Candidate pass: strict rise into the center, neighborhood max
            let mut candidates: Vec<usize> = Vec::new();
            for center in radius..frames.saturating_sub(radius) {
                let value = column[center];
                if value < threshold {
                    continue;
                }
                let neighborhood = &column[center - radius..=center + radius];
                let is_max = neighborhood.iter().all(|&v| v <= value)
                    && column[center - 1] < value;
                if is_max {
                    candidates.push(center);
                }
            }

            // Suppression pass with the rescind rule
            let mut kept: Vec<(usize, f32)> = Vec::new();
            for &candidate in &candidates {
                let value = column[candidate];
                match kept.last() {
                    Some(&(last_index, last_value))
                        if candidate - last_index < distance =>
                    {
                        if value > last_value {
                            kept.pop();
                            kept.push((candidate, value));
                        }
                    }
                    _ => kept.push((candidate, value)),
                }
            }

            for frame in 0..frames {
                samples[frame * channels + channel] = 0.0;
            }
            for (index, _) in kept {
                samples[index * channels + channel] = 1.0;
            }
        }
    }
}

impl StageService for PeakDetectionStage {
    fn kind(&self) -> StageKind {
        StageKind::PeakDetection
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        match self.config.mode {
            StageMode::Moving => {
                verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
                if self.cells.len() != ctx.channels {
                    self.cells = vec![PeakCell::default(); ctx.channels];
                    self.bound_channels = Some(ctx.channels);
                }
                self.process_moving(samples, ctx.channels);
            }
            StageMode::Batch => {
                if ctx.channels == 0 {
                    return Err(PipelineError::ChannelMismatch(
                        "Peak detection received a zero channel count".to_string(),
                    ));
                }
                self.process_batch(samples, ctx.channels);
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_float("threshold", self.config.threshold)
            .with_text("mode", &self.config.mode.to_string())
            .with_text("domain", &self.config.domain.to_string())
            .with_integer("windowSize", self.config.window_size as i64)
            .with_integer("minPeakDistance", self.config.min_peak_distance as i64)
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for cell in &self.cells {
            state = state.with_channel(
                ChannelState::new()
                    .with_scalar("prev1", cell.prev1 as f64)
                    .with_scalar("prev2", cell.prev2 as f64)
                    .with_scalar("lastPeakValue", cell.last_peak_value as f64)
                    .with_counter("samplesSeen", cell.samples_seen)
                    .with_counter("peakCooldown", cell.cooldown),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if self.config.mode == StageMode::Batch {
            self.cells.clear();
            self.bound_channels = None;
            return Ok(());
        }
        let mut cells = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let channel = state.channel(index)?;
            cells.push(PeakCell {
                prev1: channel.scalar("prev1")? as f32,
                prev2: channel.scalar("prev2")? as f32,
                last_peak_value: channel.scalar("lastPeakValue")? as f32,
                samples_seen: channel.counter("samplesSeen")?,
                cooldown: channel.counter("peakCooldown")?,
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

/// Configuration for [`ClipDetectionStage`].
#[derive(Debug, Clone)]
pub struct ClipDetectionConfig {
    /// Absolute level at which a sample counts as clipped.
    pub threshold: f64,
}

impl Default for ClipDetectionConfig {
    fn default() -> Self {
        Self { threshold: 1.0 }
    }
}

/// Indicator stage: 1.0 where `|x| >= threshold`.
pub struct ClipDetectionStage {
    threshold: f32,
}

impl ClipDetectionStage {
    pub fn new(config: ClipDetectionConfig) -> Result<Self, PipelineError> {
        if !config.threshold.is_finite() || config.threshold <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Clip threshold must be positive, got {}",
                config.threshold
            )));
        }
        Ok(Self {
            threshold: config.threshold as f32,
        })
    }
}

impl StageService for ClipDetectionStage {
    fn kind(&self) -> StageKind {
        StageKind::ClipDetection
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        for sample in samples.iter_mut() {
            *sample = if sample.abs() >= self.threshold { 1.0 } else { 0.0 };
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_float("threshold", self.threshold as f64)
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
    }

    fn restore_state(&mut self, _state: &StageState) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) {}
}

/// Configuration for [`SnrStage`].
#[derive(Debug, Clone)]
pub struct SnrConfig {
    pub window: WindowSpec,
    /// Needed only when `window` is a duration.
    pub sample_rate: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct PowerWindow {
    ring: std::collections::VecDeque<f32>,
    sum_sq: f64,
}

impl PowerWindow {
    fn push(&mut self, value: f32, window_size: usize) {
        if self.ring.len() == window_size {
            if let Some(old) = self.ring.pop_front() {
                self.sum_sq -= old as f64 * old as f64;
            }
        }
        self.ring.push_back(value);
        self.sum_sq += value as f64 * value as f64;
    }

    fn mean_power(&self) -> f64 {
        if self.ring.is_empty() {
            0.0
        } else {
            (self.sum_sq / self.ring.len() as f64).max(0.0)
        }
    }
}

/// Two-channel (signal, noise) → one-channel SNR in dB, clamped to ±100.
pub struct SnrStage {
    window_size: usize,
    signal: PowerWindow,
    noise: PowerWindow,
}

impl SnrStage {
    pub fn new(config: SnrConfig) -> Result<Self, PipelineError> {
        let window_size = config.window.resolve(config.sample_rate)?;
        Ok(Self {
            window_size,
            signal: PowerWindow::default(),
            noise: PowerWindow::default(),
        })
    }

    fn snr_db(signal_power: f64, noise_power: f64) -> f32 {
        if signal_power == 0.0 && noise_power == 0.0 {
            return 0.0;
        }
        if noise_power == 0.0 {
            return 100.0;
        }
        if signal_power == 0.0 {
            return -100.0;
        }
        (10.0 * (signal_power / noise_power).log10()).clamp(-100.0, 100.0) as f32
    }

    fn window_state(window: &PowerWindow) -> ChannelState {
        ChannelState::new()
            .with_scalar("runningSumOfSquares", window.sum_sq)
            .with_counter("fill", window.ring.len() as u64)
            .with_buffer("window", window.ring.iter().copied().collect())
    }

    fn restore_window(cell: &ChannelState, window_size: usize) -> Result<PowerWindow, PipelineError> {
        let buffer = cell.buffer("window")?;
        if buffer.len() > window_size {
            return Err(PipelineError::StateLoad(format!(
                "State buffer 'window' has length {}, exceeds window size {}",
                buffer.len(),
                window_size
            )));
        }
        if cell.counter("fill")? as usize != buffer.len() {
            return Err(PipelineError::StateLoad(
                "Fill count does not match stored window length".to_string(),
            ));
        }
        let stored = cell.scalar("runningSumOfSquares")?;
        let recomputed: f64 = buffer.iter().map(|&v| v as f64 * v as f64).sum();
        let tolerance =
            (buffer.len() as f64 + 1.0) * f32::EPSILON as f64 * (1.0 + recomputed.abs());
        if (recomputed - stored).abs() > tolerance {
            return Err(PipelineError::StateValidation(format!(
                "Running sum of squares validation failed: stored {}, recomputed {}",
                stored, recomputed
            )));
        }
        Ok(PowerWindow {
            ring: buffer.iter().copied().collect(),
            sum_sq: stored,
        })
    }
}

impl StageService for SnrStage {
    fn kind(&self) -> StageKind {
        StageKind::Snr
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        if ctx.channels != 2 {
            return Err(PipelineError::ChannelMismatch(format!(
                "Stage 'snr' requires exactly 2 channels (signal, noise), got {}",
                ctx.channels
            )));
        }
        let mut out = Vec::with_capacity(frames);
        for frame in 0..frames {
            self.signal.push(samples[frame * 2], self.window_size);
            self.noise.push(samples[frame * 2 + 1], self.window_size);
            out.push(Self::snr_db(self.signal.mean_power(), self.noise.mean_power()));
        }
        Ok(StageOutput::resized(out, 1))
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        1
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_integer("windowSize", self.window_size as i64)
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
            .with_channel(Self::window_state(&self.signal))
            .with_channel(Self::window_state(&self.noise))
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if state.channel_count() == 0 {
            self.reset();
            return Ok(());
        }
        if state.channel_count() != 2 {
            return Err(PipelineError::StateLoad(format!(
                "SNR state must have 2 channel cells, got {}",
                state.channel_count()
            )));
        }
        self.signal = Self::restore_window(state.channel(0)?, self.window_size)?;
        self.noise = Self::restore_window(state.channel(1)?, self.window_size)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.signal = PowerWindow::default();
        self.noise = PowerWindow::default();
    }
}
