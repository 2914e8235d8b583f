// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Convolution Stage
//!
//! Sliding-kernel convolution in two modes:
//!
//! - **moving**: causal, same frame count as input; each channel keeps a
//!   ring of the last `len(kernel) - 1` inputs so chunk seams are invisible.
//! - **batch**: "valid" convolution, `framesOut = framesIn - len(kernel) + 1`
//!   (empty output when the input is shorter than the kernel).
//!
//! `method` picks the evaluation path: `direct`, `fft` (overlap-save), or
//! `auto`, which uses `direct` below `autoThreshold` kernel taps (default
//! 64) and `fft` above. Both paths compute the identical sum; the choice is
//! purely a speed tradeoff.

use rayon::prelude::*;

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageMode, StageOutput, StageParameters,
    StageService, StageState,
};

use super::verify_channel_binding;
use crate::numerics::convolution::{sliding_dot_valid, sliding_dot_valid_fft};

/// Default kernel length at which `auto` switches to the FFT path.
pub const DEFAULT_AUTO_THRESHOLD: usize = 64;

/// Evaluation method for [`ConvolutionStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvolutionMethod {
    #[default]
    Auto,
    Direct,
    Fft,
}

impl std::fmt::Display for ConvolutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvolutionMethod::Auto => write!(f, "auto"),
            ConvolutionMethod::Direct => write!(f, "direct"),
            ConvolutionMethod::Fft => write!(f, "fft"),
        }
    }
}

/// Configuration for [`ConvolutionStage`].
#[derive(Debug, Clone)]
pub struct ConvolutionConfig {
    pub kernel: Vec<f32>,
    pub mode: StageMode,
    pub method: ConvolutionMethod,
    /// Kernel length at which `auto` switches from direct to FFT.
    pub auto_threshold: usize,
}

impl ConvolutionConfig {
    pub fn new(kernel: Vec<f32>) -> Self {
        Self {
            kernel,
            mode: StageMode::Moving,
            method: ConvolutionMethod::Auto,
            auto_threshold: DEFAULT_AUTO_THRESHOLD,
        }
    }
}

/// Sliding-kernel convolution stage.
pub struct ConvolutionStage {
    kernel: Vec<f32>,
    mode: StageMode,
    method: ConvolutionMethod,
    auto_threshold: usize,
    /// Last `len(kernel) - 1` inputs per channel (moving mode only).
    history: Vec<Vec<f32>>,
    bound_channels: Option<usize>,
}

impl ConvolutionStage {
    pub fn new(config: ConvolutionConfig) -> Result<Self, PipelineError> {
        if config.kernel.is_empty() {
            return Err(PipelineError::InvalidParameter(
                "Convolution kernel cannot be empty".to_string(),
            ));
        }
        if config.kernel.iter().any(|k| !k.is_finite()) {
            return Err(PipelineError::InvalidParameter(
                "Convolution kernel must be finite".to_string(),
            ));
        }
        if config.auto_threshold == 0 {
            return Err(PipelineError::InvalidParameter(
                "Auto threshold must be positive".to_string(),
            ));
        }
        Ok(Self {
            kernel: config.kernel,
            mode: config.mode,
            method: config.method,
            auto_threshold: config.auto_threshold,
            history: Vec::new(),
            bound_channels: None,
        })
    }

    fn use_fft(&self) -> bool {
        match self.method {
            ConvolutionMethod::Direct => false,
            ConvolutionMethod::Fft => true,
            ConvolutionMethod::Auto => self.kernel.len() >= self.auto_threshold,
        }
    }

    fn convolve(&self, extended: &[f32]) -> Result<Vec<f32>, PipelineError> {
        if self.use_fft() {
            sliding_dot_valid_fft(extended, &self.kernel)
        } else {
            Ok(sliding_dot_valid(extended, &self.kernel))
        }
    }

    fn process_moving(
        &mut self,
        samples: &mut [f32],
        channels: usize,
        frames: usize,
    ) -> Result<(), PipelineError> {
        let taps = self.kernel.len();
        if self.history.len() != channels {
            self.history = vec![vec![0.0; taps - 1]; channels];
            self.bound_channels = Some(channels);
        }
        for channel in 0..channels {
            let mut extended = Vec::with_capacity(taps - 1 + frames);
            extended.extend_from_slice(&self.history[channel]);
            for frame in 0..frames {
                extended.push(samples[frame * channels + channel]);
            }
            let out = self.convolve(&extended)?;
            debug_assert_eq!(out.len(), frames);
            for (frame, value) in out.into_iter().enumerate() {
                samples[frame * channels + channel] = value;
            }
            let keep = taps - 1;
            let start = extended.len() - keep;
            self.history[channel].copy_from_slice(&extended[start..]);
        }
        Ok(())
    }

    fn process_batch(
        &self,
        samples: &[f32],
        channels: usize,
        frames: usize,
    ) -> Result<Vec<f32>, PipelineError> {
        let taps = self.kernel.len();
        if frames < taps {
            return Ok(Vec::new());
        }
        let out_frames = frames - taps + 1;
        let columns: Vec<Result<Vec<f32>, PipelineError>> = (0..channels)
            .into_par_iter()
            .map(|channel| {
                let column: Vec<f32> = (0..frames)
                    .map(|frame| samples[frame * channels + channel])
                    .collect();
                self.convolve(&column)
            })
            .collect();
        let mut out = vec![0.0f32; out_frames * channels];
        for (channel, column) in columns.into_iter().enumerate() {
            let column = column?;
            for (frame, value) in column.into_iter().enumerate() {
                out[frame * channels + channel] = value;
            }
        }
        Ok(out)
    }
}

impl StageService for ConvolutionStage {
    fn kind(&self) -> StageKind {
        StageKind::Convolution
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        match self.mode {
            StageMode::Moving => {
                verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
                if self.kernel.len() == 1 {
                    // Degenerate single-tap kernel: a pure gain
                    let k = self.kernel[0];
                    for sample in samples.iter_mut() {
                        *sample *= k;
                    }
                    return Ok(StageOutput::InPlace);
                }
                if frames > 0 {
                    self.process_moving(samples, ctx.channels, frames)?;
                }
                Ok(StageOutput::InPlace)
            }
            StageMode::Batch => {
                if ctx.channels == 0 {
                    return Err(PipelineError::ChannelMismatch(
                        "Convolution received a zero channel count".to_string(),
                    ));
                }
                let out = self.process_batch(samples, ctx.channels, frames)?;
                Ok(StageOutput::resized(out, ctx.channels))
            }
        }
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("kernelLength", self.kernel.len() as i64)
            .with_text("mode", &self.mode.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for history in &self.history {
            state = state.with_channel(ChannelState::new().with_buffer("history", history.clone()));
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if self.mode == StageMode::Batch {
            self.history.clear();
            self.bound_channels = None;
            return Ok(());
        }
        let expected = self.kernel.len() - 1;
        let mut history = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let buffer = state.channel(index)?.buffer_with_len("history", expected)?;
            history.push(buffer.to_vec());
        }
        self.bound_channels = if history.is_empty() { None } else { Some(history.len()) };
        self.history = history;
        Ok(())
    }

    fn reset(&mut self) {
        self.history.clear();
        self.bound_channels = None;
    }
}
