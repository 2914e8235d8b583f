// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resampling Stages
//!
//! Interpolate (integer upsampling with an anti-imaging FIR), Decimate
//! (anti-aliasing FIR then integer downsampling), and Resample (rational
//! `up/down` conversion). All three share one polyphase core: a windowed-
//! sinc lowpass at `min(1/up, 1/down)·π` evaluated commutator-style, so the
//! zero-stuffed intermediate stream never materializes.
//!
//! For output index `n`, the virtual upsampled index is `u = n·down`; the
//! source sample is `u / up` with polyphase branch `u % up`:
//!
//! ```text
//! y[n] = Σₜ kernel[(u % up) + t·up] · x[u/up − t]
//! ```
//!
//! Streaming state is the per-channel input history covering the kernel
//! span plus two stream counters, so chunk boundaries are seamless and
//! `framesOut ≈ framesIn · up / down` over the life of the stream.

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

use std::collections::VecDeque;

use super::verify_channel_binding;
use crate::numerics::fir::lowpass_sinc;

/// Default anti-aliasing/anti-imaging FIR length.
pub const DEFAULT_FIR_ORDER: usize = 63;

/// Configuration for [`ResampleStage`].
#[derive(Debug, Clone)]
pub struct ResampleConfig {
    pub up_factor: usize,
    pub down_factor: usize,
    /// Odd FIR length (>= 3); defaults to [`DEFAULT_FIR_ORDER`].
    pub order: Option<usize>,
}

/// Configuration for the integer-factor stages.
#[derive(Debug, Clone)]
pub struct RateFactorConfig {
    /// Integer conversion factor, >= 2.
    pub factor: usize,
    /// Odd FIR length (>= 3); defaults to [`DEFAULT_FIR_ORDER`].
    pub order: Option<usize>,
}

/// Shared polyphase rational resampler.
pub struct ResampleStage {
    kind: StageKind,
    up: u64,
    down: u64,
    order: usize,
    /// Lowpass kernel scaled by `up` (gain compensation for zero stuffing).
    kernel: Vec<f32>,
    /// Input samples each branch can reach back to.
    history_len: usize,
    histories: Vec<VecDeque<f32>>,
    /// Total input frames consumed over the stream.
    input_index: u64,
    /// Virtual upsampled index of the next output.
    next_upsampled: u64,
    bound_channels: Option<usize>,
}

impl ResampleStage {
    fn build(
        kind: StageKind,
        up: usize,
        down: usize,
        order: Option<usize>,
    ) -> Result<Self, PipelineError> {
        if up == 0 || down == 0 {
            return Err(PipelineError::InvalidParameter(
                "Resampling factors must be positive integers".to_string(),
            ));
        }
        let order = order.unwrap_or(DEFAULT_FIR_ORDER);
        if order < 3 || order % 2 == 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "FIR order must be odd and >= 3, got {}",
                order
            )));
        }
        let cutoff = 0.5 / up.max(down) as f64;
        let mut kernel = lowpass_sinc(order, cutoff)?;
        for coeff in &mut kernel {
            *coeff *= up as f32;
        }
        let history_len = (order - 1) / up + 1;
        Ok(Self {
            kind,
            up: up as u64,
            down: down as u64,
            order,
            kernel,
            history_len,
            histories: Vec::new(),
            input_index: 0,
            next_upsampled: 0,
            bound_channels: None,
        })
    }

    /// Rational `up/down` resampler.
    pub fn resample(config: ResampleConfig) -> Result<Self, PipelineError> {
        Self::build(
            StageKind::Resample,
            config.up_factor,
            config.down_factor,
            config.order,
        )
    }

    /// Integer upsampler; `factor >= 2`.
    pub fn interpolate(config: RateFactorConfig) -> Result<Self, PipelineError> {
        if config.factor < 2 {
            return Err(PipelineError::InvalidParameter(format!(
                "Interpolation factor must be an integer >= 2, got {}",
                config.factor
            )));
        }
        Self::build(StageKind::Interpolate, config.factor, 1, config.order)
    }

    /// Integer downsampler; `factor >= 2`.
    pub fn decimate(config: RateFactorConfig) -> Result<Self, PipelineError> {
        if config.factor < 2 {
            return Err(PipelineError::InvalidParameter(format!(
                "Decimation factor must be an integer >= 2, got {}",
                config.factor
            )));
        }
        Self::build(StageKind::Decimate, 1, config.factor, config.order)
    }

    /// One polyphase branch evaluation at the given phase over a channel
    /// history (newest sample last).
    fn branch(&self, history: &VecDeque<f32>, phase: usize) -> f32 {
        let up = self.up as usize;
        let mut acc = 0.0f64;
        let mut tap = phase;
        let mut back = 0usize;
        while tap < self.kernel.len() {
            if back < history.len() {
                let value = history[history.len() - 1 - back];
                acc += self.kernel[tap] as f64 * value as f64;
            }
            tap += up;
            back += 1;
        }
        acc as f32
    }
}

impl StageService for ResampleStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind, self.bound_channels, ctx.channels)?;
        let channels = ctx.channels;
        if self.histories.len() != channels {
            self.histories = vec![VecDeque::with_capacity(self.history_len); channels];
            self.bound_channels = Some(channels);
        }

        let mut out: Vec<f32> = Vec::new();
        for frame in 0..frames {
            for channel in 0..channels {
                let history = &mut self.histories[channel];
                if history.len() == self.history_len {
                    history.pop_front();
                }
                history.push_back(samples[frame * channels + channel]);
            }
            let consumed = self.input_index;
            // Emit every output whose source sample is the one just consumed
            let limit = (consumed + 1) * self.up;
            while self.next_upsampled < limit {
                let phase = (self.next_upsampled % self.up) as usize;
                for channel in 0..channels {
                    out.push(self.branch(&self.histories[channel], phase));
                }
                self.next_upsampled += self.down;
            }
            self.input_index += 1;
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        match self.kind {
            StageKind::Interpolate => StageParameters::new()
                .with_integer("factor", self.up as i64)
                .with_integer("order", self.order as i64),
            StageKind::Decimate => StageParameters::new()
                .with_integer("factor", self.down as i64)
                .with_integer("order", self.order as i64),
            _ => StageParameters::new()
                .with_integer("upFactor", self.up as i64)
                .with_integer("downFactor", self.down as i64)
                .with_integer("order", self.order as i64),
        }
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new()
            .with_counter("inputIndex", self.input_index)
            .with_counter("nextUpsampledIndex", self.next_upsampled);
        for history in &self.histories {
            state = state.with_channel(
                ChannelState::new().with_buffer("history", history.iter().copied().collect()),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        let input_index = state.counter("inputIndex")?;
        let next_upsampled = state.counter("nextUpsampledIndex")?;
        let mut histories = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let buffer = state.channel(index)?.buffer("history")?;
            if buffer.len() > self.history_len {
                return Err(PipelineError::StateLoad(format!(
                    "State buffer 'history' has length {}, exceeds polyphase span {}",
                    buffer.len(),
                    self.history_len
                )));
            }
            histories.push(buffer.iter().copied().collect());
        }
        self.input_index = input_index;
        self.next_upsampled = next_upsampled;
        self.bound_channels = if histories.is_empty() {
            None
        } else {
            Some(histories.len())
        };
        self.histories = histories;
        Ok(())
    }

    fn reset(&mut self) {
        self.histories.clear();
        self.input_index = 0;
        self.next_upsampled = 0;
        self.bound_channels = None;
    }
}
