// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # IIR Filter Stages
//!
//! `filter` runs one coefficient set over every channel with an independent
//! transposed direct-form II delay line per channel. `filterBank` runs a
//! collection of coefficient sets in parallel over every input channel,
//! expanding the channel count to `Cin × numBands` with the band-major
//! per-channel layout `[band0ch0, band1ch0, …, bandK-1ch0, band0ch1, …]`.
//!
//! Coefficient design (Butterworth, Chebyshev, Bessel, RBJ EQ) lives in
//! [`crate::numerics::filter_design`]; those factories feed [`FilterConfig`]
//! directly.

use rayon::prelude::*;

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

use super::verify_channel_binding;
use crate::numerics::iir::IirCoefficients;

/// Configuration for [`FilterStage`]: raw coefficient vectors.
///
/// `a[0]` is normalized through at construction; factories from
/// [`crate::numerics::filter_design`] can be passed via `From`.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl From<IirCoefficients> for FilterConfig {
    fn from(coefficients: IirCoefficients) -> Self {
        Self {
            b: coefficients.b().to_vec(),
            a: coefficients.a().to_vec(),
        }
    }
}

/// Generic IIR filter stage.
pub struct FilterStage {
    coefficients: IirCoefficients,
    delay_lines: Vec<Vec<f32>>,
    bound_channels: Option<usize>,
}

impl FilterStage {
    pub fn new(config: FilterConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            coefficients: IirCoefficients::new(config.b, config.a)?,
            delay_lines: Vec::new(),
            bound_channels: None,
        })
    }
}

impl StageService for FilterStage {
    fn kind(&self) -> StageKind {
        StageKind::Filter
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
        if self.delay_lines.len() != ctx.channels {
            self.delay_lines = vec![vec![0.0; self.coefficients.state_len()]; ctx.channels];
            self.bound_channels = Some(ctx.channels);
        }
        let channels = ctx.channels;
        for frame in 0..frames {
            for channel in 0..channels {
                let index = frame * channels + channel;
                samples[index] = self
                    .coefficients
                    .process_sample(&mut self.delay_lines[channel], samples[index]);
            }
        }
        Ok(StageOutput::InPlace)
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("numeratorLength", self.coefficients.b().len() as i64)
            .with_integer("denominatorLength", self.coefficients.a().len() as i64)
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for line in &self.delay_lines {
            state = state.with_channel(ChannelState::new().with_buffer("delayLine", line.clone()));
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        let expected = self.coefficients.state_len();
        let mut lines = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let line = state.channel(index)?.buffer_with_len("delayLine", expected)?;
            lines.push(line.to_vec());
        }
        self.bound_channels = if lines.is_empty() { None } else { Some(lines.len()) };
        self.delay_lines = lines;
        Ok(())
    }

    fn reset(&mut self) {
        self.delay_lines.clear();
        self.bound_channels = None;
    }
}

/// Configuration for [`FilterBankStage`]: one coefficient set per band.
#[derive(Debug, Clone)]
pub struct FilterBankConfig {
    pub bands: Vec<FilterConfig>,
}

/// Parallel IIR bank; output channel `ch·K + band` carries band `band` of
/// input channel `ch`.
pub struct FilterBankStage {
    bands: Vec<IirCoefficients>,
    /// Delay lines indexed `[channel][band]`.
    delay_lines: Vec<Vec<Vec<f32>>>,
    bound_channels: Option<usize>,
}

impl FilterBankStage {
    pub fn new(config: FilterBankConfig) -> Result<Self, PipelineError> {
        if config.bands.is_empty() {
            return Err(PipelineError::InvalidParameter(
                "Filter bank requires at least one band".to_string(),
            ));
        }
        let bands = config
            .bands
            .into_iter()
            .map(|band| IirCoefficients::new(band.b, band.a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            bands,
            delay_lines: Vec::new(),
            bound_channels: None,
        })
    }

    fn num_bands(&self) -> usize {
        self.bands.len()
    }
}

impl StageService for FilterBankStage {
    fn kind(&self) -> StageKind {
        StageKind::FilterBank
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.bound_channels, ctx.channels)?;
        let channels = ctx.channels;
        let num_bands = self.num_bands();
        if self.delay_lines.len() != channels {
            self.delay_lines = (0..channels)
                .map(|_| {
                    self.bands
                        .iter()
                        .map(|band| vec![0.0; band.state_len()])
                        .collect()
                })
                .collect();
            self.bound_channels = Some(channels);
        }

        // Each (channel, band) pair owns its delay line; the band columns are
        // computed in parallel, then interleaved.
        let bands = &self.bands;
        let input = &samples[..];
        let columns: Vec<Vec<f32>> = self
            .delay_lines
            .par_iter_mut()
            .enumerate()
            .flat_map(|(channel, lines)| {
                lines
                    .par_iter_mut()
                    .enumerate()
                    .map(move |(band, line)| {
                        let coefficients = &bands[band];
                        let mut column = Vec::with_capacity(frames);
                        for frame in 0..frames {
                            let x = input[frame * channels + channel];
                            column.push(coefficients.process_sample(line, x));
                        }
                        column
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let out_channels = channels * num_bands;
        let mut out = vec![0.0f32; frames * out_channels];
        for channel in 0..channels {
            for band in 0..num_bands {
                let column = &columns[channel * num_bands + band];
                let out_channel = channel * num_bands + band;
                for frame in 0..frames {
                    out[frame * out_channels + out_channel] = column[frame];
                }
            }
        }
        Ok(StageOutput::resized(out, out_channels))
    }

    fn output_channels(&self, input_channels: usize) -> usize {
        input_channels * self.num_bands()
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_integer("numBands", self.num_bands() as i64)
    }

    fn snapshot_state(&self) -> StageState {
        let mut state = StageState::new();
        for lines in &self.delay_lines {
            let mut channel = ChannelState::new();
            for (band, line) in lines.iter().enumerate() {
                channel = channel.with_buffer(&format!("band{}", band), line.clone());
            }
            state = state.with_channel(channel);
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        let mut delay_lines = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let channel = state.channel(index)?;
            let mut lines = Vec::with_capacity(self.bands.len());
            for (band, coefficients) in self.bands.iter().enumerate() {
                let line = channel
                    .buffer_with_len(&format!("band{}", band), coefficients.state_len())?;
                lines.push(line.to_vec());
            }
            delay_lines.push(lines);
        }
        self.bound_channels = if delay_lines.is_empty() {
            None
        } else {
            Some(delay_lines.len())
        };
        self.delay_lines = delay_lines;
        Ok(())
    }

    fn reset(&mut self) {
        self.delay_lines.clear();
        self.bound_channels = None;
    }
}
