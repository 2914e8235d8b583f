// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Spectral Stages
//!
//! STFT, one-shot FFT frames, mel spectrogram, MFCC, Hilbert envelope, and
//! the discrete wavelet transform.
//!
//! All spectral stages are streaming: each channel buffers input until a
//! full analysis window is available, then emits one output frame per hop.
//! Because every channel of a chunk receives the same number of samples,
//! the per-channel buffers stay in lockstep and whole output frames are
//! emitted with the channel count preserved.
//!
//! Output frame layouts (per hop, per channel):
//!
//! - `stft` magnitude/power/phase: `windowSize/2 + 1` values
//! - `stft` complex: `windowSize/2 + 1` (re, im) pairs, interleaved
//! - `melSpectrogram`: `numMelBands` values per consumed `numBins` frame
//! - `mfcc`: `numCoefficients` values per consumed `numMelBands` frame
//! - `hilbertEnvelope`: `hopSize` envelope samples (the central segment of
//!   the analyzed window)
//! - `waveletTransform`: one (approximation, detail) pair per two inputs

use std::collections::VecDeque;

use num_complex::Complex32;

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

use super::verify_channel_binding;
use crate::numerics::fft::{is_pow2, real_dft, ComplexFftPair, RealFftPair};
use crate::numerics::mel::{dct_ii, lifter, mel_filterbank};
use crate::numerics::window::{window_coefficients, WindowFunction};

/// What an STFT/FFT frame reports per bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectralOutputKind {
    #[default]
    Magnitude,
    Power,
    Phase,
    Complex,
}

impl std::fmt::Display for SpectralOutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectralOutputKind::Magnitude => write!(f, "magnitude"),
            SpectralOutputKind::Power => write!(f, "power"),
            SpectralOutputKind::Phase => write!(f, "phase"),
            SpectralOutputKind::Complex => write!(f, "complex"),
        }
    }
}

/// Transform evaluation method. `fft` requires a power-of-two window;
/// `auto` picks `fft` when the window qualifies and the direct DFT
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectralMethod {
    #[default]
    Auto,
    Fft,
    Dft,
}

impl std::fmt::Display for SpectralMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectralMethod::Auto => write!(f, "auto"),
            SpectralMethod::Fft => write!(f, "fft"),
            SpectralMethod::Dft => write!(f, "dft"),
        }
    }
}

/// Per-channel streaming window framer shared by the spectral stages.
#[derive(Debug, Clone, Default)]
struct Framer {
    pending: Vec<VecDeque<f32>>,
}

impl Framer {
    fn ensure_channels(&mut self, channels: usize) {
        if self.pending.len() != channels {
            self.pending = vec![VecDeque::new(); channels];
        }
    }

    fn push_interleaved(&mut self, samples: &[f32], channels: usize) {
        let frames = samples.len() / channels;
        for frame in 0..frames {
            for channel in 0..channels {
                self.pending[channel].push_back(samples[frame * channels + channel]);
            }
        }
    }

    fn available(&self) -> usize {
        self.pending.first().map_or(0, |queue| queue.len())
    }

    /// Copies the first `window` samples of one channel into `frame`.
    fn peek_window(&self, channel: usize, window: usize, frame: &mut Vec<f32>) {
        frame.clear();
        frame.extend(self.pending[channel].iter().take(window).copied());
    }

    fn advance(&mut self, hop: usize) {
        for queue in &mut self.pending {
            queue.drain(..hop);
        }
    }

    fn snapshot(&self) -> StageState {
        let mut state = StageState::new();
        for queue in &self.pending {
            state = state.with_channel(
                ChannelState::new().with_buffer("pending", queue.iter().copied().collect()),
            );
        }
        state
    }

    fn restore(&mut self, state: &StageState, max_len: usize) -> Result<(), PipelineError> {
        let mut pending: Vec<VecDeque<f32>> = Vec::with_capacity(state.channel_count());
        for index in 0..state.channel_count() {
            let buffer = state.channel(index)?.buffer("pending")?;
            if buffer.len() > max_len {
                return Err(PipelineError::StateLoad(format!(
                    "State buffer 'pending' has length {}, exceeds window size {}",
                    buffer.len(),
                    max_len
                )));
            }
            // Channels advance in lockstep; unequal queues would desync
            if let Some(first) = pending.first() {
                if buffer.len() != first.len() {
                    return Err(PipelineError::StateLoad(format!(
                        "Pending queue lengths differ across channels: {} vs {}",
                        buffer.len(),
                        first.len()
                    )));
                }
            }
            pending.push(buffer.iter().copied().collect());
        }
        self.pending = pending;
        Ok(())
    }

    fn reset(&mut self) {
        self.pending.clear();
    }

    fn bound_channels(&self) -> Option<usize> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.len())
        }
    }
}

// ---------------------------------------------------------------------------
// STFT / FFT
// ---------------------------------------------------------------------------

/// Configuration for [`StftStage`].
#[derive(Debug, Clone)]
pub struct StftConfig {
    pub window_size: usize,
    /// Defaults to `window_size / 2` (or 1 when that is zero).
    pub hop_size: Option<usize>,
    pub output: SpectralOutputKind,
    pub method: SpectralMethod,
    pub window: WindowFunction,
}

impl StftConfig {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            hop_size: None,
            output: SpectralOutputKind::default(),
            method: SpectralMethod::default(),
            window: WindowFunction::default(),
        }
    }
}

/// Short-time Fourier transform stage. Also backs the one-shot `fft` stage
/// kind (hop = window, rectangular window).
pub struct StftStage {
    kind: StageKind,
    window_size: usize,
    hop_size: usize,
    output: SpectralOutputKind,
    method: SpectralMethod,
    window_function: WindowFunction,
    window_coeffs: Vec<f32>,
    fft: Option<RealFftPair>,
    framer: Framer,
    frame_scratch: Vec<f32>,
}

impl StftStage {
    fn build(kind: StageKind, config: StftConfig) -> Result<Self, PipelineError> {
        if config.window_size == 0 {
            return Err(PipelineError::InvalidParameter(
                "Window size must be positive".to_string(),
            ));
        }
        let hop_size = config.hop_size.unwrap_or((config.window_size / 2).max(1));
        if hop_size == 0 || hop_size > config.window_size {
            return Err(PipelineError::InvalidParameter(format!(
                "Hop size must lie in 1..=windowSize, got {}",
                hop_size
            )));
        }
        let use_fft = match config.method {
            SpectralMethod::Fft => {
                if !is_pow2(config.window_size) {
                    return Err(PipelineError::InvalidParameter(format!(
                        "FFT method requires a power-of-two window size, got {}",
                        config.window_size
                    )));
                }
                true
            }
            SpectralMethod::Auto => is_pow2(config.window_size),
            SpectralMethod::Dft => false,
        };
        let fft = if use_fft {
            Some(RealFftPair::new(config.window_size)?)
        } else {
            None
        };
        Ok(Self {
            kind,
            window_size: config.window_size,
            hop_size,
            output: config.output,
            method: config.method,
            window_function: config.window,
            window_coeffs: window_coefficients(config.window, config.window_size),
            fft,
            framer: Framer::default(),
            frame_scratch: Vec::with_capacity(config.window_size),
        })
    }

    pub fn stft(config: StftConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::Stft, config)
    }

    /// One-shot spectrum frames: hop = window, no analysis window.
    pub fn fft(mut config: StftConfig) -> Result<Self, PipelineError> {
        config.hop_size = Some(config.window_size);
        config.window = WindowFunction::None;
        Self::build(StageKind::Fft, config)
    }

    /// Output values per emitted analysis frame.
    fn values_per_frame(&self) -> usize {
        let bins = self.window_size / 2 + 1;
        match self.output {
            SpectralOutputKind::Complex => bins * 2,
            _ => bins,
        }
    }

    fn spectrum(&self, frame: &[f32]) -> Result<Vec<Complex32>, PipelineError> {
        match &self.fft {
            Some(fft) => fft.forward(frame),
            None => Ok(real_dft(frame)),
        }
    }

    fn write_bins(&self, spectrum: &[Complex32], out: &mut Vec<f32>) {
        match self.output {
            SpectralOutputKind::Magnitude => {
                out.extend(spectrum.iter().map(|bin| bin.norm()));
            }
            SpectralOutputKind::Power => {
                out.extend(spectrum.iter().map(|bin| bin.norm_sqr()));
            }
            SpectralOutputKind::Phase => {
                out.extend(spectrum.iter().map(|bin| bin.im.atan2(bin.re)));
            }
            SpectralOutputKind::Complex => {
                for bin in spectrum {
                    out.push(bin.re);
                    out.push(bin.im);
                }
            }
        }
    }
}

impl StageService for StftStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind, self.framer.bound_channels(), ctx.channels)?;
        self.framer.ensure_channels(ctx.channels);
        self.framer.push_interleaved(samples, ctx.channels);

        let channels = ctx.channels;
        let values_per_frame = self.values_per_frame();
        let mut out: Vec<f32> = Vec::new();
        let mut per_channel: Vec<Vec<f32>> = vec![Vec::new(); channels];

        while self.framer.available() >= self.window_size {
            for (channel, column) in per_channel.iter_mut().enumerate() {
                self.framer
                    .peek_window(channel, self.window_size, &mut self.frame_scratch);
                for (sample, coeff) in self.frame_scratch.iter_mut().zip(&self.window_coeffs) {
                    *sample *= coeff;
                }
                column.clear();
                let spectrum = self.spectrum(&self.frame_scratch)?;
                self.write_bins(&spectrum, column);
            }
            // Interleave: each of the values_per_frame rows becomes one
            // multi-channel output frame
            for value in 0..values_per_frame {
                for column in per_channel.iter() {
                    out.push(column[value]);
                }
            }
            self.framer.advance(self.hop_size);
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("windowSize", self.window_size as i64)
            .with_integer("hopSize", self.hop_size as i64)
            .with_text("output", &self.output.to_string())
            .with_text("method", &self.method.to_string())
            .with_text("window", &self.window_function.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        self.framer.snapshot()
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        self.framer.restore(state, self.window_size)
    }

    fn reset(&mut self) {
        self.framer.reset();
    }
}

// ---------------------------------------------------------------------------
// Mel spectrogram
// ---------------------------------------------------------------------------

/// Configuration for [`MelSpectrogramStage`].
#[derive(Debug, Clone)]
pub struct MelSpectrogramConfig {
    /// Linear spectrum length per frame (`windowSize/2 + 1` upstream).
    pub num_bins: usize,
    pub num_mel_bands: usize,
    pub sample_rate: f64,
    /// Defaults to 0 Hz.
    pub fmin: f64,
    /// Defaults to `sample_rate / 2`.
    pub fmax: Option<f64>,
}

/// Applies a precomputed mel filterbank to incoming magnitude frames.
pub struct MelSpectrogramStage {
    num_bins: usize,
    num_mel_bands: usize,
    sample_rate: f64,
    /// Row-major `num_mel_bands × num_bins`.
    filterbank: Vec<f32>,
    framer: Framer,
    frame_scratch: Vec<f32>,
}

impl MelSpectrogramStage {
    pub fn new(config: MelSpectrogramConfig) -> Result<Self, PipelineError> {
        let fmax = config.fmax.unwrap_or(config.sample_rate / 2.0);
        let filterbank = mel_filterbank(
            config.num_mel_bands,
            config.num_bins,
            config.sample_rate,
            config.fmin,
            fmax,
        )?;
        Ok(Self {
            num_bins: config.num_bins,
            num_mel_bands: config.num_mel_bands,
            sample_rate: config.sample_rate,
            filterbank,
            framer: Framer::default(),
            frame_scratch: Vec::with_capacity(config.num_bins),
        })
    }
}

impl StageService for MelSpectrogramStage {
    fn kind(&self) -> StageKind {
        StageKind::MelSpectrogram
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.framer.bound_channels(), ctx.channels)?;
        self.framer.ensure_channels(ctx.channels);
        self.framer.push_interleaved(samples, ctx.channels);

        let channels = ctx.channels;
        let mut out: Vec<f32> = Vec::new();
        let mut per_channel: Vec<Vec<f32>> = vec![Vec::new(); channels];

        while self.framer.available() >= self.num_bins {
            for (channel, column) in per_channel.iter_mut().enumerate() {
                self.framer
                    .peek_window(channel, self.num_bins, &mut self.frame_scratch);
                column.clear();
                for band in 0..self.num_mel_bands {
                    let row = &self.filterbank[band * self.num_bins..(band + 1) * self.num_bins];
                    let mut acc = 0.0f64;
                    for (weight, value) in row.iter().zip(&self.frame_scratch) {
                        acc += *weight as f64 * *value as f64;
                    }
                    column.push(acc as f32);
                }
            }
            for band in 0..self.num_mel_bands {
                for column in per_channel.iter() {
                    out.push(column[band]);
                }
            }
            self.framer.advance(self.num_bins);
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("numBins", self.num_bins as i64)
            .with_integer("numMelBands", self.num_mel_bands as i64)
            .with_float("sampleRate", self.sample_rate)
    }

    fn snapshot_state(&self) -> StageState {
        self.framer.snapshot()
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        self.framer.restore(state, self.num_bins)
    }

    fn reset(&mut self) {
        self.framer.reset();
    }
}

// ---------------------------------------------------------------------------
// MFCC
// ---------------------------------------------------------------------------

/// Configuration for [`MfccStage`].
#[derive(Debug, Clone)]
pub struct MfccConfig {
    pub num_mel_bands: usize,
    pub num_coefficients: usize,
    /// Apply `ln(x + epsilon)` before the DCT.
    pub log_input: bool,
    pub epsilon: f64,
    /// Sinusoidal liftering coefficient; `None` disables liftering.
    pub lifter: Option<f64>,
}

impl MfccConfig {
    pub fn new(num_mel_bands: usize, num_coefficients: usize) -> Self {
        Self {
            num_mel_bands,
            num_coefficients,
            log_input: true,
            epsilon: 1e-10,
            lifter: None,
        }
    }
}

/// Mel-band frames → cepstral coefficients.
pub struct MfccStage {
    config: MfccConfig,
    framer: Framer,
    frame_scratch: Vec<f32>,
}

impl MfccStage {
    pub fn new(config: MfccConfig) -> Result<Self, PipelineError> {
        if config.num_mel_bands == 0 {
            return Err(PipelineError::InvalidParameter(
                "Number of mel bands must be positive".to_string(),
            ));
        }
        if config.num_coefficients == 0 || config.num_coefficients > config.num_mel_bands {
            return Err(PipelineError::InvalidParameter(format!(
                "Number of coefficients must lie in 1..=numMelBands, got {}",
                config.num_coefficients
            )));
        }
        if !config.epsilon.is_finite() || config.epsilon <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Epsilon must be positive, got {}",
                config.epsilon
            )));
        }
        if let Some(l) = config.lifter {
            if !l.is_finite() || l <= 0.0 {
                return Err(PipelineError::InvalidParameter(format!(
                    "Lifter coefficient must be positive, got {}",
                    l
                )));
            }
        }
        let bands = config.num_mel_bands;
        Ok(Self {
            config,
            framer: Framer::default(),
            frame_scratch: Vec::with_capacity(bands),
        })
    }
}

impl StageService for MfccStage {
    fn kind(&self) -> StageKind {
        StageKind::Mfcc
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.framer.bound_channels(), ctx.channels)?;
        self.framer.ensure_channels(ctx.channels);
        self.framer.push_interleaved(samples, ctx.channels);

        let channels = ctx.channels;
        let bands = self.config.num_mel_bands;
        let coeffs = self.config.num_coefficients;
        let mut out: Vec<f32> = Vec::new();
        let mut per_channel: Vec<Vec<f32>> = vec![Vec::new(); channels];

        while self.framer.available() >= bands {
            for (channel, column) in per_channel.iter_mut().enumerate() {
                self.framer.peek_window(channel, bands, &mut self.frame_scratch);
                if self.config.log_input {
                    for value in self.frame_scratch.iter_mut() {
                        *value = ((*value as f64 + self.config.epsilon).ln()) as f32;
                    }
                }
                let mut cepstrum = dct_ii(&self.frame_scratch, coeffs);
                if let Some(l) = self.config.lifter {
                    lifter(&mut cepstrum, l);
                }
                *column = cepstrum;
            }
            for coeff in 0..coeffs {
                for column in per_channel.iter() {
                    out.push(column[coeff]);
                }
            }
            self.framer.advance(bands);
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("numMelBands", self.config.num_mel_bands as i64)
            .with_integer("numCoefficients", self.config.num_coefficients as i64)
            .with_flag("logInput", self.config.log_input)
    }

    fn snapshot_state(&self) -> StageState {
        self.framer.snapshot()
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        self.framer.restore(state, self.config.num_mel_bands)
    }

    fn reset(&mut self) {
        self.framer.reset();
    }
}

// ---------------------------------------------------------------------------
// Hilbert envelope
// ---------------------------------------------------------------------------

/// Configuration for [`HilbertEnvelopeStage`].
#[derive(Debug, Clone)]
pub struct HilbertEnvelopeConfig {
    pub window_size: usize,
    /// Defaults to `window_size / 2`.
    pub hop_size: Option<usize>,
}

/// Sliding-window analytic-signal magnitude.
///
/// Each full window is transformed, negative frequencies are zeroed (and
/// positive ones doubled), and the inverse transform's magnitude forms the
/// envelope. The central `hopSize` samples of each window are emitted,
/// the segment least affected by window-edge leakage.
pub struct HilbertEnvelopeStage {
    window_size: usize,
    hop_size: usize,
    fft: ComplexFftPair,
    framer: Framer,
    frame_scratch: Vec<f32>,
}

impl HilbertEnvelopeStage {
    pub fn new(config: HilbertEnvelopeConfig) -> Result<Self, PipelineError> {
        if config.window_size < 4 {
            return Err(PipelineError::InvalidParameter(format!(
                "Hilbert window size must be >= 4, got {}",
                config.window_size
            )));
        }
        let hop_size = config.hop_size.unwrap_or(config.window_size / 2);
        if hop_size == 0 || hop_size > config.window_size {
            return Err(PipelineError::InvalidParameter(format!(
                "Hop size must lie in 1..=windowSize, got {}",
                hop_size
            )));
        }
        Ok(Self {
            window_size: config.window_size,
            hop_size,
            fft: ComplexFftPair::new(config.window_size)?,
            framer: Framer::default(),
            frame_scratch: Vec::with_capacity(config.window_size),
        })
    }

    fn envelope(&self, frame: &[f32]) -> Vec<f32> {
        let n = frame.len();
        let mut buffer: Vec<Complex32> =
            frame.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        self.fft.forward(&mut buffer);

        // Analytic signal: keep DC (and Nyquist for even n), double the
        // positive frequencies, zero the negative ones.
        let half = n / 2;
        for (k, value) in buffer.iter_mut().enumerate() {
            if k == 0 || (n % 2 == 0 && k == half) {
                // unchanged
            } else if k < half || (n % 2 == 1 && k == half) {
                *value *= 2.0;
            } else {
                *value = Complex32::new(0.0, 0.0);
            }
        }
        self.fft.inverse(&mut buffer);
        buffer.iter().map(|value| value.norm()).collect()
    }
}

impl StageService for HilbertEnvelopeStage {
    fn kind(&self) -> StageKind {
        StageKind::HilbertEnvelope
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.framer.bound_channels(), ctx.channels)?;
        self.framer.ensure_channels(ctx.channels);
        self.framer.push_interleaved(samples, ctx.channels);

        let channels = ctx.channels;
        let offset = (self.window_size - self.hop_size) / 2;
        let mut out: Vec<f32> = Vec::new();
        let mut per_channel: Vec<Vec<f32>> = vec![Vec::new(); channels];

        while self.framer.available() >= self.window_size {
            for (channel, column) in per_channel.iter_mut().enumerate() {
                self.framer
                    .peek_window(channel, self.window_size, &mut self.frame_scratch);
                let envelope = self.envelope(&self.frame_scratch);
                column.clear();
                column.extend_from_slice(&envelope[offset..offset + self.hop_size]);
            }
            for value in 0..self.hop_size {
                for column in per_channel.iter() {
                    out.push(column[value]);
                }
            }
            self.framer.advance(self.hop_size);
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("windowSize", self.window_size as i64)
            .with_integer("hopSize", self.hop_size as i64)
    }

    fn snapshot_state(&self) -> StageState {
        self.framer.snapshot()
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        self.framer.restore(state, self.window_size)
    }

    fn reset(&mut self) {
        self.framer.reset();
    }
}

// ---------------------------------------------------------------------------
// Wavelet transform
// ---------------------------------------------------------------------------

/// Wavelet coefficient family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveletFamily {
    Haar,
    /// 4-tap Daubechies.
    #[default]
    Daubechies4,
}

impl std::fmt::Display for WaveletFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveletFamily::Haar => write!(f, "haar"),
            WaveletFamily::Daubechies4 => write!(f, "db4"),
        }
    }
}

impl WaveletFamily {
    /// Scaling (lowpass) coefficients.
    fn scaling(&self) -> Vec<f64> {
        match self {
            WaveletFamily::Haar => {
                let s = std::f64::consts::FRAC_1_SQRT_2;
                vec![s, s]
            }
            WaveletFamily::Daubechies4 => {
                let sqrt3 = 3.0f64.sqrt();
                let denom = 4.0 * std::f64::consts::SQRT_2;
                vec![
                    (1.0 + sqrt3) / denom,
                    (3.0 + sqrt3) / denom,
                    (3.0 - sqrt3) / denom,
                    (1.0 - sqrt3) / denom,
                ]
            }
        }
    }

    /// Wavelet (highpass) coefficients via the quadrature mirror relation.
    fn wavelet(&self) -> Vec<f64> {
        let h = self.scaling();
        let l = h.len();
        (0..l)
            .map(|k| {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                sign * h[l - 1 - k]
            })
            .collect()
    }
}

/// Configuration for [`WaveletTransformStage`].
#[derive(Debug, Clone, Default)]
pub struct WaveletTransformConfig {
    pub wavelet: WaveletFamily,
}

/// Single-level streaming discrete wavelet decomposition.
///
/// Every two consumed input samples emit one (approximation, detail) pair,
/// so the output frame rate equals the input frame rate once the filter
/// support is buffered.
pub struct WaveletTransformStage {
    wavelet: WaveletFamily,
    scaling: Vec<f64>,
    highpass: Vec<f64>,
    framer: Framer,
    frame_scratch: Vec<f32>,
}

impl WaveletTransformStage {
    pub fn new(config: WaveletTransformConfig) -> Result<Self, PipelineError> {
        let scaling = config.wavelet.scaling();
        let highpass = config.wavelet.wavelet();
        let len = scaling.len();
        Ok(Self {
            wavelet: config.wavelet,
            scaling,
            highpass,
            framer: Framer::default(),
            frame_scratch: Vec::with_capacity(len),
        })
    }

    fn support(&self) -> usize {
        self.scaling.len()
    }
}

impl StageService for WaveletTransformStage {
    fn kind(&self) -> StageKind {
        StageKind::WaveletTransform
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        ctx.frames_in(samples.len())?;
        verify_channel_binding(self.kind(), self.framer.bound_channels(), ctx.channels)?;
        self.framer.ensure_channels(ctx.channels);
        self.framer.push_interleaved(samples, ctx.channels);

        let channels = ctx.channels;
        let support = self.support();
        let mut out: Vec<f32> = Vec::new();
        let mut approx = vec![0.0f32; channels];
        let mut detail = vec![0.0f32; channels];

        while self.framer.available() >= support {
            for channel in 0..channels {
                self.framer.peek_window(channel, support, &mut self.frame_scratch);
                let mut a = 0.0f64;
                let mut d = 0.0f64;
                for (k, &x) in self.frame_scratch.iter().enumerate() {
                    a += self.scaling[k] * x as f64;
                    d += self.highpass[k] * x as f64;
                }
                approx[channel] = a as f32;
                detail[channel] = d as f32;
            }
            out.extend_from_slice(&approx);
            out.extend_from_slice(&detail);
            self.framer.advance(2);
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new().with_text("wavelet", &self.wavelet.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        self.framer.snapshot()
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        self.framer.restore(state, self.support())
    }

    fn reset(&mut self) {
        self.framer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: &mut dyn StageService, input: &[f32], channels: usize) -> (Vec<f32>, usize) {
        let mut samples = input.to_vec();
        let ctx = BlockContext::new(channels, 1000.0);
        match stage.process_block(&mut samples, &ctx).unwrap() {
            StageOutput::InPlace => (samples, channels),
            StageOutput::Resized { samples, channels } => (samples, channels),
        }
    }

    #[test]
    fn test_stft_frame_shape() {
        let mut config = StftConfig::new(8);
        config.window = WindowFunction::None;
        let mut stage = StftStage::stft(config).unwrap();
        // 12 samples, window 8, hop 4: frames at offsets 0 and 4
        let input: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let (out, channels) = run(&mut stage, &input, 1);
        assert_eq!(channels, 1);
        assert_eq!(out.len(), 2 * 5); // two hops × (8/2 + 1) bins
    }

    #[test]
    fn test_stft_buffers_partial_windows() {
        let mut stage = StftStage::stft(StftConfig::new(8)).unwrap();
        let (out, _) = run(&mut stage, &[1.0; 5], 1);
        assert!(out.is_empty(), "no full window yet");
        let (out, _) = run(&mut stage, &[1.0; 3], 1);
        assert_eq!(out.len(), 5, "window completed across chunks");
    }

    #[test]
    fn test_stft_dc_tone() {
        let mut config = StftConfig::new(8);
        config.window = WindowFunction::None;
        config.hop_size = Some(8);
        let mut stage = StftStage::stft(config).unwrap();
        let (out, _) = run(&mut stage, &[1.0; 8], 1);
        assert!((out[0] - 8.0).abs() < 1e-4, "DC bin carries the energy");
        for &bin in &out[1..] {
            assert!(bin.abs() < 1e-4);
        }
    }

    #[test]
    fn test_stft_magnitude_is_nonnegative() {
        let mut stage = StftStage::stft(StftConfig::new(16)).unwrap();
        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.7).sin()).collect();
        let (out, _) = run(&mut stage, &input, 1);
        assert!(out.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_stft_complex_output_doubles_values() {
        let mut config = StftConfig::new(8);
        config.output = SpectralOutputKind::Complex;
        config.hop_size = Some(8);
        let mut stage = StftStage::stft(config).unwrap();
        let (out, _) = run(&mut stage, &[1.0; 8], 1);
        assert_eq!(out.len(), 2 * 5);
    }

    #[test]
    fn test_stft_dft_matches_fft_window() {
        let input: Vec<f32> = (0..16).map(|i| ((i * 5 % 7) as f32) - 3.0).collect();

        let mut fft_cfg = StftConfig::new(16);
        fft_cfg.method = SpectralMethod::Fft;
        fft_cfg.hop_size = Some(16);
        let mut via_fft = StftStage::stft(fft_cfg).unwrap();

        let mut dft_cfg = StftConfig::new(16);
        dft_cfg.method = SpectralMethod::Dft;
        dft_cfg.hop_size = Some(16);
        let mut via_dft = StftStage::stft(dft_cfg).unwrap();

        let (a, _) = run(&mut via_fft, &input, 1);
        let (b, _) = run(&mut via_dft, &input, 1);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-3, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_fft_method_requires_pow2() {
        let mut config = StftConfig::new(12);
        config.method = SpectralMethod::Fft;
        assert!(StftStage::stft(config).is_err());
        // auto quietly picks the DFT for the same window
        let mut config = StftConfig::new(12);
        config.method = SpectralMethod::Auto;
        assert!(StftStage::stft(config).is_ok());
    }

    #[test]
    fn test_stft_multi_channel_interleaving() {
        let mut config = StftConfig::new(4);
        config.window = WindowFunction::None;
        config.hop_size = Some(4);
        let mut stage = StftStage::stft(config).unwrap();
        // ch0 constant 1 -> DC 4; ch1 constant 2 -> DC 8
        let input = vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0];
        let (out, channels) = run(&mut stage, &input, 2);
        assert_eq!(channels, 2);
        assert!((out[0] - 4.0).abs() < 1e-4);
        assert!((out[1] - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_fft_stage_is_one_shot() {
        let mut stage = StftStage::fft(StftConfig::new(8)).unwrap();
        let (out, _) = run(&mut stage, &[1.0; 16], 1);
        assert_eq!(out.len(), 2 * 5, "two non-overlapping frames");
    }

    #[test]
    fn test_mel_spectrogram_shapes() {
        let mut stage = MelSpectrogramStage::new(MelSpectrogramConfig {
            num_bins: 33,
            num_mel_bands: 8,
            sample_rate: 8000.0,
            fmin: 0.0,
            fmax: None,
        })
        .unwrap();
        let (out, channels) = run(&mut stage, &vec![1.0; 33], 1);
        assert_eq!(channels, 1);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_mfcc_shape_and_truncation() {
        let mut stage = MfccStage::new(MfccConfig::new(16, 4)).unwrap();
        let input: Vec<f32> = (0..16).map(|i| (i + 1) as f32).collect();
        let (out, _) = run(&mut stage, &input, 1);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_mfcc_validation() {
        assert!(MfccStage::new(MfccConfig::new(8, 9)).is_err());
        assert!(MfccStage::new(MfccConfig::new(0, 0)).is_err());
        let mut config = MfccConfig::new(8, 4);
        config.epsilon = 0.0;
        assert!(MfccStage::new(config).is_err());
    }

    /// The envelope of a pure tone is approximately its amplitude.
    #[test]
    fn test_hilbert_envelope_of_tone() {
        let mut stage = HilbertEnvelopeStage::new(HilbertEnvelopeConfig {
            window_size: 64,
            hop_size: None,
        })
        .unwrap();
        // 8 cycles in 64 samples, amplitude 2
        let input: Vec<f32> = (0..256)
            .map(|i| 2.0 * (2.0 * std::f32::consts::PI * 8.0 * i as f32 / 64.0).sin())
            .collect();
        let (out, _) = run(&mut stage, &input, 1);
        assert!(!out.is_empty());
        for &value in &out {
            assert!((value - 2.0).abs() < 0.1, "envelope {} should be near 2", value);
        }
    }

    #[test]
    fn test_wavelet_haar_pairs() {
        let mut stage = WaveletTransformStage::new(WaveletTransformConfig {
            wavelet: WaveletFamily::Haar,
        })
        .unwrap();
        let (out, _) = run(&mut stage, &[1.0, 1.0, 3.0, 1.0], 1);
        let s = std::f32::consts::FRAC_1_SQRT_2;
        // Pair (1,1): approx 2s·1 = sqrt(2), detail 0
        assert!((out[0] - 2.0 * s).abs() < 1e-5);
        assert!(out[1].abs() < 1e-5);
        // Pair (3,1): approx s·4, detail s·2
        assert!((out[2] - 4.0 * s).abs() < 1e-5);
        assert!((out[3] - 2.0 * s).abs() < 1e-5);
    }

    #[test]
    fn test_db4_kills_linear_ramp_detail() {
        // Daubechies-4 has two vanishing moments: detail of a linear ramp
        // vanishes
        let mut stage = WaveletTransformStage::new(WaveletTransformConfig::default()).unwrap();
        let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
        let (out, _) = run(&mut stage, &input, 1);
        // Output frames alternate approx, detail
        for pair in out.chunks(2) {
            assert!(pair[1].abs() < 1e-4, "detail {} should vanish", pair[1]);
        }
    }

    #[test]
    fn test_spectral_snapshot_roundtrip() {
        let config = StftConfig::new(8);
        let mut stage = StftStage::stft(config.clone()).unwrap();
        run(&mut stage, &[1.0, 2.0, 3.0], 1);
        let state = stage.snapshot_state();

        let mut restored = StftStage::stft(config).unwrap();
        restored.restore_state(&state).unwrap();
        let next: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(run(&mut stage, &next, 1), run(&mut restored, &next, 1));
    }

    #[test]
    fn test_stft_split_equivalence() {
        let input: Vec<f32> = (0..50).map(|i| ((i * 31 % 11) as f32) - 5.0).collect();
        let mut whole = StftStage::stft(StftConfig::new(16)).unwrap();
        let (expected, _) = run(&mut whole, &input, 1);

        let mut split = StftStage::stft(StftConfig::new(16)).unwrap();
        let (mut actual, _) = run(&mut split, &input[..19], 1);
        let (rest, _) = run(&mut split, &input[19..], 1);
        actual.extend(rest);
        assert_eq!(actual, expected);
    }
}
