// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # FFT and DFT Wrappers
//!
//! Thin wrappers over `realfft`/`rustfft` with the conventions the spectral
//! stages rely on:
//!
//! - Forward real FFT of an `n`-point frame yields `n/2 + 1` complex bins.
//! - The inverse real FFT is normalized here (divide by `n`), so
//!   `inverse(forward(x)) ≈ x`.
//! - `real_dft` is the direct O(n²) evaluation used when a stage is
//!   configured with `method = dft` (any frame length, bit-stable reference
//!   path).
//!
//! Planner objects are created per stage at construction and reused across
//! chunks; planning is not free and never belongs in the block loop.

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};

use signal_pipeline_domain::PipelineError;

/// Returns the smallest power of two `>= n` (and `>= 1`).
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Whether `n` is a power of two.
pub fn is_pow2(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Reusable forward/inverse real FFT pair for a fixed frame length.
pub struct RealFftPair {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    len: usize,
}

impl RealFftPair {
    /// Plans a forward/inverse pair for frames of `len` samples.
    pub fn new(len: usize) -> Result<Self, PipelineError> {
        if len == 0 {
            return Err(PipelineError::InvalidParameter(
                "FFT length must be positive".to_string(),
            ));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        Ok(Self {
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of complex bins the forward transform produces.
    pub fn bins(&self) -> usize {
        self.len / 2 + 1
    }

    /// Forward transform of one frame. `frame.len()` must equal `len()`.
    pub fn forward(&self, frame: &[f32]) -> Result<Vec<Complex32>, PipelineError> {
        if frame.len() != self.len {
            return Err(PipelineError::ShapeMismatch(format!(
                "FFT frame length {} does not match planned length {}",
                frame.len(),
                self.len
            )));
        }
        let mut input = frame.to_vec();
        let mut spectrum = self.forward.make_output_vec();
        self.forward
            .process(&mut input, &mut spectrum)
            .map_err(|e| PipelineError::ProcessingFailed(format!("Forward FFT failed: {}", e)))?;
        Ok(spectrum)
    }

    /// Normalized inverse transform; `spectrum.len()` must equal `bins()`.
    pub fn inverse(&self, spectrum: &[Complex32]) -> Result<Vec<f32>, PipelineError> {
        if spectrum.len() != self.bins() {
            return Err(PipelineError::ShapeMismatch(format!(
                "Spectrum length {} does not match expected {} bins",
                spectrum.len(),
                self.bins()
            )));
        }
        let mut input = spectrum.to_vec();
        let mut output = self.inverse.make_output_vec();
        self.inverse
            .process(&mut input, &mut output)
            .map_err(|e| PipelineError::ProcessingFailed(format!("Inverse FFT failed: {}", e)))?;
        let scale = 1.0 / self.len as f32;
        for sample in &mut output {
            *sample *= scale;
        }
        Ok(output)
    }
}

/// Reusable complex FFT pair, used by the analytic-signal (Hilbert) path.
pub struct ComplexFftPair {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    len: usize,
}

impl ComplexFftPair {
    pub fn new(len: usize) -> Result<Self, PipelineError> {
        if len == 0 {
            return Err(PipelineError::InvalidParameter(
                "FFT length must be positive".to_string(),
            ));
        }
        let mut planner = FftPlanner::<f32>::new();
        Ok(Self {
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// In-place forward transform.
    pub fn forward(&self, buffer: &mut [Complex32]) {
        debug_assert_eq!(buffer.len(), self.len);
        self.forward.process(buffer);
    }

    /// In-place normalized inverse transform.
    pub fn inverse(&self, buffer: &mut [Complex32]) {
        debug_assert_eq!(buffer.len(), self.len);
        self.inverse.process(buffer);
        let scale = 1.0 / self.len as f32;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
    }
}

/// Direct real DFT: `bins = len/2 + 1` complex outputs, any frame length.
///
/// Matches the forward real FFT's sign convention
/// (`X[k] = Σ x[n]·e^{-j2πkn/N}`).
pub fn real_dft(frame: &[f32]) -> Vec<Complex32> {
    let n = frame.len();
    if n == 0 {
        return Vec::new();
    }
    let bins = n / 2 + 1;
    let mut spectrum = Vec::with_capacity(bins);
    let step = -2.0 * std::f64::consts::PI / n as f64;
    for k in 0..bins {
        let mut re = 0.0f64;
        let mut im = 0.0f64;
        for (i, &sample) in frame.iter().enumerate() {
            let angle = step * (k * i) as f64;
            re += sample as f64 * angle.cos();
            im += sample as f64 * angle.sin();
        }
        spectrum.push(Complex32::new(re as f32, im as f32));
    }
    spectrum
}
