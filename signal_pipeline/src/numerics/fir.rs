// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Windowed-sinc FIR design for the resampling stages.
//!
//! The resamplers need odd-length, linear-phase lowpass kernels: anti-imaging
//! after upsampling, anti-aliasing before downsampling, and the combined
//! `min(1/up, 1/down)` cutoff for rational conversion. Kernels are
//! Hamming-windowed sinc prototypes normalized to unity DC gain.

use signal_pipeline_domain::PipelineError;

/// Designs an odd-length lowpass FIR.
///
/// `cutoff` is the normalized cutoff in cycles per sample, `0 < cutoff <=
/// 0.5`. The returned kernel has `taps` coefficients, unity DC gain, and
/// group delay `(taps - 1) / 2` samples.
///
/// # Errors
///
/// Rejects even or too-short tap counts and out-of-range cutoffs.
pub fn lowpass_sinc(taps: usize, cutoff: f64) -> Result<Vec<f32>, PipelineError> {
    if taps < 3 || taps % 2 == 0 {
        return Err(PipelineError::InvalidParameter(format!(
            "FIR order must be odd and >= 3, got {}",
            taps
        )));
    }
    if !cutoff.is_finite() || cutoff <= 0.0 || cutoff > 0.5 {
        return Err(PipelineError::InvalidParameter(format!(
            "Normalized cutoff must lie in (0, 0.5], got {}",
            cutoff
        )));
    }

    let center = (taps - 1) as f64 / 2.0;
    let mut kernel: Vec<f64> = (0..taps)
        .map(|i| {
            let t = i as f64 - center;
            let sinc = if t == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * std::f64::consts::PI * cutoff * t).sin() / (std::f64::consts::PI * t)
            };
            // Hamming window
            let w = 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (taps - 1) as f64).cos();
            sinc * w
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    if sum != 0.0 {
        for coeff in &mut kernel {
            *coeff /= sum;
        }
    }
    Ok(kernel.into_iter().map(|c| c as f32).collect())
}
