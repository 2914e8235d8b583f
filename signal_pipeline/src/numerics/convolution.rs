// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Sliding-kernel convolution, direct and via FFT overlap-save.
//!
//! The engine's convolution semantic applies the kernel without time
//! reversal (a sliding dot product):
//!
//! ```text
//! y[i] = Σⱼ k[j] · x[i + j],   i = 0 .. N - M
//! ```
//!
//! which is what the convolution stage exposes in batch ("valid") mode. The
//! moving (causal) mode is the same operation over `history ++ block`, so
//! both modes share these kernels. The FFT path evaluates the identical sum
//! through overlap-save on power-of-two blocks and is selected for long
//! kernels.

use num_complex::Complex32;

use super::fft::{next_pow2, RealFftPair};
use signal_pipeline_domain::PipelineError;

/// Direct sliding dot product, "valid" length `N - M + 1`.
///
/// Returns an empty vector when the input is shorter than the kernel.
pub fn sliding_dot_valid(x: &[f32], kernel: &[f32]) -> Vec<f32> {
    let n = x.len();
    let m = kernel.len();
    if m == 0 || n < m {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n - m + 1);
    for i in 0..=(n - m) {
        let mut acc = 0.0f64;
        for (j, &k) in kernel.iter().enumerate() {
            acc += k as f64 * x[i + j] as f64;
        }
        out.push(acc as f32);
    }
    out
}

/// Overlap-save evaluation of [`sliding_dot_valid`].
///
/// Chooses an FFT block of `next_pow2(4·M)` (at least 256) so each block
/// yields `fft_size - M + 1` outputs after discarding the circular prefix.
///
/// # Errors
///
/// Propagates FFT planning/processing failures; shape handling matches the
/// direct path (short input → empty output).
pub fn sliding_dot_valid_fft(x: &[f32], kernel: &[f32]) -> Result<Vec<f32>, PipelineError> {
    let n = x.len();
    let m = kernel.len();
    if m == 0 || n < m {
        return Ok(Vec::new());
    }

    // The sliding dot product is linear convolution with the reversed
    // kernel, offset so that output i aligns with x[i..i+M].
    let reversed: Vec<f32> = kernel.iter().rev().copied().collect();

    let fft_size = next_pow2((4 * m).max(256));
    let block = fft_size - m + 1;
    let fft = RealFftPair::new(fft_size)?;

    let mut padded_kernel = reversed;
    padded_kernel.resize(fft_size, 0.0);
    let kernel_spectrum = fft.forward(&padded_kernel)?;

    let out_len = n - m + 1;
    let mut out = Vec::with_capacity(out_len);
    let mut segment = vec![0.0f32; fft_size];

    // Output position `start` needs x[start .. start + block + M - 1); the
    // overlap-save prefix is the M-1 samples preceding start + M - 1, which
    // here is exactly x[start..], so no zero-padded warmup segment is
    // required.
    let mut start = 0usize;
    while start < out_len {
        let take = (n - start).min(fft_size);
        segment[..take].copy_from_slice(&x[start..start + take]);
        for slot in &mut segment[take..] {
            *slot = 0.0;
        }
        let mut spectrum = fft.forward(&segment)?;
        for (bin, k) in spectrum.iter_mut().zip(&kernel_spectrum) {
            *bin = Complex32::new(
                bin.re * k.re - bin.im * k.im,
                bin.re * k.im + bin.im * k.re,
            );
        }
        let time = fft.inverse(&spectrum)?;
        let produced = block.min(out_len - start);
        // Discard the first M-1 circularly-wrapped samples of each block
        out.extend_from_slice(&time[m - 1..m - 1 + produced]);
        start += produced;
    }
    Ok(out)
}
