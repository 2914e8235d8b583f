// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Mel filterbank construction and the DCT-II / liftering kernels for the
//! cepstral stages.
//!
//! The mel scale is the HTK convention: `mel = 2595·log10(1 + f/700)`.
//! Filterbank rows are triangular filters over linear-frequency bins,
//! row-major `num_bands × num_bins`, matching the matrix layout the
//! `melSpectrogram` stage applies per frame.

use signal_pipeline_domain::PipelineError;

/// Hz → mel (HTK).
pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Mel → Hz (HTK).
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Builds a triangular mel filterbank.
///
/// `num_bins` is the linear spectrum length (`window/2 + 1`); bins span
/// `0..=sample_rate/2`. Returns a row-major `num_bands × num_bins` matrix.
///
/// # Errors
///
/// Rejects zero band/bin counts and a frequency range that cannot fit
/// `num_bands + 2` distinct mel points.
pub fn mel_filterbank(
    num_bands: usize,
    num_bins: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Result<Vec<f32>, PipelineError> {
    if num_bands == 0 {
        return Err(PipelineError::InvalidParameter(
            "Mel band count must be positive".to_string(),
        ));
    }
    if num_bins < 2 {
        return Err(PipelineError::InvalidParameter(
            "Mel filterbank needs at least 2 spectrum bins".to_string(),
        ));
    }
    if !(0.0..fmax).contains(&fmin) || fmax > sample_rate / 2.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Mel frequency range [{}, {}] invalid for sample rate {}",
            fmin, fmax, sample_rate
        )));
    }

    let mel_lo = hz_to_mel(fmin);
    let mel_hi = hz_to_mel(fmax);
    // num_bands + 2 edge points, evenly spaced on the mel axis
    let edges: Vec<f64> = (0..num_bands + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (num_bands + 1) as f64))
        .collect();

    let bin_hz = sample_rate / 2.0 / (num_bins - 1) as f64;
    let mut matrix = vec![0.0f32; num_bands * num_bins];
    for band in 0..num_bands {
        let (left, center, right) = (edges[band], edges[band + 1], edges[band + 2]);
        for bin in 0..num_bins {
            let freq = bin as f64 * bin_hz;
            let weight = if freq >= left && freq <= center && center > left {
                (freq - left) / (center - left)
            } else if freq > center && freq <= right && right > center {
                (right - freq) / (right - center)
            } else {
                0.0
            };
            matrix[band * num_bins + bin] = weight as f32;
        }
    }
    Ok(matrix)
}

/// DCT-II with orthonormal scaling, truncated to `num_coefficients`.
pub fn dct_ii(input: &[f32], num_coefficients: usize) -> Vec<f32> {
    let n = input.len();
    if n == 0 || num_coefficients == 0 {
        return Vec::new();
    }
    let scale0 = (1.0 / n as f64).sqrt();
    let scale = (2.0 / n as f64).sqrt();
    (0..num_coefficients.min(n))
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x as f64
                        * (std::f64::consts::PI / n as f64 * (i as f64 + 0.5) * k as f64).cos()
                })
                .sum();
            let s = if k == 0 { scale0 } else { scale };
            (s * sum) as f32
        })
        .collect()
}

/// Sinusoidal liftering in place: `c[k] *= 1 + (L/2)·sin(πk/L)`.
pub fn lifter(coefficients: &mut [f32], l: f64) {
    if l <= 0.0 {
        return;
    }
    for (k, coeff) in coefficients.iter_mut().enumerate() {
        let weight = 1.0 + l / 2.0 * (std::f64::consts::PI * k as f64 / l).sin();
        *coeff = (*coeff as f64 * weight) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0, 100.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!(hz_to_mel(1000.0) > hz_to_mel(500.0));
    }

    #[test]
    fn test_filterbank_shape_and_coverage() {
        let num_bands = 8;
        let num_bins = 65;
        let matrix = mel_filterbank(num_bands, num_bins, 16000.0, 0.0, 8000.0).unwrap();
        assert_eq!(matrix.len(), num_bands * num_bins);
        // Every band has positive mass and a triangular peak
        for band in 0..num_bands {
            let row = &matrix[band * num_bins..(band + 1) * num_bins];
            let mass: f32 = row.iter().sum();
            assert!(mass > 0.0, "band {} is empty", band);
            assert!(row.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
    }

    #[test]
    fn test_filterbank_rejects_bad_ranges() {
        assert!(mel_filterbank(0, 65, 16000.0, 0.0, 8000.0).is_err());
        assert!(mel_filterbank(8, 1, 16000.0, 0.0, 8000.0).is_err());
        assert!(mel_filterbank(8, 65, 16000.0, 4000.0, 2000.0).is_err());
        assert!(mel_filterbank(8, 65, 16000.0, 0.0, 9000.0).is_err());
    }

    #[test]
    fn test_dct_of_constant_concentrates_in_c0() {
        let input = vec![1.0f32; 16];
        let coeffs = dct_ii(&input, 4);
        assert!((coeffs[0] - 4.0).abs() < 1e-5); // sqrt(1/16) * 16
        for &c in &coeffs[1..] {
            assert!(c.abs() < 1e-5);
        }
    }

    #[test]
    fn test_lifter_leaves_c0_untouched() {
        let mut coeffs = vec![1.0f32; 8];
        lifter(&mut coeffs, 22.0);
        assert!((coeffs[0] - 1.0).abs() < 1e-6);
        assert!(coeffs[1] > 1.0);
    }
}
