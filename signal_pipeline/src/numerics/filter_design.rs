// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Filter Design Factories
//!
//! Coefficient factories for the `filter` and `filterBank` stages:
//! Butterworth, Chebyshev-I, and Bessel lowpass/highpass of arbitrary order
//! (1..=12), plus the RBJ cookbook biquads for EQ work (peaking, shelves,
//! notch, bandpass). Factories produce [`IirCoefficients`]; they have no
//! state of their own.
//!
//! ## Method
//!
//! Classic prototypes are built as analog polynomials (ascending powers of
//! `s`), frequency-scaled to the prewarped cutoff, and discretized with the
//! bilinear transform evaluated through polynomial algebra:
//!
//! ```text
//! s = 2·fs · (1 - z⁻¹)/(1 + z⁻¹)
//! P(s) → Σₖ pₖ (2fs)ᵏ (1-z⁻¹)ᵏ (1+z⁻¹)ⁿ⁻ᵏ
//! ```
//!
//! which avoids root-finding in the z-domain entirely. Bessel prototypes use
//! the reverse Bessel polynomial coefficients
//! `cₖ = (2n-k)! / (2ⁿ⁻ᵏ · k! · (n-k)!)` (delay-normalized form).

use num_complex::Complex64;

use signal_pipeline_domain::PipelineError;

use super::iir::IirCoefficients;

/// Highest supported analog prototype order.
pub const MAX_FILTER_ORDER: usize = 12;

// ---------------------------------------------------------------------------
// Polynomial helpers (coefficients ascending: p[0] + p[1]·x + …)
// ---------------------------------------------------------------------------

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            out[i + j] += ai * bj;
        }
    }
    out
}

/// Real polynomial `Π (s - rₖ)` from a closed-under-conjugation root set.
fn poly_from_roots(roots: &[Complex64]) -> Vec<f64> {
    let mut poly = vec![Complex64::new(1.0, 0.0)];
    for root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); poly.len() + 1];
        for (i, &coeff) in poly.iter().enumerate() {
            next[i] -= coeff * root;
            next[i + 1] += coeff;
        }
        poly = next;
    }
    poly.iter().map(|c| c.re).collect()
}

/// `(1 + sign·x)^power` as ascending coefficients.
fn binomial_poly(power: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..power {
        poly = poly_mul(&poly, &[1.0, sign]);
    }
    poly
}

/// Bilinear transform of `num(s)/den(s)` (degree ≤ n each) into digital
/// `(b, a)` with coefficients ascending in z⁻¹.
fn bilinear(num_s: &[f64], den_s: &[f64], sample_rate: f64) -> (Vec<f64>, Vec<f64>) {
    let n = den_s.len().max(num_s.len()) - 1;
    let k = 2.0 * sample_rate;

    let transform = |poly: &[f64]| -> Vec<f64> {
        let mut out = vec![0.0; n + 1];
        for (power, &coeff) in poly.iter().enumerate() {
            if coeff == 0.0 {
                continue;
            }
            let term = poly_mul(&binomial_poly(power, -1.0), &binomial_poly(n - power, 1.0));
            let scale = coeff * k.powi(power as i32);
            for (i, &t) in term.iter().enumerate() {
                out[i] += scale * t;
            }
        }
        out
    };

    (transform(num_s), transform(den_s))
}

/// Prewarped analog cutoff for the bilinear transform.
fn prewarp(cutoff_hz: f64, sample_rate: f64) -> f64 {
    2.0 * sample_rate * (std::f64::consts::PI * cutoff_hz / sample_rate).tan()
}

fn check_design_inputs(order: usize, cutoff_hz: f64, sample_rate: f64) -> Result<(), PipelineError> {
    if order == 0 || order > MAX_FILTER_ORDER {
        return Err(PipelineError::InvalidParameter(format!(
            "Filter order must be in 1..={}, got {}",
            MAX_FILTER_ORDER, order
        )));
    }
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Sample rate must be positive, got {}",
            sample_rate
        )));
    }
    if !cutoff_hz.is_finite() || cutoff_hz <= 0.0 || cutoff_hz >= sample_rate / 2.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Cutoff must lie in (0, sampleRate/2), got {} at {} Hz",
            cutoff_hz, sample_rate
        )));
    }
    Ok(())
}

/// Converts a normalized (unit-cutoff) prototype denominator to a lowpass at
/// `wc`, returning `(num_s, den_s)` with unity DC gain.
fn scale_lowpass(prototype_den: &[f64], wc: f64, dc_gain: f64) -> (Vec<f64>, Vec<f64>) {
    let den: Vec<f64> = prototype_den
        .iter()
        .enumerate()
        .map(|(k, &c)| c / wc.powi(k as i32))
        .collect();
    (vec![den[0] * dc_gain], den)
}

/// Converts a normalized prototype denominator to a highpass at `wc` via the
/// `s → wc/s` substitution, unity gain at infinite frequency.
fn scale_highpass(prototype_den: &[f64], wc: f64) -> (Vec<f64>, Vec<f64>) {
    let n = prototype_den.len() - 1;
    let mut den = vec![0.0; n + 1];
    for j in 0..=n {
        den[j] = prototype_den[n - j] * wc.powi((n - j) as i32);
    }
    let mut num = vec![0.0; n + 1];
    num[n] = prototype_den[0];
    (num, den)
}

// ---------------------------------------------------------------------------
// Analog prototypes (normalized denominators, ascending powers of s)
// ---------------------------------------------------------------------------

fn butterworth_prototype(order: usize) -> Vec<f64> {
    let n = order as f64;
    let roots: Vec<Complex64> = (0..order)
        .map(|k| {
            let theta = std::f64::consts::PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n);
            Complex64::new(theta.cos(), theta.sin())
        })
        .collect();
    poly_from_roots(&roots)
}

fn chebyshev1_prototype(order: usize, ripple_db: f64) -> Vec<f64> {
    let n = order as f64;
    let eps = (10.0_f64.powf(ripple_db / 10.0) - 1.0).sqrt();
    let mu = (1.0 / eps).asinh() / n;
    let roots: Vec<Complex64> = (0..order)
        .map(|k| {
            let theta = std::f64::consts::PI * (2.0 * k as f64 + 1.0) / (2.0 * n);
            Complex64::new(-mu.sinh() * theta.sin(), mu.cosh() * theta.cos())
        })
        .collect();
    poly_from_roots(&roots)
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, i| acc * i as f64)
}

/// Reverse Bessel polynomial coefficients, delay-normalized.
fn bessel_prototype(order: usize) -> Vec<f64> {
    (0..=order)
        .map(|k| {
            factorial(2 * order - k)
                / (2.0_f64.powi((order - k) as i32) * factorial(k) * factorial(order - k))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Public factories
// ---------------------------------------------------------------------------

/// Butterworth lowpass of the given order.
pub fn butterworth_lowpass(
    order: usize,
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    check_design_inputs(order, cutoff_hz, sample_rate)?;
    let wc = prewarp(cutoff_hz, sample_rate);
    let (num, den) = scale_lowpass(&butterworth_prototype(order), wc, 1.0);
    let (b, a) = bilinear(&num, &den, sample_rate);
    IirCoefficients::new(b, a)
}

/// Butterworth highpass of the given order.
pub fn butterworth_highpass(
    order: usize,
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    check_design_inputs(order, cutoff_hz, sample_rate)?;
    let wc = prewarp(cutoff_hz, sample_rate);
    let (num, den) = scale_highpass(&butterworth_prototype(order), wc);
    let (b, a) = bilinear(&num, &den, sample_rate);
    IirCoefficients::new(b, a)
}

/// Chebyshev type-I lowpass with the given passband ripple in dB.
pub fn chebyshev1_lowpass(
    order: usize,
    ripple_db: f64,
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    check_design_inputs(order, cutoff_hz, sample_rate)?;
    if !ripple_db.is_finite() || ripple_db <= 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Chebyshev ripple must be positive dB, got {}",
            ripple_db
        )));
    }
    let wc = prewarp(cutoff_hz, sample_rate);
    let eps = (10.0_f64.powf(ripple_db / 10.0) - 1.0).sqrt();
    // Even orders peak at the ripple top; pin the DC gain to the ripple floor.
    let dc_gain = if order % 2 == 0 {
        1.0 / (1.0 + eps * eps).sqrt()
    } else {
        1.0
    };
    let (num, den) = scale_lowpass(&chebyshev1_prototype(order, ripple_db), wc, dc_gain);
    let (b, a) = bilinear(&num, &den, sample_rate);
    IirCoefficients::new(b, a)
}

/// Chebyshev type-I highpass with the given passband ripple in dB.
pub fn chebyshev1_highpass(
    order: usize,
    ripple_db: f64,
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    check_design_inputs(order, cutoff_hz, sample_rate)?;
    if !ripple_db.is_finite() || ripple_db <= 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Chebyshev ripple must be positive dB, got {}",
            ripple_db
        )));
    }
    let wc = prewarp(cutoff_hz, sample_rate);
    let (num, den) = scale_highpass(&chebyshev1_prototype(order, ripple_db), wc);
    let (b, a) = bilinear(&num, &den, sample_rate);
    IirCoefficients::new(b, a)
}

/// Bessel (delay-normalized) lowpass of the given order.
pub fn bessel_lowpass(
    order: usize,
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    check_design_inputs(order, cutoff_hz, sample_rate)?;
    let wc = prewarp(cutoff_hz, sample_rate);
    let (num, den) = scale_lowpass(&bessel_prototype(order), wc, 1.0);
    let (b, a) = bilinear(&num, &den, sample_rate);
    IirCoefficients::new(b, a)
}

/// Bessel (delay-normalized) highpass of the given order.
pub fn bessel_highpass(
    order: usize,
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    check_design_inputs(order, cutoff_hz, sample_rate)?;
    let wc = prewarp(cutoff_hz, sample_rate);
    let (num, den) = scale_highpass(&bessel_prototype(order), wc);
    let (b, a) = bilinear(&num, &den, sample_rate);
    IirCoefficients::new(b, a)
}

// ---------------------------------------------------------------------------
// RBJ cookbook EQ biquads
// ---------------------------------------------------------------------------

fn check_biquad_inputs(center_hz: f64, q: f64, sample_rate: f64) -> Result<(f64, f64), PipelineError> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Sample rate must be positive, got {}",
            sample_rate
        )));
    }
    if !center_hz.is_finite() || center_hz <= 0.0 || center_hz >= sample_rate / 2.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Center frequency must lie in (0, sampleRate/2), got {}",
            center_hz
        )));
    }
    if !q.is_finite() || q <= 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "Q must be positive, got {}",
            q
        )));
    }
    let w0 = 2.0 * std::f64::consts::PI * center_hz / sample_rate;
    let alpha = w0.sin() / (2.0 * q);
    Ok((w0, alpha))
}

/// Peaking EQ biquad.
pub fn peaking_eq(
    center_hz: f64,
    q: f64,
    gain_db: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    let (w0, alpha) = check_biquad_inputs(center_hz, q, sample_rate)?;
    let amp = 10.0_f64.powf(gain_db / 40.0);
    let cos_w0 = w0.cos();
    IirCoefficients::new(
        vec![1.0 + alpha * amp, -2.0 * cos_w0, 1.0 - alpha * amp],
        vec![1.0 + alpha / amp, -2.0 * cos_w0, 1.0 - alpha / amp],
    )
}

/// Low-shelf biquad.
pub fn low_shelf(
    corner_hz: f64,
    q: f64,
    gain_db: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    let (w0, alpha) = check_biquad_inputs(corner_hz, q, sample_rate)?;
    let amp = 10.0_f64.powf(gain_db / 40.0);
    let cos_w0 = w0.cos();
    let two_sqrt_a_alpha = 2.0 * amp.sqrt() * alpha;
    IirCoefficients::new(
        vec![
            amp * ((amp + 1.0) - (amp - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * amp * ((amp - 1.0) - (amp + 1.0) * cos_w0),
            amp * ((amp + 1.0) - (amp - 1.0) * cos_w0 - two_sqrt_a_alpha),
        ],
        vec![
            (amp + 1.0) + (amp - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((amp - 1.0) + (amp + 1.0) * cos_w0),
            (amp + 1.0) + (amp - 1.0) * cos_w0 - two_sqrt_a_alpha,
        ],
    )
}

/// High-shelf biquad.
pub fn high_shelf(
    corner_hz: f64,
    q: f64,
    gain_db: f64,
    sample_rate: f64,
) -> Result<IirCoefficients, PipelineError> {
    let (w0, alpha) = check_biquad_inputs(corner_hz, q, sample_rate)?;
    let amp = 10.0_f64.powf(gain_db / 40.0);
    let cos_w0 = w0.cos();
    let two_sqrt_a_alpha = 2.0 * amp.sqrt() * alpha;
    IirCoefficients::new(
        vec![
            amp * ((amp + 1.0) + (amp - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * amp * ((amp - 1.0) + (amp + 1.0) * cos_w0),
            amp * ((amp + 1.0) + (amp - 1.0) * cos_w0 - two_sqrt_a_alpha),
        ],
        vec![
            (amp + 1.0) - (amp - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((amp - 1.0) - (amp + 1.0) * cos_w0),
            (amp + 1.0) - (amp - 1.0) * cos_w0 - two_sqrt_a_alpha,
        ],
    )
}

/// Notch biquad.
pub fn notch(center_hz: f64, q: f64, sample_rate: f64) -> Result<IirCoefficients, PipelineError> {
    let (w0, alpha) = check_biquad_inputs(center_hz, q, sample_rate)?;
    let cos_w0 = w0.cos();
    IirCoefficients::new(
        vec![1.0, -2.0 * cos_w0, 1.0],
        vec![1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
    )
}

/// Constant-peak-gain bandpass biquad.
pub fn bandpass(center_hz: f64, q: f64, sample_rate: f64) -> Result<IirCoefficients, PipelineError> {
    let (w0, alpha) = check_biquad_inputs(center_hz, q, sample_rate)?;
    let cos_w0 = w0.cos();
    IirCoefficients::new(
        vec![alpha, 0.0, -alpha],
        vec![1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
    )
}
