// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Window function synthesis for the spectral stages.
//!
//! Coefficients come from `apodize` (symmetric windows); `Bartlett` maps to
//! its triangular window and `None` to all-ones.

use serde::{Deserialize, Serialize};

use signal_pipeline_domain::PipelineError;

/// Analysis window families supported by the spectral stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    None,
}

impl Default for WindowFunction {
    fn default() -> Self {
        WindowFunction::Hann
    }
}

impl std::fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WindowFunction::Hann => "hann",
            WindowFunction::Hamming => "hamming",
            WindowFunction::Blackman => "blackman",
            WindowFunction::Bartlett => "bartlett",
            WindowFunction::None => "none",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for WindowFunction {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hann" | "hanning" => Ok(WindowFunction::Hann),
            "hamming" => Ok(WindowFunction::Hamming),
            "blackman" => Ok(WindowFunction::Blackman),
            "bartlett" | "triangular" => Ok(WindowFunction::Bartlett),
            "none" | "rectangular" => Ok(WindowFunction::None),
            other => Err(PipelineError::InvalidParameter(format!(
                "Unknown window function: {}",
                other
            ))),
        }
    }
}

/// Synthesizes `len` window coefficients.
pub fn window_coefficients(function: WindowFunction, len: usize) -> Vec<f32> {
    if len == 0 {
        return Vec::new();
    }
    // The symmetric window formulas divide by len - 1
    if len == 1 {
        return vec![1.0];
    }
    match function {
        WindowFunction::Hann => apodize::hanning_iter(len).map(|w| w as f32).collect(),
        WindowFunction::Hamming => apodize::hamming_iter(len).map(|w| w as f32).collect(),
        WindowFunction::Blackman => apodize::blackman_iter(len).map(|w| w as f32).collect(),
        WindowFunction::Bartlett => apodize::triangular_iter(len).map(|w| w as f32).collect(),
        WindowFunction::None => vec![1.0; len],
    }
}
