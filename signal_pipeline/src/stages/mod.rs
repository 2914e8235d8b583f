// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Implementations
//!
//! Every registered stage kind, grouped by family. Each module follows the
//! same pattern: a validated config struct, a stage struct implementing
//! [`StageService`](signal_pipeline_domain::StageService) with `process_block`
//! owning the inner loop, per-channel state that serializes through
//! `StageState`, and a `#[cfg(test)]` module exercising the family's
//! contracts.
//!
//! | Module | Kinds |
//! |---|---|
//! | [`amplitude`] | rectify, amplify |
//! | [`statistics`] | movingAverage, rms, meanAbsoluteValue, variance, cumulativeMovingAverage, exponentialMovingAverage, zScoreNormalize |
//! | [`calculus`] | differentiator, integrator |
//! | [`filter`] | filter, filterBank |
//! | [`convolution`] | convolution |
//! | [`resample`] | interpolate, decimate, resample |
//! | [`spectral`] | stft, fft, melSpectrogram, mfcc, hilbertEnvelope, waveletTransform |
//! | [`transform`] | pcaTransform, icaTransform, whiteningTransform, cspTransform |
//! | [`routing`] | channelSelect, channelMerge |
//! | [`adaptive`] | lmsFilter, rlsFilter |
//! | [`detection`] | peakDetection, clipDetection, snr |
//! | [`features`] | waveformLength, willisonAmplitude, slopeSignChange, linearRegression |
//! | [`tracking`] | kalmanFilter |
//! | [`alignment`] | timeAlignment |
//! | [`tap`] | tap |

pub mod adaptive;
pub mod alignment;
pub mod amplitude;
pub mod calculus;
pub mod convolution;
pub mod detection;
pub mod features;
pub mod filter;
pub mod resample;
pub mod routing;
pub mod spectral;
pub mod statistics;
pub mod tap;
pub mod tracking;
pub mod transform;

use signal_pipeline_domain::{PipelineError, StageKind};

/// Window length specification: explicit sample count, or a duration that
/// resolves against a configured sample rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowSpec {
    /// Window length in samples.
    Samples(usize),
    /// Window length in seconds, resolved via the config's `sample_rate`.
    Duration(f64),
}

impl WindowSpec {
    /// Resolves to a sample count.
    ///
    /// # Errors
    ///
    /// Rejects zero-length windows, non-positive durations, and a duration
    /// spec without a sample rate to resolve against.
    pub fn resolve(&self, sample_rate: Option<f64>) -> Result<usize, PipelineError> {
        match *self {
            WindowSpec::Samples(n) => {
                if n == 0 {
                    return Err(PipelineError::InvalidParameter(
                        "Window size must be positive".to_string(),
                    ));
                }
                Ok(n)
            }
            WindowSpec::Duration(seconds) => {
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(PipelineError::InvalidParameter(format!(
                        "Window duration must be positive, got {}",
                        seconds
                    )));
                }
                let rate = sample_rate.ok_or_else(|| {
                    PipelineError::MissingParameter(
                        "sampleRate is required to resolve a window duration".to_string(),
                    )
                })?;
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(PipelineError::InvalidParameter(format!(
                        "Sample rate must be positive, got {}",
                        rate
                    )));
                }
                let samples = (seconds * rate).round() as usize;
                if samples == 0 {
                    return Err(PipelineError::InvalidParameter(format!(
                        "Window duration {}s resolves to zero samples at {} Hz",
                        seconds, rate
                    )));
                }
                Ok(samples)
            }
        }
    }
}

/// Verifies that a stage bound to `bound` channels is being fed `incoming`
/// channels. Streaming state is allocated per channel at first use; feeding
/// a different channel count afterwards would desynchronize it.
pub(crate) fn verify_channel_binding(
    kind: StageKind,
    bound: Option<usize>,
    incoming: usize,
) -> Result<(), PipelineError> {
    if incoming == 0 {
        return Err(PipelineError::ChannelMismatch(format!(
            "Stage '{}' received a zero channel count",
            kind
        )));
    }
    if let Some(expected) = bound {
        if expected != incoming {
            return Err(PipelineError::ChannelMismatch(format!(
                "Stage '{}' was initialized with {} channels but received {}",
                kind, expected, incoming
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_spec_samples() {
        assert_eq!(WindowSpec::Samples(3).resolve(None).unwrap(), 3);
        assert!(WindowSpec::Samples(0).resolve(None).is_err());
    }

    #[test]
    fn test_window_spec_duration() {
        assert_eq!(WindowSpec::Duration(0.5).resolve(Some(1000.0)).unwrap(), 500);
        assert!(WindowSpec::Duration(0.5).resolve(None).is_err());
        assert!(WindowSpec::Duration(-1.0).resolve(Some(1000.0)).is_err());
        assert!(WindowSpec::Duration(1e-9).resolve(Some(10.0)).is_err());
    }

    #[test]
    fn test_channel_binding() {
        assert!(verify_channel_binding(StageKind::Rms, None, 2).is_ok());
        assert!(verify_channel_binding(StageKind::Rms, Some(2), 2).is_ok());
        assert!(verify_channel_binding(StageKind::Rms, Some(2), 3).is_err());
        assert!(verify_channel_binding(StageKind::Rms, None, 0).is_err());
    }
}
