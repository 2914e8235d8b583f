// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Kinds and Structural Parameters
//!
//! This module names every registered stage type and defines the typed
//! parameter record that travels with snapshots.
//!
//! `StageKind` identifiers are **stable strings**: they are written into
//! snapshots and checked on load, so renaming a variant's identifier is a
//! breaking format change. `ChannelSelect` and `ChannelMerge` are distinct
//! identifiers for one shared gather semantic, kept for back-compat.
//!
//! `StageParameters` carries the subset of a stage's configuration that
//! affects its state shape (window sizes, tap counts, smoothing factors).
//! The load protocol compares these records field by field and reports the
//! first mismatch with a message naming the offending field, e.g.
//! `"Window size mismatch"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Registered stage type identifiers.
///
/// # Examples
///
/// ```
/// use signal_pipeline_domain::entities::StageKind;
/// use std::str::FromStr;
///
/// assert_eq!(StageKind::MovingAverage.to_string(), "movingAverage");
/// assert_eq!(StageKind::from_str("rms").unwrap(), StageKind::Rms);
/// assert!(StageKind::from_str("unknownStage").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Rectify,
    MovingAverage,
    CumulativeMovingAverage,
    ExponentialMovingAverage,
    Rms,
    MeanAbsoluteValue,
    Variance,
    ZScoreNormalize,
    Differentiator,
    Integrator,
    Filter,
    FilterBank,
    Convolution,
    Interpolate,
    Decimate,
    Resample,
    Stft,
    MelSpectrogram,
    Mfcc,
    WaveletTransform,
    HilbertEnvelope,
    Fft,
    PcaTransform,
    IcaTransform,
    WhiteningTransform,
    CspTransform,
    ChannelSelect,
    ChannelMerge,
    LmsFilter,
    RlsFilter,
    PeakDetection,
    ClipDetection,
    Snr,
    WaveformLength,
    WillisonAmplitude,
    SlopeSignChange,
    LinearRegression,
    Tap,
    KalmanFilter,
    TimeAlignment,
    Amplify,
}

impl StageKind {
    /// The stable identifier written into snapshots.
    pub fn identifier(&self) -> &'static str {
        match self {
            StageKind::Rectify => "rectify",
            StageKind::MovingAverage => "movingAverage",
            StageKind::CumulativeMovingAverage => "cumulativeMovingAverage",
            StageKind::ExponentialMovingAverage => "exponentialMovingAverage",
            StageKind::Rms => "rms",
            StageKind::MeanAbsoluteValue => "meanAbsoluteValue",
            StageKind::Variance => "variance",
            StageKind::ZScoreNormalize => "zScoreNormalize",
            StageKind::Differentiator => "differentiator",
            StageKind::Integrator => "integrator",
            StageKind::Filter => "filter",
            StageKind::FilterBank => "filterBank",
            StageKind::Convolution => "convolution",
            StageKind::Interpolate => "interpolate",
            StageKind::Decimate => "decimate",
            StageKind::Resample => "resample",
            StageKind::Stft => "stft",
            StageKind::MelSpectrogram => "melSpectrogram",
            StageKind::Mfcc => "mfcc",
            StageKind::WaveletTransform => "waveletTransform",
            StageKind::HilbertEnvelope => "hilbertEnvelope",
            StageKind::Fft => "fft",
            StageKind::PcaTransform => "pcaTransform",
            StageKind::IcaTransform => "icaTransform",
            StageKind::WhiteningTransform => "whiteningTransform",
            StageKind::CspTransform => "cspTransform",
            StageKind::ChannelSelect => "channelSelect",
            StageKind::ChannelMerge => "channelMerge",
            StageKind::LmsFilter => "lmsFilter",
            StageKind::RlsFilter => "rlsFilter",
            StageKind::PeakDetection => "peakDetection",
            StageKind::ClipDetection => "clipDetection",
            StageKind::Snr => "snr",
            StageKind::WaveformLength => "waveformLength",
            StageKind::WillisonAmplitude => "willisonAmplitude",
            StageKind::SlopeSignChange => "slopeSignChange",
            StageKind::LinearRegression => "linearRegression",
            StageKind::Tap => "tap",
            StageKind::KalmanFilter => "kalmanFilter",
            StageKind::TimeAlignment => "timeAlignment",
            StageKind::Amplify => "amplify",
        }
    }

    /// All registered kinds, in identifier order of the public surface.
    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::Rectify,
            StageKind::MovingAverage,
            StageKind::CumulativeMovingAverage,
            StageKind::ExponentialMovingAverage,
            StageKind::Rms,
            StageKind::MeanAbsoluteValue,
            StageKind::Variance,
            StageKind::ZScoreNormalize,
            StageKind::Differentiator,
            StageKind::Integrator,
            StageKind::Filter,
            StageKind::FilterBank,
            StageKind::Convolution,
            StageKind::Interpolate,
            StageKind::Decimate,
            StageKind::Resample,
            StageKind::Stft,
            StageKind::MelSpectrogram,
            StageKind::Mfcc,
            StageKind::WaveletTransform,
            StageKind::HilbertEnvelope,
            StageKind::Fft,
            StageKind::PcaTransform,
            StageKind::IcaTransform,
            StageKind::WhiteningTransform,
            StageKind::CspTransform,
            StageKind::ChannelSelect,
            StageKind::ChannelMerge,
            StageKind::LmsFilter,
            StageKind::RlsFilter,
            StageKind::PeakDetection,
            StageKind::ClipDetection,
            StageKind::Snr,
            StageKind::WaveformLength,
            StageKind::WillisonAmplitude,
            StageKind::SlopeSignChange,
            StageKind::LinearRegression,
            StageKind::Tap,
            StageKind::KalmanFilter,
            StageKind::TimeAlignment,
            StageKind::Amplify,
        ]
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl std::str::FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::all()
            .iter()
            .find(|kind| kind.identifier() == s)
            .copied()
            .ok_or_else(|| PipelineError::InvalidConfiguration(format!("Unknown stage type: {}", s)))
    }
}

/// Whether a stage carries state across calls (`moving`) or resets at every
/// call entry (`batch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageMode {
    Moving,
    Batch,
}

impl Default for StageMode {
    fn default() -> Self {
        StageMode::Moving
    }
}

impl std::fmt::Display for StageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageMode::Moving => write!(f, "moving"),
            StageMode::Batch => write!(f, "batch"),
        }
    }
}

/// One structural parameter value.
///
/// Untagged serialization keeps the structured snapshot human-readable:
/// `{"windowSize": 3, "mode": "moving"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::Flag(value) => write!(f, "{}", value),
            ParameterValue::Integer(value) => write!(f, "{}", value),
            ParameterValue::Float(value) => write!(f, "{}", value),
            ParameterValue::Text(value) => write!(f, "{}", value),
        }
    }
}

/// The structural-parameter record of one stage.
///
/// Only parameters that determine state shape belong here; cosmetic or
/// purely behavioral settings stay out so that snapshots remain portable
/// across equivalent configurations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageParameters(BTreeMap<String, ParameterValue>);

impl StageParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style integer parameter.
    pub fn with_integer(mut self, name: &str, value: i64) -> Self {
        self.0.insert(name.to_string(), ParameterValue::Integer(value));
        self
    }

    /// Builder-style float parameter.
    pub fn with_float(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), ParameterValue::Float(value));
        self
    }

    /// Builder-style boolean parameter.
    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.0.insert(name.to_string(), ParameterValue::Flag(value));
        self
    }

    /// Builder-style string parameter.
    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), ParameterValue::Text(value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    /// Iterates entries in fixed (lexicographic) order. The compact snapshot
    /// codec relies on this order being deterministic per stage type.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// Compares a snapshot record against the constructed pipeline's record.
    ///
    /// # Errors
    ///
    /// Returns `StateLoad` with a message naming the first offending field
    /// in human form, e.g. `"Window size mismatch"` for `windowSize`.
    pub fn check_matches(&self, snapshot: &StageParameters) -> Result<(), PipelineError> {
        for (name, expected) in self.iter() {
            match snapshot.get(name) {
                None => {
                    return Err(PipelineError::StateLoad(format!(
                        "{} missing from snapshot",
                        humanize_field(name)
                    )));
                }
                Some(actual) if !values_match(expected, actual) => {
                    return Err(PipelineError::StateLoad(format!(
                        "{} mismatch: snapshot has {}, pipeline has {}",
                        humanize_field(name),
                        actual,
                        expected
                    )));
                }
                Some(_) => {}
            }
        }
        for (name, _) in snapshot.iter() {
            if self.get(name).is_none() {
                return Err(PipelineError::StateLoad(format!(
                    "{} not expected by pipeline",
                    humanize_field(name)
                )));
            }
        }
        Ok(())
    }
}

/// Numeric parameters compare across integer/float representations so that a
/// structured snapshot re-read through JSON (where `1.0` may decode as an
/// integer) still matches.
fn values_match(a: &ParameterValue, b: &ParameterValue) -> bool {
    match (a, b) {
        (ParameterValue::Integer(x), ParameterValue::Float(y))
        | (ParameterValue::Float(y), ParameterValue::Integer(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

/// Converts a camelCase field name to a human sentence fragment:
/// `windowSize` → `Window size`.
fn humanize_field(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if i == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            out.push(' ');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_identifier_roundtrip_for_all_kinds() {
        for kind in StageKind::all() {
            let parsed = StageKind::from_str(kind.identifier()).unwrap();
            assert_eq!(parsed, *kind);
        }
        assert_eq!(StageKind::all().len(), 41);
    }

    #[test]
    fn test_unknown_identifier_is_rejected() {
        let err = StageKind::from_str("lowpassMagic").unwrap_err();
        assert!(err.to_string().contains("Unknown stage type"));
    }

    #[test]
    fn test_parameter_match_success() {
        let params = StageParameters::new()
            .with_integer("windowSize", 3)
            .with_text("mode", "moving");
        assert!(params.check_matches(&params.clone()).is_ok());
    }

    #[test]
    fn test_parameter_mismatch_names_field() {
        let pipeline = StageParameters::new().with_integer("windowSize", 3);
        let snapshot = StageParameters::new().with_integer("windowSize", 5);
        let err = pipeline.check_matches(&snapshot).unwrap_err();
        assert!(err.to_string().contains("Window size mismatch"), "{}", err);
    }

    #[test]
    fn test_missing_and_extra_parameters_are_errors() {
        let pipeline = StageParameters::new().with_integer("numTaps", 8);
        let err = pipeline.check_matches(&StageParameters::new()).unwrap_err();
        assert!(err.to_string().contains("Num taps missing"));

        let snapshot = StageParameters::new()
            .with_integer("numTaps", 8)
            .with_float("alpha", 0.5);
        let err = pipeline.check_matches(&snapshot).unwrap_err();
        assert!(err.to_string().contains("Alpha not expected"));
    }

    #[test]
    fn test_integer_float_equivalence() {
        let pipeline = StageParameters::new().with_float("alpha", 1.0);
        let snapshot = StageParameters::new().with_integer("alpha", 1);
        assert!(pipeline.check_matches(&snapshot).is_ok());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(StageMode::Moving.to_string(), "moving");
        assert_eq!(StageMode::Batch.to_string(), "batch");
    }
}
