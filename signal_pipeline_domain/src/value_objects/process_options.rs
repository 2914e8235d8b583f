// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Per-invocation processing options.
//!
//! `ProcessOptions` describes how a submitted buffer should be interpreted:
//! how many interleaved channels it carries and the nominal sample rate the
//! stages should assume. Both fields are validated at construction so that
//! shape errors surface before any stage runs.

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Options supplied to every `process` call.
///
/// # Examples
///
/// ```
/// use signal_pipeline_domain::value_objects::ProcessOptions;
///
/// let opts = ProcessOptions::new(2, 1000.0).unwrap();
/// assert_eq!(opts.channels(), 2);
/// assert_eq!(opts.sample_rate(), 1000.0);
///
/// assert!(ProcessOptions::new(0, 1000.0).is_err());
/// assert!(ProcessOptions::new(2, 0.0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    channels: usize,
    sample_rate: f64,
}

impl ProcessOptions {
    /// Creates validated processing options.
    ///
    /// # Errors
    ///
    /// Returns `ChannelMismatch` for a zero channel count and
    /// `InvalidParameter` for a non-positive or non-finite sample rate.
    pub fn new(channels: usize, sample_rate: f64) -> Result<Self, PipelineError> {
        if channels == 0 {
            return Err(PipelineError::ChannelMismatch(
                "Channel count must be positive".to_string(),
            ));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Sample rate must be a positive finite number, got {}",
                sample_rate
            )));
        }
        Ok(Self { channels, sample_rate })
    }

    /// Number of interleaved channels in the submitted buffer.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Nominal sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
