// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sample Buffer Value Object
//!
//! A `SampleBuffer` is the unit of data exchanged with a pipeline: a
//! contiguous sequence of 32-bit floats interpreted as `frames × channels`
//! in interleaved, sample-major order:
//!
//! ```text
//! [s0c0, s0c1, …, s0cC-1, s1c0, s1c1, …]
//! ```
//!
//! The buffer is self-validating: construction rejects a zero channel count
//! and any length that is not a whole number of frames. A small set of
//! stages documents a planar (`[all c0, all c1, …]`) layout; the
//! `to_planar`/`from_planar` pair supports those conversions at stage
//! boundaries.
//!
//! ## Value Object Characteristics
//!
//! - Equality is attribute-based (same samples, same channel count)
//! - No identity; buffers are freely cloned and moved between stages
//! - Invalid states are unrepresentable after construction

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Interleaved multi-channel sample buffer.
///
/// # Examples
///
/// ```
/// use signal_pipeline_domain::value_objects::SampleBuffer;
///
/// // Two channels, three frames
/// let buffer = SampleBuffer::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).unwrap();
/// assert_eq!(buffer.frames(), 3);
/// assert_eq!(buffer.sample(1, 0), 3.0);
/// assert_eq!(buffer.frame(2), &[5.0, 6.0]);
///
/// // A length that is not divisible by the channel count is rejected
/// assert!(SampleBuffer::new(vec![1.0, 2.0, 3.0], 2).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    channels: usize,
}

impl SampleBuffer {
    /// Creates a buffer from interleaved samples.
    ///
    /// # Errors
    ///
    /// Returns `ChannelMismatch` when `channels` is zero and `ShapeMismatch`
    /// when `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, channels: usize) -> Result<Self, PipelineError> {
        if channels == 0 {
            return Err(PipelineError::ChannelMismatch(
                "Channel count must be positive".to_string(),
            ));
        }
        if samples.len() % channels != 0 {
            return Err(PipelineError::ShapeMismatch(format!(
                "Buffer length {} is not divisible by channel count {}",
                samples.len(),
                channels
            )));
        }
        Ok(Self { samples, channels })
    }

    /// Creates an empty buffer with the given channel count.
    pub fn empty(channels: usize) -> Result<Self, PipelineError> {
        Self::new(Vec::new(), channels)
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames (`len / channels`).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Total number of samples across all channels.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Borrows the interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutably borrows the interleaved samples.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Consumes the buffer, returning the interleaved samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Borrows one frame (all channels of one sample instant).
    ///
    /// # Panics
    ///
    /// Panics when `frame` is out of range; callers iterate `0..frames()`.
    pub fn frame(&self, frame: usize) -> &[f32] {
        let start = frame * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// Reads a single sample.
    ///
    /// # Panics
    ///
    /// Panics when the frame or channel index is out of range.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channels + channel]
    }

    /// Splits into per-channel (planar) vectors: `[all c0, all c1, …]`.
    pub fn to_planar(&self) -> Vec<Vec<f32>> {
        let frames = self.frames();
        let mut planar = vec![Vec::with_capacity(frames); self.channels];
        for frame in 0..frames {
            for (channel, plane) in planar.iter_mut().enumerate() {
                plane.push(self.samples[frame * self.channels + channel]);
            }
        }
        planar
    }

    /// Rebuilds an interleaved buffer from per-channel vectors.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when the channel vectors have unequal lengths
    /// and `ChannelMismatch` when `planar` is empty.
    pub fn from_planar(planar: &[Vec<f32>]) -> Result<Self, PipelineError> {
        if planar.is_empty() {
            return Err(PipelineError::ChannelMismatch(
                "Planar input must contain at least one channel".to_string(),
            ));
        }
        let frames = planar[0].len();
        if planar.iter().any(|plane| plane.len() != frames) {
            return Err(PipelineError::ShapeMismatch(
                "Planar channels must have equal lengths".to_string(),
            ));
        }
        let channels = planar.len();
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for plane in planar {
                samples.push(plane[frame]);
            }
        }
        Self::new(samples, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_shape_accessors() {
        let buffer = SampleBuffer::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(buffer.channels(), 3);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.frame(1), &[4.0, 5.0, 6.0]);
        assert_eq!(buffer.sample(0, 2), 3.0);
    }

    #[test]
    fn test_rejects_invalid_shapes() {
        assert!(SampleBuffer::new(vec![1.0], 0).is_err());
        assert!(SampleBuffer::new(vec![1.0, 2.0, 3.0], 2).is_err());
        assert!(SampleBuffer::new(Vec::new(), 4).is_ok());
    }

    /// Interleaved → planar → interleaved must be lossless; the planar layout
    /// is the documented contract for the matrix-transform stages.
    #[test]
    fn test_planar_roundtrip() {
        let buffer = SampleBuffer::new(vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0], 2).unwrap();
        let planar = buffer.to_planar();
        assert_eq!(planar, vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]]);
        let rebuilt = SampleBuffer::from_planar(&planar).unwrap();
        assert_eq!(rebuilt, buffer);
    }

    #[test]
    fn test_from_planar_rejects_ragged_input() {
        let ragged = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(SampleBuffer::from_planar(&ragged).is_err());
        assert!(SampleBuffer::from_planar(&[]).is_err());
    }
}
