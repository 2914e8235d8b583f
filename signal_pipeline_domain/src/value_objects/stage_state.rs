// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage State Model
//!
//! Every stage exposes its mutable state as a `StageState` tree: stage-wide
//! scalars and counters plus one `ChannelState` per channel, where each
//! channel holds named scalars, counters, and `f32` buffers (ring buffers,
//! delay lines, adaptive weights).
//!
//! The model is the single source for both snapshot formats: the structured
//! format serializes it with serde, and the compact format walks the same
//! tree writing little-endian blocks. `BTreeMap` keys give both formats a
//! fixed, deterministic field order per stage type.
//!
//! Accessors return `PipelineError` naming the missing field so that
//! `restore_state` implementations produce actionable load errors without
//! boilerplate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Per-channel state cells: named scalars, counters, and sample buffers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub buffers: BTreeMap<String, Vec<f32>>,
}

impl ChannelState {
    /// Creates an empty channel cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style scalar insertion.
    pub fn with_scalar(mut self, name: &str, value: f64) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    /// Builder-style counter insertion.
    pub fn with_counter(mut self, name: &str, value: u64) -> Self {
        self.counters.insert(name.to_string(), value);
        self
    }

    /// Builder-style buffer insertion.
    pub fn with_buffer(mut self, name: &str, values: Vec<f32>) -> Self {
        self.buffers.insert(name.to_string(), values);
        self
    }

    /// Reads a named scalar.
    ///
    /// # Errors
    ///
    /// Returns `StateLoad` naming the missing field.
    pub fn scalar(&self, name: &str) -> Result<f64, PipelineError> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::StateLoad(format!("Missing state scalar '{}'", name)))
    }

    /// Reads a named counter.
    pub fn counter(&self, name: &str) -> Result<u64, PipelineError> {
        self.counters
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::StateLoad(format!("Missing state counter '{}'", name)))
    }

    /// Borrows a named buffer.
    pub fn buffer(&self, name: &str) -> Result<&[f32], PipelineError> {
        self.buffers
            .get(name)
            .map(|buffer| buffer.as_slice())
            .ok_or_else(|| PipelineError::StateLoad(format!("Missing state buffer '{}'", name)))
    }

    /// Borrows a named buffer and checks its length against the shape the
    /// stage's parameters imply.
    pub fn buffer_with_len(&self, name: &str, expected: usize) -> Result<&[f32], PipelineError> {
        let buffer = self.buffer(name)?;
        if buffer.len() != expected {
            return Err(PipelineError::StateLoad(format!(
                "State buffer '{}' has length {}, expected {}",
                name,
                buffer.len(),
                expected
            )));
        }
        Ok(buffer)
    }
}

/// Complete state of one stage at a point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelState>,
}

impl StageState {
    /// Creates an empty state tree (the snapshot of a stateless stage).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style stage-wide scalar insertion.
    pub fn with_scalar(mut self, name: &str, value: f64) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    /// Builder-style stage-wide counter insertion.
    pub fn with_counter(mut self, name: &str, value: u64) -> Self {
        self.counters.insert(name.to_string(), value);
        self
    }

    /// Builder-style channel cell append.
    pub fn with_channel(mut self, channel: ChannelState) -> Self {
        self.channels.push(channel);
        self
    }

    /// Reads a stage-wide scalar.
    pub fn scalar(&self, name: &str) -> Result<f64, PipelineError> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::StateLoad(format!("Missing state scalar '{}'", name)))
    }

    /// Reads a stage-wide counter.
    pub fn counter(&self, name: &str) -> Result<u64, PipelineError> {
        self.counters
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::StateLoad(format!("Missing state counter '{}'", name)))
    }

    /// Number of per-channel cells.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Borrows one channel cell.
    pub fn channel(&self, index: usize) -> Result<&ChannelState, PipelineError> {
        self.channels
            .get(index)
            .ok_or_else(|| PipelineError::StateLoad(format!("Missing state for channel {}", index)))
    }

    /// Whether the tree carries no state at all.
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.counters.is_empty() && self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_accessors() {
        let state = StageState::new()
            .with_counter("frames_seen", 42)
            .with_channel(
                ChannelState::new()
                    .with_scalar("running_sum", 6.0)
                    .with_counter("fill", 3)
                    .with_buffer("window", vec![1.0, 2.0, 3.0]),
            );

        assert_eq!(state.counter("frames_seen").unwrap(), 42);
        assert_eq!(state.channel_count(), 1);
        let channel = state.channel(0).unwrap();
        assert_eq!(channel.scalar("running_sum").unwrap(), 6.0);
        assert_eq!(channel.counter("fill").unwrap(), 3);
        assert_eq!(channel.buffer("window").unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_missing_fields_name_the_field() {
        let state = StageState::new();
        let err = state.scalar("phase").unwrap_err();
        assert!(err.to_string().contains("phase"));
        let err = state.channel(2).unwrap_err();
        assert!(err.to_string().contains("channel 2"));
    }

    #[test]
    fn test_buffer_length_check() {
        let channel = ChannelState::new().with_buffer("delay", vec![0.0; 4]);
        assert!(channel.buffer_with_len("delay", 4).is_ok());
        let err = channel.buffer_with_len("delay", 8).unwrap_err();
        assert!(err.to_string().contains("expected 8"));
    }

    #[test]
    fn test_json_roundtrip_preserves_field_order() {
        let state = StageState::new().with_channel(
            ChannelState::new()
                .with_scalar("b_scalar", 2.0)
                .with_scalar("a_scalar", 1.0),
        );
        let json = serde_json::to_string(&state).unwrap();
        // BTreeMap ordering: "a_scalar" serializes before "b_scalar"
        assert!(json.find("a_scalar").unwrap() < json.find("b_scalar").unwrap());
        let restored: StageState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
