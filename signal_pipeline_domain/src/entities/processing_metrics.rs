// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Processing metrics entity.
//!
//! Plain counters a pipeline accumulates while processing: chunks seen,
//! frames in and out, and cumulative wall time per stage. This is bookkeeping
//! for callers, not an observability layer; nothing here is exported
//! anywhere.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cumulative counters for one pipeline instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    chunks_processed: u64,
    frames_in: u64,
    frames_out: u64,
    stage_elapsed: Vec<Duration>,
}

impl ProcessingMetrics {
    pub fn new(stage_count: usize) -> Self {
        Self {
            chunks_processed: 0,
            frames_in: 0,
            frames_out: 0,
            stage_elapsed: vec![Duration::ZERO; stage_count],
        }
    }

    /// Records one completed `process` call.
    pub fn record_chunk(&mut self, frames_in: usize, frames_out: usize) {
        self.chunks_processed += 1;
        self.frames_in += frames_in as u64;
        self.frames_out += frames_out as u64;
    }

    /// Adds elapsed wall time for one stage invocation.
    pub fn record_stage_elapsed(&mut self, stage_index: usize, elapsed: Duration) {
        if let Some(slot) = self.stage_elapsed.get_mut(stage_index) {
            *slot += elapsed;
        }
    }

    pub fn chunks_processed(&self) -> u64 {
        self.chunks_processed
    }

    pub fn frames_in(&self) -> u64 {
        self.frames_in
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out
    }

    /// Cumulative wall time spent in each stage, in pipeline order.
    pub fn stage_elapsed(&self) -> &[Duration] {
        &self.stage_elapsed
    }

    /// Resets all counters, keeping the stage slot count.
    pub fn reset(&mut self) {
        let stages = self.stage_elapsed.len();
        *self = Self::new(stages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let mut metrics = ProcessingMetrics::new(2);
        metrics.record_chunk(100, 50);
        metrics.record_chunk(100, 50);
        metrics.record_stage_elapsed(1, Duration::from_millis(5));

        assert_eq!(metrics.chunks_processed(), 2);
        assert_eq!(metrics.frames_in(), 200);
        assert_eq!(metrics.frames_out(), 100);
        assert_eq!(metrics.stage_elapsed()[1], Duration::from_millis(5));

        metrics.reset();
        assert_eq!(metrics.chunks_processed(), 0);
        assert_eq!(metrics.stage_elapsed().len(), 2);
    }

    #[test]
    fn test_out_of_range_stage_is_ignored() {
        let mut metrics = ProcessingMetrics::new(1);
        metrics.record_stage_elapsed(9, Duration::from_secs(1));
        assert_eq!(metrics.stage_elapsed().len(), 1);
        assert_eq!(metrics.stage_elapsed()[0], Duration::ZERO);
    }
}
