// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Channel routing: gather-by-index.
//!
//! `channelSelect` and `channelMerge` share one implementation (both gather
//! input channels by index, duplicates allowed) and are kept as two
//! registered kinds for snapshot back-compat.

use signal_pipeline_domain::{
    BlockContext, PipelineError, StageKind, StageOutput, StageParameters, StageService, StageState,
};

/// Configuration for [`ChannelRoutingStage`].
#[derive(Debug, Clone)]
pub struct ChannelRoutingConfig {
    /// Output channel `i` copies input channel `mapping[i]`.
    pub mapping: Vec<usize>,
    /// Expected input channel count; checked against the stream at process
    /// time.
    pub num_input_channels: usize,
}

/// Gather-by-index channel router.
pub struct ChannelRoutingStage {
    kind: StageKind,
    mapping: Vec<usize>,
    num_input_channels: usize,
}

impl ChannelRoutingStage {
    fn build(kind: StageKind, config: ChannelRoutingConfig) -> Result<Self, PipelineError> {
        if config.mapping.is_empty() {
            return Err(PipelineError::InvalidParameter(
                "Channel mapping cannot be empty".to_string(),
            ));
        }
        if config.num_input_channels == 0 {
            return Err(PipelineError::InvalidParameter(
                "Number of input channels must be positive".to_string(),
            ));
        }
        if let Some(&bad) = config.mapping.iter().find(|&&i| i >= config.num_input_channels) {
            return Err(PipelineError::InvalidParameter(format!(
                "Channel index {} out of range for {} input channels",
                bad, config.num_input_channels
            )));
        }
        Ok(Self {
            kind,
            mapping: config.mapping,
            num_input_channels: config.num_input_channels,
        })
    }

    pub fn select(config: ChannelRoutingConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::ChannelSelect, config)
    }

    pub fn merge(config: ChannelRoutingConfig) -> Result<Self, PipelineError> {
        Self::build(StageKind::ChannelMerge, config)
    }
}

impl StageService for ChannelRoutingStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        if ctx.channels != self.num_input_channels {
            return Err(PipelineError::ChannelMismatch(format!(
                "Stage '{}' expects {} input channels, got {}",
                self.kind, self.num_input_channels, ctx.channels
            )));
        }
        let out_channels = self.mapping.len();
        let mut out = Vec::with_capacity(frames * out_channels);
        for frame in 0..frames {
            let base = frame * ctx.channels;
            for &source in &self.mapping {
                out.push(samples[base + source]);
            }
        }
        Ok(StageOutput::resized(out, out_channels))
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        self.mapping.len()
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_integer("numInputChannels", self.num_input_channels as i64)
            .with_integer("numOutputChannels", self.mapping.len() as i64)
            .with_text(
                "mapping",
                &self
                    .mapping
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            )
    }

    fn snapshot_state(&self) -> StageState {
        StageState::new()
    }

    fn restore_state(&mut self, _state: &StageState) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: &mut ChannelRoutingStage, input: &[f32], channels: usize) -> (Vec<f32>, usize) {
        let mut samples = input.to_vec();
        let ctx = BlockContext::new(channels, 1000.0);
        match stage.process_block(&mut samples, &ctx).unwrap() {
            StageOutput::Resized { samples, channels } => (samples, channels),
            StageOutput::InPlace => (samples, channels),
        }
    }

    /// Swapping a stereo pair: mapping [1, 0].
    #[test]
    fn test_swap_two_channels() {
        let mut stage = ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![1, 0],
            num_input_channels: 2,
        })
        .unwrap();
        let (out, channels) = run(&mut stage, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
        assert_eq!(channels, 2);
        assert_eq!(out, vec![2.0, 1.0, 4.0, 3.0, 6.0, 5.0]);
    }

    #[test]
    fn test_duplicate_and_drop() {
        let mut stage = ChannelRoutingStage::merge(ChannelRoutingConfig {
            mapping: vec![0, 0, 2],
            num_input_channels: 3,
        })
        .unwrap();
        let (out, channels) = run(&mut stage, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3);
        assert_eq!(channels, 3);
        assert_eq!(out, vec![1.0, 1.0, 3.0, 4.0, 4.0, 6.0]);
    }

    #[test]
    fn test_identity_mapping_preserves_input() {
        let mut stage = ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![0, 1, 2],
            num_input_channels: 3,
        })
        .unwrap();
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (out, _) = run(&mut stage, &input, 3);
        assert_eq!(out, input.to_vec());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![],
            num_input_channels: 2,
        })
        .is_err());
        assert!(ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![0],
            num_input_channels: 0,
        })
        .is_err());
        assert!(ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![2],
            num_input_channels: 2,
        })
        .is_err());
    }

    #[test]
    fn test_channel_count_mismatch_at_process_time() {
        let mut stage = ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![0],
            num_input_channels: 4,
        })
        .unwrap();
        let mut samples = vec![0.0; 6];
        let ctx = BlockContext::new(2, 1000.0);
        let err = stage.process_block(&mut samples, &ctx).unwrap_err();
        assert!(err.to_string().contains("expects 4 input channels"));
    }

    #[test]
    fn test_empty_input() {
        let mut stage = ChannelRoutingStage::select(ChannelRoutingConfig {
            mapping: vec![1, 0],
            num_input_channels: 2,
        })
        .unwrap();
        let (out, channels) = run(&mut stage, &[], 2);
        assert!(out.is_empty());
        assert_eq!(channels, 2);
    }
}
