// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects: sample buffers, processing options, stage state, and the
//! snapshot formats.

pub mod process_options;
pub mod sample_buffer;
pub mod snapshot_format;
pub mod stage_state;

pub use process_options::ProcessOptions;
pub use sample_buffer::SampleBuffer;
pub use snapshot_format::{
    PipelineSnapshot, SnapshotFormat, StageSnapshot, CURRENT_MAJOR_VERSION, CURRENT_MINOR_VERSION,
    FLAG_PAYLOAD_DIGEST, FLAG_TIMESTAMP, MAGIC_BYTES,
};
pub use stage_state::{ChannelState, StageState};
