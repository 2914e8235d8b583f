// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Snapshot Format Value Object
//!
//! This module defines the serialized form of a paused pipeline: a versioned
//! tree of per-stage type identifiers, structural parameters, and state.
//! Snapshots exist so long-running streaming jobs can pause and resume
//! across process boundaries with bit-for-bit numeric behavior.
//!
//! ## Formats
//!
//! - **Structured**: self-describing JSON with float arrays as plain
//!   numbers. Human-readable, diff-able, resilient to field reordering.
//! - **Compact**: fixed binary layout with little-endian scalars and raw
//!   little-endian `f32` arrays. Field order per stage type is fixed by the
//!   state model's deterministic key order.
//!
//! ## Compact Binary Layout
//!
//! ```text
//! [MAGIC (4)] [MAJOR (u16)] [MINOR (u16)] [FLAGS (u32)]
//! [TIMESTAMP (i64, if FLAG_TIMESTAMP)]
//! [STAGE_COUNT (u32)]
//! per stage:
//!   [TYPE_LEN (u16)] [TYPE UTF-8]
//!   [PARAM_BLOCK_LEN (u32)] [tagged little-endian parameters]
//!   [STATE_BLOCK_LEN (u32)] [scalars, counters, per-channel arrays
//!                            prefixed by count + length]
//! [SHA-256 DIGEST (32), if FLAG_PAYLOAD_DIGEST]
//! ```
//!
//! The digest covers everything after the 12-byte header and is verified
//! before any payload parsing; it catches truncation and tampering early
//! with a validation error rather than a confusing parse failure.
//!
//! ## Error Classification
//!
//! Truncated or malformed payload bytes decode-fail with
//! `PipelineError::DecodeError`, the recoverable class the load protocol
//! may retry. Wrong magic bytes and unsupported major versions are
//! permanent `StateLoad` errors: retrying the same bytes cannot succeed.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entities::{ParameterValue, StageParameters};
use crate::value_objects::{ChannelState, StageState};
use crate::PipelineError;

/// Magic bytes identifying a compact snapshot: "SPIP" (Signal PIPeline).
pub const MAGIC_BYTES: [u8; 4] = [0x53, 0x50, 0x49, 0x50];

/// Current snapshot major version. Loads reject any other major.
pub const CURRENT_MAJOR_VERSION: u16 = 1;

/// Current snapshot minor version. Minor bumps are additive and accepted.
pub const CURRENT_MINOR_VERSION: u16 = 0;

/// Flags bit 0: a SHA-256 digest of the payload trails the snapshot.
pub const FLAG_PAYLOAD_DIGEST: u32 = 1 << 0;

/// Flags bit 1: an i64 unix-millisecond timestamp follows the header.
pub const FLAG_TIMESTAMP: u32 = 1 << 1;

const HEADER_LEN: usize = 12;
const DIGEST_LEN: usize = 32;

/// Snapshot save format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Human-readable JSON.
    Structured,
    /// Little-endian binary with raw `f32` arrays.
    Compact,
}

/// Serialized form of one stage: stable type identifier, structural
/// parameters, and complete state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Registered stage kind identifier (e.g. `"movingAverage"`).
    #[serde(rename = "type")]
    pub stage_type: String,

    /// The parameter subset that determines state shape; checked on load.
    pub parameters: StageParameters,

    /// Per-channel arrays and scalars specific to the stage.
    pub state: StageState,
}

/// Serialized form of a whole pipeline at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// Snapshot tree version; equals the compact format's major version.
    pub version: u32,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// One entry per stage, in pipeline order.
    pub stages: Vec<StageSnapshot>,
}

impl PipelineSnapshot {
    /// Creates a snapshot stamped with the current time.
    pub fn new(stages: Vec<StageSnapshot>) -> Self {
        Self {
            version: CURRENT_MAJOR_VERSION as u32,
            timestamp: Utc::now(),
            stages,
        }
    }

    /// Validates tree-level consistency.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.version == 0 {
            return Err(PipelineError::ValidationError(
                "Snapshot version cannot be 0".to_string(),
            ));
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.stage_type.is_empty() {
                return Err(PipelineError::ValidationError(format!(
                    "Snapshot stage {} has an empty type identifier",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Serializes to the structured (JSON) format.
    pub fn to_structured_string(&self) -> Result<String, PipelineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::SerializationError(format!("Failed to serialize snapshot: {}", e)))
    }

    /// Deserializes from the structured (JSON) format.
    pub fn from_structured_str(text: &str) -> Result<Self, PipelineError> {
        let snapshot: PipelineSnapshot = serde_json::from_str(text)
            .map_err(|e| PipelineError::DecodeError(format!("Failed to decode snapshot: {}", e)))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Serializes to the compact binary format with payload digest.
    pub fn to_compact_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let flags = FLAG_PAYLOAD_DIGEST | FLAG_TIMESTAMP;

        let mut payload = Vec::new();
        write_i64(&mut payload, self.timestamp.timestamp_millis());
        write_u32(&mut payload, self.stages.len() as u32);
        for stage in &self.stages {
            write_string16(&mut payload, &stage.stage_type)?;

            let param_block = encode_parameters(&stage.parameters)?;
            write_u32(&mut payload, param_block.len() as u32);
            payload.extend_from_slice(&param_block);

            let state_block = encode_state(&stage.state)?;
            write_u32(&mut payload, state_block.len() as u32);
            payload.extend_from_slice(&state_block);
        }

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + DIGEST_LEN);
        out.extend_from_slice(&MAGIC_BYTES);
        out.extend_from_slice(&CURRENT_MAJOR_VERSION.to_le_bytes());
        out.extend_from_slice(&CURRENT_MINOR_VERSION.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&payload);

        let mut hasher = Sha256::new();
        hasher.update(&payload);
        out.extend_from_slice(&hasher.finalize());

        Ok(out)
    }

    /// Deserializes from the compact binary format.
    pub fn from_compact_bytes(data: &[u8]) -> Result<Self, PipelineError> {
        if data.len() < HEADER_LEN {
            return Err(PipelineError::DecodeError(
                "Snapshot too short for header".to_string(),
            ));
        }
        if data[0..4] != MAGIC_BYTES {
            return Err(PipelineError::StateLoad(
                "Invalid magic bytes - not a compact pipeline snapshot".to_string(),
            ));
        }
        let major = u16::from_le_bytes([data[4], data[5]]);
        let _minor = u16::from_le_bytes([data[6], data[7]]);
        let flags = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if major != CURRENT_MAJOR_VERSION {
            return Err(PipelineError::StateLoad(format!(
                "Unsupported snapshot major version: {} (current: {})",
                major, CURRENT_MAJOR_VERSION
            )));
        }

        let mut payload = &data[HEADER_LEN..];
        if flags & FLAG_PAYLOAD_DIGEST != 0 {
            if payload.len() < DIGEST_LEN {
                return Err(PipelineError::DecodeError(
                    "Snapshot too short for payload digest".to_string(),
                ));
            }
            let (body, digest) = payload.split_at(payload.len() - DIGEST_LEN);
            let mut hasher = Sha256::new();
            hasher.update(body);
            let computed = hasher.finalize();
            if computed.as_slice() != digest {
                return Err(PipelineError::StateValidation(format!(
                    "Snapshot digest mismatch: stored {}, computed {}",
                    hex::encode(digest),
                    hex::encode(computed)
                )));
            }
            payload = body;
        }

        let mut reader = ByteReader::new(payload);
        let timestamp = if flags & FLAG_TIMESTAMP != 0 {
            let millis = reader.read_i64()?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| PipelineError::DecodeError(format!("Invalid snapshot timestamp: {}", millis)))?
        } else {
            Utc.timestamp_millis_opt(0).single().unwrap_or_else(Utc::now)
        };

        let stage_count = reader.read_u32()? as usize;
        let mut stages = Vec::with_capacity(stage_count);
        for _ in 0..stage_count {
            let stage_type = reader.read_string16()?;

            let param_len = reader.read_u32()? as usize;
            let param_bytes = reader.take(param_len)?;
            let parameters = decode_parameters(param_bytes)?;

            let state_len = reader.read_u32()? as usize;
            let state_bytes = reader.take(state_len)?;
            let state = decode_state(state_bytes)?;

            stages.push(StageSnapshot {
                stage_type,
                parameters,
                state,
            });
        }
        reader.expect_exhausted()?;

        Ok(Self {
            version: major as u32,
            timestamp,
            stages,
        })
    }

    fn check_version(&self) -> Result<(), PipelineError> {
        if self.version != CURRENT_MAJOR_VERSION as u32 {
            return Err(PipelineError::StateLoad(format!(
                "Unsupported snapshot major version: {} (current: {})",
                self.version, CURRENT_MAJOR_VERSION
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parameter block encoding
// ---------------------------------------------------------------------------

const TAG_FLAG: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_TEXT: u8 = 3;

fn encode_parameters(params: &StageParameters) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::new();
    write_u16(&mut out, params.len() as u16);
    for (name, value) in params.iter() {
        write_string16(&mut out, name)?;
        match value {
            ParameterValue::Flag(flag) => {
                out.push(TAG_FLAG);
                out.push(u8::from(*flag));
            }
            ParameterValue::Integer(int) => {
                out.push(TAG_INTEGER);
                write_i64(&mut out, *int);
            }
            ParameterValue::Float(float) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&float.to_le_bytes());
            }
            ParameterValue::Text(text) => {
                out.push(TAG_TEXT);
                write_string16(&mut out, text)?;
            }
        }
    }
    Ok(out)
}

fn decode_parameters(bytes: &[u8]) -> Result<StageParameters, PipelineError> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u16()? as usize;
    let mut params = StageParameters::new();
    for _ in 0..count {
        let name = reader.read_string16()?;
        let tag = reader.read_u8()?;
        params = match tag {
            TAG_FLAG => params.with_flag(&name, reader.read_u8()? != 0),
            TAG_INTEGER => params.with_integer(&name, reader.read_i64()?),
            TAG_FLOAT => params.with_float(&name, reader.read_f64()?),
            TAG_TEXT => {
                let text = reader.read_string16()?;
                params.with_text(&name, &text)
            }
            other => {
                return Err(PipelineError::DecodeError(format!(
                    "Unknown parameter tag: {}",
                    other
                )));
            }
        };
    }
    reader.expect_exhausted()?;
    Ok(params)
}

// ---------------------------------------------------------------------------
// State block encoding
// ---------------------------------------------------------------------------

fn encode_state(state: &StageState) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::new();

    write_u16(&mut out, state.scalars.len() as u16);
    for (name, value) in &state.scalars {
        write_string16(&mut out, name)?;
        out.extend_from_slice(&value.to_le_bytes());
    }

    write_u16(&mut out, state.counters.len() as u16);
    for (name, value) in &state.counters {
        write_string16(&mut out, name)?;
        out.extend_from_slice(&value.to_le_bytes());
    }

    write_u32(&mut out, state.channels.len() as u32);
    for channel in &state.channels {
        write_u16(&mut out, channel.scalars.len() as u16);
        for (name, value) in &channel.scalars {
            write_string16(&mut out, name)?;
            out.extend_from_slice(&value.to_le_bytes());
        }

        write_u16(&mut out, channel.counters.len() as u16);
        for (name, value) in &channel.counters {
            write_string16(&mut out, name)?;
            out.extend_from_slice(&value.to_le_bytes());
        }

        write_u16(&mut out, channel.buffers.len() as u16);
        for (name, buffer) in &channel.buffers {
            write_string16(&mut out, name)?;
            write_u32(&mut out, buffer.len() as u32);
            for sample in buffer {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }

    Ok(out)
}

fn decode_state(bytes: &[u8]) -> Result<StageState, PipelineError> {
    let mut reader = ByteReader::new(bytes);
    let mut state = StageState::new();

    let scalar_count = reader.read_u16()? as usize;
    for _ in 0..scalar_count {
        let name = reader.read_string16()?;
        state = state.with_scalar(&name, reader.read_f64()?);
    }

    let counter_count = reader.read_u16()? as usize;
    for _ in 0..counter_count {
        let name = reader.read_string16()?;
        state = state.with_counter(&name, reader.read_u64()?);
    }

    let channel_count = reader.read_u32()? as usize;
    for _ in 0..channel_count {
        let mut channel = ChannelState::new();

        let scalar_count = reader.read_u16()? as usize;
        for _ in 0..scalar_count {
            let name = reader.read_string16()?;
            channel = channel.with_scalar(&name, reader.read_f64()?);
        }

        let counter_count = reader.read_u16()? as usize;
        for _ in 0..counter_count {
            let name = reader.read_string16()?;
            channel = channel.with_counter(&name, reader.read_u64()?);
        }

        let buffer_count = reader.read_u16()? as usize;
        for _ in 0..buffer_count {
            let name = reader.read_string16()?;
            let len = reader.read_u32()? as usize;
            let mut buffer = Vec::with_capacity(len);
            for _ in 0..len {
                buffer.push(reader.read_f32()?);
            }
            channel = channel.with_buffer(&name, buffer);
        }

        state = state.with_channel(channel);
    }

    reader.expect_exhausted()?;
    Ok(state)
}

// ---------------------------------------------------------------------------
// Little-endian primitives
// ---------------------------------------------------------------------------

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string16(out: &mut Vec<u8>, text: &str) -> Result<(), PipelineError> {
    let bytes = text.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(PipelineError::SerializationError(format!(
            "String too long for snapshot encoding: {} bytes",
            bytes.len()
        )));
    }
    write_u16(out, bytes.len() as u16);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked little-endian reader over a byte slice.
struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PipelineError> {
        if self.position + len > self.data.len() {
            return Err(PipelineError::DecodeError(format!(
                "Snapshot truncated: needed {} bytes at offset {}, have {}",
                len,
                self.position,
                self.data.len() - self.position
            )));
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, PipelineError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, PipelineError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, PipelineError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, PipelineError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_i64(&mut self) -> Result<i64, PipelineError> {
        Ok(self.read_u64()? as i64)
    }

    fn read_f32(&mut self) -> Result<f32, PipelineError> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, PipelineError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_string16(&mut self) -> Result<String, PipelineError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| PipelineError::DecodeError(format!("Invalid UTF-8 in snapshot: {}", e)))
    }

    fn expect_exhausted(&self) -> Result<(), PipelineError> {
        if self.position != self.data.len() {
            return Err(PipelineError::DecodeError(format!(
                "Snapshot block has {} trailing bytes",
                self.data.len() - self.position
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::StageKind;

    fn sample_snapshot() -> PipelineSnapshot {
        PipelineSnapshot::new(vec![
            StageSnapshot {
                stage_type: StageKind::MovingAverage.identifier().to_string(),
                parameters: StageParameters::new()
                    .with_integer("windowSize", 3)
                    .with_text("mode", "moving"),
                state: StageState::new().with_channel(
                    ChannelState::new()
                        .with_scalar("runningSum", 9.0)
                        .with_counter("fill", 3)
                        .with_buffer("window", vec![2.0, 3.0, 4.0]),
                ),
            },
            StageSnapshot {
                stage_type: StageKind::Rectify.identifier().to_string(),
                parameters: StageParameters::new().with_text("mode", "full"),
                state: StageState::new(),
            },
        ])
    }

    /// Structured and compact codecs must both restore the exact tree; this
    /// mirrors the `.adapipe` footer roundtrip contract.
    #[test]
    fn test_structured_roundtrip() {
        let snapshot = sample_snapshot();
        let text = snapshot.to_structured_string().unwrap();
        let restored = PipelineSnapshot::from_structured_str(&text).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_compact_roundtrip() {
        let snapshot = sample_snapshot();
        let bytes = snapshot.to_compact_bytes().unwrap();
        let restored = PipelineSnapshot::from_compact_bytes(&bytes).unwrap();
        // Millisecond timestamp storage truncates sub-millisecond precision
        assert_eq!(restored.version, snapshot.version);
        assert_eq!(restored.stages, snapshot.stages);
        assert_eq!(
            restored.timestamp.timestamp_millis(),
            snapshot.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn test_compact_layout_header() {
        let bytes = sample_snapshot().to_compact_bytes().unwrap();
        assert_eq!(&bytes[0..4], &MAGIC_BYTES);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), CURRENT_MAJOR_VERSION);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), CURRENT_MINOR_VERSION);
        let flags = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_ne!(flags & FLAG_PAYLOAD_DIGEST, 0);
    }

    #[test]
    fn test_invalid_magic_bytes() {
        let mut bytes = sample_snapshot().to_compact_bytes().unwrap();
        bytes[0] = 0xFF;
        let err = PipelineSnapshot::from_compact_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("Invalid magic bytes"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unsupported_major_version() {
        let mut bytes = sample_snapshot().to_compact_bytes().unwrap();
        bytes[4] = 99;
        let err = PipelineSnapshot::from_compact_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("Unsupported snapshot major version"));
    }

    /// Flipping a payload byte must be caught by the digest before parsing.
    #[test]
    fn test_tampered_payload_fails_digest() {
        let mut bytes = sample_snapshot().to_compact_bytes().unwrap();
        let mid = HEADER_LEN + 20;
        bytes[mid] ^= 0x01;
        let err = PipelineSnapshot::from_compact_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"), "{}", err);
    }

    #[test]
    fn test_truncated_snapshot_is_decode_error() {
        let bytes = sample_snapshot().to_compact_bytes().unwrap();
        let err = PipelineSnapshot::from_compact_bytes(&bytes[..HEADER_LEN + 4]).unwrap_err();
        assert!(err.is_recoverable(), "truncation should classify as decode error");
    }

    #[test]
    fn test_structured_rejects_other_major() {
        let mut snapshot = sample_snapshot();
        snapshot.version = 7;
        let text = serde_json::to_string(&snapshot).unwrap();
        let err = PipelineSnapshot::from_structured_str(&text).unwrap_err();
        assert!(err.to_string().contains("Unsupported snapshot major version"));
    }

    #[test]
    fn test_float_arrays_are_raw_little_endian() {
        let snapshot = PipelineSnapshot::new(vec![StageSnapshot {
            stage_type: StageKind::Filter.identifier().to_string(),
            parameters: StageParameters::new(),
            state: StageState::new()
                .with_channel(ChannelState::new().with_buffer("delay", vec![1.5f32])),
        }]);
        let bytes = snapshot.to_compact_bytes().unwrap();
        let needle = 1.5f32.to_le_bytes();
        assert!(
            bytes.windows(4).any(|window| window == needle),
            "raw little-endian f32 not found in compact snapshot"
        );
    }

    #[test]
    fn test_validate_flags_empty_type() {
        let mut snapshot = sample_snapshot();
        snapshot.stages[0].stage_type.clear();
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("empty type identifier"));
    }
}
