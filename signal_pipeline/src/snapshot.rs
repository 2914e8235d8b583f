// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Snapshot Orchestration
//!
//! Save/load glue between a pipeline's stage list and the snapshot formats.
//!
//! The load protocol, in order:
//!
//! 1. Decode (format auto-detected by the magic bytes). Recoverable decode
//!    failures retry up to `max_retries`; validation failures never retry.
//! 2. Version gate (inside the codecs: unknown majors are rejected).
//! 3. Structure match: stage count and per-position kind identifiers
//!    ("Pipeline structure mismatch").
//! 4. Structural parameter match per stage (errors name the field, e.g.
//!    "Window size mismatch").
//! 5. Install: each stage validates derived invariants (running sums
//!    recomputed from stored rings) inside `restore_state`. Installation is
//!    transactional: if any stage rejects its cell, every previously
//!    restored stage is rolled back to its pre-load state.

use tracing::debug;

use signal_pipeline_domain::{
    PipelineError, PipelineSnapshot, StageService, StageSnapshot, MAGIC_BYTES,
};

/// Captures the full pipeline state as a snapshot tree. Read-only.
pub(crate) fn capture(stages: &[Box<dyn StageService>]) -> PipelineSnapshot {
    let stage_snapshots = stages
        .iter()
        .map(|stage| StageSnapshot {
            stage_type: stage.kind().identifier().to_string(),
            parameters: stage.structural_parameters(),
            state: stage.snapshot_state(),
        })
        .collect();
    PipelineSnapshot::new(stage_snapshots)
}

/// Decodes a snapshot blob, retrying recoverable decode failures.
pub(crate) fn decode(blob: &[u8], max_retries: u32) -> Result<PipelineSnapshot, PipelineError> {
    let mut attempt = 0u32;
    loop {
        let result = if blob.starts_with(&MAGIC_BYTES) {
            PipelineSnapshot::from_compact_bytes(blob)
        } else {
            match std::str::from_utf8(blob) {
                Ok(text) => PipelineSnapshot::from_structured_str(text),
                Err(e) => Err(PipelineError::DecodeError(format!(
                    "Snapshot is not valid UTF-8: {}",
                    e
                ))),
            }
        };
        match result {
            Ok(snapshot) => {
                snapshot.validate()?;
                return Ok(snapshot);
            }
            Err(err) if err.is_recoverable() && attempt < max_retries => {
                attempt += 1;
                debug!(attempt, error = %err, "snapshot decode failed; retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Verifies structure + parameters, then transactionally installs state.
pub(crate) fn restore(
    stages: &mut [Box<dyn StageService>],
    snapshot: &PipelineSnapshot,
) -> Result<(), PipelineError> {
    if snapshot.stages.len() != stages.len() {
        return Err(PipelineError::StateLoad(format!(
            "Pipeline structure mismatch: snapshot has {} stages, pipeline has {}",
            snapshot.stages.len(),
            stages.len()
        )));
    }
    for (index, (stage, cell)) in stages.iter().zip(&snapshot.stages).enumerate() {
        let expected = stage.kind().identifier();
        if cell.stage_type != expected {
            return Err(PipelineError::StateLoad(format!(
                "Pipeline structure mismatch: stage {} is '{}', snapshot has '{}'",
                index, expected, cell.stage_type
            )));
        }
        stage
            .structural_parameters()
            .check_matches(&cell.parameters)
            .map_err(|err| {
                PipelineError::StateLoad(format!("Stage {} ({}): {}", index, expected, err))
            })?;
    }

    // Transactional install: roll back already-restored stages on failure
    let guards: Vec<_> = stages.iter().map(|stage| stage.snapshot_state()).collect();
    for index in 0..stages.len() {
        let cell = &snapshot.stages[index];
        if let Err(err) = stages[index].restore_state(&cell.state) {
            for rolled in 0..index {
                // Own prior state always restores
                let _ = stages[rolled].restore_state(&guards[rolled]);
            }
            return Err(PipelineError::StateLoad(format!(
                "Stage {} ({}): {}",
                index, cell.stage_type, err
            )));
        }
    }
    Ok(())
}
