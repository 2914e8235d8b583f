// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Pause/resume demo: snapshot a running pipeline, rebuild it "in another
//! process", and verify the resumed stream is bit-identical to the
//! uninterrupted one.
//!
//! ```text
//! cargo run --example pause_resume
//! ```

use signal_pipeline::numerics::filter_design::butterworth_lowpass;
use signal_pipeline::pipeline::{LoadOutcome, Pipeline, PipelineOptions};
use signal_pipeline::stages::statistics::{
    ExponentialMovingAverageConfig, WindowedStatisticConfig,
};
use signal_pipeline::stages::WindowSpec;
use signal_pipeline_domain::{PipelineError, ProcessOptions, SnapshotFormat, StageMode};

const SAMPLE_RATE: f64 = 500.0;

fn build() -> Result<Pipeline, PipelineError> {
    let lowpass = butterworth_lowpass(4, 40.0, SAMPLE_RATE)?;
    Pipeline::new(PipelineOptions::default())
        .filter(lowpass.into())?
        .rms(WindowedStatisticConfig {
            mode: StageMode::Moving,
            window: Some(WindowSpec::Samples(25)),
            sample_rate: None,
        })?
        .exponential_moving_average(ExponentialMovingAverageConfig {
            alpha: 0.2,
            mode: StageMode::Moving,
        })
}

fn signal(offset: usize, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let t = (offset + i) as f64 / SAMPLE_RATE;
            ((2.0 * std::f64::consts::PI * 12.0 * t).sin()
                + 0.3 * (2.0 * std::f64::consts::PI * 90.0 * t).sin()) as f32
        })
        .collect()
}

fn main() -> Result<(), PipelineError> {
    let opts = ProcessOptions::new(1, SAMPLE_RATE)?;

    // Uninterrupted reference run
    let mut reference = build()?;
    reference.process(&signal(0, 300), &opts)?;
    let expected = reference.process(&signal(300, 200), &opts)?;

    // Interrupted run: process, snapshot, "move to another process", resume
    let mut first_half = build()?;
    first_half.process(&signal(0, 300), &opts)?;

    let compact = first_half.save_state(SnapshotFormat::Compact)?;
    let structured = first_half.save_state(SnapshotFormat::Structured)?;
    println!(
        "snapshot sizes: compact {} bytes, structured {} bytes",
        compact.len(),
        structured.len()
    );

    let mut resumed = build()?;
    match resumed.load_state(&compact)? {
        LoadOutcome::Restored => println!("state restored from compact snapshot"),
        LoadOutcome::FreshFallback { reason } => {
            println!("unexpected fallback: {}", reason)
        }
    }

    let actual = resumed.process(&signal(300, 200), &opts)?;
    assert_eq!(
        actual, expected,
        "resumed stream must match the uninterrupted stream bit-for-bit"
    );
    println!(
        "resumed {} frames, outputs identical to the uninterrupted run",
        actual.frames()
    );
    Ok(())
}
