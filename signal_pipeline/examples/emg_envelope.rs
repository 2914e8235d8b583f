// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! EMG envelope extraction demo.
//!
//! Builds the classic surface-EMG conditioning chain (highpass to remove
//! motion artifacts, full-wave rectification, moving RMS) and streams a
//! synthetic two-channel burst signal through it in small chunks, printing
//! the envelope peaks per chunk.
//!
//! ```text
//! cargo run --example emg_envelope
//! ```

use signal_pipeline::numerics::filter_design::butterworth_highpass;
use signal_pipeline::pipeline::{Pipeline, PipelineOptions};
use signal_pipeline::stages::amplitude::RectifyConfig;
use signal_pipeline::stages::statistics::WindowedStatisticConfig;
use signal_pipeline::stages::WindowSpec;
use signal_pipeline_domain::{PipelineError, ProcessOptions, StageMode};

const SAMPLE_RATE: f64 = 1000.0;
const CHANNELS: usize = 2;
const CHUNK_FRAMES: usize = 250;

/// Synthetic EMG: wideband carrier gated by a slow activation envelope,
/// different burst timing per channel.
fn synth_chunk(chunk_index: usize) -> Vec<f32> {
    let mut samples = Vec::with_capacity(CHUNK_FRAMES * CHANNELS);
    for frame in 0..CHUNK_FRAMES {
        let t = (chunk_index * CHUNK_FRAMES + frame) as f64 / SAMPLE_RATE;
        for channel in 0..CHANNELS {
            let activation = (0.5 + 0.5 * (2.0 * std::f64::consts::PI * 0.8 * t
                + channel as f64 * 1.2)
                .sin())
            .powi(3);
            let carrier = (2.0 * std::f64::consts::PI * 147.0 * t).sin()
                + 0.6 * (2.0 * std::f64::consts::PI * 283.0 * t).sin();
            // Slow baseline wander the highpass should remove
            let wander = 0.4 * (2.0 * std::f64::consts::PI * 0.3 * t).sin();
            samples.push((activation * carrier + wander) as f32);
        }
    }
    samples
}

fn main() -> Result<(), PipelineError> {
    let highpass = butterworth_highpass(4, 20.0, SAMPLE_RATE)?;
    let mut pipeline = Pipeline::new(PipelineOptions::default())
        .filter(highpass.into())?
        .rectify(RectifyConfig::default())?
        .rms(WindowedStatisticConfig {
            mode: StageMode::Moving,
            window: Some(WindowSpec::Duration(0.125)),
            sample_rate: Some(SAMPLE_RATE),
        })?;

    println!("{}", pipeline.describe());

    let opts = ProcessOptions::new(CHANNELS, SAMPLE_RATE)?;
    for chunk_index in 0..8 {
        let chunk = synth_chunk(chunk_index);
        let envelope = pipeline.process(&chunk, &opts)?;

        let mut peaks = vec![0.0f32; CHANNELS];
        for frame in 0..envelope.frames() {
            for (channel, peak) in peaks.iter_mut().enumerate() {
                *peak = peak.max(envelope.sample(frame, channel));
            }
        }
        println!(
            "chunk {:>2}: envelope peaks  ch0 {:>7.4}  ch1 {:>7.4}",
            chunk_index, peaks[0], peaks[1]
        );
    }

    let metrics = pipeline.metrics();
    println!(
        "processed {} chunks, {} frames",
        metrics.chunks_processed(),
        metrics.frames_in()
    );
    Ok(())
}
