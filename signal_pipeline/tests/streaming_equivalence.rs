// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The moving-mode contract: for every streaming stage, processing `A ++ B`
//! equals processing `A` then `B` on the same pipeline, and `clear_state`
//! restores fresh-pipeline behavior.

use proptest::prelude::*;

use signal_pipeline::numerics::filter_design::butterworth_lowpass;
use signal_pipeline::pipeline::{Pipeline, PipelineOptions};
use signal_pipeline::stages::calculus::IntegratorConfig;
use signal_pipeline::stages::convolution::ConvolutionConfig;
use signal_pipeline::stages::resample::RateFactorConfig;
use signal_pipeline::stages::spectral::StftConfig;
use signal_pipeline::stages::statistics::{
    CumulativeMovingAverageConfig, ExponentialMovingAverageConfig, WindowedStatisticConfig,
};
use signal_pipeline::stages::WindowSpec;
use signal_pipeline_domain::{ProcessOptions, StageMode};

fn opts(channels: usize) -> ProcessOptions {
    ProcessOptions::new(channels, 1000.0).unwrap()
}

fn moving(window: usize) -> WindowedStatisticConfig {
    WindowedStatisticConfig {
        mode: StageMode::Moving,
        window: Some(WindowSpec::Samples(window)),
        sample_rate: None,
    }
}

/// Deterministic pseudo-random test signal.
fn signal(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 193 % 71) as f32) / 17.5 - 2.0).collect()
}

/// Runs `input` whole and split at `split` through two identically-built
/// pipelines and asserts bit-identical output.
fn assert_split_equivalent(
    build: impl Fn() -> Pipeline,
    input: &[f32],
    split: usize,
    channels: usize,
) {
    let mut whole = build();
    let expected = whole.process(input, &opts(channels)).unwrap();

    let mut chunked = build();
    let mut actual = chunked
        .process(&input[..split], &opts(channels))
        .unwrap()
        .into_samples();
    actual.extend(
        chunked
            .process(&input[split..], &opts(channels))
            .unwrap()
            .into_samples(),
    );
    assert_eq!(actual, expected.into_samples());
}

#[test]
fn split_equivalence_moving_statistics() {
    let input = signal(120);
    for split in [2, 59, 118] {
        assert_split_equivalent(
            || {
                Pipeline::new(PipelineOptions::default())
                    .moving_average(moving(7))
                    .unwrap()
            },
            &input,
            split,
            2,
        );
        assert_split_equivalent(
            || Pipeline::new(PipelineOptions::default()).rms(moving(5)).unwrap(),
            &input,
            split,
            2,
        );
    }
}

#[test]
fn split_equivalence_ema_and_cma() {
    let input = signal(90);
    assert_split_equivalent(
        || {
            Pipeline::new(PipelineOptions::default())
                .exponential_moving_average(ExponentialMovingAverageConfig {
                    alpha: 0.25,
                    mode: StageMode::Moving,
                })
                .unwrap()
        },
        &input,
        33,
        1,
    );
    assert_split_equivalent(
        || {
            Pipeline::new(PipelineOptions::default())
                .cumulative_moving_average(CumulativeMovingAverageConfig::default())
                .unwrap()
        },
        &input,
        33,
        1,
    );
}

#[test]
fn split_equivalence_filter_chain() {
    let input = signal(200);
    let build = || {
        let coeffs = butterworth_lowpass(4, 100.0, 1000.0).unwrap();
        Pipeline::new(PipelineOptions::default())
            .filter(coeffs.into())
            .unwrap()
            .integrator(IntegratorConfig { alpha: 0.9 })
            .unwrap()
    };
    for split in [10, 100, 190] {
        assert_split_equivalent(build, &input, split, 2);
    }
}

#[test]
fn split_equivalence_convolution_moving() {
    let input = signal(150);
    assert_split_equivalent(
        || {
            Pipeline::new(PipelineOptions::default())
                .convolution(ConvolutionConfig::new(vec![0.2, 0.5, 0.2, -0.1]))
                .unwrap()
        },
        &input,
        71,
        1,
    );
}

#[test]
fn split_equivalence_spectral() {
    let input = signal(160);
    assert_split_equivalent(
        || {
            Pipeline::new(PipelineOptions::default())
                .stft(StftConfig::new(32))
                .unwrap()
        },
        &input,
        45,
        1,
    );
}

#[test]
fn split_equivalence_resampler() {
    let input = signal(144);
    assert_split_equivalent(
        || {
            Pipeline::new(PipelineOptions::default())
                .decimate(RateFactorConfig {
                    factor: 3,
                    order: Some(21),
                })
                .unwrap()
        },
        &input,
        50,
        2,
    );
}

/// clear_state + reprocess equals a fresh pipeline (invariant 3).
#[test]
fn clear_state_equals_fresh_pipeline() {
    let input = signal(60);
    let build = || {
        Pipeline::new(PipelineOptions::default())
            .rms(moving(4))
            .unwrap()
            .exponential_moving_average(ExponentialMovingAverageConfig {
                alpha: 0.5,
                mode: StageMode::Moving,
            })
            .unwrap()
    };

    let mut seasoned = build();
    seasoned.process(&signal(37), &opts(1)).unwrap();
    seasoned.clear_state();
    let after_clear = seasoned.process(&input, &opts(1)).unwrap();

    let mut fresh = build();
    let fresh_out = fresh.process(&input, &opts(1)).unwrap();
    assert_eq!(after_clear, fresh_out);
}

proptest! {
    /// Property: any split point of any signal preserves moving-average
    /// streaming equivalence.
    #[test]
    fn prop_moving_average_split_equivalence(
        samples in prop::collection::vec(-1000.0f32..1000.0, 2..200),
        window in 1usize..12,
        split_fraction in 0.0f64..1.0,
    ) {
        let split = ((samples.len() as f64 * split_fraction) as usize).min(samples.len());
        let build = || {
            Pipeline::new(PipelineOptions::default())
                .moving_average(moving(window))
                .unwrap()
        };

        let mut whole = build();
        let expected = whole.process(&samples, &opts(1)).unwrap().into_samples();

        let mut chunked = build();
        let mut actual = chunked.process(&samples[..split], &opts(1)).unwrap().into_samples();
        actual.extend(chunked.process(&samples[split..], &opts(1)).unwrap().into_samples());

        prop_assert_eq!(actual, expected);
    }

    /// Property: the differentiator then integrator chain reconstructs its
    /// input within float tolerance for arbitrary signals.
    #[test]
    fn prop_differentiate_integrate_identity(
        samples in prop::collection::vec(-100.0f32..100.0, 1..100),
    ) {
        let mut pipeline = Pipeline::new(PipelineOptions::default())
            .differentiator()
            .unwrap()
            .integrator(IntegratorConfig::default())
            .unwrap();
        let out = pipeline.process(&samples, &opts(1)).unwrap();
        for (a, b) in samples.iter().zip(out.samples()) {
            prop_assert!((a - b).abs() < 1e-3);
        }
    }
}
