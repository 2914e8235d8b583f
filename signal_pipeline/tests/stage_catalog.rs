// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! One end-to-end exercise per registered stage kind, driven through the
//! public pipeline surface. Shape contracts and a characteristic behavior
//! are asserted for each.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use signal_pipeline::pipeline::{Pipeline, PipelineOptions};
use signal_pipeline::stages::adaptive::{LmsFilterConfig, RlsFilterConfig};
use signal_pipeline::stages::alignment::TimeAlignmentConfig;
use signal_pipeline::stages::amplitude::{AmplifyConfig, RectifyConfig};
use signal_pipeline::stages::calculus::IntegratorConfig;
use signal_pipeline::stages::convolution::ConvolutionConfig;
use signal_pipeline::stages::detection::{ClipDetectionConfig, PeakDetectionConfig, SnrConfig};
use signal_pipeline::stages::features::{LinearRegressionConfig, WaveformFeatureConfig};
use signal_pipeline::stages::filter::{FilterBankConfig, FilterConfig};
use signal_pipeline::stages::resample::{RateFactorConfig, ResampleConfig};
use signal_pipeline::stages::routing::ChannelRoutingConfig;
use signal_pipeline::stages::spectral::{
    HilbertEnvelopeConfig, MelSpectrogramConfig, MfccConfig, StftConfig, WaveletTransformConfig,
};
use signal_pipeline::stages::statistics::{
    CumulativeMovingAverageConfig, ExponentialMovingAverageConfig, WindowedStatisticConfig,
};
use signal_pipeline::stages::tap::TapConfig;
use signal_pipeline::stages::tracking::KalmanFilterConfig;
use signal_pipeline::stages::transform::MatrixTransformConfig;
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

#[test]
fn catalog_rectify() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .rectify(RectifyConfig::default())
        .unwrap();
    let out = p.process(&[-1.0, 1.0, -0.5], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[1.0, 1.0, 0.5]);
}

#[test]
fn catalog_amplify() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .amplify(AmplifyConfig { factor: -2.0 })
        .unwrap();
    let out = p.process(&[1.0, 2.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[-2.0, -4.0]);
}

#[test]
fn catalog_moving_average() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .moving_average(moving(2))
        .unwrap();
    let out = p.process(&[2.0, 4.0, 6.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[2.0, 3.0, 5.0]);
}

#[test]
fn catalog_cumulative_moving_average() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .cumulative_moving_average(CumulativeMovingAverageConfig::default())
        .unwrap();
    let out = p.process(&[2.0, 4.0, 6.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[2.0, 3.0, 4.0]);
}

#[test]
fn catalog_exponential_moving_average() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .exponential_moving_average(ExponentialMovingAverageConfig {
            alpha: 0.5,
            mode: StageMode::Moving,
        })
        .unwrap();
    let out = p.process(&[4.0, 0.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[4.0, 2.0]);
}

#[test]
fn catalog_rms() {
    let mut p = Pipeline::new(PipelineOptions::default()).rms(moving(2)).unwrap();
    let out = p.process(&[3.0, 4.0], &opts(1)).unwrap();
    assert!((out.samples()[1] - (12.5f32).sqrt()).abs() < 1e-5);
}

#[test]
fn catalog_mean_absolute_value() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .mean_absolute_value(moving(2))
        .unwrap();
    let out = p.process(&[-3.0, 5.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[3.0, 4.0]);
}

#[test]
fn catalog_variance() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .variance(moving(2))
        .unwrap();
    let out = p.process(&[1.0, 3.0], &opts(1)).unwrap();
    // Window [1, 3]: mean 2, E[x^2] 5 -> variance 1
    assert_eq!(out.samples()[1], 1.0);
}

#[test]
fn catalog_z_score_normalize() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .z_score_normalize(WindowedStatisticConfig {
            mode: StageMode::Batch,
            window: None,
            sample_rate: None,
        })
        .unwrap();
    let out = p.process(&[1.0, 3.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[-1.0, 1.0]);
}

#[test]
fn catalog_differentiator() {
    let mut p = Pipeline::new(PipelineOptions::default()).differentiator().unwrap();
    let out = p.process(&[5.0, 7.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[5.0, 2.0]);
}

#[test]
fn catalog_integrator() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .integrator(IntegratorConfig::default())
        .unwrap();
    let out = p.process(&[1.0, 2.0, 3.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[1.0, 3.0, 6.0]);
}

#[test]
fn catalog_filter() {
    // One-zero averager: y[n] = (x[n] + x[n-1]) / 2
    let mut p = Pipeline::new(PipelineOptions::default())
        .filter(FilterConfig {
            b: vec![0.5, 0.5],
            a: vec![1.0],
        })
        .unwrap();
    let out = p.process(&[2.0, 4.0, 6.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[1.0, 3.0, 5.0]);
}

#[test]
fn catalog_filter_bank() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .filter_bank(FilterBankConfig {
            bands: vec![
                FilterConfig { b: vec![1.0], a: vec![1.0] },
                FilterConfig { b: vec![2.0], a: vec![1.0] },
            ],
        })
        .unwrap();
    let out = p.process(&[1.0, 1.0], &opts(1)).unwrap();
    assert_eq!(out.channels(), 2);
    assert_eq!(out.samples(), &[1.0, 2.0, 1.0, 2.0]);
}

#[test]
fn catalog_convolution() {
    let mut config = ConvolutionConfig::new(vec![1.0, 1.0]);
    config.mode = StageMode::Batch;
    let mut p = Pipeline::new(PipelineOptions::default())
        .convolution(config)
        .unwrap();
    let out = p.process(&[1.0, 2.0, 3.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[3.0, 5.0]);
}

#[test]
fn catalog_interpolate() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .interpolate(RateFactorConfig { factor: 2, order: Some(15) })
        .unwrap();
    let out = p.process(&vec![1.0; 10], &opts(1)).unwrap();
    assert_eq!(out.frames(), 20);
}

#[test]
fn catalog_decimate() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .decimate(RateFactorConfig { factor: 2, order: Some(15) })
        .unwrap();
    let out = p.process(&vec![1.0; 10], &opts(1)).unwrap();
    assert_eq!(out.frames(), 5);
}

#[test]
fn catalog_resample() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .resample(ResampleConfig {
            up_factor: 3,
            down_factor: 2,
            order: Some(15),
        })
        .unwrap();
    let out = p.process(&vec![1.0; 10], &opts(1)).unwrap();
    assert_eq!(out.frames(), 15);
}

#[test]
fn catalog_stft() {
    let mut config = StftConfig::new(4);
    config.hop_size = Some(4);
    config.window = signal_pipeline::numerics::window::WindowFunction::None;
    let mut p = Pipeline::new(PipelineOptions::default()).stft(config).unwrap();
    let out = p.process(&[1.0, 1.0, 1.0, 1.0], &opts(1)).unwrap();
    assert_eq!(out.frames(), 3); // 4/2 + 1 bins
    assert!((out.samples()[0] - 4.0).abs() < 1e-4);
}

#[test]
fn catalog_fft() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .fft(StftConfig::new(4))
        .unwrap();
    let out = p.process(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0], &opts(1)).unwrap();
    assert_eq!(out.frames(), 6); // two one-shot frames of 3 bins
}

#[test]
fn catalog_mel_spectrogram() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .mel_spectrogram(MelSpectrogramConfig {
            num_bins: 17,
            num_mel_bands: 4,
            sample_rate: 1000.0,
            fmin: 0.0,
            fmax: None,
        })
        .unwrap();
    let out = p.process(&vec![1.0; 17], &opts(1)).unwrap();
    assert_eq!(out.frames(), 4);
    assert!(out.samples().iter().all(|&v| v >= 0.0));
}

#[test]
fn catalog_mfcc() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .mfcc(MfccConfig::new(8, 3))
        .unwrap();
    let input: Vec<f32> = (1..=8).map(|i| i as f32).collect();
    let out = p.process(&input, &opts(1)).unwrap();
    assert_eq!(out.frames(), 3);
}

#[test]
fn catalog_wavelet_transform() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .wavelet_transform(WaveletTransformConfig {
            wavelet: signal_pipeline::stages::spectral::WaveletFamily::Haar,
        })
        .unwrap();
    let out = p.process(&[1.0, 1.0], &opts(1)).unwrap();
    let s = std::f32::consts::FRAC_1_SQRT_2;
    assert!((out.samples()[0] - 2.0 * s).abs() < 1e-5); // approximation
    assert!(out.samples()[1].abs() < 1e-5); // detail
}

#[test]
fn catalog_hilbert_envelope() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .hilbert_envelope(HilbertEnvelopeConfig {
            window_size: 8,
            hop_size: None,
        })
        .unwrap();
    let out = p.process(&vec![1.0; 16], &opts(1)).unwrap();
    assert!(!out.is_empty());
    for &v in out.samples() {
        assert!((v - 1.0).abs() < 0.05, "constant envelope, got {}", v);
    }
}

#[test]
fn catalog_pca_transform() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .pca_transform(MatrixTransformConfig {
            matrix: vec![1.0, 0.0, 0.0, 1.0],
            mean: vec![],
            num_channels: 2,
            num_components: 2,
        })
        .unwrap();
    let out = p.process(&[3.0, 4.0], &opts(2)).unwrap();
    assert_eq!(out.samples(), &[3.0, 4.0]);
}

#[test]
fn catalog_ica_transform() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .ica_transform(MatrixTransformConfig {
            matrix: vec![0.0, 1.0, 1.0, 0.0],
            mean: vec![],
            num_channels: 2,
            num_components: 2,
        })
        .unwrap();
    let out = p.process(&[3.0, 4.0], &opts(2)).unwrap();
    assert_eq!(out.samples(), &[4.0, 3.0]);
}

#[test]
fn catalog_whitening_transform() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .whitening_transform(MatrixTransformConfig {
            matrix: vec![1.0, 0.0, 0.0, 1.0],
            mean: vec![1.0, 2.0],
            num_channels: 2,
            num_components: 2,
        })
        .unwrap();
    let out = p.process(&[2.0, 4.0], &opts(2)).unwrap();
    assert_eq!(out.samples(), &[1.0, 2.0]);
}

#[test]
fn catalog_csp_transform() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .csp_transform(MatrixTransformConfig {
            matrix: vec![1.0, 1.0],
            mean: vec![],
            num_channels: 2,
            num_components: 1,
        })
        .unwrap();
    let out = p.process(&[3.0, 4.0], &opts(2)).unwrap();
    assert_eq!(out.samples(), &[7.0, 0.0]); // zero-filled trailing channel
}

#[test]
fn catalog_channel_select() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .channel_select(ChannelRoutingConfig {
            mapping: vec![1],
            num_input_channels: 2,
        })
        .unwrap();
    let out = p.process(&[1.0, 2.0, 3.0, 4.0], &opts(2)).unwrap();
    assert_eq!(out.channels(), 1);
    assert_eq!(out.samples(), &[2.0, 4.0]);
}

#[test]
fn catalog_channel_merge() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .channel_merge(ChannelRoutingConfig {
            mapping: vec![0, 0],
            num_input_channels: 1,
        })
        .unwrap();
    let out = p.process(&[5.0, 6.0], &opts(1)).unwrap();
    assert_eq!(out.channels(), 2);
    assert_eq!(out.samples(), &[5.0, 5.0, 6.0, 6.0]);
}

#[test]
fn catalog_lms_filter() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .lms_filter(LmsFilterConfig::default())
        .unwrap();
    let out = p.process(&[1.0, 0.5, 0.2, 0.1], &opts(2)).unwrap();
    assert_eq!(out.channels(), 2);
    assert_eq!(out.samples()[0], out.samples()[1]); // error on both channels
}

#[test]
fn catalog_rls_filter() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .rls_filter(RlsFilterConfig::default())
        .unwrap();
    let out = p.process(&[1.0, 0.5], &opts(2)).unwrap();
    assert_eq!(out.samples()[0], out.samples()[1]);
}

#[test]
fn catalog_peak_detection() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .peak_detection(PeakDetectionConfig::default())
        .unwrap();
    let out = p.process(&[0.0, 1.0, 0.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[0.0, 1.0, 0.0]);
}

#[test]
fn catalog_clip_detection() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .clip_detection(ClipDetectionConfig::default())
        .unwrap();
    let out = p.process(&[0.5, -1.5], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[0.0, 1.0]);
}

#[test]
fn catalog_snr() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .snr(SnrConfig {
            window: WindowSpec::Samples(4),
            sample_rate: None,
        })
        .unwrap();
    let input: Vec<f32> = (0..4).flat_map(|_| [10.0, 1.0]).collect();
    let out = p.process(&input, &opts(2)).unwrap();
    assert_eq!(out.channels(), 1);
    assert!((out.samples()[3] - 20.0).abs() < 1e-4);
    assert!(out.samples().iter().all(|&v| (-100.0..=100.0).contains(&v)));
}

#[test]
fn catalog_waveform_length() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .waveform_length(WaveformFeatureConfig {
            mode: StageMode::Batch,
            ..Default::default()
        })
        .unwrap();
    let out = p.process(&[0.0, 2.0, 1.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[3.0, 3.0, 3.0]);
}

#[test]
fn catalog_willison_amplitude() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .willison_amplitude(WaveformFeatureConfig {
            mode: StageMode::Batch,
            threshold: 0.5,
            ..Default::default()
        })
        .unwrap();
    let out = p.process(&[0.0, 2.0, 2.1], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[1.0, 1.0, 1.0]); // only the first jump clears 0.5
}

#[test]
fn catalog_slope_sign_change() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .slope_sign_change(WaveformFeatureConfig {
            mode: StageMode::Batch,
            ..Default::default()
        })
        .unwrap();
    let out = p.process(&[0.0, 1.0, 0.0, 1.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[2.0, 2.0, 2.0, 2.0]);
}

#[test]
fn catalog_linear_regression() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .linear_regression(LinearRegressionConfig {
            mode: StageMode::Batch,
            window: None,
            sample_rate: None,
        })
        .unwrap();
    let out = p.process(&[0.0, 3.0, 6.0, 9.0], &opts(1)).unwrap();
    for &v in out.samples() {
        assert!((v - 3.0).abs() < 1e-5);
    }
}

#[test]
fn catalog_tap() {
    let observed = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&observed);
    let mut p = Pipeline::new(PipelineOptions::default())
        .tap(TapConfig {
            callback: Arc::new(move |samples, _channels| {
                sink.fetch_add(samples.len(), Ordering::SeqCst);
            }),
        })
        .unwrap();
    let out = p.process(&[1.0, 2.0, 3.0], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[1.0, 2.0, 3.0]);
    assert_eq!(observed.load(Ordering::SeqCst), 3);
}

#[test]
fn catalog_kalman_filter() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .kalman_filter(KalmanFilterConfig::default())
        .unwrap();
    let out = p.process(&[2.5], &opts(1)).unwrap();
    assert_eq!(out.samples(), &[2.5]); // first measurement initializes
}

#[test]
fn catalog_time_alignment() {
    let mut p = Pipeline::new(PipelineOptions::default())
        .time_alignment(TimeAlignmentConfig::new(100.0))
        .unwrap();
    let timestamps: Vec<f32> = (0..6).map(|i| i as f32 * 0.01).collect();
    let input: Vec<f32> = (0..6).map(|i| i as f32 * 10.0).collect();
    let out = p
        .process_with_timestamps(&input, &timestamps, &opts(1))
        .unwrap();
    for (i, &v) in out.samples().iter().enumerate() {
        assert!((v - (i as f32 * 10.0)).abs() < 1e-3);
    }
}
