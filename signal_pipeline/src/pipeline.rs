// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline
//!
//! The client-facing surface: build a pipeline by appending stages, then
//! repeatedly submit interleaved chunks.
//!
//! ## Lifecycle
//!
//! 1. **Build**: `Pipeline::new(options)` then one fluent appender per
//!    stage; parameter errors surface at append time.
//! 2. **Process**: `process` / `process_with_timestamps`. The first call
//!    seals the stage list; appending afterwards is a contract violation.
//! 3. **Pause/resume**: `save_state` (structured or compact) and
//!    `load_state` (format auto-detected); a snapshot loaded into an
//!    identically-built pipeline restores bit-for-bit numeric behavior.
//! 4. **Reset**: `clear_state` wipes stage state, keeps parameters.
//! 5. **Dispose**: `dispose` releases the stages; further calls fail.
//!
//! ## Example
//!
//! ```
//! use signal_pipeline::pipeline::{Pipeline, PipelineOptions};
//! use signal_pipeline::stages::statistics::WindowedStatisticConfig;
//! use signal_pipeline::stages::WindowSpec;
//! use signal_pipeline_domain::{ProcessOptions, StageMode};
//!
//! let mut pipeline = Pipeline::new(PipelineOptions::default())
//!     .moving_average(WindowedStatisticConfig {
//!         mode: StageMode::Moving,
//!         window: Some(WindowSpec::Samples(3)),
//!         sample_rate: None,
//!     })
//!     .unwrap();
//!
//! let opts = ProcessOptions::new(1, 1000.0).unwrap();
//! let out = pipeline.process(&[1.0, 2.0, 3.0, 4.0, 5.0], &opts).unwrap();
//! assert_eq!(out.samples(), &[1.0, 1.5, 2.0, 3.0, 4.0]);
//! ```

use tracing::warn;

use signal_pipeline_domain::{
    PipelineError, ProcessOptions, ProcessingMetrics, SampleBuffer, SnapshotFormat, StageService,
};

use crate::executor::Executor;
use crate::snapshot;
use crate::stages::adaptive::{LmsFilterConfig, LmsFilterStage, RlsFilterConfig, RlsFilterStage};
use crate::stages::alignment::{TimeAlignmentConfig, TimeAlignmentStage};
use crate::stages::amplitude::{AmplifyConfig, AmplifyStage, RectifyConfig, RectifyStage};
use crate::stages::calculus::{DifferentiatorStage, IntegratorConfig, IntegratorStage};
use crate::stages::convolution::{ConvolutionConfig, ConvolutionStage};
use crate::stages::detection::{
    ClipDetectionConfig, ClipDetectionStage, PeakDetectionConfig, PeakDetectionStage, SnrConfig,
    SnrStage,
};
use crate::stages::features::{
    LinearRegressionConfig, LinearRegressionStage, WaveformFeatureConfig, WaveformFeatureStage,
};
use crate::stages::filter::{FilterBankConfig, FilterBankStage, FilterConfig, FilterStage};
use crate::stages::resample::{RateFactorConfig, ResampleConfig, ResampleStage};
use crate::stages::routing::{ChannelRoutingConfig, ChannelRoutingStage};
use crate::stages::spectral::{
    HilbertEnvelopeConfig, HilbertEnvelopeStage, MelSpectrogramConfig, MelSpectrogramStage,
    MfccConfig, MfccStage, StftConfig, StftStage, WaveletTransformConfig, WaveletTransformStage,
};
use crate::stages::statistics::{
    CumulativeMovingAverageConfig, CumulativeMovingAverageStage, ExponentialMovingAverageConfig,
    ExponentialMovingAverageStage, WindowedStatisticConfig, WindowedStatisticStage,
};
use crate::stages::tap::{TapConfig, TapStage};
use crate::stages::tracking::{KalmanFilterConfig, KalmanFilterStage};
use crate::stages::transform::{MatrixTransformConfig, MatrixTransformStage};

/// Pipeline-wide policy flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineOptions {
    /// Convert snapshot-load failures into a soft reset to fresh state.
    pub fallback_on_load_failure: bool,
    /// Retries for transient decode errors during `load_state`.
    pub max_retries: u32,
}

/// Result of a `load_state` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot was validated and installed.
    Restored,
    /// Loading failed but `fallback_on_load_failure` converted the failure
    /// into fresh state; the reason is the underlying error message.
    FreshFallback { reason: String },
}

/// Ordered, stateful composition of stages.
pub struct Pipeline {
    stages: Vec<Box<dyn StageService>>,
    options: PipelineOptions,
    executor: Executor,
    metrics: ProcessingMetrics,
    sealed: bool,
    disposed: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("options", &self.options)
            .field("metrics", &self.metrics)
            .field("sealed", &self.sealed)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            stages: Vec::new(),
            options,
            executor: Executor::new(),
            metrics: ProcessingMetrics::new(0),
            sealed: false,
            disposed: false,
        }
    }

    /// Appends an already-constructed stage.
    ///
    /// # Errors
    ///
    /// Fails once the pipeline is sealed (after the first `process`) or
    /// disposed.
    pub fn with_stage(mut self, stage: Box<dyn StageService>) -> Result<Self, PipelineError> {
        self.check_alive()?;
        if self.sealed {
            return Err(PipelineError::PipelineSealed(
                "Stages cannot be appended after the first process call".to_string(),
            ));
        }
        self.stages.push(stage);
        Ok(self)
    }

    fn check_alive(&self) -> Result<(), PipelineError> {
        if self.disposed {
            return Err(PipelineError::PipelineDisposed(
                "Pipeline has been disposed".to_string(),
            ));
        }
        Ok(())
    }

    // -- fluent appenders, one per registered stage kind -------------------

    pub fn rectify(self, config: RectifyConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(RectifyStage::new(config)?))
    }

    pub fn amplify(self, config: AmplifyConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(AmplifyStage::new(config)?))
    }

    pub fn moving_average(self, config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WindowedStatisticStage::moving_average(config)?))
    }

    pub fn rms(self, config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WindowedStatisticStage::rms(config)?))
    }

    pub fn mean_absolute_value(
        self,
        config: WindowedStatisticConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WindowedStatisticStage::mean_absolute_value(config)?))
    }

    pub fn variance(self, config: WindowedStatisticConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WindowedStatisticStage::variance(config)?))
    }

    pub fn z_score_normalize(
        self,
        config: WindowedStatisticConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WindowedStatisticStage::z_score_normalize(config)?))
    }

    pub fn cumulative_moving_average(
        self,
        config: CumulativeMovingAverageConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(CumulativeMovingAverageStage::new(config)?))
    }

    pub fn exponential_moving_average(
        self,
        config: ExponentialMovingAverageConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ExponentialMovingAverageStage::new(config)?))
    }

    pub fn differentiator(self) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(DifferentiatorStage::new()?))
    }

    pub fn integrator(self, config: IntegratorConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(IntegratorStage::new(config)?))
    }

    pub fn filter(self, config: FilterConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(FilterStage::new(config)?))
    }

    pub fn filter_bank(self, config: FilterBankConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(FilterBankStage::new(config)?))
    }

    pub fn convolution(self, config: ConvolutionConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ConvolutionStage::new(config)?))
    }

    pub fn interpolate(self, config: RateFactorConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ResampleStage::interpolate(config)?))
    }

    pub fn decimate(self, config: RateFactorConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ResampleStage::decimate(config)?))
    }

    pub fn resample(self, config: ResampleConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ResampleStage::resample(config)?))
    }

    pub fn stft(self, config: StftConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(StftStage::stft(config)?))
    }

    pub fn fft(self, config: StftConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(StftStage::fft(config)?))
    }

    pub fn mel_spectrogram(self, config: MelSpectrogramConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(MelSpectrogramStage::new(config)?))
    }

    pub fn mfcc(self, config: MfccConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(MfccStage::new(config)?))
    }

    pub fn wavelet_transform(
        self,
        config: WaveletTransformConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WaveletTransformStage::new(config)?))
    }

    pub fn hilbert_envelope(self, config: HilbertEnvelopeConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(HilbertEnvelopeStage::new(config)?))
    }

    pub fn pca_transform(self, config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(MatrixTransformStage::pca(config)?))
    }

    pub fn ica_transform(self, config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(MatrixTransformStage::ica(config)?))
    }

    pub fn whitening_transform(
        self,
        config: MatrixTransformConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(MatrixTransformStage::whitening(config)?))
    }

    pub fn csp_transform(self, config: MatrixTransformConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(MatrixTransformStage::csp(config)?))
    }

    pub fn channel_select(self, config: ChannelRoutingConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ChannelRoutingStage::select(config)?))
    }

    pub fn channel_merge(self, config: ChannelRoutingConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ChannelRoutingStage::merge(config)?))
    }

    pub fn lms_filter(self, config: LmsFilterConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(LmsFilterStage::new(config)?))
    }

    pub fn rls_filter(self, config: RlsFilterConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(RlsFilterStage::new(config)?))
    }

    pub fn peak_detection(self, config: PeakDetectionConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(PeakDetectionStage::new(config)?))
    }

    pub fn clip_detection(self, config: ClipDetectionConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(ClipDetectionStage::new(config)?))
    }

    pub fn snr(self, config: SnrConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(SnrStage::new(config)?))
    }

    pub fn waveform_length(self, config: WaveformFeatureConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WaveformFeatureStage::waveform_length(config)?))
    }

    pub fn willison_amplitude(
        self,
        config: WaveformFeatureConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WaveformFeatureStage::willison_amplitude(config)?))
    }

    pub fn slope_sign_change(
        self,
        config: WaveformFeatureConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(WaveformFeatureStage::slope_sign_change(config)?))
    }

    pub fn linear_regression(
        self,
        config: LinearRegressionConfig,
    ) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(LinearRegressionStage::new(config)?))
    }

    pub fn tap(self, config: TapConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(TapStage::new(config)?))
    }

    pub fn kalman_filter(self, config: KalmanFilterConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(KalmanFilterStage::new(config)?))
    }

    pub fn time_alignment(self, config: TimeAlignmentConfig) -> Result<Self, PipelineError> {
        self.with_stage(Box::new(TimeAlignmentStage::new(config)?))
    }

    // -- processing --------------------------------------------------------

    /// Processes one chunk of interleaved samples.
    pub fn process(
        &mut self,
        samples: &[f32],
        opts: &ProcessOptions,
    ) -> Result<SampleBuffer, PipelineError> {
        self.process_inner(samples, None, opts)
    }

    /// Processes one chunk with a paired timestamp buffer (one timestamp
    /// per frame), routed to stages that consume timestamps.
    pub fn process_with_timestamps(
        &mut self,
        samples: &[f32],
        timestamps: &[f32],
        opts: &ProcessOptions,
    ) -> Result<SampleBuffer, PipelineError> {
        self.process_inner(samples, Some(timestamps), opts)
    }

    fn process_inner(
        &mut self,
        samples: &[f32],
        timestamps: Option<&[f32]>,
        opts: &ProcessOptions,
    ) -> Result<SampleBuffer, PipelineError> {
        self.check_alive()?;
        if samples.len() % opts.channels() != 0 {
            return Err(PipelineError::ShapeMismatch(format!(
                "Buffer length {} is not divisible by channel count {}",
                samples.len(),
                opts.channels()
            )));
        }
        let frames_in = samples.len() / opts.channels();
        if let Some(ts) = timestamps {
            if ts.len() != frames_in {
                return Err(PipelineError::ShapeMismatch(format!(
                    "Timestamp buffer has {} entries for {} frames",
                    ts.len(),
                    frames_in
                )));
            }
        }
        if !self.sealed {
            self.sealed = true;
            self.metrics = ProcessingMetrics::new(self.stages.len());
        }

        let (out, channels) = self.executor.run(
            &mut self.stages,
            &mut self.metrics,
            samples,
            opts,
            timestamps,
        )?;
        let frames_out = out.len() / channels.max(1);
        self.metrics.record_chunk(frames_in, frames_out);
        SampleBuffer::new(out, channels)
    }

    // -- state management --------------------------------------------------

    /// Serializes the complete pipeline state. Read-only.
    ///
    /// The structured format returns UTF-8 JSON bytes; the compact format
    /// returns the binary layout with a payload digest.
    pub fn save_state(&self, format: SnapshotFormat) -> Result<Vec<u8>, PipelineError> {
        self.check_alive()?;
        let snapshot = snapshot::capture(&self.stages);
        match format {
            SnapshotFormat::Structured => Ok(snapshot.to_structured_string()?.into_bytes()),
            SnapshotFormat::Compact => snapshot.to_compact_bytes(),
        }
    }

    /// Restores state from a snapshot blob (format auto-detected).
    ///
    /// # Errors
    ///
    /// Structure, parameter, and validation mismatches are fatal unless the
    /// pipeline was built with `fallback_on_load_failure`, in which case
    /// the failure degrades to fresh state and is reported as
    /// [`LoadOutcome::FreshFallback`].
    pub fn load_state(&mut self, blob: &[u8]) -> Result<LoadOutcome, PipelineError> {
        self.check_alive()?;
        let result = snapshot::decode(blob, self.options.max_retries)
            .and_then(|decoded| snapshot::restore(&mut self.stages, &decoded));
        match result {
            Ok(()) => Ok(LoadOutcome::Restored),
            Err(err) if self.options.fallback_on_load_failure && err.is_state_load_error() => {
                warn!(error = %err, "snapshot load failed; continuing with fresh state");
                self.clear_state();
                Ok(LoadOutcome::FreshFallback {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Resets every stage's state, keeping parameters.
    pub fn clear_state(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Releases the stages; any further call on this pipeline fails.
    pub fn dispose(&mut self) {
        self.stages.clear();
        self.disposed = true;
    }

    // -- introspection -----------------------------------------------------

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Cumulative processing counters.
    pub fn metrics(&self) -> &ProcessingMetrics {
        &self.metrics
    }

    /// One-line human summary of the stage chain.
    pub fn describe(&self) -> String {
        if self.stages.is_empty() {
            return "Empty pipeline".to_string();
        }
        let names: Vec<&str> = self
            .stages
            .iter()
            .map(|stage| stage.kind().identifier())
            .collect();
        format!("Pipeline: {}", names.join(" -> "))
    }
}
