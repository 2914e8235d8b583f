// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Pipeline
//!
//! A chainable, stateful DSP pipeline engine for interleaved multi-channel
//! `f32` streams. Clients build a pipeline by appending configured stages,
//! then repeatedly submit chunks; streaming stages carry per-channel state
//! across chunks so that chunked processing is numerically equivalent to
//! processing the concatenated stream.
//!
//! The engine serves biomedical (EEG/EMG/ECG), audio, and sensor-fusion
//! clients: running statistics, IIR/FIR filtering and filter banks,
//! convolution, polyphase resampling, spectral transforms (STFT, mel,
//! MFCC, Hilbert, wavelet), pretrained matrix transforms (PCA/ICA/
//! whitening/CSP), adaptive filters (LMS/RLS), detection and EMG feature
//! stages, Kalman tracking, and timestamp-driven time alignment.
//!
//! ## Quick Start
//!
//! ```
//! use signal_pipeline::pipeline::{Pipeline, PipelineOptions};
//! use signal_pipeline::stages::amplitude::RectifyConfig;
//! use signal_pipeline::stages::statistics::WindowedStatisticConfig;
//! use signal_pipeline::stages::WindowSpec;
//! use signal_pipeline_domain::{ProcessOptions, StageMode};
//!
//! let mut pipeline = Pipeline::new(PipelineOptions::default())
//!     .rectify(RectifyConfig::default())
//!     .unwrap()
//!     .rms(WindowedStatisticConfig {
//!         mode: StageMode::Moving,
//!         window: Some(WindowSpec::Samples(16)),
//!         sample_rate: None,
//!     })
//!     .unwrap();
//!
//! let opts = ProcessOptions::new(2, 500.0).unwrap();
//! let chunk = vec![0.5f32; 64];
//! let envelope = pipeline.process(&chunk, &opts).unwrap();
//! assert_eq!(envelope.channels(), 2);
//! assert!(envelope.samples().iter().all(|&v| v >= 0.0));
//! ```
//!
//! ## Pausing and Resuming
//!
//! `Pipeline::save_state` serializes every stage's state (structured JSON
//! or the compact binary layout); `Pipeline::load_state` validates the
//! snapshot against the constructed stage list (structure, structural
//! parameters, and derived invariants such as running sums) before
//! installing anything. With `fallback_on_load_failure` enabled, a failed
//! load degrades to fresh state instead of erroring.
//!
//! ## Layering
//!
//! - [`signal_pipeline_domain`] holds the stage contract, data model,
//!   snapshot formats, and error taxonomy.
//! - This crate holds the numeric kernels ([`numerics`]), the stage
//!   implementations ([`stages`]), the executor, and the pipeline surface
//!   ([`pipeline`]).

mod executor;
pub mod numerics;
pub mod pipeline;
mod snapshot;
pub mod stages;

// Re-export the public surface for convenient access
pub use pipeline::{LoadOutcome, Pipeline, PipelineOptions};
pub use signal_pipeline_domain::{
    PipelineError, ProcessOptions, ProcessingMetrics, SampleBuffer, SnapshotFormat, StageKind,
    StageMode,
};
